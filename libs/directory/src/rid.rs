//! RID allocation against the store.
//!
//! Each server owns a RID Set holding `rIDAllocationPool`,
//! `rIDPreviousAllocationPool` and `rIDNextRID`. The pool arithmetic lives in
//! `dirsam-ridalloc`; this module reads and writes the stored state. Every
//! allocation re-reads the RID Set inside the same transaction that persists
//! the advance, so two allocators racing on one state cannot both commit.

use dirsam_id::{Dn, ExtendedDn, Rid};
use dirsam_ridalloc::{carve_pool, AllocationPool, RidPoolState, UNSET_NEXT_RID, UNSET_POOL};
use tracing::{debug, info, warn};

use crate::directory::{already_exists, generalized_time, Directory};
use crate::error::{DirectoryError, DirectoryResult};
use crate::schema::category;
use crate::store::{DirectoryStore, Entry, Modification};

const RID_SET_REFERENCES: &str = "rIDSetReferences";
const RID_ALLOCATION_POOL: &str = "rIDAllocationPool";
const RID_PREVIOUS_ALLOCATION_POOL: &str = "rIDPreviousAllocationPool";
const RID_NEXT_RID: &str = "rIDNextRID";
const RID_AVAILABLE_POOL: &str = "rIDAvailablePool";

fn parse_u64(entry: &Entry, attr: &str, unset: u64) -> DirectoryResult<u64> {
    match entry.first(attr) {
        None => Ok(unset),
        Some(raw) => raw.trim().parse().map_err(|_| {
            DirectoryError::CorruptPoolState(format!("{attr} on {} is not a number: {raw}", entry.dn()))
        }),
    }
}

fn parse_u32(entry: &Entry, attr: &str, unset: u32) -> DirectoryResult<u32> {
    let value = parse_u64(entry, attr, u64::from(unset))?;
    u32::try_from(value).map_err(|_| {
        DirectoryError::CorruptPoolState(format!("{attr} on {} is out of range: {value}", entry.dn()))
    })
}

impl<S: DirectoryStore> Directory<S> {
    /// Creates this server's RID Set with a pool carved from the RID manager.
    pub fn create_own_rid_set(&self) -> DirectoryResult<()> {
        self.with_transaction(|dir| dir.create_rid_set_in_transaction())
    }

    pub(crate) fn create_rid_set_in_transaction(&self) -> DirectoryResult<()> {
        let dns = self.well_known();
        let rid_set = ExtendedDn::from_dn(dns.rid_set.clone());
        match self.read(&rid_set) {
            Ok(_) => return Err(DirectoryError::AlreadyExists(dns.rid_set.to_string())),
            Err(DirectoryError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let pool = self.carve_from_rid_manager()?;
        self.store()
            .add(
                Entry::new(dns.rid_set.clone())
                    .with_attribute("objectClass", ["top", "rIDSet"])
                    .with_attribute("objectCategory", [dns.category(category::RID_SET)?.to_string()])
                    .with_attribute(RID_ALLOCATION_POOL, [pool.to_raw().to_string()])
                    .with_attribute("whenCreated", [generalized_time()]),
            )
            .map_err(already_exists)?;
        self.store().modify(
            &Modification::new(dns.server.clone())
                .replace(RID_SET_REFERENCES, [dns.rid_set.to_string()]),
        )?;

        info!(rid_set = %dns.rid_set, lo = pool.lo(), hi = pool.hi(), "RID set created");
        Ok(())
    }

    /// Allocates the next RID from this server's pool and records the
    /// advance.
    pub fn allocate_rid(&self) -> DirectoryResult<Rid> {
        self.with_transaction(|dir| dir.allocate_rid_in_transaction())
    }

    /// Allocation step for callers that already hold a transaction.
    pub(crate) fn allocate_rid_in_transaction(&self) -> DirectoryResult<Rid> {
        let (rid_set, state) = self.read_rid_set()?;
        let allocation = state.next()?;

        let mut modification = Modification::new(rid_set.clone())
            .replace(RID_NEXT_RID, [allocation.state.next_rid.to_string()])
            .replace(
                RID_PREVIOUS_ALLOCATION_POOL,
                [allocation.state.previous_allocation_pool.to_string()],
            );

        let threshold = u64::from(self.config().rid_pool_size / 2);
        if self.config().rid_refill && allocation.state.needs_refill(threshold) {
            // A failed refill leaves the manager untouched; the current pool
            // still serves this allocation.
            match self.carve_from_rid_manager() {
                Ok(pool) => {
                    debug!(lo = pool.lo(), hi = pool.hi(), "provisioned next RID pool");
                    modification =
                        modification.replace(RID_ALLOCATION_POOL, [pool.to_raw().to_string()]);
                }
                Err(err) => warn!(error = %err, "could not refill RID pool from the RID manager"),
            }
        }

        self.store().modify(&modification)?;
        debug!(rid = allocation.rid, pool_high = allocation.pool_high, "allocated RID");
        Ok(Rid::new(allocation.rid))
    }

    /// Bounds of the RIDs left in the current pool: the RID the next
    /// allocation would return and the pool's high bound. Nothing is
    /// reserved; two callers may see the same value.
    pub fn free_rid_bounds(&self) -> DirectoryResult<(u32, u32)> {
        let (_, state) = self.read_rid_set()?;
        let preview = state.next()?;
        Ok((preview.rid, preview.pool_high))
    }

    /// The RID the next allocation would return. Not reserved.
    pub fn next_free_rid(&self) -> DirectoryResult<u32> {
        self.free_rid_bounds().map(|(rid, _)| rid)
    }

    /// The stored state of this server's RID Set.
    pub fn rid_pool_state(&self) -> DirectoryResult<RidPoolState> {
        self.read_rid_set().map(|(_, state)| state)
    }

    fn read_rid_set(&self) -> DirectoryResult<(Dn, RidPoolState)> {
        let server = self.read(&ExtendedDn::from_dn(self.well_known().server.clone()))?;
        let reference = server.first(RID_SET_REFERENCES).ok_or_else(|| {
            DirectoryError::NotFound(format!(
                "no RID Set: {RID_SET_REFERENCES} missing on {}",
                server.dn()
            ))
        })?;
        let rid_set_dn = Dn::parse(reference)
            .map_err(|e| DirectoryError::CorruptPoolState(format!("bad RID Set reference: {e}")))?;

        let rid_set = self.read(&ExtendedDn::from_dn(rid_set_dn.clone()))?;
        let state = RidPoolState {
            allocation_pool: parse_u64(&rid_set, RID_ALLOCATION_POOL, UNSET_POOL)?,
            previous_allocation_pool: parse_u64(&rid_set, RID_PREVIOUS_ALLOCATION_POOL, UNSET_POOL)?,
            next_rid: parse_u32(&rid_set, RID_NEXT_RID, UNSET_NEXT_RID)?,
        };
        Ok((rid_set_dn, state))
    }

    fn carve_from_rid_manager(&self) -> DirectoryResult<AllocationPool> {
        let manager_dn = self.well_known().rid_manager.clone();
        let manager = self.read(&ExtendedDn::from_dn(manager_dn.clone()))?;
        let available = parse_u64(&manager, RID_AVAILABLE_POOL, UNSET_POOL)?;
        let (pool, remaining) = carve_pool(available, self.config().rid_pool_size)?;
        self.store().modify(
            &Modification::new(manager_dn).replace(RID_AVAILABLE_POOL, [remaining.to_string()]),
        )?;
        Ok(pool)
    }
}

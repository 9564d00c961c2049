//! The directory handle.

use std::cell::Cell;

use chrono::Utc;
use dirsam_id::{Dn, ExtendedDn, Rid};
use dirsam_ridalloc::initial_available_pool;
use tracing::info;

use crate::config::{DirectoryConfig, StoreBackend};
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;
use crate::schema::{atype, category, int32_attr, uf, WellKnownDns};
use crate::store::{DirectoryStore, Entry, MemoryStore, Scope, SqliteStore, StoreError};

/// RID of the first server account in a new domain.
const SERVER_ACCOUNT_RID: u32 = 1000;

/// Entry point for directory operations over a store.
///
/// A `Directory` is used from one thread at a time. Concurrent callers each
/// build their own handle over a shared store (for example an
/// `Arc<MemoryStore>`, or one [`SqliteStore`] per caller on the same file).
pub struct Directory<S> {
    store: S,
    config: DirectoryConfig,
    dns: WellKnownDns,
    pub(crate) transaction_open: Cell<bool>,
}

/// Opens the configured store backend.
pub fn open_store(
    backend: &StoreBackend,
) -> Result<Box<dyn DirectoryStore + Send + Sync>, StoreError> {
    Ok(match backend {
        StoreBackend::Memory => Box::new(MemoryStore::new()),
        StoreBackend::Sqlite(path) => Box::new(SqliteStore::open(path)?),
    })
}

impl<S: DirectoryStore> Directory<S> {
    pub fn new(store: S, config: DirectoryConfig) -> DirectoryResult<Self> {
        let dns = WellKnownDns::new(&config.domain_dn, &config.server_name)?;
        Ok(Self {
            store,
            config,
            dns,
            transaction_open: Cell::new(false),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    pub fn well_known(&self) -> &WellKnownDns {
        &self.dns
    }

    /// The domain root as a search base.
    pub fn domain_base(&self) -> ExtendedDn {
        ExtendedDn::from_dn(self.dns.domain.clone())
    }

    /// Searches, reporting a base that names nothing as `NotFound`.
    pub fn search(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
    ) -> DirectoryResult<Vec<Entry>> {
        self.store
            .search(base, scope, filter, attributes)
            .map_err(|err| match err {
                StoreError::NoSuchObject(what) => DirectoryError::NotFound(what),
                other => other.into(),
            })
    }

    /// Searches for exactly one entry. Zero matches is `NotFound`, more than
    /// one is `AmbiguousReference`.
    pub fn search_one(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
        reference: &str,
    ) -> DirectoryResult<Entry> {
        let mut found = self.search(base, scope, filter, attributes)?;
        match found.len() {
            0 => Err(DirectoryError::NotFound(reference.to_string())),
            1 => Ok(found.remove(0)),
            _ => Err(DirectoryError::AmbiguousReference {
                reference: reference.to_string(),
                matches: found.iter().map(|e| e.dn().to_string()).collect(),
            }),
        }
    }

    /// Finds the single account under the domain matching `filter`.
    pub fn find_account(&self, filter: &Filter, attributes: &[&str]) -> DirectoryResult<Entry> {
        self.search_one(
            &self.domain_base(),
            Scope::Subtree,
            filter,
            attributes,
            &filter.to_string(),
        )
    }

    /// Reads one object by reference with all attributes.
    pub fn read(&self, reference: &ExtendedDn) -> DirectoryResult<Entry> {
        self.search_one(
            reference,
            Scope::Base,
            &Filter::everything(),
            &["*"],
            &reference.to_string(),
        )
    }

    /// Creates the domain skeleton: the domain root, the well-known
    /// containers, this server's account, the RID manager and this server's
    /// RID set.
    pub fn provision(&self) -> DirectoryResult<()> {
        let dns = &self.dns;
        let now = generalized_time();
        let server_sid = self.config.domain_sid.with_rid(Rid::new(SERVER_ACCOUNT_RID))?;

        self.with_transaction(|dir| {
            let store = dir.store();
            store
                .add(
                    Entry::new(dns.domain.clone())
                        .with_sid(Some(dir.config.domain_sid.clone()))
                        .with_attribute("objectClass", ["top", "domain", "domainDNS"])
                        .with_attribute("objectCategory", [dns.category(category::DOMAIN)?.to_string()])
                        .with_attribute("whenCreated", [now.clone()]),
                )
                .map_err(already_exists)?;

            for container in [&dns.users, &dns.computers, &dns.system] {
                store.add(dir.container(container, "container", &now)?)?;
            }
            store.add(dir.container(&dns.domain_controllers, "organizationalUnit", &now)?)?;

            store.add(
                Entry::new(dns.server.clone())
                    .with_sid(Some(server_sid.clone()))
                    .with_attribute("objectClass", ["top", "person", "user", "computer"])
                    .with_attribute("objectCategory", [dns.category(category::COMPUTER)?.to_string()])
                    .with_attribute("sAMAccountName", [format!("{}$", dir.config.server_name)])
                    .with_attribute("sAMAccountType", [int32_attr(atype::WORKSTATION_TRUST)])
                    .with_attribute("userAccountControl", [int32_attr(uf::WORKSTATION_TRUST_ACCOUNT)])
                    .with_attribute("whenCreated", [now.clone()]),
            )?;

            store.add(
                Entry::new(dns.rid_manager.clone())
                    .with_attribute("objectClass", ["top", "rIDManager"])
                    .with_attribute("objectCategory", [dns.category(category::RID_MANAGER)?.to_string()])
                    .with_attribute("rIDAvailablePool", [initial_available_pool().to_string()])
                    .with_attribute("whenCreated", [now.clone()]),
            )?;

            dir.create_rid_set_in_transaction()
        })?;

        info!(domain = %self.dns.domain, server = %self.config.server_name, "domain provisioned");
        Ok(())
    }

    fn container(&self, dn: &Dn, class: &str, now: &str) -> DirectoryResult<Entry> {
        let object_category = if class == "organizationalUnit" {
            category::ORGANIZATIONAL_UNIT
        } else {
            category::CONTAINER
        };
        Ok(Entry::new(dn.clone())
            .with_attribute("objectClass", ["top", class])
            .with_attribute("objectCategory", [self.dns.category(object_category)?.to_string()])
            .with_attribute("whenCreated", [now.to_string()]))
    }
}

/// Reports a duplicate object as `AlreadyExists`.
pub(crate) fn already_exists(err: StoreError) -> DirectoryError {
    match err {
        StoreError::EntryAlreadyExists(what) => DirectoryError::AlreadyExists(what),
        other => other.into(),
    }
}

/// Current time in the directory's generalized time syntax.
pub(crate) fn generalized_time() -> String {
    Utc::now().format("%Y%m%d%H%M%S.0Z").to_string()
}

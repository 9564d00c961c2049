//! RID pool arithmetic.
//!
//! Every server that creates security principals draws relative identifiers
//! from a window of RIDs reserved for it alone. The window state lives in
//! three stored quantities:
//!
//! - **allocation pool**: the most recently provisioned window, packed as
//!   `hi << 32 | lo`
//! - **previous allocation pool**: the window currently being consumed
//! - **next RID**: the last RID handed out from the previous pool
//!
//! Unset values are `u64::MAX` for pools and `u32::MAX` for the cursor.
//!
//! # Invariants
//!
//! - Computing the next RID is a pure function of the stored state; the
//!   caller persists the advanced state in the same transaction that consumes
//!   the RID
//! - The cursor only ever moves forward inside a pool, and a pool is only
//!   replaced by a different one
//! - Pools carved from the domain-wide available pool never overlap

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel for an unset pool attribute.
pub const UNSET_POOL: u64 = u64::MAX;

/// Sentinel for an unset next-RID cursor.
pub const UNSET_NEXT_RID: u32 = u32::MAX;

/// Number of RIDs handed to a server per pool.
pub const DEFAULT_POOL_SIZE: u32 = 500;

/// Highest RID the domain will ever assign.
pub const MAX_RID: u32 = 0x3FFF_FFFF;

/// First RID available for ordinary principals after the well-known range.
pub const FIRST_ALLOCATABLE_RID: u32 = 1100;

/// RID pool errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RidPoolError {
    /// The current pool is used up and no new pool has been provisioned.
    #[error("RID pools out of RIDs: pool {lo}-{hi} exhausted")]
    PoolExhausted { lo: u32, hi: u32 },

    /// The stored pool attributes violate their own invariants.
    #[error("corrupt RID pool state: {0}")]
    CorruptPoolState(String),

    /// A pool of zero RIDs was requested.
    #[error("RID pool size must be non-zero")]
    InvalidPoolSize,
}

/// A closed interval `[lo, hi]` of RIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPool {
    lo: u32,
    hi: u32,
}

impl AllocationPool {
    /// Creates a pool, rejecting empty ranges and ranges that reach the
    /// cursor sentinel.
    pub fn new(lo: u32, hi: u32) -> Result<Self, RidPoolError> {
        if lo > hi {
            return Err(RidPoolError::CorruptPoolState(format!(
                "pool low bound {lo} above high bound {hi}"
            )));
        }
        if hi == UNSET_NEXT_RID {
            return Err(RidPoolError::CorruptPoolState(format!(
                "pool {lo}-{hi} reaches the unset cursor value"
            )));
        }
        Ok(Self { lo, hi })
    }

    /// Decodes the packed form. Returns `None` for the unset sentinel.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != UNSET_POOL).then(|| Self {
            lo: lower_half(raw),
            hi: upper_half(raw),
        })
    }

    #[must_use]
    pub fn to_raw(&self) -> u64 {
        (u64::from(self.hi) << 32) | u64::from(self.lo)
    }

    #[must_use]
    pub fn lo(&self) -> u32 {
        self.lo
    }

    #[must_use]
    pub fn hi(&self) -> u32 {
        self.hi
    }

    /// Number of RIDs in the pool.
    #[must_use]
    pub fn len(&self) -> u64 {
        u64::from(self.hi) - u64::from(self.lo) + 1
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[must_use]
    pub fn contains(&self, rid: u32) -> bool {
        (self.lo..=self.hi).contains(&rid)
    }
}

impl std::fmt::Display for AllocationPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}

fn lower_half(raw: u64) -> u32 {
    (raw & u64::from(u32::MAX)) as u32
}

fn upper_half(raw: u64) -> u32 {
    (raw >> 32) as u32
}

/// Stored state of one server's RID set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RidPoolState {
    pub allocation_pool: u64,
    pub previous_allocation_pool: u64,
    pub next_rid: u32,
}

/// Result of advancing a RID pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RidAllocation {
    /// The RID to assign.
    pub rid: u32,

    /// High bound of the pool the RID came from.
    pub pool_high: u32,

    /// State to persist alongside the RID's consumption.
    pub state: RidPoolState,
}

impl RidPoolState {
    /// State of a freshly provisioned RID set that has never allocated.
    #[must_use]
    pub fn fresh(pool: AllocationPool) -> Self {
        Self {
            allocation_pool: pool.to_raw(),
            previous_allocation_pool: UNSET_POOL,
            next_rid: UNSET_NEXT_RID,
        }
    }

    fn is_first_use(&self) -> bool {
        self.previous_allocation_pool == UNSET_POOL || self.next_rid == UNSET_NEXT_RID
    }

    /// Computes the next RID without side effects.
    ///
    /// On first use the allocation pool is adopted as the previous pool. When
    /// the previous pool runs out, the allocation pool is promoted only if it
    /// differs from the exhausted one; an identical value means no new pool
    /// was provisioned.
    pub fn next(&self) -> Result<RidAllocation, RidPoolError> {
        if self.allocation_pool == UNSET_POOL {
            return Err(RidPoolError::CorruptPoolState(
                "bad RID set: allocation pool is unset".to_string(),
            ));
        }

        let mut previous_pool = self.previous_allocation_pool;
        let mut next_rid: u64 = if self.is_first_use() {
            previous_pool = self.allocation_pool;
            u64::from(lower_half(previous_pool))
        } else {
            u64::from(self.next_rid) + 1
        };

        let mut prev_lo = lower_half(previous_pool);
        let mut prev_hi = upper_half(previous_pool);

        if next_rid > u64::from(prev_hi) {
            // Sharp edge: a provisioning race that writes back the same pool
            // value is indistinguishable from no provisioning at all.
            if self.allocation_pool == previous_pool {
                return Err(RidPoolError::PoolExhausted {
                    lo: prev_lo,
                    hi: prev_hi,
                });
            }

            previous_pool = self.allocation_pool;
            prev_lo = lower_half(previous_pool);
            prev_hi = upper_half(previous_pool);
            next_rid = u64::from(prev_lo);
        }

        if next_rid < u64::from(prev_lo) || next_rid > u64::from(prev_hi) {
            return Err(RidPoolError::CorruptPoolState(format!(
                "bad RID chosen {next_rid} from range {prev_lo}-{prev_hi}"
            )));
        }
        if prev_hi == UNSET_NEXT_RID {
            return Err(RidPoolError::CorruptPoolState(format!(
                "pool {prev_lo}-{prev_hi} reaches the unset cursor value"
            )));
        }

        // Bounded by prev_hi, which is a u32.
        let rid = next_rid as u32;

        Ok(RidAllocation {
            rid,
            pool_high: prev_hi,
            state: RidPoolState {
                allocation_pool: self.allocation_pool,
                previous_allocation_pool: previous_pool,
                next_rid: rid,
            },
        })
    }

    /// RIDs left in the pool currently being consumed, not counting a
    /// provisioned-but-unused allocation pool.
    #[must_use]
    pub fn remaining_in_current_pool(&self) -> u64 {
        if self.is_first_use() {
            return AllocationPool::from_raw(self.allocation_pool).map_or(0, |p| p.len());
        }
        u64::from(upper_half(self.previous_allocation_pool))
            .saturating_sub(u64::from(self.next_rid))
    }

    /// True when a new allocation pool is waiting to be promoted.
    #[must_use]
    pub fn has_pending_pool(&self) -> bool {
        !self.is_first_use() && self.allocation_pool != self.previous_allocation_pool
    }

    /// Whether the server should ask the RID manager for another pool: the
    /// current pool is at or below `threshold` remaining and nothing is
    /// queued behind it.
    #[must_use]
    pub fn needs_refill(&self, threshold: u64) -> bool {
        !self.has_pending_pool() && self.remaining_in_current_pool() <= threshold
    }
}

/// Carves a pool of `size` RIDs off the domain-wide available pool.
///
/// The available pool is packed like an allocation pool: `lo` is the next
/// unassigned RID and `hi` the ceiling. Returns the new pool and the advanced
/// available pool.
pub fn carve_pool(available: u64, size: u32) -> Result<(AllocationPool, u64), RidPoolError> {
    if size == 0 {
        return Err(RidPoolError::InvalidPoolSize);
    }
    if available == UNSET_POOL {
        return Err(RidPoolError::CorruptPoolState(
            "RID manager has no available pool".to_string(),
        ));
    }

    let lo = lower_half(available);
    let hi = upper_half(available);
    if hi == UNSET_NEXT_RID {
        return Err(RidPoolError::CorruptPoolState(format!(
            "available pool ceiling {hi} reaches the unset cursor value"
        )));
    }
    if lo > hi {
        return Err(RidPoolError::PoolExhausted { lo, hi });
    }

    let pool_hi = (u64::from(lo) + u64::from(size) - 1).min(u64::from(hi)) as u32;
    let pool = AllocationPool::new(lo, pool_hi)?;
    // pool_hi < u32::MAX, so the increment cannot wrap.
    let remaining = (u64::from(hi) << 32) | u64::from(pool_hi + 1);

    Ok((pool, remaining))
}

/// The available pool a new domain starts with.
#[must_use]
pub fn initial_available_pool() -> u64 {
    (u64::from(MAX_RID) << 32) | u64::from(FIRST_ALLOCATABLE_RID)
}

//! In-memory directory store.
//!
//! Transactions take a snapshot of the whole tree and restore it on cancel.
//! Only one thread may hold a transaction at a time; other threads block
//! until it is committed or cancelled, so concurrent callers sharing one
//! `Arc<MemoryStore>` observe serializable transactions.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use dirsam_id::{Dn, ExtendedDn, ObjectGuid, Sid};
use tracing::trace;

use super::{
    apply_changes, lookup_reference, prepare_add, strip_references, DirectoryStore, Entry,
    EntryLookup, Modification, Scope, StoreError, StoreResult,
};
use crate::filter::Filter;

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<Entry>,
    snapshot: Option<Vec<Entry>>,
    owner: Option<ThreadId>,
}

struct Entries<'a>(&'a [Entry]);

impl EntryLookup for Entries<'_> {
    fn by_guid(&self, guid: &ObjectGuid) -> StoreResult<Option<Entry>> {
        Ok(self.0.iter().find(|e| e.guid() == *guid).cloned())
    }

    fn by_sid(&self, sid: &Sid) -> StoreResult<Option<Entry>> {
        Ok(self.0.iter().find(|e| e.sid() == Some(sid)).cloned())
    }

    fn by_dn(&self, dn: &Dn) -> StoreResult<Option<Entry>> {
        Ok(self.0.iter().find(|e| e.dn() == dn).cloned())
    }
}

impl MemoryState {
    fn position(&self, target: &ExtendedDn) -> StoreResult<usize> {
        let found = lookup_reference(&Entries(&self.entries), target)?
            .ok_or_else(|| StoreError::NoSuchObject(target.to_string()))?;
        self.entries
            .iter()
            .position(|e| e.guid() == found.guid())
            .ok_or_else(|| StoreError::NoSuchObject(target.to_string()))
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    released: Condvar,
    transactional: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            released: Condvar::new(),
            transactional: true,
        }
    }

    /// A store whose transaction calls are no-ops. Every write is applied
    /// immediately, as over a plain LDAP connection.
    #[must_use]
    pub fn without_transactions() -> Self {
        Self {
            transactional: false,
            ..Self::new()
        }
    }

    /// Number of objects in the tree.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the state, waiting while another thread holds a transaction.
    fn lock_for_caller(&self) -> MutexGuard<'_, MemoryState> {
        let me = thread::current().id();
        let mut state = self.lock();
        while state.owner.is_some_and(|owner| owner != me) {
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state
    }

    fn finish(&self, restore: bool) -> StoreResult<()> {
        if !self.transactional {
            return Ok(());
        }
        let mut state = self.lock_for_caller();
        if state.owner.is_none() {
            return Err(StoreError::Transaction("no transaction is open"));
        }
        let snapshot = state.snapshot.take();
        if restore {
            if let Some(entries) = snapshot {
                state.entries = entries;
            }
        }
        state.owner = None;
        drop(state);
        self.released.notify_all();
        Ok(())
    }
}

impl DirectoryStore for MemoryStore {
    fn search(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
    ) -> StoreResult<Vec<Entry>> {
        let state = self.lock_for_caller();
        let base_dn = if base.has_identifiers() || !base.dn().is_root() {
            let index = state.position(base)?;
            state.entries[index].dn().clone()
        } else {
            Dn::root()
        };

        Ok(state
            .entries
            .iter()
            .filter(|e| scope.contains(&base_dn, e.dn()) && filter.matches(e))
            .map(|e| e.project(attributes))
            .collect())
    }

    fn add(&self, entry: Entry) -> StoreResult<()> {
        let mut state = self.lock_for_caller();
        let entry = prepare_add(&Entries(&state.entries), entry)?;
        trace!(dn = %entry.dn(), "memory store add");
        state.entries.push(entry);
        Ok(())
    }

    fn modify(&self, modification: &Modification) -> StoreResult<()> {
        let mut state = self.lock_for_caller();
        let index = state.position(&modification.target)?;
        let mut updated = state.entries[index].clone();
        apply_changes(&Entries(&state.entries), &mut updated, &modification.changes)?;
        state.entries[index] = updated;
        Ok(())
    }

    fn delete(&self, target: &ExtendedDn) -> StoreResult<()> {
        let mut state = self.lock_for_caller();
        let index = state.position(target)?;
        let victim = state.entries[index].clone();

        let has_children = state
            .entries
            .iter()
            .any(|e| e.guid() != victim.guid() && e.dn().is_child_of(victim.dn()));
        if has_children {
            return Err(StoreError::NotAllowedOnNonLeaf(victim.dn().to_string()));
        }

        state.entries.remove(index);
        for entry in &mut state.entries {
            strip_references(entry, &victim.guid());
        }
        trace!(dn = %victim.dn(), "memory store delete");
        Ok(())
    }

    fn transaction_begin(&self) -> StoreResult<()> {
        if !self.transactional {
            return Ok(());
        }
        let mut state = self.lock_for_caller();
        if state.owner.is_some() {
            return Err(StoreError::Transaction("a transaction is already open"));
        }
        state.snapshot = Some(state.entries.clone());
        state.owner = Some(thread::current().id());
        Ok(())
    }

    fn transaction_commit(&self) -> StoreResult<()> {
        self.finish(false)
    }

    fn transaction_cancel(&self) -> StoreResult<()> {
        self.finish(true)
    }
}

//! Transaction scoping and compensating cleanup.
//!
//! A mutation moves through `Idle -> Open -> {Committed | Cancelled}`.
//! [`TransactionGuard`] owns the open state: dropping it without a commit
//! cancels the store transaction, so every exit path from a body (error,
//! early return, panic) ends in exactly one cancel.
//!
//! [`CleanupOnError`] covers stores without real transactions. It is armed
//! once an object has been added and deletes that object unless disarmed.

use dirsam_id::ExtendedDn;
use tracing::{debug, warn};

use crate::directory::Directory;
use crate::error::{DirectoryError, DirectoryResult};
use crate::store::{DirectoryStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Open,
    Committed,
    Cancelled,
}

/// An open store transaction.
#[must_use = "dropping the guard cancels the transaction"]
pub struct TransactionGuard<'a, S: DirectoryStore> {
    directory: &'a Directory<S>,
    state: TransactionState,
}

impl<'a, S: DirectoryStore> TransactionGuard<'a, S> {
    /// Opens a transaction. Fails with `IllegalState` if one is already open
    /// on this directory handle.
    pub fn begin(directory: &'a Directory<S>) -> DirectoryResult<Self> {
        if directory.transaction_open.get() {
            return Err(DirectoryError::IllegalState(
                "transaction already open; transactions do not nest".to_string(),
            ));
        }
        directory.store().transaction_begin()?;
        directory.transaction_open.set(true);
        Ok(Self {
            directory,
            state: TransactionState::Open,
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Commits. If the commit itself fails the transaction is cancelled
    /// before the error is returned.
    pub fn commit(mut self) -> DirectoryResult<()> {
        match self.directory.store().transaction_commit() {
            Ok(()) => {
                self.finish(TransactionState::Committed);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "transaction commit failed, cancelling");
                self.cancel_quietly();
                Err(err.into())
            }
        }
    }

    /// Cancels, discarding every write made since `begin`.
    pub fn cancel(mut self) -> DirectoryResult<()> {
        let result = self.directory.store().transaction_cancel();
        self.finish(TransactionState::Cancelled);
        result.map_err(Into::into)
    }

    fn cancel_quietly(&mut self) {
        if let Err(err) = self.directory.store().transaction_cancel() {
            warn!(error = %err, "transaction cancel failed");
        }
        self.finish(TransactionState::Cancelled);
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.directory.transaction_open.set(false);
    }
}

impl<S: DirectoryStore> Drop for TransactionGuard<'_, S> {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            debug!("transaction guard dropped while open");
            self.cancel_quietly();
        }
    }
}

/// Deletes `target` on drop unless disarmed.
///
/// The delete is best effort; its failure is logged and never replaces the
/// error that caused the cleanup.
#[must_use = "dropping the guard deletes the target"]
pub struct CleanupOnError<'a, S: DirectoryStore> {
    directory: &'a Directory<S>,
    target: ExtendedDn,
    armed: bool,
}

impl<'a, S: DirectoryStore> CleanupOnError<'a, S> {
    pub fn arm(directory: &'a Directory<S>, target: ExtendedDn) -> Self {
        Self {
            directory,
            target,
            armed: true,
        }
    }

    /// Keeps the target.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl<S: DirectoryStore> Drop for CleanupOnError<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.directory.store().delete(&self.target) {
            Ok(()) => debug!(target = %self.target, "removed partially created object"),
            Err(StoreError::NoSuchObject(_)) => {
                debug!(target = %self.target, "nothing to clean up");
            }
            Err(err) => {
                warn!(target = %self.target, error = %err, "compensating delete failed");
            }
        }
    }
}

impl<S: DirectoryStore> Directory<S> {
    /// Runs `body` in a transaction: committed once if it succeeds, cancelled
    /// once if it fails. The body's error is returned unchanged.
    pub fn with_transaction<T>(
        &self,
        body: impl FnOnce(&Self) -> DirectoryResult<T>,
    ) -> DirectoryResult<T> {
        let guard = TransactionGuard::begin(self)?;
        match body(self) {
            Ok(value) => {
                guard.commit()?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "cancelling transaction");
                if let Err(cancel_err) = guard.cancel() {
                    warn!(error = %cancel_err, "transaction cancel failed");
                }
                Err(err)
            }
        }
    }

    /// Runs `body`, which follows the creation of `target`. If it fails the
    /// target is deleted (best effort) before the error propagates.
    ///
    /// Call inside [`Directory::with_transaction`]; on a store without
    /// transactions the delete is the only thing that removes the object.
    pub fn with_compensating_cleanup<T>(
        &self,
        target: &ExtendedDn,
        body: impl FnOnce(&Self) -> DirectoryResult<T>,
    ) -> DirectoryResult<T> {
        let cleanup = CleanupOnError::arm(self, target.clone());
        let value = body(self)?;
        cleanup.disarm();
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectoryConfig;
    use crate::filter::Filter;
    use crate::store::{Entry, MemoryStore, Scope};
    use dirsam_id::{Dn, Sid};

    fn directory(store: MemoryStore) -> Directory<MemoryStore> {
        let config = DirectoryConfig::new(
            Dn::parse("DC=example,DC=com").unwrap(),
            Sid::parse("S-1-5-21-1-2-3").unwrap(),
        );
        Directory::new(store, config).unwrap()
    }

    fn count(dir: &Directory<MemoryStore>) -> usize {
        dir.store()
            .search(&ExtendedDn::default(), Scope::Subtree, &Filter::everything(), &[])
            .unwrap()
            .len()
    }

    fn bob() -> Entry {
        Entry::new(Dn::parse("CN=bob,DC=example,DC=com").unwrap())
    }

    #[test]
    fn test_commit_on_success() {
        let dir = directory(MemoryStore::new());
        let value = dir
            .with_transaction(|d| {
                d.store().add(bob())?;
                Ok(7)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(count(&dir), 1);
        assert!(!dir.transaction_open.get());
    }

    #[test]
    fn test_cancel_on_error_keeps_original_error() {
        let dir = directory(MemoryStore::new());
        let err = dir
            .with_transaction(|d| -> DirectoryResult<()> {
                d.store().add(bob())?;
                Err(DirectoryError::NotFound("root cause".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(ref m) if m == "root cause"));
        assert_eq!(count(&dir), 0);
    }

    #[test]
    fn test_nested_transaction_is_illegal() {
        let dir = directory(MemoryStore::new());
        let err = dir
            .with_transaction(|d| d.with_transaction(|_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, DirectoryError::IllegalState(_)));
        // The outer transaction was cancelled and the handle is reusable.
        dir.with_transaction(|_| Ok(())).unwrap();
    }

    #[test]
    fn test_guard_drop_cancels() {
        let dir = directory(MemoryStore::new());
        {
            let guard = TransactionGuard::begin(&dir).unwrap();
            assert_eq!(guard.state(), TransactionState::Open);
            dir.store().add(bob()).unwrap();
        }
        assert_eq!(count(&dir), 0);
        assert!(!dir.transaction_open.get());
    }

    #[test]
    fn test_cleanup_without_transactions() {
        let dir = directory(MemoryStore::without_transactions());
        let entry = bob();
        let target = entry.guid_reference();
        let err = dir
            .with_transaction(|d| {
                d.store().add(entry)?;
                d.with_compensating_cleanup(&target, |_| -> DirectoryResult<()> {
                    Err(DirectoryError::InvalidArgument("password rejected".to_string()))
                })
            })
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidArgument(_)));
        assert_eq!(count(&dir), 0);
    }

    #[test]
    fn test_cleanup_disarmed_on_success() {
        let dir = directory(MemoryStore::without_transactions());
        let entry = bob();
        let target = entry.guid_reference();
        dir.store().add(entry).unwrap();
        dir.with_compensating_cleanup(&target, |_| Ok(())).unwrap();
        assert_eq!(count(&dir), 1);
    }
}

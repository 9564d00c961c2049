//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use dirsam_directory::{
    Directory, DirectoryConfig, DirectoryStore, Entry, Filter, Modification,
    NewGroup, NewUser, Scope, StoreError,
};
use dirsam_directory::store::StoreResult;
use dirsam_id::{Dn, ExtendedDn, Sid};

pub const DOMAIN_DN: &str = "DC=example,DC=com";
pub const DOMAIN_SID: &str = "S-1-5-21-1004336348-1177238915-682003330";
pub const PASSWORD: &str = "Correct-Horse-9";

pub fn config() -> DirectoryConfig {
    DirectoryConfig::new(Dn::parse(DOMAIN_DN).unwrap(), Sid::parse(DOMAIN_SID).unwrap())
}

/// A directory over `store` with the domain skeleton in place.
pub fn provisioned<S: DirectoryStore>(store: S, config: DirectoryConfig) -> Directory<S> {
    let dir = Directory::new(store, config).unwrap();
    dir.provision().unwrap();
    dir
}

pub fn user(name: &str) -> NewUser {
    NewUser {
        username: name.to_string(),
        password: Some(PASSWORD.to_string()),
        ..Default::default()
    }
}

pub fn group(name: &str) -> NewGroup {
    NewGroup {
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn account(name: &str) -> Filter {
    Filter::equals("sAMAccountName", name)
}

/// Every object whose `sAMAccountName` is `name`.
pub fn find_accounts<S: DirectoryStore>(dir: &Directory<S>, name: &str) -> Vec<Entry> {
    dir.search(&dir.domain_base(), Scope::Subtree, &account(name), &["*"])
        .unwrap()
}

pub fn read<S: DirectoryStore>(dir: &Directory<S>, reference: &ExtendedDn) -> Entry {
    dir.read(reference).unwrap()
}

pub fn sid_of(reference: &ExtendedDn) -> String {
    reference.sid().unwrap().to_string()
}

/// Wraps a store and rejects any modify touching one attribute, the way a
/// server rejects a password that fails its policy.
pub struct RejectingStore<S> {
    pub inner: S,
    pub rejected_attribute: &'static str,
}

impl<S: DirectoryStore> DirectoryStore for RejectingStore<S> {
    fn search(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
    ) -> StoreResult<Vec<Entry>> {
        self.inner.search(base, scope, filter, attributes)
    }

    fn add(&self, entry: Entry) -> StoreResult<()> {
        self.inner.add(entry)
    }

    fn modify(&self, modification: &Modification) -> StoreResult<()> {
        if modification
            .changes
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(self.rejected_attribute))
        {
            return Err(StoreError::ConstraintViolation(format!(
                "{} rejected by policy",
                self.rejected_attribute
            )));
        }
        self.inner.modify(modification)
    }

    fn delete(&self, target: &ExtendedDn) -> StoreResult<()> {
        self.inner.delete(target)
    }

    fn transaction_begin(&self) -> StoreResult<()> {
        self.inner.transaction_begin()
    }

    fn transaction_commit(&self) -> StoreResult<()> {
        self.inner.transaction_commit()
    }

    fn transaction_cancel(&self) -> StoreResult<()> {
        self.inner.transaction_cancel()
    }
}

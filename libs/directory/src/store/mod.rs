//! Directory store boundary.
//!
//! The directory core reaches storage only through [`DirectoryStore`]:
//! search, add, modify and delete plus explicit transaction control. Two
//! backends are provided: [`MemoryStore`] and [`SqliteStore`].
//!
//! # Attribute semantics
//!
//! - `Replace` with no values deletes the attribute
//! - `Delete` with no values removes the whole attribute; deleting a value
//!   that is not present fails with [`StoreError::NoSuchAttribute`]
//! - `Add` of a value already present fails with
//!   [`StoreError::AttributeOrValueExists`]
//! - DN-valued attributes such as `member` are resolved to their target and
//!   stored in extended form, so they keep pointing at the same object after
//!   a rename. Deleting an object strips it from every such attribute.

pub mod entry;
pub mod error;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use dirsam_id::{Dn, ExtendedDn, ObjectGuid, Sid};

use crate::filter::Filter;

pub use entry::Entry;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Attributes whose values name other objects.
pub const DN_VALUED_ATTRIBUTES: &[&str] = &["member", "managedBy"];

/// True when `name` holds references to other objects.
#[must_use]
pub fn is_dn_valued(name: &str) -> bool {
    DN_VALUED_ATTRIBUTES
        .iter()
        .any(|attr| attr.eq_ignore_ascii_case(name))
}

/// How far below the base a search reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The base object only.
    Base,
    /// Direct children of the base.
    OneLevel,
    /// The base and everything beneath it.
    Subtree,
}

impl Scope {
    /// True when an entry at `dn` is visible from `base`.
    #[must_use]
    pub fn contains(self, base: &Dn, dn: &Dn) -> bool {
        match self {
            Self::Base => dn == base,
            Self::OneLevel => dn.parent().is_some_and(|parent| &parent == base),
            Self::Subtree => dn.is_child_of(base),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Replace,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeChange {
    pub op: ModOp,
    pub name: String,
    pub values: Vec<String>,
}

/// A set of attribute changes applied atomically to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub target: ExtendedDn,
    pub changes: Vec<AttributeChange>,
}

impl Modification {
    #[must_use]
    pub fn new(target: impl Into<ExtendedDn>) -> Self {
        Self {
            target: target.into(),
            changes: Vec::new(),
        }
    }

    #[must_use]
    pub fn add<I, V>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.push(ModOp::Add, name, values)
    }

    #[must_use]
    pub fn replace<I, V>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.push(ModOp::Replace, name, values)
    }

    #[must_use]
    pub fn delete<I, V>(self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.push(ModOp::Delete, name, values)
    }

    fn push<I, V>(mut self, op: ModOp, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.changes.push(AttributeChange {
            op,
            name: name.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// A transactional directory store.
///
/// Implementations must make every write between `transaction_begin` and
/// `transaction_commit` visible atomically, and discard all of them on
/// `transaction_cancel`.
pub trait DirectoryStore {
    /// Returns the entries under `base` within `scope` that match `filter`,
    /// projected onto `attributes` (empty for identity only, `*` for all).
    ///
    /// A `<GUID=..>` or `<SID=..>` base resolves to exactly one object; a
    /// base that names nothing fails with [`StoreError::NoSuchObject`]. An
    /// empty base DN searches the whole tree.
    fn search(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
    ) -> StoreResult<Vec<Entry>>;

    fn add(&self, entry: Entry) -> StoreResult<()>;

    fn modify(&self, modification: &Modification) -> StoreResult<()>;

    fn delete(&self, target: &ExtendedDn) -> StoreResult<()>;

    fn transaction_begin(&self) -> StoreResult<()>;

    fn transaction_commit(&self) -> StoreResult<()>;

    fn transaction_cancel(&self) -> StoreResult<()>;
}

impl<T: DirectoryStore + ?Sized> DirectoryStore for Arc<T> {
    fn search(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
    ) -> StoreResult<Vec<Entry>> {
        (**self).search(base, scope, filter, attributes)
    }

    fn add(&self, entry: Entry) -> StoreResult<()> {
        (**self).add(entry)
    }

    fn modify(&self, modification: &Modification) -> StoreResult<()> {
        (**self).modify(modification)
    }

    fn delete(&self, target: &ExtendedDn) -> StoreResult<()> {
        (**self).delete(target)
    }

    fn transaction_begin(&self) -> StoreResult<()> {
        (**self).transaction_begin()
    }

    fn transaction_commit(&self) -> StoreResult<()> {
        (**self).transaction_commit()
    }

    fn transaction_cancel(&self) -> StoreResult<()> {
        (**self).transaction_cancel()
    }
}

impl<T: DirectoryStore + ?Sized> DirectoryStore for Box<T> {
    fn search(
        &self,
        base: &ExtendedDn,
        scope: Scope,
        filter: &Filter,
        attributes: &[&str],
    ) -> StoreResult<Vec<Entry>> {
        (**self).search(base, scope, filter, attributes)
    }

    fn add(&self, entry: Entry) -> StoreResult<()> {
        (**self).add(entry)
    }

    fn modify(&self, modification: &Modification) -> StoreResult<()> {
        (**self).modify(modification)
    }

    fn delete(&self, target: &ExtendedDn) -> StoreResult<()> {
        (**self).delete(target)
    }

    fn transaction_begin(&self) -> StoreResult<()> {
        (**self).transaction_begin()
    }

    fn transaction_commit(&self) -> StoreResult<()> {
        (**self).transaction_commit()
    }

    fn transaction_cancel(&self) -> StoreResult<()> {
        (**self).transaction_cancel()
    }
}

/// Point lookups a backend provides to the shared write logic below.
pub(crate) trait EntryLookup {
    fn by_guid(&self, guid: &ObjectGuid) -> StoreResult<Option<Entry>>;
    fn by_sid(&self, sid: &Sid) -> StoreResult<Option<Entry>>;
    fn by_dn(&self, dn: &Dn) -> StoreResult<Option<Entry>>;
}

/// Finds the object an extended reference names. The GUID wins over the SID,
/// which wins over the path.
pub(crate) fn lookup_reference<L: EntryLookup + ?Sized>(
    lookup: &L,
    reference: &ExtendedDn,
) -> StoreResult<Option<Entry>> {
    if let Some(guid) = reference.guid() {
        return lookup.by_guid(guid);
    }
    if let Some(sid) = reference.sid() {
        return lookup.by_sid(sid);
    }
    if reference.dn().is_root() {
        return Ok(None);
    }
    lookup.by_dn(reference.dn())
}

/// Resolves a DN-valued attribute value to its target's extended form.
fn canonical_reference<L: EntryLookup + ?Sized>(lookup: &L, value: &str) -> StoreResult<String> {
    let reference = ExtendedDn::parse(value)?;
    lookup_reference(lookup, &reference)?
        .map(|target| target.extended_dn().to_string())
        .ok_or_else(|| StoreError::NoSuchObject(value.to_string()))
}

fn canonical_values<L: EntryLookup + ?Sized>(
    lookup: &L,
    name: &str,
    values: &[String],
) -> StoreResult<Vec<String>> {
    if !is_dn_valued(name) {
        return Ok(values.to_vec());
    }
    values
        .iter()
        .map(|value| canonical_reference(lookup, value))
        .collect()
}

/// Position of `value` among `stored`, comparing references by identity for
/// DN-valued attributes.
fn position_of(name: &str, stored: &[String], value: &str) -> Option<usize> {
    if is_dn_valued(name) {
        let candidate = ExtendedDn::parse(value).ok()?;
        let hit = dirsam_reconcile::find_member(stored, &candidate)?;
        return stored.iter().position(|s| s == hit);
    }
    stored.iter().position(|s| s == value)
}

/// Checks a new entry against existing objects and canonicalizes its
/// DN-valued attributes.
pub(crate) fn prepare_add<L: EntryLookup + ?Sized>(lookup: &L, mut entry: Entry) -> StoreResult<Entry> {
    if entry.dn().is_root() {
        return Err(StoreError::ConstraintViolation(
            "cannot add an entry with an empty DN".to_string(),
        ));
    }
    if lookup.by_dn(entry.dn())?.is_some() || lookup.by_guid(&entry.guid())?.is_some() {
        return Err(StoreError::EntryAlreadyExists(entry.dn().to_string()));
    }
    if let Some(sid) = entry.sid() {
        if lookup.by_sid(sid)?.is_some() {
            return Err(StoreError::EntryAlreadyExists(format!("{} ({sid})", entry.dn())));
        }
    }

    let mut canonical = Vec::new();
    for (name, values) in entry.attributes() {
        if is_dn_valued(name) {
            canonical.push((name.to_string(), canonical_values(lookup, name, values)?));
        }
    }
    for (name, values) in canonical {
        entry.set(&name, values);
    }
    Ok(entry)
}

/// Applies `changes` to `entry` in order. On error the entry is left
/// partially modified; callers apply to a copy.
pub(crate) fn apply_changes<L: EntryLookup + ?Sized>(
    lookup: &L,
    entry: &mut Entry,
    changes: &[AttributeChange],
) -> StoreResult<()> {
    let target = entry.dn().to_string();
    for change in changes {
        if entry::is_identity_attr(&change.name) {
            return Err(StoreError::ConstraintViolation(format!(
                "{} cannot be modified on {target}",
                change.name
            )));
        }

        match change.op {
            ModOp::Replace => {
                let values = canonical_values(lookup, &change.name, &change.values)?;
                entry.set(&change.name, values);
            }
            ModOp::Add => {
                let values = canonical_values(lookup, &change.name, &change.values)?;
                let mut stored = entry.get(&change.name).map(<[String]>::to_vec).unwrap_or_default();
                for value in values {
                    if position_of(&change.name, &stored, &value).is_some() {
                        return Err(StoreError::AttributeOrValueExists {
                            target,
                            attribute: change.name.clone(),
                        });
                    }
                    stored.push(value);
                }
                entry.set(&change.name, stored);
            }
            ModOp::Delete => {
                let Some(current) = entry.get(&change.name) else {
                    return Err(StoreError::NoSuchAttribute {
                        target,
                        attribute: change.name.clone(),
                    });
                };
                if change.values.is_empty() {
                    entry.remove(&change.name);
                    continue;
                }
                let mut stored = current.to_vec();
                for value in &change.values {
                    // A target that no longer resolves is still matched by
                    // the identifiers embedded in the value.
                    let value = if is_dn_valued(&change.name) {
                        canonical_reference(lookup, value).unwrap_or_else(|_| value.clone())
                    } else {
                        value.clone()
                    };
                    let Some(index) = position_of(&change.name, &stored, &value) else {
                        return Err(StoreError::NoSuchAttribute {
                            target,
                            attribute: change.name.clone(),
                        });
                    };
                    stored.remove(index);
                }
                entry.set(&change.name, stored);
            }
        }
    }
    Ok(())
}

/// Removes references to `guid` from the entry's DN-valued attributes.
/// Returns true when anything was removed.
pub(crate) fn strip_references(entry: &mut Entry, guid: &ObjectGuid) -> bool {
    let mut changed = false;
    for name in DN_VALUED_ATTRIBUTES {
        let Some(values) = entry.get(name) else {
            continue;
        };
        let kept: Vec<String> = values
            .iter()
            .filter(|value| {
                ExtendedDn::parse(value)
                    .ok()
                    .and_then(|reference| reference.guid().copied())
                    .map_or(true, |g| g != *guid)
            })
            .cloned()
            .collect();
        if kept.len() != values.len() {
            entry.set(name, kept);
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Fixed(Vec<Entry>);

    impl EntryLookup for Fixed {
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

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn alice() -> Entry {
        Entry::new(dn("CN=alice,CN=Users,DC=example,DC=com")).with_sid(Some(
            Sid::parse("S-1-5-21-1-2-3-1105").unwrap(),
        ))
    }

    #[test]
    fn test_scope() {
        let base = dn("CN=Users,DC=example,DC=com");
        let child = dn("CN=alice,CN=Users,DC=example,DC=com");
        let grandchild = dn("CN=x,CN=alice,CN=Users,DC=example,DC=com");
        assert!(Scope::Base.contains(&base, &base));
        assert!(!Scope::Base.contains(&base, &child));
        assert!(Scope::OneLevel.contains(&base, &child));
        assert!(!Scope::OneLevel.contains(&base, &grandchild));
        assert!(Scope::Subtree.contains(&base, &grandchild));
        assert!(Scope::Subtree.contains(&Dn::root(), &child));
    }

    #[test]
    fn test_replace_empty_deletes() {
        let lookup = Fixed::default();
        let mut entry = alice().with_attribute("description", ["x"]);
        let changes = Modification::new(entry.dn().clone())
            .replace("description", Vec::<String>::new())
            .changes;
        apply_changes(&lookup, &mut entry, &changes).unwrap();
        assert!(!entry.has("description"));
    }

    #[test]
    fn test_add_existing_value_fails() {
        let lookup = Fixed::default();
        let mut entry = alice().with_attribute("mail", ["a@example.com"]);
        let changes = Modification::new(entry.dn().clone())
            .add("mail", ["a@example.com"])
            .changes;
        let err = apply_changes(&lookup, &mut entry, &changes).unwrap_err();
        assert!(matches!(err, StoreError::AttributeOrValueExists { .. }));
    }

    #[test]
    fn test_delete_absent_value_fails() {
        let lookup = Fixed::default();
        let mut entry = alice();
        let changes = Modification::new(entry.dn().clone())
            .delete("mail", ["a@example.com"])
            .changes;
        let err = apply_changes(&lookup, &mut entry, &changes).unwrap_err();
        assert!(matches!(err, StoreError::NoSuchAttribute { .. }));
    }

    #[test]
    fn test_identity_attributes_are_protected() {
        let lookup = Fixed::default();
        let mut entry = alice();
        let changes = Modification::new(entry.dn().clone())
            .replace("objectSid", ["S-1-5-21-1-2-3-9999"])
            .changes;
        let err = apply_changes(&lookup, &mut entry, &changes).unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_member_values_are_canonical() {
        let target = alice();
        let lookup = Fixed(vec![target.clone()]);
        let mut group = Entry::new(dn("CN=staff,CN=Users,DC=example,DC=com"));

        let add = Modification::new(group.dn().clone())
            .add("member", ["cn=ALICE,cn=users,dc=example,dc=com"])
            .changes;
        apply_changes(&lookup, &mut group, &add).unwrap();
        assert_eq!(
            group.get("member").unwrap(),
            &[target.extended_dn().to_string()]
        );

        // Same object named by SID is already present.
        let again = Modification::new(group.dn().clone())
            .add("member", ["<SID=S-1-5-21-1-2-3-1105>"])
            .changes;
        assert!(apply_changes(&lookup, &mut group, &again).is_err());

        let remove = Modification::new(group.dn().clone())
            .delete("member", [format!("<GUID={}>", target.guid())])
            .changes;
        apply_changes(&lookup, &mut group, &remove).unwrap();
        assert!(!group.has("member"));
    }

    #[test]
    fn test_member_must_exist() {
        let lookup = Fixed::default();
        let mut group = Entry::new(dn("CN=staff,CN=Users,DC=example,DC=com"));
        let add = Modification::new(group.dn().clone())
            .add("member", ["CN=ghost,DC=example,DC=com"])
            .changes;
        let err = apply_changes(&lookup, &mut group, &add).unwrap_err();
        assert!(matches!(err, StoreError::NoSuchObject(_)));
    }

    #[test]
    fn test_strip_references() {
        let target = alice();
        let mut group = Entry::new(dn("CN=staff,DC=example,DC=com"))
            .with_attribute("member", [target.extended_dn().to_string()]);
        assert!(strip_references(&mut group, &target.guid()));
        assert!(!group.has("member"));
        assert!(!strip_references(&mut group, &target.guid()));
    }

    #[test]
    fn test_prepare_add_rejects_duplicates() {
        let existing = alice();
        let lookup = Fixed(vec![existing.clone()]);

        let same_dn = Entry::new(existing.dn().clone());
        assert!(matches!(
            prepare_add(&lookup, same_dn),
            Err(StoreError::EntryAlreadyExists(_))
        ));

        let same_sid = Entry::new(dn("CN=bob,DC=example,DC=com"))
            .with_sid(existing.sid().cloned());
        assert!(matches!(
            prepare_add(&lookup, same_sid),
            Err(StoreError::EntryAlreadyExists(_))
        ));
    }
}

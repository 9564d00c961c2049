//! Directory entries.

use std::collections::BTreeMap;

use dirsam_id::{Dn, ExtendedDn, ObjectGuid, Sid};

/// Attributes served from the entry's identity rather than its attribute map.
pub const DISTINGUISHED_NAME: &str = "distinguishedname";
pub const OBJECT_GUID: &str = "objectguid";
pub const OBJECT_SID: &str = "objectsid";

/// Normalizes an attribute name for lookup. Attribute names are
/// case-insensitive.
pub(crate) fn attr_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// True for attributes that are part of the entry's identity and cannot be
/// changed through a modify.
pub(crate) fn is_identity_attr(name: &str) -> bool {
    matches!(
        attr_key(name).as_str(),
        DISTINGUISHED_NAME | OBJECT_GUID | OBJECT_SID
    )
}

/// A directory object: a unique DN, an immutable GUID, an optional SID and a
/// multi-valued attribute map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    dn: Dn,
    guid: ObjectGuid,
    sid: Option<Sid>,
    attributes: BTreeMap<String, Vec<String>>,
}

impl Entry {
    /// Creates an entry with a freshly generated GUID.
    #[must_use]
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            guid: ObjectGuid::new(),
            sid: None,
            attributes: BTreeMap::new(),
        }
    }

    pub(crate) fn from_parts(
        dn: Dn,
        guid: ObjectGuid,
        sid: Option<Sid>,
        attributes: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            dn,
            guid,
            sid,
            attributes,
        }
    }

    #[must_use]
    pub fn with_guid(mut self, guid: ObjectGuid) -> Self {
        self.guid = guid;
        self
    }

    #[must_use]
    pub fn with_sid(mut self, sid: Option<Sid>) -> Self {
        self.sid = sid;
        self
    }

    /// Sets an attribute, replacing any existing values.
    #[must_use]
    pub fn with_attribute<I, V>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.set(name, values.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces an attribute's values. An empty list removes the attribute.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        if values.is_empty() {
            self.attributes.remove(&attr_key(name));
        } else {
            self.attributes.insert(attr_key(name), values);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.attributes.remove(&attr_key(name))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(&attr_key(name)).map(Vec::as_slice)
    }

    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.attributes.contains_key(&attr_key(name))
    }

    #[must_use]
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    #[must_use]
    pub fn guid(&self) -> ObjectGuid {
        self.guid
    }

    #[must_use]
    pub fn sid(&self) -> Option<&Sid> {
        self.sid.as_ref()
    }

    /// The fully extended form: `<GUID=..>;<SID=..>;dn`.
    #[must_use]
    pub fn extended_dn(&self) -> ExtendedDn {
        ExtendedDn::new(Some(self.guid), self.sid.clone(), self.dn.clone())
    }

    /// A GUID-only reference, stable across renames.
    #[must_use]
    pub fn guid_reference(&self) -> ExtendedDn {
        ExtendedDn::from_guid(self.guid)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub(crate) fn attributes_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.attributes
    }

    /// Values as seen by a search filter, including the identity attributes.
    pub(crate) fn filter_values(&self, name: &str) -> Vec<String> {
        match attr_key(name).as_str() {
            DISTINGUISHED_NAME => vec![self.dn.to_string()],
            OBJECT_GUID => vec![self.guid.to_string()],
            OBJECT_SID => self.sid.iter().map(ToString::to_string).collect(),
            key => self.attributes.get(key).cloned().unwrap_or_default(),
        }
    }

    /// Copy restricted to the requested attributes. An empty list keeps only
    /// the identity; `*` keeps everything.
    #[must_use]
    pub fn project(&self, attrs: &[&str]) -> Entry {
        if attrs.contains(&"*") {
            return self.clone();
        }
        let attributes = attrs
            .iter()
            .filter_map(|name| {
                let key = attr_key(name);
                self.attributes.get(&key).map(|v| (key, v.clone()))
            })
            .collect();
        Self {
            dn: self.dn.clone(),
            guid: self.guid,
            sid: self.sid.clone(),
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Entry {
        Entry::new(Dn::parse("CN=alice,CN=Users,DC=example,DC=com").unwrap())
            .with_attribute("sAMAccountName", ["alice"])
            .with_attribute("objectClass", ["top", "person", "user"])
    }

    #[test]
    fn test_attribute_names_are_case_insensitive() {
        let entry = alice();
        assert_eq!(entry.first("SAMACCOUNTNAME"), Some("alice"));
        assert!(entry.has("objectclass"));
    }

    #[test]
    fn test_set_empty_removes() {
        let mut entry = alice();
        entry.set("sAMAccountName", Vec::new());
        assert!(!entry.has("sAMAccountName"));
    }

    #[test]
    fn test_projection() {
        let entry = alice();
        let bare = entry.project(&[]);
        assert_eq!(bare.attributes().count(), 0);
        assert_eq!(bare.guid(), entry.guid());

        let some = entry.project(&["samaccountname", "missing"]);
        assert_eq!(some.attributes().count(), 1);
        assert_eq!(entry.project(&["*"]), entry);
    }

    #[test]
    fn test_identity_filter_values() {
        let entry = alice();
        assert_eq!(
            entry.filter_values("distinguishedName"),
            vec!["CN=alice,CN=Users,DC=example,DC=com".to_string()]
        );
        assert!(entry.filter_values("objectSid").is_empty());
        assert_eq!(entry.filter_values("objectGUID"), vec![entry.guid().to_string()]);
    }
}

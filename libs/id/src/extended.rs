//! Extended distinguished names.
//!
//! An extended DN prefixes the path with the object's stable identifiers:
//!
//! ```text
//! <GUID=9a1b6c2e-3f4d-4e5a-8b7c-1d2e3f405162>;<SID=S-1-5-21-1-2-3-1105>;CN=alice,CN=Users,DC=example,DC=com
//! ```
//!
//! Either component may be absent, and so may the path: `<SID=S-1-5-32-544>`
//! on its own is a valid reference that the directory resolves by SID.

use std::fmt;
use std::str::FromStr;

use crate::{Dn, IdError, ObjectGuid, Sid};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExtendedDn {
    guid: Option<ObjectGuid>,
    sid: Option<Sid>,
    dn: Dn,
}

impl ExtendedDn {
    #[must_use]
    pub fn new(guid: Option<ObjectGuid>, sid: Option<Sid>, dn: Dn) -> Self {
        Self { guid, sid, dn }
    }

    /// A plain path with no embedded identifiers.
    #[must_use]
    pub fn from_dn(dn: Dn) -> Self {
        Self {
            guid: None,
            sid: None,
            dn,
        }
    }

    /// `<SID=...>` with no path.
    #[must_use]
    pub fn from_sid(sid: Sid) -> Self {
        Self {
            guid: None,
            sid: Some(sid),
            dn: Dn::root(),
        }
    }

    /// `<GUID=...>` with no path.
    #[must_use]
    pub fn from_guid(guid: ObjectGuid) -> Self {
        Self {
            guid: Some(guid),
            sid: None,
            dn: Dn::root(),
        }
    }

    /// Parses the extended string form. Component values may use either the
    /// string or hex encoding.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.trim().is_empty() {
            return Err(IdError::Empty);
        }

        let mut guid = None;
        let mut sid = None;
        let mut rest = s;

        while let Some(after_open) = rest.strip_prefix('<') {
            let close = after_open
                .find('>')
                .ok_or_else(|| IdError::InvalidExtendedComponent(rest.to_string()))?;
            let component = &after_open[..close];
            let (name, value) = component
                .split_once('=')
                .ok_or_else(|| IdError::InvalidExtendedComponent(component.to_string()))?;

            if name.eq_ignore_ascii_case("GUID") {
                guid = Some(parse_guid_component(value)?);
            } else if name.eq_ignore_ascii_case("SID") {
                sid = Some(parse_sid_component(value)?);
            } else {
                return Err(IdError::InvalidExtendedComponent(component.to_string()));
            }

            rest = &after_open[close + 1..];
            rest = rest.strip_prefix(';').unwrap_or(rest);
        }

        let dn = if rest.trim().is_empty() {
            Dn::root()
        } else {
            Dn::parse(rest)?
        };

        Ok(Self { guid, sid, dn })
    }

    #[must_use]
    pub fn guid(&self) -> Option<&ObjectGuid> {
        self.guid.as_ref()
    }

    #[must_use]
    pub fn sid(&self) -> Option<&Sid> {
        self.sid.as_ref()
    }

    #[must_use]
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// True when a GUID or SID component is present.
    #[must_use]
    pub fn has_identifiers(&self) -> bool {
        self.guid.is_some() || self.sid.is_some()
    }

    /// Drops the embedded identifiers and returns the plain path.
    #[must_use]
    pub fn into_dn(self) -> Dn {
        self.dn
    }
}

impl fmt::Display for ExtendedDn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::with_capacity(3);
        if let Some(guid) = &self.guid {
            parts.push(format!("<GUID={guid}>"));
        }
        if let Some(sid) = &self.sid {
            parts.push(format!("<SID={sid}>"));
        }
        if !self.dn.is_root() {
            parts.push(self.dn.to_string());
        }
        f.write_str(&parts.join(";"))
    }
}

impl FromStr for ExtendedDn {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Dn> for ExtendedDn {
    fn from(dn: Dn) -> Self {
        Self::from_dn(dn)
    }
}

crate::impl_string_serde!(ExtendedDn);

fn parse_guid_component(value: &str) -> Result<ObjectGuid, IdError> {
    if crate::looks_like_guid(value) {
        ObjectGuid::parse(value)
    } else {
        ObjectGuid::from_hex(value)
    }
    .map_err(|_| IdError::InvalidExtendedComponent(format!("GUID={value}")))
}

fn parse_sid_component(value: &str) -> Result<Sid, IdError> {
    if value.starts_with("S-") || value.starts_with("s-") {
        Sid::parse(value)
    } else {
        Sid::from_hex(value)
    }
    .map_err(|_| IdError::InvalidExtendedComponent(format!("SID={value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "9a1b6c2e-3f4d-4e5a-8b7c-1d2e3f405162";
    const SID: &str = "S-1-5-21-1004336348-1177238915-682003330-1105";

    #[test]
    fn test_full_extended_form() {
        let input = format!("<GUID={GUID}>;<SID={SID}>;CN=alice,CN=Users,DC=example,DC=com");
        let ext = ExtendedDn::parse(&input).unwrap();
        assert_eq!(ext.guid().unwrap().to_string(), GUID);
        assert_eq!(ext.sid().unwrap().to_string(), SID);
        assert_eq!(ext.dn().rdn_value(), Some("alice"));
        assert_eq!(ext.to_string(), input);
    }

    #[test]
    fn test_sid_only() {
        let ext = ExtendedDn::parse(&format!("<SID={SID}>")).unwrap();
        assert!(ext.dn().is_root());
        assert!(ext.guid().is_none());
        assert_eq!(ext.to_string(), format!("<SID={SID}>"));
    }

    #[test]
    fn test_plain_dn() {
        let ext = ExtendedDn::parse("CN=alice,DC=example").unwrap();
        assert!(!ext.has_identifiers());
        assert_eq!(ext.to_string(), "CN=alice,DC=example");
    }

    #[test]
    fn test_hex_components() {
        let ext = ExtendedDn::parse(
            "<GUID=2e6c1b9a4d3f5a4e8b7c1d2e3f405162>;<SID=01020000000000052000000020020000>;CN=x",
        )
        .unwrap();
        assert_eq!(ext.guid().unwrap().to_string(), GUID);
        assert_eq!(ext.sid().unwrap().to_string(), "S-1-5-32-544");
    }

    #[test]
    fn test_malformed_components() {
        assert!(ExtendedDn::parse("<SID=S-1-5-x>").is_err());
        assert!(ExtendedDn::parse("<GUID=nope>").is_err());
        assert!(ExtendedDn::parse("<RMD_FLAGS=1>;CN=x").is_err());
        assert!(ExtendedDn::parse("<SID=S-1-5-32").is_err());
    }
}

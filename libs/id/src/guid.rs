//! Object GUIDs.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::IdError;

/// The immutable 16-byte identifier every directory object receives at
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectGuid(Uuid);

impl ObjectGuid {
    /// Generates a fresh random GUID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }

    /// Parses the hyphenated textual form, with or without braces.
    ///
    /// Unlike a raw 16-byte conversion this never accepts a 16-character
    /// account name as a GUID.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if !looks_like_guid(s) {
            return Err(IdError::InvalidGuid(s.to_string()));
        }
        let inner = s.trim_start_matches('{').trim_end_matches('}');
        Uuid::parse_str(inner)
            .map(Self)
            .map_err(|_| IdError::InvalidGuid(s.to_string()))
    }

    /// Parses the 32-digit hex rendering used by hex-mode extended DNs.
    ///
    /// The first three fields are little-endian on the wire, matching the
    /// NDR encoding of a GUID.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = crate::sid::decode_hex(s)
            .filter(|b| b.len() == 16)
            .ok_or_else(|| IdError::InvalidGuid(s.to_string()))?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&bytes);
        Ok(Self(Uuid::from_bytes_le(raw)))
    }
}

impl Default for ObjectGuid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ObjectGuid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

crate::impl_string_serde!(ObjectGuid);

/// True when `s` has the textual shape of a GUID:
/// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`, optionally wrapped in braces.
#[must_use]
pub fn looks_like_guid(s: &str) -> bool {
    let inner = match s.len() {
        36 => s,
        38 if s.starts_with('{') && s.ends_with('}') => &s[1..37],
        _ => return false,
    };

    inner.bytes().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUID: &str = "9a1b6c2e-3f4d-4e5a-8b7c-1d2e3f405162";

    #[test]
    fn test_guid_shapes() {
        assert!(looks_like_guid(GUID));
        assert!(looks_like_guid(&format!("{{{GUID}}}")));
        assert!(looks_like_guid(&GUID.to_uppercase()));
        assert!(!looks_like_guid("abcdefghijklmnop"));
        assert!(!looks_like_guid("9a1b6c2e3f4d4e5a8b7c1d2e3f405162"));
        assert!(!looks_like_guid("9a1b6c2e-3f4d-4e5a-8b7c-1d2e3f40516g"));
    }

    #[test]
    fn test_sixteen_char_name_is_not_a_guid() {
        assert!(matches!(
            ObjectGuid::parse("sixteen-chr-name"),
            Err(IdError::InvalidGuid(_))
        ));
    }

    #[test]
    fn test_braced_parse() {
        let plain = ObjectGuid::parse(GUID).unwrap();
        let braced = ObjectGuid::parse(&format!("{{{GUID}}}")).unwrap();
        assert_eq!(plain, braced);
        assert_eq!(plain.to_string(), GUID);
    }

    #[test]
    fn test_hex_form_is_little_endian() {
        let guid = ObjectGuid::parse(GUID).unwrap();
        let hex = "2e6c1b9a4d3f5a4e8b7c1d2e3f405162";
        assert_eq!(ObjectGuid::from_hex(hex).unwrap(), guid);
    }

    #[test]
    fn test_guid_json() {
        let guid = ObjectGuid::parse(GUID).unwrap();
        let json = serde_json::to_string(&guid).unwrap();
        let parsed: ObjectGuid = serde_json::from_str(&json).unwrap();
        assert_eq!(guid, parsed);
    }
}

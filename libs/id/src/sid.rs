//! Security identifiers.
//!
//! A SID is a revision byte, a 48-bit identifier authority and up to fifteen
//! 32-bit sub-authorities. Domain principals share the domain's prefix and
//! differ only in the final sub-authority, the relative identifier (RID).

use std::fmt;
use std::str::FromStr;

use crate::IdError;

/// The only SID revision in use.
const SID_REVISION: u8 = 1;

/// Maximum number of sub-authorities a SID may carry.
pub const MAX_SUB_AUTHORITIES: usize = 15;

/// Largest value the 6-byte identifier authority can hold.
const MAX_AUTHORITY: u64 = (1 << 48) - 1;

/// A relative identifier: the last sub-authority of a principal's SID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid(u32);

impl Rid {
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Rid {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Rid> for u32 {
    fn from(rid: Rid) -> Self {
        rid.0
    }
}

/// A security identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Builds a revision-1 SID from its parts.
    pub fn new(authority: u64, sub_authorities: &[u32]) -> Result<Self, IdError> {
        if authority > MAX_AUTHORITY {
            return Err(IdError::sid(
                &format!("authority {authority}"),
                "identifier authority exceeds 48 bits",
            ));
        }
        if sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(IdError::sid(
                &format!("{} sub-authorities", sub_authorities.len()),
                "too many sub-authorities",
            ));
        }
        Ok(Self {
            revision: SID_REVISION,
            authority,
            sub_authorities: sub_authorities.to_vec(),
        })
    }

    /// Parses the textual form `S-1-<authority>-<sub>...`.
    ///
    /// The authority may be decimal or `0x`-prefixed hex. A lowercase `s-`
    /// prefix is accepted.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let rest = s
            .strip_prefix("S-")
            .or_else(|| s.strip_prefix("s-"))
            .ok_or_else(|| IdError::sid(s, "missing 'S-' prefix"))?;

        let mut parts = rest.split('-');

        let revision = parts
            .next()
            .filter(|p| is_decimal(p))
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| IdError::sid(s, "bad revision"))?;
        if revision != SID_REVISION {
            return Err(IdError::sid(s, "unsupported revision"));
        }

        let authority = parts
            .next()
            .and_then(parse_authority)
            .ok_or_else(|| IdError::sid(s, "bad identifier authority"))?;

        let mut sub_authorities = Vec::new();
        for part in parts {
            if !is_decimal(part) {
                return Err(IdError::sid(s, "bad sub-authority"));
            }
            let value = part
                .parse::<u32>()
                .map_err(|_| IdError::sid(s, "sub-authority out of range"))?;
            sub_authorities.push(value);
            if sub_authorities.len() > MAX_SUB_AUTHORITIES {
                return Err(IdError::sid(s, "too many sub-authorities"));
            }
        }

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Decodes the binary wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdError> {
        let hex_input = || hex_string(bytes);
        if bytes.len() < 8 {
            return Err(IdError::sid(&hex_input(), "binary SID too short"));
        }
        let revision = bytes[0];
        let count = usize::from(bytes[1]);
        if revision != SID_REVISION {
            return Err(IdError::sid(&hex_input(), "unsupported revision"));
        }
        if count > MAX_SUB_AUTHORITIES || bytes.len() != 8 + 4 * count {
            return Err(IdError::sid(&hex_input(), "binary SID length mismatch"));
        }

        let authority = bytes[2..8]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        let sub_authorities = bytes[8..]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Decodes a hex rendering of the binary form, as found in
    /// `<SID=...>` components written in hex mode.
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let bytes = decode_hex(s).ok_or_else(|| IdError::sid(s, "bad hex encoding"))?;
        Self::from_bytes(&bytes)
    }

    /// Encodes the binary wire form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 4 * self.sub_authorities.len());
        out.push(self.revision);
        // Bounded by MAX_SUB_AUTHORITIES at construction.
        out.push(self.sub_authorities.len() as u8);
        out.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            out.extend_from_slice(&sub.to_le_bytes());
        }
        out
    }

    #[must_use]
    pub fn authority(&self) -> u64 {
        self.authority
    }

    #[must_use]
    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// The final sub-authority, if any.
    #[must_use]
    pub fn rid(&self) -> Option<Rid> {
        self.sub_authorities.last().copied().map(Rid)
    }

    /// The SID with its final sub-authority removed.
    #[must_use]
    pub fn domain(&self) -> Option<Sid> {
        let (_, prefix) = self.sub_authorities.split_last()?;
        Some(Self {
            revision: self.revision,
            authority: self.authority,
            sub_authorities: prefix.to_vec(),
        })
    }

    /// Appends a RID to a domain SID.
    pub fn with_rid(&self, rid: Rid) -> Result<Sid, IdError> {
        if self.sub_authorities.len() >= MAX_SUB_AUTHORITIES {
            return Err(IdError::sid(&self.to_string(), "too many sub-authorities"));
        }
        let mut sub_authorities = self.sub_authorities.clone();
        sub_authorities.push(rid.value());
        Ok(Self {
            revision: self.revision,
            authority: self.authority,
            sub_authorities,
        })
    }

    /// True when this SID is `domain` plus exactly one RID.
    #[must_use]
    pub fn is_in_domain(&self, domain: &Sid) -> bool {
        self.domain().as_ref() == Some(domain)
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority > u64::from(u32::MAX) {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

crate::impl_string_serde!(Sid);

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_authority(s: &str) -> Option<u64> {
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(hex, 16).ok()?
    } else {
        if !is_decimal(s) {
            return None;
        }
        s.parse::<u64>().ok()?
    };
    (value <= MAX_AUTHORITY).then_some(value)
}

pub(crate) fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

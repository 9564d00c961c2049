//! Distinguished names.
//!
//! Parsing follows RFC 4514: RDNs are separated by unescaped commas, each RDN
//! is `attribute=value`, and values may escape special characters either with
//! a backslash or as `\XX` hex pairs. Multi-valued RDNs (`+`) are rejected.
//!
//! Comparison is case-insensitive on both attribute types and values, which
//! matches how the directory matches naming attributes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::IdError;

/// A single `attribute=value` component.
#[derive(Debug, Clone)]
pub struct Rdn {
    attr: String,
    value: String,
}

impl Rdn {
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Result<Self, IdError> {
        let attr = attr.into();
        let value = value.into();
        if !is_valid_attr(&attr) {
            return Err(IdError::dn(&attr, "invalid attribute type"));
        }
        Ok(Self { attr, value })
    }

    #[must_use]
    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// The unescaped value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn casefold(&self) -> String {
        format!(
            "{}={}",
            self.attr.to_ascii_uppercase(),
            escape_value(&self.value).to_uppercase()
        )
    }

    fn eq_ignore_case(&self, other: &Rdn) -> bool {
        self.attr.eq_ignore_ascii_case(&other.attr)
            && self.value.to_uppercase() == other.value.to_uppercase()
    }
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, escape_value(&self.value))
    }
}

/// A distinguished name, most specific RDN first.
#[derive(Debug, Clone, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty DN.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a string DN.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.trim().is_empty() {
            return Err(IdError::Empty);
        }

        let rdns = split_unescaped(s, b',')
            .ok_or_else(|| IdError::dn(s, "dangling escape"))?
            .into_iter()
            .map(|raw| parse_rdn(s, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rdns })
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    #[must_use]
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The value of the leading RDN, e.g. `alice` for `CN=alice,DC=example`.
    #[must_use]
    pub fn rdn_value(&self) -> Option<&str> {
        self.rdns.first().map(Rdn::value)
    }

    /// The DN with its leading RDN removed.
    #[must_use]
    pub fn parent(&self) -> Option<Dn> {
        let (_, rest) = self.rdns.split_first()?;
        Some(Self {
            rdns: rest.to_vec(),
        })
    }

    /// Builds `attr=value,<self>`.
    pub fn child(&self, attr: &str, value: &str) -> Result<Dn, IdError> {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(Rdn::new(attr, value)?);
        rdns.extend(self.rdns.iter().cloned());
        Ok(Self { rdns })
    }

    /// True when `self` equals `base` or lies beneath it.
    #[must_use]
    pub fn is_child_of(&self, base: &Dn) -> bool {
        if base.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - base.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(&base.rdns)
            .all(|(a, b)| a.eq_ignore_case(b))
    }

    /// Appends `base` below the current RDNs.
    pub fn add_base(&mut self, base: &Dn) {
        self.rdns.extend(base.rdns.iter().cloned());
    }

    /// True when the last RDN is a `DC=` component, i.e. the DN names its
    /// naming context itself.
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.rdns
            .last()
            .is_some_and(|rdn| rdn.attr.eq_ignore_ascii_case("DC"))
    }

    /// Returns `self` qualified under `base`. Absolute DNs are returned
    /// unchanged, including those outside `base`.
    #[must_use]
    pub fn qualified_under(&self, base: &Dn) -> Dn {
        if self.is_absolute() || self.is_child_of(base) {
            return self.clone();
        }
        let mut full = self.clone();
        full.add_base(base);
        full
    }

    /// Case-folded canonical string used for equality and indexing.
    #[must_use]
    pub fn casefold(&self) -> String {
        self.rdns
            .iter()
            .map(Rdn::casefold)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns.len() == other.rdns.len()
            && self
                .rdns
                .iter()
                .zip(&other.rdns)
                .all(|(a, b)| a.eq_ignore_case(b))
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.casefold().hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{rdn}")?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

crate::impl_string_serde!(Dn);

fn is_valid_attr(attr: &str) -> bool {
    let mut bytes = attr.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() => bytes.all(|b| b.is_ascii_alphanumeric() || b == b'-'),
        Some(b) if b.is_ascii_digit() => attr.bytes().all(|b| b.is_ascii_digit() || b == b'.'),
        _ => false,
    }
}

/// Splits on `sep` where it is not preceded by an escape.
///
/// Returns `None` for a trailing backslash.
pub(crate) fn split_unescaped(s: &str, sep: u8) -> Option<Vec<&str>> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if i + 1 >= bytes.len() {
                    return None;
                }
                i += 2;
                continue;
            }
            b if b == sep => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&s[start..]);
    Some(parts)
}

fn parse_rdn(input: &str, raw: &str) -> Result<Rdn, IdError> {
    let Some(eq) = find_unescaped(raw, b'=') else {
        return Err(IdError::dn(input, "RDN without '='"));
    };
    if find_unescaped(raw, b'+').is_some() {
        return Err(IdError::dn(input, "multi-valued RDNs are not supported"));
    }

    let attr = raw[..eq].trim();
    if !is_valid_attr(attr) {
        return Err(IdError::dn(input, "invalid attribute type"));
    }

    let value = unescape_value(trim_unescaped(&raw[eq + 1..]))
        .ok_or_else(|| IdError::dn(input, "invalid escape sequence"))?;
    if value.is_empty() {
        return Err(IdError::dn(input, "empty RDN value"));
    }

    Ok(Rdn {
        attr: attr.to_string(),
        value,
    })
}

fn find_unescaped(s: &str, needle: u8) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == needle => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Trims leading spaces and any trailing spaces that are not escaped.
fn trim_unescaped(s: &str) -> &str {
    let s = s.trim_start_matches(' ');
    let bytes = s.as_bytes();
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == b' ' {
        let backslashes = bytes[..end - 1]
            .iter()
            .rev()
            .take_while(|b| **b == b'\\')
            .count();
        if backslashes % 2 == 1 {
            break;
        }
        end -= 1;
    }
    &s[..end]
}

fn unescape_value(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let next = *bytes.get(i + 1)?;
        let hex_pair = bytes
            .get(i + 1..i + 3)
            .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit));
        if let Some(pair) = hex_pair {
            let pair = std::str::from_utf8(pair).ok()?;
            out.push(u8::from_str_radix(pair, 16).ok()?);
            i += 3;
        } else {
            out.push(next);
            i += 2;
        }
    }
    String::from_utf8(out).ok()
}

/// Escapes an RDN value for display (RFC 4514 section 2.4).
pub(crate) fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let last = value.chars().count().saturating_sub(1);
    for (i, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            '\0' => out.push_str("\\00"),
            ' ' if i == 0 || i == last => out.push_str("\\20"),
            '#' if i == 0 => out.push_str("\\23"),
            _ => out.push(ch),
        }
    }
    out
}

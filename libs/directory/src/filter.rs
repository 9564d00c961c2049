//! Search filters.
//!
//! Filters are built as values and evaluated against entries in process.
//! Their `Display` form is the RFC 4515 string, used in logs and errors.

use std::fmt;

use dirsam_id::{Dn, ObjectGuid, Sid};

use crate::store::entry::{attr_key, DISTINGUISHED_NAME, OBJECT_GUID, OBJECT_SID};
use crate::store::Entry;

/// Matching rule OID for a bitwise AND comparison.
pub const MATCHING_RULE_BIT_AND: &str = "1.2.840.113556.1.4.803";

const OBJECT_CATEGORY: &str = "objectcategory";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality { attribute: String, value: String },
    Present(String),
    /// True when every bit of `mask` is set in the attribute's integer value.
    BitAnd { attribute: String, mask: u32 },
}

impl Filter {
    /// Matches every entry. Renders as `(&)`.
    #[must_use]
    pub fn everything() -> Self {
        Self::And(Vec::new())
    }

    #[must_use]
    pub fn equals(attribute: &str, value: impl Into<String>) -> Self {
        Self::Equality {
            attribute: attribute.to_string(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn present(attribute: &str) -> Self {
        Self::Present(attribute.to_string())
    }

    #[must_use]
    pub fn bit_and(attribute: &str, mask: u32) -> Self {
        Self::BitAnd {
            attribute: attribute.to_string(),
            mask,
        }
    }

    #[must_use]
    pub fn negate(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// `objectCategory=<name>`, matched against the category's leading RDN.
    #[must_use]
    pub fn category(name: &str) -> Self {
        Self::equals("objectCategory", name)
    }

    /// Evaluates the filter against an entry.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
            Self::Not(filter) => !filter.matches(entry),
            Self::Present(attribute) => !entry.filter_values(attribute).is_empty(),
            Self::Equality { attribute, value } => entry
                .filter_values(attribute)
                .iter()
                .any(|stored| value_equals(attribute, stored, value)),
            Self::BitAnd { attribute, mask } => {
                entry.filter_values(attribute).iter().any(|stored| {
                    parse_flags(stored).is_some_and(|flags| flags & mask == *mask)
                })
            }
        }
    }
}

/// Parses an integer attribute the way the directory stores it: a signed
/// 32-bit decimal, or an unsigned one.
pub(crate) fn parse_flags(value: &str) -> Option<u32> {
    let value = value.trim();
    value
        .parse::<i32>()
        .map(|v| v as u32)
        .or_else(|_| value.parse::<u32>())
        .ok()
}

fn value_equals(attribute: &str, stored: &str, wanted: &str) -> bool {
    match attr_key(attribute).as_str() {
        OBJECT_SID => match (Sid::parse(stored), Sid::parse(wanted)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        OBJECT_GUID => match (ObjectGuid::parse(stored), ObjectGuid::parse(wanted)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        DISTINGUISHED_NAME => match (Dn::parse(stored), Dn::parse(wanted)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        },
        OBJECT_CATEGORY => {
            if stored.eq_ignore_ascii_case(wanted) {
                return true;
            }
            // A short category name matches the stored category DN's leading RDN.
            Dn::parse(stored)
                .ok()
                .and_then(|dn| dn.rdn_value().map(|v| v.eq_ignore_ascii_case(wanted)))
                .unwrap_or(false)
        }
        _ => stored.eq_ignore_ascii_case(wanted),
    }
}

/// Escapes a filter assertion value (RFC 4515).
#[must_use]
pub fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Equality { attribute, value } => {
                write!(f, "({attribute}={})", escape_filter_value(value))
            }
            Self::Present(attribute) => write!(f, "({attribute}=*)"),
            Self::BitAnd { attribute, mask } => {
                write!(f, "({attribute}:{MATCHING_RULE_BIT_AND}:={mask})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Entry {
        Entry::new(Dn::parse("CN=staff,CN=Users,DC=example,DC=com").unwrap())
            .with_sid(Some(
                Sid::parse("S-1-5-21-1004336348-1177238915-682003330-1200").unwrap(),
            ))
            .with_attribute("sAMAccountName", ["Staff"])
            .with_attribute(
                "objectCategory",
                ["CN=Group,CN=Schema,CN=Configuration,DC=example,DC=com"],
            )
            .with_attribute("groupType", ["-2147483646"])
    }

    #[test]
    fn test_equality_is_case_insensitive() {
        assert!(Filter::equals("samaccountname", "staff").matches(&group()));
        assert!(!Filter::equals("sAMAccountName", "other").matches(&group()));
    }

    #[test]
    fn test_category_short_name() {
        assert!(Filter::category("group").matches(&group()));
        assert!(!Filter::category("person").matches(&group()));
        assert!(Filter::category("CN=Group,CN=Schema,CN=Configuration,DC=example,DC=com")
            .matches(&group()));
    }

    #[test]
    fn test_bit_and_on_signed_value() {
        assert!(Filter::bit_and("groupType", 0x8000_0000).matches(&group()));
        assert!(Filter::bit_and("groupType", 0x2).matches(&group()));
        assert!(!Filter::bit_and("groupType", 0x4).matches(&group()));
    }

    #[test]
    fn test_identity_attributes() {
        let entry = group();
        assert!(Filter::equals(
            "objectSid",
            "s-1-5-21-1004336348-1177238915-682003330-1200"
        )
        .matches(&entry));
        assert!(Filter::equals("distinguishedName", "cn=STAFF,cn=users,dc=example,dc=com")
            .matches(&entry));
        assert!(Filter::present("objectGUID").matches(&entry));
    }

    #[test]
    fn test_boolean_combinators() {
        let entry = group();
        let filter = Filter::And(vec![
            Filter::category("group"),
            Filter::negate(Filter::present("mail")),
            Filter::Or(vec![
                Filter::equals("sAMAccountName", "nobody"),
                Filter::equals("sAMAccountName", "staff"),
            ]),
        ]);
        assert!(filter.matches(&entry));
        assert!(Filter::everything().matches(&entry));
        assert!(!Filter::Or(Vec::new()).matches(&entry));
    }

    #[test]
    fn test_render() {
        let filter = Filter::And(vec![
            Filter::equals("sAMAccountName", "a*(b)"),
            Filter::bit_and("groupType", 2),
        ]);
        assert_eq!(
            filter.to_string(),
            "(&(sAMAccountName=a\\2a\\28b\\29)(groupType:1.2.840.113556.1.4.803:=2))"
        );
    }
}

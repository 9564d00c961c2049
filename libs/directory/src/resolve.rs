//! Identity reference resolution.
//!
//! Callers name principals four ways: a SID, a GUID, a DN (plain or
//! extended) or a short account name. A reference is classified once into
//! [`IdentityReference`] and every lookup dispatches on that tag.

use dirsam_id::{looks_like_guid, Dn, ExtendedDn, ObjectGuid, Sid};
use tracing::debug;

use crate::directory::Directory;
use crate::error::{DirectoryError, DirectoryResult};
use crate::filter::Filter;
use crate::schema::{atype, category, group_type, int32_attr, MemberType};
use crate::store::{DirectoryStore, Entry, Scope};

/// A classified principal reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityReference {
    Sid(Sid),
    Guid(ObjectGuid),
    /// A DN, possibly carrying `<GUID=..>`/`<SID=..>` components.
    DistinguishedName(ExtendedDn),
    /// An account name searched for under a base.
    ShortName(String),
}

impl IdentityReference {
    /// Classifies `reference`, taking the first form that fits: SID, GUID,
    /// DN, then short name.
    ///
    /// Only the hyphenated GUID text is taken as a GUID, so a 16-character
    /// account name is never mistaken for a binary one. Input that opens
    /// with an extended component but does not parse is rejected rather
    /// than searched for as a name.
    pub fn classify(reference: &str) -> DirectoryResult<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DirectoryError::InvalidArgument(
                "empty principal reference".to_string(),
            ));
        }

        if let Ok(sid) = Sid::parse(reference) {
            return Ok(Self::Sid(sid));
        }

        if looks_like_guid(reference) {
            if let Ok(guid) = ObjectGuid::parse(reference) {
                return Ok(Self::Guid(guid));
            }
        }

        if reference.starts_with('<') {
            return ExtendedDn::parse(reference)
                .map(Self::DistinguishedName)
                .map_err(Into::into);
        }

        match Dn::parse(reference) {
            Ok(dn) if !dn.is_root() => Ok(Self::DistinguishedName(ExtendedDn::from_dn(dn))),
            _ => Ok(Self::ShortName(reference.to_string())),
        }
    }

    /// Scope of the search that finds this reference.
    #[must_use]
    pub fn scope(&self) -> Scope {
        match self {
            Self::ShortName(_) => Scope::Subtree,
            _ => Scope::Base,
        }
    }

    /// The reference as a store search base, qualifying relative DNs under
    /// `domain`. A DN ending in `DC=` components is looked up as written.
    /// `None` for short names, which are searched for instead.
    #[must_use]
    pub fn exact_base(&self, domain: &Dn) -> Option<ExtendedDn> {
        match self {
            Self::Sid(sid) => Some(ExtendedDn::from_sid(sid.clone())),
            Self::Guid(guid) => Some(ExtendedDn::from_guid(*guid)),
            Self::DistinguishedName(extended) if extended.has_identifiers() => Some(extended.clone()),
            Self::DistinguishedName(extended) => Some(ExtendedDn::from_dn(
                extended.dn().qualified_under(domain),
            )),
            Self::ShortName(_) => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Sid(_) => "sid",
            Self::Guid(_) => "guid",
            Self::DistinguishedName(_) => "dn",
            Self::ShortName(_) => "name",
        }
    }
}

/// Filter matching `name` as any of the member `types`.
///
/// Computer and service account names gain a trailing `$` when missing.
/// Contacts are matched by `name`, having no account name.
#[must_use]
pub fn member_filter(name: &str, types: &[MemberType]) -> Filter {
    let account_name = if name.ends_with('$') {
        name.to_string()
    } else {
        format!("{name}$")
    };

    let branches = types
        .iter()
        .map(|ty| match ty {
            MemberType::User => Filter::And(vec![
                Filter::equals("sAMAccountName", name),
                Filter::equals("sAMAccountType", int32_attr(atype::NORMAL_ACCOUNT)),
            ]),
            MemberType::Group => Filter::And(vec![
                Filter::equals("sAMAccountName", name),
                Filter::equals("objectClass", "group"),
                Filter::negate(Filter::bit_and("groupType", group_type::BUILTIN_LOCAL)),
            ]),
            MemberType::Computer => Filter::And(vec![
                Filter::equals("sAMAccountType", int32_attr(atype::WORKSTATION_TRUST)),
                Filter::negate(Filter::category(category::MANAGED_SERVICE_ACCOUNT)),
                Filter::equals("sAMAccountName", account_name.as_str()),
            ]),
            MemberType::ServiceAccount => Filter::And(vec![
                Filter::equals("sAMAccountType", int32_attr(atype::WORKSTATION_TRUST)),
                Filter::category(category::MANAGED_SERVICE_ACCOUNT),
                Filter::equals("sAMAccountName", account_name.as_str()),
            ]),
            MemberType::Contact => Filter::And(vec![
                Filter::category(category::PERSON),
                Filter::negate(Filter::present("objectSid")),
                Filter::equals("name", name),
            ]),
        })
        .collect();

    Filter::Or(branches)
}

impl<S: DirectoryStore> Directory<S> {
    /// Resolves a principal reference to its canonical extended DN.
    ///
    /// Short names are searched for under `base` as any of the `allowed`
    /// types (the defaults when empty). SIDs, GUIDs and DNs address exactly
    /// one object.
    pub fn resolve_reference(
        &self,
        reference: &str,
        base: &ExtendedDn,
        allowed: &[MemberType],
    ) -> DirectoryResult<ExtendedDn> {
        self.resolve_entry(reference, base, allowed, &[])
            .map(|entry| entry.extended_dn())
    }

    /// Resolves a principal reference and returns its entry with
    /// `attributes`.
    pub fn resolve_entry(
        &self,
        reference: &str,
        base: &ExtendedDn,
        allowed: &[MemberType],
        attributes: &[&str],
    ) -> DirectoryResult<Entry> {
        let classified = IdentityReference::classify(reference)?;
        debug!(reference, kind = classified.kind(), "classified principal reference");

        match classified.exact_base(self.domain_dn()) {
            Some(exact) => self.search_one(
                &exact,
                Scope::Base,
                &Filter::everything(),
                attributes,
                reference,
            ),
            None => {
                let types = if allowed.is_empty() {
                    &MemberType::DEFAULT[..]
                } else {
                    allowed
                };
                self.search_one(
                    base,
                    Scope::Subtree,
                    &member_filter(reference.trim(), types),
                    attributes,
                    reference,
                )
            }
        }
    }

    /// Resolves a group by SID, GUID, DN or `sAMAccountName`. Whatever the
    /// form, the object found must be a group.
    pub fn resolve_group(&self, group: &str, attributes: &[&str]) -> DirectoryResult<Entry> {
        let classified = IdentityReference::classify(group)?;
        let is_group = Filter::category(category::GROUP);

        let found = match classified.exact_base(self.domain_dn()) {
            Some(exact) => self.search_one(&exact, Scope::Base, &is_group, attributes, group),
            None => self.search_one(
                &self.domain_base(),
                Scope::Subtree,
                &Filter::And(vec![Filter::equals("sAMAccountName", group.trim()), is_group]),
                attributes,
                group,
            ),
        };

        found.map_err(|err| match err {
            DirectoryError::NotFound(_) => {
                DirectoryError::NotFound(format!("unable to find group \"{group}\""))
            }
            other => other,
        })
    }

    fn domain_dn(&self) -> &Dn {
        &self.well_known().domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("S-1-5-21-1004336348-1177238915-682003330-1105", "sid")]
    #[case("s-1-5-32-544", "sid")]
    #[case("9a1b6c2e-3f4d-4e5a-8b7c-1d2e3f405162", "guid")]
    #[case("{9a1b6c2e-3f4d-4e5a-8b7c-1d2e3f405162}", "guid")]
    #[case("CN=alice,CN=Users,DC=example,DC=com", "dn")]
    #[case("CN=alice,CN=Users", "dn")]
    #[case("<SID=S-1-5-21-1-2-3-500>", "dn")]
    #[case("alice", "name")]
    #[case("sixteen-chars-ab", "name")]
    #[case("9a1b6c2e3f4d4e5a8b7c1d2e3f405162", "name")]
    #[case("WKSTN01$", "name")]
    fn test_classify(#[case] reference: &str, #[case] kind: &str) {
        assert_eq!(IdentityReference::classify(reference).unwrap().kind(), kind);
    }

    #[test]
    fn test_classify_rejects_bad_input() {
        assert!(matches!(
            IdentityReference::classify("   "),
            Err(DirectoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            IdentityReference::classify("<SID=not-a-sid>"),
            Err(DirectoryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_exact_base_qualifies_plain_dns() {
        let domain = Dn::parse("DC=example,DC=com").unwrap();

        let relative = IdentityReference::classify("CN=alice,CN=Users").unwrap();
        assert_eq!(
            relative.exact_base(&domain).unwrap().to_string(),
            "CN=alice,CN=Users,DC=example,DC=com"
        );

        let full = IdentityReference::classify("cn=alice,cn=users,dc=example,dc=com").unwrap();
        assert_eq!(full.exact_base(&domain).unwrap().dn(), &Dn::parse("CN=alice,CN=Users,DC=example,DC=com").unwrap());

        let foreign = IdentityReference::classify("CN=x,DC=other,DC=org").unwrap();
        assert_eq!(
            foreign.exact_base(&domain).unwrap().to_string(),
            "CN=x,DC=other,DC=org"
        );

        let sid = IdentityReference::classify("S-1-5-21-1-2-3-500").unwrap();
        assert_eq!(sid.exact_base(&domain).unwrap().to_string(), "<SID=S-1-5-21-1-2-3-500>");
        assert_eq!(sid.scope(), Scope::Base);

        let name = IdentityReference::classify("alice").unwrap();
        assert!(name.exact_base(&domain).is_none());
        assert_eq!(name.scope(), Scope::Subtree);
    }

    #[test]
    fn test_member_filter_text() {
        let filter = member_filter("wks(1)", &[MemberType::Computer, MemberType::Contact]);
        assert_eq!(
            filter.to_string(),
            "(|(&(sAMAccountType=805306369)(!(objectCategory=msDS-ManagedServiceAccount))\
             (sAMAccountName=wks\\281\\29$))\
             (&(objectCategory=Person)(!(objectSid=*))(name=wks\\281\\29)))"
        );
    }
}

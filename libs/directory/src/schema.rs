//! Account flags, group types and the well-known layout of the domain.

use std::fmt;
use std::str::FromStr;

use dirsam_id::{Dn, IdError};

use crate::error::DirectoryError;

/// `userAccountControl` bits.
pub mod uf {
    pub const ACCOUNTDISABLE: u32 = 0x0000_0002;
    pub const PASSWD_NOTREQD: u32 = 0x0000_0020;
    pub const NORMAL_ACCOUNT: u32 = 0x0000_0200;
    pub const WORKSTATION_TRUST_ACCOUNT: u32 = 0x0000_1000;
    pub const DONT_EXPIRE_PASSWD: u32 = 0x0001_0000;
    pub const SMARTCARD_REQUIRED: u32 = 0x0004_0000;
}

/// `sAMAccountType` values.
pub mod atype {
    pub const SECURITY_GLOBAL_GROUP: u32 = 0x1000_0000;
    pub const DISTRIBUTION_GLOBAL_GROUP: u32 = 0x1000_0001;
    pub const SECURITY_LOCAL_GROUP: u32 = 0x2000_0000;
    pub const DISTRIBUTION_LOCAL_GROUP: u32 = 0x2000_0001;
    pub const NORMAL_ACCOUNT: u32 = 0x3000_0000;
    pub const WORKSTATION_TRUST: u32 = 0x3000_0001;
}

/// `groupType` bits.
pub mod group_type {
    pub const BUILTIN_LOCAL: u32 = 0x0000_0001;
    pub const GLOBAL: u32 = 0x0000_0002;
    pub const DOMAIN_LOCAL: u32 = 0x0000_0004;
    pub const UNIVERSAL: u32 = 0x0000_0008;
    pub const SECURITY_ENABLED: u32 = 0x8000_0000;
}

/// Renders a flag word the way the directory stores 32-bit integers:
/// as a signed decimal.
#[must_use]
pub fn int32_attr(value: u32) -> String {
    (value as i32).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupScope {
    DomainLocal,
    #[default]
    Global,
    Universal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupKind {
    #[default]
    Security,
    Distribution,
}

/// The `groupType` value for a scope and kind.
#[must_use]
pub fn group_type_value(scope: GroupScope, kind: GroupKind) -> u32 {
    let scope_bits = match scope {
        GroupScope::DomainLocal => group_type::DOMAIN_LOCAL,
        GroupScope::Global => group_type::GLOBAL,
        GroupScope::Universal => group_type::UNIVERSAL,
    };
    match kind {
        GroupKind::Security => scope_bits | group_type::SECURITY_ENABLED,
        GroupKind::Distribution => scope_bits,
    }
}

/// The `sAMAccountType` implied by a `groupType`.
#[must_use]
pub fn group_account_type(group_type_bits: u32) -> u32 {
    let security = group_type_bits & group_type::SECURITY_ENABLED != 0;
    let local = group_type_bits & (group_type::DOMAIN_LOCAL | group_type::BUILTIN_LOCAL) != 0;
    match (local, security) {
        (true, true) => atype::SECURITY_LOCAL_GROUP,
        (true, false) => atype::DISTRIBUTION_LOCAL_GROUP,
        (false, true) => atype::SECURITY_GLOBAL_GROUP,
        (false, false) => atype::DISTRIBUTION_GLOBAL_GROUP,
    }
}

/// Object categories a reference may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    User,
    Group,
    Computer,
    ServiceAccount,
    Contact,
}

impl MemberType {
    pub const ALL: [MemberType; 5] = [
        MemberType::User,
        MemberType::Group,
        MemberType::Computer,
        MemberType::ServiceAccount,
        MemberType::Contact,
    ];

    /// Types searched when the caller names none.
    pub const DEFAULT: [MemberType; 3] = [MemberType::User, MemberType::Group, MemberType::Computer];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Computer => "computer",
            Self::ServiceAccount => "serviceaccount",
            Self::Contact => "contact",
        }
    }

    /// Parses a list of type names. `all` expands to every type; an empty
    /// list means the defaults.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<MemberType>, DirectoryError> {
        if names.is_empty() {
            return Ok(Self::DEFAULT.to_vec());
        }
        if names.iter().any(|n| n.as_ref().eq_ignore_ascii_case("all")) {
            return Ok(Self::ALL.to_vec());
        }
        let mut types = Vec::with_capacity(names.len());
        for name in names {
            let ty: MemberType = name.as_ref().parse()?;
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
        Ok(types)
    }
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberType {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(MemberType::as_str).collect();
                DirectoryError::InvalidArgument(format!(
                    "invalid group member type \"{s}\", valid types are {} and all",
                    valid.join(", ")
                ))
            })
    }
}

/// Schema category RDN values.
pub mod category {
    pub const PERSON: &str = "Person";
    pub const GROUP: &str = "Group";
    pub const COMPUTER: &str = "Computer";
    pub const MANAGED_SERVICE_ACCOUNT: &str = "msDS-ManagedServiceAccount";
    pub const CONTAINER: &str = "Container";
    pub const ORGANIZATIONAL_UNIT: &str = "Organizational-Unit";
    pub const DOMAIN: &str = "Domain-DNS";
    pub const RID_SET: &str = "RID-Set";
    pub const RID_MANAGER: &str = "RID-Manager";
}

/// Fixed locations within a domain.
#[derive(Debug, Clone)]
pub struct WellKnownDns {
    pub domain: Dn,
    pub users: Dn,
    pub computers: Dn,
    pub system: Dn,
    pub domain_controllers: Dn,
    /// This server's account; holds `rIDSetReferences`.
    pub server: Dn,
    pub rid_set: Dn,
    pub rid_manager: Dn,
    pub schema: Dn,
}

impl WellKnownDns {
    pub fn new(domain: &Dn, server_name: &str) -> Result<Self, IdError> {
        let domain_controllers = domain.child("OU", "Domain Controllers")?;
        let server = domain_controllers.child("CN", server_name)?;
        let system = domain.child("CN", "System")?;
        let schema = domain.child("CN", "Configuration")?.child("CN", "Schema")?;
        Ok(Self {
            domain: domain.clone(),
            users: domain.child("CN", "Users")?,
            computers: domain.child("CN", "Computers")?,
            rid_set: server.child("CN", "RID Set")?,
            rid_manager: system.child("CN", "RID Manager$")?,
            system,
            domain_controllers,
            server,
            schema,
        })
    }

    /// `CN=<name>,CN=Schema,CN=Configuration,<domain>`.
    pub fn category(&self, name: &str) -> Result<Dn, IdError> {
        self.schema.child("CN", name)
    }
}

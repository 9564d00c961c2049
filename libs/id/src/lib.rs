//! # dirsam-id
//!
//! Identifier types for directory principals.
//!
//! ## Identifier forms
//!
//! A principal can be addressed four ways:
//!
//! - a security identifier, `S-1-5-21-1004336348-1177238915-682003330-1105`
//! - an object GUID, `9a1b6c2e-3f4d-4e5a-8b7c-1d2e3f405162`
//! - a distinguished name, `CN=alice,CN=Users,DC=example,DC=com`
//! - an extended DN carrying the stable identifiers next to the path,
//!   `<GUID=...>;<SID=...>;CN=alice,CN=Users,DC=example,DC=com`
//!
//! SIDs and GUIDs are assigned once and never change. Distinguished names
//! move with renames, so anything that compares identities should prefer
//! the embedded identifiers.

mod dn;
mod error;
mod extended;
mod guid;
mod macros;
mod sid;

pub use dn::{Dn, Rdn};
pub use error::IdError;
pub use extended::ExtendedDn;
pub use guid::{looks_like_guid, ObjectGuid};
pub use sid::{Rid, Sid, MAX_SUB_AUTHORITIES};

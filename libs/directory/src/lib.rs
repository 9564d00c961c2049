//! Directory core.
//!
//! Manages users, groups, computers and contacts in a directory store while
//! keeping two things correct under concurrent and partially failing
//! operations:
//!
//! - **RIDs**: every security principal gets a SID built from the domain SID
//!   and a RID drawn from this server's pool. Pools are carved from the RID
//!   manager and never overlap.
//! - **Membership**: group edits are idempotent whichever form (name, DN,
//!   SID or GUID) the caller used to name a member.
//!
//! All multi-step writes run through [`Directory::with_transaction`]; object
//! creation additionally arms a compensating delete.

pub mod config;
pub mod directory;
pub mod error;
pub mod filter;
pub mod membership;
pub mod principal;
pub mod resolve;
pub mod rid;
pub mod schema;
pub mod store;
pub mod telemetry;
pub mod transaction;

pub use config::{Config, DirectoryConfig, StoreBackend};
pub use directory::{open_store, Directory};
pub use error::{DirectoryError, DirectoryResult};
pub use filter::Filter;
pub use principal::{
    fullname_from_names, prepare_attr_replace, AccountExpiry, InitialPassword, NewComputer,
    NewContact, NewGroup, NewUser, PrincipalSpec, UnixAttributes,
};
pub use resolve::{member_filter, IdentityReference};
pub use schema::{GroupKind, GroupScope, MemberType};
pub use store::{
    DirectoryStore, Entry, MemoryStore, Modification, Scope, SqliteStore, StoreError,
};
pub use transaction::{CleanupOnError, TransactionGuard, TransactionState};

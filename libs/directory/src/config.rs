//! Configuration for the directory core.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use dirsam_id::{Dn, Sid};
use dirsam_ridalloc::DEFAULT_POOL_SIZE;

const DEFAULT_DOMAIN_DN: &str = "DC=example,DC=com";
const DEFAULT_DOMAIN_SID: &str = "S-1-5-21-1004336348-1177238915-682003330";
const DEFAULT_SERVER_NAME: &str = "DC1";

/// Where directory objects are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process memory; lost on exit.
    Memory,
    /// A SQLite database file.
    Sqlite(PathBuf),
}

impl StoreBackend {
    /// Parses `memory` or `sqlite:<path>`.
    pub fn parse(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("memory") {
            return Ok(Self::Memory);
        }
        match s.split_once(':') {
            Some((scheme, path)) if scheme.eq_ignore_ascii_case("sqlite") && !path.is_empty() => {
                Ok(Self::Sqlite(PathBuf::from(path)))
            }
            _ => Err(anyhow!("unknown store backend '{s}', expected memory or sqlite:<path>")),
        }
    }
}

/// Domain and server settings consumed by [`crate::Directory`].
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Root of the naming context, e.g. `DC=example,DC=com`.
    pub domain_dn: Dn,

    /// Domain SID; principal SIDs are this plus an allocated RID.
    pub domain_sid: Sid,

    /// DNS name used for `userPrincipalName` suffixes.
    pub dns_domain: String,

    /// Name of this server. Its RID set lives under its server object.
    pub server_name: String,

    /// RIDs per carved allocation pool.
    pub rid_pool_size: u32,

    /// Carve the next pool from the RID manager when the current one runs
    /// low.
    pub rid_refill: bool,
}

impl DirectoryConfig {
    /// A configuration with the default server name and pool settings.
    #[must_use]
    pub fn new(domain_dn: Dn, domain_sid: Sid) -> Self {
        let dns_domain = dns_domain_from_dn(&domain_dn);
        Self {
            domain_dn,
            domain_sid,
            dns_domain,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            rid_pool_size: DEFAULT_POOL_SIZE,
            rid_refill: true,
        }
    }
}

/// `DC=example,DC=com` becomes `example.com`.
#[must_use]
pub fn dns_domain_from_dn(dn: &Dn) -> String {
    dn.rdns()
        .iter()
        .filter(|rdn| rdn.attr().eq_ignore_ascii_case("DC"))
        .map(|rdn| rdn.value().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub store: StoreBackend,

    pub directory: DirectoryConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let log_level = var("DIRSAM_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let store = match var("DIRSAM_STORE") {
            Some(s) => StoreBackend::parse(&s)?,
            None => StoreBackend::Memory,
        };

        let domain_dn = var("DIRSAM_DOMAIN_DN").unwrap_or_else(|| DEFAULT_DOMAIN_DN.to_string());
        let domain_dn = Dn::parse(&domain_dn).context("DIRSAM_DOMAIN_DN")?;

        let domain_sid = var("DIRSAM_DOMAIN_SID").unwrap_or_else(|| DEFAULT_DOMAIN_SID.to_string());
        let domain_sid = Sid::parse(&domain_sid).context("DIRSAM_DOMAIN_SID")?;

        let mut directory = DirectoryConfig::new(domain_dn, domain_sid);

        if let Some(dns_domain) = var("DIRSAM_DNS_DOMAIN") {
            directory.dns_domain = dns_domain;
        }

        if let Some(server_name) = var("DIRSAM_SERVER_NAME") {
            if server_name.trim().is_empty() {
                return Err(anyhow!("DIRSAM_SERVER_NAME cannot be empty"));
            }
            directory.server_name = server_name;
        }

        if let Some(size) = var("DIRSAM_RID_POOL_SIZE") {
            directory.rid_pool_size = size.parse().context("DIRSAM_RID_POOL_SIZE")?;
            if directory.rid_pool_size == 0 {
                return Err(anyhow!("DIRSAM_RID_POOL_SIZE must be non-zero"));
            }
        }

        directory.rid_refill = var("DIRSAM_RID_REFILL")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(true);

        Ok(Self {
            log_level,
            store,
            directory,
        })
    }
}

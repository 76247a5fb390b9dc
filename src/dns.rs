//! DNS publishing
//!
//! After a restart the service name has to follow the instance to its new
//! address. Publishers upsert a single A record per service name.

pub mod cloudflare;

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;

pub use cloudflare::{Cloudflare, CloudflareAuth};

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsChange {
    Created,
    Updated,
    /// No DNS zone configured
    Skipped,
}

impl fmt::Display for DnsChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsChange::Created => write!(f, "created"),
            DnsChange::Updated => write!(f, "updated"),
            DnsChange::Skipped => write!(f, "skipped"),
        }
    }
}

/// Keeps `name` pointing at an address
#[async_trait]
pub trait DnsPublisher: Send + Sync {
    /// Create or update the A record for `name`. Calling it twice with the
    /// same arguments leaves one record.
    async fn upsert(&self, name: &str, address: &str) -> Result<DnsChange>;
}

/// Publisher used when no zone is configured
#[derive(Debug, Default)]
pub struct NoopDns;

#[async_trait]
impl DnsPublisher for NoopDns {
    async fn upsert(&self, name: &str, address: &str) -> Result<DnsChange> {
        info!(name, address, "no DNS zone configured, record not published");
        Ok(DnsChange::Skipped)
    }
}

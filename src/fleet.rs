//! Managed instances and their discovery
//!
//! An instance is managed when it carries both a `cf_domain` and a
//! `server_port` tag. Everything else in the account is left alone.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::provider::{CloudProvider, InstanceApi, InstanceRecord, RunState};

/// Tag holding the slash-delimited service ports
pub const PORT_TAG: &str = "server_port";
/// Tag holding the service domain name
pub const DOMAIN_TAG: &str = "cf_domain";
/// Optional tag holding a human-readable name
pub const DISPLAY_TAG: &str = "display_name";

/// A monitored instance, built fresh from provider inventory every pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedInstance {
    /// Latest provider snapshot
    pub record: InstanceRecord,
    /// Service domain used for probing and DNS
    pub service_name: String,
    /// Service ports, in tag order
    pub ports: Vec<u16>,
    pub display_name: String,
}

impl ManagedInstance {
    /// Build a managed instance from a provider record.
    ///
    /// Returns `Ok(None)` for unmanaged instances and `Err` for managed
    /// instances with malformed tags.
    pub fn from_record(record: InstanceRecord) -> Result<Option<Self>> {
        let service_name = match record.tags.get(DOMAIN_TAG).map(|s| s.trim()) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Ok(None),
        };
        let ports = match record.tags.get(PORT_TAG) {
            Some(raw) => parse_ports(raw).map_err(|message| Error::InvalidTag {
                instance: record.id.clone(),
                tag: PORT_TAG,
                message,
            })?,
            None => return Ok(None),
        };
        let display_name = record
            .tags
            .get(DISPLAY_TAG)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .unwrap_or(service_name.as_str())
            .to_string();

        Ok(Some(Self {
            record,
            service_name,
            ports,
            display_name,
        }))
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn address(&self) -> Option<&str> {
        self.record.public_address.as_deref()
    }

    pub fn state(&self) -> RunState {
        self.record.state
    }

    /// Same instance with a newer provider snapshot
    pub fn with_record(&self, record: InstanceRecord) -> Self {
        Self {
            record,
            service_name: self.service_name.clone(),
            ports: self.ports.clone(),
            display_name: self.display_name.clone(),
        }
    }

    /// Ports joined for messages, e.g. `443,8443`
    pub fn port_list(&self) -> String {
        self.ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for ManagedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Parse a `server_port` tag such as `8080/8443`.
///
/// Any bad entry rejects the whole list.
pub fn parse_ports(raw: &str) -> std::result::Result<Vec<u16>, String> {
    let mut ports = Vec::new();
    for part in raw.split('/') {
        let part = part.trim();
        let port: u16 = part
            .parse()
            .map_err(|e| format!("'{}' is not a port: {}", part, e))?;
        if port == 0 {
            return Err("port 0 is not a service port".to_string());
        }
        ports.push(port);
    }
    Ok(ports)
}

/// Row for `lightkeeper list`
#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    pub region: String,
    pub id: String,
    pub display_name: String,
    pub service_name: String,
    pub ports: Vec<u16>,
    pub address: Option<String>,
    pub state: String,
}

impl InstanceSummary {
    pub fn new(region: &str, instance: &ManagedInstance) -> Self {
        Self {
            region: region.to_string(),
            id: instance.id().to_string(),
            display_name: instance.display_name.clone(),
            service_name: instance.service_name.clone(),
            ports: instance.ports.clone(),
            address: instance.address().map(str::to_string),
            state: instance.state().to_string(),
        }
    }
}

/// Regions to scan this pass.
///
/// A configured allow-list is used as-is, without asking the provider.
pub async fn regions(provider: &dyn CloudProvider, allow_list: Option<&[String]>) -> Result<Vec<String>> {
    let regions = match allow_list {
        Some(list) => list.to_vec(),
        None => provider.list_regions().await?,
    };

    let mut seen = HashSet::new();
    Ok(regions
        .into_iter()
        .filter(|r| !r.is_empty() && seen.insert(r.clone()))
        .collect())
}

/// Managed instances in one region.
///
/// Fails only when the listing itself fails; bad tags drop single instances.
pub async fn managed_instances(api: &dyn InstanceApi) -> Result<Vec<ManagedInstance>> {
    let records = api
        .list_instances()
        .await
        .map_err(|e| Error::RegionEnumeration {
            region: api.region().to_string(),
            message: e.to_string(),
        })?;

    let mut managed = Vec::new();
    for record in records {
        let id = record.id.clone();
        match ManagedInstance::from_record(record) {
            Ok(Some(instance)) => managed.push(instance),
            Ok(None) => debug!(region = api.region(), instance = %id, "instance not managed"),
            Err(e) => warn!(region = api.region(), instance = %id, error = %e, "skipping instance"),
        }
    }

    Ok(managed)
}

//! Cloud provider inventory and control
//!
//! The Warden only talks to the provider through these traits:
//! - [`CloudProvider`] lists regions and hands out per-region clients
//! - [`InstanceApi`] lists, inspects, stops and starts instances in one region

pub mod lightsail;
pub mod sigv4;

#[cfg(test)]
pub mod fake;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Provider-reported run state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
    /// A code this build does not know about
    Unknown(u16),
}

impl RunState {
    /// Decode a provider state code. Only the low byte is significant.
    pub fn from_code(code: u16) -> Self {
        match code & 0xff {
            0 => RunState::Pending,
            16 => RunState::Running,
            32 => RunState::ShuttingDown,
            48 => RunState::Terminated,
            64 => RunState::Stopping,
            80 => RunState::Stopped,
            _ => RunState::Unknown(code),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running => write!(f, "running"),
            RunState::ShuttingDown => write!(f, "shutting-down"),
            RunState::Terminated => write!(f, "terminated"),
            RunState::Stopping => write!(f, "stopping"),
            RunState::Stopped => write!(f, "stopped"),
            RunState::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// Immutable snapshot of an instance as the provider reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Stable identifier (the Lightsail instance name)
    pub id: String,
    /// Public address, absent while the instance is stopped
    pub public_address: Option<String>,
    pub state: RunState,
    pub tags: BTreeMap<String, String>,
}

impl InstanceRecord {
    pub fn new(id: impl Into<String>, state: RunState) -> Self {
        Self {
            id: id.into(),
            public_address: None,
            state,
            tags: BTreeMap::new(),
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Instance inventory and control within one region
#[async_trait]
pub trait InstanceApi: Send + Sync {
    /// Region this client is bound to
    fn region(&self) -> &str;

    /// All instances in the region
    async fn list_instances(&self) -> Result<Vec<InstanceRecord>>;

    /// Fresh snapshot of a single instance
    async fn get_instance(&self, id: &str) -> Result<InstanceRecord>;

    /// Current run state of a single instance
    async fn instance_state(&self, id: &str) -> Result<RunState>;

    /// Stop an instance. `force` skips the graceful shutdown.
    async fn stop_instance(&self, id: &str, force: bool) -> Result<()>;

    async fn start_instance(&self, id: &str) -> Result<()>;
}

/// Provider-wide entry point
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Every region the account can use
    async fn list_regions(&self) -> Result<Vec<String>>;

    /// Client bound to `region`, shared by all instance tasks of that region
    fn region(&self, region: &str) -> Arc<dyn InstanceApi>;
}

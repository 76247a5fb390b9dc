//! Unified error types for Lightkeeper

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Remediation phase that waits on a run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    Stop,
    Start,
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPhase::Stop => write!(f, "stop"),
            WaitPhase::Start => write!(f, "start"),
        }
    }
}

/// DNS provider operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsOp {
    Lookup,
    Create,
    Update,
}

impl fmt::Display for DnsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsOp::Lookup => write!(f, "lookup"),
            DnsOp::Create => write!(f, "create"),
            DnsOp::Update => write!(f, "update"),
        }
    }
}

/// Main error type for Lightkeeper operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("Missing required setting {0}")]
    MissingSetting(&'static str),

    // Remediation errors
    #[error("{instance} wait for {phase} timeout[{}s]", .timeout.as_secs())]
    RemediationTimeout {
        instance: String,
        phase: WaitPhase,
        timeout: std::time::Duration,
    },

    #[error("{0} get new address failed")]
    AddressUnavailable(String),

    #[error("{instance} address still {address} after {}s", .waited.as_secs())]
    AddressUnchanged {
        instance: String,
        address: String,
        waited: std::time::Duration,
    },

    #[error("DNS record {op} for '{name}' failed: {message}")]
    DnsPublish {
        op: DnsOp,
        name: String,
        message: String,
    },

    // Provider errors
    #[error("Failed to list instances in region '{region}': {message}")]
    RegionEnumeration { region: String, message: String },

    #[error("Provider call {action} failed: {message}")]
    Provider { action: String, message: String },

    #[error("Invalid tag '{tag}' on instance '{instance}': {message}")]
    InvalidTag {
        instance: String,
        tag: &'static str,
        message: String,
    },

    #[error("Request signing failed: {0}")]
    Signing(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type alias for Lightkeeper operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this is an expected operational failure of a remediation
    /// rather than a defect or an infrastructure fault.
    pub fn is_remediation(&self) -> bool {
        matches!(
            self,
            Error::RemediationTimeout { .. }
                | Error::AddressUnavailable(_)
                | Error::AddressUnchanged { .. }
                | Error::DnsPublish { .. }
        )
    }
}

impl From<ureq::Error> for Error {
    fn from(e: ureq::Error) -> Self {
        Error::Http(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Task(e.to_string())
    }
}

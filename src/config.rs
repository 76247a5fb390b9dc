//! Runtime settings for Lightkeeper
//!
//! Account and endpoint settings come from flags or the environment (see
//! [`crate::cli::FleetArgs`]). Timing can be tuned with an optional TOML
//! file:
//!
//! ```toml
//! [probe]
//! budget = 60
//! attempts = 3
//!
//! [lifecycle]
//! stop_timeout = 300
//!
//! [address]
//! timeout = 0   # wait forever for a new address
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::FleetArgs;
use crate::dns::{Cloudflare, CloudflareAuth, DnsPublisher, NoopDns};
use crate::error::{Error, Result};
use crate::notify::{Gotify, NoopNotifier, Notifier};
use crate::provider::CloudProvider;
use crate::provider::lightsail::Lightsail;
use crate::provider::sigv4::Credentials;
use crate::sickbay::checker::ProbeConfig;
use crate::sickbay::recovery::{AddressConfig, LifecycleConfig};

/// Exponential backoff settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Base delay in milliseconds before first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Outbound HTTP settings shared by every adapter
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
        }
    }
}

impl HttpConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Timing overrides from the tuning file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub probe: ProbeConfig,
    pub lifecycle: LifecycleConfig,
    pub address: AddressConfig,
    pub http: HttpConfig,
}

impl Tuning {
    /// Load and validate a tuning file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let tuning: Tuning = toml::from_str(&content)?;
        tuning.validate()?;
        Ok(tuning)
    }

    pub fn validate(&self) -> Result<()> {
        let zero = |what: &str| Err(Error::ConfigValidation(format!("{} must be greater than zero", what)));

        if self.probe.budget == 0 {
            return zero("probe.budget");
        }
        if self.probe.attempts == 0 {
            return zero("probe.attempts");
        }
        if self.probe.connect_timeout == 0 {
            return zero("probe.connect_timeout");
        }
        if !matches!(self.probe.scheme.as_str(), "http" | "https") {
            return Err(Error::ConfigValidation(format!(
                "probe.scheme must be http or https, got {}",
                self.probe.scheme
            )));
        }
        if !(0.0..=1.0).contains(&self.probe.retry.jitter_factor) {
            return Err(Error::ConfigValidation(
                "probe.retry.jitter_factor must be between 0.0 and 1.0".into(),
            ));
        }
        if self.lifecycle.poll_interval_ms == 0 {
            return zero("lifecycle.poll_interval_ms");
        }
        if self.lifecycle.stop_timeout == 0 || self.lifecycle.start_timeout == 0 {
            return zero("lifecycle stop/start timeout");
        }
        if self.address.poll_interval == 0 {
            return zero("address.poll_interval");
        }
        if self.http.timeout == 0 {
            return zero("http.timeout");
        }
        Ok(())
    }
}

/// Where notifications go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifySettings {
    Gotify { url: String, token: String },
    Disabled,
}

/// Where DNS records are published
#[derive(Debug, Clone)]
pub enum DnsSettings {
    Cloudflare { zone_id: String, auth: CloudflareAuth },
    Disabled,
}

/// Everything a fleet command needs, resolved once at start-up
#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    /// Region used for account-wide calls
    pub home_region: String,
    /// Fixed Lightsail endpoint overriding the regional hosts
    pub endpoint: Option<String>,
    /// Region allow-list; `None` scans every region
    pub regions: Option<Vec<String>>,
    pub check_period: Duration,
    pub notify: NotifySettings,
    pub dns: DnsSettings,
    pub tuning: Tuning,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Settings {
    pub fn from_args(args: &FleetArgs, tuning: Tuning) -> Result<Self> {
        let access_key_id = non_empty(&args.access_key_id).ok_or(Error::MissingSetting("AWS_ACCESS_KEY_ID"))?;
        let secret_access_key =
            non_empty(&args.secret_access_key).ok_or(Error::MissingSetting("AWS_SECRET_ACCESS_KEY"))?;

        let check_period = match args.check_period_minutes.checked_mul(60) {
            Some(0) => {
                return Err(Error::ConfigValidation(
                    "CHECK_PERIOD_MINUTES must be greater than zero".into(),
                ));
            }
            Some(secs) => Duration::from_secs(secs),
            None => {
                return Err(Error::ConfigValidation(format!(
                    "CHECK_PERIOD_MINUTES {} is too large",
                    args.check_period_minutes
                )));
            }
        };

        let home_region = args.default_region.trim().to_string();
        if home_region.is_empty() {
            return Err(Error::MissingSetting("LIGHTSAIL_DEFAULT_REGION"));
        }

        let regions = args
            .regions
            .as_ref()
            .map(|list| {
                list.iter()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|list| !list.is_empty());

        let notify = match (non_empty(&args.gotify_url), non_empty(&args.gotify_token)) {
            (Some(url), Some(token)) => NotifySettings::Gotify { url, token },
            (None, None) => NotifySettings::Disabled,
            _ => {
                return Err(Error::ConfigValidation(
                    "GOTIFY_URL and GOTIFY_TOKEN must be set together".into(),
                ));
            }
        };

        let dns = match non_empty(&args.cloudflare_zone_id) {
            Some(zone_id) => {
                let token = non_empty(&args.cloudflare_token).ok_or(Error::MissingSetting("CLOUDFLARE_TOKEN"))?;
                let auth = match non_empty(&args.cloudflare_email) {
                    Some(email) => CloudflareAuth::GlobalKey { email, key: token },
                    None => CloudflareAuth::Token(token),
                };
                DnsSettings::Cloudflare { zone_id, auth }
            }
            None => DnsSettings::Disabled,
        };

        Ok(Self {
            credentials: Credentials {
                access_key_id,
                secret_access_key,
                session_token: non_empty(&args.session_token),
            },
            home_region,
            endpoint: non_empty(&args.lightsail_endpoint),
            regions,
            check_period,
            notify,
            dns,
            tuning,
        })
    }

    pub fn provider(&self) -> Arc<dyn CloudProvider> {
        let lightsail = Lightsail::new(
            self.credentials.clone(),
            &self.home_region,
            self.tuning.http.timeout_duration(),
        );
        match &self.endpoint {
            Some(endpoint) => Arc::new(lightsail.with_endpoint(endpoint)),
            None => Arc::new(lightsail),
        }
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        match &self.notify {
            NotifySettings::Gotify { url, token } => {
                Arc::new(Gotify::new(url, token, self.tuning.http.timeout_duration()))
            }
            NotifySettings::Disabled => Arc::new(NoopNotifier),
        }
    }

    pub fn dns(&self) -> Arc<dyn DnsPublisher> {
        match &self.dns {
            DnsSettings::Cloudflare { zone_id, auth } => Arc::new(Cloudflare::new(
                zone_id,
                auth.clone(),
                self.tuning.http.timeout_duration(),
            )),
            DnsSettings::Disabled => Arc::new(NoopDns),
        }
    }
}

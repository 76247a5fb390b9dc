//! Reachability probe
//!
//! An instance is reachable when any of its service ports answers an HTTPS
//! GET within the probe budget. Any status code counts; a refused connection,
//! a TLS failure or a dropped handshake does not. Each port is tried
//! independently with a few retries; the first success wins and the rest are
//! abandoned.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::RetryConfig;

/// Probe settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Total time budget for one instance, in seconds
    #[serde(default = "default_budget")]
    pub budget: u64,

    /// Connection attempts per port
    #[serde(default = "default_attempts")]
    pub attempts: u8,

    /// Timeout for a single request attempt, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// URL scheme for the request
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Backoff between attempts on the same port
    #[serde(default = "default_probe_retry")]
    pub retry: RetryConfig,
}

fn default_budget() -> u64 {
    60
}

fn default_attempts() -> u8 {
    3
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_probe_retry() -> RetryConfig {
    RetryConfig {
        base_delay_ms: 500,
        max_delay_ms: 5000,
        ..RetryConfig::default()
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            attempts: default_attempts(),
            connect_timeout: default_connect_timeout(),
            scheme: default_scheme(),
            retry: default_probe_retry(),
        }
    }
}

impl ProbeConfig {
    pub fn budget_duration(&self) -> Duration {
        Duration::from_secs(self.budget)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Decides whether an instance answers on its service ports
#[async_trait]
pub trait Prober: Send + Sync {
    async fn is_reachable(&self, host: &str, ports: &[u16]) -> bool;
}

/// HTTPS GET probe against `{scheme}://{host}:{port}/`
#[derive(Clone)]
pub struct HttpProber {
    agent: ureq::Agent,
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Self {
        let agent_config = ureq::Agent::config_builder()
            .timeout_global(Some(config.connect_timeout_duration()))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(agent_config),
            config,
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn is_reachable(&self, host: &str, ports: &[u16]) -> bool {
        let agent = self.agent.clone();
        let config = self.config.clone();
        let host = host.to_string();
        any_port(ports, config.budget_duration(), move |port| {
            let agent = agent.clone();
            let config = config.clone();
            let url = format!("{}://{}:{}/", config.scheme, host, port);
            async move {
                with_retries(config.attempts, &config.retry, |attempt| {
                    let agent = agent.clone();
                    let url = url.clone();
                    async move {
                        let result = fetch(agent, url.clone()).await;
                        if let Err(e) = &result {
                            debug!(%url, attempt, error = %e, "probe attempt failed");
                        }
                        result
                    }
                })
                .await
            }
        })
        .await
    }
}

/// One GET; any HTTP response means the service answered
async fn fetch(agent: ureq::Agent, url: String) -> Result<(), String> {
    let response = tokio::task::spawn_blocking(move || agent.get(url.as_str()).call())
        .await
        .map_err(|e| e.to_string())?;
    match response {
        Ok(response) => {
            debug!(status = response.status().as_u16(), "service answered");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Run `check` for every port concurrently and report whether any
/// succeeded before `budget` ran out. Outstanding checks are aborted.
pub async fn any_port<F, Fut>(ports: &[u16], budget: Duration, check: F) -> bool
where
    F: Fn(u16) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let mut set = JoinSet::new();
    for &port in ports {
        set.spawn(check(port));
    }

    let first_success = async {
        while let Some(result) = set.join_next().await {
            if let Ok(true) = result {
                return true;
            }
        }
        false
    };

    let reachable = tokio::time::timeout(budget, first_success)
        .await
        .unwrap_or(false);
    set.abort_all();
    reachable
}

/// Call `attempt` up to `attempts` times with backoff in between.
pub async fn with_retries<F, Fut>(attempts: u8, retry: &RetryConfig, mut attempt: F) -> bool
where
    F: FnMut(u8) -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let backoff = ExponentialBackoff::new()
        .base_delay_ms(retry.base_delay_ms)
        .max_delay_ms(retry.max_delay_ms)
        .multiplier(retry.multiplier)
        .max_attempts(attempts.saturating_add(1))
        .jitter_factor(retry.jitter_factor);

    for n in 1..=attempts {
        if attempt(n).await.is_ok() {
            return true;
        }
        if n < attempts {
            // ThreadRng is not Send, keep it out of the await
            let delay_ms = {
                let mut rng = rng();
                backoff.delay(n, &mut rng).unwrap_or(retry.max_delay_ms)
            };
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    false
}

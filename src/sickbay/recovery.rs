//! Recovery actions for unreachable instances
//!
//! Provides the stop/start cycle with bounded run-state waits, and the
//! follow-up poll for the address the provider hands out after a restart.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result, WaitPhase};
use crate::fleet::ManagedInstance;
use crate::provider::{InstanceApi, RunState};

/// Stop/start timing
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Deadline for reaching `Stopped`, in seconds
    #[serde(default = "default_state_timeout")]
    pub stop_timeout: u64,

    /// Deadline for reaching `Running`, in seconds
    #[serde(default = "default_state_timeout")]
    pub start_timeout: u64,

    /// Run-state poll interval, in milliseconds
    #[serde(default = "default_state_poll_ms")]
    pub poll_interval_ms: u64,
}

fn default_state_timeout() -> u64 {
    300
}

fn default_state_poll_ms() -> u64 {
    1000
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout: default_state_timeout(),
            start_timeout: default_state_timeout(),
            poll_interval_ms: default_state_poll_ms(),
        }
    }
}

impl LifecycleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Post-restart address polling
#[derive(Debug, Clone, Deserialize)]
pub struct AddressConfig {
    /// Seconds between refetches
    #[serde(default = "default_address_poll")]
    pub poll_interval: u64,

    /// Give up after this many seconds; 0 waits forever
    #[serde(default = "default_address_timeout")]
    pub timeout: u64,
}

fn default_address_poll() -> u64 {
    5
}

fn default_address_timeout() -> u64 {
    600
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_address_poll(),
            timeout: default_address_timeout(),
        }
    }
}

impl AddressConfig {
    pub fn poll_duration(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn deadline(&self) -> Option<Duration> {
        match self.timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Result of waiting on a run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Target observed on poll number `polls`
    Reached { polls: u32 },
    /// Deadline passed; `last` is the final state seen
    TimedOut { last: RunState },
}

/// Poll `id` until it reports `target` or `timeout` elapses.
///
/// Polls immediately, then at a constant `interval`. Provider errors abort
/// the wait; a deadline miss is reported as [`WaitOutcome::TimedOut`].
pub async fn wait_for_state(
    api: &dyn InstanceApi,
    id: &str,
    target: RunState,
    timeout: Duration,
    interval: Duration,
) -> Result<WaitOutcome> {
    let started = Instant::now();
    let mut polls = 0u32;

    loop {
        let state = api.instance_state(id).await?;
        polls += 1;

        debug!(
            instance = id,
            %target,
            current = %state,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "waiting for run state"
        );

        if state == target {
            return Ok(WaitOutcome::Reached { polls });
        }
        if started.elapsed() >= timeout {
            return Ok(WaitOutcome::TimedOut { last: state });
        }

        tokio::time::sleep(interval).await;
    }
}

/// Drives the forced stop and the start of an instance
pub struct Lifecycle<'a> {
    api: &'a dyn InstanceApi,
    config: &'a LifecycleConfig,
}

impl<'a> Lifecycle<'a> {
    pub fn new(api: &'a dyn InstanceApi, config: &'a LifecycleConfig) -> Self {
        Self { api, config }
    }

    /// Force-stop and wait for `Stopped`
    pub async fn stop(&self, instance: &ManagedInstance) -> Result<()> {
        self.api.stop_instance(instance.id(), true).await?;
        self.wait(instance, RunState::Stopped, WaitPhase::Stop, self.config.stop_timeout)
            .await
    }

    /// Start and wait for `Running`
    pub async fn start(&self, instance: &ManagedInstance) -> Result<()> {
        self.api.start_instance(instance.id()).await?;
        self.wait(instance, RunState::Running, WaitPhase::Start, self.config.start_timeout)
            .await
    }

    async fn wait(
        &self,
        instance: &ManagedInstance,
        target: RunState,
        phase: WaitPhase,
        timeout_secs: u64,
    ) -> Result<()> {
        let timeout = Duration::from_secs(timeout_secs);
        match wait_for_state(self.api, instance.id(), target, timeout, self.config.poll_interval())
            .await?
        {
            WaitOutcome::Reached { polls } => {
                info!(instance = %instance, %target, polls, "instance reached run state");
                Ok(())
            }
            WaitOutcome::TimedOut { last } => {
                debug!(instance = %instance, %target, %last, "run state wait timed out");
                Err(Error::RemediationTimeout {
                    instance: instance.display_name.clone(),
                    phase,
                    timeout,
                })
            }
        }
    }
}

/// Refetch `instance` until its address differs from `old`.
///
/// Every refetch yields a new snapshot; the returned instance carries the
/// one with the new address. A change to no address is fatal.
pub async fn await_new_address(
    api: &dyn InstanceApi,
    instance: &ManagedInstance,
    old: Option<&str>,
    config: &AddressConfig,
) -> Result<ManagedInstance> {
    let started = Instant::now();
    let deadline = config.deadline();

    let fresh = loop {
        tokio::time::sleep(config.poll_duration()).await;

        let record = api.get_instance(instance.id()).await?;
        if record.public_address.as_deref() != old {
            break instance.with_record(record);
        }

        debug!(instance = %instance, address = ?old, "address unchanged");

        if let Some(limit) = deadline {
            if started.elapsed() >= limit {
                return Err(Error::AddressUnchanged {
                    instance: instance.display_name.clone(),
                    address: old.unwrap_or("none").to_string(),
                    waited: limit,
                });
            }
        }
    };

    match fresh.address() {
        Some(address) if !address.is_empty() => Ok(fresh),
        _ => Err(Error::AddressUnavailable(instance.display_name.clone())),
    }
}

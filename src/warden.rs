//! The Warden - fleet reconciliation loop
//!
//! Every pass walks all regions concurrently and, inside each region, all
//! managed instances concurrently. An unreachable instance goes through one
//! stop/start cycle, gets its new address published to DNS, and the operator
//! hears about each step. Failures stay with the instance or region that
//! produced them.

pub mod attempt;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::dns::DnsPublisher;
use crate::error::Result;
use crate::fleet::{self, ManagedInstance};
use crate::notify::{Notifier, Priority};
use crate::provider::{CloudProvider, InstanceApi};
use crate::sickbay::checker::Prober;
use crate::sickbay::recovery::{self, AddressConfig, Lifecycle, LifecycleConfig};
use attempt::{Outcome, RemediationAttempt};

/// Title for progress notifications
pub const UPDATE_TITLE: &str = "Lightsail Server Update";
/// Title for failure notifications
pub const ERROR_TITLE: &str = "Lightsail Watchdog Error";

/// Counts for one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub regions: usize,
    pub regions_failed: usize,
    pub instances: usize,
    pub reachable: usize,
    pub recovered: usize,
    pub failed: usize,
}

impl PassReport {
    fn record(&mut self, outcome: Outcome) {
        self.instances += 1;
        match outcome {
            Outcome::Reachable => self.reachable += 1,
            Outcome::Recovered => self.recovered += 1,
            _ => self.failed += 1,
        }
    }

    fn merge(&mut self, other: PassReport) {
        self.regions += other.regions;
        self.regions_failed += other.regions_failed;
        self.instances += other.instances;
        self.reachable += other.reachable;
        self.recovered += other.recovered;
        self.failed += other.failed;
    }
}

/// The Warden watches every managed instance in the account
pub struct Warden {
    provider: Arc<dyn CloudProvider>,
    prober: Arc<dyn Prober>,
    notifier: Arc<dyn Notifier>,
    dns: Arc<dyn DnsPublisher>,
    /// Region allow-list; `None` asks the provider
    regions: Option<Vec<String>>,
    lifecycle: LifecycleConfig,
    address: AddressConfig,
}

impl Warden {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        prober: Arc<dyn Prober>,
        notifier: Arc<dyn Notifier>,
        dns: Arc<dyn DnsPublisher>,
    ) -> Self {
        Self {
            provider,
            prober,
            notifier,
            dns,
            regions: None,
            lifecycle: LifecycleConfig::default(),
            address: AddressConfig::default(),
        }
    }

    pub fn with_regions(mut self, regions: Option<Vec<String>>) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_address(mut self, address: AddressConfig) -> Self {
        self.address = address;
        self
    }

    /// Run a pass every `period` until `shutdown` resolves.
    ///
    /// The first pass starts immediately and later passes stay on the
    /// `period` grid. Passes never overlap: every tick that comes due while a
    /// pass is still running is skipped, and the next pass waits for the
    /// following grid slot. On shutdown the running pass is dropped, which
    /// aborts its tasks.
    pub async fn run(self: Arc<Self>, period: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(period_secs = period.as_secs(), "Warden started");

        loop {
            let started = tokio::select! {
                _ = &mut shutdown => break,
                started = ticker.tick() => started,
            };

            tokio::select! {
                _ = &mut shutdown => {
                    warn!("shutdown requested, abandoning in-flight pass");
                    break;
                }
                report = Arc::clone(&self).reconcile() => {
                    info!(
                        regions = report.regions,
                        regions_failed = report.regions_failed,
                        instances = report.instances,
                        reachable = report.reachable,
                        recovered = report.recovered,
                        failed = report.failed,
                        "check finished"
                    );
                }
            }

            let now = Instant::now();
            if now.saturating_duration_since(started) >= period {
                match next_slot(started, now, period) {
                    Some(slot) => {
                        warn!(
                            overrun_secs = (now - started).as_secs(),
                            "pass outlasted the period, skipping missed ticks"
                        );
                        ticker.reset_at(slot);
                    }
                    None => ticker.reset(),
                }
            }
        }

        info!("Warden stopped");
    }

    /// One reconciliation pass over every region
    pub async fn reconcile(self: Arc<Self>) -> PassReport {
        info!("check start");
        let mut report = PassReport::default();

        let regions = match fleet::regions(self.provider.as_ref(), self.regions.as_deref()).await {
            Ok(regions) => regions,
            Err(e) => {
                error!(error = %e, "failed to enumerate regions");
                self.notifier
                    .send(&e.to_string(), ERROR_TITLE, Priority::Alert, false)
                    .await;
                return report;
            }
        };

        let mut set = JoinSet::new();
        let mut names = HashMap::new();
        for region in regions {
            let warden = Arc::clone(&self);
            let name = region.clone();
            let handle = set.spawn(async move { warden.reconcile_region(region).await });
            names.insert(handle.id(), name);
        }

        while let Some(joined) = set.join_next().await {
            report.regions += 1;
            match joined {
                Ok(Ok(region_report)) => report.merge(region_report),
                Ok(Err(e)) => {
                    warn!(error = %e, "skipping region");
                    report.regions_failed += 1;
                }
                Err(e) => {
                    let region = names.get(&e.id()).map(String::as_str).unwrap_or("unknown");
                    error!(region, error = %e, "region task failed");
                    report.regions_failed += 1;
                }
            }
        }

        report
    }

    async fn reconcile_region(self: Arc<Self>, region: String) -> Result<PassReport> {
        let api = self.provider.region(&region);
        let instances = fleet::managed_instances(api.as_ref()).await?;
        info!(region = %region, count = instances.len(), "checking region");

        let mut set = JoinSet::new();
        let mut names = HashMap::new();
        for instance in instances {
            let warden = Arc::clone(&self);
            let api = Arc::clone(&api);
            let name = instance.display_name.clone();
            let handle = set.spawn(async move { warden.reconcile_instance(api.as_ref(), instance).await });
            names.insert(handle.id(), name);
        }

        let mut report = PassReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    let instance = names.get(&e.id()).map(String::as_str).unwrap_or("unknown");
                    error!(region = %region, instance, error = %e, "instance task failed");
                    self.notifier
                        .send(
                            &format!("{} check aborted: {}", instance, e),
                            ERROR_TITLE,
                            Priority::Alert,
                            false,
                        )
                        .await;
                    report.record(Outcome::Failed);
                }
            }
        }

        Ok(report)
    }

    /// Probe one instance and remediate it if needed. Never fails; every
    /// error ends up in a notification.
    pub async fn reconcile_instance(&self, api: &dyn InstanceApi, instance: ManagedInstance) -> Outcome {
        let mut attempt = RemediationAttempt::new(&instance);

        if let Err(e) = self.remediate(api, &instance, &mut attempt).await {
            attempt.fail(&e);
            if e.is_remediation() {
                warn!(instance = %instance, phase = ?attempt.failed_in, error = %e, "remediation failed");
                self.notifier
                    .send(&e.to_string(), ERROR_TITLE, Priority::Alert, true)
                    .await;
            } else {
                error!(instance = %instance, phase = ?attempt.failed_in, error = %e, "error while checking");
                self.notifier
                    .send(&e.to_string(), ERROR_TITLE, Priority::Alert, false)
                    .await;
            }
        }

        attempt.outcome()
    }

    async fn remediate(
        &self,
        api: &dyn InstanceApi,
        instance: &ManagedInstance,
        attempt: &mut RemediationAttempt,
    ) -> Result<()> {
        info!(region = api.region(), instance = %instance, "checking");

        if self
            .prober
            .is_reachable(&instance.service_name, &instance.ports)
            .await
        {
            attempt.pass();
            info!(instance = %instance, "check succeeded");
            return Ok(());
        }

        attempt.down();
        let old_address = attempt.old_address.clone();
        self.notifier
            .send(
                &format!(
                    "{} test domain:[{} ({})] for ports[{}] down",
                    instance,
                    instance.service_name,
                    old_address.as_deref().unwrap_or("none"),
                    instance.port_list()
                ),
                UPDATE_TITLE,
                Priority::Normal,
                true,
            )
            .await;

        let lifecycle = Lifecycle::new(api, &self.lifecycle);
        lifecycle.stop(instance).await?;
        attempt.halted();
        lifecycle.start(instance).await?;
        attempt.booted();

        let fresh = recovery::await_new_address(api, instance, old_address.as_deref(), &self.address).await?;
        let new_address = fresh.address().unwrap_or_default();
        attempt.readdressed(new_address);

        let change = self.dns.upsert(&instance.service_name, new_address).await?;
        attempt.published();
        info!(instance = %instance, name = %instance.service_name, %change, address = new_address, "DNS record published");

        self.notifier
            .send(
                &format!(
                    "Update DNS {} from {} to new ip {}",
                    instance.service_name,
                    old_address.as_deref().unwrap_or("none"),
                    new_address
                ),
                UPDATE_TITLE,
                Priority::Normal,
                true,
            )
            .await;

        Ok(())
    }
}

/// First slot of the `period` grid anchored at `started` that lies after `now`
fn next_slot(started: Instant, now: Instant, period: Duration) -> Option<Instant> {
    let elapsed = now.saturating_duration_since(started);
    let missed = elapsed.as_nanos().checked_div(period.as_nanos())?;
    let slots = u32::try_from(missed).ok()?.checked_add(1)?;
    started.checked_add(period.checked_mul(slots)?)
}

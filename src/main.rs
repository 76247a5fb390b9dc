//! Lightkeeper - self-healing watchdog for Lightsail instances
//!
//! Probes tagged instances on a schedule, restarts the ones that stop
//! answering, and moves their DNS record to the new public address.

mod cli;
mod config;
mod dns;
mod error;
mod fleet;
mod notify;
mod provider;
mod sickbay;
mod warden;

use std::sync::Arc;

use cli::{Cli, Commands, LogFormat};
use config::{Settings, Tuning};
use error::Result;
use sickbay::{Prober, HttpProber};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose, cli.log_format);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %e, "lightkeeper failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("lightkeeper=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn run(cli: Cli) -> Result<i32> {
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Completion { shell } = command {
        Cli::generate_completion(shell);
        return Ok(0);
    }

    let tuning = match &cli.config {
        Some(path) => Tuning::load(path)?,
        None => Tuning::default(),
    };

    let rt = tokio::runtime::Runtime::new()?;

    match command {
        Commands::Probe { host, ports } => {
            let ports = fleet::parse_ports(&ports).map_err(error::Error::ConfigValidation)?;
            let prober = HttpProber::new(tuning.probe);
            let reachable = rt.block_on(prober.is_reachable(&host, &ports));
            if reachable {
                println!("{} is reachable", host);
                Ok(0)
            } else {
                println!("{} is unreachable on ports {:?}", host, ports);
                Ok(1)
            }
        }

        Commands::List { json } => {
            let settings = Settings::from_args(&cli.fleet, tuning)?;
            let rows = rt.block_on(list_fleet(&settings))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if rows.is_empty() {
                println!("No managed instances");
            } else {
                println!(
                    "{:<16} {:<24} {:<32} {:<12} {:<16} {}",
                    "REGION", "INSTANCE", "DOMAIN", "PORTS", "ADDRESS", "STATE"
                );
                for row in &rows {
                    println!(
                        "{:<16} {:<24} {:<32} {:<12} {:<16} {}",
                        row.region,
                        row.id,
                        row.service_name,
                        row.ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("/"),
                        row.address.as_deref().unwrap_or("-"),
                        row.state
                    );
                }
            }
            Ok(0)
        }

        Commands::Once { json } => {
            let settings = Settings::from_args(&cli.fleet, tuning)?;
            let warden = Arc::new(build_warden(&settings));
            let report = rt.block_on(warden.reconcile());
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "regions: {} ({} failed), instances: {}, reachable: {}, recovered: {}, failed: {}",
                    report.regions,
                    report.regions_failed,
                    report.instances,
                    report.reachable,
                    report.recovered,
                    report.failed
                );
            }
            Ok(if report.failed > 0 || report.regions_failed > 0 { 1 } else { 0 })
        }

        Commands::Run => {
            let settings = Settings::from_args(&cli.fleet, tuning)?;
            let warden = Arc::new(build_warden(&settings));
            info!(
                home_region = %settings.home_region,
                regions = ?settings.regions,
                period_minutes = settings.check_period.as_secs() / 60,
                "starting watchdog"
            );
            rt.block_on(warden.run(settings.check_period, shutdown_signal()));
            Ok(0)
        }

        Commands::Completion { .. } => Ok(0),
    }
}

fn build_warden(settings: &Settings) -> warden::Warden {
    let prober: Arc<dyn Prober> = Arc::new(HttpProber::new(settings.tuning.probe.clone()));
    warden::Warden::new(settings.provider(), prober, settings.notifier(), settings.dns())
        .with_regions(settings.regions.clone())
        .with_lifecycle(settings.tuning.lifecycle.clone())
        .with_address(settings.tuning.address.clone())
}

async fn list_fleet(settings: &Settings) -> Result<Vec<fleet::InstanceSummary>> {
    let provider = settings.provider();
    let regions = fleet::regions(provider.as_ref(), settings.regions.as_deref()).await?;

    let mut rows = Vec::new();
    for region in regions {
        let api = provider.region(&region);
        match fleet::managed_instances(api.as_ref()).await {
            Ok(instances) => rows.extend(
                instances
                    .iter()
                    .map(|instance| fleet::InstanceSummary::new(&region, instance)),
            ),
            Err(e) => warn!(error = %e, "skipping region"),
        }
    }
    Ok(rows)
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

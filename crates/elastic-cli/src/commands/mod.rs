//! CLI commands implementation

use anyhow::{Context, Result};
use elastic_core::{ElasticConfig, NodeRecord, ProviderKind, ScalingVerdict, StateBackend};
use elastic_network::SshTransport;
use elastic_provider::{FleetGateway, GceGateway};
use elastic_scheduler::{Autoscaler, CycleAction, CycleReport, ExpandOutcome, ShrinkOutcome};
use elastic_store::{FileStateStore, MemoryStateStore, StateStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

const DEFAULT_CONFIG: &str = "elastic.toml";

/// Load, override from the environment, and validate the configuration.
///
/// Without an explicit path `elastic.toml` is read when present and the
/// built-in defaults are used otherwise.
pub fn load_config(path: Option<&Path>) -> Result<ElasticConfig> {
    let mut config = match path {
        Some(path) => ElasticConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            ElasticConfig::from_file(Path::new(DEFAULT_CONFIG))?
        }
        None => ElasticConfig::default(),
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Wire the configured provider, transport and store into an autoscaler
pub fn build_autoscaler(config: &ElasticConfig) -> Result<Autoscaler> {
    let gateway: Arc<dyn FleetGateway> = match config.provider.kind {
        ProviderKind::Gce => Arc::new(
            GceGateway::from_env(config.provider.clone())
                .context("Failed to set up the compute engine gateway")?,
        ),
    };

    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::File => Arc::new(FileStateStore::new(config.state.path.clone())),
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
    };

    let exec = Arc::new(SshTransport::new(config.ssh.clone()));

    info!(
        provider = gateway.name(),
        store = store.name(),
        min = config.scaling.min_nodes,
        max = config.scaling.max_nodes,
        "Autoscaler ready"
    );
    Ok(Autoscaler::new(gateway, exec, store, config))
}

/// Run one autoscaling cycle
pub async fn auto_scale(scaler: &Autoscaler) -> Result<()> {
    let report = scaler.run_cycle().await?;
    print_report(&report);
    Ok(())
}

/// Print node states without scoring them
pub async fn dump_state(scaler: &Autoscaler) -> Result<()> {
    let nodes = scaler.dump_state().await?;
    if nodes.is_empty() {
        println!("No nodes found");
        return Ok(());
    }

    println!(
        "{:<30} {:<10} {:<8} {:<16} {:<10}",
        "NAME", "STATE", "STICKY", "ADDRESS", "CONTAINER"
    );
    println!("{}", "-".repeat(78));
    for node in &nodes {
        println!(
            "{:<30} {:<10} {:<8} {:<16} {:<10}",
            node.name,
            utilization_label(node),
            node.sticky_count,
            node.address.as_deref().unwrap_or("-"),
            node.container_state
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

/// Add nodes regardless of utilization
pub async fn expand(scaler: &Autoscaler, count: u32) -> Result<()> {
    let outcome = scaler.operator().expand(count).await?;
    print_expand(&outcome);
    Ok(())
}

/// Remove the oldest nodes regardless of utilization
pub async fn shrink(scaler: &Autoscaler, count: u32) -> Result<()> {
    let outcome = scaler.operator().shrink(count).await?;
    print_shrink(&outcome);
    Ok(())
}

/// Run cycles every `interval` seconds until Ctrl-C.
///
/// A failed cycle is logged and the next one runs on schedule. An interrupt
/// lets the running cycle finish.
pub async fn watch(scaler: &Autoscaler, interval: u64) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(interval, "Watching fleet");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = auto_scale(scaler).await {
                    error!(error = %e, "Autoscaling cycle failed");
                }
            }
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupted, stopping");
                break;
            }
        }
    }
    Ok(())
}

fn utilization_label(node: &NodeRecord) -> String {
    node.utilization
        .map(|s| s.to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

fn node_line(node: &NodeRecord) -> String {
    format!("{:<30} {}", node.name, utilization_label(node))
}

fn verdict_line(verdict: ScalingVerdict) -> String {
    match verdict {
        ScalingVerdict::Shrink(n) => format!("Shrinking {} nodes...", n),
        ScalingVerdict::Expand(n) => format!("Expanding {} nodes...", n),
        ScalingVerdict::DoNothing => {
            "Service is in equilibrium. No need to shrink or expand right now!".to_string()
        }
    }
}

fn print_report(report: &CycleReport) {
    if !report.resumed.destroyed.is_empty() || !report.resumed.failed.is_empty() {
        println!("Resumed interrupted shrink:");
        print_shrink(&report.resumed);
    }

    for node in &report.nodes {
        println!("{}", node_line(node));
    }
    println!("{}", verdict_line(report.verdict));

    match &report.action {
        CycleAction::None => {}
        CycleAction::Expanded(outcome) => print_expand(outcome),
        CycleAction::Shrunk(outcome) => print_shrink(outcome),
    }
}

fn print_expand(outcome: &ExpandOutcome) {
    if outcome.at_capacity() {
        println!("Fleet is at its maximum size, nothing added");
        return;
    }
    for node in &outcome.provisioned {
        println!(
            "  + {} ({})",
            node.name,
            node.address.as_deref().unwrap_or("no address")
        );
    }
    if (outcome.provisioned.len() as u32) < outcome.allowed {
        println!(
            "  {} of {} nodes came up",
            outcome.provisioned.len(),
            outcome.allowed
        );
    }
}

fn print_shrink(outcome: &ShrinkOutcome) {
    if outcome.at_floor() {
        println!("Fleet is at its minimum size, nothing removed");
        return;
    }
    for name in &outcome.destroyed {
        println!("  - {}", name);
    }
    for failure in &outcome.failed {
        eprintln!("  ! {}: {}", failure.node, failure.error);
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use offerflow_core::config::AppConfig;
use offerflow_core::sync::DEFAULT_STALE_MAX_AGE;
use offerflow_core::{FinancialSync, OfferId, SyncCounts};
use serde::Serialize;
use serde_json::json;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::context::Services;
use super::{block_on, to_data, CommandFailure, CommandResult};

pub fn one(config: &AppConfig, offer: &str) -> CommandResult {
    let offer_id = OfferId(offer.trim().to_string());

    let result = block_on(async {
        let services = Services::open(config).await?;
        let outcome = services.sync.sync_one(&offer_id).await;
        services.close().await;
        let outcome = outcome.map_err(CommandFailure::from)?;
        to_data(&outcome).map(|data| (outcome.connected, outcome.persisted, data))
    });

    match result {
        Ok((connected, persisted, data)) => {
            let message = match (connected, persisted) {
                (true, true) => format!("synced offer {offer_id}"),
                (true, false) => format!("fetched figures for {offer_id} but could not store them"),
                (false, _) => format!("offer {offer_id} not synced; warehouse not connected"),
            };
            CommandResult::success_with("sync.one", message, Some(data))
        }
        Err(failure) => failure.into_result("sync.one"),
    }
}

pub fn stale(config: &AppConfig, max_age_secs: u64) -> CommandResult {
    let max_age = Duration::from_secs(max_age_secs);
    bulk("sync.stale", config, |sync| async move { sync.sync_stale(max_age).await })
}

pub fn all(config: &AppConfig) -> CommandResult {
    bulk("sync.all", config, |sync| async move { sync.sync_all().await })
}

fn bulk<F, Fut>(command: &str, config: &AppConfig, work: F) -> CommandResult
where
    F: FnOnce(Arc<FinancialSync>) -> Fut,
    Fut: std::future::Future<Output = Result<SyncCounts, offerflow_core::ApplicationError>>,
{
    let result = block_on(async {
        let services = Services::open(config).await?;
        let enabled = services.sync.is_enabled();
        let counts = work(services.sync.clone()).await;
        services.close().await;
        counts.map(|counts| (enabled, counts)).map_err(CommandFailure::from)
    });

    match result {
        Ok((enabled, counts)) => CommandResult::success_with(
            command,
            if enabled {
                format!("synced {} offers, {} failed", counts.synced, counts.failed)
            } else {
                "warehouse sync disabled; nothing to do".to_string()
            },
            Some(json!({ "enabled": enabled, "synced": counts.synced, "failed": counts.failed })),
        ),
        Err(failure) => failure.into_result(command),
    }
}

/// Totals across every pass the daemon ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DaemonReport {
    pub passes: usize,
    pub synced: usize,
    pub failed: usize,
}

impl DaemonReport {
    fn add(&mut self, counts: SyncCounts) {
        self.passes += 1;
        self.synced += counts.synced;
        self.failed += counts.failed;
    }
}

pub fn daemon(config: &AppConfig) -> CommandResult {
    let interval = config.sync_interval();

    let result = block_on(async {
        let services = Services::open(config).await?;
        if !services.sync.is_enabled() {
            services.close().await;
            return Ok(None);
        }

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = wait_for_shutdown().await {
                tracing::warn!(error = %error, "could not listen for ctrl-c; stopping sync daemon");
            }
            on_signal.cancel();
        });

        let report = run_daemon(services.sync.clone(), interval, cancel).await;
        services.close().await;
        to_data(&report).map(Some)
    });

    match result {
        Ok(Some(data)) => {
            CommandResult::success_with("sync.daemon", "sync daemon stopped", Some(data))
        }
        Ok(None) => {
            CommandResult::success("sync.daemon", "warehouse sync disabled; daemon not started")
        }
        Err(failure) => failure.into_result("sync.daemon"),
    }
}

/// Runs a startup pass over offers older than an hour, then the scheduled pass on every
/// `period` tick until `cancel` fires.
pub async fn run_daemon(
    sync: Arc<FinancialSync>,
    period: Duration,
    cancel: CancellationToken,
) -> DaemonReport {
    let mut report = DaemonReport::default();
    let period = period.max(Duration::from_secs(1));

    tracing::info!(
        event_name = "sync.daemon.started",
        interval_secs = period.as_secs(),
        "sync daemon started"
    );

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::info!(event_name = "sync.daemon.stopping", "sync daemon stopping");
            return report;
        }
        counts = sync.sync_stale(DEFAULT_STALE_MAX_AGE) => {
            record_pass(&mut report, "startup", counts);
        }
    }

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(event_name = "sync.daemon.stopping", "sync daemon stopping");
                break;
            }
            _ = ticker.tick() => {
                let counts = sync.sync_all().await;
                record_pass(&mut report, "scheduled", counts);
            }
        }
    }

    report
}

fn record_pass(
    report: &mut DaemonReport,
    pass: &'static str,
    counts: Result<SyncCounts, offerflow_core::ApplicationError>,
) {
    match counts {
        Ok(counts) => report.add(counts),
        Err(error) => {
            report.passes += 1;
            tracing::error!(
                event_name = "sync.daemon.pass_failed",
                pass,
                error = %error,
                "sync pass failed"
            );
        }
    }
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("installing ctrl-c handler")?;
    Ok(())
}

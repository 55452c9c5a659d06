//! A toy shell showing how the components are wired.
//!
//! Run with `RUST_LOG=pacer=debug cargo run --example shell_demo`.

use std::collections::HashSet;
use std::time::Duration;

use pacer::activation::{ActivationDwellScheduler, PrewarmOrderPlanner, ViewId};
use pacer::config::PacerConfig;
use pacer::persistence::{FlushTrigger, PersistenceCoalescingCoordinator, SaveError};
use pacer::session::{AdaptiveLoopPolicy, LoopSignals, run_session_loop};
use pacer::startup::StartupWorkCoordinator;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = PacerConfig::from_json_str(
        r#"{ "prewarm": { "today": ["workout", "progress", "coach"] } }"#,
    )?;

    let startup = StartupWorkCoordinator::new();
    if startup.claim_deferred_startup_work() {
        info!("running deferred startup work");
        startup.mark_deferred_startup_work_completed();
    }

    let planner = PrewarmOrderPlanner::from_config(&config.prewarm)?;
    let today = ViewId::new("today")?;
    let loaded: HashSet<ViewId> = [today.clone()].into();
    for view in planner.preload_order(&today, &loaded) {
        info!(%view, "prewarming");
    }

    let mut dashboard = ActivationDwellScheduler::from_config(&config.dwell);
    let token = dashboard.activate(Instant::now());
    sleep(dashboard.effective_delay(Duration::from_millis(50), Instant::now())).await;
    if dashboard.should_run_heavy_refresh(token, Instant::now()) {
        info!("dashboard refresh running");
    }

    let saves = PersistenceCoalescingCoordinator::new(
        config.persistence,
        || -> Result<(), SaveError> {
            info!("saving session");
            Ok(())
        },
    )?;

    let (signals_tx, signals_rx) = watch::channel(LoopSignals::default());
    let (payload_tx, mut payload_rx) = watch::channel(None);
    let started = Instant::now();
    let session = tokio::spawn(run_session_loop(
        AdaptiveLoopPolicy::new(config.polling),
        signals_rx,
        move || started.elapsed().as_secs(),
        payload_tx,
    ));

    for _ in 0..3 {
        payload_rx.changed().await?;
        let elapsed = *payload_rx.borrow_and_update();
        info!(?elapsed, "session payload published");
        saves.request_save();
        signals_tx.send_modify(|signals| signals.last_interaction_at = Some(Instant::now()));
    }

    signals_tx.send_modify(|signals| signals.stop = true);
    let stats = session.await?;
    saves.flush_now(FlushTrigger::Finish);
    info!(ticks = stats.ticks, published = stats.published, saves = ?saves.stats(), "done");
    Ok(())
}

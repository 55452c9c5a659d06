//! # pacer
//!
//! Decides *when* an interactive application's expensive background work may
//! run: view refreshes, periodic checks, session-loop ticks and saves. The work
//! itself stays with the embedding shell; every component here only answers
//! "now?", "not yet" or "not anymore".
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio::time::Instant;
//! use pacer::activation::ActivationDwellScheduler;
//! use pacer::config::PersistenceConfig;
//! use pacer::persistence::{FlushTrigger, PersistenceCoalescingCoordinator, SaveError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut dashboard = ActivationDwellScheduler::new(Duration::from_millis(500));
//!     let token = dashboard.activate(Instant::now());
//!     let delay = dashboard.effective_delay(Duration::from_millis(100), Instant::now());
//!     tokio::time::sleep(delay).await;
//!     if dashboard.should_run_heavy_refresh(token, Instant::now()) {
//!         // recompute the dashboard
//!     }
//!
//!     let saves = PersistenceCoalescingCoordinator::new(
//!         PersistenceConfig::default(),
//!         || -> Result<(), SaveError> { Ok(()) },
//!     )?;
//!     saves.request_save();
//!     saves.flush_now(FlushTrigger::Background);
//!     Ok(())
//! }
//! ```

// ── Decision components ───────────────────────────────────────────────────────
pub mod activation;
pub mod persistence;
pub mod session;
pub mod startup;

// ── Offline validation ────────────────────────────────────────────────────────
pub mod guardrail;

// ── Construction-time settings ────────────────────────────────────────────────
pub mod config;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use activation::{
    ActivationCooldownPolicy, ActivationDwellScheduler, ActivationToken, PrewarmOrderPlanner,
    ViewId,
};
pub use config::{ConfigError, PacerConfig};
pub use guardrail::{FrameSample, GuardrailError, PerformanceGuardrailEvaluator, TraceSummary};
pub use persistence::{FlushTrigger, PersistenceCoalescingCoordinator};
pub use session::{AdaptiveLoopPolicy, AppState};
pub use startup::StartupWorkCoordinator;

//! Async session loop: tick, publish on change, sleep adaptively.

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

use super::{AdaptiveLoopPolicy, AppState, PayloadPublisher};

/// Inputs the shell pushes into a running session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopSignals {
    pub app_state: AppState,
    pub last_interaction_at: Option<Instant>,
    /// Set to end the loop at its next wake-up.
    pub stop: bool,
}

/// Counters returned when the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionLoopStats {
    pub ticks: u64,
    pub published: u64,
}

/// Runs the session loop until `signals` requests a stop or every signal
/// sender is dropped.
///
/// Each tick calls `compute` for the current payload and sends it on `output`
/// only when it differs from the last one sent. Between ticks the loop sleeps
/// for the policy's interval; a signal change recomputes the interval from the
/// start of the current wait, so a fresh interaction shortens it immediately.
///
/// # Examples
///
/// ```rust,no_run
/// use tokio::sync::watch;
/// use pacer::session::{AdaptiveLoopPolicy, LoopSignals, run_session_loop};
///
/// # async fn demo() {
/// let (signals_tx, signals_rx) = watch::channel(LoopSignals::default());
/// let (payload_tx, mut payload_rx) = watch::channel(None::<u32>);
/// let session = tokio::spawn(run_session_loop(
///     AdaptiveLoopPolicy::default(),
///     signals_rx,
///     || 42,
///     payload_tx,
/// ));
///
/// payload_rx.changed().await.unwrap();
/// signals_tx.send_modify(|signals| signals.stop = true);
/// let stats = session.await.unwrap();
/// assert_eq!(stats.published, 1);
/// # }
/// ```
pub async fn run_session_loop<T, F>(
    policy: AdaptiveLoopPolicy,
    mut signals: watch::Receiver<LoopSignals>,
    mut compute: F,
    output: watch::Sender<Option<T>>,
) -> SessionLoopStats
where
    T: PartialEq + Clone,
    F: FnMut() -> T,
{
    let mut publisher = PayloadPublisher::new();
    let mut stats = SessionLoopStats::default();

    loop {
        let current = *signals.borrow_and_update();
        if current.stop {
            break;
        }

        stats.ticks += 1;
        if let Some(payload) = publisher.offer(compute()) {
            output.send_replace(Some(payload));
            stats.published += 1;
        }

        let wait_started = Instant::now();
        let mut interval =
            policy.polling_interval(current.app_state, current.last_interaction_at, wait_started);

        loop {
            tokio::select! {
                _ = sleep_until(wait_started + interval) => break,
                changed = signals.changed() => {
                    if changed.is_err() {
                        debug!(ticks = stats.ticks, "session signals closed");
                        return stats;
                    }
                    let latest = *signals.borrow_and_update();
                    if latest.stop {
                        debug!(
                            ticks = stats.ticks,
                            published = stats.published,
                            "session loop stopped"
                        );
                        return stats;
                    }
                    interval = policy.polling_interval(
                        latest.app_state,
                        latest.last_interaction_at,
                        Instant::now(),
                    );
                }
            }
        }
    }

    debug!(
        ticks = stats.ticks,
        published = stats.published,
        "session loop stopped"
    );
    stats
}

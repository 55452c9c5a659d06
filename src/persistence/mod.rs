//! Coalesced persistence: many rapid edits, one deferred save.
//!
//! [`PersistenceCoalescingCoordinator`] debounces [`request_save`] calls into a
//! single deferred flush, bounded so the first unsaved edit never waits longer
//! than the configured maximum, and offers [`flush_now`] for lifecycle events
//! that must not lose data.
//!
//! ## Timer discipline
//!
//! Each scheduled flush is a tokio task tagged with a generation number. Any
//! reschedule, cancel, forced flush or teardown bumps the generation under the
//! state lock, and the timer re-checks it at fire time, so a stale timer is a
//! no-op even if aborting its task came too late. Every save runs while
//! holding a save gate, and the timer's generation check happens inside that
//! gate, so saves never overlap and a forced flush always wins over a
//! scheduled one for the same window.
//!
//! A scheduled flush waits for the gate and runs the handler on tokio's
//! blocking pool, never on a runtime worker.
//!
//! [`request_save`]: PersistenceCoalescingCoordinator::request_save
//! [`flush_now`]: PersistenceCoalescingCoordinator::flush_now

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{self, JoinHandle};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, PersistenceConfig};

/// Error type a save handler may return.
pub type SaveError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The owner's save operation.
///
/// Implemented for any `Fn() -> Result<(), SaveError>` closure. The handler
/// may block; it runs on the caller's thread for [`flush_now`] and on tokio's
/// blocking pool for scheduled flushes.
///
/// [`flush_now`]: PersistenceCoalescingCoordinator::flush_now
pub trait SaveHandler: Send + Sync + 'static {
    fn save(&self) -> Result<(), SaveError>;
}

impl<F> SaveHandler for F
where
    F: Fn() -> Result<(), SaveError> + Send + Sync + 'static,
{
    fn save(&self) -> Result<(), SaveError> {
        (self)()
    }
}

/// Why a forced flush was requested. Informational only: every trigger saves
/// the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushTrigger {
    /// The session finished.
    Finish,
    /// The session was stopped early.
    Stop,
    /// The app moved to the background.
    Background,
    /// The editing screen was dismissed.
    Dismissal,
    /// The user asked to save.
    Manual,
}

impl FlushTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Finish => "finish",
            Self::Stop => "stop",
            Self::Background => "background",
            Self::Dismissal => "dismissal",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Save outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub completed: u64,
    pub failed: u64,
}

// The first unflushed mutation of the current window and its scheduled flush.
#[derive(Debug)]
struct PendingSaveWindow {
    first_pending_at: Instant,
    timer: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct WindowState {
    generation: u64,
    pending: Option<PendingSaveWindow>,
    closed: bool,
    stats: SaveStats,
}

impl WindowState {
    // Invalidates any scheduled flush and returns whether one was pending.
    fn invalidate(&mut self) -> bool {
        self.generation += 1;
        match self.pending.take() {
            Some(window) => {
                window.timer.abort();
                true
            }
            None => false,
        }
    }
}

struct Shared {
    config: PersistenceConfig,
    handler: Box<dyn SaveHandler>,
    state: Mutex<WindowState>,
    save_gate: Mutex<()>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, WindowState> {
        lock(&self.state)
    }

    // Timer body: saves only if `generation` still names the pending window.
    fn fire(&self, generation: u64) {
        let _gate = lock(&self.save_gate);
        {
            let mut state = self.state();
            if state.closed || state.generation != generation || state.pending.is_none() {
                debug!(generation, "stale scheduled flush skipped");
                return;
            }
            state.pending = None;
        }
        self.run_save("scheduled");
    }

    // Must be called with the save gate held.
    fn run_save(&self, reason: &str) {
        match self.handler.save() {
            Ok(()) => {
                self.state().stats.completed += 1;
                debug!(reason, "save completed");
            }
            Err(error) => {
                self.state().stats.failed += 1;
                warn!(reason, error = %error, "save failed, will retry on the next edit or flush");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Debounces save requests into deferred flushes with a hard latency ceiling.
///
/// Dropping the coordinator (or calling [`shutdown`](Self::shutdown)) cancels
/// the pending flush without saving; flush first if the edits must survive.
///
/// # Examples
///
/// ```rust,no_run
/// use pacer::config::PersistenceConfig;
/// use pacer::persistence::{FlushTrigger, PersistenceCoalescingCoordinator, SaveError};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let coordinator = PersistenceCoalescingCoordinator::new(
///     PersistenceConfig::default(),
///     || -> Result<(), SaveError> { Ok(()) },
/// )?;
///
/// coordinator.request_save();
/// coordinator.request_save();
/// coordinator.flush_now(FlushTrigger::Background);
/// # Ok(())
/// # }
/// ```
pub struct PersistenceCoalescingCoordinator {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl fmt::Debug for PersistenceCoalescingCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceCoalescingCoordinator")
            .field("config", &self.shared.config)
            .field("state", &*self.shared.state())
            .finish()
    }
}

impl PersistenceCoalescingCoordinator {
    /// Creates a coordinator whose timers run on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoRuntime`] outside a tokio runtime, or the
    /// validation error for an inconsistent `config`.
    pub fn new<H>(config: PersistenceConfig, handler: H) -> Result<Self, ConfigError>
    where
        H: SaveHandler,
    {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        Self::with_runtime(config, handler, runtime)
    }

    /// Creates a coordinator whose timers run on `runtime`.
    pub fn with_runtime<H>(
        config: PersistenceConfig,
        handler: H,
        runtime: Handle,
    ) -> Result<Self, ConfigError>
    where
        H: SaveHandler,
    {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                handler: Box::new(handler),
                state: Mutex::new(WindowState::default()),
                save_gate: Mutex::new(()),
            }),
            runtime,
        })
    }

    /// Records a mutation and (re)schedules the deferred flush.
    ///
    /// The flush runs `coalescing_delay` after the latest request, but never
    /// later than `max_unsaved_interval` after the first request of the window.
    pub fn request_save(&self) {
        let now = Instant::now();
        let mut state = self.shared.state();
        if state.closed {
            debug!("save requested after shutdown, ignored");
            return;
        }

        let first_pending_at = state
            .pending
            .as_ref()
            .map_or(now, |window| window.first_pending_at);
        state.invalidate();

        let delay = self.flush_delay(now.saturating_duration_since(first_pending_at));
        let generation = state.generation;
        let shared = Arc::clone(&self.shared);
        let timer = self.runtime.spawn(async move {
            sleep(delay).await;
            if let Err(error) = task::spawn_blocking(move || shared.fire(generation)).await {
                warn!(generation, error = %error, "scheduled flush did not complete");
            }
        });

        debug!(generation, delay_ms = delay.as_millis() as u64, "flush scheduled");
        state.pending = Some(PendingSaveWindow {
            first_pending_at,
            timer,
        });
    }

    /// Cancels any scheduled flush and saves immediately on this thread.
    pub fn flush_now(&self, trigger: FlushTrigger) {
        let _gate = lock(&self.shared.save_gate);
        {
            let mut state = self.shared.state();
            if state.closed {
                debug!(%trigger, "forced flush after shutdown, ignored");
                return;
            }
            let had_pending = state.invalidate();
            info!(%trigger, had_pending, "forced flush");
        }
        self.shared.run_save(trigger.as_str());
    }

    /// Cancels any scheduled flush without saving.
    pub fn cancel_pending(&self) {
        let had_pending = self.shared.state().invalidate();
        debug!(had_pending, "pending save cancelled");
    }

    /// Cancels the pending flush and refuses all further work. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.shared.state();
        if state.closed {
            return;
        }
        state.closed = true;
        let had_pending = state.invalidate();
        debug!(had_pending, "persistence coordinator shut down");
    }

    pub fn has_pending_save(&self) -> bool {
        self.shared.state().pending.is_some()
    }

    /// When the oldest unsaved mutation of the current window was recorded.
    pub fn first_pending_at(&self) -> Option<Instant> {
        self.shared
            .state()
            .pending
            .as_ref()
            .map(|window| window.first_pending_at)
    }

    pub fn stats(&self) -> SaveStats {
        self.shared.state().stats
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.shared.config
    }

    fn flush_delay(&self, elapsed_since_first_pending: Duration) -> Duration {
        let config = &self.shared.config;
        let remaining = config
            .max_unsaved_interval
            .saturating_sub(elapsed_since_first_pending);
        config.coalescing_delay.min(remaining)
    }
}

impl Drop for PersistenceCoalescingCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn config(coalescing: u64, max_unsaved: u64) -> PersistenceConfig {
        PersistenceConfig {
            coalescing_delay: ms(coalescing),
            max_unsaved_interval: ms(max_unsaved),
        }
    }

    fn recording_handler(log: Arc<Mutex<Vec<Instant>>>) -> impl SaveHandler {
        move || -> Result<(), SaveError> {
            log.lock().unwrap().push(Instant::now());
            Ok(())
        }
    }

    fn recorded(log: &Arc<Mutex<Vec<Instant>>>) -> Vec<Instant> {
        log.lock().unwrap().clone()
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            sleep(ms(5)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_into_one_save() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = PersistenceCoalescingCoordinator::new(
            config(120, 2_000),
            recording_handler(log.clone()),
        )
        .unwrap();
        let start = Instant::now();

        coordinator.request_save();
        sleep(ms(10)).await;
        coordinator.request_save();
        sleep(ms(10)).await;
        coordinator.request_save();
        assert!(coordinator.has_pending_save());
        assert_eq!(coordinator.first_pending_at(), Some(start));

        sleep(ms(500)).await;

        let saves = recorded(&log);
        assert_eq!(saves.len(), 1);
        let latency = saves[0] - start;
        assert!(latency >= ms(140) && latency < ms(145), "{latency:?}");
        assert!(!coordinator.has_pending_save());
        assert_eq!(coordinator.stats().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_requests_never_exceed_max_unsaved() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = PersistenceCoalescingCoordinator::new(
            config(120, 300),
            recording_handler(log.clone()),
        )
        .unwrap();
        let start = Instant::now();

        // Requests every 40ms from 0ms to 360ms.
        for _ in 0..10 {
            coordinator.request_save();
            sleep(ms(40)).await;
        }
        sleep(ms(500)).await;

        let saves = recorded(&log);
        assert_eq!(saves.len(), 2);
        let first = saves[0] - start;
        assert!(first >= ms(300) && first < ms(305), "{first:?}");
        // Second window opens at 320ms; its last request at 360ms waits the full delay.
        let second = saves[1] - start;
        assert!(second >= ms(480) && second < ms(485), "{second:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_supersedes_scheduled_flush() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = PersistenceCoalescingCoordinator::new(
            config(120, 2_000),
            recording_handler(log.clone()),
        )
        .unwrap();

        coordinator.request_save();
        sleep(ms(119)).await;
        coordinator.flush_now(FlushTrigger::Background);
        assert_eq!(recorded(&log).len(), 1);
        assert!(!coordinator.has_pending_save());

        sleep(ms(500)).await;
        assert_eq!(recorded(&log).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_flush_without_pending_still_saves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = PersistenceCoalescingCoordinator::new(
            config(120, 2_000),
            recording_handler(log.clone()),
        )
        .unwrap();

        coordinator.flush_now(FlushTrigger::Manual);
        coordinator.flush_now(FlushTrigger::Finish);
        assert_eq!(recorded(&log).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_discards_without_saving() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = PersistenceCoalescingCoordinator::new(
            config(120, 2_000),
            recording_handler(log.clone()),
        )
        .unwrap();

        coordinator.request_save();
        coordinator.cancel_pending();
        sleep(ms(500)).await;

        assert!(recorded(&log).is_empty());
        assert!(coordinator.first_pending_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_prevents_pending_and_future_saves() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = PersistenceCoalescingCoordinator::new(
            config(120, 2_000),
            recording_handler(log.clone()),
        )
        .unwrap();

        coordinator.request_save();
        coordinator.shutdown();
        coordinator.shutdown();
        coordinator.request_save();
        coordinator.flush_now(FlushTrigger::Stop);
        sleep(ms(500)).await;

        assert!(recorded(&log).is_empty());
        assert!(!coordinator.has_pending_save());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_coordinator_cancels_timer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let coordinator = PersistenceCoalescingCoordinator::new(
            config(120, 2_000),
            recording_handler(log.clone()),
        )
        .unwrap();

        coordinator.request_save();
        drop(coordinator);
        sleep(ms(500)).await;

        assert!(recorded(&log).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_is_swallowed_and_retried_by_next_request() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            move || -> Result<(), SaveError> {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("disk full".into())
                } else {
                    Ok(())
                }
            }
        };
        let coordinator =
            PersistenceCoalescingCoordinator::new(config(50, 1_000), handler).unwrap();

        coordinator.request_save();
        sleep(ms(100)).await;
        assert_eq!(
            coordinator.stats(),
            SaveStats {
                completed: 0,
                failed: 1
            }
        );

        coordinator.request_save();
        sleep(ms(100)).await;
        assert_eq!(
            coordinator.stats(),
            SaveStats {
                completed: 1,
                failed: 1
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn saves_never_overlap() {
        let in_progress = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));
        let handler = {
            let in_progress = Arc::clone(&in_progress);
            let overlapped = Arc::clone(&overlapped);
            move || -> Result<(), SaveError> {
                if in_progress.swap(true, Ordering::SeqCst) {
                    overlapped.store(true, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(1));
                in_progress.store(false, Ordering::SeqCst);
                Ok(())
            }
        };
        let coordinator =
            Arc::new(PersistenceCoalescingCoordinator::new(config(1, 5), handler).unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|worker| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    for round in 0..20 {
                        if (worker + round) % 3 == 0 {
                            coordinator.flush_now(FlushTrigger::Manual);
                        } else {
                            coordinator.request_save();
                        }
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        coordinator.flush_now(FlushTrigger::Finish);

        assert!(!overlapped.load(Ordering::SeqCst));
        assert!(coordinator.stats().completed > 0);
        assert_eq!(coordinator.stats().failed, 0);
    }

    #[tokio::test]
    async fn blocking_handler_does_not_stall_the_runtime() {
        let handler = || -> Result<(), SaveError> {
            std::thread::sleep(ms(400));
            Ok(())
        };
        let coordinator =
            PersistenceCoalescingCoordinator::new(config(10, 1_000), handler).unwrap();

        let started = std::time::Instant::now();
        coordinator.request_save();
        sleep(ms(50)).await;
        let observed = started.elapsed();
        assert!(observed < ms(300), "50ms timer observed after {observed:?}");

        wait_for(|| coordinator.stats().completed == 1).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timer_parked_on_save_gate_saves_its_window_once() {
        let (release, parked) = std::sync::mpsc::channel::<()>();
        let parked = Mutex::new(parked);
        let calls = Arc::new(AtomicU32::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            move || -> Result<(), SaveError> {
                calls.fetch_add(1, Ordering::SeqCst);
                let _ = parked.lock().unwrap().recv();
                Ok(())
            }
        };
        let coordinator =
            Arc::new(PersistenceCoalescingCoordinator::new(config(10, 1_000), handler).unwrap());
        let forced_flush = || {
            let coordinator = Arc::clone(&coordinator);
            task::spawn_blocking(move || coordinator.flush_now(FlushTrigger::Manual))
        };

        // A forced save holds the gate while a new window's timer wakes up.
        let forced = forced_flush();
        wait_for(|| calls.load(Ordering::SeqCst) == 1).await;
        coordinator.request_save();
        sleep(ms(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        forced.await.unwrap();
        wait_for(|| calls.load(Ordering::SeqCst) == 2).await;
        release.send(()).unwrap();
        wait_for(|| coordinator.stats().completed == 2).await;
        sleep(ms(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!coordinator.has_pending_save());

        // Same interleaving, but the window is cancelled while its timer waits.
        let forced = forced_flush();
        wait_for(|| calls.load(Ordering::SeqCst) == 3).await;
        coordinator.request_save();
        sleep(ms(50)).await;
        coordinator.cancel_pending();

        release.send(()).unwrap();
        forced.await.unwrap();
        sleep(ms(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.stats().completed, 3);
    }

    #[test]
    fn construction_outside_runtime_is_rejected() {
        let result = PersistenceCoalescingCoordinator::new(
            PersistenceConfig::default(),
            || -> Result<(), SaveError> { Ok(()) },
        );
        assert!(matches!(result, Err(ConfigError::NoRuntime)));
    }

    #[tokio::test]
    async fn inconsistent_config_is_rejected() {
        let result = PersistenceCoalescingCoordinator::new(
            config(500, 100),
            || -> Result<(), SaveError> { Ok(()) },
        );
        assert!(matches!(
            result,
            Err(ConfigError::CoalescingExceedsMaxUnsaved { .. })
        ));
    }

    #[test]
    fn trigger_names() {
        assert_eq!(FlushTrigger::Dismissal.to_string(), "dismissal");
        assert_eq!(FlushTrigger::Background.as_str(), "background");
    }
}

//! Adaptive polling for a continuously-updating active session.
//!
//! [`AdaptiveLoopPolicy`] picks how often the session loop ticks based on
//! whether the app is in front and how recently the user interacted.
//! [`PayloadPublisher`] suppresses republishing a derived payload that did not
//! change. [`run_session_loop`] drives both under tokio.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::PollingConfig;

mod driver;

pub use driver::{LoopSignals, SessionLoopStats, run_session_loop};

/// Foreground/background state reported by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppState {
    #[default]
    Active,
    Inactive,
    Background,
}

/// Chooses the polling interval for the session loop.
///
/// No ordering between the three intervals is enforced here;
/// [`PollingConfig::check_ordering`] offers that check separately.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveLoopPolicy {
    config: PollingConfig,
}

impl AdaptiveLoopPolicy {
    pub fn new(config: PollingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    /// Interval until the next tick.
    ///
    /// - not [`AppState::Active`] → background interval
    /// - interaction within the boost window → boost interval
    /// - otherwise (including no interaction yet) → foreground interval
    pub fn polling_interval(
        &self,
        app_state: AppState,
        last_interaction_at: Option<Instant>,
        now: Instant,
    ) -> Duration {
        if app_state != AppState::Active {
            return self.config.background_interval;
        }
        let recently_interacted = last_interaction_at.is_some_and(|at| {
            now.saturating_duration_since(at) <= self.config.interaction_boost_window
        });
        if recently_interacted {
            self.config.boost_interval
        } else {
            self.config.foreground_interval
        }
    }
}

impl Default for AdaptiveLoopPolicy {
    fn default() -> Self {
        Self::new(PollingConfig::default())
    }
}

/// Whether `next` should be published given the last published value.
pub fn should_publish<T: PartialEq>(previous: Option<&T>, next: &T) -> bool {
    previous != Some(next)
}

/// Remembers the last published payload and only lets changes through.
#[derive(Debug, Clone)]
pub struct PayloadPublisher<T> {
    last: Option<T>,
}

impl<T> Default for PayloadPublisher<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

impl<T: PartialEq + Clone> PayloadPublisher<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the payload to publish, or `None` when it equals the last one.
    pub fn offer(&mut self, next: T) -> Option<T> {
        if !should_publish(self.last.as_ref(), &next) {
            return None;
        }
        self.last = Some(next.clone());
        Some(next)
    }

    pub fn last(&self) -> Option<&T> {
        self.last.as_ref()
    }

    /// Forgets the snapshot so the next offer is always published.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

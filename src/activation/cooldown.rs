//! Cooldown gating for full activations and periodic checks.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::CooldownConfig;

/// Last-run bookkeeping for one recurring operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownState {
    last_run_at: Option<Instant>,
}

impl CooldownState {
    pub fn has_run(&self) -> bool {
        self.last_run_at.is_some()
    }

    pub fn last_run_at(&self) -> Option<Instant> {
        self.last_run_at
    }

    /// Whether `cooldown` has passed since the last run, or nothing ran yet.
    pub fn permits(&self, cooldown: Duration, now: Instant) -> bool {
        match self.last_run_at {
            Some(last) => now.saturating_duration_since(last) >= cooldown,
            None => true,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_run_at = Some(now);
    }
}

/// Two independent cooldown clocks: one for a full activation pass and one
/// for a lighter periodic check.
///
/// Pending urgent work bypasses the full-activation cooldown; the periodic
/// check has no override.
#[derive(Debug, Clone)]
pub struct ActivationCooldownPolicy {
    full_activation_cooldown: Duration,
    check_cooldown: Duration,
    full_activation: CooldownState,
    periodic_check: CooldownState,
}

impl ActivationCooldownPolicy {
    pub fn new(full_activation_cooldown: Duration, check_cooldown: Duration) -> Self {
        Self {
            full_activation_cooldown,
            check_cooldown,
            full_activation: CooldownState::default(),
            periodic_check: CooldownState::default(),
        }
    }

    pub fn from_config(config: &CooldownConfig) -> Self {
        Self::new(config.full_activation_cooldown, config.check_cooldown)
    }

    pub fn should_run_full_activation(&self, has_pending_urgent_work: bool, now: Instant) -> bool {
        has_pending_urgent_work
            || self
                .full_activation
                .permits(self.full_activation_cooldown, now)
    }

    pub fn mark_full_activation_run(&mut self, now: Instant) {
        self.full_activation.record(now);
    }

    pub fn should_run_periodic_check(&self, now: Instant) -> bool {
        self.periodic_check.permits(self.check_cooldown, now)
    }

    pub fn mark_periodic_check_run(&mut self, now: Instant) {
        self.periodic_check.record(now);
    }

    pub fn full_activation_state(&self) -> CooldownState {
        self.full_activation
    }

    pub fn periodic_check_state(&self) -> CooldownState {
        self.periodic_check
    }
}

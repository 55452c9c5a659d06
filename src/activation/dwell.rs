//! Dwell-gated heavy refreshes with stale-activation detection.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::DwellConfig;

/// Identifies one activation episode of a view.
///
/// Only the token returned by the most recent [`ActivationDwellScheduler::activate`]
/// is accepted; any later activate or deactivate supersedes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivationToken {
    sequence: u64,
    issued_at: Instant,
}

impl ActivationToken {
    /// The instant the token was issued, i.e. when the view became visible.
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }
}

/// Per-view scheduler that defers heavy refreshes until the view has been
/// visible for `minimum_dwell`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use tokio::time::Instant;
/// use pacer::activation::ActivationDwellScheduler;
///
/// let mut scheduler = ActivationDwellScheduler::new(Duration::from_millis(500));
/// let shown = Instant::now();
/// let token = scheduler.activate(shown);
///
/// assert_eq!(
///     scheduler.effective_delay(Duration::from_millis(120), shown),
///     Duration::from_millis(500),
/// );
/// assert!(!scheduler.should_run_heavy_refresh(token, shown + Duration::from_millis(490)));
/// assert!(scheduler.should_run_heavy_refresh(token, shown + Duration::from_millis(500)));
/// ```
#[derive(Debug)]
pub struct ActivationDwellScheduler {
    minimum_dwell: Duration,
    sequence: u64,
    activated_at: Option<Instant>,
}

impl ActivationDwellScheduler {
    pub fn new(minimum_dwell: Duration) -> Self {
        Self {
            minimum_dwell,
            sequence: 0,
            activated_at: None,
        }
    }

    pub fn from_config(config: &DwellConfig) -> Self {
        Self::new(config.minimum_dwell)
    }

    pub fn minimum_dwell(&self) -> Duration {
        self.minimum_dwell
    }

    /// Records that the view became visible at `now` and returns the token any
    /// refresh scheduled for this visit must present.
    pub fn activate(&mut self, now: Instant) -> ActivationToken {
        self.sequence += 1;
        self.activated_at = Some(now);
        debug!(sequence = self.sequence, "view activated");
        ActivationToken {
            sequence: self.sequence,
            issued_at: now,
        }
    }

    /// Records that the view left the screen, invalidating the current token.
    pub fn deactivate(&mut self) {
        self.sequence += 1;
        self.activated_at = None;
        debug!(sequence = self.sequence, "view deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.activated_at.is_some()
    }

    /// The token of the current visit, if the view is visible.
    pub fn current_token(&self) -> Option<ActivationToken> {
        self.activated_at.map(|issued_at| ActivationToken {
            sequence: self.sequence,
            issued_at,
        })
    }

    /// Delay to use when scheduling a heavy refresh at `now`.
    ///
    /// While active this is the larger of `requested` and the dwell time still
    /// remaining; while inactive `requested` is returned unchanged.
    pub fn effective_delay(&self, requested: Duration, now: Instant) -> Duration {
        match self.activated_at {
            Some(activated_at) => {
                let elapsed = now.saturating_duration_since(activated_at);
                requested.max(self.minimum_dwell.saturating_sub(elapsed))
            }
            None => requested,
        }
    }

    /// Whether a refresh holding `token` may run at `now`.
    ///
    /// False for tokens from an earlier visit and before the dwell time has
    /// elapsed. Callers drop the refresh on `false`.
    pub fn should_run_heavy_refresh(&self, token: ActivationToken, now: Instant) -> bool {
        let Some(activated_at) = self.activated_at else {
            return false;
        };
        if token.sequence != self.sequence {
            debug!(
                token = token.sequence,
                current = self.sequence,
                "stale refresh dropped"
            );
            return false;
        }
        now.saturating_duration_since(activated_at) >= self.minimum_dwell
    }
}

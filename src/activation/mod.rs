//! View activation gating: when a visible view may do its expensive work.
//!
//! This module provides the per-view decision components the shell consults on
//! visibility and selection changes:
//!
//! - [`ActivationDwellScheduler`]: holds a heavy refresh back until the view
//!   has stayed visible for a minimum dwell time, and rejects refreshes that
//!   were scheduled for an earlier visit.
//! - [`ActivationCooldownPolicy`]: keeps a full activation and a periodic
//!   check from re-running inside their cooldown windows.
//! - [`PrewarmOrderPlanner`]: orders the not-yet-loaded views for low-priority
//!   warm-up after a selection.
//!
//! All three are plain synchronous values owned by one scheduling context. They
//! never perform the work they gate.

pub mod cooldown;
pub mod dwell;
pub mod prewarm;

pub use cooldown::{ActivationCooldownPolicy, CooldownState};
pub use dwell::{ActivationDwellScheduler, ActivationToken};
pub use prewarm::{PrewarmOrderPlanner, ViewId};

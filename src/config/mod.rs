//! Construction-time settings for every scheduling component.
//!
//! Each component takes its own section ([`DwellConfig`], [`CooldownConfig`],
//! [`PollingConfig`], [`PersistenceConfig`], [`GuardrailConfig`]). The shell can
//! build them in code or hand a JSON document to [`PacerConfig::from_json_str`].
//! Durations are serialized as whole milliseconds under `*_ms` keys.
//!
//! Nothing here reads the environment or the filesystem.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },

    #[error(
        "coalescing delay ({coalescing:?}) exceeds the maximum unsaved interval ({max_unsaved:?})"
    )]
    CoalescingExceedsMaxUnsaved {
        coalescing: Duration,
        max_unsaved: Duration,
    },

    #[error("{field} must be within [0, 1], got {value}")]
    RatioOutOfRange { field: &'static str, value: f64 },

    #[error("{field} must not be empty")]
    EmptyIdentifier { field: &'static str },

    #[error("view `{view}` cannot list itself as a prewarm candidate")]
    SelfRanking { view: String },

    #[error("boost interval ({boost:?}) is slower than the foreground interval ({foreground:?})")]
    BoostSlowerThanForeground {
        boost: Duration,
        foreground: Duration,
    },

    #[error("no tokio runtime available to run deferred saves")]
    NoRuntime,
}

/// Serde adapter storing a [`Duration`] as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Settings for [`ActivationDwellScheduler`](crate::activation::ActivationDwellScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    /// How long a view must stay visible before its heavy refresh may run.
    #[serde(rename = "minimum_dwell_ms", with = "millis")]
    pub minimum_dwell: Duration,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            minimum_dwell: Duration::from_millis(500),
        }
    }
}

/// Settings for [`ActivationCooldownPolicy`](crate::activation::ActivationCooldownPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    #[serde(rename = "full_activation_cooldown_ms", with = "millis")]
    pub full_activation_cooldown: Duration,

    #[serde(rename = "check_cooldown_ms", with = "millis")]
    pub check_cooldown: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            full_activation_cooldown: Duration::from_secs(45),
            check_cooldown: Duration::from_secs(300),
        }
    }
}

/// Settings for [`AdaptiveLoopPolicy`](crate::session::AdaptiveLoopPolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    #[serde(rename = "foreground_interval_ms", with = "millis")]
    pub foreground_interval: Duration,

    #[serde(rename = "boost_interval_ms", with = "millis")]
    pub boost_interval: Duration,

    #[serde(rename = "background_interval_ms", with = "millis")]
    pub background_interval: Duration,

    /// How recent an interaction must be for the boost interval to apply.
    #[serde(rename = "interaction_boost_window_ms", with = "millis")]
    pub interaction_boost_window: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            foreground_interval: Duration::from_millis(2_000),
            boost_interval: Duration::from_millis(750),
            background_interval: Duration::from_millis(500),
            interaction_boost_window: Duration::from_secs(8),
        }
    }
}

impl PollingConfig {
    /// Rejects zero polling intervals.
    ///
    /// Relative ordering of the intervals is not checked here; see
    /// [`check_ordering`](Self::check_ordering).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("foreground_interval", self.foreground_interval),
            ("boost_interval", self.boost_interval),
            ("background_interval", self.background_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::NonPositive { field });
            }
        }
        Ok(())
    }

    /// Opt-in check that the boost interval actually polls at least as often
    /// as the plain foreground interval.
    pub fn check_ordering(&self) -> Result<(), ConfigError> {
        if self.boost_interval > self.foreground_interval {
            return Err(ConfigError::BoostSlowerThanForeground {
                boost: self.boost_interval,
                foreground: self.foreground_interval,
            });
        }
        Ok(())
    }
}

/// Settings for [`crate::persistence::PersistenceCoalescingCoordinator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Quiet period after the latest request before the save runs.
    #[serde(rename = "coalescing_delay_ms", with = "millis")]
    pub coalescing_delay: Duration,

    /// Upper bound on how long the first unsaved edit may wait.
    #[serde(rename = "max_unsaved_interval_ms", with = "millis")]
    pub max_unsaved_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            coalescing_delay: Duration::from_millis(120),
            max_unsaved_interval: Duration::from_secs(2),
        }
    }
}

impl PersistenceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_unsaved_interval.is_zero() {
            return Err(ConfigError::NonPositive {
                field: "max_unsaved_interval",
            });
        }
        if self.coalescing_delay > self.max_unsaved_interval {
            return Err(ConfigError::CoalescingExceedsMaxUnsaved {
                coalescing: self.coalescing_delay,
                max_unsaved: self.max_unsaved_interval,
            });
        }
        Ok(())
    }
}

/// Pass/fail limits applied to a [`TraceSummary`](crate::guardrail::TraceSummary).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailThresholds {
    pub min_own_module_share: f64,
    pub max_background_share: f64,
}

impl Default for GuardrailThresholds {
    fn default() -> Self {
        Self {
            min_own_module_share: 0.5,
            max_background_share: 0.25,
        }
    }
}

impl GuardrailThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("min_own_module_share", self.min_own_module_share),
            ("max_background_share", self.max_background_share),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::RatioOutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// Which frames belong to the application and how their symbols are tagged.
///
/// Keyword matching is a case-sensitive substring test against the symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    /// Module name identifying the application's own frames.
    pub own_module: String,
    /// Symbols containing any of these belong to the feature under test.
    pub target_feature_keywords: Vec<String>,
    /// Symbols containing any of these are background work competing with it.
    pub background_keywords: Vec<String>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| (*w).to_owned()).collect();
        Self {
            own_module: "App".to_owned(),
            target_feature_keywords: owned(&["ActiveSession", "Workout", "SetLogging"]),
            background_keywords: owned(&[
                "Refresh",
                "Prewarm",
                "Persist",
                "Sync",
                "Recompute",
                "Score",
            ]),
        }
    }
}

impl ClassificationRules {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.own_module.trim().is_empty() {
            return Err(ConfigError::EmptyIdentifier {
                field: "own_module",
            });
        }
        if self.target_feature_keywords.iter().any(|k| k.is_empty()) {
            return Err(ConfigError::EmptyIdentifier {
                field: "target_feature_keywords",
            });
        }
        if self.background_keywords.iter().any(|k| k.is_empty()) {
            return Err(ConfigError::EmptyIdentifier {
                field: "background_keywords",
            });
        }
        Ok(())
    }
}

/// Settings for [`PerformanceGuardrailEvaluator`](crate::guardrail::PerformanceGuardrailEvaluator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    pub rules: ClassificationRules,
    pub thresholds: GuardrailThresholds,
    /// Number of own-module symbols listed in a summary.
    pub top_frame_limit: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            rules: ClassificationRules::default(),
            thresholds: GuardrailThresholds::default(),
            top_frame_limit: 10,
        }
    }
}

impl GuardrailConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rules.validate()?;
        self.thresholds.validate()?;
        if self.top_frame_limit == 0 {
            return Err(ConfigError::NonPositive {
                field: "top_frame_limit",
            });
        }
        Ok(())
    }
}

/// Every component's settings in one document.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pacer::config::PacerConfig;
///
/// let config = PacerConfig::from_json_str(
///     r#"{ "persistence": { "coalescing_delay_ms": 80, "max_unsaved_interval_ms": 1500 } }"#,
/// ).unwrap();
/// assert_eq!(config.persistence.coalescing_delay, Duration::from_millis(80));
/// assert_eq!(config.dwell.minimum_dwell, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacerConfig {
    pub dwell: DwellConfig,
    pub cooldown: CooldownConfig,
    pub polling: PollingConfig,
    pub persistence: PersistenceConfig,
    pub guardrail: GuardrailConfig,
    /// Likely-next views keyed by the selected view.
    pub prewarm: BTreeMap<String, Vec<String>>,
}

impl PacerConfig {
    /// Parses and validates a JSON configuration document.
    ///
    /// Missing sections fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and the relevant
    /// validation variant for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.polling.validate()?;
        self.persistence.validate()?;
        self.guardrail.validate()?;
        for (view, next) in &self.prewarm {
            if view.is_empty() || next.iter().any(|candidate| candidate.is_empty()) {
                return Err(ConfigError::EmptyIdentifier { field: "prewarm" });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PacerConfig::default().validate().unwrap();
    }

    #[test]
    fn default_polling_is_ordered() {
        PollingConfig::default().check_ordering().unwrap();
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = PacerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PacerConfig::default());
    }

    #[test]
    fn durations_read_as_millis() {
        let config = PacerConfig::from_json_str(
            r#"{
                "dwell": { "minimum_dwell_ms": 750 },
                "cooldown": { "full_activation_cooldown_ms": 30000 },
                "polling": { "boost_interval_ms": 250 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.dwell.minimum_dwell, Duration::from_millis(750));
        assert_eq!(
            config.cooldown.full_activation_cooldown,
            Duration::from_secs(30)
        );
        assert_eq!(config.cooldown.check_cooldown, Duration::from_secs(300));
        assert_eq!(config.polling.boost_interval, Duration::from_millis(250));
    }

    #[test]
    fn serialized_form_round_trips_through_millis() {
        let json = serde_json::to_value(PersistenceConfig::default()).unwrap();
        assert_eq!(json["coalescing_delay_ms"], 120);
        assert_eq!(json["max_unsaved_interval_ms"], 2000);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = PacerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn coalescing_longer_than_max_unsaved_is_rejected() {
        let err = PacerConfig::from_json_str(
            r#"{ "persistence": {
                "coalescing_delay_ms": 3000, "max_unsaved_interval_ms": 2000 } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::CoalescingExceedsMaxUnsaved { .. }));
    }

    #[test]
    fn zero_max_unsaved_is_rejected() {
        let config = PersistenceConfig {
            coalescing_delay: Duration::ZERO,
            max_unsaved_interval: Duration::ZERO,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive {
                field: "max_unsaved_interval"
            })
        ));
    }

    #[test]
    fn zero_polling_interval_is_rejected() {
        let config = PollingConfig {
            background_interval: Duration::ZERO,
            ..PollingConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive {
                field: "background_interval"
            })
        ));
    }

    #[test]
    fn slow_boost_is_reported_only_by_ordering_check() {
        let config = PollingConfig {
            boost_interval: Duration::from_secs(5),
            ..PollingConfig::default()
        };
        config.validate().unwrap();
        assert!(matches!(
            config.check_ordering(),
            Err(ConfigError::BoostSlowerThanForeground { .. })
        ));
    }

    #[test]
    fn thresholds_outside_unit_interval_are_rejected() {
        let thresholds = GuardrailThresholds {
            min_own_module_share: 1.5,
            ..GuardrailThresholds::default()
        };
        assert!(matches!(
            thresholds.validate(),
            Err(ConfigError::RatioOutOfRange {
                field: "min_own_module_share",
                ..
            })
        ));

        let nan = GuardrailThresholds {
            max_background_share: f64::NAN,
            ..GuardrailThresholds::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn blank_own_module_is_rejected() {
        let config = GuardrailConfig {
            rules: ClassificationRules {
                own_module: "  ".to_owned(),
                ..ClassificationRules::default()
            },
            ..GuardrailConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyIdentifier {
                field: "own_module"
            })
        ));
    }

    #[test]
    fn zero_top_frame_limit_is_rejected() {
        let config = GuardrailConfig {
            top_frame_limit: 0,
            ..GuardrailConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive {
                field: "top_frame_limit"
            })
        ));
    }

    #[test]
    fn empty_prewarm_identifier_is_rejected() {
        let err = PacerConfig::from_json_str(r#"{ "prewarm": { "today": ["", "coach"] } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyIdentifier { field: "prewarm" }));
    }
}

//! Offline performance guardrails over captured stack samples.
//!
//! A profiling pipeline outside this crate turns a trace capture into
//! [`FrameSample`]s. [`PerformanceGuardrailEvaluator::summarize`] classifies
//! them into the application's own frames and, within those, frames of the
//! feature under test versus background work competing with it.
//! [`meets_targets`](PerformanceGuardrailEvaluator::meets_targets) then applies
//! pass/fail thresholds, letting CI confirm that the scheduling policies keep
//! background refreshes off the hot path.
//!
//! The [`latency`] submodule extracts named latency metrics from UI-test
//! activity reports for the same purpose.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{ClassificationRules, ConfigError, GuardrailConfig, GuardrailThresholds};

pub mod latency;

/// Thread labels containing this (case-insensitively) count as main thread.
const MAIN_THREAD_MARKER: &str = "main thread";

/// Errors produced while summarizing a trace.
#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("top frame limit must be greater than zero")]
    ZeroTopFrameLimit,

    #[error("sample {sample} frame {frame} has an empty {field}")]
    EmptyFrameField {
        sample: usize,
        frame: usize,
        field: &'static str,
    },

    #[error("invalid trace document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// One stack frame: the symbol and the module (binary/framework) owning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub symbol: String,
    pub module: String,
}

impl Frame {
    pub fn new(symbol: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            module: module.into(),
        }
    }
}

/// One stack sample; `frames` is ordered outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSample {
    pub thread: String,
    pub frames: Vec<Frame>,
}

/// Parses a JSON array of samples produced by the profiling pipeline.
pub fn parse_samples(json: &str) -> Result<Vec<FrameSample>, GuardrailError> {
    Ok(serde_json::from_str(json)?)
}

/// How often an own-module symbol was the first own frame of a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCount {
    pub symbol: String,
    pub samples: u64,
}

/// Aggregate counts over a set of samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub total_samples: u64,
    pub main_thread_samples: u64,
    pub own_module_samples: u64,
    pub target_feature_samples: u64,
    pub background_samples: u64,
    /// Most frequent own-module symbols, ties in ascending symbol order.
    pub top_own_module_symbols: Vec<SymbolCount>,
}

impl TraceSummary {
    pub fn own_module_share(&self) -> f64 {
        ratio(self.own_module_samples, self.total_samples)
    }

    pub fn background_share_within_own_module(&self) -> f64 {
        ratio(self.background_samples, self.own_module_samples)
    }

    pub fn target_feature_share_within_own_module(&self) -> f64 {
        ratio(self.target_feature_samples, self.own_module_samples)
    }

    pub fn main_thread_share(&self) -> f64 {
        ratio(self.main_thread_samples, self.total_samples)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// A summary together with the verdict, for CI artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuardrailReport {
    pub summary: TraceSummary,
    pub own_module_share: f64,
    pub background_share_within_own_module: f64,
    pub thresholds: GuardrailThresholds,
    pub passed: bool,
}

/// Classifies samples by [`ClassificationRules`] and checks thresholds.
///
/// # Examples
///
/// ```
/// use pacer::config::{ClassificationRules, GuardrailThresholds};
/// use pacer::guardrail::{Frame, FrameSample, PerformanceGuardrailEvaluator};
///
/// let evaluator = PerformanceGuardrailEvaluator::new(ClassificationRules::default()).unwrap();
/// let samples = vec![FrameSample {
///     thread: "Main Thread 0x1".into(),
///     frames: vec![
///         Frame::new("start", "dyld"),
///         Frame::new("ActiveSessionView.body", "App"),
///     ],
/// }];
///
/// let summary = evaluator.summarize(&samples, 5).unwrap();
/// assert_eq!(summary.own_module_share(), 1.0);
/// let thresholds = GuardrailThresholds::default();
/// assert!(PerformanceGuardrailEvaluator::meets_targets(&summary, &thresholds).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct PerformanceGuardrailEvaluator {
    rules: ClassificationRules,
}

impl PerformanceGuardrailEvaluator {
    /// # Errors
    ///
    /// Returns the [`ConfigError`] for an empty own-module name or empty keywords.
    pub fn new(rules: ClassificationRules) -> Result<Self, ConfigError> {
        rules.validate()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &ClassificationRules {
        &self.rules
    }

    /// Aggregates `samples` into a [`TraceSummary`] listing at most
    /// `top_frame_limit` symbols.
    ///
    /// A sample counts toward the own-module totals through its outermost
    /// own-module frame only; samples without one count toward the total
    /// (and main-thread) figures alone.
    ///
    /// # Errors
    ///
    /// [`GuardrailError::ZeroTopFrameLimit`] for a zero limit and
    /// [`GuardrailError::EmptyFrameField`] for a frame with an empty symbol or
    /// module.
    pub fn summarize(
        &self,
        samples: &[FrameSample],
        top_frame_limit: usize,
    ) -> Result<TraceSummary, GuardrailError> {
        if top_frame_limit == 0 {
            return Err(GuardrailError::ZeroTopFrameLimit);
        }
        validate_samples(samples)?;

        let mut summary = TraceSummary::default();
        let mut symbol_counts: HashMap<&str, u64> = HashMap::new();

        for sample in samples {
            summary.total_samples += 1;
            if sample.thread.to_lowercase().contains(MAIN_THREAD_MARKER) {
                summary.main_thread_samples += 1;
            }

            let Some(frame) = sample
                .frames
                .iter()
                .find(|frame| frame.module == self.rules.own_module)
            else {
                continue;
            };

            summary.own_module_samples += 1;
            *symbol_counts.entry(frame.symbol.as_str()).or_default() += 1;

            if matches_any(&frame.symbol, &self.rules.target_feature_keywords) {
                summary.target_feature_samples += 1;
            }
            if matches_any(&frame.symbol, &self.rules.background_keywords) {
                summary.background_samples += 1;
            }
        }

        let mut ranked: Vec<(&str, u64)> = symbol_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        summary.top_own_module_symbols = ranked
            .into_iter()
            .take(top_frame_limit)
            .map(|(symbol, samples)| SymbolCount {
                symbol: symbol.to_owned(),
                samples,
            })
            .collect();

        debug!(
            total = summary.total_samples,
            own_module = summary.own_module_samples,
            background = summary.background_samples,
            "trace summarized"
        );
        Ok(summary)
    }

    /// Passes when the app's own code dominates the trace and background work
    /// stays below its share limit.
    ///
    /// # Errors
    ///
    /// Returns [`GuardrailError::Config`] when a threshold is NaN or outside
    /// `0.0..=1.0`.
    pub fn meets_targets(
        summary: &TraceSummary,
        thresholds: &GuardrailThresholds,
    ) -> Result<bool, GuardrailError> {
        thresholds.validate()?;
        Ok(summary.own_module_share() >= thresholds.min_own_module_share
            && summary.background_share_within_own_module() <= thresholds.max_background_share)
    }

    /// Summarizes and judges `samples` using a full [`GuardrailConfig`].
    pub fn evaluate(
        samples: &[FrameSample],
        config: &GuardrailConfig,
    ) -> Result<GuardrailReport, GuardrailError> {
        config.validate()?;
        let evaluator = Self::new(config.rules.clone())?;
        let summary = evaluator.summarize(samples, config.top_frame_limit)?;
        let passed = Self::meets_targets(&summary, &config.thresholds)?;
        Ok(GuardrailReport {
            own_module_share: summary.own_module_share(),
            background_share_within_own_module: summary.background_share_within_own_module(),
            thresholds: config.thresholds,
            passed,
            summary,
        })
    }
}

fn matches_any(symbol: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| symbol.contains(keyword.as_str()))
}

fn validate_samples(samples: &[FrameSample]) -> Result<(), GuardrailError> {
    for (sample_index, sample) in samples.iter().enumerate() {
        for (frame_index, frame) in sample.frames.iter().enumerate() {
            let field = if frame.symbol.is_empty() {
                "symbol"
            } else if frame.module.is_empty() {
                "module"
            } else {
                continue;
            };
            return Err(GuardrailError::EmptyFrameField {
                sample: sample_index,
                frame: frame_index,
                field,
            });
        }
    }
    Ok(())
}

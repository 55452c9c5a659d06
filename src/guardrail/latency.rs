//! Latency metrics logged by UI tests.
//!
//! UI tests record measurements as activity titles of the form
//! `Latency metric <name>=<seconds>s`. A test-results export is a tree of test
//! nodes plus, per test case, a tree of activities. The [`ActivitySource`]
//! trait abstracts how those JSON payloads are obtained (exported files, a
//! results tool run by the shell); this module only walks them.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

static METRIC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Latency metric ([A-Za-z0-9_]+)=([0-9]+(?:\.[0-9]+)?)s")
        .expect("latency metric pattern is valid")
});

/// Errors that abort a metric extraction.
#[derive(Debug, Error)]
pub enum LatencyError {
    #[error("test results payload has no `testNodes` list")]
    MissingTestNodes,

    #[error("failed to load test results: {0}")]
    Source(String),
}

/// Supplies the exported test-result payloads.
pub trait ActivitySource {
    /// The test tree: an object with a `testNodes` array.
    fn tests(&self) -> Result<Value, LatencyError>;

    /// Activities for one test case: an object with a `testRuns` array whose
    /// entries carry an `activities` array.
    fn activities(&self, test_id: &str) -> Result<Value, LatencyError>;
}

/// A test whose activities could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub test_id: String,
    pub error: String,
}

/// Metrics gathered from one test-results export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetricReport {
    pub source: String,
    pub tests_scanned: usize,
    pub metric_count: usize,
    /// Metric name to seconds.
    pub metrics: BTreeMap<String, f64>,
    pub errors: Vec<ExtractionFailure>,
}

/// A metric above its budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetViolation {
    pub metric: String,
    pub seconds: f64,
    pub budget_seconds: f64,
}

impl LatencyMetricReport {
    /// Metrics exceeding `budgets` (name to seconds). Metrics without a budget
    /// and budgets without a metric are ignored.
    pub fn over_budget(&self, budgets: &BTreeMap<String, f64>) -> Vec<BudgetViolation> {
        budgets
            .iter()
            .filter_map(|(metric, budget)| {
                let seconds = *self.metrics.get(metric)?;
                (seconds > *budget).then(|| BudgetViolation {
                    metric: metric.clone(),
                    seconds,
                    budget_seconds: *budget,
                })
            })
            .collect()
    }
}

/// Collects the identifiers of every test case in a test-node tree.
///
/// Prefers `nodeIdentifierURL` over `nodeIdentifier`; duplicates are dropped.
pub fn collect_test_ids(test_nodes: &[Value]) -> Vec<String> {
    let mut stack: Vec<&Value> = test_nodes.iter().collect();
    let mut seen = HashSet::new();
    let mut test_ids = Vec::new();

    while let Some(node) = stack.pop() {
        if node.get("nodeType").and_then(Value::as_str) == Some("Test Case") {
            let test_id = ["nodeIdentifierURL", "nodeIdentifier"]
                .iter()
                .find_map(|key| {
                    node.get(*key)
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                });
            if let Some(test_id) = test_id {
                if seen.insert(test_id) {
                    test_ids.push(test_id.to_owned());
                }
            }
        }

        if let Some(children) = node.get("children").and_then(Value::as_array) {
            stack.extend(children.iter().filter(|child| child.is_object()));
        }
    }

    test_ids
}

/// Records every `Latency metric` title found in an activity tree into
/// `metrics`. Later matches for the same name overwrite earlier ones.
pub fn scan_activities_for_metrics(activities: &[Value], metrics: &mut BTreeMap<String, f64>) {
    let mut stack: Vec<&Value> = activities.iter().collect();

    while let Some(activity) = stack.pop() {
        if let Some(title) = activity.get("title").and_then(Value::as_str) {
            if let Some(captures) = METRIC_PATTERN.captures(title) {
                if let Ok(seconds) = captures[2].parse::<f64>() {
                    metrics.insert(captures[1].to_owned(), seconds);
                }
            }
        }

        if let Some(children) = activity.get("childActivities").and_then(Value::as_array) {
            stack.extend(children.iter().filter(|child| child.is_object()));
        }
    }
}

/// Walks every test case reported by `source` and gathers its metrics.
///
/// A test whose activities fail to load is recorded in
/// [`LatencyMetricReport::errors`] and skipped.
///
/// # Errors
///
/// Returns [`LatencyError`] when the test tree itself cannot be loaded or has
/// no `testNodes` list.
pub fn extract_metrics<S>(
    source_label: &str,
    source: &S,
) -> Result<LatencyMetricReport, LatencyError>
where
    S: ActivitySource + ?Sized,
{
    let tests = source.tests()?;
    let test_nodes = tests
        .get("testNodes")
        .and_then(Value::as_array)
        .ok_or(LatencyError::MissingTestNodes)?;

    let test_ids = collect_test_ids(test_nodes);
    let mut metrics = BTreeMap::new();
    let mut errors = Vec::new();

    for test_id in &test_ids {
        let payload = match source.activities(test_id) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(test_id = %test_id, error = %error, "skipping test activities");
                errors.push(ExtractionFailure {
                    test_id: test_id.clone(),
                    error: error.to_string(),
                });
                continue;
            }
        };

        let Some(runs) = payload.get("testRuns").and_then(Value::as_array) else {
            continue;
        };
        for run in runs {
            if let Some(activities) = run.get("activities").and_then(Value::as_array) {
                scan_activities_for_metrics(activities, &mut metrics);
            }
        }
    }

    debug!(
        source = source_label,
        tests = test_ids.len(),
        metrics = metrics.len(),
        "latency metrics extracted"
    );
    Ok(LatencyMetricReport {
        source: source_label.to_owned(),
        tests_scanned: test_ids.len(),
        metric_count: metrics.len(),
        metrics,
        errors,
    })
}

//! Warm-up ordering for views the user is likely to open next.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::config::ConfigError;

/// Name of a refreshable view (a tab, a screen).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(String);

impl ViewId {
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyIdentifier`] for an empty or blank name.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyIdentifier { field: "view id" });
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ViewId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Static "likely next view" ranking per selected view.
///
/// Stateless once built: [`preload_order`](Self::preload_order) is a pure
/// function of its inputs.
///
/// # Examples
///
/// ```
/// use std::collections::HashSet;
/// use pacer::activation::{PrewarmOrderPlanner, ViewId};
///
/// let planner = PrewarmOrderPlanner::new()
///     .with_ranking("today", &["workout", "progress", "coach"])
///     .unwrap();
///
/// let today = ViewId::new("today").unwrap();
/// let loaded: HashSet<_> = [ViewId::new("progress").unwrap()].into();
/// let order: Vec<String> = planner
///     .preload_order(&today, &loaded)
///     .iter()
///     .map(|view| view.to_string())
///     .collect();
/// assert_eq!(order, ["workout", "coach"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PrewarmOrderPlanner {
    rankings: HashMap<ViewId, Vec<ViewId>>,
}

impl PrewarmOrderPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a planner from configuration rankings.
    pub fn from_config(rankings: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        rankings
            .iter()
            .try_fold(Self::new(), |planner, (selected, next)| {
                planner.with_ranking(selected, next.as_slice())
            })
    }

    /// Sets the likely-next order for `selected`, replacing any earlier entry.
    ///
    /// Repeated candidates keep their first position.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyIdentifier`] for blank names and
    /// [`ConfigError::SelfRanking`] when `selected` appears among its own
    /// candidates.
    pub fn with_ranking<S>(mut self, selected: &str, next: &[S]) -> Result<Self, ConfigError>
    where
        S: AsRef<str>,
    {
        let selected = ViewId::new(selected)?;
        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(next.len());
        for candidate in next {
            let candidate = ViewId::new(candidate.as_ref())?;
            if candidate == selected {
                return Err(ConfigError::SelfRanking {
                    view: selected.to_string(),
                });
            }
            if seen.insert(candidate.clone()) {
                order.push(candidate);
            }
        }
        self.rankings.insert(selected, order);
        Ok(self)
    }

    /// Views to warm up after `selected` was chosen, most likely first,
    /// skipping those in `loaded`.
    ///
    /// Unknown views yield an empty order.
    pub fn preload_order(&self, selected: &ViewId, loaded: &HashSet<ViewId>) -> Vec<ViewId> {
        self.rankings
            .get(selected)
            .map(|ranking| {
                ranking
                    .iter()
                    .filter(|view| !loaded.contains(*view))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

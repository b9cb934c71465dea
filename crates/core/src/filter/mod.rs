//! Include/exclude policy over labelled filter items.
//!
//! [`Filter`] is the single gate a candidate request passes before dispatch.
//! Exclusions are evaluated first and the first match refuses the request
//! with that item's [`Rejection`]. An empty inclusion set lets everything
//! else through; otherwise at least one inclusion must match.

pub mod engine;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::Rejection;
use crate::model::Request;
use crate::Error;

pub use engine::{
    Combinator, DepthEngine, Engine, GlobEngine, Operator, RegexEngine, RevisitEngine, Scope, Segment,
    UrlLengthEngine,
};

/// Which set a filter item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Policy {
    Include,
    Exclude,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Include => f.write_str("include"),
            Policy::Exclude => f.write_str("exclude"),
        }
    }
}

/// Result of registering a filter item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum AddOutcome {
    Added,
    /// An item with the same label existed and was overwritten.
    Replaced,
}

/// One engine bound to a scope and the rejection it produces.
#[derive(Debug, Clone)]
pub struct FilterItem {
    pub scope: Scope,
    pub engine: Arc<dyn Engine>,
    pub rejection: Rejection,
}

#[derive(Debug, Default)]
struct FilterSets {
    included: HashMap<String, FilterItem>,
    excluded: HashMap<String, FilterItem>,
    next_label: u64,
}

impl FilterSets {
    fn set_mut(&mut self, policy: Policy) -> &mut HashMap<String, FilterItem> {
        match policy {
            Policy::Include => &mut self.included,
            Policy::Exclude => &mut self.excluded,
        }
    }

    fn set(&self, policy: Policy) -> &HashMap<String, FilterItem> {
        match policy {
            Policy::Include => &self.included,
            Policy::Exclude => &self.excluded,
        }
    }
}

/// Thread-safe policy aggregator.
#[derive(Debug, Default)]
pub struct Filter {
    sets: RwLock<FilterSets>,
}

/// Items of `set` selected by `tags`, or all of them.
fn selected<'s>(set: &'s HashMap<String, FilterItem>, tags: Option<&[&str]>) -> Vec<&'s FilterItem> {
    match tags {
        None => set.values().collect(),
        Some(tags) => set
            .iter()
            .filter(|(label, _)| tags.contains(&label.as_str()))
            .map(|(_, item)| item)
            .collect(),
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `engine` under `label`, generating a label when none is given.
    ///
    /// Re-using a label overwrites the previous item and reports
    /// [`AddOutcome::Replaced`].
    pub async fn add(
        &self, policy: Policy, scope: Scope, engine: Arc<dyn Engine>, rejection: Rejection, label: Option<&str>,
    ) -> AddOutcome {
        let mut sets = self.sets.write().await;
        let label = match label {
            Some(label) => label.to_string(),
            None => {
                sets.next_label += 1;
                format!("#{policy}-{}", sets.next_label)
            }
        };
        let item = FilterItem { scope, engine, rejection };
        match sets.set_mut(policy).insert(label.clone(), item) {
            Some(_) => {
                tracing::debug!(%policy, label, "filter item replaced");
                AddOutcome::Replaced
            }
            None => AddOutcome::Added,
        }
    }

    /// Compile `patterns` into a [`GlobEngine`] and register it.
    ///
    /// Valid patterns are registered even when some are invalid; the invalid
    /// batch is then returned as [`Error::InvalidPatterns`].
    pub async fn add_globs<I, S>(
        &self, policy: Policy, scope: Scope, patterns: I, rejection: Rejection, label: Option<&str>,
    ) -> Result<AddOutcome, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let engine = GlobEngine::new(patterns);
        let outcome = self.add_compiled(policy, scope, engine.is_empty(), Arc::new(engine.clone()), rejection, label).await;
        engine.validate().map(|_| outcome)
    }

    /// Same as [`Filter::add_globs`] with regular expressions.
    pub async fn add_regexes<I, S>(
        &self, policy: Policy, scope: Scope, patterns: I, rejection: Rejection, label: Option<&str>,
    ) -> Result<AddOutcome, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let engine = RegexEngine::new(patterns);
        let outcome = self.add_compiled(policy, scope, engine.is_empty(), Arc::new(engine.clone()), rejection, label).await;
        engine.validate().map(|_| outcome)
    }

    async fn add_compiled(
        &self, policy: Policy, scope: Scope, empty: bool, engine: Arc<dyn Engine>, rejection: Rejection,
        label: Option<&str>,
    ) -> AddOutcome {
        if empty {
            return AddOutcome::Added;
        }
        self.add(policy, scope, engine, rejection, label).await
    }

    /// Remove the item registered under `label`. Returns whether it existed.
    pub async fn remove(&self, policy: Policy, label: &str) -> bool {
        self.sets.write().await.set_mut(policy).remove(label).is_some()
    }

    pub async fn len(&self, policy: Policy) -> usize {
        self.sets.read().await.set(policy).len()
    }

    pub async fn is_empty(&self) -> bool {
        let sets = self.sets.read().await;
        sets.included.is_empty() && sets.excluded.is_empty()
    }

    pub async fn labels(&self, policy: Policy) -> Vec<String> {
        let mut labels: Vec<String> = self.sets.read().await.set(policy).keys().cloned().collect();
        labels.sort();
        labels
    }

    /// Decide whether `request` may be dispatched.
    ///
    /// With `tags`, only items whose label is listed take part. Within a set
    /// evaluation order is unspecified.
    pub async fn matches(&self, request: &Request, tags: Option<&[&str]>) -> Result<(), Error> {
        let sets = self.sets.read().await;
        let mut segments: HashMap<Scope, Segment<'_>> = HashMap::new();

        for item in selected(&sets.excluded, tags) {
            let segment = *segments.entry(item.scope).or_insert_with(|| item.scope.segment(request));
            if item.engine.matches(&segment).await {
                return Err(Error::rejected(item.rejection, request.url.as_str()));
            }
        }

        let included = selected(&sets.included, tags);
        if included.is_empty() {
            return Ok(());
        }
        for item in included {
            let segment = *segments.entry(item.scope).or_insert_with(|| item.scope.segment(request));
            if item.engine.matches(&segment).await {
                return Ok(());
            }
        }
        Err(Error::rejected(Rejection::NoMatchingFilter, request.url.as_str()))
    }
}

//! Per-domain politeness rules: delay, random jitter and a concurrency gate.
//!
//! Rules are tried in the order they were added; the first whose domain globs
//! match the request host applies, otherwise the fallback rule does.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use wayfarer_core::filter::{Filter, Policy, Scope};
use wayfarer_core::{Error, Rejection, Request};

/// Politeness settings for a set of domains.
#[derive(Debug, Clone, Default)]
pub struct DomainRule {
    /// Host globs such as `*.example.com`. Ignored for the fallback rule.
    pub domain_globs: Vec<String>,
    pub delay: Duration,
    /// Upper bound of a uniformly random extra delay.
    pub random_delay: Duration,
    /// Maximum requests in flight under this rule; 0 is unlimited.
    pub parallelism: usize,
}

impl DomainRule {
    pub fn new<I, S>(domain_globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { domain_globs: domain_globs.into_iter().map(Into::into).collect(), ..Default::default() }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn random_delay(mut self, random_delay: Duration) -> Self {
        self.random_delay = random_delay;
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }
}

/// A [`DomainRule`] with its matcher and gate.
#[derive(Debug)]
pub struct LimitRule {
    rule: DomainRule,
    filter: Filter,
    gate: Option<Arc<Semaphore>>,
}

impl LimitRule {
    fn fallback(rule: DomainRule) -> Self {
        let gate = gate_for(rule.parallelism);
        Self { rule, filter: Filter::new(), gate }
    }

    async fn compile(rule: DomainRule) -> Result<Self, Error> {
        if rule.domain_globs.iter().all(|g| g.trim().is_empty()) {
            return Err(Error::InvalidConfig("domain rule needs at least one domain glob".into()));
        }
        let filter = Filter::new();
        let _ = filter
            .add_globs(Policy::Include, Scope::Domain, &rule.domain_globs, Rejection::NoMatchingFilter, None)
            .await?;
        let gate = gate_for(rule.parallelism);
        Ok(Self { rule, filter, gate })
    }

    pub fn rule(&self) -> &DomainRule {
        &self.rule
    }

    /// Wait for a slot under this rule. The slot is released when the permit drops.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        match &self.gate {
            // The semaphore is never closed.
            Some(gate) => Arc::clone(gate).acquire_owned().await.ok(),
            None => None,
        }
    }

    /// Sleep for the fixed delay plus a random share of the jitter bound.
    pub async fn pause(&self) {
        let jitter_ms = self.rule.random_delay.as_millis() as u64;
        let jitter = if jitter_ms > 0 { rand::rng().random_range(0..=jitter_ms) } else { 0 };
        let total = self.rule.delay + Duration::from_millis(jitter);
        if !total.is_zero() {
            tokio::time::sleep(total).await;
        }
    }
}

fn gate_for(parallelism: usize) -> Option<Arc<Semaphore>> {
    (parallelism > 0).then(|| Arc::new(Semaphore::new(parallelism)))
}

/// Ordered rule list with a fallback.
#[derive(Debug)]
pub struct Limits {
    rules: Vec<LimitRule>,
    fallback: LimitRule,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(DomainRule::default())
    }
}

impl Limits {
    pub fn new(fallback: DomainRule) -> Self {
        Self { rules: Vec::new(), fallback: LimitRule::fallback(fallback) }
    }

    /// Append a rule; earlier rules take precedence.
    pub async fn push(&mut self, rule: DomainRule) -> Result<(), Error> {
        self.rules.push(LimitRule::compile(rule).await?);
        Ok(())
    }

    /// The first rule matching `request`, or the fallback.
    pub async fn rule_for(&self, request: &Request) -> &LimitRule {
        for rule in &self.rules {
            if rule.filter.matches(request, None).await.is_ok() {
                return rule;
            }
        }
        &self.fallback
    }
}

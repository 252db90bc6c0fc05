//! Per-request interceptor invocation counts.

use std::collections::BTreeMap;

/// How often interceptors ran while processing one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationCounters {
    query: BTreeMap<String, usize>,
    predicate: BTreeMap<String, usize>,
    change: BTreeMap<String, usize>,
}

impl InvocationCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_query(&mut self, set: &str) {
        *self.query.entry(set.to_string()).or_default() += 1;
    }

    pub(crate) fn record_predicate(&mut self, set: &str) {
        *self.predicate.entry(set.to_string()).or_default() += 1;
    }

    pub(crate) fn record_change(&mut self, set: &str) {
        *self.change.entry(set.to_string()).or_default() += 1;
    }

    /// Query interceptor invocations for a set.
    pub fn query_invocations(&self, set: &str) -> usize {
        self.query.get(set).copied().unwrap_or(0)
    }

    /// Predicate evaluations for a set; non-zero only once a query ran.
    pub fn predicate_evaluations(&self, set: &str) -> usize {
        self.predicate.get(set).copied().unwrap_or(0)
    }

    /// Change interceptor invocations for a set.
    pub fn change_invocations(&self, set: &str) -> usize {
        self.change.get(set).copied().unwrap_or(0)
    }

    pub fn total_query_invocations(&self) -> usize {
        self.query.values().sum()
    }

    pub fn total_change_invocations(&self) -> usize {
        self.change.values().sum()
    }

    /// Fold counts of a nested request (batch part) into this one.
    pub fn merge(&mut self, other: &InvocationCounters) {
        for (target, source) in [
            (&mut self.query, &other.query),
            (&mut self.predicate, &other.predicate),
            (&mut self.change, &other.change),
        ] {
            for (set, count) in source {
                *target.entry(set.clone()).or_default() += count;
            }
        }
    }
}

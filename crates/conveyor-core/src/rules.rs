//! Validation rules over records and batches
//!
//! A rule is a named predicate over a single record; a batch rule is the
//! same idea over an entire batch (cross-record invariants such as key
//! uniqueness). Rules are pure: evaluation never mutates the record and
//! never fails. A rule that cannot decide expresses that as a violation.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A single violation reported by a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    /// Name of the rule that found the violation
    pub rule: String,
    /// Human-readable reason
    pub message: String,
}

impl RuleViolation {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.rule, self.message)
    }
}

/// A named validation predicate over a single record
pub trait Rule<T>: Send + Sync {
    /// Short identifier used in violation reports
    fn name(&self) -> &str;

    /// What the rule checks, for humans
    fn description(&self) -> &str {
        ""
    }

    /// Evaluate the record, returning every violation found
    fn evaluate(&self, record: &T) -> Vec<RuleViolation>;
}

/// A named validation predicate over an entire batch of records
pub trait BatchRule<T>: Send + Sync {
    /// Short identifier used in violation reports
    fn name(&self) -> &str;

    /// What the rule checks, for humans
    fn description(&self) -> &str {
        ""
    }

    /// Evaluate the batch, returning every violation found
    fn evaluate(&self, batch: &[T]) -> Vec<RuleViolation>;
}

/// An ordered collection of record-level rules
///
/// Order does not affect the outcome: every rule is evaluated and every
/// violation is collected.
pub struct RuleSet<T> {
    rules: Vec<Box<dyn Rule<T>>>,
}

impl<T> RuleSet<T> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add(&mut self, rule: impl Rule<T> + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against the record, collecting all violations
    pub fn evaluate(&self, record: &T) -> Vec<RuleViolation> {
        let mut violations = Vec::new();
        for rule in &self.rules {
            violations.extend(rule.evaluate(record));
        }
        violations
    }
}

impl<T> Default for RuleSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Closure-backed rule built by [`rule`]
pub struct FnRule<F> {
    name: String,
    description: String,
    check: F,
}

impl<F> FnRule<F> {
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl<T, F> Rule<T> for FnRule<F>
where
    F: Fn(&T) -> Option<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn evaluate(&self, record: &T) -> Vec<RuleViolation> {
        match (self.check)(record) {
            Some(message) => vec![RuleViolation::new(&self.name, message)],
            None => Vec::new(),
        }
    }
}

/// Build a record-level rule from a closure
///
/// The closure returns `Some(message)` when the record violates the rule,
/// `None` when it passes. Rules that can report more than one violation per
/// record implement [`Rule`] directly.
pub fn rule<T, F>(name: impl Into<String>, check: F) -> FnRule<F>
where
    F: Fn(&T) -> Option<String> + Send + Sync,
{
    FnRule {
        name: name.into(),
        description: String::new(),
        check,
    }
}

/// Closure-backed batch rule built by [`batch_rule`]
pub struct FnBatchRule<F> {
    name: String,
    description: String,
    check: F,
}

impl<T, F> BatchRule<T> for FnBatchRule<F>
where
    F: Fn(&[T]) -> Vec<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn evaluate(&self, batch: &[T]) -> Vec<RuleViolation> {
        (self.check)(batch)
            .into_iter()
            .map(|message| RuleViolation::new(&self.name, message))
            .collect()
    }
}

/// Build a batch-level rule from a closure returning violation messages
pub fn batch_rule<T, F>(name: impl Into<String>, check: F) -> FnBatchRule<F>
where
    F: Fn(&[T]) -> Vec<String> + Send + Sync,
{
    FnBatchRule {
        name: name.into(),
        description: String::new(),
        check,
    }
}

/// Batch rule rejecting duplicate keys, built by [`unique_by`]
pub struct UniqueByRule<T, K, F> {
    name: String,
    key: F,
    _marker: PhantomData<fn(&T) -> K>,
}

impl<T, K, F> BatchRule<T> for UniqueByRule<T, K, F>
where
    F: Fn(&T) -> K + Send + Sync,
    K: Eq + Hash + Clone + fmt::Display,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "every record in the batch must have a distinct key"
    }

    fn evaluate(&self, batch: &[T]) -> Vec<RuleViolation> {
        let mut counts: HashMap<K, usize> = HashMap::new();
        for record in batch {
            *counts.entry((self.key)(record)).or_insert(0) += 1;
        }

        // One violation per duplicated key, in first-appearance order
        let mut reported: HashSet<K> = HashSet::new();
        let mut violations = Vec::new();
        for record in batch {
            let key = (self.key)(record);
            if counts.get(&key).copied().unwrap_or(0) > 1 && reported.insert(key.clone()) {
                violations.push(RuleViolation::new(
                    &self.name,
                    format!(
                        "duplicate key `{}` appears {} times",
                        key,
                        counts.get(&key).copied().unwrap_or(0)
                    ),
                ));
            }
        }
        violations
    }
}

/// Build a batch rule that rejects the batch when two records share a key
pub fn unique_by<T, K, F>(name: impl Into<String>, key: F) -> UniqueByRule<T, K, F>
where
    F: Fn(&T) -> K + Send + Sync,
    K: Eq + Hash + Clone + fmt::Display,
{
    UniqueByRule {
        name: name.into(),
        key,
        _marker: PhantomData,
    }
}

//! Argument autocompletion for prompts and resource templates.
//!
//! Each argument's completion behavior is resolved once, when its prompt or template is
//! built: an explicit [`Completer`] wins, then fuzzy matching over the argument's enum
//! values, then an empty result.

use super::BoxedFuture;
use crate::types::{Completion, MAX_COMPLETION_VALUES};
use anyhow::bail;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Fuzzy matches scoring above this are discarded. Lower is stricter.
const FUZZY_THRESHOLD: f64 = 0.6;
/// How far into a candidate a match may start before the location penalty reaches 1.0.
const FUZZY_DISTANCE: f64 = 100.0;

type CompleteFn = dyn Fn(String) -> BoxedFuture<anyhow::Result<Completion>> + Send + Sync;

/// Produces completion candidates for a partially typed argument value.
#[derive(Clone)]
pub struct Completer {
    inner: Arc<CompleteFn>,
}

impl Completer {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Completion>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |value| Box::pin(f(value))),
        }
    }

    /// Ranks a fixed candidate list by approximate match against the typed value.
    pub fn fuzzy<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates: Arc<Vec<String>> =
            Arc::new(candidates.into_iter().map(Into::into).collect());
        Self::new(move |value| {
            let candidates = Arc::clone(&candidates);
            async move { Ok(fuzzy_complete(&candidates, &value)) }
        })
    }

    pub fn empty() -> Self {
        Self::new(|_| async { Ok(Completion::default()) })
    }

    pub async fn complete(&self, value: &str) -> anyhow::Result<Completion> {
        (self.inner)(value.to_string()).await
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completer")
    }
}

/// A named argument of a prompt or resource template.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub description: Option<String>,
    pub required: bool,
    pub enum_values: Option<Vec<String>>,
    pub(crate) complete: Option<Completer>,
}

impl Argument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: false,
            enum_values: None,
            complete: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restricts suggestions to these values, fuzzy-matched against the typed text.
    pub fn enum_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn completer(mut self, completer: Completer) -> Self {
        self.complete = Some(completer);
        self
    }

    fn resolve_completer(&self) -> Option<Completer> {
        match (&self.complete, &self.enum_values) {
            (Some(explicit), _) => Some(explicit.clone()),
            (None, Some(values)) => Some(Completer::fuzzy(values.clone())),
            (None, None) => None,
        }
    }
}

/// Per-argument completers, keyed by argument name.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompletionTable {
    completers: HashMap<String, Completer>,
}

impl CompletionTable {
    pub(crate) fn resolve(arguments: &[Argument]) -> Self {
        let completers = arguments
            .iter()
            .filter_map(|arg| arg.resolve_completer().map(|c| (arg.name.clone(), c)))
            .collect();
        Self { completers }
    }

    /// True when at least one argument has a completer or enum values.
    pub(crate) fn supports_completion(&self) -> bool {
        !self.completers.is_empty()
    }

    /// Completes `value` for `argument`. Arguments without a completer yield nothing.
    pub(crate) async fn complete(&self, argument: &str, value: &str) -> anyhow::Result<Completion> {
        let completion = match self.completers.get(argument) {
            Some(completer) => completer.complete(value).await?,
            None => Completion::default(),
        };
        if completion.values.len() > MAX_COMPLETION_VALUES {
            bail!(
                "completion for '{}' returned {} values, more than the allowed {}",
                argument,
                completion.values.len(),
                MAX_COMPLETION_VALUES
            );
        }
        Ok(completion)
    }
}

/// Ranks `candidates` against `query` and caps the result at the completion limit.
///
/// An empty query matches every candidate in its original order.
pub fn fuzzy_complete(candidates: &[String], query: &str) -> Completion {
    let query: Vec<char> = query.to_lowercase().chars().collect();

    let mut ranked: Vec<(f64, &String)> = candidates
        .iter()
        .filter_map(|candidate| {
            let lowered: Vec<char> = candidate.to_lowercase().chars().collect();
            fuzzy_score(&query, &lowered).map(|score| (score, candidate))
        })
        .collect();
    // Stable, so equal scores keep declaration order.
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total = ranked.len();
    Completion {
        values: ranked
            .into_iter()
            .take(MAX_COMPLETION_VALUES)
            .map(|(_, c)| c.clone())
            .collect(),
        total: Some(total),
        has_more: (total > MAX_COMPLETION_VALUES).then_some(true),
    }
}

/// Approximate substring match: the fewest edits turning `query` into any substring of
/// `candidate`, relative to the query length, plus a penalty for starting late.
fn fuzzy_score(query: &[char], candidate: &[char]) -> Option<f64> {
    if query.is_empty() {
        return Some(0.0);
    }

    // Row 0 is all zeros so a match may begin anywhere in the candidate.
    let mut prev = vec![0usize; candidate.len() + 1];
    let mut cur = vec![0usize; candidate.len() + 1];
    for (i, q) in query.iter().enumerate() {
        cur[0] = i + 1;
        for (j, c) in candidate.iter().enumerate() {
            let substitution = prev[j] + usize::from(q != c);
            cur[j + 1] = substitution.min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    let (end, errors) = prev
        .iter()
        .copied()
        .enumerate()
        .min_by_key(|&(end, errors)| (errors, end))?;
    let start = end.saturating_sub(query.len());
    let score = errors as f64 / query.len() as f64 + start as f64 / FUZZY_DISTANCE;
    (score <= FUZZY_THRESHOLD).then_some(score)
}

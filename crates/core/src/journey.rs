use crate::error::{Error, Result};
use crate::personality::Personality;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Hop budget used when the caller does not supply one.
pub const DEFAULT_MAX_HOPS: usize = 2;
/// Upper bound on the hop budget accepted from a caller.
pub const MAX_HOPS_LIMIT: usize = 10;

/// One exploration step: the topic researched and the tangent chosen from it.
///
/// A `Hop` is built once, after both model calls for that step have returned,
/// and is never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub topic: String,
    pub summary: String,
    pub surprise: String,
    /// Candidate next topics in the model's ranking order.
    pub offramps: Vec<String>,
    /// `None` exactly when every offramp had already been visited.
    pub chosen_next: Option<String>,
    pub reasoning: String,
    /// URIs that grounded the findings; empty when the model attached none.
    pub sources: Vec<String>,
}

/// The ordered, append-only log of hops in a walk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Journey(Vec<Hop>);

impl Journey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hop: Hop) {
        self.0.push(hop);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Hop> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hop> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Hop] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a Journey {
    type Item = &'a Hop;
    type IntoIter = std::slice::Iter<'a, Hop>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Normalises a topic name for comparison, ignoring case and surrounding
/// whitespace.
pub fn fold_topic(topic: &str) -> String {
    topic.trim().to_lowercase()
}

/// Topics already explored, compared case-insensitively.
///
/// Insertion order is kept so the set renders deterministically in prompts.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    ordered: Vec<String>,
    folded: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a topic. Returns `false` if it was already present.
    pub fn insert(&mut self, topic: &str) -> bool {
        if self.folded.insert(fold_topic(topic)) {
            self.ordered.push(topic.trim().to_string());
            true
        } else {
            false
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.folded.contains(&fold_topic(topic))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(String::as_str)
    }
}

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}

/// What a caller supplies to start a walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RabbitHoleInput {
    pub start_topic: String,
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default)]
    pub personality: Personality,
}

impl RabbitHoleInput {
    pub fn new(start_topic: impl Into<String>, max_hops: usize, personality: Personality) -> Self {
        Self {
            start_topic: start_topic.into(),
            max_hops,
            personality,
        }
    }

    /// Rejects inputs the walk cannot run with. A zero hop budget is allowed
    /// and produces a narration over an empty journey.
    pub fn validate(&self) -> Result<()> {
        if self.start_topic.trim().is_empty() {
            return Err(Error::InvalidInput(
                "startTopic must not be empty".to_string(),
            ));
        }
        if self.max_hops > MAX_HOPS_LIMIT {
            return Err(Error::InvalidInput(format!(
                "maxHops must be at most {}, got {}",
                MAX_HOPS_LIMIT, self.max_hops
            )));
        }
        Ok(())
    }
}

/// The terminal output of a completed walk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RabbitHoleResult {
    pub start: String,
    pub end: String,
    #[serde(rename = "hops")]
    pub hop_count: usize,
    pub journey: Journey,
    pub narrative: String,
}

impl RabbitHoleResult {
    /// Assembles the result; `end` falls back to `start` for an empty journey.
    pub fn new(start: String, journey: Journey, narrative: String) -> Self {
        let end = journey
            .last()
            .map(|hop| hop.topic.clone())
            .unwrap_or_else(|| start.clone());
        Self {
            start,
            end,
            hop_count: journey.len(),
            journey,
            narrative,
        }
    }
}

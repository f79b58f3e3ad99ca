//! Detection output shared between detectors, resolvers and masking

use crate::interval::Interval;
use serde::{Deserialize, Serialize};

/// A span the PII analyzer flagged, with its confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityWithScore {
    pub start: usize,
    pub end: usize,
    pub score: f64,
    pub entity_type: String,
}

impl EntityWithScore {
    pub fn new(start: usize, end: usize, score: f64, entity_type: impl Into<String>) -> Self {
        Self {
            start,
            end,
            score,
            entity_type: entity_type.into(),
        }
    }

    /// Union of two detections of the same logical entity, keeping the higher score.
    pub fn widen(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            score: self.score.max(other.score),
            entity_type: self.entity_type.clone(),
        }
    }
}

/// Number of occurrences of one secret type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMatch {
    #[serde(rename = "type")]
    pub secret_type: String,
    pub count: usize,
}

/// Location of one secret occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRedaction {
    pub start: usize,
    pub end: usize,
    #[serde(rename = "type")]
    pub secret_type: String,
}

/// An interval that carries the category its placeholder is minted under.
pub trait TypedSpan: Interval {
    fn span_type(&self) -> &str;
}

impl Interval for EntityWithScore {
    fn start(&self) -> usize {
        self.start
    }

    fn end(&self) -> usize {
        self.end
    }
}

impl TypedSpan for EntityWithScore {
    fn span_type(&self) -> &str {
        &self.entity_type
    }
}

impl Interval for SecretRedaction {
    fn start(&self) -> usize {
        self.start
    }

    fn end(&self) -> usize {
        self.end
    }
}

impl TypedSpan for SecretRedaction {
    fn span_type(&self) -> &str {
        &self.secret_type
    }
}

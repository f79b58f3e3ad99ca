//! PII detection: analyzer backends and the per-request detector

use crate::config::{DetectionMode, PiiConfig};
use crate::conflict::resolve_conflicts;
use crate::entity::EntityWithScore;
use crate::presidio::{PresidioClient, PresidioConfig};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A named-entity recognizer. Offsets in the returned spans are byte offsets
/// into `text`.
#[async_trait]
pub trait PiiAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str, language: &str) -> Result<Vec<EntityWithScore>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiiDetectionResult {
    pub has_pii: bool,
    /// All resolved entities of this request, flattened in segment order.
    pub new_entities: Vec<EntityWithScore>,
    /// Resolved entities per text segment, aligned with `ChatRequest::text_segments`.
    pub entities_by_message: Vec<Vec<EntityWithScore>>,
    pub language: String,
    pub language_fallback: bool,
    pub scan_time_ms: u64,
}

impl PiiDetectionResult {
    pub fn empty(language: impl Into<String>, segments: usize) -> Self {
        Self {
            has_pii: false,
            new_entities: Vec::new(),
            entities_by_message: vec![Vec::new(); segments],
            language: language.into(),
            language_fallback: false,
            scan_time_ms: 0,
        }
    }
}

/// Runs an analyzer over every text segment of a request and resolves the
/// overlapping detections it returns.
#[derive(Clone)]
pub struct PiiDetector {
    analyzer: Arc<dyn PiiAnalyzer>,
    language: String,
    fallback_language: Option<String>,
    supported_languages: Vec<String>,
    score_threshold: f64,
}

impl PiiDetector {
    pub fn new(analyzer: Arc<dyn PiiAnalyzer>, config: &PiiConfig) -> Self {
        Self {
            analyzer,
            language: config.language.clone(),
            fallback_language: config.fallback_language.clone(),
            supported_languages: config.supported_languages.clone(),
            score_threshold: config.score_threshold,
        }
    }

    pub fn from_config(config: &PiiConfig) -> Result<Self> {
        let analyzer: Arc<dyn PiiAnalyzer> = match config.mode {
            DetectionMode::Presidio => Arc::new(PresidioClient::new(PresidioConfig::from(config))?),
            DetectionMode::Regex => Arc::new(RegexPiiAnalyzer::new(&config.patterns, config.score_threshold)?),
        };
        Ok(Self::new(analyzer, config))
    }

    pub async fn detect(&self, texts: &[&str], language_hint: Option<&str>) -> Result<PiiDetectionResult> {
        let started = Instant::now();
        let (language, language_fallback) = self.resolve_language(language_hint);

        let mut entities_by_message = Vec::with_capacity(texts.len());
        for text in texts {
            if text.trim().is_empty() {
                entities_by_message.push(Vec::new());
                continue;
            }

            let found: Vec<EntityWithScore> = self
                .analyzer
                .analyze(text, &language)
                .await?
                .into_iter()
                .filter(|entity| entity.score >= self.score_threshold)
                .collect();
            entities_by_message.push(resolve_conflicts(&found)?);
        }

        let new_entities: Vec<EntityWithScore> = entities_by_message.iter().flatten().cloned().collect();
        let scan_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            "PII scan of {} segments found {} entities in {}ms",
            texts.len(),
            new_entities.len(),
            scan_time_ms
        );

        Ok(PiiDetectionResult {
            has_pii: !new_entities.is_empty(),
            new_entities,
            entities_by_message,
            language,
            language_fallback,
            scan_time_ms,
        })
    }

    fn resolve_language(&self, hint: Option<&str>) -> (String, bool) {
        let requested = hint.unwrap_or(&self.language);
        if self.supported_languages.is_empty()
            || self.supported_languages.iter().any(|l| l == requested)
        {
            return (requested.to_string(), false);
        }

        match self.fallback_language {
            Some(ref fallback) => {
                info!("Language '{}' not supported, falling back to '{}'", requested, fallback);
                (fallback.clone(), true)
            }
            None => {
                warn!("Language '{}' not supported and no fallback configured", requested);
                (requested.to_string(), false)
            }
        }
    }
}

/// Offline analyzer driven by regex patterns, one pattern per entity type.
#[derive(Clone)]
pub struct RegexPiiAnalyzer {
    patterns: Vec<(String, Regex)>,
    confidence_threshold: f64,
}

impl RegexPiiAnalyzer {
    pub fn new(patterns: &BTreeMap<String, String>, confidence_threshold: f64) -> Result<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());

        for (name, pattern_str) in patterns {
            match Regex::new(pattern_str) {
                Ok(regex) => {
                    compiled.push((name.clone(), regex));
                    debug!("Loaded regex pattern for '{}': {}", name, pattern_str);
                }
                Err(e) => {
                    warn!("Invalid regex pattern for '{}': {}", name, e);
                    return Err(anyhow::anyhow!("Invalid regex pattern for '{}': {}", name, e));
                }
            }
        }

        Ok(Self {
            patterns: compiled,
            confidence_threshold,
        })
    }

    pub fn detect_in_text(&self, text: &str) -> Vec<EntityWithScore> {
        let mut entities = Vec::new();

        for (entity_type, regex) in &self.patterns {
            for mat in regex.find_iter(text).filter(|m| m.start() < m.end()) {
                let score = calculate_confidence(entity_type, mat.as_str());
                if score >= self.confidence_threshold {
                    entities.push(EntityWithScore::new(mat.start(), mat.end(), score, entity_type.clone()));
                }
            }
        }

        entities.sort_by_key(|e| e.start);
        entities
    }
}

#[async_trait]
impl PiiAnalyzer for RegexPiiAnalyzer {
    async fn analyze(&self, text: &str, _language: &str) -> Result<Vec<EntityWithScore>> {
        Ok(self.detect_in_text(text))
    }
}

// Rough per-type heuristics; a recognizer service scores far better.
fn calculate_confidence(entity_type: &str, text: &str) -> f64 {
    let digit_count = text.chars().filter(|c| c.is_ascii_digit()).count();
    match entity_type {
        "EMAIL_ADDRESS" => {
            if text.contains('@') && text.contains('.') {
                0.95
            } else {
                0.7
            }
        }
        "PHONE_NUMBER" => {
            if digit_count >= 10 {
                0.9
            } else {
                0.6
            }
        }
        "US_SSN" => {
            if text.matches('-').count() == 2 {
                0.95
            } else {
                0.8
            }
        }
        "CREDIT_CARD" => {
            if digit_count == 16 {
                0.85
            } else {
                0.7
            }
        }
        "IP_ADDRESS" => {
            let parts: Vec<&str> = text.split('.').collect();
            if parts.len() == 4 && parts.iter().all(|&p| p.parse::<u8>().is_ok()) {
                0.95
            } else {
                0.7
            }
        }
        "URL" => {
            if text.starts_with("http://") || text.starts_with("https://") {
                0.9
            } else {
                0.7
            }
        }
        _ => 0.8,
    }
}

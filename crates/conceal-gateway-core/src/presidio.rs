//! Presidio analyzer integration for Named Entity Recognition
//!
//! Presidio reports offsets in characters; they are converted to byte offsets
//! here so the rest of the gateway can slice Rust strings directly.

use crate::config::PiiConfig;
use crate::detection::PiiAnalyzer;
use crate::entity::EntityWithScore;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct PresidioConfig {
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub score_threshold: f64,
    pub entities: Vec<String>,
}

impl Default for PresidioConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:5002".to_string(),
            timeout_seconds: 10,
            score_threshold: 0.7,
            entities: Vec::new(),
        }
    }
}

impl From<&PiiConfig> for PresidioConfig {
    fn from(config: &PiiConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout_seconds: config.timeout_seconds,
            score_threshold: config.score_threshold,
            entities: config.entities.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entities: Option<&'a [String]>,
    score_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerFinding {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

#[derive(Clone)]
pub struct PresidioClient {
    client: Client,
    config: PresidioConfig,
}

impl PresidioClient {
    pub fn new(config: PresidioConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.config.endpoint))
            .send()
            .await;

        match response {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                debug!("Presidio health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn call_analyzer(&self, text: &str, language: &str) -> Result<Vec<AnalyzerFinding>> {
        let request = AnalyzeRequest {
            text,
            language,
            entities: if self.config.entities.is_empty() {
                None
            } else {
                Some(self.config.entities.as_slice())
            },
            score_threshold: self.config.score_threshold,
        };

        debug!("Making request to Presidio: {}/analyze", self.config.endpoint);

        let response = self
            .client
            .post(format!("{}/analyze", self.config.endpoint))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Presidio request failed with status {}: {}", status, error_text);
            return Err(anyhow::anyhow!("Presidio request failed: {} - {}", status, error_text));
        }

        let findings: Vec<AnalyzerFinding> = response.json().await?;
        debug!("Presidio returned {} findings", findings.len());
        Ok(findings)
    }
}

#[async_trait]
impl PiiAnalyzer for PresidioClient {
    async fn analyze(&self, text: &str, language: &str) -> Result<Vec<EntityWithScore>> {
        let findings = self.call_analyzer(text, language).await?;
        Ok(findings_to_entities(text, findings))
    }
}

/// Convert character-offset findings into byte-offset entities, dropping any
/// the text cannot hold.
pub fn findings_to_entities(text: &str, findings: Vec<AnalyzerFinding>) -> Vec<EntityWithScore> {
    let char_offsets: Vec<usize> = text
        .char_indices()
        .map(|(index, _)| index)
        .chain(std::iter::once(text.len()))
        .collect();

    findings
        .into_iter()
        .filter_map(|finding| {
            let start = char_offsets.get(finding.start).copied();
            let end = char_offsets.get(finding.end).copied();
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    Some(EntityWithScore::new(start, end, finding.score, finding.entity_type))
                }
                _ => {
                    warn!(
                        "Invalid entity positions for '{}': {}-{}",
                        finding.entity_type, finding.start, finding.end
                    );
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(entity_type: &str, start: usize, end: usize, score: f64) -> AnalyzerFinding {
        AnalyzerFinding {
            entity_type: entity_type.to_string(),
            start,
            end,
            score,
        }
    }

    #[test]
    fn test_ascii_offsets_unchanged() {
        let text = "My name is Alice";

        let entities = findings_to_entities(text, vec![finding("PERSON", 11, 16, 0.85)]);

        assert_eq!(entities, vec![EntityWithScore::new(11, 16, 0.85, "PERSON")]);
        assert_eq!(&text[11..16], "Alice");
    }

    #[test]
    fn test_character_offsets_converted_to_bytes() {
        let text = "Grüße an Jürgen";

        // "Jürgen" starts at character 9 and ends at 15.
        let entities = findings_to_entities(text, vec![finding("PERSON", 9, 15, 0.9)]);

        assert_eq!(entities.len(), 1);
        assert_eq!(&text[entities[0].start..entities[0].end], "Jürgen");
    }

    #[test]
    fn test_out_of_range_and_empty_findings_dropped() {
        let text = "short";

        let entities = findings_to_entities(
            text,
            vec![
                finding("PERSON", 2, 2, 0.9),
                finding("PERSON", 3, 40, 0.9),
                finding("LOCATION", 0, 5, 0.8),
            ],
        );

        assert_eq!(entities, vec![EntityWithScore::new(0, 5, 0.8, "LOCATION")]);
    }

    #[test]
    fn test_request_omits_empty_entity_filter() {
        let request = AnalyzeRequest {
            text: "hi",
            language: "en",
            entities: None,
            score_threshold: 0.5,
        };

        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("entities").is_none());
        assert_eq!(json["language"], "en");
    }

    #[test]
    fn test_finding_parses_presidio_payload() {
        let payload = r#"[{"entity_type":"EMAIL_ADDRESS","start":5,"end":22,"score":1.0,
            "analysis_explanation":null,"recognition_metadata":{"recognizer_name":"EmailRecognizer"}}]"#;

        let findings: Vec<AnalyzerFinding> = serde_json::from_str(payload).unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].entity_type, "EMAIL_ADDRESS");
    }

    #[test]
    fn test_health_check_unreachable_endpoint() {
        let config = PresidioConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout_seconds: 2,
            ..PresidioConfig::default()
        };
        let client = PresidioClient::new(config).unwrap();

        tokio_test::block_on(async {
            assert!(!client.health_check().await.unwrap());
        });
    }

    /// Requires a running Presidio analyzer on localhost:5002.
    #[tokio::test]
    #[ignore] // Ignored by default, run with --ignored to include
    async fn test_real_presidio_analyzer() -> Result<()> {
        let client = PresidioClient::new(PresidioConfig::default())?;
        if !client.health_check().await? {
            warn!("Presidio service not available, skipping");
            return Ok(());
        }

        let text = "Hi, I'm Sarah Johnson, reach me at sarah.johnson@company.com";
        let entities = client.analyze(text, "en").await?;

        assert!(entities.iter().any(|e| e.entity_type == "EMAIL_ADDRESS"));
        Ok(())
    }
}

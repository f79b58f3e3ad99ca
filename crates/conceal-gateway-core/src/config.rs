//! Configuration management for conceal-gateway

use crate::masking::PlaceholderFormat;
use anyhow::Result;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub routing: RoutingConfig,
    pub pii: PiiConfig,
    pub secrets: SecretsConfig,
    pub masking: MaskingConfig,
}

/// Backend a request is forwarded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Upstream,
    Local,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Upstream => write!(f, "upstream"),
            Provider::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub default: Provider,
    pub on_pii_detected: Provider,
}

/// What to do with a request that contains secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretsAction {
    Block,
    Redact,
    RouteLocal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    Presidio,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    pub enabled: bool,
    pub mode: DetectionMode,
    pub endpoint: String,
    pub language: String,
    pub fallback_language: Option<String>,
    #[serde(default)]
    pub supported_languages: Vec<String>,
    pub score_threshold: f64,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    pub enabled: bool,
    pub action: SecretsAction,
    pub patterns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskingConfig {
    pub enabled: bool,
    pub pii_placeholder: PlaceholderFormat,
    pub secrets_placeholder: PlaceholderFormat,
}

pub fn default_pii_patterns() -> BTreeMap<String, String> {
    let mut patterns = BTreeMap::new();
    patterns.insert(
        "EMAIL_ADDRESS".to_string(),
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b".to_string(),
    );
    patterns.insert(
        "PHONE_NUMBER".to_string(),
        r"(?:\+1[ -]?)?\(?\b\d{3}\)?[ -]?\d{3}-\d{4}\b".to_string(),
    );
    patterns.insert("US_SSN".to_string(), r"\b\d{3}-\d{2}-\d{4}\b".to_string());
    patterns.insert(
        "IP_ADDRESS".to_string(),
        r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b".to_string(),
    );
    patterns.insert(
        "CREDIT_CARD".to_string(),
        r"\b(?:\d{4}[ -]?){3}\d{4}\b".to_string(),
    );
    patterns
}

pub fn default_secret_patterns() -> BTreeMap<String, String> {
    let mut patterns = BTreeMap::new();
    patterns.insert(
        "API_KEY_OPENAI".to_string(),
        r"\bsk-(?:proj-)?[A-Za-z0-9_-]{20,}\b".to_string(),
    );
    patterns.insert(
        "API_KEY_ANTHROPIC".to_string(),
        r"\bsk-ant-[A-Za-z0-9_-]{20,}\b".to_string(),
    );
    patterns.insert("AWS_ACCESS_KEY".to_string(), r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b".to_string());
    patterns.insert(
        "GITHUB_TOKEN".to_string(),
        r"\bgh[pousr]_[A-Za-z0-9]{36,}\b".to_string(),
    );
    patterns.insert(
        "SLACK_TOKEN".to_string(),
        r"\bxox[abposr]-[A-Za-z0-9-]{10,}\b".to_string(),
    );
    patterns.insert(
        "JWT_TOKEN".to_string(),
        r"\beyJ[A-Za-z0-9_-]{8,}\.eyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\b".to_string(),
    );
    patterns.insert(
        "PEM_PRIVATE_KEY".to_string(),
        r"-----BEGIN (?:[A-Z]+ )?PRIVATE KEY-----[\s\S]*?-----END (?:[A-Z]+ )?PRIVATE KEY-----".to_string(),
    );
    patterns
}

impl Default for Config {
    fn default() -> Self {
        Self {
            routing: RoutingConfig {
                default: Provider::Upstream,
                on_pii_detected: Provider::Upstream,
            },
            pii: PiiConfig {
                enabled: true,
                mode: DetectionMode::Presidio,
                endpoint: "http://localhost:5002".to_string(),
                language: "en".to_string(),
                fallback_language: Some("en".to_string()),
                supported_languages: vec!["en".to_string()],
                score_threshold: 0.7,
                entities: vec![
                    "PERSON".to_string(),
                    "EMAIL_ADDRESS".to_string(),
                    "PHONE_NUMBER".to_string(),
                    "CREDIT_CARD".to_string(),
                    "IBAN_CODE".to_string(),
                    "IP_ADDRESS".to_string(),
                    "LOCATION".to_string(),
                ],
                patterns: default_pii_patterns(),
                timeout_seconds: 10,
            },
            secrets: SecretsConfig {
                enabled: true,
                action: SecretsAction::Redact,
                patterns: default_secret_patterns(),
            },
            masking: MaskingConfig {
                enabled: true,
                pii_placeholder: PlaceholderFormat::pii(),
                secrets_placeholder: PlaceholderFormat::secrets(),
            },
        }
    }
}

impl Config {
    pub fn get_app_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "conceal-gateway", "conceal-gateway")
            .ok_or_else(|| anyhow::anyhow!("Failed to determine application directories"))
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn get_default_config_path() -> Result<PathBuf> {
        let project_dirs = Self::get_app_dirs()?;
        let config_dir = project_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.join("conceal-gateway.toml"))
    }

    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, pattern) in self.pii.patterns.iter().chain(self.secrets.patterns.iter()) {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid regex pattern for '{}': {}", name, e))?;
        }

        if !(0.0..=1.0).contains(&self.pii.score_threshold) {
            return Err(anyhow::anyhow!("Score threshold must be between 0.0 and 1.0"));
        }

        if matches!(self.pii.mode, DetectionMode::Presidio) && self.pii.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Presidio mode requires a non-empty endpoint"));
        }

        if !self.pii.supported_languages.is_empty() {
            if let Some(ref fallback) = self.pii.fallback_language {
                if !self.pii.supported_languages.contains(fallback) {
                    return Err(anyhow::anyhow!(
                        "Fallback language '{}' is not in supported_languages",
                        fallback
                    ));
                }
            }
        }

        for (name, format) in [
            ("pii_placeholder", &self.masking.pii_placeholder),
            ("secrets_placeholder", &self.masking.secrets_placeholder),
        ] {
            if format.prefix.is_empty() || format.suffix.is_empty() {
                return Err(anyhow::anyhow!("{} needs a non-empty prefix and suffix", name));
            }
        }

        if self.masking.pii_placeholder == self.masking.secrets_placeholder {
            return Err(anyhow::anyhow!(
                "PII and secrets placeholders must differ, otherwise tokens cannot be told apart"
            ));
        }

        Ok(())
    }
}

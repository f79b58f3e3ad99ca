//! Request pipeline: secrets scan, PII scan, routing and masking
//!
//! Ties the detectors, the router and the placeholder contexts together for
//! one chat completion request. The outcome carries the rewritten request
//! and the [`StreamRewriter`] that restores the response.

use crate::config::{Config, Provider, SecretsAction};
use crate::detection::{PiiAnalyzer, PiiDetectionResult, PiiDetector};
use crate::error::GatewayError;
use crate::masking::{mask_text, PlaceholderContext};
use crate::request::ChatRequest;
use crate::routing::{decide, RouteDecision};
use crate::secrets::{SecretsDetectionResult, SecretsDetector};
use crate::stream::StreamRewriter;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of preparing one request for forwarding.
#[derive(Debug)]
pub struct ProcessedRequest {
    pub decision: RouteDecision,
    /// The request as it should be sent to `decision.provider`.
    pub request: ChatRequest,
    pub pii: PiiDetectionResult,
    /// `None` when secrets scanning is disabled.
    pub secrets: Option<SecretsDetectionResult>,
    pub rewriter: StreamRewriter,
}

impl ProcessedRequest {
    /// Restore placeholders in a complete, non-streamed response text.
    pub fn restore_text(&self, text: &str) -> String {
        self.rewriter.restore_text(text)
    }
}

pub struct Gateway {
    config: Config,
    pii_detector: Option<PiiDetector>,
    secrets_detector: Option<SecretsDetector>,
}

impl Gateway {
    /// Build a gateway with the analyzer selected by `config.pii.mode`.
    pub fn new(config: Config) -> Result<Self> {
        let pii_detector = if config.pii.enabled {
            Some(PiiDetector::from_config(&config.pii)?)
        } else {
            None
        };
        Self::build(config, pii_detector)
    }

    /// Build a gateway around a caller-provided analyzer.
    pub fn with_analyzer(config: Config, analyzer: Arc<dyn PiiAnalyzer>) -> Result<Self> {
        let pii_detector = if config.pii.enabled {
            Some(PiiDetector::new(analyzer, &config.pii))
        } else {
            None
        };
        Self::build(config, pii_detector)
    }

    fn build(config: Config, pii_detector: Option<PiiDetector>) -> Result<Self> {
        config.validate()?;

        let secrets_detector = if config.secrets.enabled {
            Some(SecretsDetector::new(&config.secrets.patterns)?)
        } else {
            None
        };

        info!(
            "Gateway ready (pii: {}, secrets: {}, masking: {})",
            config.pii.enabled, config.secrets.enabled, config.masking.enabled
        );

        Ok(Self {
            config,
            pii_detector,
            secrets_detector,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scan, route and rewrite `request`.
    ///
    /// Secrets are handled first: `block` fails the request, `redact` replaces
    /// each secret with a placeholder before PII detection sees the text.
    /// PII is masked only when the request goes to the upstream provider.
    pub async fn process(
        &self,
        mut request: ChatRequest,
        language_hint: Option<&str>,
    ) -> Result<ProcessedRequest, GatewayError> {
        let mut secrets_context = PlaceholderContext::new(self.config.masking.secrets_placeholder.clone())
            .map_err(GatewayError::Detection)?;
        let mut pii_context = PlaceholderContext::new(self.config.masking.pii_placeholder.clone())
            .map_err(GatewayError::Detection)?;

        let secrets = match self.secrets_detector {
            Some(ref detector) => Some(self.handle_secrets(detector, &mut request, &mut secrets_context)?),
            None => None,
        };

        let pii = match self.pii_detector {
            Some(ref detector) => {
                let segments = request.text_segments();
                detector
                    .detect(&segments, language_hint)
                    .await
                    .map_err(GatewayError::Detection)?
            }
            None => PiiDetectionResult::empty(
                language_hint.unwrap_or(&self.config.pii.language),
                request.text_segments().len(),
            ),
        };

        let decision = decide(
            &pii,
            &self.config.routing,
            secrets.as_ref(),
            Some(self.config.secrets.action),
        );
        info!("Routing request to {}: {}", decision.provider, decision.reason);

        if pii.has_pii && decision.provider == Provider::Upstream && self.config.masking.enabled {
            for (segment, entities) in request
                .text_segments_mut()
                .into_iter()
                .zip(&pii.entities_by_message)
            {
                if !entities.is_empty() {
                    *segment = mask_text(segment, entities, &mut pii_context);
                }
            }
            debug!("Masked {} distinct PII values", pii_context.len());
        }

        let rewriter = StreamRewriter::new(
            Some(pii_context).filter(|c| !c.is_empty()).map(Arc::new),
            Some(secrets_context).filter(|c| !c.is_empty()).map(Arc::new),
        );

        Ok(ProcessedRequest {
            decision,
            request,
            pii,
            secrets,
            rewriter,
        })
    }

    fn handle_secrets(
        &self,
        detector: &SecretsDetector,
        request: &mut ChatRequest,
        context: &mut PlaceholderContext,
    ) -> Result<SecretsDetectionResult, GatewayError> {
        let per_segment = request
            .text_segments()
            .into_iter()
            .map(|text| detector.detect(text))
            .collect::<Result<Vec<_>, _>>()?;
        let combined = SecretsDetectionResult::combine(&per_segment);

        if !combined.detected {
            return Ok(combined);
        }

        match self.config.secrets.action {
            SecretsAction::Block => {
                warn!("Blocking request, secrets detected: {}", combined.types().join(", "));
                return Err(GatewayError::SecretsBlocked {
                    types: combined.types(),
                });
            }
            SecretsAction::Redact => {
                for (segment, result) in request.text_segments_mut().into_iter().zip(&per_segment) {
                    if result.detected {
                        *segment = mask_text(segment, &result.redactions, context);
                    }
                }
                info!("Redacted secrets: {}", combined.types().join(", "));
            }
            SecretsAction::RouteLocal => {
                debug!("Secrets detected, leaving request intact for local routing");
            }
        }

        Ok(combined)
    }
}

//! Backend selection from detection outcomes and policy

use crate::config::{Provider, RoutingConfig, SecretsAction};
use crate::detection::PiiDetectionResult;
use crate::secrets::SecretsDetectionResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub provider: Provider,
    pub reason: String,
}

/// Pick the backend for a request.
///
/// Precedence:
/// 1. secrets detected under `route_local` go to the local backend;
/// 2. detected PII goes to `routing.on_pii_detected`;
/// 3. anything else goes to `routing.default`.
///
/// `block` and `redact` never influence the route. Blocking has to happen
/// before this is called and redaction is transparent to routing.
pub fn decide(
    pii: &PiiDetectionResult,
    routing: &RoutingConfig,
    secrets: Option<&SecretsDetectionResult>,
    secrets_action: Option<SecretsAction>,
) -> RouteDecision {
    if let (Some(secrets), Some(SecretsAction::RouteLocal)) = (secrets, secrets_action) {
        if secrets.detected {
            let types: Vec<&str> = secrets
                .matches
                .iter()
                .map(|m| m.secret_type.as_str())
                .collect();
            return RouteDecision {
                provider: Provider::Local,
                reason: format!("Secrets detected (route_local): {}", types.join(", ")),
            };
        }
    }

    if pii.has_pii {
        let mut types: Vec<&str> = Vec::new();
        for entity in &pii.new_entities {
            if !types.contains(&entity.entity_type.as_str()) {
                types.push(&entity.entity_type);
            }
        }
        return RouteDecision {
            provider: routing.on_pii_detected,
            reason: format!("PII detected: {}", types.join(", ")),
        };
    }

    RouteDecision {
        provider: routing.default,
        reason: "No PII detected".to_string(),
    }
}

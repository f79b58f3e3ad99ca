pub mod config;
pub mod conflict;
pub mod detection;
pub mod entity;
pub mod error;
pub mod interval;
pub mod masking;
pub mod pipeline;
pub mod presidio;
pub mod request;
pub mod routing;
pub mod secrets;
pub mod sse;
pub mod stream;

#[cfg(test)]
pub mod integration_tests;

pub use config::{Config, MaskingConfig, PiiConfig, Provider, RoutingConfig, SecretsAction, SecretsConfig};
pub use conflict::{resolve_conflicts, resolve_conflicts_simple};
pub use detection::{PiiAnalyzer, PiiDetectionResult, PiiDetector, RegexPiiAnalyzer};
pub use entity::{EntityWithScore, SecretMatch, SecretRedaction};
pub use error::{ConflictError, GatewayError, RewriteError};
pub use interval::{Interval, Span};
pub use masking::{PlaceholderContext, PlaceholderFormat};
pub use pipeline::{Gateway, ProcessedRequest};
pub use presidio::{PresidioClient, PresidioConfig};
pub use request::{ChatMessage, ChatRequest};
pub use routing::{decide, RouteDecision};
pub use secrets::{SecretsDetectionResult, SecretsDetector};
pub use stream::StreamRewriter;

//! Request-scoped generation settings.

use serde::{Deserialize, Serialize};

/// Provider selection carried explicitly through a single request.
///
/// Built by the transport layer from headers or body and passed by value into
/// orchestration entry points; nothing reads it from ambient state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestScope {
    /// LLM provider name, e.g. `openai`.
    pub provider: String,
    /// Model identifier understood by the provider.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional workflow label recorded on the job for analytics.
    pub workflow: Option<String>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self {
            provider: "default".to_owned(),
            model: "default".to_owned(),
            temperature: 0.7,
            workflow: None,
        }
    }
}

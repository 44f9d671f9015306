//! Narrators
//!
//! A narrator turns a finished `RcaResult` into prose. It only formats the
//! decision it is handed; the analyzer never consults it when choosing a
//! cause.

use crate::model::RcaResult;
use async_trait::async_trait;
use olly_core::config::NarratorSettings;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Narrator errors
#[derive(Error, Debug)]
pub enum NarratorError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Narrator returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Narrator returned no text")]
    EmptyResponse,

    #[error("Narrator configuration error: {0}")]
    Configuration(String),
}

/// Formats an analysis result as prose
#[async_trait]
pub trait Narrator: Send + Sync {
    fn name(&self) -> &str;

    async fn explain(&self, result: &RcaResult) -> Result<String, NarratorError>;
}

/// Fixed text, for tests and offline use
pub struct StaticNarrator {
    text: String,
}

impl StaticNarrator {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl Narrator for StaticNarrator {
    fn name(&self) -> &str {
        "static"
    }

    async fn explain(&self, _result: &RcaResult) -> Result<String, NarratorError> {
        Ok(self.text.clone())
    }
}

const SYSTEM_PROMPT: &str = "You explain a root-cause analysis that has already been decided. \
Restate the given root cause, causal chain and counterfactual in two or three plain sentences \
for an on-call engineer. Do not suggest any other cause and do not add facts that are not given.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Narrator backed by an OpenAI-compatible chat completions endpoint
pub struct LlmNarrator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl LlmNarrator {
    pub fn new(settings: &NarratorSettings) -> Result<Self, NarratorError> {
        if settings.endpoint.trim().is_empty() {
            return Err(NarratorError::Configuration("endpoint is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(concat!("ollystack/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            max_tokens: settings.max_tokens,
        })
    }
}

/// The user message: the decided result, nothing the model has to infer
pub fn render_prompt(result: &RcaResult) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Correlation id: {}", result.correlation_id);
    let _ = write!(prompt, "Root cause service: {}", result.root_cause_service);
    if let Some(metric) = &result.root_cause_metric {
        let _ = write!(prompt, " (metric {})", metric);
    }
    let _ = writeln!(prompt, "\nConfidence: {:.0}%", result.confidence * 100.0);
    if !result.causal_chain.interpretation.is_empty() {
        let _ = writeln!(prompt, "Causal chain: {}", result.causal_chain.interpretation);
    }
    if let Some(counterfactual) = &result.counterfactual {
        let _ = writeln!(prompt, "Counterfactual: {}", counterfactual);
    }
    prompt
}

#[async_trait]
impl Narrator for LlmNarrator {
    fn name(&self) -> &str {
        "llm"
    }

    async fn explain(&self, result: &RcaResult) -> Result<String, NarratorError> {
        let prompt = render_prompt(result);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.2,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!("Requesting narrative for {} from {}", result.correlation_id, self.endpoint);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NarratorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(NarratorError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CausalChain;

    fn result() -> RcaResult {
        RcaResult {
            correlation_id: "olly-k1-0badf00d".into(),
            root_cause_service: "db".into(),
            root_cause_metric: Some("db.pool.wait_ms".into()),
            confidence: 0.87,
            causal_chain: CausalChain {
                events: Vec::new(),
                weight: 2.0,
                strength: 0.86,
                interpretation: "1. [+0ms] db metric anomaly: pool saturated".into(),
            },
            counterfactual: Some("error rate would be approximately 0.0%".into()),
            candidates: Vec::new(),
            narrative: None,
        }
    }

    #[test]
    fn test_prompt_carries_decision() {
        let prompt = render_prompt(&result());
        assert!(prompt.contains("Root cause service: db (metric db.pool.wait_ms)"));
        assert!(prompt.contains("Confidence: 87%"));
        assert!(prompt.contains("Causal chain: 1. [+0ms]"));
        assert!(prompt.contains("Counterfactual:"));
    }

    #[tokio::test]
    async fn test_static_narrator() {
        let narrator = StaticNarrator::new("The database pool saturated.");
        assert_eq!(narrator.explain(&result()).await.unwrap(), "The database pool saturated.");
    }

    #[test]
    fn test_llm_narrator_rejects_empty_endpoint() {
        let settings = NarratorSettings {
            endpoint: " ".into(),
            ..NarratorSettings::default()
        };
        assert!(matches!(LlmNarrator::new(&settings), Err(NarratorError::Configuration(_))));
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Pool saturation in db.  "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("  Pool saturation in db.  "));
    }
}

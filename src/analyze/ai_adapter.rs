//! Generation adapter: the `Generator` abstraction, an OpenAI-compatible HTTP
//! implementation and a deterministic mock with failure injection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::AnalysisConfig;
use crate::error::{PipelineError, Result};

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Text produced for one story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub summary: String,
    pub impact: String,
    pub action: String,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

/// External text generation capability. Errors are always transient from the
/// caller's point of view: they are retried, rerouted or degraded, never fatal.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, model: &str, text: &str) -> Result<Generation>;
    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynGenerator = Arc<dyn Generator>;

/// Factory: build a generator according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock generator.
/// * Otherwise builds the OpenAI-compatible HTTP generator.
pub fn build_generator(cfg: &AnalysisConfig) -> Result<DynGenerator> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockGenerator::new()));
    }
    Ok(Arc::new(OpenAiGenerator::new(cfg)?))
}

// ------------------------------------------------------------
// OpenAI-compatible HTTP generator
// ------------------------------------------------------------

/// Chat Completions client. The bearer token comes from the env var named in
/// `analysis.api_key_env`; without it every call fails fast.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    prompt_version: String,
}

impl OpenAiGenerator {
    pub fn new(cfg: &AnalysisConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        let http = reqwest::Client::builder()
            .user_agent(concat!("story-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(cfg.timeout())
            .build()
            .map_err(|e| PipelineError::config(vec![format!("http client: {e}")]))?;
        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            api_key,
            prompt_version: cfg.prompt_version.clone(),
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, model: &str, text: &str) -> Result<Generation> {
        let Some(api_key) = &self.api_key else {
            return Err(PipelineError::generation(model, "no api key configured"));
        };

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
            response_format: ResponseFormat,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: TokenUsage,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }
        #[derive(Deserialize)]
        struct Payload {
            #[serde(default)]
            summary: String,
            #[serde(default)]
            impact: String,
            #[serde(default)]
            action: String,
        }

        let sys = format!(
            "You brief domain analysts on news items (prompt {}). Reply with a JSON object \
             with string fields \"summary\" (<=3 sentences), \"impact\" (who is affected and how) \
             and \"action\" (one concrete follow-up). No markdown.",
            self.prompt_version
        );
        let req = Req {
            model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &sys,
                },
                Msg {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.2,
            max_tokens: 400,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| PipelineError::generation(model, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::generation(model, format!("http {status}")));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| PipelineError::generation(model, format!("bad response body: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        let payload: Payload = serde_json::from_str(content)
            .map_err(|e| PipelineError::generation(model, format!("bad payload: {e}")))?;

        let summary = sanitize_field(&payload.summary, 600);
        if summary.is_empty() {
            return Err(PipelineError::generation(model, "empty summary"));
        }
        Ok(Generation {
            summary,
            impact: sanitize_field(&payload.impact, 400),
            action: sanitize_field(&payload.action, 240),
            token_usage: body.usage,
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Mock generator
// ------------------------------------------------------------

/// Per-model behaviour of the mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed,
    Fail,
    /// Never answers; exercises the caller's timeout.
    Hang,
}

/// Deterministic generator for tests and local runs. Output depends only on
/// `(model, text)`; every call is counted.
#[derive(Debug, Default)]
pub struct MockGenerator {
    behaviors: HashMap<String, MockBehavior>,
    calls: AtomicUsize,
    per_model: Mutex<HashMap<String, usize>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: &str, behavior: MockBehavior) -> Self {
        self.behaviors.insert(model.to_string(), behavior);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.per_model
            .lock()
            .map(|m| m.get(model).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, model: &str, text: &str) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.per_model.lock() {
            *m.entry(model.to_string()).or_default() += 1;
        }
        match self
            .behaviors
            .get(model)
            .copied()
            .unwrap_or(MockBehavior::Succeed)
        {
            MockBehavior::Succeed => {
                let head: String = text.chars().take(80).collect();
                let words = text.split_whitespace().count() as u32;
                Ok(Generation {
                    summary: format!("[{model}] {}", sanitize_field(&head, 120)),
                    impact: "Relevant to teams tracking this topic.".to_string(),
                    action: "Review the primary source.".to_string(),
                    token_usage: TokenUsage {
                        prompt_tokens: words,
                        completion_tokens: 24,
                        total_tokens: words + 24,
                    },
                })
            }
            MockBehavior::Fail => Err(PipelineError::generation(model, "mock failure")),
            MockBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(PipelineError::generation(model, "mock hang elapsed"))
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Sanitization
// ------------------------------------------------------------

/// Single line, control characters removed, whitespace collapsed, at most `max` chars.
pub fn sanitize_field(input: &str, max: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max));
    let mut prev_space = false;
    let mut n = 0;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() {
            ' '
        } else {
            ch
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
                n += 1;
            }
            prev_space = true;
        } else {
            out.push(c);
            n += 1;
            prev_space = false;
        }
        if n >= max {
            break;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_and_caps() {
        assert_eq!(sanitize_field("  a\n\n b\t c  ", 100), "a b c");
        assert_eq!(sanitize_field("abcdef", 3), "abc");
        assert_eq!(sanitize_field("Zürich\u{0007}ok", 100), "Zürich ok");
    }

    #[tokio::test]
    async fn mock_is_deterministic_and_counts_calls() {
        let g = MockGenerator::new().with_model("bad", MockBehavior::Fail);
        let a = g.generate("good", "Some text").await.unwrap();
        let b = g.generate("good", "Some text").await.unwrap();
        assert_eq!(a, b);
        assert!(g.generate("bad", "x").await.is_err());
        assert_eq!(g.call_count(), 3);
        assert_eq!(g.calls_for("good"), 2);
        assert_eq!(g.calls_for("bad"), 1);
    }

    #[serial_test::serial]
    #[tokio::test]
    async fn factory_honours_mock_mode() {
        std::env::set_var("AI_TEST_MODE", "mock");
        let g = build_generator(&AnalysisConfig::default()).unwrap();
        assert_eq!(g.name(), "mock");
        std::env::remove_var("AI_TEST_MODE");
        let g = build_generator(&AnalysisConfig::default()).unwrap();
        assert_eq!(g.name(), "openai");
    }

    #[serial_test::serial]
    #[tokio::test]
    async fn http_generator_without_key_fails_fast() {
        let cfg = AnalysisConfig {
            api_key_env: "STORY_DIGEST_TEST_MISSING_KEY".into(),
            ..Default::default()
        };
        std::env::remove_var("STORY_DIGEST_TEST_MISSING_KEY");
        let g = OpenAiGenerator::new(&cfg).unwrap();
        let err = g.generate("m", "text").await.unwrap_err();
        assert_eq!(err.code(), "generation_transient");
    }
}

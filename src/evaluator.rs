//! Candidate evaluation through an OpenRouter-compatible chat-completions API
//!
//! The evaluator is the only component that talks to the evaluation service.
//! Transport failures and unusable responses surface as
//! [`TriageError::EvaluationError`]; a reachable service returning prose
//! instead of the expected JSON degrades to a fallback "Not Promising"
//! verdict that preserves the raw response for audit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EvaluationConfig;
use crate::error::{Result, TriageError};
use crate::models::EvaluationVerdict;

/// Environment variable holding the evaluation service API key
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Eligibility rubric sent ahead of the message content. The service must
/// answer with a single JSON object; anything else triggers the fallback
/// verdict path.
const EVALUATION_RUBRIC: &str = r#"You are screening internship inquiry emails for a research group. Classify the candidate described in the user message as "Promising" or "Not Promising".

A candidate is Promising ONLY if ALL of the following hold:
1. A GPA (or CGPA) is explicitly stated somewhere in the email or resume text. If no GPA is stated anywhere, the candidate is Not Promising.
2. The stated GPA is 8.0 or higher on a 10-point scale (convert other scales before comparing).
3. The candidate's college or university is ranked in the NIRF Top 100 (India). If the college cannot be identified or is not in the NIRF Top 100, the candidate is Not Promising.

Respond with ONLY a JSON object in exactly this format, with no surrounding text:
{
  "classification": "Promising" or "Not Promising",
  "reasoning": "brief explanation of the decision",
  "college": "college name or null",
  "gpa": "stated GPA or null",
  "skills": ["list", "of", "notable", "skills"]
}"#;

/// Produces an eligibility verdict from assembled message content
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, content: &str) -> Result<EvaluationVerdict>;
}

/// Outcome of strict verdict parsing. Malformed responses are not errors;
/// the caller substitutes the fallback verdict.
#[derive(Debug)]
pub enum ParsedVerdict {
    Parsed(EvaluationVerdict),
    Malformed,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

/// Wire shape of the verdict JSON. `gpa` arrives as either a string or a
/// bare number depending on the model's mood.
#[derive(Deserialize)]
struct RawVerdict {
    // Only the classification is mandatory; every other field is
    // best-effort and may be omitted by the model
    classification: crate::models::Classification,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    college: Option<String>,
    #[serde(default)]
    gpa: Option<GpaValue>,
    #[serde(default)]
    skills: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GpaValue {
    Text(String),
    Number(f64),
}

impl GpaValue {
    fn into_string(self) -> String {
        match self {
            GpaValue::Text(s) => s,
            GpaValue::Number(n) => n.to_string(),
        }
    }
}

/// Evaluator backed by the OpenRouter chat-completions endpoint
pub struct OpenRouterEvaluator {
    client: reqwest::Client,
    config: EvaluationConfig,
    api_key: String,
}

impl OpenRouterEvaluator {
    pub fn new(config: EvaluationConfig, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(TriageError::ConfigError(format!(
                "Evaluation API key is empty (set {})",
                API_KEY_ENV
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                TriageError::ConfigError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Construct with the API key from the environment. A missing key is a
    /// startup-fatal configuration error, not a per-message failure.
    pub fn from_env(config: EvaluationConfig) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            TriageError::ConfigError(format!(
                "{} is not set; the evaluation service cannot be reached",
                API_KEY_ENV
            ))
        })?;
        Self::new(config, api_key)
    }
}

#[async_trait]
impl Evaluator for OpenRouterEvaluator {
    async fn evaluate(&self, content: &str) -> Result<EvaluationVerdict> {
        // The rubric travels as the system message; the assembled message
        // content is the only user turn
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: EVALUATION_RUBRIC.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: content.to_string(),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "internship-triage")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriageError::EvaluationError(format!(
                "Evaluation service returned {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            TriageError::EvaluationError(format!("Unreadable evaluation response: {}", e))
        })?;

        let raw = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                TriageError::EvaluationError("Evaluation response had no content".to_string())
            })?;

        match parse_verdict(&raw) {
            ParsedVerdict::Parsed(verdict) => {
                debug!(
                    "Evaluation verdict: {} ({})",
                    verdict.classification, verdict.reasoning
                );
                Ok(verdict)
            }
            ParsedVerdict::Malformed => {
                warn!("Evaluation response was not valid verdict JSON, using fallback");
                Ok(EvaluationVerdict::fallback(&raw))
            }
        }
    }
}

/// Strip a markdown code fence (``` or ```json) wrapping the payload, if any
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Two-stage verdict parse: fence strip, then strict JSON deserialization.
/// Any deviation from the expected shape is Malformed.
pub fn parse_verdict(raw: &str) -> ParsedVerdict {
    let payload = strip_code_fence(raw);
    match serde_json::from_str::<RawVerdict>(payload) {
        Ok(raw) => ParsedVerdict::Parsed(EvaluationVerdict {
            classification: raw.classification,
            reasoning: raw.reasoning,
            college: raw.college,
            gpa: raw.gpa.map(GpaValue::into_string),
            skills: raw.skills,
        }),
        Err(_) => ParsedVerdict::Malformed,
    }
}

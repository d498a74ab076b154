use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// Eligibility verdict for a candidate, as decided by the evaluation service.
///
/// Serialized with the human-readable names the service emits
/// ("Promising" / "Not Promising"); the same strings are stored in the
/// record store and used to pick the classification label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Classification {
    #[serde(rename = "Promising")]
    Promising,
    #[serde(rename = "Not Promising")]
    NotPromising,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Promising => "Promising",
            Classification::NotPromising => "Not Promising",
        }
    }

    /// Parse the classification string the evaluation service returns.
    /// Anything other than the two accepted values is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Promising" => Some(Classification::Promising),
            "Not Promising" => Some(Classification::NotPromising),
            _ => None,
        }
    }

    pub fn from_stored(value: &str) -> Result<Self> {
        Self::parse(value).ok_or_else(|| {
            TriageError::InvalidMessageFormat(format!("Unknown classification: {}", value))
        })
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one processed message - the idempotency ledger entry.
///
/// Exactly one record exists per remote message id. Records are created once
/// after a successful classify+label cycle and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMessageRecord {
    pub message_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub classification: Classification,
    pub has_attachments: bool,
    pub processed_at: DateTime<Utc>,
    /// Informational: the classification label id that was applied, if any
    pub applied_label_id: Option<String>,
}

impl ProcessedMessageRecord {
    pub fn new(
        message_id: impl Into<String>,
        subject: Option<String>,
        sender: Option<String>,
        classification: Classification,
        has_attachments: bool,
        applied_label_id: Option<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            subject,
            sender,
            classification,
            has_attachments,
            processed_at: Utc::now(),
            applied_label_id,
        }
    }
}

/// Structured verdict produced per message by the evaluator and folded into
/// the processed record. The candidate attributes are best-effort extractions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    pub classification: Classification,
    pub reasoning: String,
    pub college: Option<String>,
    pub gpa: Option<String>,
    pub skills: Vec<String>,
}

impl EvaluationVerdict {
    /// Default ineligible verdict used when the service response cannot be
    /// parsed. The raw response is preserved in the reasoning for audit.
    pub fn fallback(raw_response: &str) -> Self {
        Self {
            classification: Classification::NotPromising,
            reasoning: format!(
                "Evaluation response was not in the expected format. Raw response: {}",
                raw_response
            ),
            college: None,
            gpa: None,
            skills: Vec::new(),
        }
    }
}

/// A single message header (name/value pair).
#[derive(Debug, Clone, Default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// One node of the MIME part tree.
///
/// `body_data` carries decoded bytes: the Gmail client layer decodes the
/// base64url wire encoding at deserialization, so by the time a part reaches
/// the extractor its content is raw bytes (possibly non-UTF-8).
#[derive(Debug, Clone, Default)]
pub struct MimePart {
    pub mime_type: String,
    pub filename: Option<String>,
    pub body_data: Option<Vec<u8>>,
    pub attachment_id: Option<String>,
    pub parts: Vec<MimePart>,
}

/// Raw message representation fetched per poll cycle. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub id: String,
    pub snippet: String,
    pub headers: Vec<Header>,
    pub payload: Option<MimePart>,
}

/// A resume attachment scoped to one message's processing.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub attachment_id: String,
    /// Extracted text, best-effort; empty when extraction failed
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_parse() {
        assert_eq!(
            Classification::parse("Promising"),
            Some(Classification::Promising)
        );
        assert_eq!(
            Classification::parse("Not Promising"),
            Some(Classification::NotPromising)
        );
        assert_eq!(Classification::parse("Maybe"), None);
        assert_eq!(Classification::parse(""), None);
    }

    #[test]
    fn test_classification_serde_roundtrip() {
        let json = serde_json::to_string(&Classification::NotPromising).unwrap();
        assert_eq!(json, "\"Not Promising\"");

        let parsed: Classification = serde_json::from_str("\"Promising\"").unwrap();
        assert_eq!(parsed, Classification::Promising);
    }

    #[test]
    fn test_fallback_verdict_preserves_raw_response() {
        let verdict = EvaluationVerdict::fallback("I think this candidate looks great!");
        assert_eq!(verdict.classification, Classification::NotPromising);
        assert!(verdict
            .reasoning
            .contains("I think this candidate looks great!"));
        assert!(verdict.skills.is_empty());
        assert!(verdict.gpa.is_none());
    }

    #[test]
    fn test_record_serialization() {
        let record = ProcessedMessageRecord::new(
            "abc123",
            Some("Summer Internship Opportunity".to_string()),
            Some("student@iitb.ac.in".to_string()),
            Classification::Promising,
            true,
            Some("Label_42".to_string()),
        );

        let json = serde_json::to_string(&record).unwrap();
        let deserialized: ProcessedMessageRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.message_id, "abc123");
        assert_eq!(deserialized.classification, Classification::Promising);
        assert!(deserialized.has_attachments);
    }
}

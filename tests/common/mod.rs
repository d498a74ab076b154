//! Shared test fixtures: an in-memory mailbox, a scripted evaluator and
//! static credentials

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use internship_triage::client::{LabelInfo, LabelType, MailClient};
use internship_triage::error::{Result, TriageError};
use internship_triage::evaluator::Evaluator;
use internship_triage::models::{
    Classification, EvaluationVerdict, Header, MimePart, RawMessage,
};

/// In-memory mailbox standing in for the Gmail API
pub struct MockMailClient {
    messages: Vec<RawMessage>,
    attachments: HashMap<(String, String), Vec<u8>>,
    failing_messages: HashSet<String>,
    auth_failures: Mutex<HashSet<String>>,
    labels: Mutex<Vec<LabelInfo>>,
    next_label_id: AtomicU32,
    pub list_queries: Mutex<Vec<String>>,
    pub modify_calls: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
}

impl MockMailClient {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            attachments: HashMap::new(),
            failing_messages: HashSet::new(),
            auth_failures: Mutex::new(HashSet::new()),
            labels: Mutex::new(vec![LabelInfo {
                id: "INBOX".to_string(),
                name: "INBOX".to_string(),
                label_type: LabelType::System,
            }]),
            next_label_id: AtomicU32::new(1),
            list_queries: Mutex::new(Vec::new()),
            modify_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_message(mut self, message: RawMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_attachment(mut self, message_id: &str, attachment_id: &str, bytes: Vec<u8>) -> Self {
        self.attachments
            .insert((message_id.to_string(), attachment_id.to_string()), bytes);
        self
    }

    /// Make get_message fail for this id with a permanent error
    pub fn with_failing_message(mut self, message_id: &str) -> Self {
        self.failing_messages.insert(message_id.to_string());
        self.messages.push(plain_message(message_id, "broken", "broken", ""));
        self
    }

    /// Make the next get_message for this id fail as unauthorized;
    /// subsequent fetches succeed
    pub fn with_auth_failure_once(self, message_id: &str) -> Self {
        self.auth_failures
            .lock()
            .unwrap()
            .insert(message_id.to_string());
        self
    }

    pub fn user_labels(&self) -> Vec<String> {
        self.labels
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.label_type == LabelType::User)
            .map(|l| l.name.clone())
            .collect()
    }
}

#[async_trait]
impl MailClient for MockMailClient {
    async fn list_recent_messages(&self, max_results: u32, query: &str) -> Result<Vec<String>> {
        self.list_queries.lock().unwrap().push(query.to_string());
        Ok(self
            .messages
            .iter()
            .take(max_results as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        if self.auth_failures.lock().unwrap().remove(id) {
            return Err(TriageError::AuthError("HTTP 401: Unauthorized".to_string()));
        }
        if self.failing_messages.contains(id) {
            return Err(TriageError::ApiError(format!("scripted failure for {}", id)));
        }
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| TriageError::MessageNotFound(id.to_string()))
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        self.attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| TriageError::MessageNotFound(attachment_id.to_string()))
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Ok(self.labels.lock().unwrap().clone())
    }

    async fn create_label(&self, name: &str) -> Result<LabelInfo> {
        let id = format!(
            "Label_{}",
            self.next_label_id.fetch_add(1, Ordering::SeqCst)
        );
        let info = LabelInfo {
            id,
            name: name.to_string(),
            label_type: LabelType::User,
        };
        self.labels.lock().unwrap().push(info.clone());
        Ok(info)
    }

    async fn modify_message(
        &self,
        id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        self.modify_calls.lock().unwrap().push((
            id.to_string(),
            add_label_ids.to_vec(),
            remove_label_ids.to_vec(),
        ));
        Ok(())
    }
}

/// Evaluator returning one scripted verdict, recording what it was asked
pub struct MockEvaluator {
    classification: Classification,
    pub calls: AtomicU32,
    pub last_content: Mutex<Option<String>>,
}

impl MockEvaluator {
    pub fn returning(classification: Classification) -> Self {
        Self {
            classification,
            calls: AtomicU32::new(0),
            last_content: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Evaluator for MockEvaluator {
    async fn evaluate(&self, content: &str) -> Result<EvaluationVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_content.lock().unwrap() = Some(content.to_string());
        Ok(EvaluationVerdict {
            classification: self.classification,
            reasoning: "scripted verdict".to_string(),
            college: None,
            gpa: None,
            skills: vec![],
        })
    }
}

/// Credential provider that always has a token, counting refresh requests
pub struct StaticCredentials {
    token: Option<String>,
    refreshes: AtomicU32,
}

impl StaticCredentials {
    pub fn valid() -> Self {
        Self {
            token: Some("test-token".to_string()),
            refreshes: AtomicU32::new(0),
        }
    }

    pub fn refresh_count(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl internship_triage::auth::CredentialProvider for StaticCredentials {
    async fn access_token(&self) -> Result<Option<String>> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A simple single-part text message
pub fn plain_message(id: &str, subject: &str, snippet: &str, body: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        snippet: snippet.to_string(),
        headers: vec![
            Header {
                name: "Subject".to_string(),
                value: subject.to_string(),
            },
            Header {
                name: "From".to_string(),
                value: "student@example.edu".to_string(),
            },
        ],
        payload: Some(MimePart {
            mime_type: "text/plain".to_string(),
            body_data: Some(body.as_bytes().to_vec()),
            ..Default::default()
        }),
    }
}

/// A multipart message carrying a PDF resume attachment
pub fn message_with_pdf(id: &str, subject: &str, body: &str, attachment_id: &str) -> RawMessage {
    let mut message = plain_message(id, subject, "", "");
    message.payload = Some(MimePart {
        mime_type: "multipart/mixed".to_string(),
        parts: vec![
            MimePart {
                mime_type: "text/plain".to_string(),
                body_data: Some(body.as_bytes().to_vec()),
                ..Default::default()
            },
            MimePart {
                mime_type: "application/pdf".to_string(),
                filename: Some("resume.pdf".to_string()),
                attachment_id: Some(attachment_id.to_string()),
                ..Default::default()
            },
        ],
        ..Default::default()
    });
    message
}

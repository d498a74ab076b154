//! Gmail API client with retry logic for the triage pipeline

use async_trait::async_trait;
use google_gmail1::api::{Label, Message, MessagePart, ModifyMessageRequest};
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::GmailHub;
use crate::error::{Result, TriageError};
use crate::models::{Header, MimePart, RawMessage};

/// Whether a label is Gmail-defined (INBOX, SENT, ...) or user-created.
/// Classification labels must only ever resolve to user labels so they never
/// collide with built-in mailbox semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelType {
    System,
    User,
}

/// Label info returned from Gmail API
#[derive(Debug, Clone)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
    pub label_type: LabelType,
}

/// Trait defining the mail source operations the pipeline consumes.
/// Object-safe so tests can substitute an in-memory mailbox.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// List ids of the most recent messages matching a query, newest first
    async fn list_recent_messages(&self, max_results: u32, query: &str) -> Result<Vec<String>>;

    /// Fetch a full message including headers, body parts and snippet
    async fn get_message(&self, id: &str) -> Result<RawMessage>;

    /// Fetch the decoded bytes of one attachment
    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new user label
    async fn create_label(&self, name: &str) -> Result<LabelInfo>;

    /// Add and remove labels on a message in a single call
    async fn modify_message(
        &self,
        id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()>;
}

/// Production Gmail client wrapping the authenticated hub.
///
/// Transient failures (429, 5xx, network) are retried with exponential
/// backoff; list calls are additionally wrapped in a timeout to prevent
/// indefinite hangs.
pub struct GmailMailClient {
    hub: GmailHub,
}

impl GmailMailClient {
    pub fn new(hub: GmailHub) -> Self {
        Self { hub }
    }

    /// Check if an error is retryable
    fn should_retry(error: &TriageError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse a Gmail API Label into our LabelInfo
fn parse_label(label: Label) -> Option<LabelInfo> {
    let id = label.id?;
    let name = label.name?;
    let label_type = match label.type_.as_deref() {
        Some("system") => LabelType::System,
        _ => LabelType::User,
    };
    Some(LabelInfo {
        id,
        name,
        label_type,
    })
}

/// Convert the Gmail API message into our RawMessage representation
fn parse_raw_message(msg: Message) -> Result<RawMessage> {
    let id = msg
        .id
        .ok_or_else(|| TriageError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let snippet = msg.snippet.unwrap_or_default();

    let (headers, payload) = match msg.payload {
        Some(part) => {
            let headers = part
                .headers
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(|h| {
                    Some(Header {
                        name: h.name.clone()?,
                        value: h.value.clone()?,
                    })
                })
                .collect();
            (headers, Some(parse_mime_part(part)))
        }
        None => (Vec::new(), None),
    };

    Ok(RawMessage {
        id,
        snippet,
        headers,
        payload,
    })
}

fn parse_mime_part(part: MessagePart) -> MimePart {
    let (body_data, attachment_id) = match part.body {
        Some(body) => (body.data, body.attachment_id),
        None => (None, None),
    };

    MimePart {
        mime_type: part.mime_type.unwrap_or_default(),
        // Gmail sends filename: "" for non-attachment parts; treat as absent
        filename: part.filename.filter(|f| !f.is_empty()),
        body_data,
        attachment_id,
        parts: part
            .parts
            .unwrap_or_default()
            .into_iter()
            .map(parse_mime_part)
            .collect(),
    }
}

#[async_trait]
impl MailClient for GmailMailClient {
    async fn list_recent_messages(&self, max_results: u32, query: &str) -> Result<Vec<String>> {
        Self::with_retry("list_recent_messages", 3, || async {
            let timeout_duration = Duration::from_secs(30);
            let api_call = async {
                self.hub
                    .users()
                    .messages_list("me")
                    .q(query)
                    .max_results(max_results)
                    .add_scope("https://www.googleapis.com/auth/gmail.modify")
                    .doit()
                    .await
            };

            let (_, response) = match tokio::time::timeout(timeout_duration, api_call).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        "Gmail API messages_list call timed out after {:?}",
                        timeout_duration
                    );
                    return Err(TriageError::NetworkError(format!(
                        "API call timed out after {:?}",
                        timeout_duration
                    )));
                }
            };

            let ids: Vec<String> = response
                .messages
                .unwrap_or_default()
                .into_iter()
                .filter_map(|m| m.id)
                .collect();

            debug!("Listed {} recent messages", ids.len());
            Ok(ids)
        })
        .await
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let id = id.to_string();
        Self::with_retry("get_message", 3, || async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", &id)
                .format("full")
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;

            parse_raw_message(msg)
        })
        .await
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let message_id = message_id.to_string();
        let attachment_id = attachment_id.to_string();
        Self::with_retry("get_attachment", 3, || async {
            let (_, body) = self
                .hub
                .users()
                .messages_attachments_get("me", &message_id, &attachment_id)
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;

            body.data.ok_or_else(|| {
                TriageError::InvalidMessageFormat("Attachment body has no data".to_string())
            })
        })
        .await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", 3, || async {
            let timeout_duration = Duration::from_secs(30);
            let api_call = async {
                self.hub
                    .users()
                    .labels_list("me")
                    .add_scope("https://www.googleapis.com/auth/gmail.labels")
                    .doit()
                    .await
            };

            let (_, response) = match tokio::time::timeout(timeout_duration, api_call).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        "Gmail API labels_list call timed out after {:?}",
                        timeout_duration
                    );
                    return Err(TriageError::NetworkError(format!(
                        "API call timed out after {:?}",
                        timeout_duration
                    )));
                }
            };

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(parse_label)
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn create_label(&self, name: &str) -> Result<LabelInfo> {
        let name = name.to_string();
        Self::with_retry("create_label", 3, || async {
            let label = Label {
                name: Some(name.clone()),
                message_list_visibility: Some("show".to_string()),
                label_list_visibility: Some("labelShow".to_string()),
                ..Default::default()
            };

            let (_, created) = self
                .hub
                .users()
                .labels_create(label, "me")
                .add_scope("https://www.googleapis.com/auth/gmail.labels")
                .doit()
                .await?;

            parse_label(created)
                .ok_or_else(|| TriageError::LabelError("Created label has no ID".to_string()))
        })
        .await
    }

    async fn modify_message(
        &self,
        id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<()> {
        let id = id.to_string();
        let add_label_ids = add_label_ids.to_vec();
        let remove_label_ids = remove_label_ids.to_vec();
        // A 400 is permanent here and surfaces to the caller's stale-cache
        // handling; only transient failures are retried
        Self::with_retry("modify_message", 3, || async {
            let modify_request = ModifyMessageRequest {
                add_label_ids: if add_label_ids.is_empty() {
                    None
                } else {
                    Some(add_label_ids.clone())
                },
                remove_label_ids: if remove_label_ids.is_empty() {
                    None
                } else {
                    Some(remove_label_ids.clone())
                },
            };

            self.hub
                .users()
                .messages_modify(modify_request, "me", &id)
                .add_scope("https://www.googleapis.com/auth/gmail.modify")
                .doit()
                .await?;

            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    #[test]
    fn test_should_retry_transient_errors() {
        let server_error = TriageError::ServerError {
            status: 500,
            message: "Internal error".to_string(),
        };
        assert!(GmailMailClient::should_retry(&server_error));

        let rate_limit = TriageError::RateLimitExceeded { retry_after: 5 };
        assert!(GmailMailClient::should_retry(&rate_limit));

        let network = TriageError::NetworkError("connection reset".to_string());
        assert!(GmailMailClient::should_retry(&network));
    }

    #[test]
    fn test_should_not_retry_permanent_errors() {
        let auth = TriageError::AuthError("invalid token".to_string());
        assert!(!GmailMailClient::should_retry(&auth));

        let bad_request = TriageError::BadRequest("invalid label".to_string());
        assert!(!GmailMailClient::should_retry(&bad_request));
    }

    #[test]
    fn test_parse_label_types() {
        let system = Label {
            id: Some("INBOX".to_string()),
            name: Some("INBOX".to_string()),
            type_: Some("system".to_string()),
            ..Default::default()
        };
        let parsed = parse_label(system).unwrap();
        assert_eq!(parsed.label_type, LabelType::System);

        let user = Label {
            id: Some("Label_7".to_string()),
            name: Some("Internship".to_string()),
            type_: Some("user".to_string()),
            ..Default::default()
        };
        let parsed = parse_label(user).unwrap();
        assert_eq!(parsed.label_type, LabelType::User);
    }

    #[test]
    fn test_parse_label_missing_id_is_dropped() {
        let label = Label {
            name: Some("orphan".to_string()),
            ..Default::default()
        };
        assert!(parse_label(label).is_none());
    }

    #[test]
    fn test_parse_raw_message() {
        let msg = Message {
            id: Some("m1".to_string()),
            snippet: Some("snippet text".to_string()),
            payload: Some(MessagePart {
                mime_type: Some("multipart/mixed".to_string()),
                filename: Some("".to_string()),
                headers: Some(vec![
                    MessagePartHeader {
                        name: Some("Subject".to_string()),
                        value: Some("Internship request".to_string()),
                    },
                    MessagePartHeader {
                        name: Some("From".to_string()),
                        value: Some("student@example.com".to_string()),
                    },
                ]),
                parts: Some(vec![MessagePart {
                    mime_type: Some("application/pdf".to_string()),
                    filename: Some("resume.pdf".to_string()),
                    body: Some(MessagePartBody {
                        attachment_id: Some("att-1".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let raw = parse_raw_message(msg).unwrap();
        assert_eq!(raw.id, "m1");
        assert_eq!(raw.snippet, "snippet text");
        assert_eq!(raw.headers.len(), 2);

        let payload = raw.payload.unwrap();
        // Empty filename normalizes to None
        assert!(payload.filename.is_none());
        assert_eq!(payload.parts.len(), 1);
        assert_eq!(payload.parts[0].filename.as_deref(), Some("resume.pdf"));
        assert_eq!(payload.parts[0].attachment_id.as_deref(), Some("att-1"));
    }

    #[test]
    fn test_parse_raw_message_requires_id() {
        let msg = Message::default();
        assert!(parse_raw_message(msg).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_succeeds_after_transient_error() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailClient::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                let current = count.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    Err(TriageError::NetworkError("Connection timeout".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_fails_on_permanent_error() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailClient::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(TriageError::AuthError("Invalid credentials".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        // Should only attempt once, no retries for permanent errors
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }
}

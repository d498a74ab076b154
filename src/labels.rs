//! Label resolution and application
//!
//! Gmail addresses labels by opaque id, not name. [`LabelCache`] holds the
//! name-to-id mapping as an explicit, inspectable object; [`LabelCoordinator`]
//! owns the cache and performs the ensure/create/apply operations on top of a
//! [`MailClient`].
//!
//! Labeling is decoration: a message whose labels could not be applied is
//! still considered processed, so every failure in [`mark_processed`] is
//! logged and swallowed rather than propagated.
//!
//! [`mark_processed`]: LabelCoordinator::mark_processed

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::{LabelInfo, LabelType, MailClient};
use crate::config::LabelsConfig;
use crate::error::{Result, TriageError};
use crate::models::Classification;

/// Delay before the single retry after a 400 on label modification. A 400
/// here usually means a stale label id (label deleted and recreated out of
/// band); the pause gives Gmail time to settle before the cache refresh.
const STALE_LABEL_RETRY_DELAY: Duration = Duration::from_millis(1500);

/// Name-to-label lookup table, keyed case-insensitively and by label type so
/// user labels can never resolve to a same-named system label.
///
/// Starts unpopulated; the coordinator fills it from a full label listing and
/// invalidates it wholesale when an id turns out to be stale.
#[derive(Debug, Default)]
pub struct LabelCache {
    entries: Option<HashMap<(String, LabelType), LabelInfo>>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_populated(&self) -> bool {
        self.entries.is_some()
    }

    pub fn get(&self, name: &str, label_type: LabelType) -> Option<&LabelInfo> {
        self.entries
            .as_ref()
            .and_then(|map| map.get(&(name.to_lowercase(), label_type)))
    }

    pub fn insert(&mut self, info: LabelInfo) {
        self.entries
            .get_or_insert_with(HashMap::new)
            .insert((info.name.to_lowercase(), info.label_type), info);
    }

    /// Replace the cache contents with a fresh listing snapshot
    pub fn refresh_from(&mut self, snapshot: Vec<LabelInfo>) {
        let mut map = HashMap::with_capacity(snapshot.len());
        for info in snapshot {
            map.insert((info.name.to_lowercase(), info.label_type), info);
        }
        self.entries = Some(map);
    }

    /// Drop all entries; the next lookup repopulates from the remote
    pub fn invalidate(&mut self) {
        self.entries = None;
    }
}

/// Owns the label cache and performs label operations for the pipeline
pub struct LabelCoordinator {
    client: Arc<dyn MailClient>,
    cache: Mutex<LabelCache>,
    labels: LabelsConfig,
}

impl LabelCoordinator {
    pub fn new(client: Arc<dyn MailClient>, labels: LabelsConfig) -> Self {
        Self {
            client,
            cache: Mutex::new(LabelCache::new()),
            labels,
        }
    }

    /// Create every configured triage label that does not exist yet,
    /// parent first so the hierarchy renders correctly. Run at startup;
    /// any failure here is fatal.
    pub async fn ensure_labels_exist(&self) -> Result<()> {
        for name in self.labels.required() {
            let id = self.get_or_create_label_id(name).await?;
            debug!("Label {} resolved to {}", name, id);
        }
        info!("All triage labels present");
        Ok(())
    }

    /// Resolve a user label name to its id, creating the label when absent.
    ///
    /// A cache miss may only be staleness, so the cache is refreshed from the
    /// remote before a creation is attempted.
    pub async fn get_or_create_label_id(&self, name: &str) -> Result<String> {
        let mut cache = self.cache.lock().await;
        self.populate_if_needed(&mut cache).await?;

        if let Some(info) = cache.get(name, LabelType::User) {
            return Ok(info.id.clone());
        }

        let snapshot = self.client.list_labels().await?;
        cache.refresh_from(snapshot);
        if let Some(info) = cache.get(name, LabelType::User) {
            return Ok(info.id.clone());
        }

        match self.client.create_label(name).await {
            Ok(info) => {
                info!("Created label {} ({})", info.name, info.id);
                let id = info.id.clone();
                cache.insert(info);
                Ok(id)
            }
            // Lost a create race; refresh once more and re-check
            Err(e) => {
                warn!("Creating label {} failed ({}), refreshing cache", name, e);
                let snapshot = self.client.list_labels().await?;
                cache.refresh_from(snapshot);
                match cache.get(name, LabelType::User) {
                    Some(info) => Ok(info.id.clone()),
                    None => Err(TriageError::LabelError(format!(
                        "Failed to create label {}: {}",
                        name, e
                    ))),
                }
            }
        }
    }

    /// Apply the classification and processed labels to a message and archive
    /// it out of the inbox, all in one modify call.
    ///
    /// Returns the applied classification label id, or None when labeling
    /// failed. Never returns an error: by the time this runs the message has
    /// been classified, and a labeling failure must not undo that.
    pub async fn mark_processed(
        &self,
        message_id: &str,
        classification: Classification,
    ) -> Option<String> {
        match self.try_mark_processed(message_id, classification).await {
            Ok(label_id) => Some(label_id),
            Err(e) => {
                warn!("Failed to label message {}: {}", message_id, e);
                None
            }
        }
    }

    async fn try_mark_processed(
        &self,
        message_id: &str,
        classification: Classification,
    ) -> Result<String> {
        let (add, remove) = self.resolve_modification(classification).await?;

        match self
            .client
            .modify_message(message_id, &add, &remove)
            .await
        {
            Ok(()) => Ok(add[0].clone()),
            // A 400 means one of the ids went stale. Refresh the cache and
            // retry exactly once with freshly resolved ids.
            Err(TriageError::BadRequest(e)) => {
                warn!(
                    "Label modification rejected for message {} ({}), refreshing label cache",
                    message_id, e
                );
                tokio::time::sleep(STALE_LABEL_RETRY_DELAY).await;
                self.cache.lock().await.invalidate();

                let (add, remove) = self.resolve_modification(classification).await?;
                self.client
                    .modify_message(message_id, &add, &remove)
                    .await?;
                Ok(add[0].clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve the (add, remove) label id sets for marking one message.
    /// add[0] is always the classification label id.
    async fn resolve_modification(
        &self,
        classification: Classification,
    ) -> Result<(Vec<String>, Vec<String>)> {
        let classification_id = self
            .get_or_create_label_id(self.labels.for_classification(classification))
            .await?;
        let processed_id = self
            .get_or_create_label_id(&self.labels.processed)
            .await?;

        // Archival is best-effort: if INBOX cannot be resolved the message
        // simply stays in the inbox with its triage labels applied.
        let mut remove = Vec::new();
        {
            let mut cache = self.cache.lock().await;
            self.populate_if_needed(&mut cache).await?;
            if let Some(inbox) = cache.get("INBOX", LabelType::System) {
                remove.push(inbox.id.clone());
            }
        }

        Ok((vec![classification_id, processed_id], remove))
    }

    async fn populate_if_needed(&self, cache: &mut LabelCache) -> Result<()> {
        if !cache.is_populated() {
            let snapshot = self.client.list_labels().await?;
            debug!("Populated label cache with {} labels", snapshot.len());
            cache.refresh_from(snapshot);
        }
        Ok(())
    }
}

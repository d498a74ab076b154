//! Poll loop orchestration
//!
//! The poller ties the pipeline together: list recent inbox messages, run
//! each unprocessed keyword-matching message through extraction, evaluation
//! and labeling, and record the result. Cycles never overlap: the next sleep
//! starts only after the current cycle has fully completed.
//!
//! Message failures are contained per message; only a failure to list at all
//! aborts a cycle, and even that only skips the cycle, never the loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::CredentialProvider;
use crate::client::MailClient;
use crate::config::{LabelsConfig, PollConfig};
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::extractor;
use crate::labels::LabelCoordinator;
use crate::models::{Classification, ProcessedMessageRecord};
use crate::store::ProcessedStore;

// The listing is deliberately unfiltered. Processed messages leave the
// inbox but must still appear here, so dedup stays the store's job.
const LIST_QUERY: &str = "";

/// Terminal outcome for one message within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Classified, labeled and recorded
    Processed(Classification),
    /// Already present in the record store
    Skipped,
    /// No triage keyword in subject or snippet; left untouched
    NoKeywords,
}

/// Per-cycle tally, logged at cycle end
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub processed: u32,
    pub skipped: u32,
    pub no_keywords: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerStatus {
    pub active: bool,
    pub interval: Duration,
}

/// Shared pipeline state, cloneable into the background task
struct PollerCore {
    client: Arc<dyn MailClient>,
    credentials: Arc<dyn CredentialProvider>,
    evaluator: Arc<dyn Evaluator>,
    labels: LabelCoordinator,
    store: Arc<ProcessedStore>,
    poll: PollConfig,
}

/// Background poller with idempotent start/stop lifecycle
pub struct Poller {
    core: Arc<PollerCore>,
    shutdown: Mutex<Option<watch::Sender<()>>>,
}

impl Poller {
    pub fn new(
        client: Arc<dyn MailClient>,
        credentials: Arc<dyn CredentialProvider>,
        evaluator: Arc<dyn Evaluator>,
        labels_config: LabelsConfig,
        store: Arc<ProcessedStore>,
        poll: PollConfig,
    ) -> Self {
        let labels = LabelCoordinator::new(Arc::clone(&client), labels_config);
        Self {
            core: Arc::new(PollerCore {
                client,
                credentials,
                evaluator,
                labels,
                store,
                poll,
            }),
            shutdown: Mutex::new(None),
        }
    }

    pub fn label_coordinator(&self) -> &LabelCoordinator {
        &self.core.labels
    }

    /// Start the background loop. A second start while active is a no-op.
    pub fn start(&self) {
        let mut shutdown = match self.shutdown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if shutdown.is_some() {
            warn!("Poller already active, ignoring start");
            return;
        }

        let (tx, mut rx) = watch::channel(());
        *shutdown = Some(tx);

        let core = Arc::clone(&self.core);
        let interval = Duration::from_millis(core.poll.interval_ms);
        info!("Poller started, interval {:?}", interval);

        tokio::spawn(async move {
            loop {
                core.run_cycle().await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = rx.changed() => {
                        info!("Poller stopping");
                        break;
                    }
                }
            }
        });
    }

    /// Signal the loop to stop at the next cycle boundary. A running cycle
    /// is never interrupted mid-message. Stopping an inactive poller is a
    /// no-op.
    pub fn stop(&self) {
        let mut shutdown = match self.shutdown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match shutdown.take() {
            Some(tx) => {
                // An unreceivable signal means the task already exited
                let _ = tx.send(());
            }
            None => warn!("Poller not active, ignoring stop"),
        }
    }

    pub fn status(&self) -> PollerStatus {
        let active = match self.shutdown.lock() {
            Ok(guard) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        };
        PollerStatus {
            active,
            interval: Duration::from_millis(self.core.poll.interval_ms),
        }
    }

    /// Run one cycle immediately, outside the background loop
    pub async fn run_cycle_once(&self) -> CycleSummary {
        self.core.run_cycle().await
    }
}

impl PollerCore {
    /// One full poll cycle. Never returns an error: list failures skip the
    /// cycle, message failures are tallied and contained.
    async fn run_cycle(&self) -> CycleSummary {
        let mut summary = CycleSummary::default();

        // Credential gate: without a valid token, skip quietly and let the
        // next cycle try again rather than hammering the API.
        match self.credentials.access_token().await {
            Ok(Some(_)) => {}
            Ok(None) => {
                info!("No valid credentials, skipping poll cycle");
                return summary;
            }
            Err(e) => {
                warn!("Credential check failed, skipping poll cycle: {}", e);
                return summary;
            }
        }

        let ids = match self.list_with_reauth().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to list messages, skipping cycle: {}", e);
                return summary;
            }
        };

        debug!("Poll cycle: {} candidate messages", ids.len());

        for id in &ids {
            let result = match self.process_one(id).await {
                // A rejected credential gets one refresh and one retry of
                // the same message; if the refresh itself fails the rest of
                // the cycle is abandoned (the scheduler keeps running)
                Err(e) if e.is_unauthorized() => {
                    warn!(
                        "Message {} rejected as unauthorized, refreshing credentials",
                        id
                    );
                    match self.credentials.refresh().await {
                        Ok(()) => self.process_one(id).await,
                        Err(refresh_err) => {
                            error!(
                                "Credential refresh failed, abandoning cycle: {}",
                                refresh_err
                            );
                            summary.errors += 1;
                            break;
                        }
                    }
                }
                other => other,
            };

            match result {
                Ok(Outcome::Processed(classification)) => {
                    info!("Processed message {} as {}", id, classification);
                    summary.processed += 1;
                }
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Ok(Outcome::NoKeywords) => summary.no_keywords += 1,
                Err(e) => {
                    warn!("Failed to process message {}: {}", id, e);
                    summary.errors += 1;
                }
            }
        }

        info!(
            "Poll cycle complete: {} processed, {} skipped, {} without keywords, {} errors",
            summary.processed, summary.skipped, summary.no_keywords, summary.errors
        );
        summary
    }

    /// List recent messages, refreshing credentials and retrying once if the
    /// remote rejects the token
    async fn list_with_reauth(&self) -> Result<Vec<String>> {
        match self
            .client
            .list_recent_messages(self.poll.max_results, LIST_QUERY)
            .await
        {
            Ok(ids) => Ok(ids),
            Err(e) if e.is_unauthorized() => {
                warn!("Listing rejected as unauthorized, refreshing credentials");
                self.credentials.refresh().await?;
                self.client
                    .list_recent_messages(self.poll.max_results, LIST_QUERY)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Take one message through the full pipeline
    async fn process_one(&self, id: &str) -> Result<Outcome> {
        if self.store.find_by_message_id(id)?.is_some() {
            debug!("Message {} already processed", id);
            return Ok(Outcome::Skipped);
        }

        let message = self.client.get_message(id).await?;
        let subject = extractor::header_value(&message, "Subject");
        let sender = extractor::header_value(&message, "From");

        if !self.matches_keywords(&subject, &message.snippet) {
            debug!("Message {} has no triage keywords", id);
            return Ok(Outcome::NoKeywords);
        }

        let body = extractor::extract_body(&message);

        let mut attachments = extractor::collect_attachments(&message);
        for attachment in &mut attachments {
            match self.client.get_attachment(id, &attachment.attachment_id).await {
                Ok(bytes) => {
                    attachment.text = extractor::extract_attachment_text(
                        &attachment.mime_type,
                        &attachment.filename,
                        &bytes,
                    );
                }
                // A lost attachment degrades to empty text, it never blocks
                // evaluation of the message itself
                Err(e) => warn!(
                    "Failed to fetch attachment {} of message {}: {}",
                    attachment.filename, id, e
                ),
            }
        }

        let content = extractor::assemble_evaluation_text(&subject, &sender, &body, &attachments);
        let verdict = self.evaluator.evaluate(&content).await?;

        let applied_label_id = self
            .labels
            .mark_processed(id, verdict.classification)
            .await;

        self.store.insert(&ProcessedMessageRecord::new(
            id,
            (!subject.is_empty()).then(|| subject.clone()),
            (!sender.is_empty()).then(|| sender.clone()),
            verdict.classification,
            !attachments.is_empty(),
            applied_label_id,
        ))?;

        Ok(Outcome::Processed(verdict.classification))
    }

    /// Case-insensitive substring match of any configured keyword against
    /// subject and snippet. Attachment content is never consulted here.
    fn matches_keywords(&self, subject: &str, snippet: &str) -> bool {
        let haystack = format!("{} {}", subject, snippet).to_lowercase();
        self.poll
            .keywords
            .iter()
            .any(|keyword| haystack.contains(&keyword.to_lowercase()))
    }
}

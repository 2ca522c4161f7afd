use crate::db::Database;
use crate::enrich::{self, Enricher};
use crate::error::{Error, Result};
use crate::gmail::{self, MailService};
use crate::models::MessageSummary;
use crate::predicate::Predicate;
use crate::sync::SharedSyncState;
use crate::tasks::{BackgroundTasks, TaskKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message-level operations that touch both the remote mailbox and the
/// local cache.
#[derive(Clone)]
pub struct Mailbox {
    mail: Option<Arc<dyn MailService>>,
    db: Database,
    enricher: Arc<Enricher>,
    tasks: BackgroundTasks,
    state: SharedSyncState,
}

impl Mailbox {
    pub fn new(
        mail: Option<Arc<dyn MailService>>,
        db: Database,
        enricher: Arc<Enricher>,
        tasks: BackgroundTasks,
        state: SharedSyncState,
    ) -> Self {
        Self {
            mail,
            db,
            enricher,
            tasks,
            state,
        }
    }

    fn mail(&self) -> Result<&Arc<dyn MailService>> {
        self.mail.as_ref().ok_or(Error::ServiceUnavailable("gmail"))
    }

    /// Returns the message body, from the cache when possible.
    ///
    /// On a cache miss the full message is fetched and its body stored
    /// before returning. Marking it read, embedding the body and extracting
    /// importance/deadline are then queued in the background; the caller
    /// does not wait for them.
    pub async fn message_body(&self, id: &str) -> Result<String> {
        if let Some(body) = self.db.get_body(id).await? {
            debug!("Cache hit for body of {}", id);
            return Ok(body);
        }

        debug!("Cache miss for body of {}, fetching", id);
        let mail = self.mail()?;
        let root = mail
            .get_full(id)
            .await
            .map_err(|source| Error::RemoteFetch {
                id: id.to_string(),
                source,
            })?;

        let body = gmail::extract_body(&root);
        if !self.db.set_body(id, &body).await? {
            // trashed or expired while the fetch was in flight
            warn!("Message {} is no longer cached, not enriching it", id);
            return Ok(body);
        }

        self.queue_mark_read(id).await;
        if !body.is_empty() {
            self.queue_body_enrichment(id, &body).await;
        }

        Ok(body)
    }

    async fn queue_mark_read(&self, id: &str) {
        let mailbox = self.clone();
        let message_id = id.to_string();
        let queued = self
            .tasks
            .submit(TaskKind::MarkRead, id, async move {
                mailbox.mark_read(&message_id).await
            })
            .await;
        if let Err(e) = queued {
            warn!("Could not queue mark-read for {}: {}", id, e);
        }
    }

    async fn queue_body_enrichment(&self, id: &str, body: &str) {
        let (sender, subject) = match self.db.get_header(id).await {
            Ok(header) => header.unwrap_or_default(),
            Err(e) => {
                warn!("Could not read header of {}: {}", id, e);
                Default::default()
            }
        };
        let text = enrich::full_text(&sender, &subject, body, self.enricher.char_budget());

        let enricher = self.enricher.clone();
        let message_id = id.to_string();
        let queued = self
            .tasks
            .submit(TaskKind::Vectorize, id, async move {
                enricher.vectorize(&message_id, &text).await
            })
            .await;
        if let Err(e) = queued {
            warn!("Could not queue vectorization for {}: {}", id, e);
        }

        let enricher = self.enricher.clone();
        let message_id = id.to_string();
        let queued = self
            .tasks
            .submit(TaskKind::ExtractSignals, id, async move {
                enricher.extract_signals(&message_id).await.map(|_| ())
            })
            .await;
        if let Err(e) = queued {
            warn!("Could not queue signal extraction for {}: {}", id, e);
        }
    }

    /// Clears UNREAD remotely, then records the read flag locally.
    pub async fn mark_read(&self, id: &str) -> Result<()> {
        let mail = self.mail()?;
        mail.mark_as_read(id)
            .await
            .map_err(|source| Error::RemoteMutation {
                id: id.to_string(),
                source,
            })?;
        self.db.mark_message_as_read(id, true).await?;
        Ok(())
    }

    /// Moves the message to the remote trash, then drops it from the cache.
    ///
    /// Nothing local changes unless the remote call succeeds. If the local
    /// delete then fails, `LocalInconsistency` is returned and the next sync
    /// is left to reconcile.
    pub async fn trash(&self, id: &str) -> Result<()> {
        let mail = self.mail()?;
        mail.trash_message(id)
            .await
            .map_err(|source| Error::RemoteMutation {
                id: id.to_string(),
                source,
            })?;

        if let Ok(mut state) = self.state.lock() {
            state.mark_trashed(id);
        }

        match self.db.delete_message(id).await {
            Ok(_) => {
                info!("Moved {} to trash", id);
                Ok(())
            }
            Err(Error::Database(source)) => {
                warn!("Trashed {} remotely but local delete failed: {}", id, source);
                Err(Error::LocalInconsistency {
                    id: id.to_string(),
                    source,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn summarize(&self, id: &str) -> Result<Option<String>> {
        self.enricher.summarize(id).await
    }

    /// Channel names in configuration order.
    pub async fn list_channels(&self) -> Result<Vec<String>> {
        let channels = self.db.get_channels().await?;
        Ok(channels.into_iter().map(|c| c.name).collect())
    }

    /// Messages of a channel, newest first. An unknown channel or a
    /// predicate that does not parse lists everything.
    pub async fn messages_by_channel(&self, name: &str) -> Result<Vec<MessageSummary>> {
        let predicate = match self.db.get_channel(name).await? {
            Some(channel) => Predicate::parse_or_match_all(&channel.predicate),
            None => {
                debug!("Unknown channel {:?}, listing everything", name);
                Predicate::match_all()
            }
        };
        self.db.get_messages_matching(&predicate).await
    }
}

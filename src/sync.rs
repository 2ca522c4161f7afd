use crate::config::GmailConfig;
use crate::db::Database;
use crate::enrich::{self, Enricher};
use crate::error::{Error, Result};
use crate::gmail::MailService;
use crate::models::RemoteMessage;
use crate::tasks::{BackgroundTasks, TaskKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Remote listings can keep showing a trashed message for a while.
const TRASH_GRACE_PERIOD: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
pub struct SyncState {
    /// Maps message_id -> when it was trashed from this client.
    pub recently_trashed: HashMap<String, Instant>,
}

impl SyncState {
    pub fn mark_trashed(&mut self, message_id: &str) {
        self.recently_trashed
            .insert(message_id.to_string(), Instant::now());
    }

    pub fn is_recently_trashed(&self, message_id: &str) -> bool {
        self.recently_trashed
            .get(message_id)
            .is_some_and(|t| t.elapsed() < TRASH_GRACE_PERIOD)
    }

    pub fn cleanup_expired(&mut self) {
        self.recently_trashed
            .retain(|_, t| t.elapsed() < TRASH_GRACE_PERIOD);
    }
}

pub type SharedSyncState = Arc<Mutex<SyncState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpsertMode {
    /// Existing rows are left alone.
    InsertIfAbsent,
    /// Metadata and read flag are refreshed from the remote copy.
    Replace,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub listed: usize,
    pub written: usize,
    pub failed: usize,
    /// Recently trashed ids that were left out.
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HistoricalPage {
    pub report: SyncReport,
    /// Pass back to continue; `None` once the mailbox is exhausted.
    pub next_page_token: Option<String>,
}

#[derive(Clone)]
pub struct SyncEngine {
    mail: Option<Arc<dyn MailService>>,
    db: Database,
    enricher: Arc<Enricher>,
    tasks: BackgroundTasks,
    state: SharedSyncState,
    config: GmailConfig,
}

impl SyncEngine {
    pub fn new(
        mail: Option<Arc<dyn MailService>>,
        db: Database,
        enricher: Arc<Enricher>,
        tasks: BackgroundTasks,
        state: SharedSyncState,
        config: &GmailConfig,
    ) -> Self {
        Self {
            mail,
            db,
            enricher,
            tasks,
            state,
            config: config.clone(),
        }
    }

    fn mail(&self) -> Result<&Arc<dyn MailService>> {
        self.mail.as_ref().ok_or(Error::ServiceUnavailable("gmail"))
    }

    /// Pulls the newest messages and caches any that are not cached yet.
    /// Metadata is fetched for every listed id, but rows already cached keep
    /// all their columns.
    pub async fn incremental_sync(&self) -> Result<SyncReport> {
        let mail = self.mail()?;
        let (ids, _) = mail
            .list_message_ids(self.config.incremental_size, None)
            .await
            .map_err(|source| Error::RemoteFetch {
                id: "<list>".to_string(),
                source,
            })?;

        let report = self.ingest(&ids, UpsertMode::InsertIfAbsent).await?;
        info!(
            "Incremental sync: {} listed, {} new, {} failed, {} skipped",
            report.listed, report.written, report.failed, report.skipped
        );
        Ok(report)
    }

    /// Pulls one page of the full mailbox, refreshing metadata and read
    /// state of rows that are already cached.
    pub async fn historical_sync(&self, page_token: Option<&str>) -> Result<HistoricalPage> {
        let mail = self.mail()?;
        let page_token = page_token.filter(|t| !t.is_empty());
        let (ids, next_page_token) = mail
            .list_message_ids(self.config.historical_page_size, page_token)
            .await
            .map_err(|source| Error::RemoteFetch {
                id: "<list>".to_string(),
                source,
            })?;

        let report = self.ingest(&ids, UpsertMode::Replace).await?;
        info!(
            "Historical sync page: {} listed, {} written, {} failed, more={}",
            report.listed,
            report.written,
            report.failed,
            next_page_token.is_some()
        );
        Ok(HistoricalPage {
            report,
            next_page_token,
        })
    }

    /// Follows continuation tokens until the mailbox is exhausted.
    pub async fn historical_sync_all(&self) -> Result<SyncReport> {
        let mut total = SyncReport::default();
        let mut token: Option<String> = None;
        loop {
            let page = self.historical_sync(token.as_deref()).await?;
            total.listed += page.report.listed;
            total.written += page.report.written;
            total.failed += page.report.failed;
            total.skipped += page.report.skipped;
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(total)
    }

    async fn ingest(&self, ids: &[String], mode: UpsertMode) -> Result<SyncReport> {
        let mail = self.mail()?;
        let mut report = SyncReport {
            listed: ids.len(),
            ..SyncReport::default()
        };

        if let Ok(mut state) = self.state.lock() {
            state.cleanup_expired();
        }

        for id in ids {
            let trashed = self
                .state
                .lock()
                .map(|s| s.is_recently_trashed(id))
                .unwrap_or(false);
            if trashed {
                debug!("Skipping recently trashed message {}", id);
                report.skipped += 1;
                continue;
            }

            let msg = match mail.get_metadata(id).await {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("Skipping message {}: {:#}", id, e);
                    report.failed += 1;
                    continue;
                }
            };

            let written = match mode {
                UpsertMode::InsertIfAbsent => self.db.insert_message_if_absent(&msg).await?,
                UpsertMode::Replace => {
                    self.db.upsert_message_metadata(&msg).await?;
                    true
                }
            };
            if written {
                report.written += 1;
            }

            // Also for rows that were already cached, so a vector lost to an
            // earlier failure is redone.
            self.schedule_snippet_vector(&msg).await;
        }

        Ok(report)
    }

    /// Queues the header-and-snippet embedding unless a body has already
    /// been cached, whose vector takes precedence.
    async fn schedule_snippet_vector(&self, msg: &RemoteMessage) {
        let Some(text) = enrich::composite_text(msg, self.enricher.char_budget()) else {
            debug!("Nothing useful to embed for {}", msg.id);
            return;
        };
        match self.db.has_body(&msg.id).await {
            Ok(false) => {}
            Ok(true) => return,
            Err(e) => {
                warn!("Could not check cached body for {}: {}", msg.id, e);
                return;
            }
        }

        let enricher = self.enricher.clone();
        let id = msg.id.clone();
        let submitted = self
            .tasks
            .submit(TaskKind::Vectorize, &msg.id, async move {
                enricher.vectorize(&id, &text).await
            })
            .await;
        if let Err(e) = submitted {
            warn!("Could not queue vectorization for {}: {}", msg.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trashed_ids_are_remembered() {
        let mut state = SyncState::default();
        state.mark_trashed("a");
        assert!(state.is_recently_trashed("a"));
        assert!(!state.is_recently_trashed("b"));
    }

    #[test]
    fn cleanup_drops_expired_entries() {
        let mut state = SyncState::default();
        state.mark_trashed("fresh");
        if let Some(old) = Instant::now().checked_sub(TRASH_GRACE_PERIOD * 2) {
            state.recently_trashed.insert("stale".to_string(), old);
        }
        state.cleanup_expired();
        assert!(state.recently_trashed.contains_key("fresh"));
        assert!(!state.recently_trashed.contains_key("stale"));
    }
}

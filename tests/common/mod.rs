#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use gmind::config::{Config, DatabaseConfig};
use gmind::db::Database;
use gmind::enrich::Enricher;
use gmind::gmail::MailService;
use gmind::mailbox::Mailbox;
use gmind::models::{MimePart, RemoteMessage};
use gmind::ollama::InferenceService;
use gmind::retention::RetentionSweeper;
use gmind::search::SearchEngine;
use gmind::sync::{SharedSyncState, SyncEngine, SyncState};
use gmind::tasks::{BackgroundTasks, TaskEvent};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const DAY_MS: i64 = 86_400_000;

pub fn remote(id: &str, sender: &str, subject: &str, internal_date: i64) -> RemoteMessage {
    RemoteMessage {
        id: id.to_string(),
        sender: sender.to_string(),
        to: "me@example.com".to_string(),
        cc: String::new(),
        subject: subject.to_string(),
        snippet: format!("snippet of {}", id),
        internal_date,
        label_ids: vec!["INBOX".to_string(), "UNREAD".to_string()],
    }
}

pub fn plain_part(text: &str) -> MimePart {
    MimePart {
        mime_type: "multipart/alternative".to_string(),
        data: Vec::new(),
        parts: vec![MimePart {
            mime_type: "text/plain".to_string(),
            data: text.as_bytes().to_vec(),
            parts: Vec::new(),
        }],
    }
}

/// In-memory mailbox. Listing is newest first; page tokens are offsets.
/// Trashed messages keep showing up in listings, like a lagging index.
#[derive(Default)]
pub struct FakeMail {
    pub messages: Mutex<Vec<RemoteMessage>>,
    pub bodies: Mutex<HashMap<String, MimePart>>,
    pub fail_metadata: Mutex<HashSet<String>>,
    pub fail_trash: AtomicBool,
    pub list_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub full_calls: AtomicUsize,
    pub mark_read_calls: AtomicUsize,
    pub trash_calls: AtomicUsize,
}

impl FakeMail {
    pub fn with_messages(messages: Vec<RemoteMessage>) -> Self {
        let fake = Self::default();
        *fake.messages.lock().unwrap() = messages;
        fake
    }

    pub fn set_body(&self, id: &str, part: MimePart) {
        self.bodies.lock().unwrap().insert(id.to_string(), part);
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut RemoteMessage)) {
        let mut messages = self.messages.lock().unwrap();
        if let Some(m) = messages.iter_mut().find(|m| m.id == id) {
            f(m);
        }
    }

    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailService for FakeMail {
    async fn list_message_ids(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>)> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let messages = self.messages.lock().unwrap();
        let start: usize = page_token.map(|t| t.parse::<usize>()).transpose()?.unwrap_or(0);
        let end = (start + max_results as usize).min(messages.len());
        let ids = messages[start.min(end)..end]
            .iter()
            .map(|m| m.id.clone())
            .collect();
        let next = (end < messages.len()).then(|| end.to_string());
        Ok((ids, next))
    }

    async fn get_metadata(&self, id: &str) -> Result<RemoteMessage> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata.lock().unwrap().contains(id) {
            bail!("metadata fetch failed for {}", id);
        }
        let messages = self.messages.lock().unwrap();
        match messages.iter().find(|m| m.id == id) {
            Some(m) => Ok(m.clone()),
            None => bail!("no such message {}", id),
        }
    }

    async fn get_full(&self, id: &str) -> Result<MimePart> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        match self.bodies.lock().unwrap().get(id) {
            Some(part) => Ok(part.clone()),
            None => bail!("no body for {}", id),
        }
    }

    async fn mark_as_read(&self, id: &str) -> Result<()> {
        self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
        self.update(id, |m| m.label_ids.retain(|l| l != "UNREAD"));
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        self.trash_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_trash.load(Ordering::SeqCst) {
            bail!("trash rejected for {}", id);
        }
        Ok(())
    }
}

/// Deterministic stand-in for the inference server.
pub struct FakeInference {
    pub dim: usize,
    /// Exact-text overrides for `embed`.
    pub embeddings: Mutex<HashMap<String, Vec<f32>>>,
    pub response: Mutex<String>,
    pub fail_embed: AtomicBool,
    pub embed_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
}

impl FakeInference {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            embeddings: Mutex::new(HashMap::new()),
            response: Mutex::new(String::new()),
            fail_embed: AtomicBool::new(false),
            embed_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        }
    }

    pub fn respond_with(&self, text: &str) {
        *self.response.lock().unwrap() = text.to_string();
    }

    pub fn embed_as(&self, text: &str, vector: Vec<f32>) {
        self.embeddings
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceService for FakeInference {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed.load(Ordering::SeqCst) {
            bail!("embedding server down");
        }
        if let Some(v) = self.embeddings.lock().unwrap().get(text) {
            return Ok(v.clone());
        }
        let seed = text.chars().count();
        Ok((0..self.dim)
            .map(|i| ((seed + i) % 7) as f32 / 7.0)
            .collect())
    }

    async fn generate(&self, _prompt: &str, _model: &str) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.lock().unwrap().clone())
    }
}

pub async fn temp_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let config = DatabaseConfig {
        url: format!("sqlite:{}?mode=rwc", path.display()),
        ..DatabaseConfig::default()
    };
    let db = Database::new(&config).await.unwrap();
    db.run_migrations().await.unwrap();
    (dir, db)
}

/// Every component wired against the fakes, as `main` wires the real ones.
pub struct Harness {
    pub _dir: TempDir,
    pub db: Database,
    pub mail: Arc<FakeMail>,
    pub ai: Arc<FakeInference>,
    pub tasks: BackgroundTasks,
    pub state: SharedSyncState,
    pub sync: SyncEngine,
    pub mailbox: Mailbox,
    pub search: SearchEngine,
    pub sweeper: RetentionSweeper,
}

impl Harness {
    pub async fn new(messages: Vec<RemoteMessage>) -> Self {
        Self::with_services(FakeMail::with_messages(messages), FakeInference::new(4), true).await
    }

    pub async fn with_services(mail: FakeMail, ai: FakeInference, mail_available: bool) -> Self {
        let (dir, db) = temp_db().await;
        let config = Config::default();
        let mail = Arc::new(mail);
        let ai = Arc::new(ai);

        let mail_service: Option<Arc<dyn MailService>> = if mail_available {
            Some(mail.clone())
        } else {
            None
        };
        let ai_service: Option<Arc<dyn InferenceService>> = Some(ai.clone());

        let tasks = BackgroundTasks::start(2, 64);
        let state: SharedSyncState = Arc::new(Mutex::new(SyncState::default()));
        let enricher = Arc::new(Enricher::new(
            db.clone(),
            ai_service.clone(),
            &config.ollama,
            &config.enrichment,
        ));
        let sync = SyncEngine::new(
            mail_service.clone(),
            db.clone(),
            enricher.clone(),
            tasks.clone(),
            state.clone(),
            &config.gmail,
        );
        let mailbox = Mailbox::new(
            mail_service,
            db.clone(),
            enricher,
            tasks.clone(),
            state.clone(),
        );
        let search = SearchEngine::new(db.clone(), ai_service, config.search.limit);
        let sweeper = RetentionSweeper::new(db.clone());

        Self {
            _dir: dir,
            db,
            mail,
            ai,
            tasks,
            state,
            sync,
            mailbox,
            search,
            sweeper,
        }
    }

    /// Waits until every queued background job has finished.
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.tasks.wait_idle())
            .await
            .expect("background tasks did not finish");
    }
}

/// Collects `count` task events, failing the test if they take too long.
pub async fn next_events(rx: &mut broadcast::Receiver<TaskEvent>, count: usize) -> Vec<TaskEvent> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for task event")
            .expect("event channel closed");
        events.push(event);
    }
    events
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use gmind::auth;
use gmind::config::{Config, GmailConfig};
use gmind::db::Database;
use gmind::enrich::Enricher;
use gmind::gmail::{GmailClient, MailService};
use gmind::mailbox::Mailbox;
use gmind::ollama::{InferenceService, OllamaClient};
use gmind::retention::RetentionSweeper;
use gmind::search::SearchEngine;
use gmind::sync::{SyncEngine, SyncState};
use gmind::tasks::BackgroundTasks;
use google_gmail1::Gmail;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Local Gmail cache with channels, summaries and semantic search.
///
/// Running without a command pulls the newest messages and then runs a
/// retention sweep.
#[derive(Debug, Parser)]
#[command(name = "gmind", version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Pull the newest messages
    Sync,
    /// Pull one page of the full mailbox, or all of it
    History {
        /// Follow continuation tokens until the mailbox is exhausted
        #[arg(long, conflicts_with = "token")]
        all: bool,
        /// Continuation token printed by the previous page
        token: Option<String>,
    },
    /// List configured channels
    Channels,
    /// List cached messages of a channel
    Channel { name: String },
    /// Print a message body, fetching it if needed
    Body { id: String },
    /// Print the summary of a fetched message
    Summary { id: String },
    /// Semantic search over cached messages
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Move a message to the trash
    Trash { id: String },
    /// Purge messages past their channel's ttl
    Sweep,
    /// Forget the stored OAuth token
    ResetToken,
}

impl Command {
    fn needs_mail(command: Option<&Self>) -> bool {
        matches!(
            command,
            None | Some(
                Command::Sync | Command::History { .. } | Command::Body { .. } | Command::Trash { .. }
            )
        )
    }
}

fn init_tracing(debug_logging: bool) {
    let default_level = if debug_logging { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

/// Creates the directory holding the SQLite file, if the url names one.
fn ensure_db_dir(url: &str) -> anyhow::Result<()> {
    let path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

async fn connect_gmail(config: &GmailConfig) -> anyhow::Result<Arc<dyn MailService>> {
    let secret = auth::Authenticator::load_secret(&config.credentials_path).await?;
    let authenticator = auth::Authenticator::authenticate(secret).await?;
    authenticator
        .token(auth::SCOPES)
        .await
        .context("Failed to obtain an access token")?;

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .context("Failed to load native roots")?
        .https_only()
        .enable_http1()
        .build();
    let hub = Gmail::new(hyper::Client::builder().build(connector), authenticator);
    Ok(Arc::new(GmailClient::new(hub)))
}

fn connect_ollama(config: &Config) -> Option<Arc<dyn InferenceService>> {
    if !config.ollama.enabled {
        info!("Inference disabled; enrichment and search are off");
        return None;
    }
    match OllamaClient::new(&config.ollama) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Inference client unavailable: {:#}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let command = cli.command;

    if command == Some(Command::ResetToken) {
        auth::RingStorage.clear_token().await?;
        println!("Token cleared. Run again to re-authenticate.");
        return Ok(());
    }

    let config = Config::load();
    ensure_db_dir(&config.database.url)?;
    let db = Database::new(&config.database).await?;
    db.run_migrations().await?;
    db.replace_channels(&config.channels).await?;

    let mail = if Command::needs_mail(command.as_ref()) {
        match connect_gmail(&config.gmail).await {
            Ok(mail) => Some(mail),
            Err(e) => {
                warn!("Gmail unavailable: {:#}", e);
                None
            }
        }
    } else {
        None
    };
    let ai = connect_ollama(&config);

    let tasks = BackgroundTasks::start(
        config.enrichment.workers,
        config.enrichment.queue_capacity,
    );
    let state = Arc::new(Mutex::new(SyncState::default()));
    let enricher = Arc::new(Enricher::new(
        db.clone(),
        ai.clone(),
        &config.ollama,
        &config.enrichment,
    ));
    let sync = SyncEngine::new(
        mail.clone(),
        db.clone(),
        enricher.clone(),
        tasks.clone(),
        state.clone(),
        &config.gmail,
    );
    let mailbox = Mailbox::new(mail, db.clone(), enricher, tasks.clone(), state);
    let search = SearchEngine::new(db.clone(), ai, config.search.limit);
    let sweeper = RetentionSweeper::new(db);

    match command {
        None => {
            let sweep = sweeper.spawn(
                Duration::from_secs(config.retention.initial_delay_secs),
                config.retention.interval_secs.map(Duration::from_secs),
            );
            match sync.incremental_sync().await {
                Ok(report) => println!("{} new messages cached", report.written),
                Err(e) => warn!("Sync failed: {}", e),
            }
            tasks.wait_idle().await;
            sweep.await.context("Retention sweep task panicked")?;
        }
        Some(Command::Sync) => {
            let report = sync.incremental_sync().await?;
            println!(
                "{} listed, {} new, {} failed",
                report.listed, report.written, report.failed
            );
        }
        Some(Command::History { all: true, .. }) => {
            let report = sync.historical_sync_all().await?;
            println!("{} messages written, {} failed", report.written, report.failed);
        }
        Some(Command::History { all: false, token }) => {
            let page = sync.historical_sync(token.as_deref()).await?;
            println!(
                "{} messages written, {} failed",
                page.report.written, page.report.failed
            );
            if let Some(next) = page.next_page_token {
                println!("next page: gmind history {}", next);
            }
        }
        Some(Command::Channels) => {
            for name in mailbox.list_channels().await? {
                println!("{}", name);
            }
        }
        Some(Command::Channel { name }) => {
            for m in mailbox.messages_by_channel(&name).await? {
                println!(
                    "{}  {}  {}{}  {}",
                    m.id,
                    if m.is_read { ' ' } else { '*' },
                    m.deadline.map(|d| format!("[{}] ", d)).unwrap_or_default(),
                    m.sender,
                    m.subject
                );
            }
        }
        Some(Command::Body { id }) => {
            println!("{}", mailbox.message_body(&id).await?);
        }
        Some(Command::Summary { id }) => match mailbox.summarize(&id).await? {
            Some(summary) => println!("{}", summary),
            None => println!("No body cached for {}; run `gmind body {}` first", id, id),
        },
        Some(Command::Search { query }) => {
            for m in search.search_messages(&query.join(" ")).await? {
                println!("{}  {}  {}", m.id, m.sender, m.subject);
            }
        }
        Some(Command::Trash { id }) => {
            mailbox.trash(&id).await?;
            println!("Moved {} to trash", id);
        }
        Some(Command::Sweep) => {
            let report = sweeper.sweep().await?;
            println!(
                "{} channels swept, {} messages deleted",
                report.channels_swept, report.deleted
            );
            for name in report.failed {
                println!("skipped channel {}", name);
            }
        }
        Some(Command::ResetToken) => {}
    }

    tasks.wait_idle().await;
    Ok(())
}

use crate::config::{EnrichmentConfig, OllamaConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::RemoteMessage;
use crate::ollama::InferenceService;
use crate::prompts;
use crate::signals::{self, Signals};
use chrono::{Local, NaiveDate};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

static HIDDEN_BLOCKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Drops tags (and script/style contents) and decodes the common entities.
pub fn strip_markup(text: &str) -> String {
    let without_blocks = HIDDEN_BLOCKS.replace_all(text, "");
    TAGS.replace_all(&without_blocks, "")
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

/// Header-and-snippet text embedded right after sync. `None` when there is
/// neither a subject nor a snippet to go on.
pub fn composite_text(msg: &RemoteMessage, max_chars: usize) -> Option<String> {
    if msg.subject.trim().is_empty() && msg.snippet.trim().is_empty() {
        return None;
    }
    let text = format!(
        "From: {}\nTo: {}\nSubject: {}\nSnippet: {}",
        msg.sender,
        msg.recipient(),
        msg.subject,
        msg.snippet
    );
    Some(truncate_chars(&text, max_chars))
}

/// Text embedded once the full body is known.
pub fn full_text(sender: &str, subject: &str, body: &str, max_chars: usize) -> String {
    let text = format!("From: {}\nSubject: {}\nBody: {}", sender, subject, body);
    truncate_chars(&text, max_chars)
}

pub struct Enricher {
    db: Database,
    ai: Option<Arc<dyn InferenceService>>,
    summary_model: String,
    extract_model: String,
    config: EnrichmentConfig,
}

impl Enricher {
    pub fn new(
        db: Database,
        ai: Option<Arc<dyn InferenceService>>,
        ollama: &OllamaConfig,
        config: &EnrichmentConfig,
    ) -> Self {
        Self {
            db,
            ai,
            summary_model: ollama.summary_model.clone(),
            extract_model: ollama.extract_model.clone(),
            config: config.clone(),
        }
    }

    fn ai(&self) -> Result<&Arc<dyn InferenceService>> {
        self.ai.as_ref().ok_or(Error::ServiceUnavailable("inference"))
    }

    pub fn char_budget(&self) -> usize {
        self.config.char_budget
    }

    /// Embeds `source` and stores it as the vector for `id`, replacing any
    /// earlier one.
    pub async fn vectorize(&self, id: &str, source: &str) -> Result<()> {
        let ai = self.ai()?;
        let cleaned = truncate_chars(&strip_markup(source), self.config.char_budget);
        if cleaned.trim().is_empty() {
            debug!("Nothing to embed for {}", id);
            return Ok(());
        }

        let vector = ai.embed(&cleaned).await.map_err(Error::Inference)?;
        self.db.save_vector(id, &cleaned, &vector).await?;
        debug!("Stored {}-dim vector for {}", vector.len(), id);
        Ok(())
    }

    /// Returns the cached summary, generating it from the cached body the
    /// first time. `None` when there is no body yet.
    pub async fn summarize(&self, id: &str) -> Result<Option<String>> {
        if let Some(cached) = self.db.get_summary(id).await? {
            return Ok(Some(cached));
        }
        let Some(body) = self.db.get_body(id).await? else {
            return Ok(None);
        };

        let ai = self.ai()?;
        let prompt = prompts::summary_prompt(
            &strip_markup(&body),
            &self.config.summary_language,
            self.config.summary_lines,
        );
        let raw = ai
            .generate(&prompt, &self.summary_model)
            .await
            .map_err(Error::Inference)?;

        let summary = prompts::clean_response(&raw);
        if summary.is_empty() {
            return Ok(None);
        }
        self.db.set_summary(id, &summary).await?;
        Ok(Some(summary))
    }

    pub async fn extract_signals(&self, id: &str) -> Result<Signals> {
        self.extract_signals_on(id, Local::now().date_naive()).await
    }

    /// Asks for importance and deadline in one call, resolving relative
    /// dates against `today`. Only the values found in the answer are
    /// written back.
    pub async fn extract_signals_on(&self, id: &str, today: NaiveDate) -> Result<Signals> {
        let Some(body) = self.db.get_body(id).await? else {
            return Ok(Signals::default());
        };

        let ai = self.ai()?;
        let prompt = prompts::signals_prompt(&strip_markup(&body), today);
        let raw = ai
            .generate(&prompt, &self.extract_model)
            .await
            .map_err(Error::Inference)?;

        let found = signals::parse(&prompts::clean_response(&raw));
        debug!("Signals for {}: {:?} from {:?}", id, found, raw);
        if found.is_empty() {
            return Ok(found);
        }

        let deadline = found.deadline_string();
        self.db
            .set_signals(id, found.importance.map(i64::from), deadline.as_deref())
            .await?;
        if let Some(d) = &deadline {
            info!("Deadline {} found for {}", d, id);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_markup_removes_tags_and_hidden_blocks() {
        let html = "<html><style>p { color: red; }</style><p>Hi &amp; bye</p><script>x()</script></html>";
        assert_eq!(strip_markup(html), "Hi & bye");
        assert_eq!(
            strip_markup("<pre style='white-space: pre-wrap;'>a &lt; b</pre>"),
            "a < b"
        );
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn composite_text_skips_empty_messages() {
        let mut msg = RemoteMessage {
            id: "a".to_string(),
            sender: "alice@example.com".to_string(),
            to: "bob@example.com".to_string(),
            ..RemoteMessage::default()
        };
        assert!(composite_text(&msg, 4000).is_none());

        msg.snippet = "lunch?".to_string();
        assert_eq!(
            composite_text(&msg, 4000).unwrap(),
            "From: alice@example.com\nTo: bob@example.com \nSubject: \nSnippet: lunch?"
        );
        assert_eq!(composite_text(&msg, 4).unwrap(), "From");
    }
}

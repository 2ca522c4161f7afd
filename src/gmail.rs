use crate::models::{MimePart, RemoteMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use google_gmail1::Gmail;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::debug;

const METADATA_HEADERS: [&str; 4] = ["From", "To", "Cc", "Subject"];

/// Remote mail operations the cache depends on.
#[async_trait]
pub trait MailService: Send + Sync {
    /// Newest-first message ids and the continuation token, if any.
    async fn list_message_ids(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>)>;

    async fn get_metadata(&self, id: &str) -> Result<RemoteMessage>;

    async fn get_full(&self, id: &str) -> Result<MimePart>;

    async fn mark_as_read(&self, id: &str) -> Result<()>;

    async fn trash_message(&self, id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MailService for GmailClient {
    async fn list_message_ids(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let mut req = self
            .hub
            .users()
            .messages_list("me")
            .max_results(max_results);

        if let Some(token) = page_token {
            req = req.page_token(token);
        }

        let (_, message_list) = req.doit().await.context("Failed to list messages")?;

        let ids = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        let next = message_list.next_page_token.filter(|t| !t.is_empty());
        Ok((ids, next))
    }

    async fn get_metadata(&self, id: &str) -> Result<RemoteMessage> {
        let mut req = self.hub.users().messages_get("me", id).format("metadata");
        for header in METADATA_HEADERS {
            req = req.add_metadata_headers(header);
        }
        let (_, msg) = req
            .doit()
            .await
            .with_context(|| format!("Failed to get metadata for message {}", id))?;

        let mut remote = RemoteMessage {
            id: msg.id.unwrap_or_else(|| id.to_string()),
            snippet: msg.snippet.unwrap_or_default(),
            internal_date: msg.internal_date.unwrap_or(0),
            label_ids: msg.label_ids.unwrap_or_default(),
            ..RemoteMessage::default()
        };

        if let Some(headers) = msg.payload.as_ref().and_then(|p| p.headers.as_ref()) {
            for header in headers {
                let (Some(name), Some(value)) = (header.name.as_deref(), header.value.clone())
                else {
                    continue;
                };
                match name.to_ascii_lowercase().as_str() {
                    "from" => remote.sender = value,
                    "to" => remote.to = value,
                    "cc" => remote.cc = value,
                    "subject" => remote.subject = value,
                    _ => {}
                }
            }
        }

        Ok(remote)
    }

    async fn get_full(&self, id: &str) -> Result<MimePart> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .doit()
            .await
            .with_context(|| format!("Failed to get message {}", id))?;

        let payload = msg
            .payload
            .with_context(|| format!("Message {} has no payload", id))?;
        Ok(to_mime_part(&payload))
    }

    async fn mark_as_read(&self, id: &str) -> Result<()> {
        debug!("Marking message as read: {}", id);
        let req = google_gmail1::api::BatchModifyMessagesRequest {
            ids: Some(vec![id.to_string()]),
            remove_label_ids: Some(vec!["UNREAD".to_string()]),
            add_label_ids: None,
        };
        self.hub
            .users()
            .messages_batch_modify(req, "me")
            .doit()
            .await
            .context("Failed to mark message as read")?;
        Ok(())
    }

    async fn trash_message(&self, id: &str) -> Result<()> {
        debug!("Trashing message: {}", id);
        self.hub
            .users()
            .messages_trash("me", id)
            .doit()
            .await
            .context("Failed to trash message")?;
        Ok(())
    }
}

fn to_mime_part(part: &google_gmail1::api::MessagePart) -> MimePart {
    MimePart {
        mime_type: part.mime_type.clone().unwrap_or_default(),
        data: part
            .body
            .as_ref()
            .and_then(|b| b.data.clone())
            .unwrap_or_default(),
        parts: part
            .parts
            .as_ref()
            .map(|parts| parts.iter().map(to_mime_part).collect())
            .unwrap_or_default(),
    }
}

/// Turns a part body into text. The hub has already undone the base64url
/// transport encoding, so the bytes are the payload itself and are never
/// decoded a second time.
pub fn decode_part_data(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

fn find_part<'a>(part: &'a MimePart, mime_type: &str) -> Option<&'a MimePart> {
    if part.mime_type.eq_ignore_ascii_case(mime_type) && !part.data.is_empty() {
        return Some(part);
    }
    part.parts.iter().find_map(|p| find_part(p, mime_type))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Picks the displayable body out of a MIME tree: the first `text/plain`
/// part wrapped for literal whitespace, else the first `text/html` part,
/// else an empty string.
pub fn extract_body(root: &MimePart) -> String {
    if let Some(plain) = find_part(root, "text/plain") {
        let text = decode_part_data(&plain.data);
        return format!(
            "<pre style='white-space: pre-wrap; font-family: sans-serif;'>{}</pre>",
            escape_html(&text)
        );
    }
    if let Some(html) = find_part(root, "text/html") {
        return decode_part_data(&html.data);
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(mime_type: &str, text: &str) -> MimePart {
        MimePart {
            mime_type: mime_type.to_string(),
            data: text.as_bytes().to_vec(),
            parts: Vec::new(),
        }
    }

    fn multipart(mime_type: &str, parts: Vec<MimePart>) -> MimePart {
        MimePart {
            mime_type: mime_type.to_string(),
            data: Vec::new(),
            parts,
        }
    }

    #[test]
    fn part_data_is_taken_as_already_decoded() {
        // "OK" is also valid base64 and must not turn into a stray byte
        assert_eq!(decode_part_data(b"OK"), "OK");
        assert_eq!(decode_part_data("日本語 ok?>>".as_bytes()), "日本語 ok?>>");
        assert_eq!(decode_part_data(b"aGVsbG8"), "aGVsbG8");
        assert_eq!(decode_part_data(&[0x66, 0x6f, 0xff]), "fo\u{fffd}");
    }

    #[test]
    fn short_plain_bodies_survive_extraction() {
        let root = multipart("multipart/alternative", vec![leaf("text/plain", "OK")]);
        assert_eq!(
            extract_body(&root),
            "<pre style='white-space: pre-wrap; font-family: sans-serif;'>OK</pre>"
        );
    }

    #[test]
    fn plain_text_is_preferred_even_when_nested_deeper() {
        let root = multipart(
            "multipart/mixed",
            vec![
                leaf("text/html", "<p>html</p>"),
                multipart(
                    "multipart/alternative",
                    vec![leaf("text/plain", "a < b\n  indented")],
                ),
            ],
        );
        assert_eq!(
            extract_body(&root),
            "<pre style='white-space: pre-wrap; font-family: sans-serif;'>a &lt; b\n  indented</pre>"
        );
    }

    #[test]
    fn html_is_the_fallback() {
        let root = multipart(
            "multipart/related",
            vec![
                leaf("image/png", "binary"),
                leaf("text/html", "<b>hello</b>"),
            ],
        );
        assert_eq!(extract_body(&root), "<b>hello</b>");
    }

    #[test]
    fn empty_parts_are_skipped() {
        let root = multipart(
            "multipart/alternative",
            vec![
                multipart("text/plain", Vec::new()),
                leaf("text/html", "<i>x</i>"),
            ],
        );
        assert_eq!(extract_body(&root), "<i>x</i>");
        assert_eq!(extract_body(&multipart("multipart/mixed", Vec::new())), "");
    }
}

use serde::{Deserialize, Serialize};

/// A cached message row. Body and enrichment fields stay `None` until the
/// pipeline fills them in.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub snippet: String,
    pub timestamp: i64,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub importance: i64,
    pub deadline: Option<String>,
    pub is_read: bool,
}

/// List view of a message, without body or summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageSummary {
    pub id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub snippet: String,
    pub importance: i64,
    pub deadline: Option<String>,
    pub timestamp: i64,
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    #[serde(rename = "query")]
    pub predicate: String,
    #[serde(default)]
    pub ttl_days: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailVector {
    pub id: String,
    pub content: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
}

/// Metadata projection of a remote message: headers, snippet, internal
/// date and labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteMessage {
    pub id: String,
    pub sender: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub snippet: String,
    pub internal_date: i64,
    pub label_ids: Vec<String>,
}

impl RemoteMessage {
    /// To and Cc joined with a single space.
    pub fn recipient(&self) -> String {
        format!("{} {}", self.to, self.cc)
    }

    pub fn is_read(&self) -> bool {
        !self.label_ids.iter().any(|l| l == "UNREAD")
    }
}

/// One node of a message's MIME tree as returned by the "full" projection.
/// `data` holds the part body exactly as the transport delivered it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MimePart {
    pub mime_type: String,
    pub data: Vec<u8>,
    pub parts: Vec<MimePart>,
}

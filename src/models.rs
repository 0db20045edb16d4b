//! Core data models used throughout mailvec.
//!
//! These types represent the messages and documents that flow through the
//! ingestion pipeline, from the raw listing reference to the cleaned document
//! stored in the vector index.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A message reference returned by the listing endpoint.
///
/// Ephemeral; only lives for the duration of one sync run.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
}

/// The four headers extracted from every message.
///
/// Absent headers are represented by empty strings, never an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageHeaders {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
}

/// An attachment carried by a message part flagged as such.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Attachment metadata carried through cleaning (the payload drops the bytes).
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentMeta {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

impl From<&Attachment> for AttachmentMeta {
    fn from(a: &Attachment) -> Self {
        Self {
            filename: a.filename.clone(),
            content_type: a.content_type.clone(),
            size: a.data.len(),
        }
    }
}

/// A message after transport decoding and MIME parsing, before cleaning.
///
/// Immutable once produced. A message that failed to fetch or parse is
/// represented by the default (empty) value; callers skip empty records.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub id: String,
    pub thread_id: String,
    pub labels: Vec<String>,
    pub snippet: String,
    pub headers: MessageHeaders,
    /// Concatenation of all non-attachment `text/plain` parts.
    pub body: String,
    /// Concatenation of all non-attachment `text/html` parts.
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

impl ParsedMessage {
    /// True for the sentinel produced when fetch or MIME parsing failed.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// The canonical document stored in the vector index.
#[derive(Debug, Clone)]
pub struct CleanedDocument {
    pub id: String,
    pub thread_id: String,
    pub labels: Vec<String>,
    pub snippet: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    /// Parsed permissively from the Date header; `None` when unparseable.
    pub date: Option<DateTime<Utc>>,
    /// Plain body, or the markup-stripped HTML body when no plain body exists.
    pub body: String,
    pub attachments: Vec<AttachmentMeta>,
}

/// A ranked result returned from owner-scoped vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

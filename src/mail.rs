//! Mail API connector.
//!
//! Lists and fetches messages from a Gmail-style REST API, decodes the
//! base64url raw transport format, and parses the MIME structure into
//! [`ParsedMessage`] records.
//!
//! All remote calls go through the [`Backoff`] executor. Failure semantics
//! follow the pipeline's degradation rules: listing failures collapse to an
//! empty result for this run, per-message fetch or parse failures collapse
//! to an empty record, and only authentication rejections propagate.
//!
//! # Environment Variables
//!
//! - `MAILVEC_MAIL_TOKEN` — bearer token for the mail API (obtained by the
//!   out-of-band OAuth flow; token refresh is not this crate's concern).

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mail_parser::{MessageParser, MimeHeaders, PartType};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backoff::{Backoff, BackoffError, RemoteError};
use crate::models::{Attachment, MessageHeaders, ParsedMessage, RawMessageRef};

/// Authentication rejection from the mail API. The only listing/fetch
/// failure that reaches the sync orchestrator.
#[derive(Debug, Error)]
#[error("mail API authentication failed: {source}")]
pub struct AuthError {
    #[source]
    pub source: RemoteError,
}

/// One page of the listing endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageListPage {
    pub messages: Option<Vec<RawMessageRef>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// A single message in raw transport format.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: String,
    #[serde(rename = "labelIds")]
    pub label_ids: Option<Vec<String>>,
    pub snippet: Option<String>,
    /// base64url-encoded RFC 822 bytes.
    pub raw: Option<String>,
}

/// Low-level mail API access. Implemented by the HTTP client and by test
/// fakes; the fetcher and orchestrator only ever see this trait.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Fetch one page of message references matching `query`.
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessageListPage, RemoteError>;

    /// Fetch a single message in raw format.
    async fn fetch_raw(&self, id: &str) -> Result<RawMessage, RemoteError>;
}

/// HTTP implementation of [`MailTransport`].
pub struct HttpMailTransport {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl HttpMailTransport {
    /// Create a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `MAILVEC_MAIL_TOKEN` is not in the environment.
    pub fn new(api_base: &str) -> Result<Self> {
        let token = match std::env::var("MAILVEC_MAIL_TOKEN") {
            Ok(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => bail!("MAILVEC_MAIL_TOKEN environment variable not set"),
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(RemoteError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Fatal(format!("decode mail API response: {}", e)))
    }
}

#[async_trait]
impl MailTransport for HttpMailTransport {
    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessageListPage, RemoteError> {
        let url = format!("{}/users/me/messages", self.api_base);
        let size = page_size.to_string();
        let mut params = vec![("q", query), ("maxResults", size.as_str())];
        if let Some(pt) = page_token {
            params.push(("pageToken", pt));
        }
        self.get_json(&url, &params).await
    }

    async fn fetch_raw(&self, id: &str) -> Result<RawMessage, RemoteError> {
        let url = format!("{}/users/me/messages/{}", self.api_base, id);
        self.get_json(&url, &[("format", "raw")]).await
    }
}

/// Lists, fetches, and parses messages through the backoff executor.
pub struct MailFetcher {
    transport: Arc<dyn MailTransport>,
    backoff: Backoff,
    page_size: usize,
}

impl MailFetcher {
    pub fn new(transport: Arc<dyn MailTransport>, backoff: Backoff, page_size: usize) -> Self {
        Self {
            transport,
            backoff,
            page_size,
        }
    }

    /// List message references matching `query`, up to `max_results`.
    ///
    /// Paginates while the provider reports more pages and the accumulated
    /// count is below the cap, truncating the final page on overshoot.
    /// Unrecoverable non-auth failures degrade to an empty list: the run
    /// syncs nothing and the cursor stays put.
    pub async fn list_messages(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<RawMessageRef>, AuthError> {
        let mut refs: Vec<RawMessageRef> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let result = self
                .backoff
                .execute(|| {
                    self.transport
                        .list_page(query, page_token.as_deref(), self.page_size)
                })
                .await;

            let page = match result {
                Ok(page) => page,
                Err(BackoffError::Aborted(source @ RemoteError::Auth { .. })) => {
                    return Err(AuthError { source });
                }
                Err(err) => {
                    warn!(error = %err, "listing messages failed, returning empty batch");
                    return Ok(Vec::new());
                }
            };

            refs.extend(page.messages.unwrap_or_default());
            debug!(count = refs.len(), "retrieved message refs so far");

            page_token = page.next_page_token;
            if refs.len() >= max_results || page_token.is_none() {
                break;
            }
        }

        refs.truncate(max_results);
        Ok(refs)
    }

    /// Fetch and parse a single message.
    ///
    /// Transport failures (other than auth) and MIME parse failures yield
    /// an empty record; callers must skip records where
    /// [`ParsedMessage::is_empty`] is true.
    pub async fn get_message(&self, msg_ref: &RawMessageRef) -> Result<ParsedMessage, AuthError> {
        let result = self
            .backoff
            .execute(|| self.transport.fetch_raw(&msg_ref.id))
            .await;

        match result {
            Ok(raw) => Ok(parse_message(raw)),
            Err(BackoffError::Aborted(source @ RemoteError::Auth { .. })) => {
                Err(AuthError { source })
            }
            Err(err) => {
                warn!(id = %msg_ref.id, error = %err, "fetching message failed, skipping");
                Ok(ParsedMessage::default())
            }
        }
    }
}

/// Decode the base64url transport encoding. Tolerates padded input.
fn decode_transport(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('='))
}

/// Parse a raw transport message into a [`ParsedMessage`].
///
/// Any decode or MIME parse failure yields the empty record.
pub fn parse_message(raw: RawMessage) -> ParsedMessage {
    let Some(data) = raw.raw.as_deref() else {
        warn!(id = %raw.id, "message has no raw payload, skipping");
        return ParsedMessage::default();
    };

    let bytes = match decode_transport(data) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(id = %raw.id, error = %err, "transport decode failed, skipping");
            return ParsedMessage::default();
        }
    };

    let Some(message) = MessageParser::default().parse(&bytes) else {
        warn!(id = %raw.id, "MIME parse failed, skipping");
        return ParsedMessage::default();
    };

    let headers = MessageHeaders {
        from: message
            .from()
            .and_then(|a| a.first())
            .map(format_address)
            .unwrap_or_default(),
        to: message
            .to()
            .and_then(|a| a.first())
            .map(format_address)
            .unwrap_or_default(),
        subject: message.subject().unwrap_or_default().to_string(),
        date: message.date().map(|d| d.to_rfc3339()).unwrap_or_default(),
    };

    let mut body = String::new();
    let mut html_body = String::new();
    let mut attachments = Vec::new();

    for part in &message.parts {
        // The attachment check, not the content type, decides whether a part
        // contributes to a body: a text/plain attachment stays out of the body.
        if is_attachment(part) {
            let data = match &part.body {
                PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
                PartType::Text(text) => text.as_bytes().to_vec(),
                PartType::Html(html) => html.as_bytes().to_vec(),
                _ => continue,
            };
            attachments.push(Attachment {
                filename: attachment_filename(part),
                content_type: part_content_type(part),
                data,
            });
            continue;
        }

        match &part.body {
            PartType::Text(text) => body.push_str(text),
            PartType::Html(html) => html_body.push_str(html),
            _ => {}
        }
    }

    ParsedMessage {
        id: raw.id,
        thread_id: raw.thread_id,
        labels: raw.label_ids.unwrap_or_default(),
        snippet: raw.snippet.unwrap_or_default(),
        headers,
        body,
        html_body,
        attachments,
    }
}

fn is_attachment(part: &mail_parser::MessagePart) -> bool {
    if let Some(disposition) = part.content_disposition() {
        if disposition.ctype().eq_ignore_ascii_case("attachment") {
            return true;
        }
    }
    part.attachment_name().is_some()
}

fn part_content_type(part: &mail_parser::MessagePart) -> String {
    part.content_type()
        .map(|ct| {
            if let Some(subtype) = ct.subtype() {
                format!("{}/{}", ct.ctype(), subtype)
            } else {
                ct.ctype().to_string()
            }
        })
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

fn attachment_filename(part: &mail_parser::MessagePart) -> String {
    part.attachment_name()
        .or_else(|| part.content_type().and_then(|ct| ct.attribute("name")))
        .unwrap_or("attachment")
        .to_string()
}

/// Formats an address as "Name <email>", or just the email without a
/// display name.
fn format_address(addr: &mail_parser::Addr) -> String {
    if let Some(name) = addr.name() {
        format!("{} <{}>", name, addr.address().unwrap_or_default())
    } else {
        addr.address().unwrap_or_default().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;

    struct PagedTransport {
        pages: Vec<MessageListPage>,
    }

    #[async_trait]
    impl MailTransport for PagedTransport {
        async fn list_page(
            &self,
            _query: &str,
            page_token: Option<&str>,
            _page_size: usize,
        ) -> Result<MessageListPage, RemoteError> {
            let index: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
            Ok(self.pages[index].clone())
        }

        async fn fetch_raw(&self, _id: &str) -> Result<RawMessage, RemoteError> {
            Err(RemoteError::Fatal("not implemented".into()))
        }
    }

    struct FailingTransport {
        error: RemoteError,
    }

    #[async_trait]
    impl MailTransport for FailingTransport {
        async fn list_page(
            &self,
            _query: &str,
            _page_token: Option<&str>,
            _page_size: usize,
        ) -> Result<MessageListPage, RemoteError> {
            Err(self.error.clone())
        }

        async fn fetch_raw(&self, _id: &str) -> Result<RawMessage, RemoteError> {
            Err(self.error.clone())
        }
    }

    fn refs(start: usize, count: usize) -> Vec<RawMessageRef> {
        (start..start + count)
            .map(|i| RawMessageRef {
                id: format!("m{}", i),
                thread_id: format!("t{}", i),
            })
            .collect()
    }

    fn fetcher(transport: impl MailTransport + 'static) -> MailFetcher {
        MailFetcher::new(Arc::new(transport), Backoff::new(1), 5)
    }

    #[tokio::test]
    async fn list_truncates_to_max_results() {
        let transport = PagedTransport {
            pages: vec![
                MessageListPage {
                    messages: Some(refs(0, 5)),
                    next_page_token: Some("1".into()),
                },
                MessageListPage {
                    messages: Some(refs(5, 5)),
                    next_page_token: Some("2".into()),
                },
                MessageListPage {
                    messages: Some(refs(10, 5)),
                    next_page_token: None,
                },
            ],
        };

        let result = fetcher(transport).list_messages("after:0", 10).await.unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result[0].id, "m0");
        assert_eq!(result[9].id, "m9");
    }

    #[tokio::test]
    async fn list_stops_when_pages_run_out() {
        let transport = PagedTransport {
            pages: vec![MessageListPage {
                messages: Some(refs(0, 3)),
                next_page_token: None,
            }],
        };

        let result = fetcher(transport).list_messages("after:0", 10).await.unwrap();
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn list_degrades_to_empty_on_fatal_error() {
        let transport = FailingTransport {
            error: RemoteError::Fatal("boom".into()),
        };
        let result = fetcher(transport).list_messages("after:0", 10).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn list_propagates_auth_error() {
        let transport = FailingTransport {
            error: RemoteError::Auth { status: 403 },
        };
        let result = fetcher(transport).list_messages("after:0", 10).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_message_degrades_to_empty_record() {
        let transport = FailingTransport {
            error: RemoteError::Fatal("boom".into()),
        };
        let msg_ref = RawMessageRef {
            id: "m1".into(),
            thread_id: "t1".into(),
        };
        let parsed = fetcher(transport).get_message(&msg_ref).await.unwrap();
        assert!(parsed.is_empty());
    }

    fn raw_multipart_message() -> RawMessage {
        let mime = concat!(
            "From: Alice Archer <alice@example.com>\r\n",
            "To: Bob Baker <bob@example.com>\r\n",
            "Subject: Quarterly report\r\n",
            "Date: Tue, 05 Aug 2025 10:00:00 +0000\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n",
            "\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "\r\n",
            "First plain part.\r\n",
            "--XYZ\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>Hello <b>html</b></p>\r\n",
            "--XYZ\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
            "\r\n",
            "attached text\r\n",
            "--XYZ--\r\n",
        );

        RawMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            label_ids: Some(vec!["INBOX".into()]),
            snippet: Some("First plain".into()),
            raw: Some(URL_SAFE.encode(mime.as_bytes())),
        }
    }

    #[test]
    fn parses_multipart_message() {
        let parsed = parse_message(raw_multipart_message());
        assert!(!parsed.is_empty());
        assert_eq!(parsed.headers.from, "Alice Archer <alice@example.com>");
        assert_eq!(parsed.headers.to, "Bob Baker <bob@example.com>");
        assert_eq!(parsed.headers.subject, "Quarterly report");
        assert!(!parsed.headers.date.is_empty());
        assert!(parsed.body.contains("First plain part."));
        // The text/plain attachment is excluded by the attachment check.
        assert!(!parsed.body.contains("attached text"));
        assert!(parsed.html_body.contains("<p>Hello <b>html</b></p>"));
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].filename, "notes.txt");
        assert_eq!(parsed.attachments[0].content_type, "text/plain");
        assert_eq!(parsed.attachments[0].data, b"attached text");
    }

    #[test]
    fn bad_transport_encoding_yields_empty_record() {
        let raw = RawMessage {
            id: "m2".into(),
            thread_id: "t2".into(),
            label_ids: None,
            snippet: None,
            raw: Some("!!! not base64 !!!".into()),
        };
        assert!(parse_message(raw).is_empty());
    }

    #[test]
    fn missing_raw_payload_yields_empty_record() {
        let raw = RawMessage {
            id: "m3".into(),
            thread_id: "t3".into(),
            label_ids: None,
            snippet: None,
            raw: None,
        };
        assert!(parse_message(raw).is_empty());
    }

    #[test]
    fn missing_headers_are_empty_not_errors() {
        let mime = "Content-Type: text/plain\r\n\r\nbare body\r\n";
        let raw = RawMessage {
            id: "m4".into(),
            thread_id: "t4".into(),
            label_ids: None,
            snippet: None,
            raw: Some(URL_SAFE.encode(mime.as_bytes())),
        };
        let parsed = parse_message(raw);
        assert!(!parsed.is_empty());
        assert_eq!(parsed.headers.from, "");
        assert_eq!(parsed.headers.subject, "");
        assert!(parsed.body.contains("bare body"));
    }
}

//! Record cleaning: [`ParsedMessage`] → [`CleanedDocument`].
//!
//! Pure functions, no I/O. Each record is cleaned independently of the
//! others, so callers are free to process a batch in any order.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::models::{AttachmentMeta, CleanedDocument, ParsedMessage};

/// Clean a batch of parsed messages.
pub fn clean(records: Vec<ParsedMessage>) -> Vec<CleanedDocument> {
    records.into_iter().map(clean_record).collect()
}

/// Clean a single parsed message.
///
/// - Snippet: HTML-entity-decoded.
/// - Date: parsed permissively; unparseable dates become `None` and never
///   block the document.
/// - Body: the plain body when present, otherwise the HTML body with markup
///   stripped (block boundaries become line breaks); entity-decoded either
///   way. Neither body present → empty string.
pub fn clean_record(msg: ParsedMessage) -> CleanedDocument {
    let body = if !msg.body.trim().is_empty() {
        decode_entities(&msg.body)
    } else if !msg.html_body.trim().is_empty() {
        let stripped = html2text::from_read(msg.html_body.as_bytes(), 80);
        decode_entities(&stripped)
    } else {
        String::new()
    };

    CleanedDocument {
        id: msg.id,
        thread_id: msg.thread_id,
        labels: msg.labels,
        snippet: decode_entities(&msg.snippet),
        sender: msg.headers.from,
        recipient: msg.headers.to,
        subject: msg.headers.subject,
        date: parse_date(&msg.headers.date),
        body,
        attachments: msg.attachments.iter().map(AttachmentMeta::from).collect(),
    }
}

/// Parse a message date permissively. Returns `None` rather than erroring
/// on anything unrecognizable.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    // Strip a trailing zone comment like "(UTC)" before parsing.
    let stripped = match raw.rfind('(') {
        Some(pos) => raw[..pos].trim_end(),
        None => raw,
    };

    if let Ok(dt) = DateTime::parse_from_rfc2822(stripped) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(stripped) {
        return Some(dt.with_timezone(&Utc));
    }
    // Day-of-week-less RFC 2822 variant.
    if let Ok(dt) = DateTime::parse_from_str(stripped, "%d %b %Y %H:%M:%S %z") {
        return Some(dt.with_timezone(&Utc));
    }
    // Zone-less timestamps are taken as UTC.
    if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    None
}

/// Decode the HTML entities that show up in provider snippets and bodies.
pub fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageHeaders;

    fn message() -> ParsedMessage {
        ParsedMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            labels: vec!["INBOX".into()],
            snippet: "Hi&nbsp;there &amp; welcome".into(),
            headers: MessageHeaders {
                from: "Alice <alice@example.com>".into(),
                to: "Bob <bob@example.com>".into(),
                subject: "Greetings".into(),
                date: "Tue, 05 Aug 2025 10:00:00 +0000".into(),
            },
            body: "plain text body".into(),
            html_body: String::new(),
            attachments: Vec::new(),
        }
    }

    #[test]
    fn plain_body_passes_through_decoded() {
        let mut msg = message();
        msg.body = "a &amp; b".into();
        let doc = clean_record(msg);
        assert_eq!(doc.body, "a & b");
    }

    #[test]
    fn html_only_body_is_stripped_and_decoded() {
        let mut msg = message();
        msg.body = String::new();
        msg.html_body = "<p>Hi&nbsp;there</p><p>second&amp;line</p>".into();
        let doc = clean_record(msg);
        assert!(!doc.body.contains('<'));
        assert!(!doc.body.contains("&nbsp;"));
        assert!(!doc.body.contains("&amp;"));
        assert!(doc.body.contains("Hi"));
        assert!(doc.body.contains("there"));
        assert!(doc.body.contains("second&line"));
    }

    #[test]
    fn plain_body_wins_over_html() {
        let mut msg = message();
        msg.body = "the plain one".into();
        msg.html_body = "<p>the html one</p>".into();
        let doc = clean_record(msg);
        assert_eq!(doc.body, "the plain one");
    }

    #[test]
    fn neither_body_yields_empty_string() {
        let mut msg = message();
        msg.body = String::new();
        msg.html_body = String::new();
        let doc = clean_record(msg);
        assert_eq!(doc.body, "");
    }

    #[test]
    fn snippet_entities_are_decoded() {
        let doc = clean_record(message());
        assert_eq!(doc.snippet, "Hi there & welcome");
    }

    #[test]
    fn valid_rfc2822_date_is_parsed() {
        let doc = clean_record(message());
        let date = doc.date.expect("date should parse");
        assert_eq!(date.timestamp(), 1754388000);
    }

    #[test]
    fn unparseable_date_yields_none() {
        let mut msg = message();
        msg.headers.date = "not-a-date".into();
        let doc = clean_record(msg);
        assert!(doc.date.is_none());
    }

    #[test]
    fn missing_date_yields_none() {
        let mut msg = message();
        msg.headers.date = String::new();
        let doc = clean_record(msg);
        assert!(doc.date.is_none());
    }

    #[test]
    fn date_with_zone_comment_is_parsed() {
        assert!(parse_date("Tue, 05 Aug 2025 10:00:00 +0000 (UTC)").is_some());
    }

    #[test]
    fn rfc3339_date_is_parsed() {
        assert!(parse_date("2025-08-05T10:00:00Z").is_some());
    }

    #[test]
    fn attachment_metadata_is_carried_through() {
        let mut msg = message();
        msg.attachments = vec![crate::models::Attachment {
            filename: "notes.txt".into(),
            content_type: "text/plain".into(),
            data: b"hello".to_vec(),
        }];
        let doc = clean_record(msg);
        assert_eq!(doc.attachments.len(), 1);
        assert_eq!(doc.attachments[0].filename, "notes.txt");
        assert_eq!(doc.attachments[0].size, 5);
    }
}

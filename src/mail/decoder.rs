use chrono::{DateTime, TimeZone, Utc};
use mailparse::{DispositionType, MailHeader, MailHeaderMap, ParsedContentDisposition, ParsedMail};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{DecodeError, MessageError};
use crate::mail::connector::MailboxSession;
use crate::mail::message::{Attachment, DecodedMessage};

/// Stored in place of a subject or sender the message doesn't carry.
pub const MISSING_HEADER: &str = "-----";

const UNNAMED_ATTACHMENT: &str = "attachment.bin";

/// Fetches messages one at a time and decodes them.
///
/// Consecutive fetches are spaced at least `min_interval` apart to stay
/// under provider rate limits. The first fetch also waits, counted from
/// when the decoder was created.
pub struct MessageDecoder {
    min_interval: Duration,
    last_request: Instant,
}

impl MessageDecoder {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Instant::now(),
        }
    }

    pub async fn fetch_and_decode(
        &mut self,
        session: &mut dyn MailboxSession,
        uid: &str,
    ) -> Result<DecodedMessage, MessageError> {
        tokio::time::sleep_until(self.last_request + self.min_interval).await;
        self.last_request = Instant::now();

        let raw = session.fetch_raw(uid).await?;
        tracing::debug!("Fetched uid {} ({} bytes)", uid, raw.len());

        Ok(decode_message(uid, &raw, Utc::now())?)
    }
}

/// Decode one raw RFC 5322 message.
pub fn decode_message(
    uid: &str,
    raw: &[u8],
    received_at: DateTime<Utc>,
) -> Result<DecodedMessage, DecodeError> {
    let parsed = mailparse::parse_mail(raw)?;

    let subject = header_text(parsed.headers.get_first_header("Subject"));
    let sender = header_text(parsed.headers.get_first_header("From"));
    let sent_at = parsed
        .headers
        .get_first_value("Date")
        .and_then(|date| parse_date(&date))
        .unwrap_or(received_at);

    let mut parts = BodyParts::default();
    walk_parts(&parsed, &mut parts)?;

    let body = if parts.plain.is_empty() {
        parts.html
    } else {
        parts.plain
    };

    Ok(DecodedMessage {
        uid: uid.to_string(),
        sender,
        subject,
        sent_at,
        received_at,
        body,
        attachments: parts.attachments,
    })
}

#[derive(Default)]
struct BodyParts {
    plain: String,
    html: String,
    attachments: Vec<Attachment>,
}

/// Depth-first over the MIME tree, visiting leaves in document order.
fn walk_parts(part: &ParsedMail<'_>, parts: &mut BodyParts) -> Result<(), DecodeError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, parts)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    let is_attachment = disposition.disposition == DispositionType::Attachment;
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    // A forwarded message shown inline is walked like the rest of the tree
    if mimetype == "message/rfc822" && !is_attachment {
        let inner = part.get_body_raw()?;
        let nested = mailparse::parse_mail(&inner)?;
        return walk_parts(&nested, parts);
    }

    if mimetype == "text/plain" && !is_attachment {
        parts.plain.push_str(&part.get_body()?);
    } else if mimetype == "text/html" && !is_attachment {
        parts.html.push_str(&part.get_body()?);
    } else if let Some(filename) = attachment_filename(part, &disposition, is_attachment) {
        parts.attachments.push(Attachment {
            filename,
            content_type: mimetype,
            payload: part.get_body_raw()?,
        });
    }

    Ok(())
}

/// Filename for a part that counts as an attachment, `None` otherwise.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disposition: &ParsedContentDisposition,
    is_attachment: bool,
) -> Option<String> {
    let named = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| decode_words(name.trim()))
        .filter(|name| !name.is_empty());

    match named {
        Some(name) => Some(name),
        None if is_attachment => Some(UNNAMED_ATTACHMENT.to_string()),
        None => None,
    }
}

/// Display text of a header that may use RFC 2047 encoded words.
///
/// Words that fail to decode are kept verbatim; an absent or blank header
/// becomes [`MISSING_HEADER`].
fn header_text(header: Option<&MailHeader<'_>>) -> String {
    let Some(header) = header else {
        return MISSING_HEADER.to_string();
    };

    let raw = String::from_utf8_lossy(header.get_value_raw())
        .trim()
        .to_string();
    if raw.is_empty() {
        return MISSING_HEADER.to_string();
    }

    let decoded = header.get_value();
    let decoded = decoded.trim();
    if decoded.is_empty() {
        raw
    } else {
        decoded.to_string()
    }
}

/// Decode encoded words in a header parameter such as a filename.
fn decode_words(value: &str) -> String {
    let line = format!("X-Param: {}", value);
    match mailparse::parse_header(line.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_string(),
    }
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let timestamp = mailparse::dateparse(value).ok()?;
    Utc.timestamp_opt(timestamp, 0).single()
}

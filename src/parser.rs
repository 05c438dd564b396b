//! Internal module turning raw IMAP fetch data into uniform messages.

use crate::error::{Error, Result};
use crate::message::{is_recipient_header, Envelope, Header};
use chrono::{DateTime, Utc};
use mailparse::{parse_headers, parse_mail, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

/// Builds an [`Envelope`] from header bytes.
///
/// `internal_date` is preferred; the `Date` header is the fallback. Returns
/// `None` when the headers cannot be parsed or no receipt time is known.
pub(crate) fn envelope_from_headers(
    id: String,
    raw_headers: &[u8],
    internal_date: Option<DateTime<Utc>>,
) -> Option<Envelope> {
    let (headers, _) = match parse_headers(raw_headers) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(id = %id, error = %e, "Failed to parse headers, skipping message");
            return None;
        }
    };

    let received_at = internal_date.or_else(|| {
        headers
            .get_first_value("Date")
            .and_then(|date| mailparse::dateparse(&date).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    });

    let Some(received_at) = received_at else {
        debug!(id = %id, "Message has no usable timestamp, skipping");
        return None;
    };

    let recipient_headers = headers
        .iter()
        .filter(|h| is_recipient_header(&h.get_key()))
        .map(|h| Header::new(h.get_key(), h.get_value()))
        .collect();

    Some(Envelope {
        id,
        received_at,
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        from: headers.get_first_value("From").unwrap_or_default(),
        headers: recipient_headers,
    })
}

/// Extracts the body text of a raw message.
///
/// # Errors
///
/// Returns [`Error::ParseEmail`] or [`Error::ExtractBody`] for malformed MIME.
pub(crate) fn body_text(raw: &[u8]) -> Result<String> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { source })?;
    extract_body_text(&parsed).map_err(|source| Error::ExtractBody { source })
}

/// Extracts text content from a parsed email: the first `text/plain` part
/// anywhere in the tree, else the first `text/html` part, else the root body.
pub(crate) fn extract_body_text(
    parsed: &ParsedMail<'_>,
) -> std::result::Result<String, mailparse::MailParseError> {
    for mimetype in ["text/plain", "text/html"] {
        if let Some(part) = find_part(parsed, mimetype) {
            if let Ok(body) = part.get_body() {
                return Ok(body);
            }
        }
    }

    parsed.get_body()
}

fn find_part<'a, 'b>(parsed: &'b ParsedMail<'a>, mimetype: &str) -> Option<&'b ParsedMail<'a>> {
    if parsed.subparts.is_empty() {
        return parsed
            .ctype
            .mimetype
            .eq_ignore_ascii_case(mimetype)
            .then_some(parsed);
    }
    parsed
        .subparts
        .iter()
        .find_map(|part| find_part(part, mimetype))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_from_headers() {
        let raw = "Subject: =?UTF-8?B?44OR44K544Kz44O844OJ?=\r\n\
                   From: Shop <noreply@shop.example.jp>\r\n\
                   To: me@icloud.com\r\n\
                   X-Original-To: alias@icloud.com\r\n\
                   Date: Sat, 01 Jun 2024 12:00:00 +0000\r\n\r\n";
        let env = envelope_from_headers("42".into(), raw.as_bytes(), None).unwrap();

        assert_eq!(env.id, "42");
        assert_eq!(env.subject, "パスコード");
        assert_eq!(env.from, "Shop <noreply@shop.example.jp>");
        assert_eq!(env.received_at.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        assert_eq!(
            env.headers,
            vec![
                Header::new("To", "me@icloud.com"),
                Header::new("X-Original-To", "alias@icloud.com"),
            ]
        );
    }

    #[test]
    fn test_internal_date_preferred() {
        let raw = b"Subject: x\r\nDate: Sat, 01 Jun 2024 12:00:00 +0000\r\n\r\n";
        let internal = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
        let env = envelope_from_headers("1".into(), raw, Some(internal)).unwrap();
        assert_eq!(env.received_at, internal);
    }

    #[test]
    fn test_missing_timestamp_skips() {
        let raw = b"Subject: x\r\n\r\n";
        assert!(envelope_from_headers("1".into(), raw, None).is_none());
    }

    #[test]
    fn test_body_text_simple() {
        let raw = b"From: test@example.com\r\nTo: user@example.com\r\n\r\nYour code is 123456.";
        assert!(body_text(raw).unwrap().contains("123456"));
    }

    #[test]
    fn test_body_prefers_nested_plain_text() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\r\n\r\n",
            "--inner\r\n",
            "Content-Type: text/html; charset=utf-8\r\n\r\n",
            "<p>パスコード</p><b>111111</b>\r\n",
            "--inner\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n\r\n",
            "パスコード：222222\r\n",
            "--inner--\r\n",
            "--outer--\r\n",
        );
        let text = body_text(raw.as_bytes()).unwrap();
        assert!(text.contains("222222"));
    }

    #[test]
    fn test_body_falls_back_to_html() {
        let raw = concat!(
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n\r\n",
            "--b\r\n",
            "Content-Type: text/html; charset=utf-8\r\n\r\n",
            "<b>333333</b>\r\n",
            "--b--\r\n",
        );
        let text = body_text(raw.as_bytes()).unwrap();
        assert!(text.contains("333333"));
    }
}

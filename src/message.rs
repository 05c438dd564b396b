//! Uniform message types produced by every mail backend.
//!
//! Backend adapters translate whatever their server returns into an
//! [`Envelope`] (metadata only) and, on demand, a body string. The resolver
//! never looks at backend-specific structures.

use chrono::{DateTime, Utc};

/// A single header as returned by the backend, already decoded to UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name, original casing.
    pub name: String,
    /// Decoded header value.
    pub value: String,
}

impl Header {
    /// Creates a header from a name/value pair.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Message metadata obtained without fetching the full body.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Backend identifier (IMAP UID or Gmail message id).
    pub id: String,
    /// When the mailbox received the message.
    pub received_at: DateTime<Utc>,
    /// Decoded subject, empty when absent.
    pub subject: String,
    /// Raw `From` value, empty when absent.
    pub from: String,
    /// Headers kept for recipient checks, in backend order.
    pub headers: Vec<Header>,
}

impl Envelope {
    /// Returns every value of the named header (case-insensitive).
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// Returns all values of the named header joined with `", "`.
    #[must_use]
    pub fn header_joined(&self, name: &str) -> String {
        self.header_values(name).collect::<Vec<_>>().join(", ")
    }
}

/// A candidate message: envelope plus the decoded body text.
#[derive(Debug, Clone)]
pub struct CandidateMessage {
    /// Metadata.
    pub envelope: Envelope,
    /// Body text (plain text preferred, HTML as fallback).
    pub body: String,
}

/// Header names that can carry recipients. Adapters keep these when building envelopes.
pub const RECIPIENT_HEADERS: &[&str] = &[
    "To",
    "Cc",
    "Bcc",
    "Delivered-To",
    "X-Original-To",
    "Envelope-To",
];

/// Returns `true` if an adapter should keep this header on the envelope.
#[must_use]
pub fn is_recipient_header(name: &str) -> bool {
    RECIPIENT_HEADERS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

//! Recipient verification across inconsistent header sources.
//!
//! Each [`RecipientSource`] pulls addresses out of an [`Envelope`]; the
//! [`RecipientSources`] list is applied in order and the results are unioned
//! into a pool. Backends differ in which headers they populate, so the
//! resolver only ever sees the union.

use crate::message::{Envelope, RECIPIENT_HEADERS};
use mailparse::{addrparse, MailAddr};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static LOOSE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid regex")
});

/// Something that can produce recipient addresses for a message.
pub trait RecipientSource: Send + Sync {
    /// Returns the addresses this source knows about, normalized.
    fn addresses(&self, envelope: &Envelope) -> Vec<String>;

    /// Human-readable name used in logs.
    fn name(&self) -> &str;
}

/// Reads addresses from every occurrence of one header.
#[derive(Debug, Clone)]
pub struct HeaderSource {
    header: String,
}

impl HeaderSource {
    /// Creates a source for the named header.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl RecipientSource for HeaderSource {
    fn addresses(&self, envelope: &Envelope) -> Vec<String> {
        envelope
            .header_values(&self.header)
            .flat_map(parse_addresses)
            .collect()
    }

    fn name(&self) -> &str {
        &self.header
    }
}

/// Ordered list of recipient sources.
pub struct RecipientSources {
    sources: Vec<Box<dyn RecipientSource>>,
}

impl Default for RecipientSources {
    /// To, Cc, Bcc, then the delivery fallbacks.
    fn default() -> Self {
        RECIPIENT_HEADERS
            .iter()
            .fold(Self::empty(), |list, h| list.with(HeaderSource::new(*h)))
    }
}

impl RecipientSources {
    /// Creates an empty list.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Appends a source.
    #[must_use]
    pub fn with(mut self, source: impl RecipientSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Unions the addresses of every source.
    #[must_use]
    pub fn pool(&self, envelope: &Envelope) -> BTreeSet<String> {
        self.sources
            .iter()
            .flat_map(|source| source.addresses(envelope))
            .collect()
    }

    /// Checks `filter` against the pool.
    #[must_use]
    pub fn check(&self, envelope: &Envelope, filter: &str) -> RecipientCheck {
        let pool = self.pool(envelope);
        if pool.is_empty() {
            RecipientCheck::Unverifiable
        } else if pool.contains(&normalize_address(filter)) {
            RecipientCheck::Match
        } else {
            RecipientCheck::Mismatch
        }
    }
}

impl std::fmt::Debug for RecipientSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.sources.iter().map(|s| s.name()))
            .finish()
    }
}

/// Outcome of checking a recipient filter against a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientCheck {
    /// The filter is in the pool.
    Match,
    /// The pool has addresses, none of them the filter.
    Mismatch,
    /// No source produced any address.
    Unverifiable,
}

/// Lowercases and strips whitespace and angle brackets.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim()
        .to_lowercase()
}

/// Parses an address-list header value. Falls back to a loose scan when the
/// value is not RFC 5322 compliant.
fn parse_addresses(value: &str) -> Vec<String> {
    let parsed = match addrparse(value) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![info.addr.clone()],
                MailAddr::Group(group) => group.addrs.iter().map(|i| i.addr.clone()).collect(),
            })
            .map(|a| normalize_address(&a))
            .filter(|a| a.contains('@'))
            .collect::<Vec<_>>(),
        Err(_) => Vec::new(),
    };

    if parsed.is_empty() {
        LOOSE_ADDRESS
            .find_iter(value)
            .map(|m| normalize_address(m.as_str()))
            .collect()
    } else {
        parsed
    }
}

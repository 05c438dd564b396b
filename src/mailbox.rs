//! Mail backend abstraction.
//!
//! A [`MailBackend`] opens one [`MailSession`] per request. Sessions list
//! envelopes and fetch bodies; they never change mailbox state.

use crate::config::BackendConfig;
use crate::error::Result;
use crate::gmail::GmailBackend;
use crate::imap::ImapBackend;
use crate::message::Envelope;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Listing parameters handed to a session.
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// Coarse lower bound on receipt time.
    pub since: DateTime<Utc>,
    /// Subject substring, applied server-side where the backend supports it.
    pub subject: Option<String>,
    /// Maximum number of envelopes to return.
    pub limit: usize,
}

/// Source of authenticated mail sessions.
#[async_trait]
pub trait MailBackend: Send + Sync {
    /// Opens a fresh session. No pooling: one session per request.
    async fn open(&self) -> Result<Box<dyn MailSession>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// An open, read-only mailbox session.
#[async_trait]
pub trait MailSession: Send {
    /// Lists envelopes received at or after `query.since`, newest first,
    /// at most `query.limit` of them.
    async fn list(&mut self, query: &ListQuery) -> Result<Vec<Envelope>>;

    /// Fetches the decoded body text of a listed message.
    async fn fetch_body(&mut self, envelope: &Envelope) -> Result<String>;

    /// Releases the session.
    async fn close(&mut self) -> Result<()>;
}

/// Builds the backend selected by the configuration.
///
/// No connection is made here; sessions are opened per request.
///
/// # Errors
///
/// Returns an error if the backend's HTTP client cannot be built.
pub fn backend_from_config(config: BackendConfig) -> Result<Arc<dyn MailBackend>> {
    Ok(match config {
        BackendConfig::Imap(imap) => Arc::new(ImapBackend::new(imap)),
        BackendConfig::Gmail(gmail) => Arc::new(GmailBackend::new(gmail)?),
    })
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory backend for unit tests.

    use super::{ListQuery, MailBackend, MailSession};
    use crate::error::{Error, Result};
    use crate::message::{CandidateMessage, Envelope};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    pub(crate) struct Counters {
        pub opened: AtomicUsize,
        pub closed: AtomicUsize,
        pub bodies: AtomicUsize,
    }

    #[derive(Debug, Clone, Default)]
    pub(crate) struct MemoryBackend {
        pub messages: Vec<CandidateMessage>,
        pub fail_list: bool,
        pub counters: Arc<Counters>,
    }

    impl MemoryBackend {
        pub(crate) fn new(messages: Vec<CandidateMessage>) -> Self {
            Self {
                messages,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl MailBackend for MemoryBackend {
        async fn open(&self) -> Result<Box<dyn MailSession>> {
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.clone()))
        }

        fn name(&self) -> &'static str {
            "memory"
        }
    }

    #[async_trait]
    impl MailSession for MemoryBackend {
        async fn list(&mut self, query: &ListQuery) -> Result<Vec<Envelope>> {
            if self.fail_list {
                return Err(Error::SearchTimeout {
                    timeout: std::time::Duration::from_secs(1),
                });
            }
            let mut found: Vec<Envelope> = self
                .messages
                .iter()
                .map(|m| m.envelope.clone())
                .filter(|e| e.received_at >= query.since)
                .filter(|e| {
                    query
                        .subject
                        .as_deref()
                        .map_or(true, |s| e.subject.contains(s))
                })
                .collect();
            found.sort_by(|a, b| b.received_at.cmp(&a.received_at));
            found.truncate(query.limit);
            Ok(found)
        }

        async fn fetch_body(&mut self, envelope: &Envelope) -> Result<String> {
            self.counters.bodies.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .messages
                .iter()
                .find(|m| m.envelope.id == envelope.id)
                .map(|m| m.body.clone())
                .unwrap_or_default())
        }

        async fn close(&mut self) -> Result<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

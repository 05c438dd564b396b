//! Shared helpers for bridge tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use passcode_bridge::mailbox::ListQuery;
use passcode_bridge::message::{CandidateMessage, Envelope, Header};
use passcode_bridge::resolver::Resolver;
use passcode_bridge::web::{create_router, AppState};
use passcode_bridge::{Error, MailBackend, MailSession, ResolverSettings, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Session bookkeeping shared by every session of a [`MemoryBackend`].
#[derive(Debug, Default)]
pub struct Counters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Counters {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Mailbox held in memory. Every session sees the same messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub messages: Arc<Vec<CandidateMessage>>,
    pub fail: bool,
    pub counters: Arc<Counters>,
}

impl MemoryBackend {
    pub fn new(messages: Vec<CandidateMessage>) -> Self {
        Self {
            messages: Arc::new(messages),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
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
        if self.fail {
            return Err(Error::SearchTimeout {
                timeout: Duration::from_secs(30),
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

/// Builds a passcode message received `minutes_ago` minutes before now.
pub fn passcode_mail(id: &str, minutes_ago: i64, to: &str, body: &str) -> CandidateMessage {
    let received_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    mail_at(id, received_at, "【パスコード】ログイン確認", to, body)
}

pub fn mail_at(
    id: &str,
    received_at: DateTime<Utc>,
    subject: &str,
    to: &str,
    body: &str,
) -> CandidateMessage {
    CandidateMessage {
        envelope: Envelope {
            id: id.to_string(),
            received_at,
            subject: subject.to_string(),
            from: "Shop <noreply@shop.example.jp>".to_string(),
            headers: vec![Header::new("To", to)],
        },
        body: body.to_string(),
    }
}

pub fn resolver(backend: MemoryBackend) -> Arc<Resolver> {
    let resolver = Resolver::new(Arc::new(backend), ResolverSettings::default()).unwrap();
    Arc::new(resolver)
}

pub fn router(backend: MemoryBackend) -> axum::Router {
    create_router(Arc::new(AppState::new(resolver(backend))))
}

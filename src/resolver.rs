//! The passcode resolver.
//!
//! Given a recipient filter and a watermark, the resolver opens a fresh
//! mail session, scans recent passcode messages newest-first, and returns
//! the first 6-digit code from a message that is fresh enough and
//! addressed to the caller.
//!
//! A message is eligible only when its receipt time is at least
//! `max(min(watermark, now), now - last_window)`: codes issued before the
//! caller started waiting are never returned, and nothing older than the
//! freshness window is returned regardless of the watermark.

use crate::config::{ResolverSettings, UnverifiedRecipientPolicy};
use crate::error::{Error, Result};
use crate::mailbox::{ListQuery, MailBackend, MailSession};
use crate::matcher::PasscodeExtractor;
use crate::message::Envelope;
use crate::recipients::{normalize_address, RecipientCheck, RecipientSources};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// A single `/code` request.
#[derive(Debug, Clone, Default)]
pub struct CodeRequest {
    /// Only messages addressed here are eligible. Blank means no filter.
    pub recipient: Option<String>,
    /// Caller's "not older than" point, usually when it started waiting.
    pub watermark: Option<DateTime<Utc>>,
}

impl CodeRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(recipient: Option<String>, watermark: Option<DateTime<Utc>>) -> Self {
        Self {
            recipient,
            watermark,
        }
    }

    fn recipient_filter(&self) -> Option<String> {
        self.recipient
            .as_deref()
            .map(normalize_address)
            .filter(|r| !r.is_empty())
    }
}

/// Outcome of a resolution. Not finding a code is a normal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A code was found.
    Found {
        /// The 6-digit code.
        code: String,
        /// Backend id of the message it came from.
        message_id: String,
        /// When that message was received.
        received_at: DateTime<Utc>,
    },
    /// Nothing eligible yet.
    NotFound {
        /// Diagnostic reason.
        reason: String,
    },
}

impl Resolution {
    /// Returns the code, if found.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Resolution::Found { code, .. } => Some(code.as_str()),
            Resolution::NotFound { .. } => None,
        }
    }
}

/// Reason reported when the lookback window holds no candidate at all.
pub const NO_MESSAGES_REASON: &str = "no messages in window";

/// Computes the lowest acceptable receipt time.
///
/// A watermark in the future is clamped to `now`.
#[must_use]
pub fn min_acceptable_time(
    watermark: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    last_window: Duration,
) -> DateTime<Utc> {
    let freshness_floor = window_start(now, last_window);
    match watermark {
        Some(w) => w.min(now).max(freshness_floor),
        None => freshness_floor,
    }
}

/// Returns `now - window`, saturating at the earliest representable time.
fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Resolves passcodes against one mail backend.
pub struct Resolver {
    backend: Arc<dyn MailBackend>,
    settings: ResolverSettings,
    extractor: PasscodeExtractor,
    recipients: RecipientSources,
}

impl Resolver {
    /// Creates a resolver with the default extraction tiers and recipient sources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the settings are inconsistent or the
    /// passcode label produces an invalid pattern.
    pub fn new(backend: Arc<dyn MailBackend>, settings: ResolverSettings) -> Result<Self> {
        settings.validate()?;
        let extractor =
            PasscodeExtractor::new(&settings.passcode_label).map_err(|e| Error::InvalidConfig {
                message: format!("PASSCODE_LABEL produces an invalid pattern: {e}"),
            })?;
        Ok(Self {
            backend,
            settings,
            extractor,
            recipients: RecipientSources::default(),
        })
    }

    /// Replaces the recipient source list.
    #[must_use]
    pub fn with_recipient_sources(mut self, recipients: RecipientSources) -> Self {
        self.recipients = recipients;
        self
    }

    /// Returns the settings.
    #[must_use]
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Returns the backend name.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Resolves a request against the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be read. No partial result and
    /// no retry.
    pub async fn resolve(&self, request: &CodeRequest) -> Result<Resolution> {
        self.resolve_at(request, Utc::now()).await
    }

    /// Resolves a request as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be read.
    #[instrument(
        name = "Resolver::resolve",
        skip(self, request),
        fields(
            backend = self.backend.name(),
            recipient = request.recipient.as_deref().unwrap_or(""),
            watermark = ?request.watermark
        )
    )]
    pub async fn resolve_at(
        &self,
        request: &CodeRequest,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let min_time = min_acceptable_time(request.watermark, now, self.settings.last_window);
        let mut session = self.backend.open().await?;
        let outcome = self.scan(session.as_mut(), request, now, min_time).await;
        close_quietly(session.as_mut()).await;

        match &outcome {
            Ok(Resolution::Found { message_id, .. }) => {
                info!(message_id = %message_id, "Passcode resolved");
            }
            Ok(Resolution::NotFound { reason }) => debug!(reason = %reason, "No passcode yet"),
            Err(e) => warn!(error = %e, category = %e.category(), "Passcode resolution failed"),
        }
        outcome
    }

    async fn scan(
        &self,
        session: &mut dyn MailSession,
        request: &CodeRequest,
        now: DateTime<Utc>,
        min_time: DateTime<Utc>,
    ) -> Result<Resolution> {
        let query = self.list_query(now, self.settings.scan_limit);
        let mut envelopes = session.list(&query).await?;

        if envelopes.is_empty() {
            return Ok(Resolution::NotFound {
                reason: NO_MESSAGES_REASON.into(),
            });
        }

        envelopes.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        let filter = request.recipient_filter();

        for envelope in envelopes.iter().take(self.settings.scan_limit) {
            if !self.is_eligible(envelope, filter.as_deref(), min_time) {
                continue;
            }

            let body = session.fetch_body(envelope).await?;
            let hit = self
                .extractor
                .extract(&body)
                .or_else(|| self.extractor.extract(&envelope.subject));

            if let Some((code, tier)) = hit {
                debug!(id = %envelope.id, tier, "Passcode extracted");
                return Ok(Resolution::Found {
                    code: code.into_owned(),
                    message_id: envelope.id.clone(),
                    received_at: envelope.received_at,
                });
            }
            debug!(id = %envelope.id, "Eligible message has no passcode");
        }

        Ok(Resolution::NotFound {
            reason: format!("no code found after {}", min_time.to_rfc3339()),
        })
    }

    fn is_eligible(
        &self,
        envelope: &Envelope,
        filter: Option<&str>,
        min_time: DateTime<Utc>,
    ) -> bool {
        if envelope.received_at < min_time {
            debug!(
                id = %envelope.id,
                received_at = %envelope.received_at,
                "Skipping stale message"
            );
            return false;
        }
        if !envelope.subject.contains(&self.settings.subject_keyword) {
            debug!(id = %envelope.id, "Skipping message without subject keyword");
            return false;
        }
        let Some(filter) = filter else {
            return true;
        };
        match self.recipients.check(envelope, filter) {
            RecipientCheck::Match => true,
            RecipientCheck::Mismatch => {
                debug!(id = %envelope.id, "Skipping message for another recipient");
                false
            }
            RecipientCheck::Unverifiable => {
                let accept =
                    self.settings.unverified_recipient == UnverifiedRecipientPolicy::Accept;
                debug!(id = %envelope.id, accept, "Message has no recipient information");
                accept
            }
        }
    }

    /// Lists up to `limit` recent passcode messages, newest first.
    ///
    /// `limit` is clamped to `1..=recent_limit_max`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be read.
    #[instrument(name = "Resolver::recent", skip(self), fields(backend = self.backend.name()))]
    pub async fn recent(&self, limit: usize) -> Result<Vec<Envelope>> {
        let limit = limit.clamp(1, self.settings.recent_limit_max);
        // Backends that cannot filter on a non-ASCII subject return unrelated
        // mail too, so list the full allowance before filtering.
        let query = self.list_query(Utc::now(), self.settings.recent_limit_max);

        let mut session = self.backend.open().await?;
        let outcome = session.list(&query).await;
        close_quietly(session.as_mut()).await;

        let mut envelopes: Vec<Envelope> = outcome?
            .into_iter()
            .filter(|e| e.subject.contains(&self.settings.subject_keyword))
            .collect();
        envelopes.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        envelopes.truncate(limit);
        Ok(envelopes)
    }

    fn list_query(&self, now: DateTime<Utc>, limit: usize) -> ListQuery {
        ListQuery {
            since: window_start(now, self.settings.query_window),
            subject: Some(self.settings.subject_keyword.clone()),
            limit,
        }
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .field("recipients", &self.recipients)
            .finish_non_exhaustive()
    }
}

async fn close_quietly(session: &mut dyn MailSession) {
    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close mail session");
    }
}

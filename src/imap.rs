//! IMAP mail backend.
//!
//! Each [`ImapBackend::open`] establishes a new TLS connection, logs in,
//! and opens the configured mailbox read-only. The session is logged out
//! when the resolver closes it.
//!
//! # Example
//!
//! ```no_run
//! use passcode_bridge::imap::ImapBackend;
//! use passcode_bridge::mailbox::{ListQuery, MailBackend, MailSession};
//! use passcode_bridge::ImapConfig;
//!
//! # async fn example() -> passcode_bridge::Result<()> {
//! let config = ImapConfig::builder()
//!     .user("me@icloud.com")
//!     .password("app-specific-password")
//!     .build()?;
//!
//! let backend = ImapBackend::new(config);
//! let mut session = backend.open().await?;
//! let envelopes = session
//!     .list(&ListQuery {
//!         since: chrono::Utc::now() - chrono::Duration::minutes(30),
//!         subject: None,
//!         limit: 10,
//!     })
//!     .await?;
//! println!("{} recent messages", envelopes.len());
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::ImapConfig;
use crate::connection;
use crate::error::{Error, Result};
use crate::mailbox::{ListQuery, MailBackend, MailSession};
use crate::message::Envelope;
use crate::parser;
use crate::session::{self, AuthConfig, ImapSession};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, instrument, warn};

/// Mail backend reading an IMAP mailbox.
#[derive(Debug, Clone)]
pub struct ImapBackend {
    config: ImapConfig,
}

impl ImapBackend {
    /// Creates a backend for the given account.
    #[must_use]
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailBackend for ImapBackend {
    #[instrument(
        name = "ImapBackend::open",
        skip_all,
        fields(user = %self.config.user(), imap_host = %self.config.effective_imap_host())
    )]
    async fn open(&self) -> Result<Box<dyn MailSession>> {
        let session = initialize_session(&self.config).await?;
        Ok(Box::new(ImapMailSession {
            session: Box::new(session),
            config: self.config.clone(),
            logged_out: false,
        }))
    }

    fn name(&self) -> &'static str {
        "imap"
    }
}

/// Connects, authenticates and examines the configured mailbox.
async fn initialize_session(config: &ImapConfig) -> Result<ImapSession> {
    let imap_host = config.effective_imap_host();
    let target_addr = config.server_address();
    let timeouts = &config.timeouts;

    let tls_stream = tokio::time::timeout(
        timeouts.connect,
        connection::establish_tls_connection(&imap_host, &target_addr),
    )
    .await
    .map_err(|_| Error::ConnectTimeout {
        target: target_addr.clone(),
        timeout: timeouts.connect,
    })??;

    debug!("TLS connection established");

    let auth_config = AuthConfig {
        user: config.user(),
        password: config.password(),
    };

    let mut session = tokio::time::timeout(
        timeouts.auth,
        session::authenticate(tls_stream, &auth_config),
    )
    .await
    .map_err(|_| Error::AuthTimeout {
        user: config.user().to_string(),
        timeout: timeouts.auth,
    })??;

    debug!("Authenticated");

    tokio::time::timeout(
        timeouts.select,
        session::examine_mailbox(&mut session, &config.mailbox),
    )
    .await
    .map_err(|_| Error::SelectTimeout {
        mailbox: config.mailbox.clone(),
        timeout: timeouts.select,
    })??;

    debug!(mailbox = %config.mailbox, "Mailbox opened read-only");

    Ok(session)
}

/// An open IMAP session.
struct ImapMailSession {
    session: Box<ImapSession>,
    config: ImapConfig,
    logged_out: bool,
}

#[async_trait]
impl MailSession for ImapMailSession {
    #[instrument(
        name = "ImapMailSession::list",
        skip_all,
        fields(since = %query.since, limit = query.limit)
    )]
    async fn list(&mut self, query: &ListQuery) -> Result<Vec<Envelope>> {
        let timeouts = &self.config.timeouts;

        // SINCE has day granularity in the server's timezone; widen by a day and
        // filter exactly on INTERNALDATE below.
        let since_date = (query.since - ChronoDuration::days(1)).date_naive();
        let search = session::search_query(since_date, query.subject.as_deref());

        let uids = tokio::time::timeout(
            timeouts.search,
            session::search_uids(&mut self.session, &search),
        )
        .await
        .map_err(|_| Error::SearchTimeout {
            timeout: timeouts.search,
        })??;

        // UIDs grow with arrival order; the newest are at the end
        let newest = &uids[uids.len().saturating_sub(query.limit)..];
        if newest.is_empty() {
            return Ok(Vec::new());
        }

        let uid_set = newest
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let fetches = tokio::time::timeout(
            timeouts.message_fetch,
            session::fetch_headers(&mut self.session, &uid_set),
        )
        .await
        .map_err(|_| Error::FetchTimeout {
            target: uid_set.clone(),
            timeout: timeouts.message_fetch,
        })??;

        let mut envelopes: Vec<Envelope> = fetches
            .iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                let header = fetch.header()?;
                let internal = fetch.internal_date().map(|d| d.with_timezone(&Utc));
                parser::envelope_from_headers(uid.to_string(), header, internal)
            })
            .filter(|envelope| envelope.received_at >= query.since)
            .collect();

        envelopes.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        envelopes.truncate(query.limit);

        debug!(count = envelopes.len(), "Listed envelopes");

        Ok(envelopes)
    }

    #[instrument(name = "ImapMailSession::fetch_body", skip_all, fields(uid = %envelope.id))]
    async fn fetch_body(&mut self, envelope: &Envelope) -> Result<String> {
        let fetch_timeout = self.config.timeouts.message_fetch;

        let fetches = tokio::time::timeout(
            fetch_timeout,
            session::fetch_bodies(&mut self.session, &envelope.id),
        )
        .await
        .map_err(|_| Error::FetchTimeout {
            target: envelope.id.clone(),
            timeout: fetch_timeout,
        })??;

        let Some(raw) = fetches.iter().find_map(|fetch| fetch.body()) else {
            debug!("Message has no body");
            return Ok(String::new());
        };

        // A malformed message is skipped, not fatal to the scan
        match parser::body_text(raw) {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(error = %e, "Failed to read message body, skipping message");
                Ok(String::new())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.logged_out {
            return Ok(());
        }
        self.logged_out = true;

        let timeout = self.config.timeouts.logout;
        tokio::time::timeout(timeout, session::logout(&mut self.session))
            .await
            .map_err(|_| Error::LogoutTimeout { timeout })?
    }
}

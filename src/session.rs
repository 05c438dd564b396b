//! Internal IMAP session management.
//!
//! This module wraps async-imap operations with proper error handling.
//! Every command here is read-only: the mailbox is opened with `EXAMINE`
//! and message data is fetched with `BODY.PEEK`, so `\Seen` is never set.

use crate::connection::TlsStream;
use crate::error::{Error, Result};
use async_imap::types::Fetch;
use async_imap::Session;
use chrono::NaiveDate;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, instrument};

/// Type alias for IMAP session over TLS.
pub(crate) type ImapSession = Session<TlsStream>;

/// Fetch items for the envelope pass.
const HEADER_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[HEADER])";

/// Fetch items for the body pass.
const BODY_QUERY: &str = "(UID BODY.PEEK[])";

/// Authentication configuration for IMAP.
pub(crate) struct AuthConfig<'a> {
    pub user: &'a str,
    pub password: &'a str,
}

/// Authenticates to IMAP server and returns a session.
#[instrument(
    name = "session::authenticate",
    skip_all,
    fields(user = %config.user)
)]
pub(crate) async fn authenticate(
    tls_stream: TlsStream,
    config: &AuthConfig<'_>,
) -> Result<ImapSession> {
    let client = async_imap::Client::new(tls_stream);

    debug!("Authenticating to IMAP server");

    client
        .login(config.user, config.password)
        .await
        .map_err(|e| Error::ImapLogin {
            user: config.user.to_string(),
            source: e.0,
        })
}

/// Opens a mailbox read-only.
#[instrument(name = "session::examine", skip(session), fields(mailbox = %mailbox))]
pub(crate) async fn examine_mailbox(session: &mut ImapSession, mailbox: &str) -> Result<()> {
    debug!("Examining mailbox");

    session
        .examine(mailbox)
        .await
        .map_err(|source| Error::SelectMailbox {
            mailbox: mailbox.to_string(),
            source,
        })?;

    Ok(())
}

/// Builds a `UID SEARCH` query.
///
/// `SUBJECT` is only sent for plain ASCII keywords; non-ASCII search needs
/// `CHARSET` and literal support that not every server handles.
pub(crate) fn search_query(since_date: NaiveDate, subject: Option<&str>) -> String {
    // IMAP SINCE format: "DD-Mon-YYYY" (e.g., "07-Dec-2025")
    let mut query = format!("SINCE {}", since_date.format("%d-%b-%Y"));
    if let Some(subject) = subject.filter(|s| is_quotable_ascii(s)) {
        query.push_str(&format!(" SUBJECT \"{subject}\""));
    }
    query
}

fn is_quotable_ascii(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\')
}

/// Searches for message UIDs, returned in ascending order.
#[instrument(name = "session::search", skip(session), fields(query = %query))]
pub(crate) async fn search_uids(session: &mut ImapSession, query: &str) -> Result<Vec<u32>> {
    let uids = session
        .uid_search(query)
        .await
        .map_err(|source| Error::ImapSearch { source })?;

    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();

    debug!(uid_count = uids.len(), "Found messages");

    Ok(uids)
}

/// Fetches UID, INTERNALDATE and the header block for a UID set.
pub(crate) async fn fetch_headers(session: &mut ImapSession, uid_set: &str) -> Result<Vec<Fetch>> {
    fetch_all(session, uid_set, HEADER_QUERY).await
}

/// Fetches the full raw message for a UID set.
pub(crate) async fn fetch_bodies(session: &mut ImapSession, uid_set: &str) -> Result<Vec<Fetch>> {
    fetch_all(session, uid_set, BODY_QUERY).await
}

async fn fetch_all(session: &mut ImapSession, uid_set: &str, query: &str) -> Result<Vec<Fetch>> {
    debug!(uid_set = %uid_set, query, "Fetching messages");

    let stream = session
        .uid_fetch(uid_set, query)
        .await
        .map_err(|source| Error::ImapFetch {
            uid_range: uid_set.to_string(),
            source,
        })?;

    stream
        .boxed()
        .try_collect()
        .await
        .map_err(|source| Error::FetchMessage { source })
}

/// Logs out from IMAP session.
#[instrument(name = "session::logout", skip(session))]
pub(crate) async fn logout(session: &mut ImapSession) -> Result<()> {
    debug!("Logging out");

    session
        .logout()
        .await
        .map_err(|source| Error::ImapLogout { source })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 12, 7).unwrap()
    }

    #[test]
    fn test_search_query_with_ascii_subject() {
        assert_eq!(
            search_query(date(), Some("Passcode")),
            "SINCE 07-Dec-2025 SUBJECT \"Passcode\""
        );
    }

    #[test]
    fn test_search_query_skips_non_ascii_subject() {
        assert_eq!(
            search_query(date(), Some("パスコード")),
            "SINCE 07-Dec-2025"
        );
        assert_eq!(
            search_query(date(), Some("say \"hi\"")),
            "SINCE 07-Dec-2025"
        );
        assert_eq!(search_query(date(), None), "SINCE 07-Dec-2025");
    }
}

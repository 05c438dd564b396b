//! Gmail REST API mail backend.
//!
//! The bridge treats the OAuth flow as someone else's job: it is handed a
//! bearer token and only issues read-only `GET` requests against
//! `users.messages.list` and `users.messages.get`.

use crate::config::GmailConfig;
use crate::error::{Error, Result};
use crate::mailbox::{ListQuery, MailBackend, MailSession};
use crate::message::{Envelope, Header, RECIPIENT_HEADERS};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const ERROR_BODY_MAX_LEN: usize = 200;

/// Mail backend reading a Gmail mailbox over HTTPS.
#[derive(Debug, Clone)]
pub struct GmailBackend {
    client: Client,
    config: Arc<GmailConfig>,
}

impl GmailBackend {
    /// Creates a backend. No request is made until a session lists messages.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GmailRequest`] if the HTTP client cannot be built.
    pub fn new(config: GmailConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| Error::GmailRequest {
                endpoint: "client".into(),
                source,
            })?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

#[async_trait]
impl MailBackend for GmailBackend {
    async fn open(&self) -> Result<Box<dyn MailSession>> {
        Ok(Box::new(GmailSession {
            client: self.client.clone(),
            config: Arc::clone(&self.config),
        }))
    }

    fn name(&self) -> &'static str {
        "gmail"
    }
}

struct GmailSession {
    client: Client,
    config: Arc<GmailConfig>,
}

impl GmailSession {
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!(
            "{}/users/{}/{}",
            self.config.api_base, self.config.user_id, endpoint
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.config.token())
            .query(query)
            .send()
            .await
            .map_err(|source| Error::GmailRequest {
                endpoint: endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::GmailStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_MAX_LEN).collect(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| Error::GmailRequest {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

#[async_trait]
impl MailSession for GmailSession {
    #[instrument(
        name = "GmailSession::list",
        skip_all,
        fields(since = %query.since, limit = query.limit)
    )]
    async fn list(&mut self, query: &ListQuery) -> Result<Vec<Envelope>> {
        let search = search_query(query);
        let listed: ListMessagesResponse = self
            .get_json(
                "messages",
                &[("q", search), ("maxResults", query.limit.to_string())],
            )
            .await?;

        let refs = listed.messages.unwrap_or_default();
        debug!(count = refs.len(), "Listed message ids");

        let mut metadata_query = vec![("format", "metadata".to_string())];
        metadata_query.extend(
            ["Subject", "From", "Date"]
                .iter()
                .chain(RECIPIENT_HEADERS)
                .map(|h| ("metadataHeaders", (*h).to_string())),
        );

        let mut envelopes = Vec::with_capacity(refs.len());
        for message_ref in refs.iter().take(query.limit) {
            let message: GmailMessage = self
                .get_json(&format!("messages/{}", message_ref.id), &metadata_query)
                .await?;
            match envelope_from_message(&message) {
                Some(envelope) if envelope.received_at >= query.since => envelopes.push(envelope),
                Some(_) => {}
                None => warn!(id = %message.id, "Gmail message has no internalDate, skipping"),
            }
        }

        envelopes.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(envelopes)
    }

    #[instrument(name = "GmailSession::fetch_body", skip_all, fields(id = %envelope.id))]
    async fn fetch_body(&mut self, envelope: &Envelope) -> Result<String> {
        let message: GmailMessage = self
            .get_json(
                &format!("messages/{}", envelope.id),
                &[("format", "full".to_string())],
            )
            .await?;
        Ok(body_from_message(&message))
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds the Gmail search expression for a listing.
fn search_query(query: &ListQuery) -> String {
    let mut search = format!("after:{}", query.since.timestamp());
    if let Some(subject) = query.subject.as_deref().filter(|s| !s.is_empty()) {
        search.push_str(&format!(" subject:\"{}\"", subject.replace('"', "")));
    }
    search
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    internal_date: Option<String>,
    snippet: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    body: Option<PartBody>,
    parts: Option<Vec<MessagePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PartBody {
    data: Option<String>,
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

fn envelope_from_message(message: &GmailMessage) -> Option<Envelope> {
    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)?;

    let headers: &[GmailHeader] = message
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_deref())
        .unwrap_or_default();

    let first = |name: &str| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };

    Some(Envelope {
        id: message.id.clone(),
        received_at,
        subject: first("Subject"),
        from: first("From"),
        headers: headers
            .iter()
            .filter(|h| crate::message::is_recipient_header(&h.name))
            .map(|h| Header::new(&h.name, &h.value))
            .collect(),
    })
}

/// Picks the readable body of a full message.
///
/// An undecodable part is not an error: the message falls back to its
/// snippet so one bad message cannot fail the whole scan.
fn body_from_message(message: &GmailMessage) -> String {
    let data = message.payload.as_ref().and_then(|payload| {
        ["text/plain", "text/html"]
            .into_iter()
            .find_map(|mimetype| find_part_data(payload, mimetype))
    });
    if let Some(data) = data {
        match decode_body(&message.id, data) {
            Ok(body) => return body,
            Err(e) => warn!(error = %e, "Failed to decode message body, using snippet"),
        }
    }
    message.snippet.clone().unwrap_or_default()
}

fn find_part_data<'a>(part: &'a MessagePart, mimetype: &str) -> Option<&'a str> {
    let is_match = part
        .mime_type
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(mimetype));
    if is_match {
        let inline = part
            .body
            .as_ref()
            .filter(|b| b.attachment_id.is_none())
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty());
        if inline.is_some() {
            return inline;
        }
    }
    part.parts
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find_map(|p| find_part_data(p, mimetype))
}

fn decode_body(id: &str, data: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| Error::GmailDecode {
            id: id.to_string(),
            message: e.to_string(),
        })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

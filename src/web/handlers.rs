//! Request handlers.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::message::Envelope;
use crate::resolver::{CodeRequest, Resolution, Resolver};
use crate::web::error::ApiError;

/// Default number of messages returned by `/recent`.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Resolver holding the backend handle and immutable settings.
    pub resolver: Arc<Resolver>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }
}

/// `/health` response body.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `true`.
    pub ok: bool,
    /// Active backend name.
    pub backend: String,
    /// Subject keyword used for filtering.
    pub subject_keyword: String,
    /// Freshness window in minutes.
    pub last_minutes: u64,
    /// Lookback window in minutes.
    pub query_minutes: u64,
}

/// One entry of the `/recent` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecentMessage {
    /// Backend message identifier.
    pub id: String,
    /// Receipt time, epoch milliseconds.
    pub timestamp: i64,
    /// Receipt time, RFC 3339.
    pub date: String,
    /// Decoded subject.
    pub subject: String,
    /// `From` header.
    pub from: String,
    /// `To` header(s), comma-joined.
    pub to: String,
}

impl From<&Envelope> for RecentMessage {
    fn from(envelope: &Envelope) -> Self {
        Self {
            id: envelope.id.clone(),
            timestamp: envelope.received_at.timestamp_millis(),
            date: envelope
                .received_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            subject: envelope.subject.clone(),
            from: envelope.from.clone(),
            to: envelope.header_joined("To"),
        }
    }
}

/// `/code` response body. Absence of a code is reported here with HTTP 200.
#[derive(Debug, Serialize, Deserialize)]
pub struct CodeResponse {
    /// Always `true` for a completed resolution.
    pub ok: bool,
    /// Whether a code was found.
    pub found: bool,
    /// The code, `null` when not found.
    pub code: Option<String>,
    /// Diagnostic reason when not found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<Resolution> for CodeResponse {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Found { code, .. } => Self {
                ok: true,
                found: true,
                code: Some(code),
                reason: None,
            },
            Resolution::NotFound { reason } => Self {
                ok: true,
                found: false,
                code: None,
                reason: Some(reason),
            },
        }
    }
}

/// `/recent` query parameters. Kept as raw strings so bad input falls back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    /// Requested number of messages.
    pub limit: Option<String>,
}

/// `/code` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct CodeQuery {
    /// Recipient filter.
    pub to: Option<String>,
    /// Watermark, epoch milliseconds.
    pub after: Option<String>,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let settings = state.resolver.settings();
    Json(HealthResponse {
        ok: true,
        backend: state.resolver.backend_name().to_string(),
        subject_keyword: settings.subject_keyword.clone(),
        last_minutes: settings.last_window.as_secs() / 60,
        query_minutes: settings.query_window.as_secs() / 60,
    })
}

/// GET /recent?limit=N
pub async fn recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<RecentMessage>>, ApiError> {
    let limit = query
        .limit
        .as_deref()
        .and_then(|l| l.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_RECENT_LIMIT);

    let envelopes = state.resolver.recent(limit).await?;
    Ok(Json(envelopes.iter().map(RecentMessage::from).collect()))
}

/// GET /code?to=<email>&after=<epoch-ms>
pub async fn code(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CodeQuery>,
) -> Result<Json<CodeResponse>, ApiError> {
    let watermark = query.after.as_deref().and_then(parse_watermark);
    let request = CodeRequest::new(query.to, watermark);

    let resolution = state.resolver.resolve(&request).await?;
    Ok(Json(resolution.into()))
}

/// Parses an epoch-milliseconds watermark. Invalid input is treated as absent.
fn parse_watermark(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = raw
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    if parsed.is_none() {
        tracing::warn!(after = raw, "Ignoring unparsable watermark");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Header;

    #[test]
    fn test_parse_watermark() {
        let parsed = parse_watermark("1717243200000").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        assert!(parse_watermark("").is_none());
        assert!(parse_watermark("yesterday").is_none());
        assert!(parse_watermark("1.5").is_none());
    }

    #[test]
    fn test_code_response_not_found_shape() {
        let body = serde_json::to_value(CodeResponse::from(Resolution::NotFound {
            reason: "no messages in window".into(),
        }))
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "ok": true,
                "found": false,
                "code": null,
                "reason": "no messages in window"
            })
        );
    }

    #[test]
    fn test_code_response_found_omits_reason() {
        let body = serde_json::to_value(CodeResponse::from(Resolution::Found {
            code: "482913".into(),
            message_id: "7".into(),
            received_at: Utc::now(),
        }))
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"ok": true, "found": true, "code": "482913"})
        );
    }

    #[test]
    fn test_recent_message_from_envelope() {
        let envelope = Envelope {
            id: "42".into(),
            received_at: DateTime::from_timestamp(1_717_243_200, 0).unwrap(),
            subject: "パスコード".into(),
            from: "noreply@shop.example.jp".into(),
            headers: vec![
                Header::new("To", "a@example.com"),
                Header::new("to", "b@example.com"),
                Header::new("Delivered-To", "c@example.com"),
            ],
        };
        let message = RecentMessage::from(&envelope);
        assert_eq!(message.timestamp, 1_717_243_200_000);
        assert_eq!(message.date, "2024-06-01T12:00:00Z");
        assert_eq!(message.to, "a@example.com, b@example.com");
    }
}

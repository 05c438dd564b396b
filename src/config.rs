//! Bridge configuration.
//!
//! Everything the bridge needs is read once at startup into an immutable
//! [`BridgeConfig`] and passed explicitly to the resolver and web layer.
//!
//! ```
//! use passcode_bridge::config::BridgeConfig;
//! use std::collections::HashMap;
//!
//! let env = HashMap::from([
//!     ("IMAP_USER", "me@icloud.com"),
//!     ("IMAP_PASSWORD", "abcd-efgh-ijkl-mnop"),
//! ]);
//! let config = BridgeConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()))
//!     .expect("valid config");
//! assert_eq!(config.resolver.scan_limit, 20);
//! ```

use crate::error::{Error, Result};
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default Gmail REST endpoint.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Complete, immutable bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Mail backend and its credentials.
    pub backend: BackendConfig,
    /// Resolver settings.
    pub resolver: ResolverSettings,
    /// HTTP listen address.
    pub server: ServerConfig,
    /// Default log level (overridden by `RUST_LOG`).
    pub log_level: String,
}

/// Which mailbox the bridge reads.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// IMAP account with an app password.
    Imap(ImapConfig),
    /// Gmail REST API with a bearer token.
    Gmail(GmailConfig),
}

impl BackendConfig {
    /// Short backend name for logs and `/health`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Imap(_) => "imap",
            BackendConfig::Gmail(_) => "gmail",
        }
    }
}

/// What to do with a message whose recipients cannot be determined
/// while a recipient filter is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnverifiedRecipientPolicy {
    /// Skip the message; a code is never handed to the wrong poller.
    #[default]
    Reject,
    /// Treat the message as matching.
    Accept,
}

impl FromStr for UnverifiedRecipientPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "accept" => Ok(Self::Accept),
            other => Err(Error::InvalidConfig {
                message: format!(
                    "UNVERIFIED_RECIPIENT must be 'reject' or 'accept', got '{other}'"
                ),
            }),
        }
    }
}

/// Longest accepted freshness or lookback window (366 days).
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Substring every passcode subject contains.
    pub subject_keyword: String,
    /// Label the extraction patterns anchor on.
    pub passcode_label: String,
    /// Freshness window: nothing older than `now - last_window` is eligible.
    pub last_window: Duration,
    /// Lookback window used when listing the mailbox.
    pub query_window: Duration,
    /// Maximum number of envelopes inspected per request.
    pub scan_limit: usize,
    /// Upper bound for `/recent?limit=`.
    pub recent_limit_max: usize,
    /// Policy for messages with no recipient information.
    pub unverified_recipient: UnverifiedRecipientPolicy,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            subject_keyword: "パスコード".into(),
            passcode_label: "パスコード".into(),
            last_window: Duration::from_secs(10 * 60),
            query_window: Duration::from_secs(30 * 60),
            scan_limit: 20,
            recent_limit_max: 50,
            unverified_recipient: UnverifiedRecipientPolicy::Reject,
        }
    }
}

impl ResolverSettings {
    /// Checks the window and limit invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when a limit is zero, a window exceeds
    /// [`MAX_WINDOW`], or the lookback window is shorter than the freshness window.
    pub fn validate(&self) -> Result<()> {
        if self.scan_limit == 0 {
            return Err(Error::InvalidConfig {
                message: "SCAN_LIMIT must be greater than 0".into(),
            });
        }
        if self.recent_limit_max == 0 {
            return Err(Error::InvalidConfig {
                message: "RECENT_LIMIT_MAX must be greater than 0".into(),
            });
        }
        if self.last_window > MAX_WINDOW || self.query_window > MAX_WINDOW {
            return Err(Error::InvalidConfig {
                message: format!(
                    "LAST_MINUTES and QUERY_MINUTES must not exceed {}",
                    MAX_WINDOW.as_secs() / 60
                ),
            });
        }
        if self.query_window < self.last_window {
            return Err(Error::InvalidConfig {
                message: format!(
                    "QUERY_MINUTES ({}) must not be smaller than LAST_MINUTES ({})",
                    self.query_window.as_secs() / 60,
                    self.last_window.as_secs() / 60
                ),
            });
        }
        if self.subject_keyword.trim().is_empty() || self.passcode_label.trim().is_empty() {
            return Err(Error::InvalidConfig {
                message: "SUBJECT_KEYWORD and PASSCODE_LABEL must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// HTTP listen address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (0 picks a free port).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
        }
    }
}

impl ServerConfig {
    /// Returns "host:port".
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for connecting to an IMAP server.
///
/// Create using [`ImapConfig::builder()`].
///
/// The password is stored as a [`SecretString`] to prevent accidental logging.
#[derive(Clone)]
pub struct ImapConfig {
    user: EmailAddress,
    password: SecretString,
    /// IMAP server hostname (discovered from the account domain if not set).
    pub imap_host: Option<String>,
    /// IMAP server port (default: 993 for IMAPS).
    pub imap_port: u16,
    /// Mailbox opened read-only for scanning.
    pub mailbox: String,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl std::fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapConfig")
            .field("user", &self.user.as_str())
            .field("password", &"[REDACTED]")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("mailbox", &self.mailbox)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl ImapConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ImapConfigBuilder {
        ImapConfigBuilder::default()
    }

    /// Returns the login name.
    #[must_use]
    pub fn user(&self) -> &str {
        self.user.as_str()
    }

    /// Returns the password. Only for handing to LOGIN.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the effective IMAP host, explicit or derived from the account domain.
    #[must_use]
    pub fn effective_imap_host(&self) -> String {
        match &self.imap_host {
            Some(host) => host.clone(),
            None => discover_imap_host(self.user.as_str()),
        }
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.effective_imap_host(), self.imap_port)
    }
}

/// Derives an IMAP host from an address's domain.
///
/// ```
/// use passcode_bridge::config::discover_imap_host;
///
/// assert_eq!(discover_imap_host("me@icloud.com"), "imap.mail.me.com");
/// assert_eq!(discover_imap_host("me@example.org"), "imap.example.org");
/// ```
#[must_use]
pub fn discover_imap_host(email: &str) -> String {
    let domain = email
        .rsplit_once('@')
        .map_or(email, |(_, d)| d)
        .to_lowercase();
    let known = match domain.as_str() {
        "icloud.com" | "me.com" | "mac.com" => Some("imap.mail.me.com"),
        "gmail.com" | "googlemail.com" => Some("imap.gmail.com"),
        "outlook.com" | "hotmail.com" | "live.com" => Some("outlook.office365.com"),
        "yahoo.com" | "yahoo.co.jp" => Some("imap.mail.yahoo.com"),
        _ => None,
    };
    known.map_or_else(|| format!("imap.{domain}"), str::to_string)
}

/// Timeout configuration for IMAP operations.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for opening a mailbox.
    pub select: Duration,
    /// Timeout for UID searches.
    pub search: Duration,
    /// Timeout for fetching headers or bodies.
    pub message_fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            search: Duration::from_secs(10),
            message_fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Builder for [`ImapConfig`].
#[derive(Debug, Default)]
pub struct ImapConfigBuilder {
    user: Option<String>,
    password: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    mailbox: Option<String>,
    timeouts: Option<TimeoutConfig>,
}

impl ImapConfigBuilder {
    /// Sets the login address (required).
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets the app-specific password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the IMAP server hostname explicitly.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Sets the mailbox to scan (default `INBOX`).
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = Some(mailbox.into());
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] if the user or password is missing,
    /// or [`Error::InvalidEmailFormat`] if the user is not an email address.
    pub fn build(self) -> Result<ImapConfig> {
        let user_raw = self
            .user
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::MissingCredentials {
                backend: "imap",
                message: "IMAP_USER is not set".into(),
            })?;

        let options = email_address::Options::default();
        let user = EmailAddress::parse_with_options(user_raw.trim(), options)
            .map_err(|_| Error::InvalidEmailFormat {
                email: user_raw.clone(),
            })?;

        let password_raw = self
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::MissingCredentials {
                backend: "imap",
                message: "IMAP_PASSWORD is not set".into(),
            })?;

        Ok(ImapConfig {
            user,
            password: SecretString::from(password_raw),
            imap_host: self.imap_host,
            imap_port: self.imap_port.unwrap_or(993),
            mailbox: self.mailbox.unwrap_or_else(|| "INBOX".into()),
            timeouts: self.timeouts.unwrap_or_default(),
        })
    }
}

/// Gmail REST API access.
#[derive(Clone)]
pub struct GmailConfig {
    /// Gmail user id (`me` for the token's owner).
    pub user_id: String,
    token: SecretString,
    /// API base URL.
    pub api_base: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for GmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailConfig")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl GmailConfig {
    /// Creates a config for the token owner (`me`) against the public API.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            user_id: "me".into(),
            token: SecretString::from(token.into()),
            api_base: GMAIL_API_BASE.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Returns the bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

#[derive(Deserialize)]
struct TokenFile {
    access_token: String,
}

fn read_token_file(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::MissingCredentials {
        backend: "gmail",
        message: format!("cannot read token file {}: {e}", path.display()),
    })?;
    let parsed: TokenFile = serde_json::from_str(&raw).map_err(|e| Error::MissingCredentials {
        backend: "gmail",
        message: format!("token file {} has no access_token: {e}", path.display()),
    })?;
    Ok(parsed.access_token)
}

impl BridgeConfig {
    /// Loads `.env` (if present) and reads the process environment.
    ///
    /// # Errors
    ///
    /// See [`BridgeConfig::from_lookup`].
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from a key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingCredentials`] when the selected backend has no
    /// credentials, and [`Error::InvalidConfig`] for malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("MAIL_BACKEND")
            .unwrap_or_else(|| "imap".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "imap" | "icloud" => BackendConfig::Imap(imap_from_lookup(&get)?),
            "gmail" => BackendConfig::Gmail(gmail_from_lookup(&get)?),
            other => {
                return Err(Error::InvalidConfig {
                    message: format!("MAIL_BACKEND must be 'imap' or 'gmail', got '{other}'"),
                })
            }
        };

        let defaults = ResolverSettings::default();
        let resolver = ResolverSettings {
            subject_keyword: get("SUBJECT_KEYWORD").unwrap_or(defaults.subject_keyword),
            passcode_label: get("PASSCODE_LABEL").unwrap_or(defaults.passcode_label),
            last_window: minutes(&get, "LAST_MINUTES")?.unwrap_or(defaults.last_window),
            query_window: minutes(&get, "QUERY_MINUTES")?.unwrap_or(defaults.query_window),
            scan_limit: parsed(&get, "SCAN_LIMIT")?.unwrap_or(defaults.scan_limit),
            recent_limit_max: parsed(&get, "RECENT_LIMIT_MAX")?
                .unwrap_or(defaults.recent_limit_max),
            unverified_recipient: get("UNVERIFIED_RECIPIENT")
                .map(|v| v.parse::<UnverifiedRecipientPolicy>())
                .transpose()?
                .unwrap_or_default(),
        };
        resolver.validate()?;

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: get("BRIDGE_HOST").unwrap_or(server_defaults.host),
            port: parsed(&get, "BRIDGE_PORT")?.unwrap_or(server_defaults.port),
        };

        Ok(Self {
            backend,
            resolver,
            server,
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".into()),
        })
    }
}

fn imap_from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<ImapConfig> {
    let mut builder = ImapConfig::builder();
    if let Some(user) = get("IMAP_USER") {
        builder = builder.user(user);
    }
    if let Some(password) = get("IMAP_PASSWORD") {
        builder = builder.password(password);
    }
    if let Some(host) = get("IMAP_HOST") {
        builder = builder.imap_host(host);
    }
    if let Some(port) = parsed(get, "IMAP_PORT")? {
        builder = builder.imap_port(port);
    }
    if let Some(mailbox) = get("IMAP_MAILBOX") {
        builder = builder.mailbox(mailbox);
    }
    builder.build()
}

fn gmail_from_lookup(get: &impl Fn(&str) -> Option<String>) -> Result<GmailConfig> {
    let token = match (get("GMAIL_ACCESS_TOKEN"), get("GMAIL_TOKEN_FILE")) {
        (Some(token), _) => token,
        (None, Some(path)) => read_token_file(Path::new(&path))?,
        (None, None) => {
            return Err(Error::MissingCredentials {
                backend: "gmail",
                message: "set GMAIL_ACCESS_TOKEN or GMAIL_TOKEN_FILE".into(),
            })
        }
    };

    let mut config = GmailConfig::new(token);
    if let Some(user_id) = get("GMAIL_USER") {
        config.user_id = user_id;
    }
    if let Some(base) = get("GMAIL_API_BASE") {
        config.api_base = base.trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| Error::InvalidConfig {
                message: format!("{key} has an invalid value: '{raw}'"),
            })
        })
        .transpose()
}

fn minutes(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    parsed::<u64>(get, key)?
        .map(|m| {
            m.checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| Error::InvalidConfig {
                    message: format!("{key} is too large: {m}"),
                })
        })
        .transpose()
}

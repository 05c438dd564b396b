//! # passcode-bridge
//!
//! Local HTTP bridge that finds one-time passcodes in a mailbox.
//!
//! A caller that has just triggered a passcode email polls
//! `GET /code?to=<email>&after=<epoch-ms>`. Each request opens a fresh,
//! read-only mailbox session (IMAP or the Gmail REST API), scans recent
//! messages newest first and returns the first 6-digit code from a message
//! that is fresh enough, carries the subject keyword and was sent to the
//! requested recipient. "Not found yet" is a normal answer, not an error.
//!
//! ## Quick Start
//!
//! ```no_run
//! use passcode_bridge::config::{BackendConfig, ResolverSettings};
//! use passcode_bridge::mailbox::backend_from_config;
//! use passcode_bridge::resolver::{CodeRequest, Resolver};
//! use passcode_bridge::ImapConfig;
//!
//! # async fn example() -> passcode_bridge::Result<()> {
//! let config = ImapConfig::builder()
//!     .user("me@icloud.com")
//!     .password("app-specific-password")
//!     .build()?;
//!
//! let backend = backend_from_config(BackendConfig::Imap(config))?;
//! let resolver = Resolver::new(backend, ResolverSettings::default())?;
//!
//! let request = CodeRequest::new(Some("alias@icloud.com".into()), None);
//! match resolver.resolve(&request).await?.code() {
//!     Some(code) => println!("Got passcode: {code}"),
//!     None => println!("Nothing yet, poll again"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Extraction
//!
//! ```
//! use passcode_bridge::matcher::PasscodeExtractor;
//!
//! let extractor = PasscodeExtractor::new("パスコード").unwrap();
//! let (code, tier) = extractor.extract("【パスコード】482913").unwrap();
//! assert_eq!(code, "482913");
//! assert_eq!(tier, "bracketed label");
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. The bridge never
//! retries; [`Error::is_retryable`] tells a polling caller whether retrying makes sense:
//!
//! ```
//! use passcode_bridge::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, poll again: {}", error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation; credentials are never recorded.
//!
//! ### Span Naming Convention
//!
//! - `Resolver::resolve` - One `/code` resolution
//! - `Resolver::recent` - One `/recent` listing
//! - `ImapBackend::open` - IMAP connect, login and EXAMINE
//! - `ImapMailSession::list` / `GmailSession::list` - Envelope listing
//! - `BridgeClient::wait_for_code` - Client-side polling
//! - `session::authenticate` - IMAP authentication
//! - `connection::establish_tls` - TLS connection

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod error;
pub mod gmail;
pub mod imap;
pub mod logging;
pub mod mailbox;
pub mod matcher;
pub mod message;
pub mod poller;
pub mod recipients;
pub mod resolver;
pub mod web;

// Internal modules
mod connection;
mod parser;
mod session;

// Re-exports for ergonomic API
pub use config::{
    BackendConfig, BridgeConfig, GmailConfig, ImapConfig, ImapConfigBuilder, ResolverSettings,
    ServerConfig, TimeoutConfig, UnverifiedRecipientPolicy,
};
pub use email_address::EmailAddress;
pub use error::{Error, ErrorCategory, Result};
pub use mailbox::{MailBackend, MailSession};
pub use poller::{BridgeClient, PollingConfig};
pub use resolver::{CodeRequest, Resolution, Resolver};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        // Ensure all public types are accessible
        let _ = ImapConfig::builder();
        let _ = ResolverSettings::default();
        let _ = PollingConfig::default();
        let _ = matcher::PasscodeExtractor::new("パスコード").unwrap();
    }
}

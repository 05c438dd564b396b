//! HTTP surface of the bridge.
//!
//! Three read-only `GET` endpoints backed by a shared [`Resolver`](crate::resolver::Resolver):
//!
//! - `/health` reports the active backend and scan windows.
//! - `/recent?limit=N` lists recent passcode messages.
//! - `/code?to=<email>&after=<epoch-ms>` resolves the newest passcode.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use handlers::{AppState, CodeResponse, HealthResponse, RecentMessage};
pub use router::create_router;
pub use server::WebServer;

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use passcode_bridge::config::BridgeConfig;
use passcode_bridge::mailbox::backend_from_config;
use passcode_bridge::resolver::Resolver;
use passcode_bridge::web::WebServer;

#[tokio::main]
async fn main() -> ExitCode {
    // Missing credentials must stop the bridge before it accepts requests
    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            passcode_bridge::logging::init("info");
            error!(error = %e, category = %e.category(), "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    passcode_bridge::logging::init(&config.log_level);

    info!(
        backend = config.backend.name(),
        subject_keyword = %config.resolver.subject_keyword,
        last_minutes = config.resolver.last_window.as_secs() / 60,
        query_minutes = config.resolver.query_window.as_secs() / 60,
        "Passcode bridge starting"
    );

    let resolver = match backend_from_config(config.backend)
        .and_then(|backend| Resolver::new(backend, config.resolver))
    {
        Ok(resolver) => Arc::new(resolver),
        Err(e) => {
            error!(error = %e, "Failed to initialize resolver");
            return ExitCode::FAILURE;
        }
    };

    let server = WebServer::new(&config.server, resolver);
    if let Err(e) = server.run().await {
        error!(error = %e, addr = %config.server.address(), "Web server failed");
        return ExitCode::FAILURE;
    }

    info!("Passcode bridge stopped");
    ExitCode::SUCCESS
}

//! CLI entry point: a single process listening on a
//! configurable framed-transport endpoint, exit code 0 on clean shutdown,
//! nonzero on bind failure.

use session_hub::server::{self, HubConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = HubConfig::from_env();
    if let Err(e) = server::run(config).await {
        tracing::error!(error = %e, "session hub exited with error");
        std::process::exit(1);
    }
}

//! diagram-ledger server.
//!
//! Reads `PORT`, `DATA_DIR` and `MAX_VERSIONS_PER_DIAGRAM` from the
//! environment, opens the SQLite store and serves the HTTP API.

use std::process::ExitCode;

use diagram_ledger::{http, DiagramStore, ServerConfig};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServerConfig::from_env();
    let db_path = config.db_path();

    let store = match DiagramStore::open(&db_path, config.max_versions) {
        Ok(store) => store,
        Err(e) => {
            error!(path = %db_path.display(), error = %e, "failed to open store");
            return ExitCode::FAILURE;
        }
    };
    info!(
        path = %db_path.display(),
        max_versions = config.max_versions,
        "store ready"
    );

    match http::serve(store, &config.bind_addr()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(addr = %config.bind_addr(), error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}

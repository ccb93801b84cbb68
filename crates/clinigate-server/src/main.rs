use std::path::PathBuf;

use clinigate_server::config::loader;
use clinigate_server::{ClinigateServer, latency, observability};

fn config_path() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    std::env::var("CLINIGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("clinigate.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    observability::init_tracing();

    let config = loader::load(Some(&config_path()))?;
    observability::apply_logging_level(&config.logging.level);
    latency::init_metrics();

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        feed_enabled = config.feed.enabled,
        "starting clinigate gateway"
    );

    ClinigateServer::from_config(config)?.run().await
}

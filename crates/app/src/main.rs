//! Lobby - room lifecycle service
//!
//! Loads configuration, opens the room database, re-arms grace periods lost
//! by the previous process and serves the gateway until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;

use lobby_core::{Database, LobbyConfig, RoomLifecycleCoordinator};
use lobby_net::Gateway;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Config file used when none is given
const DEFAULT_CONFIG_FILE: &str = "lobby.toml";

/// Config path from the first CLI argument, then `LOBBY_CONFIG`
fn resolve_config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();
}

async fn run(config: LobbyConfig) -> lobby_net::Result<()> {
    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Database opened");

    let coordinator = RoomLifecycleCoordinator::new(db, config.lifecycle.clone());
    coordinator.recover_orphaned_rooms().await?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind_addr, config.server.port)
        .parse()
        .map_err(|e| lobby_core::Error::Config(format!("invalid server address: {e}")))?;
    let gateway = Gateway::start(addr, coordinator.clone()).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    gateway.shutdown();
    coordinator.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() {
    let config_path = resolve_config_path(
        std::env::args().nth(1),
        std::env::var("LOBBY_CONFIG").ok(),
    );

    let config = match LobbyConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_filter);
    tracing::info!(config = %config_path.display(), "Starting Lobby");

    if let Err(e) = run(config).await {
        tracing::error!("Lobby stopped with error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_precedence() {
        assert_eq!(
            resolve_config_path(Some("a.toml".into()), Some("b.toml".into())),
            PathBuf::from("a.toml")
        );
        assert_eq!(
            resolve_config_path(None, Some("b.toml".into())),
            PathBuf::from("b.toml")
        );
        assert_eq!(
            resolve_config_path(None, None),
            PathBuf::from(DEFAULT_CONFIG_FILE)
        );
    }
}

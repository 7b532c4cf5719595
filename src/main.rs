//! Duel Lobby Server
//!
//! Matchmaking lobby serving authenticated WebSocket channels.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use duel_lobby::{
    AuthConfig, GateConfig, LobbyServer, Matchmaker, ServerConfig, TokenCodec, VERSION,
};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Duel Lobby Server v{}", VERSION);

    let auth_config = AuthConfig::from_env().context("loading auth configuration")?;
    let gate_config = GateConfig::from_env().context("loading gate configuration")?;
    let server_config = ServerConfig::from_env().context("loading server configuration")?;
    info!(
        "Credentials: issuer {}, lifetime {}s, clock skew {}s",
        auth_config.issuer,
        auth_config.expiration.num_seconds(),
        auth_config.clock_skew.num_seconds()
    );

    let codec = TokenCodec::new(auth_config).context("building token codec")?;
    let lobby = Matchmaker::new(codec, gate_config);
    let server = LobbyServer::new(server_config, lobby);

    tokio::select! {
        result = server.run() => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}

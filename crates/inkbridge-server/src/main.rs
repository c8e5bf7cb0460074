//! InkBridge relay server binary.

use std::sync::Arc;

use inkbridge_server::{AppState, ServerConfig, router};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
enum ServerError {
    #[error(transparent)]
    Config(#[from] inkbridge_server::ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let config = ServerConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .init();

    let state = Arc::new(AppState::new(&config));
    let app = router(state);

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("InkBridge relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", listener.local_addr()?);
    if config.token.is_some() {
        info!("Room joins require a token");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

#![cfg_attr(test, allow(clippy::disallowed_methods))]
// Forbid unwrap() in production code so a bad key set or config cannot panic.
// Test code is allowed to use unwrap() for convenience.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::net::SocketAddr;
use std::sync::Arc;

use admission_gate::auth::TokenGate;
use admission_gate::config::ServerConfig;
use admission_gate::keys::{HttpKeySource, KeyStore};
use admission_gate::middleware::GateState;
use admission_gate::server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admission_gate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        issuer = config.policy.issuer(),
        audience = config.policy.audience(),
        jwks_url = %config.jwks_url,
        algorithms = ?config.policy.allowed_algorithms(),
        listen_port = config.listen_port,
        "loaded configuration"
    );

    let source = match HttpKeySource::new(config.jwks_url.clone(), config.refresh.fetch_timeout) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!("Failed to build JWKS client: {e}");
            std::process::exit(1);
        }
    };
    let keys = KeyStore::new(Arc::new(source), config.refresh);

    // Until a refresh succeeds every token is rejected with KeySetUnavailable.
    if let Err(e) = keys.refresh_now().await {
        tracing::warn!("Initial key set load failed: {e}");
    }

    let gate = TokenGate::new(keys, config.policy.clone())
        .with_unknown_key_wait(config.unknown_key_wait);
    let app = server::router(GateState::new(gate, config.access_policy()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app).await.unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}

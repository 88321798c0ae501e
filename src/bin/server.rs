//! Process entry point: load configuration, build `AppState`, bind
//! the HTTP listener, and serve until shutdown.

use std::process::ExitCode;
use std::sync::Arc;

use agentrun::config::Config;
use agentrun::http::{build_router, AppState};
use agentrun::Error;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

    let config = match Config::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "configuration error");
            return ExitCode::from(1);
        }
    };

    info!(version = agentrun::VERSION, "starting agentrun server");

    let state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(err @ Error::Database(_)) => {
            error!(error = %err, "database unreachable");
            return ExitCode::from(2);
        }
        Err(err) => {
            error!(error = %err, "failed to initialize application state");
            return ExitCode::from(1);
        }
    };

    let app = build_router(state);

    let addr = std::net::SocketAddr::from((
            config.server.host.parse::<std::net::IpAddr>().unwrap_or([0, 0, 0, 0].into()),
            config.server.port,
    ));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind listener");
            return ExitCode::from(1);
        }
    };

    info!(%addr, "listening");

    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "server exited with error");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

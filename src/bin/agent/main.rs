use std::sync::Arc;

use anyhow::{Context, Result};
use browser_rpa::brain::{Brain, BrainConfig};
use browser_rpa::config::Settings;
use browser_rpa::face::{self, AppState};
use browser_rpa::hands::{ChromeLauncher, SessionMode};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let settings = Settings::parse();
    let session_config = settings.session_config();
    if session_config.mode == SessionMode::Persistent {
        warn!("Persistent sessions: every run leaves a browser open; close them manually");
    }

    let brain = Brain::new(BrainConfig {
        api_key: settings.api_key.clone(),
        model: settings.model.clone(),
        endpoint: settings.llm_url.clone(),
    });

    let state = AppState::new(
        Arc::new(brain),
        Arc::new(ChromeLauncher),
        settings.runner_config(),
        session_config,
    );
    let app = face::router(state);

    let listener = tokio::net::TcpListener::bind(settings.bind)
        .await
        .with_context(|| format!("could not bind {}", settings.bind))?;
    info!(addr = %settings.bind, "Automation service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}

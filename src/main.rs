use anyhow::Result;
use std::sync::Arc;

use vizier::{config::Config, logging, routes, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging()?;

    let config = Config::from_env()?;
    let addr = config.bind_addr;
    tracing::info!(
        "model {} (compact prompts: {}), file ceiling {} bytes",
        config.model,
        config.compact_prompts,
        config.max_file_size
    );

    let state = Arc::new(AppState::from_config(config));
    let app = routes::app(state);

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

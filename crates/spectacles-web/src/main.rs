use anyhow::{Context, Result};
use spectacles_model::artifacts::ArtifactPaths;
use spectacles_model::Recommender;
use spectacles_vision::FaceAnalyzer;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod routes;
#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("spectacles-web starting");

    let config = config::Config::from_env();
    tracing::info!(?config, "configuration loaded");

    let recommender = Recommender::load(&ArtifactPaths::new(&config.data_dir), &config.model_path)
        .context("failed to load recommender artifacts")?;
    let analyzer = FaceAnalyzer::load(&config.onnx_dir)
        .with_context(|| format!("failed to load face models from {}", config.onnx_dir.display()))?;

    let engine = engine::spawn_engine(analyzer, recommender)?;
    tracing::info!(
        frames = engine.status().frames,
        trees = engine.status().trees,
        "engine ready"
    );

    let app = routes::router(engine, config.top_k);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %config.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("spectacles-web shutting down");
        })
        .await?;

    Ok(())
}

use cfo_command_pipeline::{
    api::start_server, config::PipelineConfig, pipeline::CommandPipeline, store::Stores,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let config = PipelineConfig::from_env();

    info!("CFO Command Pipeline - API Server");
    info!("Port: {}", api_port);

    let stores = match &config.data_dir {
        Some(dir) => {
            info!("Durable stores under {}", dir.display());
            Stores::open(dir)?
        }
        None => {
            info!("DATA_DIR not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    let pipeline = Arc::new(CommandPipeline::with_stores(&stores, config).await);

    info!("Pipeline initialized");
    info!("Starting API server...");

    start_server(pipeline, api_port).await?;

    Ok(())
}

//! Chest X-ray Classification Service
//!
//! Pneumonia / normal classification with OpenVINO inference.
//! Supports both REST (Axum) and gRPC (Tonic) APIs.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tonic::transport::Server as TonicServer;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use xrayserve::api::grpc::GrpcHandler;
use xrayserve::api::rest::{create_rest_router, AppState};
use xrayserve::config::Config;
use xrayserve::engine::preprocess::input_shape;
use xrayserve::engine::{fetcher_for, model::warmup, InferenceBackend, ModelFetcher, OpenVinoModel};
use xrayserve::service::XrayService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    info!("Starting X-ray Classification Service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = Config::default_path();
    let (mut config, from_file) = Config::load_or_default(&config_path)?;
    if !from_file {
        info!("No config file at {}, using defaults", config_path);
    }
    config.apply_env_overrides()?;

    info!("Configuration loaded:");
    info!("  REST port: {}", config.server.rest_port);
    info!("  gRPC port: {}", config.server.grpc_port);
    info!("  Device: {}", config.inference.device);
    info!("  Input: {0}x{0} ({1:?})", config.inference.input_size, config.inference.input_layout);
    info!("  Threshold: {}", config.inference.threshold);

    // Resolve model artifact
    let fetcher = fetcher_for(&config.model);
    info!("Model source: {}", fetcher.describe());
    let artifact = fetcher.fetch().await?;

    // Load model once, off the async runtime
    let device = config.inference.device.clone();
    let model = tokio::task::spawn_blocking(move || OpenVinoModel::load(&artifact, &device))
        .await
        .context("Model loading task panicked")??;
    info!("Model {} ready on {} ({:?})", model.name(), model.device(), model.load_time());
    let model = Arc::new(model);

    if config.inference.warmup {
        let shape = input_shape(config.inference.input_size, config.inference.input_layout);
        let warm = model.clone();
        tokio::task::spawn_blocking(move || warmup(warm.as_ref(), shape))
            .await
            .context("Warm-up task panicked")??;
    }

    // Create service
    let service = Arc::new(XrayService::new(model, &config));

    // Start REST server
    let app_state = Arc::new(AppState {
        service: service.clone(),
        start_time: Instant::now(),
    });
    let rest_router = create_rest_router(app_state, &config.server);

    let rest_addr = format!("{}:{}", config.server.host, config.server.rest_port);
    let listener = TcpListener::bind(&rest_addr)
        .await
        .with_context(|| format!("Failed to bind REST listener on {}", rest_addr))?;
    info!("REST API listening on http://{}", rest_addr);

    let _rest_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, rest_router).await {
            error!("REST server stopped: {}", e);
        }
    });

    // Start gRPC server
    let grpc_addr = config.server.resolve(config.server.grpc_port).await?;
    let grpc_handler = GrpcHandler::new(service.clone());

    let _grpc_handle = tokio::spawn(async move {
        info!("gRPC API listening on {}", grpc_addr);

        if let Err(e) = TonicServer::builder()
            .add_service(grpc_handler.into_server())
            .serve(grpc_addr)
            .await
        {
            error!("gRPC server stopped: {}", e);
        }
    });

    info!("X-ray Classification Service is ready!");
    info!("REST: http://localhost:{}/", config.server.rest_port);
    info!("gRPC: localhost:{}", config.server.grpc_port);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let stats = service.stats();
    info!(
        "Served {} predictions ({} pneumonia, {} normal, {} failed)",
        stats.total_predictions, stats.pneumonia, stats.normal, stats.failures
    );

    info!("Goodbye!");
    Ok(())
}

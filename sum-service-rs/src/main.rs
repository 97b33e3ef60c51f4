// sum-service-rs/src/main.rs
// Main entry point for sum-service-rs
// One arithmetic endpoint plus the payload repair path wrapped around it

use std::sync::Arc;

use dotenv::dotenv;

use sum_service::llm_client::LlmClient;
use sum_service::{create_router, AppState, START_TIME};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let _ = *START_TIME;

    // Use standardized configuration for ports and addresses
    let port = config_rs::get_service_port("SUM", 8080);
    let addr = config_rs::get_bind_address("SUM", port);

    log::info!("Using sum service port: {}", port);

    // The completion backend is built once at startup and shared read-only
    // across requests
    let backend = Arc::new(LlmClient::from_env());
    let state = Arc::new(AppState::new(backend));

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Sum service starting on {}", addr);
    println!("Sum service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

//! HCQA API Server
//!
//! Streams documents into the index and answers questions over HTTP.
//!
//! Author: hephaex@gmail.com

use hcqa_core::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load(None)?;

    // Initialize tracing
    hcqa_api::init_tracing(&config.logging);

    hcqa_api::serve(config).await
}

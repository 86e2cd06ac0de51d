use tracing::{error, info};

use tokenpipe::config::Settings;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let settings = Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .init();

    info!("Starting tokenpipe");

    tokenpipe::app::serve(settings).await.map_err(|e| {
        error!("Server error: {}", e);
        e
    })?;

    Ok(())
}

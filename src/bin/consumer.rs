use amqp_stream_pipeline::{
    Config, LogFormat, ctrl_c, init_logging, run_consumer_until, shared_health_state,
};
use anyhow::{Context, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    init_logging(LogFormat::from_env());

    let config = Config::from_env().context("Failed to load configuration")?;

    run_consumer_until(config, shared_health_state(), ctrl_c()).await
}

//! DeliveryFlow - moving average of translation delivery times
//!
//! Tails a JSONL event file and writes the average `duration` of the events
//! inside a trailing window, once every `--frequency` seconds.
//!
//! Usage:
//!   cargo run --release --bin deliveryflow -- --input_file events.json --window_size 10 --frequency 60
//!
//! Every flag has an environment fallback (DELIVERYFLOW_INPUT_FILE,
//! DELIVERYFLOW_OUTPUT_FILE, DELIVERYFLOW_WINDOW_SIZE, DELIVERYFLOW_FREQUENCY, ...),
//! also read from `.env`. RUST_LOG sets the log level (default: info).

use anyhow::Context;
use clap::Parser;
use deliveryflow::pipeline::{Pipeline, PipelineArgs, PipelineConfig};
use dotenv::dotenv;
use log::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Logs go to stderr, stdout may carry the averages
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = PipelineConfig::from_args(PipelineArgs::parse());

    info!("🚀 Starting DeliveryFlow");
    info!("   ├─ Input: {}", config.input_path.display());
    info!(
        "   ├─ Output: {}",
        config
            .output_path
            .as_ref()
            .map_or_else(|| "stdout".to_string(), |p| p.display().to_string())
    );
    info!("   ├─ Window: {}s", config.window_secs);
    info!("   ├─ Frequency: {}s", config.frequency_secs);
    info!("   ├─ Hand-off buffer: {} events", config.channel_buffer);
    info!(
        "   └─ Policies: missing timestamp {:?}, missing duration {:?}, empty cycle {:?}",
        config.missing_timestamp, config.missing_duration, config.empty_cycle
    );

    let handle = Pipeline::start(config)
        .await
        .context("failed to start pipeline")?;

    info!("🔄 Press CTRL+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    handle.stop();
    let stats = handle.join().await.context("pipeline did not stop cleanly")?;

    info!("✅ DeliveryFlow stopped ({} cycles)", stats.averager.cycles);
    Ok(())
}

//! Pipeline configuration from command-line flags and environment variables

use crate::aggregator_core::{
    AveragerSettings, EmptyCycle, ForwarderSettings, MissingDuration, MissingTimestamp,
};
use chrono::TimeDelta;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WINDOW_SECS: u64 = 1;
pub const DEFAULT_FREQUENCY_SECS: u64 = 60;
/// Upper bound for window and frequency (one year)
pub const MAX_PERIOD_SECS: u64 = 365 * 24 * 60 * 60;

/// Command-line surface. Every flag can also come from the environment
/// (or a `.env` file).
#[derive(Debug, Clone, Parser)]
#[command(
    name = "deliveryflow",
    about = "Reads events from a file stream and writes aggregated statistics to a file"
)]
pub struct PipelineArgs {
    /// Path to the input file
    #[arg(long = "input_file", visible_alias = "input-file", env = "DELIVERYFLOW_INPUT_FILE")]
    pub input_file: PathBuf,

    /// Path to the output file, stdout when not given
    #[arg(long = "output_file", visible_alias = "output-file", env = "DELIVERYFLOW_OUTPUT_FILE")]
    pub output_file: Option<PathBuf>,

    /// Moving average window in seconds; values below 1 fall back to the default
    #[arg(
        long = "window_size",
        visible_alias = "window-size",
        env = "DELIVERYFLOW_WINDOW_SIZE",
        default_value_t = DEFAULT_WINDOW_SECS as i64,
        allow_negative_numbers = true
    )]
    pub window_size: i64,

    /// Seconds between two averages; values below 1 fall back to the default
    #[arg(
        long,
        env = "DELIVERYFLOW_FREQUENCY",
        default_value_t = DEFAULT_FREQUENCY_SECS as i64,
        allow_negative_numbers = true
    )]
    pub frequency: i64,

    /// Capacity of the queue between forwarder and averager
    #[arg(long, env = "DELIVERYFLOW_CHANNEL_BUFFER", default_value_t = 10_000)]
    pub channel_buffer: usize,

    /// Capacity of the queue between averager and writer
    #[arg(long, env = "DELIVERYFLOW_OUTPUT_BUFFER", default_value_t = 1_024)]
    pub output_buffer: usize,

    #[arg(long, env = "DELIVERYFLOW_ENQUEUE_TIMEOUT_SECS", default_value_t = 30)]
    pub enqueue_timeout_secs: u64,

    #[arg(long, env = "DELIVERYFLOW_DEQUEUE_TIMEOUT_MS", default_value_t = 100)]
    pub dequeue_timeout_ms: u64,

    /// Idle delay of the tail reader once it reaches the end of the input
    #[arg(long, env = "DELIVERYFLOW_POLL_INTERVAL_MS", default_value_t = 10)]
    pub poll_interval_ms: u64,

    #[arg(long, value_enum, env = "DELIVERYFLOW_MISSING_TIMESTAMP", default_value_t = MissingTimestamp::Drop)]
    pub missing_timestamp: MissingTimestamp,

    #[arg(long, value_enum, env = "DELIVERYFLOW_MISSING_DURATION", default_value_t = MissingDuration::Exclude)]
    pub missing_duration: MissingDuration,

    #[arg(long, value_enum, env = "DELIVERYFLOW_EMPTY_CYCLE", default_value_t = EmptyCycle::EmitNull)]
    pub empty_cycle: EmptyCycle,

    /// Append to the output file instead of truncating it
    #[arg(long, env = "DELIVERYFLOW_APPEND")]
    pub append: bool,

    /// Keep reading the original handle when the input is rotated or truncated
    #[arg(long, env = "DELIVERYFLOW_NO_FOLLOW_ROTATION")]
    pub no_follow_rotation: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for pipeline runtime
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_path: PathBuf,

    /// `None` writes to stdout
    pub output_path: Option<PathBuf>,

    pub window_secs: u64,
    pub frequency_secs: u64,

    pub channel_buffer: usize,
    pub output_buffer: usize,

    pub enqueue_timeout: Duration,
    pub dequeue_timeout: Duration,
    pub poll_interval: Duration,

    pub missing_timestamp: MissingTimestamp,
    pub missing_duration: MissingDuration,
    pub empty_cycle: EmptyCycle,

    pub append_output: bool,
    pub follow_rotation: bool,
}

impl PipelineConfig {
    /// Defaults for everything but the input
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: None,
            window_secs: DEFAULT_WINDOW_SECS,
            frequency_secs: DEFAULT_FREQUENCY_SECS,
            channel_buffer: 10_000,
            output_buffer: 1_024,
            enqueue_timeout: Duration::from_secs(30),
            dequeue_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
            missing_timestamp: MissingTimestamp::default(),
            missing_duration: MissingDuration::default(),
            empty_cycle: EmptyCycle::default(),
            append_output: false,
            follow_rotation: true,
        }
    }

    pub fn from_args(args: PipelineArgs) -> Self {
        Self {
            input_path: args.input_file,
            output_path: args.output_file,
            window_secs: positive_or_default("window_size", args.window_size, DEFAULT_WINDOW_SECS),
            frequency_secs: positive_or_default("frequency", args.frequency, DEFAULT_FREQUENCY_SECS),
            channel_buffer: args.channel_buffer,
            output_buffer: args.output_buffer,
            enqueue_timeout: Duration::from_secs(args.enqueue_timeout_secs),
            dequeue_timeout: Duration::from_millis(args.dequeue_timeout_ms),
            poll_interval: Duration::from_millis(args.poll_interval_ms),
            missing_timestamp: args.missing_timestamp,
            missing_duration: args.missing_duration,
            empty_cycle: args.empty_cycle,
            append_output: args.append,
            follow_rotation: !args.no_follow_rotation,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_secs == 0 || self.frequency_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "window and frequency must be at least 1 second".to_string(),
            ));
        }
        if self.window_secs > MAX_PERIOD_SECS || self.frequency_secs > MAX_PERIOD_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "window and frequency must be at most {} seconds",
                MAX_PERIOD_SECS
            )));
        }
        if self.channel_buffer == 0 || self.output_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "queue capacities must be at least 1".to_string(),
            ));
        }
        if self.enqueue_timeout.is_zero() || self.dequeue_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "queue timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Window as a time delta, clamped to [`MAX_PERIOD_SECS`]
    pub fn window(&self) -> TimeDelta {
        period(self.window_secs)
    }

    /// Frequency as a time delta, clamped to [`MAX_PERIOD_SECS`]
    pub fn frequency(&self) -> TimeDelta {
        period(self.frequency_secs)
    }

    pub fn forwarder_settings(&self) -> ForwarderSettings {
        ForwarderSettings {
            window: self.window(),
            enqueue_timeout: self.enqueue_timeout,
            missing_timestamp: self.missing_timestamp,
        }
    }

    pub fn averager_settings(&self) -> AveragerSettings {
        AveragerSettings {
            frequency: self.frequency(),
            window: self.window(),
            missing_duration: self.missing_duration,
            empty_cycle: self.empty_cycle,
            // Emission waits at most one window
            emit_timeout: Duration::from_secs(self.window_secs.min(MAX_PERIOD_SECS)),
        }
    }
}

fn period(secs: u64) -> TimeDelta {
    TimeDelta::seconds(secs.min(MAX_PERIOD_SECS) as i64)
}

fn positive_or_default(name: &str, value: i64, default: u64) -> u64 {
    if value > 0 {
        value as u64
    } else {
        log::warn!("Invalid {} '{}', defaulting to {}", name, value, default);
        default
    }
}

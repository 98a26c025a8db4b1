//! Aggregator Core - Trailing-Window Average Engine
//!
//! This module provides the four stages that turn a growing event file into a
//! periodic stream of average delivery times.
//!
//! # Architecture
//!
//! ```text
//! JSONL file → TailReader (lazy, infinite; driven by run_tailer)
//!     ↓
//! run_forwarder (drops stale events, timed enqueue)
//!     ↓
//! run_averager (snapshot drain → TrailingWindow → AverageRecord)
//!     ↓
//! run_writer → OutputWriter (JSONL file or stdout)
//! ```

pub mod averager;
pub mod event;
pub mod forwarder;
pub mod jsonl_writer;
pub mod reader;
pub mod schedule;
pub mod window;
pub mod writer;
pub mod writer_backend;

pub use averager::{run_averager, AveragerSettings, AveragerStats, EmptyCycle};
pub use event::{local_now, DeliveryEvent, EventParseError, TIMESTAMP_FORMAT};
pub use forwarder::{
    route, run_forwarder, ForwardError, ForwarderSettings, ForwarderStats, MissingTimestamp, Route,
};
pub use jsonl_writer::{AverageRecord, JsonlWriter};
pub use reader::{run_tailer, TailError, TailReader, DEFAULT_POLL_INTERVAL};
pub use schedule::WakeSchedule;
pub use window::{MissingDuration, TrailingWindow};
pub use writer::{run_writer, OutputWriter, WriterStats};
pub use writer_backend::{ResultWriterBackend, WriterError};

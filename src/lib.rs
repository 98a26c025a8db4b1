//! DeliveryFlow - streaming moving average over a tailed JSONL event file
//!
//! ```text
//! events.jsonl → TailReader → forwarder (staleness filter)
//!     ↓ bounded channel
//! averager (drift-corrected schedule, trailing window)
//!     ↓ bounded channel
//! result writer → JSONL file or stdout
//! ```

pub mod aggregator_core;
pub mod pipeline;

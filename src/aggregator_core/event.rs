//! Delivery event normalization from JSONL lines

use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Deserialize;

/// Fixed textual format of the `timestamp` key (`2018-12-26 18:11:08.509654`)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Wall-clock "now" in the same zone-less local time the timestamps are written in
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// One input record. Unknown keys (`event_name`, `translation_id`, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryEvent {
    #[serde(default, deserialize_with = "timestamp_format::deserialize")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed event line: {0}")]
pub struct EventParseError(#[from] serde_json::Error);

impl DeliveryEvent {
    /// Parse a DeliveryEvent from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, EventParseError> {
        let event: DeliveryEvent = serde_json::from_str(line)?;
        Ok(event)
    }

    /// Age of the event relative to `now`, `None` when it carries no timestamp
    pub fn age(&self, now: NaiveDateTime) -> Option<TimeDelta> {
        self.timestamp.map(|ts| now - ts)
    }

    /// Strict trailing-window test: `now - timestamp < window`
    pub fn is_within(&self, now: NaiveDateTime, window: TimeDelta) -> Option<bool> {
        self.age(now).map(|age| age < window)
    }
}

mod timestamp_format {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

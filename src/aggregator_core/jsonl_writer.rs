//! JSONL writer for average records - one flushed line per aggregation cycle

use super::writer_backend::{ResultWriterBackend, WriterError};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use std::io::Write;

/// Result of one aggregation cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AverageRecord {
    /// Wall-clock time of the computation, `2018-12-26 18:24:00.000112`
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDateTime,
    pub average_delivery_time: Option<f64>,
}

impl AverageRecord {
    pub fn new(date: NaiveDateTime, average_delivery_time: Option<f64>) -> Self {
        Self {
            date,
            average_delivery_time,
        }
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&date.format("%Y-%m-%d %H:%M:%S%.6f"))
}

/// Writes each record as one JSON line and flushes immediately
pub struct JsonlWriter<W: Write + Send> {
    out: W,
    label: &'static str,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(out: W, label: &'static str) -> Self {
        Self { out, label }
    }

    pub fn write_record(&mut self, record: &AverageRecord) -> Result<(), WriterError> {
        let json = record.to_jsonl()?;
        writeln!(self.out, "{}", json)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> ResultWriterBackend for JsonlWriter<W> {
    async fn write_record(&mut self, record: &AverageRecord) -> Result<(), WriterError> {
        JsonlWriter::write_record(self, record)
    }

    async fn flush(&mut self) -> Result<(), WriterError> {
        self.out.flush()?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 12, 26)
            .unwrap()
            .and_hms_micro_opt(18, 24, 0, 112)
            .unwrap()
    }

    #[test]
    fn test_record_format() {
        let record = AverageRecord::new(date(), Some(45.5));
        assert_eq!(
            record.to_jsonl().unwrap(),
            r#"{"date":"2018-12-26 18:24:00.000112","average_delivery_time":45.5}"#
        );

        let empty = AverageRecord::new(date(), None);
        assert_eq!(
            empty.to_jsonl().unwrap(),
            r#"{"date":"2018-12-26 18:24:00.000112","average_delivery_time":null}"#
        );
    }

    #[test]
    fn test_writes_one_line_per_record() {
        let mut writer = JsonlWriter::new(Vec::new(), "memory");
        writer.write_record(&AverageRecord::new(date(), Some(54.0))).unwrap();
        writer.write_record(&AverageRecord::new(date(), None)).unwrap();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["average_delivery_time"], serde_json::json!(54.0));
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second["average_delivery_time"].is_null());
    }
}

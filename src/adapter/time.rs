//! Date and time adapters

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

use super::{RawKind, Scalar, ScalarAdapter};
use crate::error::AdapterError;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Calendar date from `YYYY-MM-DD` or a full RFC 3339 timestamp
#[derive(Debug, Clone, Copy, Default)]
pub struct Date;

impl ScalarAdapter for Date {
    fn name(&self) -> &str {
        "date"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        &[RawKind::String]
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        let text = raw
            .as_str()
            .ok_or_else(|| AdapterError::invalid(self.name(), raw, "not a string"))?;
        if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
            return Ok(Scalar::Date(date));
        }
        DateTime::parse_from_rfc3339(text)
            .map(|dt| Scalar::Date(dt.date_naive()))
            .map_err(|e| AdapterError::invalid(self.name(), raw, e))
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::Date(date) => Value::String(date.format("%Y-%m-%d").to_string()),
            _ => Value::Null,
        }
    }
}

/// Timezone-aware datetime. Strings without an offset are taken as UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct Datetime;

impl ScalarAdapter for Datetime {
    fn name(&self) -> &str {
        "datetime"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        &[RawKind::String]
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        let text = raw
            .as_str()
            .ok_or_else(|| AdapterError::invalid(self.name(), raw, "not a string"))?;
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Ok(Scalar::DateTime(dt));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
            .map(|naive| Scalar::DateTime(Utc.from_utc_datetime(&naive).fixed_offset()))
            .ok_or_else(|| AdapterError::invalid(self.name(), raw, "not an ISO 8601 datetime"))
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::DateTime(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            _ => Value::Null,
        }
    }
}

/// Seconds since the Unix epoch, stored as a UTC datetime
#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp;

impl ScalarAdapter for Timestamp {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn accepted_kinds(&self) -> &[RawKind] {
        &[RawKind::Integer, RawKind::Float]
    }

    fn parse(&self, raw: &Value) -> Result<Scalar, AdapterError> {
        let parsed = if let Some(secs) = raw.as_i64() {
            Utc.timestamp_opt(secs, 0).single()
        } else {
            raw.as_f64().and_then(|f| {
                let secs = f.floor();
                let nanos = ((f - secs) * 1e9).round() as u32;
                Utc.timestamp_opt(secs as i64, nanos.min(999_999_999)).single()
            })
        };
        parsed
            .map(|dt| Scalar::DateTime(dt.fixed_offset()))
            .ok_or_else(|| AdapterError::invalid(self.name(), raw, "timestamp out of range"))
    }

    fn reverse(&self, value: &Scalar) -> Value {
        match value {
            Scalar::DateTime(dt) if dt.timestamp_subsec_nanos() == 0 => Value::from(dt.timestamp()),
            Scalar::DateTime(dt) => {
                let secs = dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9;
                Number::from_f64(secs).map(Value::Number).unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }
}

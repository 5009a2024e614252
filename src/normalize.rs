//! Conversion of DuckDB result values into JSON-safe values.
use std::fmt::Write as _;

use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use duckdb::types::{TimeUnit, Value};
use serde_json::{Map, Number, Value as JsonValue};
use tracing::warn;

/// One result row keyed by column name.
pub type NormalizedRow = Map<String, JsonValue>;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;
const NANOS_PER_SECOND: i64 = 1_000_000_000;

pub fn normalize_row(columns: &[String], values: &[Value]) -> NormalizedRow {
    let mut obj = Map::new();
    for (i, value) in values.iter().enumerate() {
        let name = columns
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("column_{}", i));
        obj.insert(name, normalize_value(value));
    }
    obj
}

pub fn normalize_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::TinyInt(i) => JsonValue::from(*i),
        Value::SmallInt(i) => JsonValue::from(*i),
        Value::Int(i) => JsonValue::from(*i),
        Value::BigInt(i) => JsonValue::from(*i),
        Value::HugeInt(i) => match i64::try_from(*i) {
            Ok(n) => JsonValue::from(n),
            Err(_) => JsonValue::String(i.to_string()),
        },
        Value::UHugeInt(i) => match u64::try_from(*i) {
            Ok(n) => JsonValue::from(n),
            Err(_) => JsonValue::String(i.to_string()),
        },
        Value::UTinyInt(i) => JsonValue::from(*i),
        Value::USmallInt(i) => JsonValue::from(*i),
        Value::UInt(i) => JsonValue::from(*i),
        Value::UBigInt(i) => JsonValue::from(*i),
        Value::Float(f) => float(f64::from(*f)),
        Value::Double(f) => float(*f),
        Value::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(float)
            .unwrap_or(JsonValue::Null),
        Value::Timestamp(unit, v) => timestamp(*unit, *v)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        Value::Date32(days) => date(*days)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        Value::Time64(unit, v) => time_of_day(*unit, *v)
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        Value::Interval {
            months,
            days,
            nanos,
        } => JsonValue::String(iso_duration(*months, *days, *nanos)),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Enum(s) => JsonValue::String(s.clone()),
        Value::Blob(bytes) => {
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        Value::List(items) | Value::Array(items) => {
            JsonValue::Array(items.iter().map(normalize_value).collect())
        }
        Value::Struct(fields) => {
            let mut obj = Map::new();
            for (name, field) in fields.iter() {
                obj.insert(name.clone(), normalize_value(field));
            }
            JsonValue::Object(obj)
        }
        Value::Map(entries) => {
            let mut obj = Map::new();
            for (key, entry) in entries.iter() {
                obj.insert(map_key(key), normalize_value(entry));
            }
            JsonValue::Object(obj)
        }
        Value::Union(inner) => normalize_value(inner),
        #[allow(unreachable_patterns)]
        other => {
            warn!(value = ?other, "unsupported value kind, emitting null");
            JsonValue::Null
        }
    }
}

/// Non-finite floats have no JSON form.
fn float(f: f64) -> JsonValue {
    Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

fn map_key(key: &Value) -> String {
    match normalize_value(key) {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}

fn to_nanos(unit: TimeUnit, value: i64) -> i128 {
    let value = i128::from(value);
    match unit {
        TimeUnit::Second => value * 1_000_000_000,
        TimeUnit::Millisecond => value * 1_000_000,
        TimeUnit::Microsecond => value * 1_000,
        TimeUnit::Nanosecond => value,
    }
}

/// RFC 3339 in UTC with millisecond precision.
fn timestamp(unit: TimeUnit, value: i64) -> Option<String> {
    let nanos = to_nanos(unit, value);
    let secs = i64::try_from(nanos.div_euclid(i128::from(NANOS_PER_SECOND))).ok()?;
    let subsec = u32::try_from(nanos.rem_euclid(i128::from(NANOS_PER_SECOND))).ok()?;
    let dt = DateTime::<Utc>::from_timestamp(secs, subsec)?;
    Some(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn date(days: i32) -> Option<String> {
    let date = NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_CE_DAYS)?)?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn time_of_day(unit: TimeUnit, value: i64) -> Option<String> {
    let nanos = to_nanos(unit, value);
    let secs = u32::try_from(nanos / i128::from(NANOS_PER_SECOND)).ok()?;
    let subsec = u32::try_from(nanos % i128::from(NANOS_PER_SECOND)).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, subsec)?;
    let format = if subsec == 0 { "%H:%M:%S" } else { "%H:%M:%S%.3f" };
    Some(time.format(format).to_string())
}

/// ISO 8601 duration, e.g. `P1Y2M3DT4H5M6.5S`.
fn iso_duration(months: i32, days: i32, nanos: i64) -> String {
    let mut out = String::from("P");
    let (years, months) = (months / 12, months % 12);
    if years != 0 {
        let _ = write!(out, "{}Y", years);
    }
    if months != 0 {
        let _ = write!(out, "{}M", months);
    }
    if days != 0 {
        let _ = write!(out, "{}D", days);
    }

    if nanos != 0 {
        out.push('T');
        let sign = if nanos < 0 { "-" } else { "" };
        let abs = i128::from(nanos).abs();
        let hours = abs / 3_600_000_000_000;
        let minutes = abs / 60_000_000_000 % 60;
        let seconds = abs / 1_000_000_000 % 60;
        let fraction = abs % 1_000_000_000;
        if hours != 0 {
            let _ = write!(out, "{}{}H", sign, hours);
        }
        if minutes != 0 {
            let _ = write!(out, "{}{}M", sign, minutes);
        }
        if seconds != 0 || fraction != 0 {
            let _ = write!(out, "{}{}", sign, seconds);
            if fraction != 0 {
                let digits = format!("{:09}", fraction);
                let _ = write!(out, ".{}", digits.trim_end_matches('0'));
            }
            out.push('S');
        }
    }

    if out == "P" {
        out.push_str("T0S");
    }
    out
}

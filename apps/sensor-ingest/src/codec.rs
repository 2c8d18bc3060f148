use crate::error::DropReason;
use crate::reading::{Reading, MIN_PLAUSIBLE_YEAR};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::str::FromStr;

pub const TIMESTAMP_KEY: &str = "timestamp";
pub const ARM_ID_KEY: &str = "armId";
pub const ROTATION_KEY: &str = "rotation";
pub const TEMPERATURE_KEY: &str = "temperature";
pub const FORCE_KEY: &str = "force";
pub const PRESSURE_KEY: &str = "pressure";

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadEncoding {
    #[default]
    Utf8,
    Latin1,
}

impl PayloadEncoding {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Some(Self::Latin1),
            _ => None,
        }
    }
}

/// Decodes `bytes` with `encoding`, falling back to lossy UTF-8 when the
/// payload is not valid for it.
pub fn decode_text(bytes: &[u8], encoding: PayloadEncoding) -> Cow<'_, str> {
    match encoding {
        PayloadEncoding::Utf8 => match std::str::from_utf8(bytes) {
            Ok(text) => Cow::Borrowed(text),
            Err(err) => {
                tracing::debug!(error=%err, "payload is not valid utf-8; decoding lossily");
                String::from_utf8_lossy(bytes)
            }
        },
        PayloadEncoding::Latin1 => Cow::Owned(bytes.iter().map(|&byte| byte as char).collect()),
    }
}

pub fn decode_json(text: &str) -> Option<Document> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(document)) => Some(document),
        Ok(_) => {
            tracing::error!("could not convert payload to json: not an object");
            None
        }
        Err(err) => {
            tracing::error!(error=%err, "could not convert payload to json");
            None
        }
    }
}

/// Epoch seconds under `key` as a UTC instant. A missing or non-numeric field
/// reads as 0, and 0 means "no timestamp" rather than 1970-01-01.
pub fn extract_epoch_timestamp(document: &Document, key: &str) -> Option<DateTime<Utc>> {
    let seconds = integer_field(document, key).unwrap_or_else(|| {
        tracing::error!(key, "json does not contain an integer value");
        0
    });
    if seconds == 0 {
        return None;
    }
    let timestamp = Utc.timestamp_opt(seconds, 0).single();
    if timestamp.is_none() {
        tracing::error!(key, seconds, "epoch seconds out of range");
    }
    timestamp
}

pub fn extract_rounded_number(document: &Document, key: &str) -> f64 {
    match number_field(document, key) {
        Some(value) => round_two_decimals(value),
        None => {
            tracing::error!(key, "json does not contain a numeric value");
            0.0
        }
    }
}

pub fn extract_text(document: &Document, key: &str) -> String {
    match document.get(key) {
        Some(Value::String(text)) => text.clone(),
        _ => {
            tracing::error!(key, "json does not contain a string value");
            String::new()
        }
    }
}

pub fn build_reading(document: &Document) -> Option<Reading> {
    extract_epoch_timestamp(document, TIMESTAMP_KEY)
        .filter(is_plausible)
        .map(|timestamp| reading_from(document, timestamp))
}

/// Full payload-to-reading path, reporting why a message yields nothing.
pub fn decode_reading(payload: &[u8], encoding: PayloadEncoding) -> Result<Reading, DropReason> {
    let text = decode_text(payload, encoding);
    let document = decode_json(&text).ok_or(DropReason::MalformedPayload)?;
    let timestamp =
        extract_epoch_timestamp(&document, TIMESTAMP_KEY).ok_or(DropReason::MissingTimestamp)?;
    if !is_plausible(&timestamp) {
        return Err(DropReason::ImplausibleTimestamp { timestamp });
    }
    Ok(reading_from(&document, timestamp))
}

/// Rounds half away from zero on the shortest decimal form of `value`, so
/// `3.145` becomes `3.15` even though its binary value sits just below.
pub fn round_two_decimals(value: f64) -> f64 {
    Decimal::from_str(&value.to_string())
        .ok()
        .and_then(|decimal| {
            decimal
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
                .to_string()
                .parse::<f64>()
                .ok()
        })
        .unwrap_or_else(|| {
            // Beyond Decimal's range there is no fractional part left to round.
            let scaled = value * 100.0;
            if scaled.is_finite() {
                scaled.round() / 100.0
            } else {
                value
            }
        })
}

fn is_plausible(timestamp: &DateTime<Utc>) -> bool {
    timestamp.year() >= MIN_PLAUSIBLE_YEAR
}

fn reading_from(document: &Document, timestamp: DateTime<Utc>) -> Reading {
    Reading::new(
        timestamp,
        extract_text(document, ARM_ID_KEY),
        extract_rounded_number(document, ROTATION_KEY),
        extract_rounded_number(document, TEMPERATURE_KEY),
        extract_rounded_number(document, FORCE_KEY),
        extract_rounded_number(document, PRESSURE_KEY),
    )
}

// Numeric strings are accepted alongside numbers; sensor firmware is not
// consistent about quoting.
fn integer_field(document: &Document, key: &str) -> Option<i64> {
    match document.get(key)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
        Value::String(raw) => {
            let raw = raw.trim();
            raw.parse::<i64>().ok().or_else(|| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .map(|v| v.trunc() as i64)
            })
        }
        _ => None,
    }
}

fn number_field(document: &Document, key: &str) -> Option<f64> {
    let value = match document.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn full_payload(timestamp: Value) -> Document {
        document(json!({
            "timestamp": timestamp,
            "armId": "arm-7",
            "rotation": 90.126,
            "temperature": 36.6,
            "force": 3.14159,
            "pressure": 1.005,
        }))
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_two_decimals(3.14159), 3.14);
        assert_eq!(round_two_decimals(3.145), 3.15);
        assert_eq!(round_two_decimals(101.325), 101.33);
        assert_eq!(round_two_decimals(12.345), 12.35);
        assert_eq!(round_two_decimals(-2.675), -2.68);
        assert_eq!(round_two_decimals(21.0), 21.0);
    }

    #[test]
    fn huge_finite_values_stay_finite() {
        assert_eq!(round_two_decimals(1.7e308), 1.7e308);
        assert_eq!(round_two_decimals(-1.7e308), -1.7e308);
        let value = extract_rounded_number(&document(json!({"v": 1.7e308})), "v");
        assert!(value.is_finite());
        assert_eq!(value, 1.7e308);
    }

    #[test]
    fn build_reading_extracts_every_field() {
        let reading = build_reading(&full_payload(json!(1_700_000_000))).expect("reading");
        assert_eq!(reading.timestamp(), Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert_eq!(reading.arm_id(), "arm-7");
        assert_eq!(reading.rotation(), 90.13);
        assert_eq!(reading.temperature(), 36.6);
        assert_eq!(reading.force(), 3.14);
        assert_eq!(reading.pressure(), 1.01);
    }

    #[test]
    fn zero_missing_or_non_numeric_timestamp_yields_nothing() {
        assert!(build_reading(&full_payload(json!(0))).is_none());
        assert!(build_reading(&full_payload(json!("soon"))).is_none());
        assert!(build_reading(&full_payload(json!(null))).is_none());

        let mut missing = full_payload(json!(1_700_000_000));
        missing.remove(TIMESTAMP_KEY);
        assert!(build_reading(&missing).is_none());
    }

    #[test]
    fn timestamps_before_2019_are_filtered() {
        assert!(build_reading(&full_payload(json!(100_000))).is_none());
        // 2018-12-31T23:59:59Z
        assert!(build_reading(&full_payload(json!(1_546_300_799))).is_none());
        // 2019-01-01T00:00:00Z
        assert!(build_reading(&full_payload(json!(1_546_300_800))).is_some());
    }

    #[test]
    fn numeric_strings_and_floats_are_coerced() {
        let ts = extract_epoch_timestamp(&document(json!({"t": "1700000000"})), "t");
        assert_eq!(ts, Utc.timestamp_opt(1_700_000_000, 0).single());
        let ts = extract_epoch_timestamp(&document(json!({"t": 1_700_000_000.9})), "t");
        assert_eq!(ts, Utc.timestamp_opt(1_700_000_000, 0).single());
        assert_eq!(extract_rounded_number(&document(json!({"v": " 2.499 "})), "v"), 2.5);
    }

    #[test]
    fn malformed_fields_default_without_dropping_the_reading() {
        let payload = document(json!({
            "timestamp": 1_700_000_000,
            "armId": 42,
            "rotation": "left",
            "temperature": 20.004,
            "pressure": [1, 2],
        }));
        let reading = build_reading(&payload).expect("reading");
        assert_eq!(reading.arm_id(), "");
        assert_eq!(reading.rotation(), 0.0);
        assert_eq!(reading.temperature(), 20.0);
        assert_eq!(reading.force(), 0.0);
        assert_eq!(reading.pressure(), 0.0);
    }

    #[test]
    fn out_of_range_epoch_is_treated_as_missing() {
        assert!(extract_epoch_timestamp(&document(json!({"t": i64::MAX})), "t").is_none());
    }

    #[test]
    fn decode_json_requires_an_object() {
        assert!(decode_json("{\"a\":1}").is_some());
        assert!(decode_json("[1,2,3]").is_none());
        assert!(decode_json("temperature=21").is_none());
        assert!(decode_json("").is_none());
    }

    #[test]
    fn decode_text_falls_back_to_lossy_utf8() {
        assert_eq!(decode_text(b"arm", PayloadEncoding::Utf8), "arm");
        assert_eq!(decode_text(&[0x61, 0xff, 0x62], PayloadEncoding::Utf8), "a\u{fffd}b");
        assert_eq!(decode_text(&[0x41, 0xe9], PayloadEncoding::Latin1), "A\u{e9}");
    }

    #[test]
    fn payload_encoding_names() {
        assert_eq!(PayloadEncoding::parse("UTF-8"), Some(PayloadEncoding::Utf8));
        assert_eq!(PayloadEncoding::parse(" latin1 "), Some(PayloadEncoding::Latin1));
        assert_eq!(PayloadEncoding::parse("ebcdic"), None);
    }

    #[test]
    fn decode_reading_reports_drop_reasons() {
        let enc = PayloadEncoding::Utf8;
        assert_eq!(
            decode_reading(b"not json", enc),
            Err(DropReason::MalformedPayload)
        );
        assert_eq!(
            decode_reading(br#"{"timestamp":0,"armId":"arm-1"}"#, enc),
            Err(DropReason::MissingTimestamp)
        );
        assert_eq!(
            decode_reading(br#"{"timestamp":100000}"#, enc),
            Err(DropReason::ImplausibleTimestamp {
                timestamp: Utc.timestamp_opt(100_000, 0).unwrap()
            })
        );
        assert!(decode_reading(br#"{"timestamp":1700000000}"#, enc).is_ok());
    }
}

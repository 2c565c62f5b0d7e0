//! Conversion between wire values and model values.
//!
//! Decoding never fails outward: [`decode`] degrades any unreadable value to
//! the field type's unset value. [`try_decode`] exposes the error for callers
//! that want it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use tracing::debug;

use crate::error::DecodeError;
use crate::field::{FieldType, ModelValue};

/// Separator for multi-valued and lookup wire values.
pub const MULTI_SEPARATOR: &str = ";#";

/// Decode a raw value, degrading failures to the unset value.
pub fn decode(field_type: &FieldType, raw: Option<&Value>) -> ModelValue {
    match try_decode(field_type, raw) {
        Ok(value) => value,
        Err(e) => {
            debug!(field_type = %field_type, error = %e, "Value left unset");
            field_type.unset()
        }
    }
}

/// Decode a raw value.
pub fn try_decode(field_type: &FieldType, raw: Option<&Value>) -> Result<ModelValue, DecodeError> {
    let raw = match raw {
        None | Some(Value::Null) => return Ok(field_type.unset()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(field_type.unset()),
        Some(v) if is_deferred(v) => return Ok(field_type.unset()),
        Some(v) => v,
    };

    match field_type {
        FieldType::Number | FieldType::Currency => decode_number(field_type, raw),
        FieldType::Boolean => decode_bool(raw),
        FieldType::DateTime => decode_date(raw),
        FieldType::MultiChoice => decode_multi(field_type, raw).map(ModelValue::Multi),
        FieldType::UserMulti => decode_multi(field_type, raw).map(ModelValue::Multi),
        FieldType::Choice => match raw {
            Value::Object(map) => match map.get("Value") {
                Some(Value::String(s)) => Ok(ModelValue::Text(s.clone())),
                _ => Err(shape(field_type, raw)),
            },
            other => decode_text(field_type, other),
        },
        _ => decode_text(field_type, raw),
    }
}

/// Encode a model value for a write batch.
pub fn encode(field_type: &FieldType, value: &ModelValue) -> String {
    match value {
        ModelValue::Null => String::new(),
        ModelValue::Multi(items) => encode_multi(items),
        ModelValue::Date(date) => format_date(date),
        ModelValue::Number(n) => n.to_string(),
        ModelValue::Bool(b) => match field_type {
            FieldType::Unknown(_) => b.to_string(),
            _ if *b => "1".to_string(),
            _ => "0".to_string(),
        },
        ModelValue::Text(s) => match field_type {
            FieldType::Note => cdata(s),
            _ => s.clone(),
        },
    }
}

/// `"a;#b;#"`, or `""` when empty.
pub fn encode_multi(items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = items.join(MULTI_SEPARATOR);
    out.push_str(MULTI_SEPARATOR);
    out
}

fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

/// ISO-8601 UTC with milliseconds: `2015-09-20T17:10:01.000Z`.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Lookup wire form for a person: `"<id>;#<name>"`.
pub fn person_value(id: u64, name: &str) -> String {
    format!("{}{}{}", id, MULTI_SEPARATOR, name)
}

/// True for `{"__deferred": {...}}` handles.
pub fn is_deferred(raw: &Value) -> bool {
    raw.get("__deferred").is_some()
}

/// Option values of a resolved choice collection (`results[].Value`).
pub fn decode_choice_collection(payload: &Value) -> Vec<String> {
    collection_rows(payload)
        .iter()
        .filter_map(|row| match row {
            Value::String(s) => Some(s.clone()),
            other => other.get("Value").and_then(Value::as_str).map(str::to_string),
        })
        .collect()
}

/// `"<id>;#<account>"` entries of a resolved people collection.
pub fn decode_user_collection(payload: &Value) -> Vec<String> {
    collection_rows(payload)
        .iter()
        .filter_map(|row| {
            let id = row.get("Id").and_then(Value::as_u64)?;
            let account = row
                .get("Account")
                .or_else(|| row.get("Name"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(person_value(id, account))
        })
        .collect()
}

fn collection_rows(payload: &Value) -> &[Value] {
    match payload {
        Value::Array(rows) => rows,
        other => other
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
    }
}

fn shape(field_type: &FieldType, raw: &Value) -> DecodeError {
    let shape = match raw {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    DecodeError::UnexpectedShape {
        field_type: field_type.to_string(),
        shape: shape.to_string(),
    }
}

fn invalid(field_type: &FieldType, raw: &str) -> DecodeError {
    DecodeError::Invalid {
        field_type: field_type.to_string(),
        raw: raw.to_string(),
    }
}

fn decode_text(field_type: &FieldType, raw: &Value) -> Result<ModelValue, DecodeError> {
    match raw {
        Value::String(s) => Ok(ModelValue::Text(s.clone())),
        Value::Number(n) => Ok(ModelValue::Text(n.to_string())),
        Value::Bool(b) => Ok(ModelValue::Text(b.to_string())),
        other => Err(shape(field_type, other)),
    }
}

fn decode_number(field_type: &FieldType, raw: &Value) -> Result<ModelValue, DecodeError> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .map(ModelValue::Number)
            .ok_or_else(|| invalid(field_type, &n.to_string())),
        Value::String(s) => parse_number(s)
            .map(ModelValue::Number)
            .ok_or_else(|| invalid(field_type, s)),
        other => Err(shape(field_type, other)),
    }
}

/// Parse a numeric string, tolerating currency symbols, grouping commas and
/// accounting-style negatives (`(12.50)`).
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, trimmed),
    };

    let cleaned: String = body
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' ' | '\u{a0}'))
        .collect();
    let n: f64 = cleaned.parse().ok().filter(|n: &f64| n.is_finite())?;
    Some(if negative { -n } else { n })
}

fn decode_bool(raw: &Value) -> Result<ModelValue, DecodeError> {
    match raw {
        Value::Bool(b) => Ok(ModelValue::Bool(*b)),
        Value::Number(n) => Ok(ModelValue::Bool(n.as_f64().is_some_and(|n| n != 0.0))),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(ModelValue::Bool(true)),
            "0" | "false" | "no" => Ok(ModelValue::Bool(false)),
            _ => Err(invalid(&FieldType::Boolean, s)),
        },
        other => Err(shape(&FieldType::Boolean, other)),
    }
}

fn decode_date(raw: &Value) -> Result<ModelValue, DecodeError> {
    match raw {
        Value::String(s) => parse_date(s)
            .map(ModelValue::Date)
            .ok_or_else(|| invalid(&FieldType::DateTime, s)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .map(ModelValue::Date)
            .ok_or_else(|| invalid(&FieldType::DateTime, &n.to_string())),
        other => Err(shape(&FieldType::DateTime, other)),
    }
}

fn decode_multi(field_type: &FieldType, raw: &Value) -> Result<Vec<String>, DecodeError> {
    match raw {
        Value::Array(_) | Value::Object(_) => {
            if raw.is_object() && raw.get("results").is_none() {
                return Err(shape(field_type, raw));
            }
            Ok(match field_type {
                FieldType::UserMulti => decode_user_collection(raw),
                _ => decode_choice_collection(raw),
            })
        }
        Value::String(s) => Ok(split_multi(field_type, s)),
        other => Err(shape(field_type, other)),
    }
}

/// Split a `;#`-joined wire value. People values keep their `id;#name` pairs.
pub(crate) fn split_multi(field_type: &FieldType, text: &str) -> Vec<String> {
    let tokens: Vec<&str> = text
        .split(MULTI_SEPARATOR)
        .filter(|t| !t.is_empty())
        .collect();

    if *field_type != FieldType::UserMulti {
        return tokens.into_iter().map(str::to_string).collect();
    }

    let mut values = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        let is_id = token.chars().all(|c| c.is_ascii_digit());
        match iter.peek() {
            Some(name) if is_id => {
                values.push(format!("{}{}{}", token, MULTI_SEPARATOR, name));
                iter.next();
            }
            _ => values.push(token.to_string()),
        }
    }
    values
}

// ==================== Dates ====================

fn ticks_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:/Date\((-?\d+)(?:[+-]\d{4})?\)/|(\d{13}))$").expect("static pattern")
    })
}

fn us_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})(?:\s+(\d{1,2}):(\d{2})(?::(\d{2}))?\s*(AM|PM)?)?$",
        )
        .expect("static pattern")
    })
}

fn iso_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("static pattern"))
}

/// Parse any supported date form to a UTC instant.
///
/// Accepts `/Date(ticks)/` and bare 13-digit epoch milliseconds, ISO-8601
/// date-times (with `Z`, an offset, or no zone which is read as UTC),
/// `M/D/YYYY` and `M-D-YYYY` with an optional clock time, and `YYYY-M-D`.
/// Two-digit years are read as 20YY. Date-only forms are midnight UTC.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(caps) = ticks_pattern().captures(text) {
        let ms: i64 = caps.get(1).or_else(|| caps.get(2))?.as_str().parse().ok()?;
        return Utc.timestamp_millis_opt(ms).single();
    }

    if text.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(Utc.from_utc_datetime(&naive));
        }
        return None;
    }

    if let Some(caps) = us_date_pattern().captures(text) {
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        if caps[3].len() == 2 {
            year += 2000;
        }
        let date = NaiveDate::from_ymd_opt(year, month, day)?;

        let (mut hour, minute, second) = match caps.get(4) {
            Some(h) => (
                h.as_str().parse::<u32>().ok()?,
                caps.get(5)?.as_str().parse::<u32>().ok()?,
                caps.get(6).map_or(Some(0), |s| s.as_str().parse::<u32>().ok())?,
            ),
            None => (0, 0, 0),
        };
        if let Some(meridiem) = caps.get(7) {
            let pm = meridiem.as_str().eq_ignore_ascii_case("PM");
            hour = match (hour, pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, true) => h + 12,
                (h, false) => h,
            };
        }
        let naive = date.and_hms_opt(hour, minute, second)?;
        return Some(Utc.from_utc_datetime(&naive));
    }

    if let Some(caps) = iso_date_pattern().captures(text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL_TYPES: [FieldType; 11] = [
        FieldType::Text,
        FieldType::Note,
        FieldType::Number,
        FieldType::Currency,
        FieldType::Boolean,
        FieldType::DateTime,
        FieldType::Choice,
        FieldType::MultiChoice,
        FieldType::User,
        FieldType::UserMulti,
        FieldType::Unknown(String::new()),
    ];

    fn date_of(raw: &str) -> String {
        let value = decode(&FieldType::DateTime, Some(&json!(raw)));
        encode(&FieldType::DateTime, &value)
    }

    #[test]
    fn test_date_forms_agree() {
        let midnight = "2015-09-20T00:00:00.000Z";
        assert_eq!(date_of("/Date(1442707200000)/"), midnight);
        assert_eq!(date_of("1442707200000"), midnight);
        assert_eq!(date_of("09/20/2015"), midnight);
        assert_eq!(date_of("9-20-2015"), midnight);
        assert_eq!(date_of("9/20/15"), midnight);
        assert_eq!(date_of("2015-09-20"), midnight);
        assert_eq!(date_of("2015-09-20T00:00:00Z"), midnight);
    }

    #[test]
    fn test_iso_datetime_keeps_time() {
        assert_eq!(date_of("2015-09-20T17:10:01Z"), "2015-09-20T17:10:01.000Z");
        assert_eq!(date_of("/Date(1442769001000)/"), "2015-09-20T17:10:01.000Z");
        assert_eq!(date_of("2015-09-20T19:10:01+02:00"), "2015-09-20T17:10:01.000Z");
        assert_eq!(date_of("9/20/2015 5:10 PM"), "2015-09-20T17:10:00.000Z");
    }

    #[test]
    fn test_unparseable_date_is_unset() {
        assert_eq!(decode(&FieldType::DateTime, Some(&json!("soon"))), ModelValue::Null);
        assert_eq!(decode(&FieldType::DateTime, Some(&json!("13/45/2015"))), ModelValue::Null);
        assert!(try_decode(&FieldType::DateTime, Some(&json!("soon"))).is_err());
    }

    #[test]
    fn test_empty_and_missing_decode_to_unset() {
        for field_type in ALL_TYPES.iter() {
            let expected = field_type.unset();
            assert_eq!(decode(field_type, None), expected, "{}", field_type);
            assert_eq!(decode(field_type, Some(&json!(""))), expected, "{}", field_type);
            assert_eq!(decode(field_type, Some(&Value::Null)), expected, "{}", field_type);
        }
    }

    #[test]
    fn test_deferred_multi_decodes_empty() {
        let raw = json!({ "__deferred": { "uri": "http://site/Items(1)/Tags" } });
        assert_eq!(
            decode(&FieldType::MultiChoice, Some(&raw)),
            ModelValue::Multi(vec![])
        );
    }

    #[test]
    fn test_currency_decode_and_encode() {
        let value = decode(&FieldType::Currency, Some(&json!("1234.5")));
        assert_eq!(value, ModelValue::Number(1234.5));
        assert_eq!(encode(&FieldType::Currency, &value), "1234.5");

        assert_eq!(parse_number("$1,234.50"), Some(1234.5));
        assert_eq!(parse_number("(12.5)"), Some(-12.5));
        assert_eq!(parse_number("twelve"), None);
        assert_eq!(encode(&FieldType::Number, &ModelValue::Number(0.0)), "0");
    }

    #[test]
    fn test_bool_decode_and_encode() {
        assert_eq!(decode(&FieldType::Boolean, Some(&json!(true))), ModelValue::Bool(true));
        assert_eq!(decode(&FieldType::Boolean, Some(&json!("0"))), ModelValue::Bool(false));
        assert_eq!(decode(&FieldType::Boolean, Some(&json!("maybe"))), ModelValue::Null);
        assert_eq!(encode(&FieldType::Boolean, &ModelValue::Bool(true)), "1");
        assert_eq!(encode(&FieldType::Boolean, &ModelValue::Bool(false)), "0");
    }

    #[test]
    fn test_multi_encoding() {
        let value = ModelValue::Multi(vec!["A".into(), "B".into()]);
        assert_eq!(encode(&FieldType::MultiChoice, &value), "A;#B;#");
        assert_eq!(encode(&FieldType::MultiChoice, &ModelValue::Multi(vec![])), "");
    }

    #[test]
    fn test_multi_decoding_shapes() {
        let inline = json!({ "results": [{ "Value": "A" }, { "Value": "B" }] });
        assert_eq!(
            decode(&FieldType::MultiChoice, Some(&inline)),
            ModelValue::Multi(vec!["A".into(), "B".into()])
        );
        assert_eq!(
            decode(&FieldType::MultiChoice, Some(&json!(";#A;#B;#"))),
            ModelValue::Multi(vec!["A".into(), "B".into()])
        );
        assert_eq!(
            decode(&FieldType::UserMulti, Some(&json!("5;#ann;#6;#bob;#"))),
            ModelValue::Multi(vec!["5;#ann".into(), "6;#bob".into()])
        );
    }

    #[test]
    fn test_user_collection() {
        let payload = json!({ "results": [
            { "Id": 5, "Account": "corp\\ann" },
            { "Id": 6, "Name": "Bob" },
            { "Account": "no id" }
        ]});
        assert_eq!(
            decode_user_collection(&payload),
            vec!["5;#corp\\ann".to_string(), "6;#Bob".to_string()]
        );
    }

    #[test]
    fn test_note_uses_cdata_envelope() {
        assert_eq!(
            encode(&FieldType::Note, &ModelValue::Text("<b>hi</b>".into())),
            "<![CDATA[<b>hi</b>]]>"
        );
        assert_eq!(encode(&FieldType::Note, &ModelValue::Null), "");
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let field_type = FieldType::Unknown("Lookup".into());
        assert_eq!(
            decode(&field_type, Some(&json!("3;#Facilities"))),
            ModelValue::Text("3;#Facilities".into())
        );
        assert_eq!(
            encode(&field_type, &ModelValue::Text("3;#Facilities".into())),
            "3;#Facilities"
        );
    }

    #[test]
    fn test_choice_value_object() {
        assert_eq!(
            decode(&FieldType::Choice, Some(&json!({ "Value": "Open" }))),
            ModelValue::Text("Open".into())
        );
        assert_eq!(person_value(5, "Jane Doe"), "5;#Jane Doe");
    }
}

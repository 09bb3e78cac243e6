use chrono::{Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use serde_json::{Map, Number, Value};

use crate::{
    log_warn,
    meta::{
        col_type::{ColType, TableColumn},
        col_value::ColValue,
    },
};

pub type Document = Map<String, Value>;

const ZERO_DATE: &str = "0000-00-00";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Normalizes raw column values into the portable document shape sent to the
/// search index. Pure conversion: the same inputs always yield the same
/// output, anomalies degrade to safe fallbacks instead of dropping the row.
pub struct DocConverter {}

impl DocConverter {
    /// Builds a document from one row image, projecting `fields`
    /// (all columns when empty).
    pub fn row_to_document(columns: &[TableColumn], row: &[ColValue], fields: &[String]) -> Document {
        let mut doc = Document::new();
        for (i, column) in columns.iter().enumerate() {
            if !fields.is_empty() && !fields.contains(&column.name) {
                continue;
            }
            let value = row.get(i).cloned().unwrap_or(ColValue::None);
            doc.insert(
                column.name.clone(),
                Self::col_value_to_doc_value(value, &column.col_type),
            );
        }
        doc
    }

    pub fn col_value_to_doc_value(value: ColValue, col_type: &ColType) -> Value {
        match col_type {
            ColType::Enum { values } => Self::enum_to_doc_value(value, values),
            ColType::Set { values } => Self::set_to_doc_value(value, values),
            ColType::Bit => Self::bit_to_doc_value(value),
            ColType::Json => Self::json_to_doc_value(value),
            ColType::DateTime | ColType::Timestamp => Self::datetime_to_doc_value(value),
            ColType::Date => Self::date_to_doc_value(value),
            _ => Self::raw_to_doc_value(value),
        }
    }

    /// The upsert/delete key sent to the index: strings as-is, everything
    /// else in its JSON encoding.
    pub fn doc_value_to_key(value: &Value) -> String {
        match value {
            Value::String(v) => v.clone(),
            v => v.to_string(),
        }
    }

    fn enum_to_doc_value(value: ColValue, values: &[String]) -> Value {
        match value {
            // binlog path: 1-based index into the value table
            ColValue::Enum(i) => {
                if i >= 1 && (i as usize) <= values.len() {
                    Value::String(values[i as usize - 1].clone())
                } else {
                    log_warn!("enum index {} out of range, value table has {} entries", i, values.len());
                    Value::String(String::new())
                }
            }
            ColValue::Enum2(v) | ColValue::String(v) => Value::String(v),
            ColValue::RawString(v) => Value::String(String::from_utf8_lossy(&v).into_owned()),
            other => Self::raw_to_doc_value(other),
        }
    }

    fn set_to_doc_value(value: ColValue, values: &[String]) -> Value {
        match value {
            // binlog path: bit i set means membership of values[i]
            ColValue::Set(mask) => {
                let members: Vec<&str> = values
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i < 64 && mask >> *i & 1 == 1)
                    .map(|(_, v)| v.as_str())
                    .collect();
                Value::String(members.join(","))
            }
            ColValue::Set2(v) | ColValue::String(v) => Value::String(v),
            ColValue::RawString(v) => Value::String(String::from_utf8_lossy(&v).into_owned()),
            other => Self::raw_to_doc_value(other),
        }
    }

    fn bit_to_doc_value(value: ColValue) -> Value {
        match value {
            ColValue::Bit(v) => Value::Number(v.into()),
            // snapshot path delivers the raw byte
            ColValue::RawString(v) if v.as_slice() == [0x01] => Value::Number(1.into()),
            ColValue::RawString(v) if v.as_slice() == [0x00] => Value::Number(0.into()),
            ColValue::String(v) if v.as_bytes() == [0x01] => Value::Number(1.into()),
            ColValue::String(v) if v.as_bytes() == [0x00] => Value::Number(0.into()),
            other => Self::raw_to_doc_value(other),
        }
    }

    fn json_to_doc_value(value: ColValue) -> Value {
        match value {
            ColValue::Json(v) => match serde_json::from_slice::<Value>(&v) {
                Ok(parsed) => parsed,
                Err(_) => Value::String(String::from_utf8_lossy(&v).into_owned()),
            },
            ColValue::Json2(v) | ColValue::String(v) => match serde_json::from_str::<Value>(&v) {
                Ok(parsed) => parsed,
                Err(_) => Value::String(v),
            },
            ColValue::RawString(v) => match serde_json::from_slice::<Value>(&v) {
                Ok(parsed) => parsed,
                Err(_) => Value::String(String::from_utf8_lossy(&v).into_owned()),
            },
            other => Self::raw_to_doc_value(other),
        }
    }

    fn datetime_to_doc_value(value: ColValue) -> Value {
        match value {
            ColValue::DateTime(v) | ColValue::Timestamp(v) | ColValue::String(v) => {
                match Self::parse_local_datetime(&v) {
                    Some(formatted) => Value::String(formatted),
                    None => Value::Null,
                }
            }
            ColValue::RawString(v) => {
                let text = String::from_utf8_lossy(&v);
                match Self::parse_local_datetime(&text) {
                    Some(formatted) => Value::String(formatted),
                    None => Value::Null,
                }
            }
            ColValue::None => Value::Null,
            other => Self::raw_to_doc_value(other),
        }
    }

    fn date_to_doc_value(value: ColValue) -> Value {
        match value {
            ColValue::Date(v) | ColValue::String(v) => match Self::parse_date(&v) {
                Some(formatted) => Value::String(formatted),
                None => Value::Null,
            },
            ColValue::RawString(v) => {
                let text = String::from_utf8_lossy(&v);
                match Self::parse_date(&text) {
                    Some(formatted) => Value::String(formatted),
                    None => Value::Null,
                }
            }
            ColValue::None => Value::Null,
            other => Self::raw_to_doc_value(other),
        }
    }

    /// Canonical MySQL text form, interpreted in the local time zone,
    /// rendered as RFC 3339. The zero timestamp and unparseable input
    /// normalize to None.
    fn parse_local_datetime(text: &str) -> Option<String> {
        let text = text.trim();
        if text.starts_with(ZERO_DATE) {
            return None;
        }
        let naive = NaiveDateTime::parse_from_str(text, DATETIME_FORMAT).ok()?;
        match Local.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Some(dt.to_rfc3339()),
            LocalResult::Ambiguous(dt, _) => Some(dt.to_rfc3339()),
            LocalResult::None => None,
        }
    }

    fn parse_date(text: &str) -> Option<String> {
        let text = text.trim();
        if text.starts_with(ZERO_DATE) {
            return None;
        }
        let date = NaiveDate::parse_from_str(text, DATE_FORMAT).ok()?;
        Some(date.format(DATE_FORMAT).to_string())
    }

    fn raw_to_doc_value(value: ColValue) -> Value {
        match value {
            ColValue::None => Value::Null,
            ColValue::Bool(v) => Value::Bool(v),
            ColValue::Tiny(v) => Value::Number(v.into()),
            ColValue::UnsignedTiny(v) => Value::Number(v.into()),
            ColValue::Short(v) => Value::Number(v.into()),
            ColValue::UnsignedShort(v) => Value::Number(v.into()),
            ColValue::Long(v) => Value::Number(v.into()),
            ColValue::UnsignedLong(v) => Value::Number(v.into()),
            ColValue::LongLong(v) => Value::Number(v.into()),
            ColValue::UnsignedLongLong(v) => Value::Number(v.into()),
            ColValue::Float(v) => match Number::from_f64(v as f64) {
                Some(num) => Value::Number(num),
                None => Value::String(v.to_string()),
            },
            ColValue::Double(v) => match Number::from_f64(v) {
                Some(num) => Value::Number(num),
                None => Value::String(v.to_string()),
            },
            ColValue::Decimal(v)
            | ColValue::Time(v)
            | ColValue::Date(v)
            | ColValue::DateTime(v)
            | ColValue::Timestamp(v)
            | ColValue::Set2(v)
            | ColValue::Enum2(v)
            | ColValue::Json2(v)
            | ColValue::String(v) => Value::String(v),
            ColValue::Year(v) => Value::Number(v.into()),
            ColValue::RawString(v) | ColValue::Blob(v) | ColValue::Json(v) => {
                Value::String(String::from_utf8_lossy(&v).into_owned())
            }
            ColValue::Bit(v) | ColValue::Set(v) => Value::Number(v.into()),
            ColValue::Enum(v) => Value::Number(v.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn enum_type(values: &[&str]) -> ColType {
        ColType::Enum {
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn set_type(values: &[&str]) -> ColType {
        ColType::Set {
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn test_enum_decode() {
        let col_type = enum_type(&["draft", "published", "archived"]);
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Enum(2), &col_type),
            json!("published")
        );
        // snapshot path passes the string through
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Enum2("draft".into()), &col_type),
            json!("draft")
        );
    }

    #[test]
    fn test_enum_out_of_range() {
        let col_type = enum_type(&["a", "b"]);
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Enum(3), &col_type),
            json!("")
        );
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Enum(0), &col_type),
            json!("")
        );
    }

    #[test]
    fn test_set_decode() {
        let col_type = set_type(&["red", "green", "blue"]);
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Set(0b101), &col_type),
            json!("red,blue")
        );
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Set(0), &col_type),
            json!("")
        );
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Set2("red,green".into()), &col_type),
            json!("red,green")
        );
    }

    #[test]
    fn test_bit_decode() {
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Bit(1), &ColType::Bit),
            json!(1)
        );
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::RawString(vec![0x01]), &ColType::Bit),
            json!(1)
        );
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::RawString(vec![0x00]), &ColType::Bit),
            json!(0)
        );
    }

    #[test]
    fn test_string_invalid_utf8_is_replaced() {
        let value = ColValue::RawString(vec![b'a', 0xff, b'b']);
        let result = DocConverter::col_value_to_doc_value(value, &ColType::String);
        assert_eq!(result, json!("a\u{fffd}b"));
    }

    #[test]
    fn test_json_parse_and_fallback() {
        let parsed = DocConverter::col_value_to_doc_value(
            ColValue::Json2(r#"{"name":"Alice","age":30}"#.into()),
            &ColType::Json,
        );
        assert_eq!(parsed, json!({"name": "Alice", "age": 30}));

        let fallback =
            DocConverter::col_value_to_doc_value(ColValue::Json2("not json".into()), &ColType::Json);
        assert_eq!(fallback, json!("not json"));
    }

    #[test]
    fn test_datetime_normalization() {
        let result = DocConverter::col_value_to_doc_value(
            ColValue::DateTime("2024-05-20 12:34:56".into()),
            &ColType::DateTime,
        );
        let formatted = result.as_str().unwrap();
        let parsed = DateTime::parse_from_rfc3339(formatted).unwrap();
        assert_eq!(
            parsed.naive_local().format("%Y-%m-%d %H:%M:%S").to_string(),
            "2024-05-20 12:34:56"
        );

        // fractional seconds survive
        let result = DocConverter::col_value_to_doc_value(
            ColValue::Timestamp("2024-05-20 12:34:56.250000".into()),
            &ColType::Timestamp,
        );
        assert!(result.as_str().unwrap().contains("12:34:56.25"));
    }

    #[test]
    fn test_zero_and_invalid_datetime_is_null() {
        assert_eq!(
            DocConverter::col_value_to_doc_value(
                ColValue::DateTime("0000-00-00 00:00:00".into()),
                &ColType::DateTime,
            ),
            Value::Null
        );
        assert_eq!(
            DocConverter::col_value_to_doc_value(
                ColValue::Timestamp("garbage".into()),
                &ColType::Timestamp,
            ),
            Value::Null
        );
    }

    #[test]
    fn test_date_normalization() {
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Date("2024-05-20".into()), &ColType::Date),
            json!("2024-05-20")
        );
        assert_eq!(
            DocConverter::col_value_to_doc_value(ColValue::Date("0000-00-00".into()), &ColType::Date),
            Value::Null
        );
    }

    #[test]
    fn test_row_to_document_projection() {
        let columns = Arc::new(vec![
            TableColumn {
                name: "id".into(),
                col_type: ColType::Long,
            },
            TableColumn {
                name: "title".into(),
                col_type: ColType::String,
            },
            TableColumn {
                name: "internal".into(),
                col_type: ColType::String,
            },
        ]);
        let row = vec![
            ColValue::Long(7),
            ColValue::String("dune".into()),
            ColValue::String("hidden".into()),
        ];

        let fields = vec!["id".to_string(), "title".to_string()];
        let doc = DocConverter::row_to_document(&columns, &row, &fields);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc["id"], json!(7));
        assert_eq!(doc["title"], json!("dune"));

        // empty projection keeps every column
        let doc = DocConverter::row_to_document(&columns, &row, &[]);
        assert_eq!(doc.len(), 3);
    }

    #[test]
    fn test_determinism() {
        let col_type = enum_type(&["a", "b"]);
        let first = DocConverter::col_value_to_doc_value(ColValue::Enum(2), &col_type);
        let second = DocConverter::col_value_to_doc_value(ColValue::Enum(2), &col_type);
        assert_eq!(first, second);
    }

    #[test]
    fn test_doc_value_to_key() {
        assert_eq!(DocConverter::doc_value_to_key(&json!("42")), "42");
        assert_eq!(DocConverter::doc_value_to_key(&json!(42)), "42");
        assert_eq!(DocConverter::doc_value_to_key(&json!(true)), "true");
    }
}

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::model::FieldType;

/// A document value tree. The scalar kinds form a closed set: every kind maps
/// onto exactly one [`FieldType`] (and therefore one physical column type).
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Instant(DateTime<Utc>),
    Decimal128(i128),
    ObjectId([u8; 12]),
    DbTimestamp { secs: u32, ordinal: u32 },
    Javascript(String),
    Regex(String),
    MinKey,
    MaxKey,
    Document(Vec<(String, DocValue)>),
    Array(Vec<DocValue>),
}

impl DocValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            DocValue::Null => FieldType::Null,
            DocValue::Boolean(_) => FieldType::Boolean,
            DocValue::Integer(_) => FieldType::Integer,
            DocValue::Long(_) => FieldType::Long,
            DocValue::Double(_) => FieldType::Double,
            DocValue::String(_) => FieldType::String,
            DocValue::Binary(_) => FieldType::Binary,
            DocValue::Date(_) => FieldType::Date,
            DocValue::Time(_) => FieldType::Time,
            DocValue::Instant(_) => FieldType::Instant,
            DocValue::Decimal128(_) => FieldType::Decimal128,
            DocValue::ObjectId(_) => FieldType::ObjectId,
            DocValue::DbTimestamp { .. } => FieldType::DbTimestamp,
            DocValue::Javascript(_) => FieldType::Javascript,
            DocValue::Regex(_) => FieldType::Regex,
            DocValue::MinKey => FieldType::MinKey,
            DocValue::MaxKey => FieldType::MaxKey,
            DocValue::Document(_) | DocValue::Array(_) => FieldType::Child,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, DocValue::Document(_) | DocValue::Array(_))
    }
}

/// Lossy JSON conversion for callers feeding JSON payloads: integers that fit
/// in 32 bits become `Integer`, larger ones `Long`, everything else `Double`.
impl From<serde_json::Value> for DocValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DocValue::Null,
            serde_json::Value::Bool(b) => DocValue::Boolean(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        DocValue::Integer(i as i32)
                    } else {
                        DocValue::Long(i)
                    }
                } else {
                    DocValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => DocValue::String(s),
            serde_json::Value::Array(items) => {
                DocValue::Array(items.into_iter().map(DocValue::from).collect())
            }
            serde_json::Value::Object(entries) => DocValue::Document(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, DocValue::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_number_widths() {
        let doc = DocValue::from(serde_json::json!({
            "small": 42,
            "large": 5_000_000_000_i64,
            "fraction": 0.5
        }));

        let DocValue::Document(entries) = doc else {
            panic!("expected a document")
        };
        let type_of = |name: &str| {
            entries
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.field_type())
                .unwrap()
        };
        assert_eq!(type_of("small"), FieldType::Integer);
        assert_eq!(type_of("large"), FieldType::Long);
        assert_eq!(type_of("fraction"), FieldType::Double);
    }

    #[test]
    fn test_container_types() {
        assert_eq!(DocValue::Document(vec![]).field_type(), FieldType::Child);
        assert_eq!(DocValue::Array(vec![]).field_type(), FieldType::Child);
        assert!(!DocValue::Null.is_container());
    }
}

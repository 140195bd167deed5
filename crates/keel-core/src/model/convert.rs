//! Conversion between semantic values and raw storage values
//!
//! Raw values are restricted to `Null`, `Integer`, `Float`, `Text` and
//! `Bytes`. Dates are stored as `YYYY-MM-DD`, timestamps as RFC 3339 UTC
//! with microsecond precision (so text order equals time order), UUIDs in
//! hyphenated form, booleans as 0/1.

use crate::codec::FieldCodec;
use crate::model::types::SemanticType;
use crate::model::value::Value;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn mismatch(ty: &SemanticType, value: &Value) -> String {
    format!("expected {}, found {}", ty.name(), value.type_name())
}

/// Semantic value to raw storage value
///
/// `codec` must be supplied for [`SemanticType::Custom`] fields.
pub fn to_storage(
    ty: &SemanticType,
    value: &Value,
    codec: Option<&dyn FieldCodec>,
) -> std::result::Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match (ty, value) {
        (SemanticType::Integer, Value::Integer(v)) => Ok(Value::Integer(*v)),
        (SemanticType::Float, Value::Float(v)) => Ok(Value::Float(*v)),
        (SemanticType::Float, Value::Integer(v)) => Ok(Value::Float(*v as f64)),
        (SemanticType::Text | SemanticType::Email, Value::Text(s)) => Ok(Value::Text(s.clone())),
        (SemanticType::Boolean, Value::Boolean(b)) => Ok(Value::Integer(i64::from(*b))),
        (SemanticType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b.clone())),
        (SemanticType::Date, Value::Date(d)) => Ok(Value::Text(d.format(DATE_FORMAT).to_string())),
        (SemanticType::DateTime, Value::DateTime(dt)) => Ok(Value::Text(
            dt.to_rfc3339_opts(SecondsFormat::Micros, true),
        )),
        (SemanticType::Uuid, Value::Uuid(u)) => Ok(Value::Text(u.hyphenated().to_string())),
        (SemanticType::Enum(def), Value::Enum(name)) => def
            .raw_for(name)
            .ok_or_else(|| format!("{} is not a member of {}", name, def.name)),
        (SemanticType::Flags(def), Value::Flags(bits)) => {
            if bits & !def.all_bits() != 0 {
                Err(format!("{:#b} has bits outside {}", bits, def.name))
            } else {
                Ok(Value::Integer(*bits))
            }
        }
        (SemanticType::Custom(name), value) => match codec {
            Some(codec) => codec.to_storage(value),
            None => Err(format!("no codec registered under '{}'", name)),
        },
        (ty, value) => Err(mismatch(ty, value)),
    }
}

/// Raw storage value to semantic value
pub fn from_storage(
    ty: &SemanticType,
    raw: Value,
    codec: Option<&dyn FieldCodec>,
) -> std::result::Result<Value, String> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match (ty, raw) {
        (SemanticType::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
        (SemanticType::Float, Value::Float(v)) => Ok(Value::Float(v)),
        (SemanticType::Float, Value::Integer(v)) => Ok(Value::Float(v as f64)),
        (SemanticType::Text | SemanticType::Email, Value::Text(s)) => Ok(Value::Text(s)),
        (SemanticType::Boolean, Value::Integer(v)) => Ok(Value::Boolean(v != 0)),
        (SemanticType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
        (SemanticType::Bytes, Value::Text(s)) => Ok(Value::Bytes(s.into_bytes())),
        (SemanticType::Date, Value::Text(s)) => NaiveDate::parse_from_str(&s, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|e| format!("bad stored date '{}': {}", s, e)),
        (SemanticType::DateTime, Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|e| format!("bad stored datetime '{}': {}", s, e)),
        (SemanticType::Uuid, Value::Text(s)) => Uuid::parse_str(&s)
            .map(Value::Uuid)
            .map_err(|e| format!("bad stored uuid '{}': {}", s, e)),
        (SemanticType::Uuid, Value::Bytes(b)) => Uuid::from_slice(&b)
            .map(Value::Uuid)
            .map_err(|e| format!("bad stored uuid bytes: {}", e)),
        (SemanticType::Enum(def), raw) => match def.member_for_raw(&raw) {
            Some(member) => Ok(Value::Enum(member.name.clone())),
            None => def
                .fallback
                .clone()
                .map(Value::Enum)
                .ok_or_else(|| format!("{} is not a stored value of {}", raw, def.name)),
        },
        (SemanticType::Flags(_), Value::Integer(bits)) => Ok(Value::Flags(bits)),
        (SemanticType::Custom(name), raw) => match codec {
            Some(codec) => codec.to_field(raw),
            None => Err(format!("no codec registered under '{}'", name)),
        },
        (ty, raw) => Err(mismatch(ty, &raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::model::types::{EnumDef, EnumRepr, FlagsDef};
    use chrono::TimeZone;

    #[test]
    fn test_datetime_text_is_sortable() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 11, 2, 3, 4, 5).unwrap();
        let a = to_storage(&SemanticType::DateTime, &Value::DateTime(early), None).unwrap();
        let b = to_storage(&SemanticType::DateTime, &Value::DateTime(late), None).unwrap();
        assert_eq!(a, Value::Text("2024-01-02T03:04:05.000000Z".to_string()));
        assert!(a.as_str() < b.as_str());
        assert_eq!(
            from_storage(&SemanticType::DateTime, a, None).unwrap(),
            Value::DateTime(early)
        );
    }

    #[test]
    fn test_boolean_stored_as_integer() {
        assert_eq!(
            to_storage(&SemanticType::Boolean, &Value::Boolean(true), None).unwrap(),
            Value::Integer(1)
        );
        assert_eq!(
            from_storage(&SemanticType::Boolean, Value::Integer(0), None).unwrap(),
            Value::Boolean(false)
        );
    }

    #[test]
    fn test_enum_fallback_on_unknown_stored_value() {
        let def = EnumDef::new("Level", EnumRepr::Integer)
            .int_member("LOW", 1)
            .int_member("HIGH", 2)
            .int_member("UNKNOWN", -1)
            .with_fallback("UNKNOWN");
        let ty = SemanticType::Enum(def.clone());
        assert_eq!(
            to_storage(&ty, &Value::Enum("HIGH".into()), None).unwrap(),
            Value::Integer(2)
        );
        assert_eq!(
            from_storage(&ty, Value::Integer(99), None).unwrap(),
            Value::Enum("UNKNOWN".into())
        );

        let strict = SemanticType::Enum(EnumDef { fallback: None, ..def });
        assert!(from_storage(&strict, Value::Integer(99), None).is_err());
    }

    #[test]
    fn test_flags_outside_declared_bits_rejected() {
        let ty = SemanticType::Flags(FlagsDef::new("Access").flag("READ", 1).flag("WRITE", 2));
        assert!(to_storage(&ty, &Value::Flags(3), None).is_ok());
        assert!(to_storage(&ty, &Value::Flags(8), None).is_err());
    }

    #[test]
    fn test_custom_requires_codec() {
        let ty = SemanticType::Custom("json".into());
        let value = Value::Json(serde_json::json!([1]));
        assert!(to_storage(&ty, &value, None).is_err());
        assert_eq!(
            to_storage(&ty, &value, Some(&JsonCodec)).unwrap(),
            Value::Text("[1]".into())
        );
    }

    #[test]
    fn test_mismatch_message() {
        let err = to_storage(&SemanticType::Integer, &Value::Text("x".into()), None).unwrap_err();
        assert_eq!(err, "expected integer, found text");
    }
}

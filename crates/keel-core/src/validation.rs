//! Validation collaborator
//!
//! Every value entering an instance passes through a [`Validator`]. The
//! core treats it as a black box: whatever it returns is stored, whatever
//! it rejects surfaces as a `Validation` error carrying its message.

use crate::model::{FieldDef, SemanticType, Value};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

pub trait Validator: Send + Sync {
    /// Check (and possibly coerce) one field value
    ///
    /// `Null` is only passed for fields that may be null; required-ness is
    /// enforced before the validator is called.
    fn validate(&self, field: &FieldDef, value: Value) -> std::result::Result<Value, String>;
}

/// Default validator: type checks with the usual lossless coercions
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardValidator;

impl Validator for StandardValidator {
    fn validate(&self, field: &FieldDef, value: Value) -> std::result::Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let found = value.type_name();
        let expected = field.ty.name();
        let reject = || format!("expected {}, found {}", expected, found);

        match (&field.ty, value) {
            (SemanticType::Integer, Value::Integer(v)) => Ok(Value::Integer(v)),
            (SemanticType::Integer, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Ok(Value::Integer(f as i64))
            }
            (SemanticType::Integer, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("'{}' is not an integer", s)),

            (SemanticType::Float, Value::Float(f)) => Ok(Value::Float(f)),
            (SemanticType::Float, Value::Integer(v)) => Ok(Value::Float(v as f64)),
            (SemanticType::Float, Value::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("'{}' is not a number", s)),

            (SemanticType::Text, Value::Text(s)) => Ok(Value::Text(s)),
            (SemanticType::Email, Value::Text(s)) => validate_email(&s).map(|_| Value::Text(s)),

            (SemanticType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
            (SemanticType::Boolean, Value::Integer(0)) => Ok(Value::Boolean(false)),
            (SemanticType::Boolean, Value::Integer(1)) => Ok(Value::Boolean(true)),
            (SemanticType::Boolean, Value::Text(s)) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Boolean(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Boolean(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },

            (SemanticType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (SemanticType::Bytes, Value::Text(s)) => Ok(Value::Bytes(s.into_bytes())),

            (SemanticType::Date, Value::Date(d)) => Ok(Value::Date(d)),
            (SemanticType::Date, Value::Text(s)) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| format!("'{}' is not an ISO date", s)),

            (SemanticType::DateTime, Value::DateTime(dt)) => Ok(Value::DateTime(dt)),
            (SemanticType::DateTime, Value::Text(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
                .map_err(|_| format!("'{}' is not an RFC 3339 timestamp", s)),
            (SemanticType::DateTime, Value::Integer(secs)) => {
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .map(Value::DateTime)
                    .ok_or_else(|| format!("{} is out of range for a timestamp", secs))
            }

            (SemanticType::Uuid, Value::Uuid(u)) => Ok(Value::Uuid(u)),
            (SemanticType::Uuid, Value::Text(s)) => Uuid::parse_str(&s)
                .map(Value::Uuid)
                .map_err(|_| format!("'{}' is not a uuid", s)),

            (SemanticType::Enum(def), Value::Enum(name)) => match def.member(&name) {
                Some(_) => Ok(Value::Enum(name)),
                None => Err(format!("{} is not a member of {}", name, def.name)),
            },
            (SemanticType::Enum(def), raw @ (Value::Text(_) | Value::Integer(_))) => {
                let named = raw.as_str().and_then(|s| def.member(s));
                if let Some(member) = named {
                    return Ok(Value::Enum(member.name.clone()));
                }
                def.member_for_raw(&raw)
                    .map(|m| Value::Enum(m.name.clone()))
                    .ok_or_else(|| format!("{} is not a member of {}", raw, def.name))
            }

            (SemanticType::Flags(def), Value::Flags(bits) | Value::Integer(bits)) => {
                if bits < 0 || bits & !def.all_bits() != 0 {
                    Err(format!("{} has bits outside {}", bits, def.name))
                } else {
                    Ok(Value::Flags(bits))
                }
            }
            (SemanticType::Flags(def), Value::Enum(name)) => def
                .bit(&name)
                .map(Value::Flags)
                .ok_or_else(|| format!("{} is not a flag of {}", name, def.name)),
            (SemanticType::Flags(def), Value::Text(s)) => {
                let mut bits = 0;
                for part in s.split('|').map(str::trim).filter(|p| !p.is_empty()) {
                    bits |= def
                        .bit(part)
                        .ok_or_else(|| format!("{} is not a flag of {}", part, def.name))?;
                }
                Ok(Value::Flags(bits))
            }

            (SemanticType::Custom(_), value) => Ok(value),

            _ => Err(reject()),
        }
    }
}

fn validate_email(s: &str) -> std::result::Result<(), String> {
    let invalid = || format!("'{}' is not a valid email address", s);
    if s.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = s.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

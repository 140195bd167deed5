//! Custom field codecs
//!
//! A codec owns the mapping between a custom semantic value and the raw
//! value kept in storage. Codecs are registered by name with the schema
//! registry; fields refer to them through [`SemanticType::Custom`].
//!
//! [`SemanticType::Custom`]: crate::model::SemanticType::Custom

use crate::model::{StorageType, Value};

pub trait FieldCodec: Send + Sync + std::fmt::Debug {
    /// Column affinity of the stored form
    fn storage_type(&self) -> StorageType;

    /// Field value to raw storage value
    fn to_storage(&self, value: &Value) -> std::result::Result<Value, String>;

    /// Raw storage value back to a field value
    fn to_field(&self, stored: Value) -> std::result::Result<Value, String>;
}

/// Structured values kept as JSON text
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl FieldCodec for JsonCodec {
    fn storage_type(&self) -> StorageType {
        StorageType::Text
    }

    fn to_storage(&self, value: &Value) -> std::result::Result<Value, String> {
        match value {
            Value::Json(json) => serde_json::to_string(json)
                .map(Value::Text)
                .map_err(|e| e.to_string()),
            other => Err(format!("expected json, found {}", other.type_name())),
        }
    }

    fn to_field(&self, stored: Value) -> std::result::Result<Value, String> {
        match stored {
            Value::Text(text) => serde_json::from_str(&text)
                .map(Value::Json)
                .map_err(|e| e.to_string()),
            other => Err(format!("expected json text, found {}", other.type_name())),
        }
    }
}

//! Semantic field types and their storage mapping

use crate::model::value::Value;

/// Column affinity in the relational store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Integer,
    Real,
    Text,
    Blob,
}

impl StorageType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            StorageType::Integer => "INTEGER",
            StorageType::Real => "REAL",
            StorageType::Text => "TEXT",
            StorageType::Blob => "BLOB",
        }
    }
}

/// How enum members are written to storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumRepr {
    Integer,
    Text,
}

/// Stored representation of one enum member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumValue {
    Integer(i64),
    Text(String),
}

impl EnumValue {
    fn to_raw(&self) -> Value {
        match self {
            EnumValue::Integer(v) => Value::Integer(*v),
            EnumValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    pub value: EnumValue,
}

/// A closed set of named members
///
/// Loading a stored value that matches no member yields the `fallback`
/// member when one is declared, and a validation error otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub repr: EnumRepr,
    pub members: Vec<EnumMember>,
    pub fallback: Option<String>,
}

impl EnumDef {
    pub fn new(name: impl Into<String>, repr: EnumRepr) -> Self {
        Self {
            name: name.into(),
            repr,
            members: Vec::new(),
            fallback: None,
        }
    }

    /// Add an integer-valued member
    pub fn int_member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.members.push(EnumMember {
            name: name.into(),
            value: EnumValue::Integer(value),
        });
        self
    }

    /// Add a text-valued member
    pub fn text_member(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.members.push(EnumMember {
            name: name.into(),
            value: EnumValue::Text(value.into()),
        });
        self
    }

    pub fn with_fallback(mut self, member: impl Into<String>) -> Self {
        self.fallback = Some(member.into());
        self
    }

    pub fn member(&self, name: &str) -> Option<&EnumMember> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Member whose stored value equals `raw`
    pub fn member_for_raw(&self, raw: &Value) -> Option<&EnumMember> {
        self.members.iter().find(|m| match (&m.value, raw) {
            (EnumValue::Integer(a), Value::Integer(b)) => a == b,
            (EnumValue::Text(a), Value::Text(b)) => a == b,
            _ => false,
        })
    }

    /// Stored value for a member name
    pub fn raw_for(&self, name: &str) -> Option<Value> {
        self.member(name).map(|m| m.value.to_raw())
    }
}

/// Named bit flags stored as one integer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagsDef {
    pub name: String,
    pub members: Vec<(String, i64)>,
}

impl FlagsDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn flag(mut self, name: impl Into<String>, bit: i64) -> Self {
        self.members.push((name.into(), bit));
        self
    }

    pub fn bit(&self, name: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bit)| *bit)
    }

    /// Union of every declared bit
    pub fn all_bits(&self) -> i64 {
        self.members.iter().fold(0, |acc, (_, bit)| acc | bit)
    }

    /// Names of the members set in `bits`, in declaration order
    pub fn names_of(&self, bits: i64) -> Vec<&str> {
        self.members
            .iter()
            .filter(|(_, bit)| bits & bit == *bit)
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

/// The type a field presents to callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Email,
    Boolean,
    Bytes,
    Date,
    DateTime,
    Uuid,
    Enum(EnumDef),
    Flags(FlagsDef),
    /// Named field codec registered with the schema registry
    Custom(String),
}

impl SemanticType {
    /// Human-readable type name for messages and DDL comments
    pub fn name(&self) -> String {
        match self {
            SemanticType::Integer => "integer".to_string(),
            SemanticType::Float => "float".to_string(),
            SemanticType::Text => "text".to_string(),
            SemanticType::Email => "email".to_string(),
            SemanticType::Boolean => "boolean".to_string(),
            SemanticType::Bytes => "bytes".to_string(),
            SemanticType::Date => "date".to_string(),
            SemanticType::DateTime => "datetime".to_string(),
            SemanticType::Uuid => "uuid".to_string(),
            SemanticType::Enum(def) => format!("enum {}", def.name),
            SemanticType::Flags(def) => format!("flags {}", def.name),
            SemanticType::Custom(codec) => format!("custom {}", codec),
        }
    }

    /// Types that may serve as a primary key
    pub fn is_keyable(&self) -> bool {
        matches!(
            self,
            SemanticType::Integer | SemanticType::Text | SemanticType::Uuid
        )
    }

    /// Types supporting `<`, `<=`, `>`, `>=` and ranges
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            SemanticType::Integer
                | SemanticType::Float
                | SemanticType::Text
                | SemanticType::Email
                | SemanticType::Date
                | SemanticType::DateTime
        )
    }

    /// Storage affinity for built-in types; custom types ask their codec
    pub fn builtin_storage_type(&self) -> Option<StorageType> {
        match self {
            SemanticType::Integer | SemanticType::Boolean | SemanticType::Flags(_) => {
                Some(StorageType::Integer)
            }
            SemanticType::Float => Some(StorageType::Real),
            SemanticType::Text
            | SemanticType::Email
            | SemanticType::Date
            | SemanticType::DateTime
            | SemanticType::Uuid => Some(StorageType::Text),
            SemanticType::Bytes => Some(StorageType::Blob),
            SemanticType::Enum(def) => Some(match def.repr {
                EnumRepr::Integer => StorageType::Integer,
                EnumRepr::Text => StorageType::Text,
            }),
            SemanticType::Custom(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color() -> EnumDef {
        EnumDef::new("Color", EnumRepr::Text)
            .text_member("RED", "red")
            .text_member("BLUE", "blue")
            .with_fallback("RED")
    }

    #[test]
    fn test_enum_lookup_both_directions() {
        let def = color();
        assert_eq!(def.raw_for("BLUE"), Some(Value::Text("blue".into())));
        assert_eq!(
            def.member_for_raw(&Value::Text("red".into())).map(|m| m.name.as_str()),
            Some("RED")
        );
        assert!(def.member_for_raw(&Value::Integer(1)).is_none());
    }

    #[test]
    fn test_flags_names_of() {
        let def = FlagsDef::new("Access")
            .flag("READ", 1)
            .flag("WRITE", 2)
            .flag("EXEC", 4);
        assert_eq!(def.all_bits(), 7);
        assert_eq!(def.names_of(5), vec!["READ", "EXEC"]);
    }

    #[test]
    fn test_storage_mapping() {
        assert_eq!(
            SemanticType::Boolean.builtin_storage_type(),
            Some(StorageType::Integer)
        );
        assert_eq!(
            SemanticType::Enum(color()).builtin_storage_type(),
            Some(StorageType::Text)
        );
        assert_eq!(SemanticType::Custom("json".into()).builtin_storage_type(), None);
        assert!(!SemanticType::Boolean.is_orderable());
        assert!(SemanticType::Uuid.is_keyable());
        assert!(!SemanticType::Float.is_keyable());
    }
}

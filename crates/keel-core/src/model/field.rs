//! Field declarations

use crate::model::types::{EnumDef, FlagsDef, SemanticType};
use crate::model::value::Value;

/// Value used when a field is omitted at construction
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Value(Value),
    /// Current timestamp (or date, for date fields)
    Now,
    /// Fresh random UUID
    NewUuid,
}

/// Referential action applied by the store when the target row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    #[default]
    Restrict,
    Cascade,
    SetNull,
}

impl OnDelete {
    pub fn sql(&self) -> &'static str {
        match self {
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
        }
    }
}

/// Foreign-key target of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub target: String,
    pub on_delete: OnDelete,
}

/// One declared field of a model
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub ty: SemanticType,
    pub required: bool,
    pub default: Option<DefaultValue>,
    pub unique: bool,
    pub indexed: bool,
    pub primary_key: bool,
    pub references: Option<ForeignKeyRef>,
}

impl FieldDef {
    /// Required field of the given type
    pub fn new(name: impl Into<String>, ty: SemanticType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            unique: false,
            indexed: false,
            primary_key: false,
            references: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Float)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Text)
    }

    pub fn email(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Email)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Boolean)
    }

    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Bytes)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::DateTime)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Uuid)
    }

    pub fn enumeration(name: impl Into<String>, def: EnumDef) -> Self {
        Self::new(name, SemanticType::Enum(def))
    }

    pub fn flags(name: impl Into<String>, def: FlagsDef) -> Self {
        Self::new(name, SemanticType::Flags(def))
    }

    pub fn custom(name: impl Into<String>, codec: impl Into<String>) -> Self {
        Self::new(name, SemanticType::Custom(codec.into()))
    }

    /// Integer foreign key to `target`'s primary key
    pub fn foreign_key(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::integer(name).references(target)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Value(value.into()));
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default = Some(DefaultValue::Now);
        self
    }

    pub fn default_uuid(mut self) -> Self {
        self.default = Some(DefaultValue::NewUuid);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.references = Some(ForeignKeyRef {
            target: target.into(),
            on_delete: OnDelete::default(),
        });
        self
    }

    /// Set the referential action; no effect unless `references` was called
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        if let Some(fk) = self.references.as_mut() {
            fk.on_delete = action;
        }
        self
    }

    /// Integer primary key assigned by the store on insert
    pub fn is_generated_key(&self) -> bool {
        self.primary_key && self.ty == SemanticType::Integer && self.default.is_none()
    }

    /// Whether the column may hold NULL
    pub fn is_nullable(&self) -> bool {
        !self.required && !self.primary_key
    }
}

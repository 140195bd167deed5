//! Schema file format v0
//!
//! Defines the YAML structure for declaring models outside of Rust code.

use serde::{Deserialize, Serialize};

/// Top-level schema file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFileV0 {
    /// Format version (must be 0 for this format)
    pub schema_version: u32,

    #[serde(default)]
    pub enums: Vec<EnumSpec>,

    #[serde(default)]
    pub flags: Vec<FlagsSpec>,

    pub models: Vec<ModelSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumSpec {
    pub name: String,

    /// `text` or `integer`; inferred from the member values when omitted
    #[serde(default)]
    pub repr: Option<String>,

    pub members: Vec<EnumMemberSpec>,

    /// Member used for stored values matching no member
    #[serde(default)]
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnumMemberSpec {
    pub name: String,
    pub value: MemberValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemberValue {
    Integer(i64),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagsSpec {
    pub name: String,
    pub members: Vec<FlagMemberSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlagMemberSpec {
    pub name: String,
    pub bit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSpec {
    pub name: String,

    /// Table name; snake_case of the model name when omitted
    #[serde(default)]
    pub table: Option<String>,

    #[serde(default)]
    pub versioned: bool,

    pub fields: Vec<FieldSpec>,

    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,

    #[serde(default)]
    pub relationships: Vec<RelationshipSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,

    /// `integer`, `float`, `text`, `email`, `boolean`, `bytes`, `date`,
    /// `datetime`, `uuid`, `enum:<Name>`, `flags:<Name>` or `custom:<codec>`
    #[serde(rename = "type")]
    pub ty: String,

    #[serde(default)]
    pub primary_key: bool,

    #[serde(default = "default_required")]
    pub required: bool,

    /// Literal default, or `now` / `new_uuid`
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,

    #[serde(default)]
    pub unique: bool,

    #[serde(default)]
    pub index: bool,

    /// Target model of a foreign key
    #[serde(default)]
    pub references: Option<String>,

    /// `restrict`, `cascade` or `set_null`
    #[serde(default)]
    pub on_delete: Option<String>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipSpec {
    pub name: String,

    /// `many_to_one`, `one_to_many`, `one_to_one`, `one_to_one_back` or
    /// `many_to_many`
    pub kind: String,

    pub target: String,

    /// Foreign-key field: this model's for many_to_one and one_to_one, the
    /// target's for one_to_many and one_to_one_back
    #[serde(default)]
    pub via: Option<String>,

    /// `lazy` (default) or `eager`
    #[serde(default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub optional: bool,

    /// Derived link table name for many_to_many
    #[serde(default)]
    pub link_table: Option<String>,

    /// Registered association model for many_to_many
    #[serde(default)]
    pub association: Option<AssociationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssociationSpec {
    pub model: String,
    pub local: String,
    pub remote: String,
}

//! Schema file parser with validation
//!
//! Parses YAML, checks the format version, resolves enum/flags references
//! and converts the result into model definitions.

use crate::errors::{io_error, schema_file_error, Result};
use crate::schema_file::format_v0::{
    EnumSpec, FieldSpec, FlagsSpec, MemberValue, ModelSpec, RelationshipSpec, SchemaFileV0,
};
use keel_core::model::{
    DefaultValue, EnumDef, EnumRepr, FieldDef, FlagsDef, ModelDefinition, OnDelete,
    RelationshipDef, SemanticType, Value,
};
use keel_core::validation::{StandardValidator, Validator};
use keel_core::{ExError, SchemaRegistry, TableDescriptor};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// Parse a schema file from a path
pub fn parse_schema_file(path: &Path) -> Result<SchemaFileV0> {
    let content = fs::read_to_string(path).map_err(|e| io_error("schema_file", e))?;
    parse_schema_str(&content)
}

/// Parse a schema file from a string
pub fn parse_schema_str(content: &str) -> Result<SchemaFileV0> {
    let file: SchemaFileV0 = serde_yaml::from_str(content)
        .map_err(|e| schema_file_error(&format!("YAML parse error: {}", e)))?;

    if file.schema_version != 0 {
        return Err(schema_file_error(&format!(
            "Unsupported schema_version: {}. Expected 0",
            file.schema_version
        )));
    }

    Ok(file)
}

/// Convert a parsed file into model definitions
///
/// # Errors
///
/// `InvalidSchema` for unknown type names, enum or flags references,
/// relationship kinds, strategies, on-delete actions, or defaults that do
/// not fit their field.
pub fn to_definitions(file: &SchemaFileV0) -> Result<Vec<ModelDefinition>> {
    let enums = build_enums(&file.enums)?;
    let flags = build_flags(&file.flags)?;

    let mut seen = HashSet::new();
    let mut definitions = Vec::with_capacity(file.models.len());
    for model in &file.models {
        if !seen.insert(model.name.as_str()) {
            return Err(schema_file_error(&format!(
                "Model {} is declared twice",
                model.name
            )));
        }
        definitions.push(build_model(model, &enums, &flags)?);
    }
    Ok(definitions)
}

/// Parse, convert and register every model of a schema file atomically
pub fn load_into(registry: &mut SchemaRegistry, path: &Path) -> Result<Vec<TableDescriptor>> {
    let file = parse_schema_file(path)?;
    let definitions = to_definitions(&file)?;
    registry.register_all(definitions).map_err(ExError::from)
}

fn build_enums(specs: &[EnumSpec]) -> Result<HashMap<String, EnumDef>> {
    let mut out = HashMap::new();
    for spec in specs {
        let repr = match spec.repr.as_deref() {
            Some("text") => EnumRepr::Text,
            Some("integer") => EnumRepr::Integer,
            Some(other) => {
                return Err(schema_file_error(&format!(
                    "Enum {}: unknown repr '{}'",
                    spec.name, other
                )))
            }
            None if spec
                .members
                .iter()
                .all(|m| matches!(m.value, MemberValue::Integer(_))) =>
            {
                EnumRepr::Integer
            }
            None => EnumRepr::Text,
        };

        let mut def = EnumDef::new(spec.name.clone(), repr);
        for member in &spec.members {
            def = match (repr, &member.value) {
                (EnumRepr::Integer, MemberValue::Integer(v)) => def.int_member(&member.name, *v),
                (EnumRepr::Text, MemberValue::Text(s)) => def.text_member(&member.name, s),
                (EnumRepr::Text, MemberValue::Integer(v)) => {
                    def.text_member(&member.name, v.to_string())
                }
                (EnumRepr::Integer, MemberValue::Text(s)) => {
                    return Err(schema_file_error(&format!(
                        "Enum {}: member {} has text value '{}' but repr is integer",
                        spec.name, member.name, s
                    )))
                }
            };
        }
        if let Some(fallback) = &spec.fallback {
            if def.member(fallback).is_none() {
                return Err(schema_file_error(&format!(
                    "Enum {}: fallback {} is not a member",
                    spec.name, fallback
                )));
            }
            def = def.with_fallback(fallback);
        }
        if out.insert(spec.name.clone(), def).is_some() {
            return Err(schema_file_error(&format!(
                "Enum {} is declared twice",
                spec.name
            )));
        }
    }
    Ok(out)
}

fn build_flags(specs: &[FlagsSpec]) -> Result<HashMap<String, FlagsDef>> {
    let mut out = HashMap::new();
    for spec in specs {
        let mut def = FlagsDef::new(spec.name.clone());
        for member in &spec.members {
            if member.bit <= 0 || member.bit & (member.bit - 1) != 0 {
                return Err(schema_file_error(&format!(
                    "Flags {}: {} must be a single bit, got {}",
                    spec.name, member.name, member.bit
                )));
            }
            def = def.flag(&member.name, member.bit);
        }
        if out.insert(spec.name.clone(), def).is_some() {
            return Err(schema_file_error(&format!(
                "Flags {} is declared twice",
                spec.name
            )));
        }
    }
    Ok(out)
}

fn parse_type(
    ty: &str,
    enums: &HashMap<String, EnumDef>,
    flags: &HashMap<String, FlagsDef>,
) -> Result<SemanticType> {
    let parsed = match ty.split_once(':') {
        Some(("enum", name)) => enums.get(name).cloned().map(SemanticType::Enum),
        Some(("flags", name)) => flags.get(name).cloned().map(SemanticType::Flags),
        Some(("custom", codec)) if !codec.is_empty() => {
            Some(SemanticType::Custom(codec.to_string()))
        }
        Some(_) => None,
        None => match ty {
            "integer" => Some(SemanticType::Integer),
            "float" => Some(SemanticType::Float),
            "text" => Some(SemanticType::Text),
            "email" => Some(SemanticType::Email),
            "boolean" => Some(SemanticType::Boolean),
            "bytes" => Some(SemanticType::Bytes),
            "date" => Some(SemanticType::Date),
            "datetime" => Some(SemanticType::DateTime),
            "uuid" => Some(SemanticType::Uuid),
            _ => None,
        },
    };
    parsed.ok_or_else(|| schema_file_error(&format!("Unknown field type '{}'", ty)))
}

fn parse_on_delete(action: &str) -> Result<OnDelete> {
    match action {
        "restrict" => Ok(OnDelete::Restrict),
        "cascade" => Ok(OnDelete::Cascade),
        "set_null" => Ok(OnDelete::SetNull),
        other => Err(schema_file_error(&format!(
            "Unknown on_delete action '{}'",
            other
        ))),
    }
}

/// YAML scalar (or structure, for custom fields) to a field value
fn yaml_to_value(ty: &SemanticType, yaml: &serde_yaml::Value) -> Result<Value> {
    if let SemanticType::Custom(_) = ty {
        let json = serde_json::to_value(yaml)
            .map_err(|e| schema_file_error(&format!("Default is not valid JSON: {}", e)))?;
        return Ok(Value::Json(json));
    }
    match yaml {
        serde_yaml::Value::Null => Ok(Value::Null),
        serde_yaml::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => n
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| schema_file_error(&format!("Unsupported number {}", n))),
        },
        serde_yaml::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_yaml::Value::Sequence(items) if matches!(ty, SemanticType::Flags(_)) => {
            let names: Option<Vec<&str>> = items.iter().map(|i| i.as_str()).collect();
            names
                .map(|n| Value::Text(n.join("|")))
                .ok_or_else(|| schema_file_error("Flags defaults must list flag names"))
        }
        _ => Err(schema_file_error("Defaults must be scalars")),
    }
}

fn build_field(
    model: &str,
    spec: &FieldSpec,
    enums: &HashMap<String, EnumDef>,
    flags: &HashMap<String, FlagsDef>,
) -> Result<FieldDef> {
    let ty = parse_type(&spec.ty, enums, flags)
        .map_err(|e| schema_file_error(&format!("{}.{}: {}", model, spec.name, e.message())))?;
    let mut field = FieldDef::new(spec.name.clone(), ty);
    field.required = spec.required;
    field.primary_key = spec.primary_key;
    field.unique = spec.unique;
    field.indexed = spec.index;

    if let Some(target) = &spec.references {
        field = field.references(target.clone());
        if let Some(action) = &spec.on_delete {
            field = field.on_delete(parse_on_delete(action)?);
        }
    } else if spec.on_delete.is_some() {
        return Err(schema_file_error(&format!(
            "{}.{}: on_delete requires references",
            model, spec.name
        )));
    }

    field.default = match &spec.default {
        None => None,
        Some(serde_yaml::Value::String(s)) if s == "now" => Some(DefaultValue::Now),
        Some(serde_yaml::Value::String(s)) if s == "new_uuid" => Some(DefaultValue::NewUuid),
        Some(yaml) => {
            let raw = yaml_to_value(&field.ty, yaml)?;
            let value = StandardValidator.validate(&field, raw).map_err(|reason| {
                schema_file_error(&format!(
                    "{}.{}: invalid default: {}",
                    model, spec.name, reason
                ))
            })?;
            Some(DefaultValue::Value(value))
        }
    };

    match (&field.default, &field.ty) {
        (Some(DefaultValue::Now), SemanticType::Date | SemanticType::DateTime)
        | (Some(DefaultValue::NewUuid), SemanticType::Uuid) => {}
        (Some(DefaultValue::Now | DefaultValue::NewUuid), ty) => {
            return Err(schema_file_error(&format!(
                "{}.{}: generated default does not fit {}",
                model,
                spec.name,
                ty.name()
            )))
        }
        _ => {}
    }

    Ok(field)
}

fn build_relationship(model: &str, spec: &RelationshipSpec) -> Result<RelationshipDef> {
    let via = || {
        spec.via.clone().ok_or_else(|| {
            schema_file_error(&format!(
                "{}.{}: {} relationships need `via`",
                model, spec.name, spec.kind
            ))
        })
    };

    let mut rel = match spec.kind.as_str() {
        "many_to_one" => RelationshipDef::many_to_one(&spec.name, &spec.target, via()?),
        "one_to_many" => RelationshipDef::one_to_many(&spec.name, &spec.target, via()?),
        "one_to_one" => RelationshipDef::one_to_one(&spec.name, &spec.target, via()?),
        "one_to_one_back" => RelationshipDef::one_to_one_back(&spec.name, &spec.target, via()?),
        "many_to_many" => match (&spec.association, &spec.link_table) {
            (Some(_), Some(_)) => {
                return Err(schema_file_error(&format!(
                    "{}.{}: association and link_table are mutually exclusive",
                    model, spec.name
                )))
            }
            (Some(assoc), None) => RelationshipDef::many_to_many_through(
                &spec.name,
                &spec.target,
                &assoc.model,
                &assoc.local,
                &assoc.remote,
            ),
            (None, Some(table)) => {
                RelationshipDef::many_to_many(&spec.name, &spec.target).link_table(table)
            }
            (None, None) => RelationshipDef::many_to_many(&spec.name, &spec.target),
        },
        other => {
            return Err(schema_file_error(&format!(
                "{}.{}: unknown relationship kind '{}'",
                model, spec.name, other
            )))
        }
    };

    rel = match spec.strategy.as_deref() {
        None | Some("lazy") => rel.lazy(),
        Some("eager") => rel.eager(),
        Some(other) => {
            return Err(schema_file_error(&format!(
                "{}.{}: unknown strategy '{}'",
                model, spec.name, other
            )))
        }
    };
    if spec.optional {
        rel = rel.optional();
    }
    Ok(rel)
}

fn build_model(
    spec: &ModelSpec,
    enums: &HashMap<String, EnumDef>,
    flags: &HashMap<String, FlagsDef>,
) -> Result<ModelDefinition> {
    let mut def = ModelDefinition::new(spec.name.clone());
    if let Some(table) = &spec.table {
        def = def.table(table.clone());
    }
    if spec.versioned {
        def = def.versioned();
    }
    for field in &spec.fields {
        def = def.field(build_field(&spec.name, field, enums, flags)?);
    }
    for group in &spec.unique_together {
        def = def.unique_together(group.as_slice());
    }
    for rel in &spec.relationships {
        def = def.relationship(build_relationship(&spec.name, rel)?);
    }
    Ok(def)
}

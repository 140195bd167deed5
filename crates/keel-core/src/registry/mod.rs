//! Schema registry
//!
//! Owns every registered [`ModelDefinition`] and the [`TableDescriptor`]
//! derived from it. Registration validates the whole definition (types,
//! keys, foreign keys, relationships) before storing anything; a batch
//! registered through [`SchemaRegistry::register_all`] is stored entirely or
//! not at all. The registry is an explicit value: sessions share it behind
//! an `Arc` once registration is finished.

pub mod descriptor;

pub use descriptor::{
    AssociationTableDescriptor, ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor,
    LinkColumn, RelationshipDescriptor, RelationshipShape, TableDescriptor, VERSION_COLUMN,
};

use crate::codec::{FieldCodec, JsonCodec};
use crate::errors::{KeelError, Result};
use crate::model::convert;
use crate::model::definition::is_identifier;
use crate::model::{
    Association, DefaultValue, EnumRepr, EnumValue, FieldDef, ModelDefinition, OnDelete,
    RelationKind, SemanticType, StorageType, Value,
};
use crate::{log_op_end, log_op_error, log_op_start};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

/// Registered models plus the not-yet-committed batch being validated
struct SchemaView<'a> {
    existing: &'a HashMap<String, ModelDefinition>,
    fresh: &'a [ModelDefinition],
}

impl<'a> SchemaView<'a> {
    fn get(&self, name: &str) -> Option<&'a ModelDefinition> {
        self.existing
            .get(name)
            .or_else(|| self.fresh.iter().find(|d| d.name == name))
    }
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    definitions: HashMap<String, ModelDefinition>,
    descriptors: HashMap<String, TableDescriptor>,
    associations: BTreeMap<String, AssociationTableDescriptor>,
    order: Vec<String>,
    codecs: BTreeMap<String, Arc<dyn FieldCodec>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// Empty registry with the built-in `json` codec
    pub fn new() -> Self {
        let mut codecs: BTreeMap<String, Arc<dyn FieldCodec>> = BTreeMap::new();
        codecs.insert("json".to_string(), Arc::new(JsonCodec));
        Self {
            definitions: HashMap::new(),
            descriptors: HashMap::new(),
            associations: BTreeMap::new(),
            order: Vec::new(),
            codecs,
        }
    }

    /// Make a custom codec available to fields declared `custom <name>`
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the name is already taken.
    pub fn register_codec(
        &mut self,
        name: impl Into<String>,
        codec: Arc<dyn FieldCodec>,
    ) -> Result<()> {
        let name = name.into();
        if self.codecs.contains_key(&name) {
            return Err(KeelError::InvalidOperation {
                reason: format!("codec '{}' is already registered", name),
            });
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    /// Register one model
    ///
    /// Registering an identical definition again is a no-op.
    ///
    /// # Errors
    ///
    /// `DuplicateModel` for a conflicting re-registration, `InvalidSchema`
    /// when the definition cannot be mapped (see [`Self::register_all`]).
    pub fn register(&mut self, definition: ModelDefinition) -> Result<TableDescriptor> {
        let name = definition.name.clone();
        self.register_all(vec![definition])?;
        self.resolve(&name).cloned()
    }

    /// Register a group of models that may reference each other
    ///
    /// Either every definition is stored or none is.
    ///
    /// # Errors
    ///
    /// - `DuplicateModel` if a name is already registered with a different
    ///   definition (or appears twice in the batch with different definitions)
    /// - `InvalidSchema` if a field type has no storage mapping, a foreign key
    ///   or relationship targets an unregistered model, key types disagree,
    ///   the primary key is missing/duplicated/unkeyable, identifiers are
    ///   invalid, or table names collide
    pub fn register_all(
        &mut self,
        definitions: Vec<ModelDefinition>,
    ) -> Result<Vec<TableDescriptor>> {
        let start = Instant::now();
        log_op_start!("register", models = definitions.len());

        let result = self.register_batch(definitions);
        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(descriptors) => {
                log_op_end!("register", duration_ms = duration_ms, tables = descriptors.len());
            }
            Err(err) => {
                log_op_error!("register", err.clone(), duration_ms = duration_ms);
            }
        }
        result
    }

    fn register_batch(
        &mut self,
        definitions: Vec<ModelDefinition>,
    ) -> Result<Vec<TableDescriptor>> {
        let mut fresh: Vec<ModelDefinition> = Vec::new();
        let mut requested: Vec<String> = Vec::new();

        for def in definitions {
            if let Some(existing) = self.definitions.get(&def.name) {
                if *existing != def {
                    return Err(KeelError::DuplicateModel { model: def.name });
                }
                requested.push(def.name);
                continue;
            }
            if let Some(prev) = fresh.iter().find(|d| d.name == def.name) {
                if *prev != def {
                    return Err(KeelError::DuplicateModel { model: def.name });
                }
                continue;
            }
            requested.push(def.name.clone());
            fresh.push(def);
        }

        let view = SchemaView {
            existing: &self.definitions,
            fresh: &fresh,
        };

        let mut tables: HashSet<String> = self
            .descriptors
            .values()
            .map(|d| d.table.clone())
            .chain(self.associations.keys().cloned())
            .collect();
        let mut new_descriptors = Vec::with_capacity(fresh.len());
        let mut new_associations: BTreeMap<String, AssociationTableDescriptor> = BTreeMap::new();

        for def in &fresh {
            let (descriptor, links) = build_descriptor(def, &view, &self.codecs)?;
            if !tables.insert(descriptor.table.clone()) {
                return Err(KeelError::InvalidSchema {
                    model: def.name.clone(),
                    reason: format!("table name '{}' is already in use", descriptor.table),
                });
            }
            new_descriptors.push(descriptor);

            for link in links {
                let known = self
                    .associations
                    .get(&link.table)
                    .or_else(|| new_associations.get(&link.table));
                match known {
                    Some(existing) if existing.same_shape(&link) => {}
                    Some(_) => {
                        return Err(KeelError::InvalidSchema {
                            model: def.name.clone(),
                            reason: format!(
                                "link table '{}' is declared with different columns elsewhere",
                                link.table
                            ),
                        })
                    }
                    None => {
                        new_associations.insert(link.table.clone(), link);
                    }
                }
            }
        }

        for (table, link) in &new_associations {
            if new_descriptors.iter().any(|d| &d.table == table)
                || self.descriptors.values().any(|d| &d.table == table)
            {
                return Err(KeelError::InvalidSchema {
                    model: link.left.target_model.clone(),
                    reason: format!("link table '{}' collides with a model table", table),
                });
            }
        }

        // Everything validated: commit.
        for descriptor in new_descriptors {
            self.order.push(descriptor.model.clone());
            self.descriptors.insert(descriptor.model.clone(), descriptor);
        }
        for def in fresh {
            self.definitions.insert(def.name.clone(), def);
        }
        self.associations.extend(new_associations);

        requested
            .iter()
            .map(|name| self.resolve(name).cloned())
            .collect()
    }

    /// Descriptor of a registered model
    ///
    /// # Errors
    ///
    /// Returns `UnknownModel` if the model was never registered.
    pub fn resolve(&self, model: &str) -> Result<&TableDescriptor> {
        self.descriptors
            .get(model)
            .ok_or_else(|| KeelError::UnknownModel {
                model: model.to_string(),
            })
    }

    /// Definition of a registered model
    ///
    /// # Errors
    ///
    /// Returns `UnknownModel` if the model was never registered.
    pub fn definition(&self, model: &str) -> Result<&ModelDefinition> {
        self.definitions
            .get(model)
            .ok_or_else(|| KeelError::UnknownModel {
                model: model.to_string(),
            })
    }

    pub fn contains(&self, model: &str) -> bool {
        self.descriptors.contains_key(model)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Descriptors in registration order
    pub fn models(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.order.iter().filter_map(|name| self.descriptors.get(name))
    }

    /// Derived link tables, ordered by name
    pub fn associations(&self) -> impl Iterator<Item = &AssociationTableDescriptor> {
        self.associations.values()
    }

    pub fn association(&self, table: &str) -> Option<&AssociationTableDescriptor> {
        self.associations.get(table)
    }

    pub fn codec(&self, name: &str) -> Option<&dyn FieldCodec> {
        self.codecs.get(name).map(|c| c.as_ref())
    }

    /// Codec backing a custom type, `None` for built-in types
    pub fn codec_for(&self, ty: &SemanticType) -> Option<&dyn FieldCodec> {
        match ty {
            SemanticType::Custom(name) => self.codec(name),
            _ => None,
        }
    }

    /// Models whose rows must exist before rows of `model` (self excluded)
    pub fn dependencies(&self, model: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        if let Some(descriptor) = self.descriptors.get(model) {
            for fk in &descriptor.foreign_keys {
                if fk.target_model != model && !deps.contains(&fk.target_model.as_str()) {
                    deps.push(fk.target_model.as_str());
                }
            }
        }
        deps
    }

    /// Tables ordered parents before children
    ///
    /// Registration order breaks ties; models caught in a foreign-key cycle
    /// are emitted in registration order once nothing else is ready.
    pub fn dependency_order(&self) -> Vec<&TableDescriptor> {
        let names: Vec<&str> = self.order.iter().map(String::as_str).collect();
        let ordered = order_by_dependencies(&names, |m| self.dependencies(m));
        ordered
            .into_iter()
            .filter_map(|name| self.descriptors.get(name))
            .collect()
    }

    /// Encode a column value for storage
    ///
    /// # Errors
    ///
    /// `UnresolvedField` for an unknown column, `Validation` when the value
    /// does not fit the column's type.
    pub fn encode_column(
        &self,
        descriptor: &TableDescriptor,
        column: &str,
        value: &Value,
    ) -> Result<Value> {
        let col = descriptor
            .column(column)
            .ok_or_else(|| KeelError::UnresolvedField {
                model: descriptor.model.clone(),
                path: column.to_string(),
            })?;
        convert::to_storage(&col.ty, value, self.codec_for(&col.ty)).map_err(|reason| {
            KeelError::Validation {
                model: descriptor.model.clone(),
                field: column.to_string(),
                reason,
            }
        })
    }

    /// Decode a stored column value
    ///
    /// # Errors
    ///
    /// `UnresolvedField` for an unknown column, `Validation` when the stored
    /// value cannot be read as the column's type.
    pub fn decode_column(
        &self,
        descriptor: &TableDescriptor,
        column: &str,
        raw: Value,
    ) -> Result<Value> {
        let col = descriptor
            .column(column)
            .ok_or_else(|| KeelError::UnresolvedField {
                model: descriptor.model.clone(),
                path: column.to_string(),
            })?;
        convert::from_storage(&col.ty, raw, self.codec_for(&col.ty)).map_err(|reason| {
            KeelError::Validation {
                model: descriptor.model.clone(),
                field: column.to_string(),
                reason,
            }
        })
    }
}

/// Stable topological order: among ready nodes the earliest in `nodes`
/// wins; a cycle is broken by taking the earliest remaining node.
pub(crate) fn order_by_dependencies<T, F>(nodes: &[T], deps: F) -> Vec<T>
where
    T: Copy + Eq + Hash,
    F: Fn(T) -> Vec<T>,
{
    let present: HashSet<T> = nodes.iter().copied().collect();
    let dep_map: HashMap<T, Vec<T>> = nodes
        .iter()
        .map(|n| {
            let d: Vec<T> = deps(*n)
                .into_iter()
                .filter(|d| present.contains(d) && d != n)
                .collect();
            (*n, d)
        })
        .collect();

    let mut emitted: HashSet<T> = HashSet::new();
    let mut out = Vec::with_capacity(nodes.len());
    while out.len() < present.len() {
        let ready = nodes.iter().find(|n| {
            !emitted.contains(*n)
                && dep_map
                    .get(*n)
                    .map(|ds| ds.iter().all(|d| emitted.contains(d)))
                    .unwrap_or(true)
        });
        let next = match ready.or_else(|| nodes.iter().find(|n| !emitted.contains(*n))) {
            Some(n) => *n,
            None => break,
        };
        emitted.insert(next);
        out.push(next);
    }
    out
}

fn storage_type_of(
    ty: &SemanticType,
    codecs: &BTreeMap<String, Arc<dyn FieldCodec>>,
) -> Option<StorageType> {
    ty.builtin_storage_type().or_else(|| match ty {
        SemanticType::Custom(name) => codecs.get(name).map(|c| c.storage_type()),
        _ => None,
    })
}

fn check_type_declaration(field: &FieldDef) -> std::result::Result<(), String> {
    match &field.ty {
        SemanticType::Enum(def) => {
            if def.members.is_empty() {
                return Err(format!("enum {} declares no members", def.name));
            }
            let mut names = HashSet::new();
            let mut values = HashSet::new();
            for member in &def.members {
                if !names.insert(member.name.as_str()) {
                    return Err(format!("enum {} repeats member {}", def.name, member.name));
                }
                let (matches_repr, key) = match (&member.value, def.repr) {
                    (EnumValue::Integer(v), EnumRepr::Integer) => (true, v.to_string()),
                    (EnumValue::Text(s), EnumRepr::Text) => (true, s.clone()),
                    (EnumValue::Integer(v), _) => (false, v.to_string()),
                    (EnumValue::Text(s), _) => (false, s.clone()),
                };
                if !matches_repr {
                    return Err(format!(
                        "enum {} member {} does not match the enum's representation",
                        def.name, member.name
                    ));
                }
                if !values.insert(key) {
                    return Err(format!("enum {} repeats a stored value", def.name));
                }
            }
            if let Some(fallback) = &def.fallback {
                if def.member(fallback).is_none() {
                    return Err(format!(
                        "enum {} fallback {} is not a member",
                        def.name, fallback
                    ));
                }
            }
            Ok(())
        }
        SemanticType::Flags(def) => {
            if def.members.is_empty() {
                return Err(format!("flags {} declares no members", def.name));
            }
            let mut names = HashSet::new();
            let mut used = 0i64;
            for (name, bit) in &def.members {
                if !names.insert(name.as_str()) {
                    return Err(format!("flags {} repeats member {}", def.name, name));
                }
                if *bit <= 0 || used & bit != 0 {
                    return Err(format!(
                        "flags {} member {} must use a positive, unshared bit",
                        def.name, name
                    ));
                }
                used |= bit;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_default(
    field: &FieldDef,
    codecs: &BTreeMap<String, Arc<dyn FieldCodec>>,
) -> std::result::Result<(), String> {
    match &field.default {
        None => Ok(()),
        Some(DefaultValue::Value(value)) => {
            let codec = match &field.ty {
                SemanticType::Custom(name) => codecs.get(name).map(|c| c.as_ref()),
                _ => None,
            };
            convert::to_storage(&field.ty, value, codec)
                .map(|_| ())
                .map_err(|reason| {
                    format!("default of field '{}' is invalid: {}", field.name, reason)
                })
        }
        Some(DefaultValue::Now) => match field.ty {
            SemanticType::Date | SemanticType::DateTime => Ok(()),
            _ => Err(format!(
                "field '{}' of type {} cannot default to now",
                field.name,
                field.ty.name()
            )),
        },
        Some(DefaultValue::NewUuid) => match field.ty {
            SemanticType::Uuid => Ok(()),
            _ => Err(format!(
                "field '{}' of type {} cannot default to a generated uuid",
                field.name,
                field.ty.name()
            )),
        },
    }
}

/// `name` within the batch being validated, `def` itself included
fn find_model<'a>(
    def: &'a ModelDefinition,
    view: &SchemaView<'a>,
    name: &str,
) -> Option<&'a ModelDefinition> {
    if name == def.name {
        Some(def)
    } else {
        view.get(name)
    }
}

fn build_descriptor<'a>(
    def: &'a ModelDefinition,
    view: &SchemaView<'a>,
    codecs: &BTreeMap<String, Arc<dyn FieldCodec>>,
) -> Result<(TableDescriptor, Vec<AssociationTableDescriptor>)> {
    let invalid = |reason: String| KeelError::InvalidSchema {
        model: def.name.clone(),
        reason,
    };

    if !is_identifier(&def.name) {
        return Err(invalid(format!("'{}' is not a valid model name", def.name)));
    }
    let table = def.table_name();
    if !is_identifier(&table) {
        return Err(invalid(format!("'{}' is not a valid table name", table)));
    }
    if def.fields.is_empty() {
        return Err(invalid("model declares no fields".to_string()));
    }

    let mut field_names = HashSet::new();
    for field in &def.fields {
        if !is_identifier(&field.name) {
            return Err(invalid(format!("'{}' is not a valid field name", field.name)));
        }
        if !field_names.insert(field.name.as_str()) {
            return Err(invalid(format!("field '{}' is declared twice", field.name)));
        }
        if def.versioned && field.name == VERSION_COLUMN {
            return Err(invalid(format!(
                "field name '{}' is reserved for versioned models",
                VERSION_COLUMN
            )));
        }
    }

    let pks: Vec<&FieldDef> = def.fields.iter().filter(|f| f.primary_key).collect();
    let pk = match pks.as_slice() {
        [pk] => *pk,
        [] => return Err(invalid("missing primary key".to_string())),
        _ => return Err(invalid("more than one primary key field".to_string())),
    };
    if !pk.ty.is_keyable() {
        return Err(invalid(format!(
            "primary key '{}' has unkeyable type {}",
            pk.name,
            pk.ty.name()
        )));
    }
    if !pk.required {
        return Err(invalid(format!("primary key '{}' cannot be optional", pk.name)));
    }

    let mut columns = Vec::with_capacity(def.fields.len() + 1);
    let mut foreign_keys = Vec::new();
    let mut indexes = Vec::new();

    for field in &def.fields {
        let storage = storage_type_of(&field.ty, codecs).ok_or_else(|| {
            invalid(format!(
                "field '{}' of type {} has no storage mapping",
                field.name,
                field.ty.name()
            ))
        })?;
        check_type_declaration(field).map_err(&invalid)?;
        check_default(field, codecs).map_err(&invalid)?;

        if let Some(fk) = &field.references {
            let target = find_model(def, view, &fk.target).ok_or_else(|| {
                invalid(format!(
                    "foreign key '{}' targets unregistered model {}",
                    field.name, fk.target
                ))
            })?;
            let target_pk = target.primary_key().ok_or_else(|| {
                invalid(format!("foreign key target {} has no primary key", target.name))
            })?;
            if target_pk.ty != field.ty {
                return Err(invalid(format!(
                    "foreign key '{}' has type {} but {}.{} is {}",
                    field.name,
                    field.ty.name(),
                    target.name,
                    target_pk.name,
                    target_pk.ty.name()
                )));
            }
            if fk.on_delete == OnDelete::SetNull && field.required {
                return Err(invalid(format!(
                    "foreign key '{}' uses SET NULL but is required",
                    field.name
                )));
            }
            foreign_keys.push(ForeignKeyDescriptor {
                column: field.name.clone(),
                target_model: target.name.clone(),
                target_table: target.table_name(),
                target_column: target_pk.name.clone(),
                on_delete: fk.on_delete,
            });
        }

        columns.push(ColumnDescriptor {
            name: field.name.clone(),
            ty: field.ty.clone(),
            storage,
            nullable: field.is_nullable(),
            primary_key: field.primary_key,
            auto_increment: field.is_generated_key(),
            unique: field.unique && !field.primary_key,
        });

        if field.indexed && !field.unique && !field.primary_key {
            indexes.push(IndexDescriptor {
                name: format!("ix_{}_{}", table, field.name),
                columns: vec![field.name.clone()],
                unique: false,
            });
        }
    }

    for group in &def.unique_together {
        if group.is_empty() {
            return Err(invalid("empty unique_together group".to_string()));
        }
        for name in group {
            if !field_names.contains(name.as_str()) {
                return Err(invalid(format!(
                    "unique_together names unknown field '{}'",
                    name
                )));
            }
        }
        indexes.push(IndexDescriptor {
            name: format!("ux_{}_{}", table, group.join("_")),
            columns: group.clone(),
            unique: true,
        });
    }

    let version_column = if def.versioned {
        columns.push(ColumnDescriptor {
            name: VERSION_COLUMN.to_string(),
            ty: SemanticType::Integer,
            storage: StorageType::Integer,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            unique: false,
        });
        Some(VERSION_COLUMN.to_string())
    } else {
        None
    };

    let mut relationships = Vec::with_capacity(def.relationships.len());
    let mut links = Vec::new();
    let mut relationship_names = HashSet::new();

    for rel in &def.relationships {
        if !is_identifier(&rel.name) {
            return Err(invalid(format!("'{}' is not a valid relationship name", rel.name)));
        }
        if field_names.contains(rel.name.as_str()) {
            return Err(invalid(format!(
                "relationship '{}' collides with a field of the same name",
                rel.name
            )));
        }
        if !relationship_names.insert(rel.name.as_str()) {
            return Err(invalid(format!("relationship '{}' is declared twice", rel.name)));
        }
        let target = find_model(def, view, &rel.target).ok_or_else(|| {
            invalid(format!(
                "relationship '{}' targets unregistered model {}",
                rel.name, rel.target
            ))
        })?;
        let target_pk = target.primary_key().ok_or_else(|| {
            invalid(format!("relationship target {} has no primary key", target.name))
        })?;

        let references = |field: Option<&FieldDef>, model: &str| {
            field
                .and_then(|f| f.references.as_ref())
                .map(|fk| fk.target == model)
                .unwrap_or(false)
        };

        let shape = match &rel.kind {
            RelationKind::ManyToOne { via } => {
                if !references(def.get_field(via), &rel.target) {
                    return Err(invalid(format!(
                        "relationship '{}' needs field '{}' referencing {}",
                        rel.name, via, rel.target
                    )));
                }
                RelationshipShape::ManyToOne {
                    local_column: via.clone(),
                    target_column: target_pk.name.clone(),
                }
            }
            RelationKind::OneToMany { via } => {
                if !references(target.get_field(via), &def.name) {
                    return Err(invalid(format!(
                        "relationship '{}' needs field {}.{} referencing {}",
                        rel.name, target.name, via, def.name
                    )));
                }
                RelationshipShape::OneToMany {
                    remote_column: via.clone(),
                }
            }
            RelationKind::OneToOne { via } => {
                let field = def.get_field(via);
                if !references(field, &rel.target) {
                    return Err(invalid(format!(
                        "relationship '{}' needs field '{}' referencing {}",
                        rel.name, via, rel.target
                    )));
                }
                if !field.is_some_and(|f| f.unique) {
                    return Err(invalid(format!(
                        "one-to-one relationship '{}' needs field '{}' to be unique",
                        rel.name, via
                    )));
                }
                RelationshipShape::OneToOne {
                    local_column: via.clone(),
                    target_column: target_pk.name.clone(),
                }
            }
            RelationKind::OneToOneBack { via } => {
                let field = target.get_field(via);
                if !references(field, &def.name) {
                    return Err(invalid(format!(
                        "relationship '{}' needs field {}.{} referencing {}",
                        rel.name, target.name, via, def.name
                    )));
                }
                if !field.is_some_and(|f| f.unique) {
                    return Err(invalid(format!(
                        "one-to-one relationship '{}' needs field {}.{} to be unique",
                        rel.name, target.name, via
                    )));
                }
                RelationshipShape::OneToOneBack {
                    remote_column: via.clone(),
                }
            }
            RelationKind::ManyToMany {
                through: Association::Table { table: link_table },
            } => {
                let target_table = target.table_name();
                let link_name = link_table
                    .clone()
                    .unwrap_or_else(|| format!("{}_{}", table, rel.name));
                if !is_identifier(&link_name) {
                    return Err(invalid(format!("'{}' is not a valid table name", link_name)));
                }
                let local = format!("{}_{}", table, pk.name);
                let mut remote = format!("{}_{}", target_table, target_pk.name);
                if remote == local {
                    remote = format!("{}_{}", rel.name, target_pk.name);
                }
                let key_storage = |f: &FieldDef| {
                    f.ty.builtin_storage_type()
                        .ok_or_else(|| invalid(format!("key '{}' has no storage mapping", f.name)))
                };
                links.push(AssociationTableDescriptor {
                    table: link_name.clone(),
                    left: LinkColumn {
                        column: local.clone(),
                        target_model: def.name.clone(),
                        target_table: table.clone(),
                        target_column: pk.name.clone(),
                        storage: key_storage(pk)?,
                    },
                    right: LinkColumn {
                        column: remote.clone(),
                        target_model: target.name.clone(),
                        target_table,
                        target_column: target_pk.name.clone(),
                        storage: key_storage(target_pk)?,
                    },
                });
                RelationshipShape::ManyToMany {
                    table: link_name,
                    local_column: local,
                    remote_column: remote,
                    association_model: None,
                }
            }
            RelationKind::ManyToMany {
                through: Association::Model { model, local, remote },
            } => {
                let assoc = find_model(def, view, model).ok_or_else(|| {
                    invalid(format!(
                        "relationship '{}' goes through unregistered model {}",
                        rel.name, model
                    ))
                })?;
                if !references(assoc.get_field(local), &def.name) {
                    return Err(invalid(format!(
                        "association field {}.{} must reference {}",
                        model, local, def.name
                    )));
                }
                if !references(assoc.get_field(remote), &rel.target) {
                    return Err(invalid(format!(
                        "association field {}.{} must reference {}",
                        model, remote, rel.target
                    )));
                }
                RelationshipShape::ManyToMany {
                    table: assoc.table_name(),
                    local_column: local.clone(),
                    remote_column: remote.clone(),
                    association_model: Some(model.clone()),
                }
            }
        };

        relationships.push(RelationshipDescriptor {
            name: rel.name.clone(),
            target_model: target.name.clone(),
            target_table: target.table_name(),
            shape,
            strategy: rel.strategy,
            optional: rel.optional,
        });
    }

    Ok((
        TableDescriptor {
            model: def.name.clone(),
            table,
            columns,
            primary_key: pk.name.clone(),
            foreign_keys,
            indexes,
            relationships,
            version_column,
        },
        links,
    ))
}

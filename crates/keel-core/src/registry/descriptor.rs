//! Table descriptors derived from model definitions

use crate::model::{LoadStrategy, OnDelete, SemanticType, StorageType};

/// Hidden optimistic-locking column added to versioned models
pub const VERSION_COLUMN: &str = "row_version";

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub ty: SemanticType,
    pub storage: StorageType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDescriptor {
    pub column: String,
    pub target_model: String,
    pub target_table: String,
    pub target_column: String,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Physical shape of a relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipShape {
    /// `this.local_column -> target.target_column`
    ManyToOne {
        local_column: String,
        target_column: String,
    },
    /// `target.remote_column -> this.pk`
    OneToMany { remote_column: String },
    /// Unique `this.local_column -> target.target_column`
    OneToOne {
        local_column: String,
        target_column: String,
    },
    /// Unique `target.remote_column -> this.pk`
    OneToOneBack { remote_column: String },
    /// `this.pk <- table.local_column`, `table.remote_column -> target.pk`
    ManyToMany {
        table: String,
        local_column: String,
        remote_column: String,
        association_model: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    pub name: String,
    pub target_model: String,
    pub target_table: String,
    pub shape: RelationshipShape,
    pub strategy: LoadStrategy,
    pub optional: bool,
}

impl RelationshipShape {
    /// Columns of a relationship whose foreign key lives on this model
    pub fn parent_columns(&self) -> Option<(&str, &str)> {
        match self {
            RelationshipShape::ManyToOne {
                local_column,
                target_column,
            }
            | RelationshipShape::OneToOne {
                local_column,
                target_column,
            } => Some((local_column, target_column)),
            _ => None,
        }
    }

    /// Foreign-key column on the target of a relationship that points back here
    pub fn back_column(&self) -> Option<&str> {
        match self {
            RelationshipShape::OneToMany { remote_column }
            | RelationshipShape::OneToOneBack { remote_column } => Some(remote_column),
            _ => None,
        }
    }
}

impl RelationshipDescriptor {
    pub fn is_collection(&self) -> bool {
        matches!(
            self.shape,
            RelationshipShape::OneToMany { .. } | RelationshipShape::ManyToMany { .. }
        )
    }
}

/// One side of a derived link table
#[derive(Debug, Clone, PartialEq)]
pub struct LinkColumn {
    pub column: String,
    pub target_model: String,
    pub target_table: String,
    pub target_column: String,
    pub storage: StorageType,
}

/// Link table backing a many-to-many relationship without its own model
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationTableDescriptor {
    pub table: String,
    pub left: LinkColumn,
    pub right: LinkColumn,
}

impl AssociationTableDescriptor {
    /// Same table shape regardless of which side declared it
    pub fn same_shape(&self, other: &AssociationTableDescriptor) -> bool {
        self.table == other.table
            && ((self.left == other.left && self.right == other.right)
                || (self.left == other.right && self.right == other.left))
    }
}

/// Relational shape of one registered model
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub model: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: String,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
    pub relationships: Vec<RelationshipDescriptor>,
    pub version_column: Option<String>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKeyDescriptor> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    /// Primary-key column
    ///
    /// Registration guarantees it exists, so this never fails on a
    /// registry-issued descriptor.
    pub fn pk_column(&self) -> Option<&ColumnDescriptor> {
        self.column(&self.primary_key)
    }

    /// Columns in declaration order, version column last
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn is_versioned(&self) -> bool {
        self.version_column.is_some()
    }
}

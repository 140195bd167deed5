//! Relationship declarations

/// When related instances are loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// On first `resolve`
    #[default]
    Lazy,
    /// Together with the owning query
    Eager,
}

/// How a many-to-many relationship is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    /// Derived link table without its own lifecycle; the name defaults to
    /// `{owner_table}_{relationship}`
    Table { table: Option<String> },
    /// Registered model whose `local` field references the owner and whose
    /// `remote` field references the target
    Model {
        model: String,
        local: String,
        remote: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// `via` is a foreign-key field on this model
    ManyToOne { via: String },
    /// `via` is a foreign-key field on the target pointing back here
    OneToMany { via: String },
    /// `via` is a unique foreign-key field on this model
    OneToOne { via: String },
    /// `via` is a unique foreign-key field on the target pointing back here
    OneToOneBack { via: String },
    ManyToMany { through: Association },
}

/// A named edge from one model to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    pub name: String,
    pub target: String,
    pub kind: RelationKind,
    pub strategy: LoadStrategy,
    pub optional: bool,
}

impl RelationshipDef {
    fn new(name: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind,
            strategy: LoadStrategy::Lazy,
            optional: false,
        }
    }

    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self::new(name, target, RelationKind::ManyToOne { via: via.into() })
    }

    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self::new(name, target, RelationKind::OneToMany { via: via.into() })
    }

    /// Owning side of a one-to-one; `via` must be declared unique
    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self::new(name, target, RelationKind::OneToOne { via: via.into() })
    }

    /// Inverse side of a one-to-one, resolving to at most one instance
    pub fn one_to_one_back(
        name: impl Into<String>,
        target: impl Into<String>,
        via: impl Into<String>,
    ) -> Self {
        Self::new(name, target, RelationKind::OneToOneBack { via: via.into() })
    }

    /// Many-to-many through a derived link table
    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            target,
            RelationKind::ManyToMany {
                through: Association::Table { table: None },
            },
        )
    }

    /// Many-to-many through a registered association model
    pub fn many_to_many_through(
        name: impl Into<String>,
        target: impl Into<String>,
        model: impl Into<String>,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            target,
            RelationKind::ManyToMany {
                through: Association::Model {
                    model: model.into(),
                    local: local.into(),
                    remote: remote.into(),
                },
            },
        )
    }

    /// Name the derived link table explicitly (lets both sides share it)
    pub fn link_table(mut self, table: impl Into<String>) -> Self {
        if let RelationKind::ManyToMany {
            through: Association::Table { table: t },
        } = &mut self.kind
        {
            *t = Some(table.into());
        }
        self
    }

    pub fn eager(mut self) -> Self {
        self.strategy = LoadStrategy::Eager;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.strategy = LoadStrategy::Lazy;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self.kind,
            RelationKind::OneToMany { .. } | RelationKind::ManyToMany { .. }
        )
    }
}

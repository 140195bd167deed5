//! Model definitions
//!
//! A [`ModelDefinition`] is plain data: the registry derives everything else
//! (table shape, joins, flush order) from it at registration time.

use crate::model::field::FieldDef;
use crate::model::relationship::RelationshipDef;

/// Declared shape of one entity kind
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
    pub name: String,
    pub table: Option<String>,
    pub fields: Vec<FieldDef>,
    pub relationships: Vec<RelationshipDef>,
    pub unique_together: Vec<Vec<String>>,
    pub versioned: bool,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            relationships: Vec::new(),
            unique_together: Vec::new(),
            versioned: false,
        }
    }

    /// Override the derived table name
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDef) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Composite uniqueness over several fields
    pub fn unique_together<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.unique_together
            .push(fields.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    /// Enable optimistic versioning through a hidden version column
    pub fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn get_relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// First field flagged as primary key
    pub fn primary_key(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Explicit table name, or the model name in snake case
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| to_snake_case(&self.name))
    }
}

/// `BlogPost` -> `blog_post`, `HTTPRequest` -> `http_request`
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower =
                i > 0 && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
            if i > 0 && (prev_lower || (prev_upper && next_lower)) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("BlogPost"), "blog_post");
        assert_eq!(to_snake_case("HTTPRequest"), "http_request");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_identifier() {
        assert!(is_identifier("user_id"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("user-id"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_table_name_override() {
        let def = ModelDefinition::new("Person").table("people");
        assert_eq!(def.table_name(), "people");
        assert_eq!(ModelDefinition::new("Person").table_name(), "person");
    }
}

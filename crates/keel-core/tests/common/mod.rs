use keel_core::model::{EnumDef, EnumRepr, FieldDef, FlagsDef, ModelDefinition, RelationshipDef};
use keel_core::SchemaRegistry;

/// Blog schema: users (self-referencing mentor), posts, tags through a
/// derived link table, comments as a one-to-many collection
#[allow(dead_code)]
pub fn blog_models() -> Vec<ModelDefinition> {
    vec![
        ModelDefinition::new("User")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::email("email").unique())
            .field(FieldDef::text("name").optional())
            .field(FieldDef::flags(
                "perms",
                FlagsDef::new("Perms")
                    .flag("read", 1)
                    .flag("write", 2)
                    .flag("admin", 4),
            )
            .default_value(keel_core::Value::Flags(1)))
            .field(FieldDef::foreign_key("mentor_id", "User").optional())
            .relationship(RelationshipDef::many_to_one("mentor", "User", "mentor_id").optional())
            .relationship(RelationshipDef::one_to_many("posts", "Post", "author_id")),
        ModelDefinition::new("Post")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::text("title").indexed())
            .field(FieldDef::enumeration(
                "status",
                EnumDef::new("Status", EnumRepr::Text)
                    .text_member("Draft", "draft")
                    .text_member("Published", "published")
                    .with_fallback("Draft"),
            )
            .default_value(keel_core::Value::Enum("Draft".to_string())))
            .field(FieldDef::datetime("created_at").default_now())
            .field(FieldDef::foreign_key("author_id", "User"))
            .relationship(RelationshipDef::many_to_one("author", "User", "author_id"))
            .relationship(RelationshipDef::many_to_many("tags", "Tag").link_table("post_tags"))
            .relationship(RelationshipDef::one_to_many("comments", "Comment", "post_id"))
            .versioned(),
        ModelDefinition::new("Tag")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::text("label").unique())
            .relationship(RelationshipDef::many_to_many("posts", "Post").link_table("post_tags")),
        ModelDefinition::new("Comment")
            .field(FieldDef::integer("id").primary_key())
            .field(FieldDef::text("body"))
            .field(FieldDef::boolean("approved").default_value(false))
            .field(FieldDef::foreign_key("post_id", "Post"))
            .relationship(RelationshipDef::many_to_one("post", "Post", "post_id")),
    ]
}

/// Registry with the blog schema registered
#[allow(dead_code)]
pub fn blog_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register_all(blog_models())
        .expect("blog schema registers");
    registry
}

/// `Person` with at most one `Passport`, whose `holder_id` is the unique key
#[allow(dead_code)]
pub fn passport_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register_all(vec![
            ModelDefinition::new("Person")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::text("name"))
                .relationship(
                    RelationshipDef::one_to_one_back("passport", "Passport", "holder_id")
                        .optional(),
                ),
            ModelDefinition::new("Passport")
                .field(FieldDef::integer("id").primary_key())
                .field(FieldDef::text("number"))
                .field(FieldDef::foreign_key("holder_id", "Person").unique())
                .relationship(RelationshipDef::one_to_one("holder", "Person", "holder_id")),
        ])
        .expect("passport schema registers");
    registry
}

//! Shared unit-test fixtures
//!
//! A small blogging schema registered in the `fixtures` scope:
//!
//! - `Blog` (`blogs`, generated integer key)
//! - `Post` (`posts`, foreign key to `blogs`)
//! - `Tag` (`content.tags`, composite key, not generated)
//! - `BlogSummary` projection over the `blog_summaries` view
//!
//! Plus `sales::Item` and `archive::Item`, two entities with the same type and
//! table name in different schemas. They are not registered; [`ledger_model`]
//! builds their model by hand.

use crate::connection::Connection;
use crate::context::DataContext;
use crate::entity::{Entity, FromRow, Projection, PropertyInfo};
use crate::error::ContextError;
use crate::mapping::{
    EntityTypeBuilder, EntityTypeConfiguration, QueryTypeBuilder, QueryTypeConfiguration,
    ReferentialAction,
};
use crate::model::{Model, ModelBuilder};
use crate::value::DataRow;
use sea_query::Value;
use std::sync::Arc;

pub const SCOPE: &str = "fixtures";

#[derive(Debug, Clone, PartialEq)]
pub struct Blog {
    pub id: i32,
    pub url: String,
    pub rating: Option<i32>,
}

impl FromRow for Blog {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(Blog {
            id: row.get("id")?,
            url: row.get("url")?,
            rating: row.get("rating")?,
        })
    }
}

impl Entity for Blog {
    fn properties() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::required("id", "integer"),
            PropertyInfo::required("url", "text"),
            PropertyInfo::optional("rating", "integer"),
        ]
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("url", self.url.clone().into()),
            ("rating", self.rating.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i32,
    pub blog_id: i32,
    pub title: String,
    pub body: Option<String>,
}

impl FromRow for Post {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(Post {
            id: row.get("id")?,
            blog_id: row.get("blog_id")?,
            title: row.get("title")?,
            body: row.get("body")?,
        })
    }
}

impl Entity for Post {
    fn properties() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::required("id", "integer"),
            PropertyInfo::required("blog_id", "integer"),
            PropertyInfo::required("title", "text"),
            PropertyInfo::optional("body", "text"),
        ]
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("blog_id", self.blog_id.into()),
            ("title", self.title.clone().into()),
            ("body", self.body.clone().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub post_id: i32,
    pub label: String,
}

impl FromRow for Tag {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(Tag {
            post_id: row.get("post_id")?,
            label: row.get("label")?,
        })
    }
}

impl Entity for Tag {
    fn properties() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::required("post_id", "integer"),
            PropertyInfo::required("label", "text"),
        ]
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![("post_id", self.post_id.into()), ("label", self.label.clone().into())]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlogSummary {
    pub url: String,
    pub post_count: i64,
}

impl FromRow for BlogSummary {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(BlogSummary {
            url: row.get("url")?,
            post_count: row.get("post_count")?,
        })
    }
}

impl Projection for BlogSummary {
    fn properties() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::required("url", "text"),
            PropertyInfo::required("post_count", "bigint"),
        ]
    }
}

/// Mapped nowhere
#[derive(Debug, Clone, PartialEq)]
pub struct Orphan {
    pub id: i32,
}

impl FromRow for Orphan {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(Orphan { id: row.get("id")? })
    }
}

impl Entity for Orphan {
    fn properties() -> Vec<PropertyInfo> {
        vec![PropertyInfo::required("id", "integer")]
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![("id", self.id.into())]
    }
}

impl Projection for Orphan {
    fn properties() -> Vec<PropertyInfo> {
        vec![PropertyInfo::required("id", "integer")]
    }
}

#[derive(Default)]
pub struct BlogMapping;

impl EntityTypeConfiguration<Blog> for BlogMapping {
    fn configure(&self, builder: &mut EntityTypeBuilder<Blog>) {
        builder.to_table("blogs");
        builder.property("id").value_generated_on_add();
        builder.property("url").has_max_length(500).is_unique();
        builder.property("rating").has_column_name("stars");
    }
}

#[derive(Default)]
pub struct PostMapping;

impl EntityTypeConfiguration<Post> for PostMapping {
    fn configure(&self, builder: &mut EntityTypeBuilder<Post>) {
        builder.to_table("posts");
        builder.property("id").value_generated_on_add();
        builder.property("title").has_max_length(200);
        builder.has_index("ix_posts_blog_id", &["blog_id"]);
        builder
            .has_foreign_key(&["blog_id"], "blogs", &["id"])
            .on_delete(ReferentialAction::Cascade);
    }
}

#[derive(Default)]
pub struct TagMapping;

impl EntityTypeConfiguration<Tag> for TagMapping {
    fn configure(&self, builder: &mut EntityTypeBuilder<Tag>) {
        builder.to_table("tags").in_schema("content");
        builder.has_key(&["post_id", "label"]);
        builder.has_foreign_key(&["post_id"], "posts", &["id"]);
    }
}

#[derive(Default)]
pub struct BlogSummaryMapping;

impl QueryTypeConfiguration<BlogSummary> for BlogSummaryMapping {
    fn configure(&self, builder: &mut QueryTypeBuilder<BlogSummary>) {
        builder.to_view("blog_summaries");
        builder.property("post_count").has_column_name("posts");
    }
}

crate::register_entity_mapping!(BlogMapping => Blog, scope = SCOPE);
crate::register_entity_mapping!(PostMapping => Post, scope = SCOPE);
crate::register_entity_mapping!(TagMapping => Tag, scope = SCOPE);
crate::register_query_mapping!(BlogSummaryMapping => BlogSummary, scope = SCOPE);

macro_rules! ledger_item {
    ($schema:literal) => {
        #[derive(Debug, Clone, PartialEq)]
        pub struct Item {
            pub id: i32,
            pub name: String,
        }

        impl FromRow for Item {
            fn from_row(row: &DataRow) -> Result<Self, ContextError> {
                Ok(Item {
                    id: row.get("id")?,
                    name: row.get("name")?,
                })
            }
        }

        impl Entity for Item {
            fn properties() -> Vec<PropertyInfo> {
                vec![
                    PropertyInfo::required("id", "integer"),
                    PropertyInfo::required("name", "text"),
                ]
            }

            fn values(&self) -> Vec<(&'static str, Value)> {
                vec![("id", self.id.into()), ("name", self.name.clone().into())]
            }
        }

        #[derive(Default)]
        pub struct ItemMapping;

        impl EntityTypeConfiguration<Item> for ItemMapping {
            fn configure(&self, builder: &mut EntityTypeBuilder<Item>) {
                builder.to_table("items").in_schema($schema);
            }
        }
    };
}

pub mod sales {
    use super::*;
    ledger_item!("sales");
}

pub mod archive {
    use super::*;
    ledger_item!("archive");
}

/// `sales.items` and `archive.items`
pub fn ledger_model() -> Arc<Model> {
    let mut builder = ModelBuilder::new("ledger");
    builder
        .apply_entity_configuration::<sales::Item, _>(sales::ItemMapping)
        .unwrap();
    builder
        .apply_entity_configuration::<archive::Item, _>(archive::ItemMapping)
        .unwrap();
    Arc::new(builder.build().unwrap())
}

pub fn item_row(id: i32, name: &str) -> DataRow {
    DataRow::new().with("id", id).with("name", name)
}

/// The fixtures model, built from the registrations above
pub fn model() -> Arc<Model> {
    Model::for_scope(SCOPE).unwrap()
}

pub fn context(connection: impl Connection + 'static) -> DataContext {
    DataContext::builder(connection).model(model()).build().unwrap()
}

/// Row as the database returns it for `blogs`
pub fn blog_row(id: i32, url: &str, stars: Option<i32>) -> DataRow {
    DataRow::new().with("id", id).with("url", url).with("stars", stars)
}

pub fn post_row(id: i32, blog_id: i32, title: &str) -> DataRow {
    DataRow::new()
        .with("id", id)
        .with("blog_id", blog_id)
        .with("title", title)
        .with("body", Value::String(None))
}

//! Mapping configurations and their discovery.
//!
//! A mapping configuration describes how exactly one [`Entity`] or
//! [`Projection`] maps onto the relational schema. Configurations are plain
//! types implementing [`EntityTypeConfiguration`] or [`QueryTypeConfiguration`]
//! and are announced to the process with [`register_entity_mapping!`] or
//! [`register_query_mapping!`]; the [registry](registry) finds them at model
//! build time without any hand-maintained list.
//!
//! ```
//! use lifeline::mapping::{EntityTypeBuilder, EntityTypeConfiguration};
//! # use lifeline::{ContextError, DataRow, Entity, FromRow, PropertyInfo};
//! # use sea_query::Value;
//! # #[derive(Clone)] struct Blog { id: i32, url: String }
//! # impl FromRow for Blog {
//! #     fn from_row(row: &DataRow) -> Result<Self, ContextError> {
//! #         Ok(Blog { id: row.get("id")?, url: row.get("url")? })
//! #     }
//! # }
//! # impl Entity for Blog {
//! #     fn properties() -> Vec<PropertyInfo> {
//! #         vec![PropertyInfo::required("id", "integer"), PropertyInfo::required("url", "text")]
//! #     }
//! #     fn values(&self) -> Vec<(&'static str, Value)> {
//! #         vec![("id", self.id.into()), ("url", self.url.clone().into())]
//! #     }
//! # }
//!
//! #[derive(Default)]
//! struct BlogMapping;
//!
//! impl EntityTypeConfiguration<Blog> for BlogMapping {
//!     fn configure(&self, builder: &mut EntityTypeBuilder<Blog>) {
//!         builder.to_table("blogs");
//!         builder.property("id").value_generated_on_add();
//!         builder.property("url").has_max_length(500).is_unique();
//!     }
//! }
//!
//! lifeline::register_entity_mapping!(BlogMapping => Blog);
//! ```

pub mod builder;
pub mod column;
pub mod registry;
pub mod schema;
pub mod table;

use crate::entity::{Entity, Projection};

pub use builder::{EntityTypeBuilder, ForeignKeyBuilder, PropertyBuilder, QueryTypeBuilder};
pub use column::ColumnDefinition;
pub use registry::{
    apply_all_mappings, apply_registrations, registrations, MappingKind, MappingRegistration,
    DEFAULT_SCOPE,
};
pub use schema::{EntitySchema, ProjectionSchema};
pub use table::{ForeignKeyDefinition, IndexDefinition, ReferentialAction, TableDefinition};

/// Mapping configuration for one entity type
pub trait EntityTypeConfiguration<E: Entity> {
    fn configure(&self, builder: &mut EntityTypeBuilder<E>);
}

/// Mapping configuration for one read-only projection type
pub trait QueryTypeConfiguration<P: Projection> {
    fn configure(&self, builder: &mut QueryTypeBuilder<P>);
}

/// Register an [`EntityTypeConfiguration`] for discovery
///
/// Forms:
///
/// - `register_entity_mapping!(Config => Entity)`
/// - `register_entity_mapping!(Config => Entity, scope = "reporting")`
/// - `register_entity_mapping!(Config => Entity, factory = Config::from_env)`
/// - `register_entity_mapping!(Config => Entity, scope = "reporting", factory = Config::from_env)`
///
/// Without a factory the configuration must implement `Default`. A factory is a
/// `fn() -> Result<Config, String>`; an `Err` aborts model construction.
#[macro_export]
macro_rules! register_entity_mapping {
    ($config:ty => $entity:ty) => {
        $crate::register_entity_mapping!(
            $config => $entity,
            scope = $crate::mapping::DEFAULT_SCOPE,
            factory = || ::std::result::Result::Ok(<$config as ::std::default::Default>::default())
        );
    };
    ($config:ty => $entity:ty, scope = $scope:expr) => {
        $crate::register_entity_mapping!(
            $config => $entity,
            scope = $scope,
            factory = || ::std::result::Result::Ok(<$config as ::std::default::Default>::default())
        );
    };
    ($config:ty => $entity:ty, factory = $factory:expr) => {
        $crate::register_entity_mapping!(
            $config => $entity,
            scope = $crate::mapping::DEFAULT_SCOPE,
            factory = $factory
        );
    };
    ($config:ty => $entity:ty, scope = $scope:expr, factory = $factory:expr) => {
        const _: () = {
            fn __lifeline_apply(
                builder: &mut $crate::model::ModelBuilder,
            ) -> ::std::result::Result<(), $crate::ContextError> {
                let factory: fn() -> ::std::result::Result<$config, ::std::string::String> = $factory;
                $crate::mapping::registry::apply_entity_with::<$entity, $config>(
                    builder,
                    ::std::stringify!($config),
                    factory,
                )
            }

            $crate::inventory::submit! {
                $crate::mapping::MappingRegistration {
                    scope: $scope,
                    target: ::std::stringify!($entity),
                    configuration: ::std::stringify!($config),
                    kind: $crate::mapping::MappingKind::Entity,
                    apply: __lifeline_apply,
                }
            }
        };
    };
}

/// Register a [`QueryTypeConfiguration`] for discovery
///
/// Accepts the same forms as [`register_entity_mapping!`].
#[macro_export]
macro_rules! register_query_mapping {
    ($config:ty => $projection:ty) => {
        $crate::register_query_mapping!(
            $config => $projection,
            scope = $crate::mapping::DEFAULT_SCOPE,
            factory = || ::std::result::Result::Ok(<$config as ::std::default::Default>::default())
        );
    };
    ($config:ty => $projection:ty, scope = $scope:expr) => {
        $crate::register_query_mapping!(
            $config => $projection,
            scope = $scope,
            factory = || ::std::result::Result::Ok(<$config as ::std::default::Default>::default())
        );
    };
    ($config:ty => $projection:ty, factory = $factory:expr) => {
        $crate::register_query_mapping!(
            $config => $projection,
            scope = $crate::mapping::DEFAULT_SCOPE,
            factory = $factory
        );
    };
    ($config:ty => $projection:ty, scope = $scope:expr, factory = $factory:expr) => {
        const _: () = {
            fn __lifeline_apply(
                builder: &mut $crate::model::ModelBuilder,
            ) -> ::std::result::Result<(), $crate::ContextError> {
                let factory: fn() -> ::std::result::Result<$config, ::std::string::String> = $factory;
                $crate::mapping::registry::apply_query_with::<$projection, $config>(
                    builder,
                    ::std::stringify!($config),
                    factory,
                )
            }

            $crate::inventory::submit! {
                $crate::mapping::MappingRegistration {
                    scope: $scope,
                    target: ::std::stringify!($projection),
                    configuration: ::std::stringify!($config),
                    kind: $crate::mapping::MappingKind::Query,
                    apply: __lifeline_apply,
                }
            }
        };
    };
}

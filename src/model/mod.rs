//! The model: every applied mapping configuration of one scope.
//!
//! A [`ModelBuilder`] receives strongly-typed configuration calls keyed by the
//! target type. Once built, a [`Model`] is immutable; contexts share it
//! through an `Arc`. [`Model::for_scope`] memoises one model per scope for the
//! life of the process.

mod script;

use crate::entity::{short_type_name, Entity, Projection};
use crate::error::ContextError;
use crate::mapping::{
    apply_all_mappings, EntitySchema, EntityTypeBuilder, EntityTypeConfiguration, MappingKind,
    ProjectionSchema, QueryTypeBuilder, QueryTypeConfiguration,
};
use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Models already built, by scope
static MODELS: Lazy<Mutex<HashMap<String, Arc<Model>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Which configuration produced a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedConfiguration {
    pub target: &'static str,
    pub configuration: &'static str,
    pub kind: MappingKind,
}

/// Collects schemas from mapping configurations
#[derive(Debug)]
pub struct ModelBuilder {
    scope: String,
    entities: HashMap<TypeId, EntitySchema>,
    projections: HashMap<TypeId, ProjectionSchema>,
    applied: HashMap<TypeId, AppliedConfiguration>,
}

impl ModelBuilder {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            entities: HashMap::new(),
            projections: HashMap::new(),
            applied: HashMap::new(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Apply `config` as the mapping for entity `E`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `E` already has a mapping or the
    /// configured schema is invalid.
    pub fn apply_entity_configuration<E, C>(&mut self, config: C) -> Result<(), ContextError>
    where
        E: Entity,
        C: EntityTypeConfiguration<E> + 'static,
    {
        self.apply_entity_configuration_named::<E, C>(config, short_type_name::<C>())
    }

    pub(crate) fn apply_entity_configuration_named<E, C>(
        &mut self,
        config: C,
        configuration: &'static str,
    ) -> Result<(), ContextError>
    where
        E: Entity,
        C: EntityTypeConfiguration<E> + 'static,
    {
        let key = TypeId::of::<E>();
        self.reject_duplicate::<E>(key, configuration)?;

        let mut builder = EntityTypeBuilder::<E>::new();
        config.configure(&mut builder);
        let schema = builder.finish()?;

        self.entities.insert(key, schema);
        self.applied.insert(
            key,
            AppliedConfiguration {
                target: short_type_name::<E>(),
                configuration,
                kind: MappingKind::Entity,
            },
        );
        Ok(())
    }

    /// Apply `config` as the mapping for projection `P`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `P` already has a mapping or the
    /// configured schema is invalid.
    pub fn apply_query_configuration<P, C>(&mut self, config: C) -> Result<(), ContextError>
    where
        P: Projection,
        C: QueryTypeConfiguration<P> + 'static,
    {
        self.apply_query_configuration_named::<P, C>(config, short_type_name::<C>())
    }

    pub(crate) fn apply_query_configuration_named<P, C>(
        &mut self,
        config: C,
        configuration: &'static str,
    ) -> Result<(), ContextError>
    where
        P: Projection,
        C: QueryTypeConfiguration<P> + 'static,
    {
        let key = TypeId::of::<P>();
        self.reject_duplicate::<P>(key, configuration)?;

        let mut builder = QueryTypeBuilder::<P>::new();
        config.configure(&mut builder);
        let schema = builder.finish()?;

        self.projections.insert(key, schema);
        self.applied.insert(
            key,
            AppliedConfiguration {
                target: short_type_name::<P>(),
                configuration,
                kind: MappingKind::Query,
            },
        );
        Ok(())
    }

    fn reject_duplicate<T: 'static>(&self, key: TypeId, configuration: &str) -> Result<(), ContextError> {
        match self.applied.get(&key) {
            Some(existing) => Err(ContextError::configuration(
                short_type_name::<T>(),
                format!(
                    "duplicate mapping: already configured by {}, rejected {}",
                    existing.configuration, configuration
                ),
            )),
            None => Ok(()),
        }
    }

    /// Freeze the builder into a model
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when two entities map to the same table.
    pub fn build(self) -> Result<Model, ContextError> {
        let mut tables: HashMap<String, &'static str> = HashMap::new();
        for schema in self.entities.values() {
            if let Some(other) = tables.insert(schema.qualified_table(), schema.type_name) {
                let (first, second) = if other <= schema.type_name {
                    (other, schema.type_name)
                } else {
                    (schema.type_name, other)
                };
                return Err(ContextError::configuration(
                    schema.qualified_table(),
                    format!("table is mapped by both {first} and {second}"),
                ));
            }
        }

        Ok(Model {
            scope: self.scope,
            entities: self.entities,
            projections: self.projections,
            applied: self.applied,
        })
    }
}

/// Immutable aggregate of applied mapping configurations
#[derive(Debug)]
pub struct Model {
    scope: String,
    entities: HashMap<TypeId, EntitySchema>,
    projections: HashMap<TypeId, ProjectionSchema>,
    applied: HashMap<TypeId, AppliedConfiguration>,
}

impl Model {
    /// Build a model for `scope` from every discovered registration
    ///
    /// # Errors
    ///
    /// Returns the first `ContextError::Configuration` raised by a registration or
    /// by model validation.
    pub fn discover(scope: &str) -> Result<Model, ContextError> {
        let mut builder = ModelBuilder::new(scope);
        apply_all_mappings(&mut builder)?;
        builder.build()
    }

    /// The process-wide model for `scope`, built on first use
    ///
    /// Successful builds are cached; a failed build is reported and retried on the
    /// next call.
    ///
    /// # Errors
    ///
    /// See [`Model::discover`].
    pub fn for_scope(scope: &str) -> Result<Arc<Model>, ContextError> {
        let mut models = MODELS
            .lock()
            .map_err(|e| ContextError::configuration(scope, format!("model cache poisoned: {e}")))?;

        if let Some(model) = models.get(scope) {
            return Ok(Arc::clone(model));
        }

        let model = Arc::new(Model::discover(scope)?);
        log::info!(
            "Built model for scope '{}' with {} entity and {} query mapping(s)",
            scope,
            model.entities.len(),
            model.projections.len()
        );
        models.insert(scope.to_string(), Arc::clone(&model));
        Ok(model)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Schema for entity `E`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `E` has no mapping in this model.
    pub fn entity<E: Entity>(&self) -> Result<&EntitySchema, ContextError> {
        self.entities.get(&TypeId::of::<E>()).ok_or_else(|| {
            ContextError::configuration(
                short_type_name::<E>(),
                format!("entity is not mapped in model scope '{}'", self.scope),
            )
        })
    }

    /// Schema for projection `P`
    ///
    /// # Errors
    ///
    /// Returns `ContextError::Configuration` when `P` has no query mapping in this model.
    pub fn projection<P: Projection>(&self) -> Result<&ProjectionSchema, ContextError> {
        self.projections.get(&TypeId::of::<P>()).ok_or_else(|| {
            ContextError::configuration(
                short_type_name::<P>(),
                format!("projection is not mapped in model scope '{}'", self.scope),
            )
        })
    }

    pub(crate) fn entity_by_type(&self, type_id: TypeId) -> Result<&EntitySchema, ContextError> {
        self.entities.get(&type_id).ok_or_else(|| {
            ContextError::configuration(
                "tracked entity",
                format!("entity type is not mapped in model scope '{}'", self.scope),
            )
        })
    }

    /// Fail early when `E` is not mapped, before any query runs
    ///
    /// # Errors
    ///
    /// See [`Model::entity`].
    pub fn ensure_entity<E: Entity>(&self) -> Result<(), ContextError> {
        self.entity::<E>().map(|_| ())
    }

    pub fn contains_entity<E: Entity>(&self) -> bool {
        self.entities.contains_key(&TypeId::of::<E>())
    }

    pub fn contains_projection<P: Projection>(&self) -> bool {
        self.projections.contains_key(&TypeId::of::<P>())
    }

    /// Entity schemas ordered by qualified table name
    pub fn entity_schemas(&self) -> Vec<&EntitySchema> {
        let mut schemas: Vec<&EntitySchema> = self.entities.values().collect();
        schemas.sort_by_key(|s| s.qualified_table());
        schemas
    }

    pub fn projection_schemas(&self) -> Vec<&ProjectionSchema> {
        let mut schemas: Vec<&ProjectionSchema> = self.projections.values().collect();
        schemas.sort_by_key(|s| s.type_name);
        schemas
    }

    /// Configurations that produced this model, ordered by target name
    pub fn applied_configurations(&self) -> Vec<&AppliedConfiguration> {
        let mut applied: Vec<&AppliedConfiguration> = self.applied.values().collect();
        applied.sort_by_key(|a| (a.target, a.configuration));
        applied
    }

    /// DDL that creates every mapped table of this model
    ///
    /// Deterministic: the same model always yields the same text.
    pub fn generate_create_script(&self) -> String {
        script::generate_create_script(self)
    }
}

//! Compile-time registry of mapping configurations.
//!
//! Every configuration registered with [`register_entity_mapping!`] or
//! [`register_query_mapping!`] becomes a [`MappingRegistration`] collected by
//! `inventory`. The registry applies the registrations of one scope to a
//! [`ModelBuilder`]; nothing is discovered through runtime type scanning.
//!
//! [`register_entity_mapping!`]: crate::register_entity_mapping
//! [`register_query_mapping!`]: crate::register_query_mapping

use super::{EntityTypeConfiguration, QueryTypeConfiguration};
use crate::entity::{Entity, Projection};
use crate::error::ContextError;
use crate::model::ModelBuilder;

/// Scope used when a registration or a context does not name one
pub const DEFAULT_SCOPE: &str = "default";

/// The kind of target a configuration describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    /// A persisted, tracked entity
    Entity,
    /// A read-only query projection
    Query,
}

/// One discovered mapping configuration
///
/// Normally produced by the registration macros; can be built by hand for
/// [`apply_registrations`].
#[derive(Debug)]
pub struct MappingRegistration {
    /// Model scope this configuration belongs to
    pub scope: &'static str,
    /// Name of the configured entity or projection type
    pub target: &'static str,
    /// Name of the configuration type
    pub configuration: &'static str,
    pub kind: MappingKind,
    /// Instantiates the configuration and applies it to the builder
    pub apply: fn(&mut ModelBuilder) -> Result<(), ContextError>,
}

inventory::collect!(MappingRegistration);

/// Instantiate `C` through `factory` and apply it as the entity mapping for `E`
///
/// # Errors
///
/// Returns `ContextError::Configuration` when the factory fails, the entity is
/// already mapped, or the resulting schema is invalid.
#[doc(hidden)]
pub fn apply_entity_with<E, C>(
    builder: &mut ModelBuilder,
    configuration: &'static str,
    factory: fn() -> Result<C, String>,
) -> Result<(), ContextError>
where
    E: Entity,
    C: EntityTypeConfiguration<E> + 'static,
{
    let config = factory().map_err(|e| {
        ContextError::configuration(configuration, format!("could not instantiate configuration: {e}"))
    })?;
    builder.apply_entity_configuration_named::<E, C>(config, configuration)
}

/// Instantiate `C` through `factory` and apply it as the query mapping for `P`
///
/// # Errors
///
/// Returns `ContextError::Configuration` when the factory fails, the projection is
/// already mapped, or the resulting schema is invalid.
#[doc(hidden)]
pub fn apply_query_with<P, C>(
    builder: &mut ModelBuilder,
    configuration: &'static str,
    factory: fn() -> Result<C, String>,
) -> Result<(), ContextError>
where
    P: Projection,
    C: QueryTypeConfiguration<P> + 'static,
{
    let config = factory().map_err(|e| {
        ContextError::configuration(configuration, format!("could not instantiate configuration: {e}"))
    })?;
    builder.apply_query_configuration_named::<P, C>(config, configuration)
}

/// All registrations for `scope`, sorted by target then configuration name
pub fn registrations(scope: &str) -> Vec<&'static MappingRegistration> {
    let mut found: Vec<&'static MappingRegistration> = inventory::iter::<MappingRegistration>
        .into_iter()
        .filter(|r| r.scope == scope)
        .collect();
    sort_registrations(&mut found);
    found
}

fn sort_registrations(regs: &mut [&MappingRegistration]) {
    regs.sort_by(|a, b| {
        (a.target, a.configuration).cmp(&(b.target, b.configuration))
    });
}

/// Apply every registration discovered for the builder's scope
///
/// Returns the number of configurations applied.
///
/// # Errors
///
/// Stops at the first failing configuration and returns its
/// `ContextError::Configuration`; a partially applied builder must be discarded.
pub fn apply_all_mappings(builder: &mut ModelBuilder) -> Result<usize, ContextError> {
    let found = registrations(builder.scope());
    apply_registrations(builder, &found)
}

/// Apply an explicit set of registrations, ignoring their scope
///
/// # Errors
///
/// See [`apply_all_mappings`].
pub fn apply_registrations(
    builder: &mut ModelBuilder,
    regs: &[&MappingRegistration],
) -> Result<usize, ContextError> {
    let mut ordered: Vec<&MappingRegistration> = regs.to_vec();
    sort_registrations(&mut ordered);

    let mut entities = 0usize;
    let mut queries = 0usize;
    for reg in ordered {
        log::debug!(
            "applying {:?} mapping {} for {} (scope '{}')",
            reg.kind,
            reg.configuration,
            reg.target,
            builder.scope()
        );
        (reg.apply)(builder)?;
        match reg.kind {
            MappingKind::Entity => entities += 1,
            MappingKind::Query => queries += 1,
        }
    }

    log::info!(
        "Applied {} entity and {} query mapping(s) to scope '{}'",
        entities,
        queries,
        builder.scope()
    );
    Ok(entities + queries)
}

//! Change tracking
//!
//! The tracker records every entity the context hands out, in tracking order.
//! Entities loaded from the database stay owned by the caller: the tracker holds
//! a weak link to them plus a snapshot of their values at load time, and
//! detects modifications by comparing the two at save time. Added entities are
//! held strongly until they are inserted.

use crate::entity::Entity;
use crate::error::ContextError;
use crate::mapping::EntitySchema;
use crate::model::Model;
use crate::value::DataRow;
use sea_query::Value;
use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};

/// A tracked entity handed out by a context
///
/// Clones share the same entity. Mutations through [`Tracked::borrow_mut`] are
/// picked up by the next `save_changes` while the entity is tracked.
pub struct Tracked<E>(Rc<RefCell<E>>);

impl<E> Tracked<E> {
    pub(crate) fn new(entity: E) -> Self {
        Tracked(Rc::new(RefCell::new(entity)))
    }

    /// # Panics
    ///
    /// Panics if the entity is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, E> {
        self.0.borrow()
    }

    /// # Panics
    ///
    /// Panics if the entity is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, E> {
        self.0.borrow_mut()
    }

    /// Whether both handles point at the same tracked instance
    pub fn ptr_eq(a: &Tracked<E>, b: &Tracked<E>) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    fn downgrade(&self) -> Weak<RefCell<E>> {
        Rc::downgrade(&self.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl<E: Clone> Tracked<E> {
    /// A detached copy of the current values
    pub fn snapshot(&self) -> E {
        self.0.borrow().clone()
    }
}

impl<E> Clone for Tracked<E> {
    fn clone(&self) -> Self {
        Tracked(Rc::clone(&self.0))
    }
}

impl<E: fmt::Debug> fmt::Debug for Tracked<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&*self.0.borrow()).finish()
    }
}

/// Lifecycle state of a tracked entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Will be inserted by the next save
    Added,
    /// Loaded or saved, no changes since
    Unchanged,
    /// Loaded or saved, values differ from the snapshot
    Modified,
    /// Will be deleted by the next save
    Deleted,
    /// Not tracked by this context
    Detached,
}

/// A statement the tracker wants executed during save
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingWrite {
    pub sql: String,
    pub values: Vec<Value>,
    /// The statement returns generated values that must be read back
    pub returning: bool,
}

enum Link<E> {
    Strong(Rc<RefCell<E>>),
    Weak(Weak<RefCell<E>>),
}

impl<E> Link<E> {
    fn upgrade(&self) -> Option<Rc<RefCell<E>>> {
        match self {
            Link::Strong(rc) => Some(Rc::clone(rc)),
            Link::Weak(weak) => weak.upgrade(),
        }
    }
}

struct Entry<E: Entity> {
    link: Link<E>,
    /// Values at load time (or at the last save); empty for Added entries
    original: Vec<(&'static str, Value)>,
    state: EntityState,
}

/// Type-erased view of an [`Entry`]
trait AnyEntry {
    fn entity_type(&self) -> TypeId;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn is_alive(&self) -> bool;
    fn state(&self) -> EntityState;
    fn addr(&self) -> Option<usize>;
    fn pending_write(&self, schema: &EntitySchema) -> Result<Option<PendingWrite>, ContextError>;
    /// Fold a successful write back into the entry; returns `false` when the entry must be dropped
    fn accept(&mut self, schema: &EntitySchema, returned: Option<DataRow>) -> Result<bool, ContextError>;
    fn identity(&self, schema: &EntitySchema) -> Option<Identity>;
}

impl<E: Entity> AnyEntry for Entry<E> {
    fn entity_type(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_alive(&self) -> bool {
        self.link.upgrade().is_some()
    }

    fn state(&self) -> EntityState {
        match self.state {
            EntityState::Unchanged => match self.link.upgrade() {
                Some(rc) if rc.borrow().values() != self.original => EntityState::Modified,
                Some(_) => EntityState::Unchanged,
                None => EntityState::Detached,
            },
            other => other,
        }
    }

    fn addr(&self) -> Option<usize> {
        self.link
            .upgrade()
            .map(|rc| Rc::as_ptr(&rc) as *const () as usize)
    }

    fn pending_write(&self, schema: &EntitySchema) -> Result<Option<PendingWrite>, ContextError> {
        let Some(rc) = self.link.upgrade() else {
            return Ok(None);
        };
        let current = rc.borrow().values();
        match self.state() {
            EntityState::Added => sql::insert(schema, &current).map(Some),
            EntityState::Modified => {
                if let Some(property) = sql::changed_key_property(schema, &self.original, &current) {
                    return Err(ContextError::InvalidArgument(format!(
                        "key property '{property}' of a tracked {} was changed; \
                         detach it and add a new entity instead",
                        schema.type_name
                    )));
                }
                sql::update(schema, &self.original, &current)
            }
            EntityState::Deleted => sql::delete(schema, &self.original).map(Some),
            EntityState::Unchanged | EntityState::Detached => Ok(None),
        }
    }

    fn accept(&mut self, schema: &EntitySchema, returned: Option<DataRow>) -> Result<bool, ContextError> {
        let Some(rc) = self.link.upgrade() else {
            return Ok(false);
        };
        match self.state {
            EntityState::Deleted => Ok(false),
            EntityState::Added => {
                if let Some(row) = returned {
                    let merged = merge_generated::<E>(schema, &rc.borrow(), row)?;
                    *rc.borrow_mut() = merged;
                }
                self.original = rc.borrow().values();
                self.state = EntityState::Unchanged;
                self.link = Link::Weak(Rc::downgrade(&rc));
                Ok(true)
            }
            _ => {
                self.original = rc.borrow().values();
                self.state = EntityState::Unchanged;
                Ok(true)
            }
        }
    }

    fn identity(&self, schema: &EntitySchema) -> Option<Identity> {
        match self.state {
            EntityState::Added => None,
            _ => Some(identity_of::<E>(schema, &self.original)),
        }
    }
}

/// Rebuild an inserted entity with the values the database generated
fn merge_generated<E: Entity>(schema: &EntitySchema, entity: &E, returned: DataRow) -> Result<E, ContextError> {
    let returned = returned.remap(|c| schema.property_for_column(c).map(str::to_string));
    let mut row = DataRow::new();
    for (property, value) in entity.values() {
        let value = returned.value(property).cloned().unwrap_or(value);
        row.push(property, value);
    }
    E::from_row(&row)
}

/// Identity of a tracked entity: its concrete type plus its key values
pub(crate) type Identity = (TypeId, String);

pub(crate) fn identity_of<E: 'static>(schema: &EntitySchema, values: &[(&'static str, Value)]) -> Identity {
    let key: Vec<&Value> = schema
        .key
        .iter()
        .filter_map(|k| values.iter().find(|(p, _)| *p == k.as_str()).map(|(_, v)| v))
        .collect();
    key_identity::<E>(&key)
}

/// Identity for key values given in key order
pub(crate) fn key_identity<E: 'static>(key: &[&Value]) -> Identity {
    (TypeId::of::<E>(), format!("{key:?}"))
}

/// Tracking table of one context
#[derive(Default)]
pub struct ChangeTracker {
    entries: BTreeMap<u64, Box<dyn AnyEntry>>,
    identities: HashMap<Identity, u64>,
    next_id: u64,
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, entry: Box<dyn AnyEntry>, identity: Option<Identity>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if let Some(identity) = identity {
            self.identities.insert(identity, id);
        }
        self.entries.insert(id, entry);
        id
    }

    fn find_by_addr(&self, addr: usize) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, e)| e.addr() == Some(addr))
            .map(|(id, _)| *id)
    }

    /// Track an entity just loaded from the database
    ///
    /// When an entity with the same key is already tracked, that instance is
    /// returned and `loaded` is discarded; in-memory changes win over the store.
    pub(crate) fn track_loaded<E: Entity>(&mut self, schema: &EntitySchema, loaded: E) -> Tracked<E> {
        let values = loaded.values();
        let identity = identity_of::<E>(schema, &values);

        if let Some(existing) = self.lookup::<E>(&identity) {
            return existing;
        }

        let tracked = Tracked::new(loaded);
        let entry = Entry {
            link: Link::Weak(tracked.downgrade()),
            original: values,
            state: EntityState::Unchanged,
        };
        self.insert(Box::new(entry), Some(identity));
        tracked
    }

    /// Tracked instance with the given identity, if still alive
    ///
    /// Only an entry of type `E` whose entity was dropped is forgotten here.
    pub(crate) fn lookup<E: Entity>(&mut self, identity: &Identity) -> Option<Tracked<E>> {
        if identity.0 != TypeId::of::<E>() {
            return None;
        }
        let id = *self.identities.get(identity)?;
        let upgraded = self
            .entries
            .get(&id)?
            .as_any()
            .downcast_ref::<Entry<E>>()?
            .link
            .upgrade();

        match upgraded {
            Some(rc) => Some(Tracked(rc)),
            None => {
                self.identities.remove(identity);
                self.entries.remove(&id);
                None
            }
        }
    }

    /// Start tracking a new entity to be inserted
    pub(crate) fn track_added<E: Entity>(&mut self, entity: E) -> Tracked<E> {
        let tracked = Tracked::new(entity);
        let entry: Entry<E> = Entry {
            link: Link::Strong(Rc::clone(&tracked.0)),
            original: Vec::new(),
            state: EntityState::Added,
        };
        self.insert(Box::new(entry), None);
        tracked
    }

    /// Start tracking an existing row as unchanged
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when another instance with the same
    /// key is already tracked.
    pub(crate) fn track_attached<E: Entity>(
        &mut self,
        schema: &EntitySchema,
        entity: E,
    ) -> Result<Tracked<E>, ContextError> {
        let identity = identity_of::<E>(schema, &entity.values());
        if self.lookup::<E>(&identity).is_some() {
            return Err(ContextError::InvalidArgument(format!(
                "another instance of {} with the same key is already tracked",
                schema.type_name
            )));
        }
        Ok(self.track_loaded(schema, entity))
    }

    /// Mark an entity for deletion
    ///
    /// Removing an added entity simply stops tracking it.
    ///
    /// # Errors
    ///
    /// Returns `ContextError::InvalidArgument` when the entity is not tracked.
    pub(crate) fn mark_deleted<E: Entity>(&mut self, entity: &Tracked<E>) -> Result<(), ContextError> {
        let id = self.find_by_addr(entity.addr()).ok_or_else(|| {
            ContextError::InvalidArgument("cannot remove an entity that is not tracked".to_string())
        })?;
        let added = self
            .entries
            .get(&id)
            .is_some_and(|e| e.state() == EntityState::Added);
        if added {
            self.entries.remove(&id);
            return Ok(());
        }
        if let Some(entry) = self
            .entries
            .get_mut(&id)
            .and_then(|e| e.as_any_mut().downcast_mut::<Entry<E>>())
        {
            // Deletion goes by the key as loaded
            entry.state = EntityState::Deleted;
            entry.link = Link::Strong(Rc::clone(&entity.0));
        }
        Ok(())
    }

    /// Stop tracking `entity`; returns whether it was tracked
    pub fn detach<E: 'static>(&mut self, entity: &Tracked<E>) -> bool {
        let Some(id) = self.find_by_addr(entity.addr()) else {
            return false;
        };
        self.entries.remove(&id);
        self.identities.retain(|_, v| *v != id);
        true
    }

    pub fn state_of<E: 'static>(&self, entity: &Tracked<E>) -> EntityState {
        self.find_by_addr(entity.addr())
            .and_then(|id| self.entries.get(&id))
            .map_or(EntityState::Detached, |e| e.state())
    }

    /// Live tracked entities of type `E`, in tracking order
    pub fn entities<E: Entity>(&self) -> Vec<Tracked<E>> {
        self.entries
            .values()
            .filter(|e| e.entity_type() == TypeId::of::<E>() && e.state() != EntityState::Deleted)
            .filter_map(|e| e.as_any().downcast_ref::<Entry<E>>())
            .filter_map(|e| e.link.upgrade().map(Tracked))
            .collect()
    }

    /// Number of live tracked entities
    pub fn len(&self) -> usize {
        self.entries.values().filter(|e| e.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any entry would produce a write
    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|e| {
            matches!(
                e.state(),
                EntityState::Added | EntityState::Modified | EntityState::Deleted
            )
        })
    }

    /// Drop entries whose entity no caller holds anymore
    pub(crate) fn prune(&mut self) {
        let dead: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_alive())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.entries.remove(id);
        }
        self.identities.retain(|_, v| !dead.contains(v));
    }

    /// Pending writes in tracking order, with the id of the entry that produced each
    pub(crate) fn pending_writes(&self, model: &Model) -> Result<Vec<(u64, PendingWrite)>, ContextError> {
        let mut writes = Vec::new();
        for (id, entry) in &self.entries {
            let schema = model.entity_by_type(entry.entity_type())?;
            if let Some(write) = entry.pending_write(schema)? {
                writes.push((*id, write));
            }
        }
        Ok(writes)
    }

    /// Accept a completed write for entry `id`
    pub(crate) fn accept(
        &mut self,
        id: u64,
        schema: &EntitySchema,
        returned: Option<DataRow>,
    ) -> Result<(), ContextError> {
        let Some(entry) = self.entries.get_mut(&id) else {
            return Ok(());
        };
        let keep = entry.accept(schema, returned)?;
        let identity = if keep { entry.identity(schema) } else { None };
        self.identities.retain(|_, v| *v != id);
        match identity {
            Some(identity) => {
                self.identities.insert(identity, id);
            }
            None => {
                self.entries.remove(&id);
            }
        }
        Ok(())
    }

    pub(crate) fn entity_type_of(&self, id: u64) -> Option<TypeId> {
        self.entries.get(&id).map(|e| e.entity_type())
    }
}

/// Statement builders for tracked writes
pub(crate) mod sql {
    use super::PendingWrite;
    use crate::error::ContextError;
    use crate::mapping::EntitySchema;
    use crate::value::is_null;
    use sea_query::{
        Alias, Expr, ExprTrait, IntoTableRef, PostgresQueryBuilder, Query, TableRef, Value,
    };

    pub(crate) fn table_ref(schema: &EntitySchema) -> TableRef {
        match &schema.schema {
            Some(namespace) => {
                (Alias::new(namespace.clone()), Alias::new(schema.table.clone())).into_table_ref()
            }
            None => Alias::new(schema.table.clone()).into_table_ref(),
        }
    }

    fn key_values<'v>(
        schema: &EntitySchema,
        values: &'v [(&'static str, Value)],
    ) -> Result<Vec<(String, &'v Value)>, ContextError> {
        schema
            .key
            .iter()
            .map(|property| {
                let column = schema
                    .column_for(property)
                    .map(|c| c.column.clone())
                    .unwrap_or_else(|| property.clone());
                values
                    .iter()
                    .find(|(p, _)| *p == property.as_str())
                    .map(|(_, v)| (column, v))
                    .ok_or_else(|| {
                        ContextError::materialization(
                            schema.type_name,
                            format!("key property '{property}' has no value"),
                        )
                    })
            })
            .collect()
    }

    pub(super) fn insert(
        schema: &EntitySchema,
        values: &[(&'static str, Value)],
    ) -> Result<PendingWrite, ContextError> {
        let mut columns = Vec::new();
        let mut exprs = Vec::new();
        let mut generated = Vec::new();

        for column in &schema.columns {
            let value = values.iter().find(|(p, _)| *p == column.property).map(|(_, v)| v);
            if column.generated_on_add {
                generated.push(Alias::new(column.column.clone()));
                // Generated columns are left to the database unless a value was supplied
                match value {
                    Some(v) if !is_null(v) && !is_default_key(v) => {}
                    _ => continue,
                }
            }
            let Some(value) = value else { continue };
            columns.push(Alias::new(column.column.clone()));
            exprs.push(Expr::val(value.clone()));
        }

        let mut query = Query::insert();
        query.into_table(table_ref(schema));
        if columns.is_empty() {
            query.or_default_values();
        } else {
            query.columns(columns);
            query
                .values(exprs)
                .map_err(|e| ContextError::materialization(schema.type_name, e.to_string()))?;
        }
        let returning = !generated.is_empty();
        if returning {
            query.returning(Query::returning().columns(generated));
        }

        let (sql, values) = query.build(PostgresQueryBuilder);
        Ok(PendingWrite {
            sql,
            values: values.0,
            returning,
        })
    }

    /// Integer zero is the unset value of an identity key
    fn is_default_key(value: &Value) -> bool {
        matches!(
            value,
            Value::SmallInt(Some(0)) | Value::Int(Some(0)) | Value::BigInt(Some(0))
        )
    }

    /// First key property whose value differs from the loaded one
    pub(super) fn changed_key_property<'s>(
        schema: &'s EntitySchema,
        original: &[(&'static str, Value)],
        current: &[(&'static str, Value)],
    ) -> Option<&'s str> {
        let value_of = |values: &[(&'static str, Value)], property: &str| {
            values.iter().find(|(p, _)| *p == property).map(|(_, v)| v.clone())
        };
        schema
            .key
            .iter()
            .find(|k| value_of(original, k.as_str()) != value_of(current, k.as_str()))
            .map(String::as_str)
    }

    pub(super) fn update(
        schema: &EntitySchema,
        original: &[(&'static str, Value)],
        current: &[(&'static str, Value)],
    ) -> Result<Option<PendingWrite>, ContextError> {
        let mut query = Query::update();
        query.table(table_ref(schema));

        let mut changed = 0usize;
        for column in &schema.columns {
            if schema.is_key(&column.property) {
                continue;
            }
            let before = original.iter().find(|(p, _)| *p == column.property).map(|(_, v)| v);
            let after = current.iter().find(|(p, _)| *p == column.property).map(|(_, v)| v);
            if let Some(after) = after {
                if before != Some(after) {
                    query.value(Alias::new(column.column.clone()), after.clone());
                    changed += 1;
                }
            }
        }
        if changed == 0 {
            return Ok(None);
        }

        for (column, value) in key_values(schema, original)? {
            query.and_where(Expr::col(Alias::new(column)).eq(value.clone()));
        }

        let (sql, values) = query.build(PostgresQueryBuilder);
        Ok(Some(PendingWrite {
            sql,
            values: values.0,
            returning: false,
        }))
    }

    pub(super) fn delete(
        schema: &EntitySchema,
        original: &[(&'static str, Value)],
    ) -> Result<PendingWrite, ContextError> {
        let mut query = Query::delete();
        query.from_table(table_ref(schema));
        for (column, value) in key_values(schema, original)? {
            query.and_where(Expr::col(Alias::new(column)).eq(value.clone()));
        }

        let (sql, values) = query.build(PostgresQueryBuilder);
        Ok(PendingWrite {
            sql,
            values: values.0,
            returning: false,
        })
    }
}

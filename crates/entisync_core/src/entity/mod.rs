//! Entities and dirty tracking.
//!
//! An [`Entity`] is a local replica of one server-managed record. Besides
//! its attributes it tracks:
//!
//! - the **dirty set**: attributes changed locally since the last
//!   successful reconciliation with the server, keyed to the value the
//!   local write produced
//! - whether a remote read ever completed (`fetched`)
//! - local destroy intent and remote destroy confirmation
//!
//! ## Invariants
//!
//! - Dirty keys are a subset of the attribute keys, minus the identity fields
//! - The server id is write-once
//! - Remote destroy confirmation implies destroy intent

mod id;

pub use id::ClientId;

use crate::attributes::{AttributeChange, AttributeObserver, AttributeStore, SetMode};
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::registry::Registry;
use crate::value::{Attributes, Value};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Outcome of folding a server-confirmed payload into an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Dirty keys whose sent value was confirmed and that are now clean.
    pub cleared: Vec<String>,
    /// Dirty keys that changed locally after the payload was sent.
    pub retained: Vec<String>,
    /// Server values written into the attributes.
    pub applied: Vec<AttributeChange>,
}

/// Point-in-time view of an entity, for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySnapshot {
    /// Client ID.
    pub client_id: ClientId,
    /// Server ID, once assigned.
    pub server_id: Option<Value>,
    /// All attributes.
    pub attributes: Attributes,
    /// Dirty attributes.
    pub dirtied: Attributes,
    /// Whether a remote read or create completed.
    pub fetched: bool,
    /// Whether a remote delete was confirmed.
    pub destroyed: bool,
    /// Whether a local destroy was requested.
    pub destroy_intent: bool,
}

struct EntityState {
    store: AttributeStore,
    dirtied: Attributes,
    fetched: bool,
    destroyed_remotely: bool,
    destroy_intent: bool,
}

impl EntityState {
    fn server_id<M: Model>(&self) -> Option<Value> {
        self.store
            .get(M::ID_FIELD)
            .filter(|v| !v.is_null())
            .cloned()
    }
}

/// A locally held record with change tracking.
///
/// Entities are created through their type's [`Registry`], which
/// deduplicates them by client id and server id; they are shared as
/// `Arc<Entity<M>>`.
pub struct Entity<M: Model> {
    client_id: ClientId,
    registry: Weak<Registry<M>>,
    state: RwLock<EntityState>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Entity<M> {
    /// Builds a new entity from raw attributes.
    ///
    /// Defaults are merged underneath, the parse step and validation hook
    /// run, and a client id is generated if the attributes carry none. A
    /// record without a server id is new: all of its non-identity
    /// attributes start dirty.
    pub(crate) fn build(registry: Weak<Registry<M>>, attributes: Attributes) -> CoreResult<Self> {
        let mut merged = M::defaults();
        merged.extend(attributes);
        let mut parsed = M::parse(merged);

        if parsed.get(M::ID_FIELD).is_some_and(Value::is_null) {
            parsed.remove(M::ID_FIELD);
        }

        let client_id = parsed
            .get(M::CLIENT_ID_FIELD)
            .and_then(ClientId::from_value)
            .unwrap_or_default();
        parsed.insert(M::CLIENT_ID_FIELD.to_string(), client_id.to_value());

        M::validate(&parsed).map_err(|message| CoreError::Validation {
            model: M::NAME,
            message,
        })?;

        let dirtied = if parsed.contains_key(M::ID_FIELD) {
            Attributes::new()
        } else {
            parsed
                .iter()
                .filter(|(k, _)| !M::is_identity_field(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        Ok(Self {
            client_id,
            registry,
            state: RwLock::new(EntityState {
                store: AttributeStore::new(parsed),
                dirtied,
                fetched: false,
                destroyed_remotely: false,
                destroy_intent: false,
            }),
            _model: PhantomData,
        })
    }

    /// Returns the client id.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Returns the server id, if the server has assigned one.
    pub fn server_id(&self) -> Option<Value> {
        self.state.read().server_id::<M>()
    }

    /// Returns true if the entity has never been confirmed by the server.
    pub fn is_new(&self) -> bool {
        self.server_id().is_none()
    }

    /// Gets a single attribute.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.read().store.get(key).cloned()
    }

    /// Returns a copy of all attributes.
    pub fn attributes(&self) -> Attributes {
        self.state.read().store.snapshot()
    }

    /// Returns the registry this entity belongs to, if it is still alive.
    pub fn registry(&self) -> Option<Arc<Registry<M>>> {
        self.registry.upgrade()
    }

    /// Sets a single attribute.
    pub fn set_one(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
        mode: SetMode,
    ) -> CoreResult<Vec<AttributeChange>> {
        let mut changes = Attributes::new();
        changes.insert(key.into(), value.into());
        self.set_many(changes, mode)
    }

    /// Merges `changes` into the attributes.
    ///
    /// In [`SetMode::Client`] every changed non-identity key is recorded in
    /// the dirty set with its new value, and the model's validation hook
    /// must accept the resulting state. In [`SetMode::Server`] the write is
    /// authoritative and leaves the dirty set alone.
    ///
    /// Returns the attributes that actually changed.
    pub fn set_many(&self, changes: Attributes, mode: SetMode) -> CoreResult<Vec<AttributeChange>> {
        let (applied, assigned, observers) = {
            let mut state = self.state.write();
            let current_id = state.server_id::<M>();
            let changes = self.check_identity(current_id.as_ref(), changes)?;
            if current_id.is_none() {
                if let Some(id) = changes.get(M::ID_FIELD) {
                    if self.server_id_taken(id) {
                        return Err(CoreError::invalid_operation(format!(
                            "{} {id} belongs to another {} entity",
                            M::ID_FIELD,
                            M::NAME
                        )));
                    }
                }
            }

            if mode == SetMode::Client {
                let candidate = state.store.preview(&changes);
                M::validate(&candidate).map_err(|message| CoreError::Validation {
                    model: M::NAME,
                    message,
                })?;
            }

            let applied = state.store.merge(changes);
            if mode == SetMode::Client {
                for change in &applied {
                    if !M::is_identity_field(&change.key) {
                        state
                            .dirtied
                            .insert(change.key.clone(), change.current.clone());
                    }
                }
            }

            let assigned = match current_id {
                None => state.server_id::<M>(),
                Some(_) => None,
            };
            (applied, assigned, state.store.observers())
        };

        trace!(
            model = M::NAME,
            client_id = %self.client_id,
            %mode,
            changed = applied.len(),
            "attributes set"
        );
        self.after_write(assigned, &applied, &observers, mode);
        Ok(applied)
    }

    /// Returns true if `key` is in the dirty set.
    pub fn has_dirtied(&self, key: &str) -> bool {
        self.state.read().dirtied.contains_key(key)
    }

    /// Returns true if the dirty set is non-empty.
    pub fn is_dirty(&self) -> bool {
        !self.state.read().dirtied.is_empty()
    }

    /// Returns an independent copy of the dirty set.
    pub fn dirtied_attributes(&self) -> Attributes {
        self.state.read().dirtied.clone()
    }

    /// Returns true if a remote read or create has completed.
    pub fn is_fetched(&self) -> bool {
        self.state.read().fetched
    }

    /// Returns true if a remote delete was confirmed.
    pub fn is_destroyed(&self) -> bool {
        self.state.read().destroyed_remotely
    }

    /// Returns true if a local destroy was requested.
    pub fn is_dirty_destroyed(&self) -> bool {
        self.state.read().destroy_intent
    }

    /// Returns true if pushing this entity would perform a remote operation.
    pub fn has_pending_intent(&self) -> bool {
        let state = self.state.read();
        if state.destroyed_remotely {
            return false;
        }
        let is_new = state.server_id::<M>().is_none();
        if state.destroy_intent {
            !is_new
        } else {
            is_new || !state.dirtied.is_empty()
        }
    }

    /// Registers an attribute observer.
    pub fn observe(&self, observer: Arc<dyn AttributeObserver>) {
        self.state.write().store.observe(observer);
    }

    /// Records that a remote read (or create) completed.
    pub fn mark_fetched(&self) {
        self.state.write().fetched = true;
    }

    /// Records a local destroy request.
    pub fn mark_destroy_intent(&self) {
        self.state.write().destroy_intent = true;
    }

    /// Records that the server confirmed deletion.
    pub fn confirm_destroyed(&self) {
        let mut state = self.state.write();
        state.destroy_intent = true;
        state.destroyed_remotely = true;
    }

    /// Folds a successful server response into the entity.
    ///
    /// `sent` is the payload that was sent; `confirmed` holds the attributes
    /// the server returned. Confirmed values are written in server mode,
    /// except for keys whose dirty value differs from what was sent (a local
    /// write landed while the request was in flight). Afterwards every sent
    /// key whose dirty value still equals the sent value is cleared; the
    /// others stay dirty.
    pub fn reconcile(&self, sent: &Attributes, confirmed: Attributes) -> Reconciliation {
        let (result, assigned, observers) = {
            let mut state = self.state.write();
            let current_id = state.server_id::<M>();

            let mut accepted = Attributes::new();
            for (key, value) in confirmed {
                if key == M::CLIENT_ID_FIELD {
                    continue;
                }
                if key == M::ID_FIELD {
                    if value.is_null() {
                        continue;
                    }
                    if current_id.is_none() && self.server_id_taken(&value) {
                        warn!(
                            model = M::NAME,
                            client_id = %self.client_id,
                            offered = %value,
                            "ignoring server id held by another entity"
                        );
                        continue;
                    }
                    if let Some(existing) = &current_id {
                        if existing != &value {
                            warn!(
                                model = M::NAME,
                                client_id = %self.client_id,
                                held = %existing,
                                offered = %value,
                                "ignoring server id reassignment"
                            );
                        }
                        continue;
                    }
                }
                if let Some(dirty) = state.dirtied.get(&key) {
                    if sent.get(&key) != Some(dirty) {
                        continue;
                    }
                }
                accepted.insert(key, value);
            }

            let applied = state.store.merge(accepted);

            let mut cleared = Vec::new();
            let mut retained = Vec::new();
            for (key, value) in sent {
                match state.dirtied.get(key) {
                    Some(dirty) if dirty == value => {
                        state.dirtied.remove(key);
                        cleared.push(key.clone());
                    }
                    Some(_) => retained.push(key.clone()),
                    None => {}
                }
            }

            let assigned = match current_id {
                None => state.server_id::<M>(),
                Some(_) => None,
            };
            (
                Reconciliation {
                    cleared,
                    retained,
                    applied,
                },
                assigned,
                state.store.observers(),
            )
        };

        self.after_write(assigned, &result.applied, &observers, SetMode::Server);
        result
    }

    /// Returns a snapshot of the full entity state.
    pub fn snapshot(&self) -> EntitySnapshot {
        let state = self.state.read();
        EntitySnapshot {
            client_id: self.client_id.clone(),
            server_id: state.server_id::<M>(),
            attributes: state.store.snapshot(),
            dirtied: state.dirtied.clone(),
            fetched: state.fetched,
            destroyed: state.destroyed_remotely,
            destroy_intent: state.destroy_intent,
        }
    }

    /// Returns true if another entity in the registry holds `server_id`.
    fn server_id_taken(&self, server_id: &Value) -> bool {
        self.registry
            .upgrade()
            .and_then(|registry| registry.server_id_owner(server_id))
            .is_some_and(|owner| owner != self.client_id)
    }

    /// Drops identity no-ops and rejects identity rewrites.
    fn check_identity(
        &self,
        current_id: Option<&Value>,
        mut changes: Attributes,
    ) -> CoreResult<Attributes> {
        if let Some(value) = changes.get(M::CLIENT_ID_FIELD) {
            if value != &self.client_id.to_value() {
                return Err(CoreError::immutable_field(M::CLIENT_ID_FIELD));
            }
        }
        if let Some(value) = changes.get(M::ID_FIELD) {
            match current_id {
                Some(existing) if existing != value => {
                    return Err(CoreError::immutable_field(M::ID_FIELD));
                }
                None if value.is_null() => {
                    changes.remove(M::ID_FIELD);
                }
                _ => {}
            }
        }
        Ok(changes)
    }

    /// Indexes a newly assigned server id and notifies observers.
    ///
    /// Must be called with the state lock released.
    fn after_write(
        &self,
        assigned: Option<Value>,
        applied: &[AttributeChange],
        observers: &[Arc<dyn AttributeObserver>],
        mode: SetMode,
    ) {
        if let Some(server_id) = assigned {
            if let Some(registry) = self.registry.upgrade() {
                registry.index_server_id(&self.client_id, server_id);
            }
        }
        if applied.is_empty() {
            return;
        }
        for observer in observers {
            observer.attributes_changed(&self.client_id, applied, mode);
        }
    }
}

impl<M: Model> fmt::Debug for Entity<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Entity")
            .field("model", &M::NAME)
            .field("client_id", &self.client_id)
            .field("attributes", state.store.values())
            .field("dirtied", &state.dirtied)
            .field("fetched", &state.fetched)
            .field("destroyed_remotely", &state.destroyed_remotely)
            .field("destroy_intent", &state.destroy_intent)
            .finish()
    }
}

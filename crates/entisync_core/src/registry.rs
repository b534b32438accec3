//! Identity registries.
//!
//! A [`Registry`] holds exactly one [`Entity`] per client id (and per
//! server id, once assigned) for a given [`Model`]. Construction goes
//! through [`Registry::create`], which returns the existing instance when
//! the attributes identify one.
//!
//! Membership only changes through construction, explicit
//! [`add`](Registry::add)/[`remove`](Registry::remove) and
//! [`reset`](Registry::reset). A local destroy intent never removes an
//! entity; the sync layer removes it once the server confirms the delete.

use crate::attributes::SetMode;
use crate::entity::{ClientId, Entity};
use crate::error::{CoreError, CoreResult};
use crate::model::Model;
use crate::value::{Attributes, Value};
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

struct Slot<M: Model> {
    seq: u64,
    entity: Arc<Entity<M>>,
}

struct RegistryInner<M: Model> {
    by_client: HashMap<ClientId, Slot<M>>,
    by_server: HashMap<Value, ClientId>,
    next_seq: u64,
}

impl<M: Model> RegistryInner<M> {
    fn lookup(&self, attributes: &Attributes) -> CoreResult<Option<Arc<Entity<M>>>> {
        let found = self.find(attributes);
        if let (Some(entity), Some(id)) = (&found, attributes.get(M::ID_FIELD)) {
            let owner = self.by_server.get(id);
            if owner.is_some_and(|cid| cid != entity.client_id()) {
                return Err(CoreError::invalid_operation(format!(
                    "{} {id} belongs to another {} entity",
                    M::ID_FIELD,
                    M::NAME
                )));
            }
        }
        Ok(found)
    }

    fn find(&self, attributes: &Attributes) -> Option<Arc<Entity<M>>> {
        let by_client = attributes
            .get(M::CLIENT_ID_FIELD)
            .and_then(ClientId::from_value)
            .and_then(|cid| self.by_client.get(&cid));
        if let Some(slot) = by_client {
            return Some(Arc::clone(&slot.entity));
        }

        attributes
            .get(M::ID_FIELD)
            .filter(|v| !v.is_null())
            .and_then(|id| self.by_server.get(id))
            .and_then(|cid| self.by_client.get(cid))
            .map(|slot| Arc::clone(&slot.entity))
    }

    fn insert(&mut self, entity: Arc<Entity<M>>, server_id: Option<Value>) -> bool {
        let client_id = entity.client_id().clone();
        if self.by_client.contains_key(&client_id) {
            return false;
        }
        if server_id
            .as_ref()
            .is_some_and(|id| self.by_server.contains_key(id))
        {
            return false;
        }
        if let Some(server_id) = server_id {
            self.by_server.insert(server_id, client_id.clone());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_client.insert(client_id, Slot { seq, entity });
        true
    }
}

/// Deduplicating collection of entities of one model type.
pub struct Registry<M: Model> {
    inner: RwLock<RegistryInner<M>>,
}

impl<M: Model> Registry<M> {
    /// Creates an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(RegistryInner {
                by_client: HashMap::new(),
                by_server: HashMap::new(),
                next_seq: 0,
            }),
        })
    }

    /// Returns the entity identified by `attributes`, creating it if needed.
    ///
    /// If the client id or server id in `attributes` matches a registered
    /// entity, that entity is updated with a local (client-mode) merge of
    /// the remaining attributes and returned. Otherwise a new entity is
    /// built and registered.
    ///
    /// Fails with [`CoreError::InvalidOperation`] if the client id and the
    /// server id identify two different registered entities.
    pub fn create(self: &Arc<Self>, attributes: Attributes) -> CoreResult<Arc<Entity<M>>> {
        let existing = {
            let mut inner = self.inner.write();
            match inner.lookup(&attributes)? {
                Some(existing) => existing,
                None => {
                    let entity = Arc::new(Entity::build(Arc::downgrade(self), attributes)?);
                    let server_id = entity.server_id();
                    inner.insert(Arc::clone(&entity), server_id);
                    debug!(model = M::NAME, client_id = %entity.client_id(), "entity registered");
                    return Ok(entity);
                }
            }
        };

        let mut merge = attributes;
        merge.remove(M::CLIENT_ID_FIELD);
        if merge.get(M::ID_FIELD).is_some_and(Value::is_null) {
            merge.remove(M::ID_FIELD);
        }
        existing.set_many(merge, SetMode::Client)?;
        Ok(existing)
    }

    /// Finds the registered entity whose client id or server id appears in
    /// `attributes`. Never constructs.
    pub fn find(&self, attributes: &Attributes) -> Option<Arc<Entity<M>>> {
        self.inner.read().find(attributes)
    }

    /// Gets an entity by client id.
    pub fn get(&self, client_id: &ClientId) -> Option<Arc<Entity<M>>> {
        self.inner
            .read()
            .by_client
            .get(client_id)
            .map(|slot| Arc::clone(&slot.entity))
    }

    /// Gets an entity by server id.
    pub fn get_by_server_id(&self, server_id: &Value) -> Option<Arc<Entity<M>>> {
        let inner = self.inner.read();
        inner
            .by_server
            .get(server_id)
            .and_then(|cid| inner.by_client.get(cid))
            .map(|slot| Arc::clone(&slot.entity))
    }

    /// Returns true if an entity with this client id is registered.
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.inner.read().by_client.contains_key(client_id)
    }

    /// Registers an entity.
    ///
    /// Returns false if it was already registered or another entity holds
    /// its server id.
    pub fn add(&self, entity: &Arc<Entity<M>>) -> bool {
        let server_id = entity.server_id();
        let added = self.inner.write().insert(Arc::clone(entity), server_id);
        if added {
            debug!(model = M::NAME, client_id = %entity.client_id(), "entity added");
        }
        added
    }

    /// Deregisters an entity. Returns false if it was not registered.
    pub fn remove(&self, entity: &Entity<M>) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.by_client.remove(entity.client_id()).is_some();
        if removed {
            inner.by_server.retain(|_, cid| cid != entity.client_id());
            debug!(model = M::NAME, client_id = %entity.client_id(), "entity removed");
        }
        removed
    }

    /// Returns all registered entities in registration order.
    pub fn all(&self) -> Vec<Arc<Entity<M>>> {
        let inner = self.inner.read();
        let mut slots: Vec<&Slot<M>> = inner.by_client.values().collect();
        slots.sort_by_key(|slot| slot.seq);
        slots
            .into_iter()
            .map(|slot| Arc::clone(&slot.entity))
            .collect()
    }

    /// Returns the registered entities that have something to push.
    pub fn pending(&self) -> Vec<Arc<Entity<M>>> {
        self.all()
            .into_iter()
            .filter(|entity| entity.has_pending_intent())
            .collect()
    }

    /// Returns the number of registered entities.
    pub fn len(&self) -> usize {
        self.inner.read().by_client.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears membership.
    ///
    /// Entities referenced elsewhere are unaffected.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let dropped = inner.by_client.len();
        inner.by_client.clear();
        inner.by_server.clear();
        debug!(model = M::NAME, dropped, "registry reset");
    }

    /// Returns the client id of the registered entity holding `server_id`.
    pub(crate) fn server_id_owner(&self, server_id: &Value) -> Option<ClientId> {
        self.inner.read().by_server.get(server_id).cloned()
    }

    /// Indexes a newly assigned server id for a registered entity.
    ///
    /// An id already held by another entity is left with its owner.
    pub(crate) fn index_server_id(&self, client_id: &ClientId, server_id: Value) {
        let mut inner = self.inner.write();
        if !inner.by_client.contains_key(client_id) {
            return;
        }
        match inner.by_server.get(&server_id) {
            Some(owner) if owner != client_id => {
                warn!(
                    model = M::NAME,
                    %client_id,
                    %server_id,
                    owner = %owner,
                    "server id already indexed for another entity"
                );
            }
            _ => {
                inner.by_server.insert(server_id, client_id.clone());
            }
        }
    }
}

impl<M: Model> fmt::Debug for Registry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("model", &M::NAME)
            .field("len", &self.len())
            .finish()
    }
}

trait AnyRegistry: Send + Sync {
    fn reset(&self);
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<M: Model> AnyRegistry for Registry<M> {
    fn reset(&self) {
        Registry::reset(self);
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Hands out one registry per model type.
///
/// Registries are created lazily on first request and live as long as the
/// provider.
#[derive(Default)]
pub struct RegistryProvider {
    registries: Mutex<HashMap<TypeId, Arc<dyn AnyRegistry>>>,
}

impl RegistryProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the registry for `M`, creating it on first use.
    pub fn registry<M: Model>(&self) -> Arc<Registry<M>> {
        let mut registries = self.registries.lock();
        if let Some(existing) = registries.get(&TypeId::of::<M>()) {
            if let Ok(registry) = Arc::clone(existing).into_any().downcast::<Registry<M>>() {
                return registry;
            }
        }
        let registry = Registry::<M>::new();
        registries.insert(TypeId::of::<M>(), Arc::clone(&registry) as Arc<dyn AnyRegistry>);
        registry
    }

    /// Clears every registry handed out so far.
    pub fn reset_all(&self) {
        for registry in self.registries.lock().values() {
            registry.reset();
        }
    }
}

impl fmt::Debug for RegistryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryProvider")
            .field("registries", &self.registries.lock().len())
            .finish()
    }
}

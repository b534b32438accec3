//! Mode-aware sync coordinator.
//!
//! The coordinator maps the abstract operations (create, update, patch,
//! delete, read) through the three modes:
//!
//! | mode       | remote call                       | on success                         |
//! |------------|-----------------------------------|------------------------------------|
//! | `client`   | never                             | empty local result                 |
//! | `server`   | always                            | reconcile dirt / fetched / registry |
//! | `infinite` | reads only, unless already fetched | mark fetched                       |
//!
//! Local completions still yield to the scheduler before returning, so a
//! caller never observes success synchronously. Nothing is reconciled
//! when the transport fails.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::mode::{Method, Mode};
use crate::stats::SyncStats;
use crate::transport::{SyncRequest, SyncResponse, SyncTransport};
use entisync_core::{Attributes, ClientId, Entity, Model, SetMode, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

/// Options for [`Coordinator::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Reconciliation mode.
    pub mode: Mode,
    /// Send only `attributes` as a partial update.
    pub patch: bool,
    /// Attributes to set locally before saving.
    pub attributes: Attributes,
    /// Opaque context passed to the transport.
    pub context: Option<Value>,
}

impl SaveOptions {
    /// Server-mode save of the full attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Partial update carrying exactly `attributes`.
    pub fn patch(attributes: Attributes) -> Self {
        Self {
            patch: true,
            attributes,
            ..Self::default()
        }
    }

    /// Sets the mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets attributes to apply before saving.
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the transport context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Options for [`Coordinator::destroy`].
#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {
    /// Reconciliation mode.
    pub mode: Mode,
    /// Opaque context passed to the transport.
    pub context: Option<Value>,
}

impl DestroyOptions {
    /// Server-mode destroy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Options for [`Coordinator::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Reconciliation mode.
    pub mode: Mode,
    /// Opaque context passed to the transport.
    pub context: Option<Value>,
}

impl FetchOptions {
    /// Server-mode fetch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mode.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Whether a destroyed entity stays visible in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// Destroy intent recorded; the entity stays registered until the
    /// server confirms the delete.
    Retained,
    /// The server confirmed the delete and the entity was deregistered.
    Removed,
}

impl DestroyOutcome {
    /// Returns true if the entity remains registered.
    pub fn is_visible(&self) -> bool {
        matches!(self, DestroyOutcome::Retained)
    }
}

/// Executes entity operations through a transport and reconciles results.
pub struct Coordinator<T: SyncTransport> {
    config: EngineConfig,
    transport: Arc<T>,
    stats: RwLock<SyncStats>,
    write_locks: WriteLocks,
}

type WriteLocks = Mutex<HashMap<(&'static str, ClientId), Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive right to write one entity.
///
/// The lock entry is dropped from the coordinator's map on release once
/// no other task holds or waits for it.
pub(crate) struct WritePermit<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: (&'static str, ClientId),
    locks: &'a WriteLocks,
}

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl<T: SyncTransport> Coordinator<T> {
    /// Creates a new coordinator.
    pub fn new(config: EngineConfig, transport: T) -> Self {
        Self::with_shared_transport(config, Arc::new(transport))
    }

    /// Creates a coordinator over a transport shared with other owners.
    pub fn with_shared_transport(config: EngineConfig, transport: Arc<T>) -> Self {
        Self {
            config,
            transport,
            stats: RwLock::new(SyncStats::default()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Saves an entity.
    ///
    /// `options.attributes` are first set locally (client mode, so they are
    /// dirt). The method is `create` for an entity without a server id,
    /// otherwise `patch` or `update`. A patch of a known entity sends exactly
    /// `options.attributes`; every other save, including a create, sends the
    /// full attribute set.
    pub async fn save<M: Model>(
        &self,
        entity: &Arc<Entity<M>>,
        options: SaveOptions,
    ) -> SyncResult<SyncResponse> {
        let SaveOptions {
            mode,
            patch,
            attributes,
            context,
        } = options;

        if mode == Mode::Infinite {
            return Err(SyncError::UnsupportedMode {
                method: write_method(entity.is_new(), patch),
                mode,
            });
        }
        if !attributes.is_empty() {
            entity.set_many(attributes.clone(), SetMode::Client)?;
        }

        let _permit = self.write_permit(entity).await;
        let method = write_method(entity.is_new(), patch);
        let changes = if method == Method::Patch {
            attributes
        } else {
            entity.attributes()
        };
        self.write(entity, method, mode, changes, context).await
    }

    /// Destroys an entity.
    ///
    /// The destroy intent is recorded immediately. The remote delete only
    /// happens in server mode for an entity the server knows; until it is
    /// confirmed the entity stays registered.
    pub async fn destroy<M: Model>(
        &self,
        entity: &Arc<Entity<M>>,
        options: DestroyOptions,
    ) -> SyncResult<DestroyOutcome> {
        if !Method::Delete.supports(options.mode) {
            return Err(SyncError::UnsupportedMode {
                method: Method::Delete,
                mode: options.mode,
            });
        }
        entity.mark_destroy_intent();

        let _permit = self.write_permit(entity).await;
        if options.mode == Mode::Client || entity.is_new() {
            self.complete_locally::<M>(entity, Method::Delete).await;
            return Ok(DestroyOutcome::Retained);
        }
        self.delete(entity, options.mode, options.context).await
    }

    /// Reads an entity from the server.
    ///
    /// In infinite mode the read is skipped once the entity was fetched.
    pub async fn fetch<M: Model>(
        &self,
        entity: &Arc<Entity<M>>,
        options: FetchOptions,
    ) -> SyncResult<SyncResponse> {
        self.read(entity, options.mode, options.context).await
    }

    /// Runs a create, update or patch. The caller holds the write permit.
    pub(crate) async fn write<M: Model>(
        &self,
        entity: &Arc<Entity<M>>,
        method: Method,
        mode: Mode,
        changes: Attributes,
        context: Option<Value>,
    ) -> SyncResult<SyncResponse> {
        if !method.supports(mode) {
            return Err(SyncError::UnsupportedMode { method, mode });
        }
        if mode == Mode::Client {
            self.complete_locally::<M>(entity, method).await;
            return Ok(SyncResponse::local());
        }

        let request = self.request(entity, method, mode, Some(changes.clone()), context);
        let response = self.dispatch(request).await?;

        if method == Method::Create {
            entity.mark_fetched();
        }
        let reconciliation = entity.reconcile(&changes, response.attributes.clone());
        {
            let mut stats = self.stats.write();
            stats.fields_reconciled += reconciliation.cleared.len() as u64;
            stats.fields_left_dirty += reconciliation.retained.len() as u64;
        }

        if method == Method::Create {
            info!(
                model = M::NAME,
                client_id = %entity.client_id(),
                server_id = ?entity.server_id(),
                "create confirmed"
            );
        }
        debug!(
            model = M::NAME,
            client_id = %entity.client_id(),
            %method,
            cleared = reconciliation.cleared.len(),
            retained = reconciliation.retained.len(),
            "write reconciled"
        );
        Ok(response)
    }

    /// Runs a remote delete. The caller holds the write permit.
    pub(crate) async fn delete<M: Model>(
        &self,
        entity: &Arc<Entity<M>>,
        mode: Mode,
        context: Option<Value>,
    ) -> SyncResult<DestroyOutcome> {
        let request = self.request(entity, Method::Delete, mode, None, context);
        self.dispatch(request).await?;

        if let Some(registry) = entity.registry() {
            registry.remove(entity);
        }
        entity.confirm_destroyed();

        info!(model = M::NAME, client_id = %entity.client_id(), "delete confirmed");
        Ok(DestroyOutcome::Removed)
    }

    /// Runs a read.
    pub(crate) async fn read<M: Model>(
        &self,
        entity: &Arc<Entity<M>>,
        mode: Mode,
        context: Option<Value>,
    ) -> SyncResult<SyncResponse> {
        match mode {
            Mode::Client => {
                self.complete_locally::<M>(entity, Method::Read).await;
                return Ok(SyncResponse::local());
            }
            Mode::Infinite if entity.is_fetched() => {
                tokio::task::yield_now().await;
                self.stats.write().cache_hits += 1;
                debug!(model = M::NAME, client_id = %entity.client_id(), "read served from cache");
                return Ok(SyncResponse::local());
            }
            _ => {}
        }

        let request = self.request(entity, Method::Read, mode, None, context);
        let response = self.dispatch(request).await?;

        entity.mark_fetched();
        entity.reconcile(&Attributes::new(), response.attributes.clone());
        Ok(response)
    }

    /// Acquires the per-entity write lock when writes are serialized.
    pub(crate) async fn write_permit<M: Model>(
        &self,
        entity: &Entity<M>,
    ) -> Option<WritePermit<'_>> {
        if !self.config.serialize_writes {
            return None;
        }
        let key = (M::NAME, entity.client_id().clone());
        let lock = Arc::clone(self.write_locks.lock().entry(key.clone()).or_default());
        let guard = lock.lock_owned().await;
        Some(WritePermit {
            guard: Some(guard),
            key,
            locks: &self.write_locks,
        })
    }

    /// Completes an operation without a remote call.
    async fn complete_locally<M: Model>(&self, entity: &Entity<M>, method: Method) {
        tokio::task::yield_now().await;
        self.stats.write().local_completions += 1;
        debug!(
            model = M::NAME,
            client_id = %entity.client_id(),
            %method,
            "completed locally"
        );
    }

    /// Hands a request to the transport.
    async fn dispatch(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        let method = request.method;
        let collection = request.collection;
        debug!(collection, %method, mode = %request.mode, client_id = %request.client_id, "dispatching");

        self.stats.write().remote_calls += 1;
        match self.transport.sync(request).await {
            Ok(response) => Ok(response),
            Err(error) => {
                self.stats.write().failures += 1;
                debug!(collection, %method, %error, "transport failed");
                Err(error)
            }
        }
    }

    fn request<M: Model>(
        &self,
        entity: &Entity<M>,
        method: Method,
        mode: Mode,
        changes: Option<Attributes>,
        context: Option<Value>,
    ) -> SyncRequest {
        SyncRequest {
            method,
            mode,
            collection: M::NAME,
            id_field: M::ID_FIELD,
            client_id: entity.client_id().clone(),
            server_id: entity.server_id(),
            attributes: entity.attributes(),
            changes,
            context,
        }
    }
}

fn write_method(is_new: bool, patch: bool) -> Method {
    if is_new {
        Method::Create
    } else if patch {
        Method::Patch
    } else {
        Method::Update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use entisync_core::{attributes, Registry};

    struct Note;

    impl Model for Note {
        const NAME: &'static str = "notes";
    }

    fn coordinator() -> Coordinator<MockTransport> {
        Coordinator::new(EngineConfig::default(), MockTransport::new())
    }

    fn known_note(registry: &Arc<Registry<Note>>) -> Arc<Entity<Note>> {
        registry
            .create(attributes([("id", Value::from(1i64)), ("title", "A".into())]))
            .unwrap()
    }

    #[tokio::test]
    async fn client_mode_save_makes_no_call() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = registry.create(attributes([("title", "A")])).unwrap();

        let response = sync
            .save(&note, SaveOptions::new().with_mode(Mode::Client))
            .await
            .unwrap();

        assert_eq!(response, SyncResponse::local());
        assert_eq!(sync.transport().request_count(), 0);
        assert!(note.is_dirty());
        assert_eq!(sync.stats().local_completions, 1);
    }

    #[tokio::test]
    async fn create_marks_fetched_and_clears_dirt() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = registry.create(attributes([("title", "A")])).unwrap();

        sync.save(&note, SaveOptions::new()).await.unwrap();

        let request = &sync.transport().requests()[0];
        assert_eq!(request.method, Method::Create);
        assert_eq!(request.mode, Mode::Server);
        assert_eq!(request.changes.as_ref(), Some(&note.attributes_without_id()));

        assert!(note.is_fetched());
        assert_eq!(note.server_id(), Some(Value::Integer(1)));
        assert!(!note.is_dirty());
        assert!(Arc::ptr_eq(
            &registry.get_by_server_id(&Value::Integer(1)).unwrap(),
            &note
        ));
    }

    #[tokio::test]
    async fn update_sends_full_attributes() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);

        sync.save(
            &note,
            SaveOptions::new().with_attributes(attributes([("body", "text")])),
        )
        .await
        .unwrap();

        let request = &sync.transport().requests()[0];
        assert_eq!(request.method, Method::Update);
        assert_eq!(request.changes.as_ref(), Some(&note.attributes()));
        assert!(!note.is_dirty());
        assert!(!note.is_fetched());
    }

    #[tokio::test]
    async fn patch_sends_only_patched_attributes() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);
        note.set_one("title", "B", SetMode::Client).unwrap();

        sync.save(&note, SaveOptions::patch(attributes([("body", "text")])))
            .await
            .unwrap();

        let request = &sync.transport().requests()[0];
        assert_eq!(request.method, Method::Patch);
        assert_eq!(request.changes, Some(attributes([("body", "text")])));
        // Only the patched field was confirmed.
        assert_eq!(note.dirtied_attributes(), attributes([("title", "B")]));
    }

    #[tokio::test]
    async fn patch_on_new_entity_creates_with_full_attributes() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = registry.create(attributes([("title", "A")])).unwrap();

        sync.save(&note, SaveOptions::patch(attributes([("body", "x")])))
            .await
            .unwrap();

        let request = &sync.transport().requests()[0];
        assert_eq!(request.method, Method::Create);
        let changes = request.changes.as_ref().unwrap();
        assert_eq!(changes.get("title"), Some(&Value::from("A")));
        assert_eq!(changes.get("body"), Some(&Value::from("x")));
        assert!(!note.is_dirty());
    }

    #[tokio::test]
    async fn write_locks_are_released() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = registry.create(attributes([("title", "A")])).unwrap();

        sync.save(&note, SaveOptions::new()).await.unwrap();
        assert!(sync.write_locks.lock().is_empty());

        let permit = sync.write_permit(&note).await;
        assert_eq!(sync.write_locks.lock().len(), 1);
        drop(permit);
        assert!(sync.write_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn write_lock_survives_while_contended() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);

        let first = sync.write_permit(&note).await;
        let waiter = sync.write_permit(&note);
        tokio::pin!(waiter);
        assert!(stays_pending(waiter.as_mut()).await);

        drop(first);
        // The waiter still holds the same lock, so the entry stays.
        assert_eq!(sync.write_locks.lock().len(), 1);
        let second = waiter.await;
        assert!(second.is_some());
        drop(second);
        assert!(sync.write_locks.lock().is_empty());
    }

    async fn stays_pending<F: std::future::Future + Unpin>(future: F) -> bool {
        tokio::time::timeout(std::time::Duration::from_millis(10), future)
            .await
            .is_err()
    }

    #[tokio::test]
    async fn failed_write_changes_nothing() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = registry.create(attributes([("title", "A")])).unwrap();
        sync.transport()
            .fail_next(SyncError::transport_retryable("offline"));

        let err = sync.save(&note, SaveOptions::new()).await.unwrap_err();

        assert_eq!(err, SyncError::transport_retryable("offline"));
        assert!(note.is_new());
        assert!(!note.is_fetched());
        assert_eq!(note.dirtied_attributes(), attributes([("title", "A")]));
        assert_eq!(sync.stats().failures, 1);
    }

    #[tokio::test]
    async fn infinite_mode_rejected_for_writes() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);

        let err = sync
            .save(
                &note,
                SaveOptions::new()
                    .with_mode(Mode::Infinite)
                    .with_attributes(attributes([("title", "B")])),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SyncError::UnsupportedMode {
                method: Method::Update,
                mode: Mode::Infinite
            }
        );
        assert!(!note.is_dirty());

        let err = sync
            .destroy(&note, DestroyOptions::new().with_mode(Mode::Infinite))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedMode { .. }));
        assert!(!note.is_dirty_destroyed());
        assert_eq!(sync.transport().request_count(), 0);
    }

    #[tokio::test]
    async fn validation_failure_stops_save() {
        struct Strict;
        impl Model for Strict {
            const NAME: &'static str = "strict";
            fn validate(attributes: &Attributes) -> Result<(), String> {
                if attributes.contains_key("forbidden") {
                    Err("forbidden attribute".into())
                } else {
                    Ok(())
                }
            }
        }

        let sync = coordinator();
        let registry = Registry::<Strict>::new();
        let item = registry.create(Attributes::new()).unwrap();

        let err = sync
            .save(
                &item,
                SaveOptions::new().with_attributes(attributes([("forbidden", true)])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Core(_)));
        assert_eq!(sync.transport().request_count(), 0);
    }

    #[tokio::test]
    async fn server_destroy_deregisters() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);

        let outcome = sync.destroy(&note, DestroyOptions::new()).await.unwrap();

        assert_eq!(outcome, DestroyOutcome::Removed);
        assert!(!outcome.is_visible());
        assert!(note.is_destroyed());
        assert!(!registry.contains(note.client_id()));
        assert_eq!(sync.transport().methods(), vec![Method::Delete]);
    }

    #[tokio::test]
    async fn client_destroy_retains() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);

        let outcome = sync
            .destroy(&note, DestroyOptions::new().with_mode(Mode::Client))
            .await
            .unwrap();

        assert_eq!(outcome, DestroyOutcome::Retained);
        assert!(note.is_dirty_destroyed());
        assert!(!note.is_destroyed());
        assert!(registry.contains(note.client_id()));
        assert_eq!(sync.transport().request_count(), 0);
    }

    #[tokio::test]
    async fn destroying_new_entity_is_local() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = registry.create(attributes([("title", "A")])).unwrap();

        let outcome = sync.destroy(&note, DestroyOptions::new()).await.unwrap();

        assert_eq!(outcome, DestroyOutcome::Retained);
        assert!(registry.contains(note.client_id()));
        assert_eq!(sync.transport().request_count(), 0);
    }

    #[tokio::test]
    async fn failed_delete_keeps_entity_registered() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);
        sync.transport().fail_next(SyncError::ServerError("busy".into()));

        assert!(sync.destroy(&note, DestroyOptions::new()).await.is_err());

        assert!(registry.contains(note.client_id()));
        assert!(note.is_dirty_destroyed());
        assert!(!note.is_destroyed());
    }

    #[tokio::test]
    async fn infinite_read_short_circuits_after_fetch() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);
        sync.transport()
            .push_response(Ok(SyncResponse::remote(attributes([("body", "remote")]))));

        let first = sync
            .fetch(&note, FetchOptions::new().with_mode(Mode::Infinite))
            .await
            .unwrap();
        assert!(first.remote);
        assert!(note.is_fetched());
        assert_eq!(note.get("body"), Some(Value::from("remote")));
        assert!(!note.has_dirtied("body"));

        let second = sync
            .fetch(&note, FetchOptions::new().with_mode(Mode::Infinite))
            .await
            .unwrap();
        assert!(!second.remote);
        assert_eq!(sync.transport().request_count(), 1);
        assert_eq!(sync.stats().cache_hits, 1);

        // Server mode always reads.
        sync.fetch(&note, FetchOptions::new()).await.unwrap();
        assert_eq!(sync.transport().request_count(), 2);
    }

    #[tokio::test]
    async fn failed_read_leaves_unfetched() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);
        sync.transport().fail_next(SyncError::NotFound {
            collection: "notes".into(),
        });

        assert!(sync.fetch(&note, FetchOptions::new()).await.is_err());
        assert!(!note.is_fetched());
    }

    #[tokio::test]
    async fn context_is_passed_through() {
        let sync = coordinator();
        let registry = Registry::<Note>::new();
        let note = known_note(&registry);

        sync.save(&note, SaveOptions::new().with_context(Value::from("trace-1")))
            .await
            .unwrap();

        assert_eq!(
            sync.transport().requests()[0].context,
            Some(Value::from("trace-1"))
        );
    }

    trait WithoutId {
        fn attributes_without_id(&self) -> Attributes;
    }

    impl WithoutId for Entity<Note> {
        fn attributes_without_id(&self) -> Attributes {
            let mut attrs = self.attributes();
            attrs.remove("id");
            attrs
        }
    }
}

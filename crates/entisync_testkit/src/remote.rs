//! In-memory remote store.

use async_trait::async_trait;
use entisync_core::{Attributes, Value};
use entisync_engine::{Method, Mode, SyncError, SyncRequest, SyncResponse, SyncResult, SyncTransport};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::watch;
use tracing::trace;

#[derive(Default)]
struct RemoteState {
    collections: BTreeMap<String, BTreeMap<i64, Attributes>>,
    next_id: i64,
    requests: Vec<SyncRequest>,
    failures: VecDeque<SyncError>,
}

/// A server that keeps records in memory and implements [`SyncTransport`].
///
/// - `create` assigns sequential integer ids and stores the payload
/// - `update`/`patch` merge the payload into the stored record
/// - `delete` removes the record, `read` returns it
/// - every successful write answers with the full stored record
///
/// Requests can be held in flight with [`pause`](Self::pause) and released
/// with [`resume`](Self::resume), which lets tests interleave local writes
/// with outstanding requests.
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    gate: watch::Sender<bool>,
    in_flight: watch::Sender<usize>,
}

impl MemoryRemote {
    /// Creates an empty, open remote.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        let (in_flight, _) = watch::channel(0);
        Self {
            state: Mutex::new(RemoteState {
                next_id: 1,
                ..RemoteState::default()
            }),
            gate,
            in_flight,
        }
    }

    /// Stores a record directly, as if another client had created it.
    ///
    /// Returns the assigned id.
    pub fn seed(&self, collection: &str, id_field: &str, attributes: Attributes) -> i64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let mut record = attributes;
        record.insert(id_field.to_string(), Value::Integer(id));
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, record);
        id
    }

    /// Returns a stored record.
    pub fn record(&self, collection: &str, id: i64) -> Option<Attributes> {
        self.state
            .lock()
            .collections
            .get(collection)
            .and_then(|records| records.get(&id))
            .cloned()
    }

    /// Returns all stored records of a collection, ordered by id.
    pub fn records(&self, collection: &str) -> Vec<Attributes> {
        self.state
            .lock()
            .collections
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns every stored collection.
    pub fn collections(&self) -> BTreeMap<String, Vec<Attributes>> {
        self.state
            .lock()
            .collections
            .iter()
            .map(|(name, records)| (name.clone(), records.values().cloned().collect()))
            .collect()
    }

    /// Returns every request received, in arrival order.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.state.lock().requests.clone()
    }

    /// Returns the methods received, in arrival order.
    pub fn methods(&self) -> Vec<Method> {
        self.state.lock().requests.iter().map(|r| r.method).collect()
    }

    /// Makes the next request fail with `error`.
    pub fn fail_next(&self, error: SyncError) {
        self.state.lock().failures.push_back(error);
    }

    /// Holds incoming requests until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    /// Releases held requests and stops holding new ones.
    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    /// Returns the number of requests received but not yet answered.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Waits until at least `count` requests are in flight.
    pub async fn wait_for_in_flight(&self, count: usize) {
        let mut rx = self.in_flight.subscribe();
        loop {
            if *rx.borrow_and_update() >= count {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn wait_until_open(&self) {
        let mut rx = self.gate.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn handle(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if request.mode == Mode::Client {
            return Err(SyncError::Protocol(
                "client-mode request reached the remote".into(),
            ));
        }

        let collection = request.collection.to_string();
        match request.method {
            Method::Create => {
                let id = state.next_id;
                state.next_id += 1;
                let mut record = request.changes.unwrap_or(request.attributes);
                record.insert(request.id_field.to_string(), Value::Integer(id));
                state
                    .collections
                    .entry(collection)
                    .or_default()
                    .insert(id, record.clone());
                Ok(SyncResponse::remote(record))
            }
            Method::Update | Method::Patch => {
                let id = server_id(&request)?;
                let changes = request.changes.unwrap_or_default();
                let record = state
                    .collections
                    .get_mut(&collection)
                    .and_then(|records| records.get_mut(&id))
                    .ok_or_else(|| SyncError::NotFound {
                        collection: collection.clone(),
                    })?;
                for (key, value) in changes {
                    if key != request.id_field {
                        record.insert(key, value);
                    }
                }
                Ok(SyncResponse::remote(record.clone()))
            }
            Method::Delete => {
                let id = server_id(&request)?;
                state
                    .collections
                    .get_mut(&collection)
                    .and_then(|records| records.remove(&id))
                    .ok_or(SyncError::NotFound { collection })?;
                Ok(SyncResponse::remote(Attributes::new()))
            }
            Method::Read => {
                let id = server_id(&request)?;
                state
                    .collections
                    .get(&collection)
                    .and_then(|records| records.get(&id))
                    .cloned()
                    .map(SyncResponse::remote)
                    .ok_or(SyncError::NotFound { collection })
            }
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn server_id(request: &SyncRequest) -> SyncResult<i64> {
    request
        .server_id
        .as_ref()
        .and_then(Value::as_integer)
        .ok_or_else(|| {
            SyncError::Protocol(format!(
                "{} request for {} carries no integer server id",
                request.method, request.collection
            ))
        })
}

#[async_trait]
impl SyncTransport for MemoryRemote {
    async fn sync(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        self.in_flight.send_modify(|n| *n += 1);
        self.wait_until_open().await;

        trace!(
            collection = request.collection,
            method = %request.method,
            client_id = %request.client_id,
            "remote handling request"
        );
        let result = self.handle(request);
        self.in_flight.send_modify(|n| *n -= 1);
        result
    }
}

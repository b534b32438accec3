//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use crate::mode::{Method, Mode};
use async_trait::async_trait;
use entisync_core::{Attributes, ClientId, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A sync transport carries one operation to the remote store.
///
/// Implementations own serialization, networking and any cancellation or
/// timeout policy. Each call must complete exactly once, with either the
/// attributes the server confirmed or an error; the coordinator only
/// reconciles on `Ok`.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Executes one remote operation.
    async fn sync(&self, request: SyncRequest) -> SyncResult<SyncResponse>;
}

/// One remote operation, tagged with its reconciliation mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Operation to perform.
    pub method: Method,
    /// Mode the coordinator is running the operation in.
    pub mode: Mode,
    /// Collection name of the entity's model.
    pub collection: &'static str,
    /// Name of the server id attribute.
    pub id_field: &'static str,
    /// Client id of the entity.
    pub client_id: ClientId,
    /// Server id, if assigned.
    pub server_id: Option<Value>,
    /// Full attribute snapshot at dispatch.
    pub attributes: Attributes,
    /// Payload for writes; the state reconciliation compares dirt against.
    pub changes: Option<Attributes>,
    /// Opaque caller context, passed through untouched.
    pub context: Option<Value>,
}

/// Result of a completed operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResponse {
    /// Attributes confirmed by the server.
    pub attributes: Attributes,
    /// Whether the operation reached the remote store.
    pub remote: bool,
}

impl SyncResponse {
    /// A response from the remote store.
    pub fn remote(attributes: Attributes) -> Self {
        Self {
            attributes,
            remote: true,
        }
    }

    /// An empty response for an operation completed without a remote call.
    pub fn local() -> Self {
        Self::default()
    }
}

/// A scripted transport for testing.
///
/// Records every request. Responses are taken from a queue; with an empty
/// queue, creates are answered with a fresh integer id and everything else
/// with an empty remote response.
#[derive(Debug)]
pub struct MockTransport {
    requests: Mutex<Vec<SyncRequest>>,
    responses: Mutex<VecDeque<SyncResult<SyncResponse>>>,
    next_id: Mutex<i64>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            next_id: Mutex::new(1),
        }
    }

    /// Queues the result for the next request.
    pub fn push_response(&self, response: SyncResult<SyncResponse>) {
        self.responses.lock().push_back(response);
    }

    /// Queues a failure for the next request.
    pub fn fail_next(&self, error: SyncError) {
        self.push_response(Err(error));
    }

    /// Returns all recorded requests.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Returns the recorded methods, in order.
    pub fn methods(&self) -> Vec<Method> {
        self.requests.lock().iter().map(|r| r.method).collect()
    }

    /// Returns the number of recorded requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn sync(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        let scripted = self.responses.lock().pop_front();
        let response = match scripted {
            Some(response) => response,
            None if request.method == Method::Create => {
                let mut next_id = self.next_id.lock();
                let id = *next_id;
                *next_id += 1;
                let mut attributes = Attributes::new();
                attributes.insert(request.id_field.to_string(), Value::Integer(id));
                Ok(SyncResponse::remote(attributes))
            }
            None => Ok(SyncResponse::remote(Attributes::new())),
        };
        self.requests.lock().push(request);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method) -> SyncRequest {
        SyncRequest {
            method,
            mode: Mode::Server,
            collection: "notes",
            id_field: "id",
            client_id: ClientId::from_string("c1"),
            server_id: None,
            attributes: Attributes::new(),
            changes: None,
            context: None,
        }
    }

    #[tokio::test]
    async fn mock_assigns_ids_on_create() {
        let transport = MockTransport::new();

        let first = transport.sync(request(Method::Create)).await.unwrap();
        let second = transport.sync(request(Method::Create)).await.unwrap();
        assert_eq!(first.attributes.get("id"), Some(&Value::Integer(1)));
        assert_eq!(second.attributes.get("id"), Some(&Value::Integer(2)));
        assert!(first.remote);

        let read = transport.sync(request(Method::Read)).await.unwrap();
        assert!(read.attributes.is_empty());
        assert_eq!(
            transport.methods(),
            vec![Method::Create, Method::Create, Method::Read]
        );
    }

    #[tokio::test]
    async fn mock_scripted_failure() {
        let transport = MockTransport::new();
        transport.fail_next(SyncError::transport_retryable("offline"));

        let result = transport.sync(request(Method::Update)).await;
        assert_eq!(result, Err(SyncError::transport_retryable("offline")));
        assert_eq!(transport.request_count(), 1);

        assert!(transport.sync(request(Method::Update)).await.is_ok());
    }

    #[test]
    fn local_response_is_empty() {
        let response = SyncResponse::local();
        assert!(!response.remote);
        assert!(response.attributes.is_empty());
    }
}

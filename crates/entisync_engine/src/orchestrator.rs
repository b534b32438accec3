//! Push/pull orchestration.
//!
//! `push` expresses an entity's pending local intent as at most one
//! server-mode operation; `pull` is an infinite-mode read.

use crate::coordinator::{Coordinator, DestroyOutcome};
use crate::error::{SyncError, SyncResult};
use crate::mode::{Method, Mode};
use crate::transport::SyncTransport;
use entisync_core::{ClientId, Entity, Model, Registry};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// The single operation a push performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushAction {
    /// Nothing pending.
    Noop,
    /// The entity is new: create it with its full attribute set.
    Create,
    /// The entity has dirt: update with exactly the dirty attributes.
    Update,
    /// The entity is destroy-intended and known to the server.
    Delete,
}

impl fmt::Display for PushAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PushAction::Noop => "noop",
            PushAction::Create => "create",
            PushAction::Update => "update",
            PushAction::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Picks the push action for an entity, by priority:
///
/// 1. destroy-intended and never created remotely: nothing to do
/// 2. destroy-intended: delete
/// 3. no server id: create
/// 4. dirty: update
/// 5. otherwise nothing
///
/// An entity whose delete was already confirmed has nothing left to push.
pub fn plan_push<M: Model>(entity: &Entity<M>) -> PushAction {
    if entity.is_destroyed() {
        return PushAction::Noop;
    }
    let is_new = entity.is_new();
    if entity.is_dirty_destroyed() {
        if is_new {
            PushAction::Noop
        } else {
            PushAction::Delete
        }
    } else if is_new {
        PushAction::Create
    } else if entity.is_dirty() {
        PushAction::Update
    } else {
        PushAction::Noop
    }
}

/// Summary of a [`Coordinator::push_all`] run.
#[derive(Debug, Default)]
pub struct PushReport {
    /// Entities created on the server.
    pub created: usize,
    /// Entities updated on the server.
    pub updated: usize,
    /// Entities deleted on the server.
    pub deleted: usize,
    /// Entities with nothing to push.
    pub unchanged: usize,
    /// Entities whose push failed, with the transport error.
    pub failures: Vec<(ClientId, SyncError)>,
}

impl PushReport {
    /// Returns true if every push succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, action: PushAction) {
        match action {
            PushAction::Noop => self.unchanged += 1,
            PushAction::Create => self.created += 1,
            PushAction::Update => self.updated += 1,
            PushAction::Delete => self.deleted += 1,
        }
    }
}

impl<T: SyncTransport> Coordinator<T> {
    /// Fetches the entity unless it was already fetched.
    ///
    /// Returns true if a remote read happened.
    pub async fn pull<M: Model>(&self, entity: &Arc<Entity<M>>) -> SyncResult<bool> {
        let response = self.read(entity, Mode::Infinite, None).await?;
        Ok(response.remote)
    }

    /// Sends the entity's pending intent to the server.
    ///
    /// Performs at most one operation, chosen by [`plan_push`]. The decision
    /// is taken after the entity's write permit is acquired, so a push
    /// queued behind another write sees that write's outcome.
    pub async fn push<M: Model>(&self, entity: &Arc<Entity<M>>) -> SyncResult<PushAction> {
        let _permit = self.write_permit(entity).await;
        let action = plan_push(entity);
        debug!(model = M::NAME, client_id = %entity.client_id(), %action, "push");

        match action {
            PushAction::Noop => tokio::task::yield_now().await,
            PushAction::Create => {
                let changes = entity.attributes();
                self.write(entity, Method::Create, Mode::Server, changes, None)
                    .await?;
            }
            PushAction::Update => {
                let changes = entity.dirtied_attributes();
                self.write(entity, Method::Update, Mode::Server, changes, None)
                    .await?;
            }
            PushAction::Delete => {
                let outcome = self.delete(entity, Mode::Server, None).await?;
                debug_assert_eq!(outcome, DestroyOutcome::Removed);
            }
        }
        Ok(action)
    }

    /// Pushes every entity registered in `registry`, in registration order.
    ///
    /// A failing entity is recorded in the report and does not stop the
    /// batch.
    pub async fn push_all<M: Model>(&self, registry: &Registry<M>) -> PushReport {
        let mut report = PushReport::default();
        for entity in registry.all() {
            match self.push(&entity).await {
                Ok(action) => report.record(action),
                Err(error) => {
                    warn!(
                        model = M::NAME,
                        client_id = %entity.client_id(),
                        %error,
                        "push failed"
                    );
                    report.failures.push((entity.client_id().clone(), error));
                }
            }
        }
        report
    }
}

//! Replay command implementation.
//!
//! A scenario is a JSON document:
//!
//! ```json
//! {
//!   "config": { "serialize_writes": true },
//!   "steps": [
//!     { "op": "create", "name": "draft", "attributes": { "title": "A" } },
//!     { "op": "set", "name": "draft", "attributes": { "title": "B" } },
//!     { "op": "push", "name": "draft" }
//!   ]
//! }
//! ```
//!
//! Entities are notes, addressed by the `name` given at `create`. A failing
//! step is recorded in the report and the replay continues.

use crate::Format;
use entisync_core::{Attributes, Entity, EntitySnapshot, Registry, SetMode};
use entisync_engine::{
    Coordinator, DestroyOptions, EngineConfig, FetchOptions, Mode, SaveOptions, SyncError,
    SyncStats,
};
use entisync_testkit::{coordinator_with_remote, MemoryRemote, Note};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that abort a replay.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The script could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Script path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The script is not a valid scenario.
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),
    /// The async runtime could not start.
    #[error("failed to start runtime: {0}")]
    Runtime(std::io::Error),
}

/// Errors of a single step.
#[derive(Debug, Error)]
enum StepError {
    #[error("no entity named {0:?}")]
    UnknownEntity(String),
    #[error("an entity named {0:?} already exists")]
    DuplicateEntity(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<entisync_core::CoreError> for StepError {
    fn from(error: entisync_core::CoreError) -> Self {
        StepError::Sync(error.into())
    }
}

/// A scenario script.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Coordinator configuration.
    #[serde(default)]
    pub config: EngineConfig,
    /// Steps, run in order.
    pub steps: Vec<Step>,
}

/// One scenario step.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Creates (or merges into) a named note.
    Create {
        /// Handle used by later steps.
        name: String,
        /// Initial attributes.
        #[serde(default)]
        attributes: Attributes,
    },
    /// Sets attributes locally.
    Set {
        /// Entity handle.
        name: String,
        /// Attributes to set.
        attributes: Attributes,
        /// Set mode, `client` by default.
        #[serde(default)]
        mode: SetMode,
    },
    /// Saves through the coordinator.
    Save {
        /// Entity handle.
        name: String,
        /// Attributes to set before saving.
        #[serde(default)]
        attributes: Attributes,
        /// Sync mode, `server` by default.
        #[serde(default)]
        mode: Mode,
        /// Send only `attributes`.
        #[serde(default)]
        patch: bool,
    },
    /// Reads from the remote.
    Fetch {
        /// Entity handle.
        name: String,
        /// Sync mode, `server` by default.
        #[serde(default)]
        mode: Mode,
    },
    /// Destroys through the coordinator.
    Destroy {
        /// Entity handle.
        name: String,
        /// Sync mode, `server` by default.
        #[serde(default)]
        mode: Mode,
    },
    /// Pushes pending intent.
    Push {
        /// Entity handle.
        name: String,
    },
    /// Pulls unless already fetched.
    Pull {
        /// Entity handle.
        name: String,
    },
    /// Pushes every registered note.
    PushAll,
    /// Makes the next remote request fail.
    FailNext {
        /// Error message.
        message: String,
        /// Whether the failure is retryable.
        #[serde(default = "default_retryable")]
        retryable: bool,
    },
}

fn default_retryable() -> bool {
    true
}

impl Step {
    fn op(&self) -> &'static str {
        match self {
            Step::Create { .. } => "create",
            Step::Set { .. } => "set",
            Step::Save { .. } => "save",
            Step::Fetch { .. } => "fetch",
            Step::Destroy { .. } => "destroy",
            Step::Push { .. } => "push",
            Step::Pull { .. } => "pull",
            Step::PushAll => "push_all",
            Step::FailNext { .. } => "fail_next",
        }
    }

    fn name(&self) -> Option<&str> {
        match self {
            Step::Create { name, .. }
            | Step::Set { name, .. }
            | Step::Save { name, .. }
            | Step::Fetch { name, .. }
            | Step::Destroy { name, .. }
            | Step::Push { name }
            | Step::Pull { name } => Some(name),
            Step::PushAll | Step::FailNext { .. } => None,
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    /// Position in the script, from 1.
    pub index: usize,
    /// Step kind.
    pub op: &'static str,
    /// Entity handle, if the step targets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Short description of what happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Error message if the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final state after a replay.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Per-step outcomes.
    pub steps: Vec<StepOutcome>,
    /// Local entities by handle.
    pub entities: BTreeMap<String, EntitySnapshot>,
    /// Remote records by collection.
    pub remote: BTreeMap<String, Vec<Attributes>>,
    /// Coordinator statistics.
    pub stats: SyncStats,
}

impl ReplayReport {
    /// Number of failed steps.
    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.error.is_some()).count()
    }
}

/// Runs the replay command.
pub fn run(path: &Path, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = load(path)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ReplayError::Runtime)?;
    let report = runtime.block_on(replay(scenario));

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text_output(&report),
    }
    Ok(())
}

/// Loads a scenario file.
pub fn load(path: &Path) -> Result<Scenario, ReplayError> {
    let text = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

struct Session {
    remote: Arc<MemoryRemote>,
    sync: Coordinator<MemoryRemote>,
    notes: Arc<Registry<Note>>,
    handles: BTreeMap<String, Arc<Entity<Note>>>,
}

impl Session {
    fn entity(&self, name: &str) -> Result<&Arc<Entity<Note>>, StepError> {
        self.handles
            .get(name)
            .ok_or_else(|| StepError::UnknownEntity(name.to_string()))
    }

    async fn apply(&mut self, step: Step) -> Result<Option<String>, StepError> {
        match step {
            Step::Create { name, attributes } => {
                if self.handles.contains_key(&name) {
                    return Err(StepError::DuplicateEntity(name));
                }
                let entity = self.notes.create(attributes)?;
                let result = entity.client_id().to_string();
                self.handles.insert(name, entity);
                Ok(Some(result))
            }
            Step::Set {
                name,
                attributes,
                mode,
            } => {
                let changed = self.entity(&name)?.set_many(attributes, mode)?;
                Ok(Some(format!("{} changed", changed.len())))
            }
            Step::Save {
                name,
                attributes,
                mode,
                patch,
            } => {
                let options = if patch {
                    SaveOptions::patch(attributes)
                } else {
                    SaveOptions::new().with_attributes(attributes)
                };
                let response = self
                    .sync
                    .save(self.entity(&name)?, options.with_mode(mode))
                    .await?;
                Ok(Some(remote_label(response.remote).into()))
            }
            Step::Fetch { name, mode } => {
                let response = self
                    .sync
                    .fetch(self.entity(&name)?, FetchOptions::new().with_mode(mode))
                    .await?;
                Ok(Some(remote_label(response.remote).into()))
            }
            Step::Destroy { name, mode } => {
                let outcome = self
                    .sync
                    .destroy(self.entity(&name)?, DestroyOptions::new().with_mode(mode))
                    .await?;
                Ok(Some(format!("{outcome:?}").to_lowercase()))
            }
            Step::Push { name } => {
                let action = self.sync.push(self.entity(&name)?).await?;
                Ok(Some(action.to_string()))
            }
            Step::Pull { name } => {
                let read = self.sync.pull(self.entity(&name)?).await?;
                Ok(Some(remote_label(read).into()))
            }
            Step::PushAll => {
                let report = self.sync.push_all(&self.notes).await;
                let summary = format!(
                    "{} created, {} updated, {} deleted, {} unchanged, {} failed",
                    report.created,
                    report.updated,
                    report.deleted,
                    report.unchanged,
                    report.failures.len()
                );
                Ok(Some(summary))
            }
            Step::FailNext { message, retryable } => {
                let error = if retryable {
                    SyncError::transport_retryable(message)
                } else {
                    SyncError::transport_fatal(message)
                };
                self.remote.fail_next(error);
                Ok(None)
            }
        }
    }
}

fn remote_label(remote: bool) -> &'static str {
    if remote {
        "remote"
    } else {
        "local"
    }
}

/// Replays a scenario against a fresh in-memory remote.
pub async fn replay(scenario: Scenario) -> ReplayReport {
    let (remote, sync) = coordinator_with_remote(scenario.config);
    let mut session = Session {
        remote,
        sync,
        notes: Registry::new(),
        handles: BTreeMap::new(),
    };

    let mut steps = Vec::with_capacity(scenario.steps.len());
    for (i, step) in scenario.steps.into_iter().enumerate() {
        let op = step.op();
        let name = step.name().map(str::to_string);
        let outcome = match session.apply(step).await {
            Ok(result) => StepOutcome {
                index: i + 1,
                op,
                name,
                result,
                error: None,
            },
            Err(error) => {
                warn!(step = i + 1, op, %error, "step failed");
                StepOutcome {
                    index: i + 1,
                    op,
                    name,
                    result: None,
                    error: Some(error.to_string()),
                }
            }
        };
        steps.push(outcome);
    }

    let entities = session
        .handles
        .iter()
        .map(|(name, entity)| (name.clone(), entity.snapshot()))
        .collect();
    let report = ReplayReport {
        steps,
        entities,
        remote: session.remote.collections(),
        stats: session.sync.stats(),
    };
    info!(
        steps = report.steps.len(),
        failed = report.failed_steps(),
        "replay finished"
    );
    report
}

fn print_text_output(report: &ReplayReport) {
    println!("Steps");
    println!("=====");
    for step in &report.steps {
        let target = step.name.as_deref().unwrap_or("-");
        match (&step.result, &step.error) {
            (_, Some(error)) => println!("{:>3}. {:<9} {:<12} FAILED: {}", step.index, step.op, target, error),
            (Some(result), None) => println!("{:>3}. {:<9} {:<12} {}", step.index, step.op, target, result),
            (None, None) => println!("{:>3}. {:<9} {:<12} ok", step.index, step.op, target),
        }
    }

    println!();
    println!("Entities");
    println!("========");
    for (name, snapshot) in &report.entities {
        let server_id = snapshot
            .server_id
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        println!("{name} (client id {}, server id {server_id})", snapshot.client_id);
        println!("  attributes: {}", render(&snapshot.attributes));
        println!("  dirtied:    {}", render(&snapshot.dirtied));
        println!(
            "  fetched: {}  destroy intent: {}  destroyed: {}",
            snapshot.fetched, snapshot.destroy_intent, snapshot.destroyed
        );
    }

    println!();
    println!("Remote");
    println!("======");
    if report.remote.is_empty() {
        println!("(empty)");
    }
    for (collection, records) in &report.remote {
        println!("{collection}: {} record(s)", records.len());
        for record in records {
            println!("  {}", render(record));
        }
    }

    let stats = &report.stats;
    println!();
    println!("Stats");
    println!("=====");
    println!("Remote calls:      {}", stats.remote_calls);
    println!("Local completions: {}", stats.local_completions);
    println!("Cache hits:        {}", stats.cache_hits);
    println!("Failures:          {}", stats.failures);
    println!("Fields reconciled: {}", stats.fields_reconciled);
    println!("Fields left dirty: {}", stats.fields_left_dirty);
}

fn render(attributes: &Attributes) -> String {
    let fields: Vec<String> = attributes
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect();
    format!("{{{}}}", fields.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use entisync_core::Value;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_script(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    fn replay_json(json: &str) -> ReplayReport {
        let file = write_script(json);
        let scenario = load(file.path()).unwrap();
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(replay(scenario))
    }

    #[test]
    fn create_set_push() {
        let report = replay_json(
            r#"{
                "steps": [
                    { "op": "create", "name": "n", "attributes": { "title": "A" } },
                    { "op": "set", "name": "n", "attributes": { "title": "B" } },
                    { "op": "push", "name": "n" }
                ]
            }"#,
        );

        assert_eq!(report.failed_steps(), 0);
        assert_eq!(report.steps[2].result.as_deref(), Some("create"));

        let note = &report.entities["n"];
        assert_eq!(note.server_id, Some(Value::Integer(1)));
        assert!(note.fetched);
        assert!(note.dirtied.is_empty());
        assert_eq!(note.attributes.get("title"), Some(&Value::from("B")));

        let records = &report.remote["notes"];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("title"), Some(&Value::from("B")));
        assert_eq!(report.stats.remote_calls, 1);
    }

    #[test]
    fn failing_steps_do_not_stop_replay() {
        let report = replay_json(
            r#"{
                "steps": [
                    { "op": "create", "name": "n", "attributes": { "title": "A" } },
                    { "op": "fail_next", "message": "offline" },
                    { "op": "push", "name": "n" },
                    { "op": "push", "name": "missing" },
                    { "op": "push", "name": "n" }
                ]
            }"#,
        );

        assert_eq!(report.failed_steps(), 2);
        assert!(report.steps[2].error.as_deref().unwrap().contains("offline"));
        assert!(report.steps[3].error.as_deref().unwrap().contains("missing"));
        assert_eq!(report.steps[4].result.as_deref(), Some("create"));
        assert_eq!(report.remote["notes"].len(), 1);
        assert_eq!(report.stats.failures, 1);
    }

    #[test]
    fn client_mode_and_destroy() {
        let report = replay_json(
            r#"{
                "config": { "serialize_writes": false },
                "steps": [
                    { "op": "create", "name": "n", "attributes": { "title": "A" } },
                    { "op": "save", "name": "n", "mode": "client" },
                    { "op": "push_all" },
                    { "op": "destroy", "name": "n", "mode": "client" },
                    { "op": "push", "name": "n" }
                ]
            }"#,
        );

        assert_eq!(report.failed_steps(), 0);
        assert_eq!(report.steps[1].result.as_deref(), Some("local"));
        assert_eq!(report.steps[3].result.as_deref(), Some("retained"));
        assert_eq!(report.steps[4].result.as_deref(), Some("delete"));
        assert!(report.entities["n"].destroyed);
        assert!(report.remote["notes"].is_empty());
    }

    #[test]
    fn validation_failure_is_reported() {
        let report = replay_json(
            r#"{
                "steps": [
                    { "op": "create", "name": "n", "attributes": { "title": "A" } },
                    { "op": "set", "name": "n", "attributes": { "title": "" } },
                    { "op": "create", "name": "n" }
                ]
            }"#,
        );

        assert_eq!(report.failed_steps(), 2);
        assert!(report.steps[1].error.as_deref().unwrap().contains("title"));
        assert!(report.steps[2].error.as_deref().unwrap().contains("already exists"));
        assert_eq!(
            report.entities["n"].attributes.get("title"),
            Some(&Value::from("A"))
        );
    }

    #[test]
    fn infinite_pull_is_cached() {
        let report = replay_json(
            r#"{
                "steps": [
                    { "op": "create", "name": "n", "attributes": { "title": "A" } },
                    { "op": "push", "name": "n" },
                    { "op": "pull", "name": "n" },
                    { "op": "fetch", "name": "n", "mode": "infinite" },
                    { "op": "fetch", "name": "n" }
                ]
            }"#,
        );

        assert_eq!(report.steps[2].result.as_deref(), Some("local"));
        assert_eq!(report.steps[3].result.as_deref(), Some("local"));
        assert_eq!(report.steps[4].result.as_deref(), Some("remote"));
        assert_eq!(report.stats.cache_hits, 2);
    }

    #[test]
    fn rejects_malformed_scenarios() {
        let file = write_script(r#"{ "steps": [ { "op": "teleport" } ] }"#);
        assert!(matches!(load(file.path()), Err(ReplayError::Parse(_))));

        let missing = Path::new("/nonexistent/scenario.json");
        assert!(matches!(load(missing), Err(ReplayError::Io { .. })));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = replay_json(
            r#"{ "steps": [ { "op": "create", "name": "n", "attributes": { "title": "A" } } ] }"#,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["entities"]["n"]["attributes"]["title"], "A");
        assert_eq!(json["steps"][0]["op"], "create");
    }
}

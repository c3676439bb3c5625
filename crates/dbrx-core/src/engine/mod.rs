//! Core reconciliation engine
//!
//! One [`Reconciler`] runs per resource kind. Each call to
//! [`Reconciler::reconcile`] is a single pass that:
//! - Loads the managed object from the ObjectStore
//! - Runs the finalization guard when deletion was requested
//! - Ensures the finalizer marker before any remote mutation
//! - Creates, adopts, updates, replaces or re-creates the remote resource
//! - Writes the outcome into status and returns a requeue directive
//!
//! ## Architecture
//!
//! ```text
//!  Dispatcher ── reconcile(key) ──┐
//!                                 ▼
//!                        ┌──────────────┐
//!                        │  Reconciler  │── ReconcileEvent ──▶ events
//!                        └──────────────┘
//!                          │          │
//!                          ▼          ▼
//!                 ┌─────────────┐  ┌──────────────┐
//!                 │ ObjectStore │  │ RemoteClient │
//!                 │ (versioned) │  │ (timed out)  │
//!                 └─────────────┘  └──────────────┘
//! ```
//!
//! ## Pass outcomes
//!
//! | Situation | Result |
//! |---|---|
//! | Converged, nothing to do | `Converged` |
//! | Trusted within resync interval | `RequeueAfter(remaining)` |
//! | Remote mutated, confirm next pass | `RequeueAfter(0)` |
//! | Remote transitioning | `RequeueAfter(poll_interval)` |
//! | Retryable failure | `Failed { kind, Some(backoff) }` |
//! | Terminal failure | `Failed { kind, None }` |

pub mod backoff;
mod finalize;

use chrono::Utc;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::adapters::{Delta, Dependencies, MappingContext, Readiness, child_slot};
use crate::config::ReconcileConfig;
use crate::error::{Error, FailureKind, Result};
use crate::model::{
    Condition, ConditionStatus, ManagedObject, ObjectKey, ObjectStatus, RemoteHandle,
    ResourceKind, CONDITION_READY, CONDITION_SYNCED,
};
use crate::traits::{ObjectStore, RemoteChild, RemoteClient};

pub use backoff::Backoff;

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    /// Remote state matches the spec (or there is nothing left to manage)
    Converged,
    /// Invoke again after the given delay
    RequeueAfter(Duration),
    /// The pass failed
    Failed {
        kind: FailureKind,
        /// Retry delay; `None` for terminal failures
        requeue_after: Option<Duration>,
    },
}

impl ReconcileResult {
    /// When the dispatcher should invoke the pass again
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            ReconcileResult::Converged => None,
            ReconcileResult::RequeueAfter(delay) => Some(*delay),
            ReconcileResult::Failed { requeue_after, .. } => *requeue_after,
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, ReconcileResult::Converged)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ReconcileResult::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEvent {
    pub key: ObjectKey,
    pub kind: ResourceKind,
    pub event_type: EventType,
    /// CamelCase reason, such as `Created` or `Throttled`
    pub reason: String,
    pub message: String,
}

/// Reconciler for one resource kind
///
/// ## Concurrency
///
/// `reconcile` may run concurrently for different keys. Duplicate passes
/// for the same key are safe: every status write is version-checked and a
/// create that collides with an earlier one adopts the existing resource.
pub struct Reconciler {
    kind: ResourceKind,

    /// Remote API client
    remote: Arc<dyn RemoteClient>,

    /// Desired-state store
    store: Arc<dyn ObjectStore>,

    config: ReconcileConfig,

    backoff: Backoff,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Parameters
    ///
    /// - `kind`: The resource kind this reconciler owns
    /// - `remote`: Remote client implementation
    /// - `store`: Object store implementation
    /// - `config`: Reconciler settings
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields reconcile events
    pub fn new(
        kind: ResourceKind,
        remote: Arc<dyn RemoteClient>,
        store: Arc<dyn ObjectStore>,
        config: ReconcileConfig,
    ) -> (Self, mpsc::Receiver<ReconcileEvent>) {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let reconciler = Self {
            kind,
            remote,
            store,
            backoff: Backoff::from_config(&config),
            config,
            event_tx: tx,
        };
        (reconciler, rx)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Keys of every stored object of this kind
    pub async fn keys(&self) -> Result<Vec<ObjectKey>> {
        self.store.list(self.kind).await
    }

    /// Run one reconcile pass
    ///
    /// Never fails: remote and store errors are classified and returned as
    /// [`ReconcileResult::Failed`].
    pub async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let span = info_span!("reconcile", kind = %self.kind, key = %key);
        async move {
            let mut conflicts = 0;
            loop {
                match self.attempt(key).await {
                    Ok(result) => {
                        debug!(?result, "Pass finished");
                        return result;
                    }
                    Err(Error::VersionConflict {
                        expected, actual, ..
                    }) => {
                        if conflicts >= self.config.max_conflict_retries {
                            warn!(
                                conflicts,
                                "Giving up after repeated version conflicts"
                            );
                            return ReconcileResult::Failed {
                                kind: FailureKind::VersionConflict,
                                requeue_after: Some(Duration::ZERO),
                            };
                        }
                        conflicts += 1;
                        debug!(expected, actual, "Object changed during pass, reloading");
                    }
                    Err(e) => return self.unrecorded_failure(key, e),
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Load once and run a pass against that snapshot
    ///
    /// A failed pass is recorded against the snapshot it read, so a spec
    /// edited meanwhile surfaces as a version conflict and restarts the pass.
    async fn attempt(&self, key: &ObjectKey) -> Result<ReconcileResult> {
        let Some(mut obj) = self.store.load(self.kind, key).await? else {
            debug!("Object absent, nothing to do");
            return Ok(ReconcileResult::Converged);
        };
        match self.pass(&mut obj).await {
            Err(e) if !matches!(e, Error::VersionConflict { .. }) => {
                self.record_failure(&obj, e).await
            }
            outcome => outcome,
        }
    }

    async fn pass(&self, obj: &mut ManagedObject) -> Result<ReconcileResult> {
        let key = obj.key.clone();

        if obj.deletion_requested {
            if !obj.has_finalizer() {
                debug!("Deletion requested without finalizer");
                return Ok(ReconcileResult::Converged);
            }
            return self.finalize(obj).await;
        }

        if let Some(kind) = terminal_latch(obj) {
            debug!(reason = kind.reason(), "Terminal failure recorded for this generation");
            return Ok(ReconcileResult::Failed {
                kind,
                requeue_after: None,
            });
        }

        if obj.spec.kind() != self.kind {
            return Err(Error::invalid_spec(format!(
                "spec declares kind {} but object is stored as {}",
                obj.spec.kind(),
                self.kind
            )));
        }
        obj.spec.validate()?;

        if !obj.has_finalizer() {
            obj.resource_version = self
                .store
                .set_finalizer(self.kind, &key, obj.resource_version, true, None)
                .await?;
            obj.finalizers
                .insert(crate::model::REMOTE_CLEANUP_FINALIZER.to_string());
            debug!("Finalizer added");
        }

        if let Some(remaining) = self.resync_remaining(obj) {
            debug!(?remaining, "Converged within resync interval, skipping remote read");
            return Ok(ReconcileResult::RequeueAfter(remaining));
        }

        let dependencies = self.resolve_dependencies(obj).await?;
        let ctx = MappingContext {
            key: &key,
            dependencies: &dependencies,
        };

        match obj.status.handle.clone() {
            None => self.create(obj, &ctx).await,
            Some(handle) => self.sync(obj, &ctx, &handle).await,
        }
    }

    /// Time left before a converged object must be re-read
    fn resync_remaining(&self, obj: &ManagedObject) -> Option<Duration> {
        let interval = self.config.resync_interval();
        if interval.is_zero()
            || obj.status.handle.is_none()
            || obj.status.observed_generation != Some(obj.generation)
            || !obj.status.is_true(CONDITION_SYNCED)
        {
            return None;
        }
        if obj
            .status
            .condition(CONDITION_READY)
            .is_some_and(|c| c.reason == "Progressing")
        {
            return None;
        }

        let elapsed = (Utc::now() - obj.status.last_synced?).to_std().unwrap_or_default();
        interval.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    async fn resolve_dependencies(&self, obj: &ManagedObject) -> Result<Dependencies> {
        let mut resolved = Dependencies::new();
        for (kind, name) in obj.spec.dependencies() {
            let key = obj.key.sibling(name.clone());
            let dependency = self
                .store
                .load(kind, &key)
                .await?
                .ok_or_else(|| Error::dependency(format!("{} {} does not exist", kind, key)))?;
            if dependency.deletion_requested {
                return Err(Error::dependency(format!("{} {} is being deleted", kind, key)));
            }
            let handle = dependency
                .status
                .handle
                .ok_or_else(|| Error::dependency(format!("{} {} has not been created yet", kind, key)))?;
            resolved.insert(kind, name, handle);
        }
        Ok(resolved)
    }

    async fn create(&self, obj: &ManagedObject, ctx: &MappingContext<'_>) -> Result<ReconcileResult> {
        let payload = obj.spec.create_payload(ctx)?;
        let has_children = !obj.spec.children()?.is_empty();
        let idempotency_key = obj.key.idempotency_key();

        let (handle, adopted) = match self
            .call(self.remote.create(
                self.kind,
                &idempotency_key,
                obj.status.incarnation,
                &payload,
            ))
            .await
        {
            Ok(handle) => {
                info!(%handle, "Created remote resource");
                self.emit(&obj.key, EventType::Normal, "Created", format!("created {}", handle));
                (handle, false)
            }
            Err(Error::AlreadyExists(msg)) => {
                debug!(%msg, "Create collided with an existing resource");
                let handle = self.adopt(obj, &idempotency_key).await?;
                info!(%handle, "Adopted existing remote resource");
                self.emit(&obj.key, EventType::Normal, "Adopted", format!("adopted {}", handle));
                (handle, true)
            }
            Err(e) => return Err(e),
        };

        let mut status = succeeded(obj);
        status.handle = Some(handle);
        status.observed = None;
        if adopted {
            // Content of an adopted resource is unknown until written
            status.fingerprints.clear();
            status.last_synced = None;
        } else {
            status.fingerprints = obj.spec.fingerprints()?;
            status.last_synced = (!has_children).then(Utc::now);
        }
        let reason = if adopted { "Adopted" } else { "Created" };
        let polls = obj.spec.polls_after_create();
        status.upsert_condition(Condition::truthy(CONDITION_SYNCED, reason, ""));
        status.upsert_condition(if polls {
            Condition::falsy(CONDITION_READY, "Progressing", "submitted")
        } else {
            Condition::new(
                CONDITION_READY,
                ConditionStatus::Unknown,
                reason,
                "awaiting first observation",
            )
        });
        self.write_status(obj, &status).await?;

        if has_children || adopted {
            Ok(ReconcileResult::RequeueAfter(Duration::ZERO))
        } else if polls {
            Ok(ReconcileResult::RequeueAfter(self.config.poll_interval()))
        } else {
            Ok(ReconcileResult::Converged)
        }
    }

    /// Locate the resource an earlier create produced
    async fn adopt(&self, obj: &ManagedObject, idempotency_key: &str) -> Result<RemoteHandle> {
        if let Some(handle) = obj.spec.natural_handle(&obj.key) {
            self.call(self.remote.get(self.kind, &handle)).await?;
            return Ok(handle);
        }
        match self.call(self.remote.find(self.kind, idempotency_key)).await? {
            Some(existing) => Ok(existing.handle),
            None => Err(Error::conflict(format!(
                "remote reported an existing resource but none carries key {}",
                idempotency_key
            ))),
        }
    }

    async fn sync(
        &self,
        obj: &ManagedObject,
        ctx: &MappingContext<'_>,
        handle: &RemoteHandle,
    ) -> Result<ReconcileResult> {
        let remote = match self.call(self.remote.get(self.kind, handle)).await {
            Ok(remote) => remote,
            Err(e) if e.is_not_found() => return self.drift(obj, handle).await,
            Err(e) => return Err(e),
        };
        let observed = obj.spec.normalize(&remote);

        match obj.spec.delta(ctx, &observed, &obj.status)? {
            Delta::Replace { fields } => self.replace(obj, handle, fields).await,
            Delta::Update { payload, fields } => {
                self.call(self.remote.update(self.kind, handle, &payload))
                    .await?;
                info!(%handle, ?fields, "Updated remote resource");
                let changed = fields.join(", ");
                self.emit(&obj.key, EventType::Normal, "Updated", format!("updated {}", changed));

                let mut status = succeeded(obj);
                status.observed = Some(observed);
                status.fingerprints.extend(obj.spec.fingerprints()?);
                status.upsert_condition(Condition::falsy(CONDITION_SYNCED, "UpdateIssued", changed));
                self.write_status(obj, &status).await?;
                Ok(ReconcileResult::RequeueAfter(Duration::ZERO))
            }
            Delta::InSync => {
                let mut status = succeeded(obj);
                status.observed = Some(observed);

                if self.sync_children(obj, handle, &mut status).await? {
                    status.upsert_condition(Condition::falsy(
                        CONDITION_SYNCED,
                        "UpdateIssued",
                        "children",
                    ));
                    self.write_status(obj, &status).await?;
                    return Ok(ReconcileResult::RequeueAfter(Duration::ZERO));
                }

                status.last_synced = Some(Utc::now());
                status.upsert_condition(Condition::truthy(CONDITION_SYNCED, "InSync", ""));
                let readiness = obj.spec.readiness(&remote);
                let result = match &readiness {
                    Readiness::Progressing(_) => {
                        ReconcileResult::RequeueAfter(self.config.poll_interval())
                    }
                    _ => ReconcileResult::Converged,
                };
                status.upsert_condition(ready_condition(readiness));
                self.write_status(obj, &status).await?;
                Ok(result)
            }
        }
    }

    /// Bring children in line with the spec
    ///
    /// Children are only pruned when this reconciler wrote them, which is
    /// tracked by their fingerprint slot. Returns whether anything changed.
    async fn sync_children(
        &self,
        obj: &ManagedObject,
        parent: &RemoteHandle,
        status: &mut ObjectStatus,
    ) -> Result<bool> {
        let desired = obj.spec.children()?;
        let mut changed = false;

        for child_kind in obj.spec.child_kinds() {
            let remote: Vec<RemoteChild> = self
                .call(self.remote.list_children(parent, *child_kind))
                .await?;

            let mut wanted = BTreeSet::new();
            for child in desired.iter().filter(|c| c.child == *child_kind) {
                wanted.insert(child.key.as_str());
                let slot = child.slot();
                let current = remote
                    .iter()
                    .find(|r| r.key == child.key)
                    .and_then(|r| r.fingerprint.clone().or_else(|| status.fingerprints.get(&slot).cloned()));

                if current.as_deref() != Some(child.fingerprint.as_str()) {
                    self.call(self.remote.put_child(parent, *child_kind, &child.key, &child.payload))
                        .await?;
                    info!(child = child_kind.as_str(), key = %child.key, "Applied child");
                    changed = true;
                }
                status.fingerprints.insert(slot, child.fingerprint.clone());
            }

            for stale in remote.iter().filter(|r| !wanted.contains(r.key.as_str())) {
                let slot = child_slot(*child_kind, &stale.key);
                if !status.fingerprints.contains_key(&slot) {
                    continue;
                }
                match self
                    .call(self.remote.delete_child(parent, *child_kind, &stale.key))
                    .await
                {
                    Ok(()) => info!(child = child_kind.as_str(), key = %stale.key, "Removed child"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                status.fingerprints.remove(&slot);
                changed = true;
            }
        }

        if changed {
            self.emit(&obj.key, EventType::Normal, "ChildrenUpdated", "applied child changes");
        }
        Ok(changed)
    }

    async fn drift(&self, obj: &ManagedObject, handle: &RemoteHandle) -> Result<ReconcileResult> {
        warn!(%handle, "Remote resource disappeared, will re-create");
        self.emit(
            &obj.key,
            EventType::Warning,
            "RemoteMissing",
            format!("{} no longer exists remotely", handle),
        );

        let mut status = succeeded(obj);
        status.clear_handle();
        status.upsert_condition(Condition::falsy(
            CONDITION_SYNCED,
            "RemoteMissing",
            format!("{} was deleted out-of-band", handle),
        ));
        status.upsert_condition(Condition::falsy(CONDITION_READY, "RemoteMissing", ""));
        self.write_status(obj, &status).await?;
        Ok(ReconcileResult::RequeueAfter(Duration::ZERO))
    }

    async fn replace(
        &self,
        obj: &ManagedObject,
        handle: &RemoteHandle,
        fields: Vec<String>,
    ) -> Result<ReconcileResult> {
        let changed = fields.join(", ");
        match self.call(self.remote.delete(self.kind, handle)).await {
            Ok(()) => info!(%handle, fields = %changed, "Deleted remote resource for replacement"),
            Err(e) if e.is_not_found() => debug!(%handle, "Resource already gone"),
            Err(e) => return Err(e),
        }
        self.emit(
            &obj.key,
            EventType::Normal,
            "Replacing",
            format!("immutable fields changed: {}", changed),
        );

        let mut status = succeeded(obj);
        status.clear_handle();
        status.upsert_condition(Condition::falsy(CONDITION_SYNCED, "Replacing", changed));
        status.upsert_condition(Condition::falsy(CONDITION_READY, "Replacing", ""));
        self.write_status(obj, &status).await?;
        Ok(ReconcileResult::RequeueAfter(Duration::ZERO))
    }

    /// Record a failed pass against the snapshot it ran on
    ///
    /// A terminal failure latches `obj.generation`, never a newer one. A
    /// version conflict on the write is returned so the caller reloads.
    async fn record_failure(&self, obj: &ManagedObject, err: Error) -> Result<ReconcileResult> {
        let kind = err.kind();
        let message = err.to_string();
        let failures = obj.status.consecutive_failures + 1;
        self.log_failure(&obj.key, kind, failures, &message);

        let mut status = obj.status.clone();
        status.upsert_condition(Condition::falsy(CONDITION_SYNCED, kind.reason(), message.clone()));
        if kind.is_retryable() {
            status.consecutive_failures = failures;
        } else {
            status.observed_generation = Some(obj.generation);
            status.upsert_condition(Condition::falsy(CONDITION_READY, kind.reason(), message));
        }
        match self.write_status(obj, &status).await {
            Ok(_) => {}
            Err(e @ Error::VersionConflict { .. }) => return Err(e),
            Err(write_err) => debug!(error = %write_err, "Failure status not recorded"),
        }

        Ok(self.failed(kind, failures))
    }

    /// A failure with no snapshot to record it on, such as a failed load
    fn unrecorded_failure(&self, key: &ObjectKey, err: Error) -> ReconcileResult {
        let kind = err.kind();
        self.log_failure(key, kind, 1, &err.to_string());
        self.failed(kind, 1)
    }

    fn log_failure(&self, key: &ObjectKey, kind: FailureKind, failures: u32, message: &str) {
        if kind.is_retryable() {
            warn!(reason = kind.reason(), failures, error = %message, "Retryable failure");
        } else {
            error!(reason = kind.reason(), error = %message, "Terminal failure");
        }
        self.emit(key, EventType::Warning, kind.reason(), message);
    }

    fn failed(&self, kind: FailureKind, failures: u32) -> ReconcileResult {
        ReconcileResult::Failed {
            kind,
            requeue_after: kind.is_retryable().then(|| self.backoff.delay(failures)),
        }
    }

    async fn write_status(&self, obj: &ManagedObject, status: &ObjectStatus) -> Result<u64> {
        self.store
            .update_status(self.kind, &obj.key, obj.resource_version, status)
            .await
    }

    /// Await a remote call, bounding it by the configured timeout
    async fn call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.config.remote_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::transient(format!(
                "{} call timed out after {:?}",
                self.remote.client_name(),
                limit
            ))),
        }
    }

    /// Emit a reconcile event
    ///
    /// # Parameters
    ///
    /// - `key`: The object the event is about
    /// - `event_type`: Severity
    /// - `reason`: CamelCase reason
    /// - `message`: Human-readable detail
    fn emit(&self, key: &ObjectKey, event_type: EventType, reason: &str, message: impl Into<String>) {
        let event = ReconcileEvent {
            key: key.clone(),
            kind: self.kind,
            event_type,
            reason: reason.to_string(),
            message: message.into(),
        };
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Status carried forward by a successful pass
fn succeeded(obj: &ManagedObject) -> ObjectStatus {
    let mut status = obj.status.clone();
    status.observed_generation = Some(obj.generation);
    status.consecutive_failures = 0;
    status
}

fn ready_condition(readiness: Readiness) -> Condition {
    match readiness {
        Readiness::Ready(reason) => Condition::truthy(CONDITION_READY, reason, ""),
        Readiness::Progressing(state) => Condition::falsy(CONDITION_READY, "Progressing", state),
        Readiness::Unavailable(state) => Condition::falsy(CONDITION_READY, "Unavailable", state),
    }
}

/// Terminal failure recorded against the current generation
fn terminal_latch(obj: &ManagedObject) -> Option<FailureKind> {
    if obj.status.observed_generation != Some(obj.generation) {
        return None;
    }
    let synced = obj.status.condition(CONDITION_SYNCED)?;
    if synced.status != ConditionStatus::False {
        return None;
    }
    FailureKind::from_reason(&synced.reason).filter(|kind| !kind.is_retryable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FilesystemBlockSpec, ResourceSpec};
    use std::collections::BTreeSet;

    fn object(status: ObjectStatus) -> ManagedObject {
        ManagedObject {
            key: ObjectKey::new("ns", "a"),
            kind: ResourceKind::FilesystemBlock,
            spec: ResourceSpec::FilesystemBlock(FilesystemBlockSpec::new("/tmp/a", b"a")),
            status,
            generation: 2,
            resource_version: 7,
            deletion_requested: false,
            finalizers: BTreeSet::new(),
        }
    }

    #[test]
    fn test_requeue_after_directive() {
        assert_eq!(ReconcileResult::Converged.requeue_after(), None);
        assert_eq!(
            ReconcileResult::RequeueAfter(Duration::from_secs(3)).requeue_after(),
            Some(Duration::from_secs(3))
        );
        let terminal = ReconcileResult::Failed {
            kind: FailureKind::InvalidSpec,
            requeue_after: None,
        };
        assert_eq!(terminal.requeue_after(), None);
        assert_eq!(terminal.failure_kind(), Some(FailureKind::InvalidSpec));
    }

    #[test]
    fn test_terminal_latch_only_for_current_generation() {
        let mut status = ObjectStatus {
            observed_generation: Some(2),
            ..ObjectStatus::default()
        };
        status.upsert_condition(Condition::falsy(CONDITION_SYNCED, "InvalidSpec", "bad path"));
        assert_eq!(terminal_latch(&object(status.clone())), Some(FailureKind::InvalidSpec));

        status.observed_generation = Some(1);
        assert_eq!(terminal_latch(&object(status.clone())), None);

        status.observed_generation = Some(2);
        status.upsert_condition(Condition::falsy(CONDITION_SYNCED, "Throttled", "429"));
        assert_eq!(terminal_latch(&object(status)), None);
    }
}

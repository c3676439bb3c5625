// # Finalization Guard
//
// Deletes the remote resource of an object whose deletion was requested
// and only then clears the finalizer marker.
//
// ## Ordering
//
// 1. Children (secrets, ACLs, libraries) are deleted first
// 2. The parent resource is deleted
// 3. One versioned write clears the handle and the marker together, so a
//    stored object never shows a cleared marker with a live handle
//
// Not-found is success at every step.

use tracing::{debug, info};

use super::{EventType, ReconcileResult, Reconciler};
use crate::error::Result;
use crate::model::{Condition, ManagedObject, RemoteHandle, CONDITION_READY, CONDITION_SYNCED};

impl Reconciler {
    pub(super) async fn finalize(&self, obj: &ManagedObject) -> Result<ReconcileResult> {
        match &obj.status.handle {
            Some(handle) => {
                self.delete_children(obj, handle).await?;
                match self.call(self.remote.delete(self.kind, handle)).await {
                    Ok(()) => info!(%handle, "Deleted remote resource"),
                    Err(e) if e.is_not_found() => debug!(%handle, "Remote resource already gone"),
                    Err(e) => return Err(e),
                }
                self.emit(
                    &obj.key,
                    EventType::Normal,
                    "Deleted",
                    format!("deleted {}", handle),
                );
            }
            None => debug!("No remote handle recorded, nothing to delete"),
        }

        let mut status = obj.status.clone();
        status.clear_handle();
        status.consecutive_failures = 0;
        status.upsert_condition(Condition::falsy(CONDITION_SYNCED, "Deleted", ""));
        status.upsert_condition(Condition::falsy(CONDITION_READY, "Deleted", ""));

        self.store
            .set_finalizer(self.kind, &obj.key, obj.resource_version, false, Some(&status))
            .await?;
        debug!("Finalizer removed");
        Ok(ReconcileResult::Converged)
    }

    async fn delete_children(&self, obj: &ManagedObject, parent: &RemoteHandle) -> Result<()> {
        for child_kind in obj.spec.child_kinds() {
            let children = match self
                .call(self.remote.list_children(parent, *child_kind))
                .await
            {
                Ok(children) => children,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };
            for child in children {
                match self
                    .call(self.remote.delete_child(parent, *child_kind, &child.key))
                    .await
                {
                    Ok(()) => debug!(child = child_kind.as_str(), key = %child.key, "Deleted child"),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }
}

use crate::client::RemoteApi;
use crate::context::Context;
use crate::diff::replacement_fields;
use crate::error::ReconcileError;
use crate::identity::{Identity, IdentityLocks};
use crate::model::{DesiredSpec, ReadOutcome, RemoteState};
use crate::reconciler::{Reconciler, ResourceReconciler};
use crate::schema::{Registry, ResourceType};
use std::sync::Arc;

/// What the orchestration engine persists for one resource instance.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedRecord {
    pub kind: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<RemoteState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Unmanaged,
    Managed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Created,
    /// Deleted out of band, created again.
    Recreated,
    Updated,
    Unchanged,
    Refreshed,
    /// Found absent, record cleared.
    Gone,
    Deleted,
    Imported,
}

impl ManagedRecord {
    pub fn unmanaged(kind: ResourceType) -> Self {
        Self {
            kind,
            identity: None,
            state: None,
        }
    }

    pub fn phase(&self) -> Phase {
        match self.identity {
            Some(_) => Phase::Managed,
            None => Phase::Unmanaged,
        }
    }

    /// Forget the identity once absence is confirmed.
    pub fn clear(&mut self) {
        if let Some(id) = self.identity.take() {
            log::info!("Clearing identity {id}");
        }
        self.state = None;
    }

    fn assign(&mut self, id: Identity, state: RemoteState) {
        self.identity = Some(id);
        self.state = Some(state);
    }
}

/// Drives resource instances through `Unmanaged -> Managed -> Unmanaged`.
pub struct Operator<A> {
    api: A,
    registry: Registry,
    locks: Arc<IdentityLocks>,
}

impl<A> Operator<A>
where
    A: RemoteApi + Clone,
{
    pub fn new(api: A, registry: Registry) -> Self {
        Self {
            api,
            registry,
            locks: Default::default(),
        }
    }

    pub fn reconciler(&self, kind: ResourceType) -> ResourceReconciler<A> {
        ResourceReconciler::with_locks(self.api.clone(), self.registry.get(kind), self.locks.clone())
    }

    /// Bring the remote resource in line with `spec`, updating `record` in place.
    ///
    /// `record` always reflects what is known after the call, also on error:
    /// a failed create leaves it unmanaged unless the resource was created
    /// but not confirmed, a failed update keeps the last observed state, and
    /// a resource that disappeared under the update is forgotten.
    pub async fn apply(
        &self,
        record: &mut ManagedRecord,
        spec: &DesiredSpec,
        ctx: &Context,
    ) -> Result<Outcome, ReconcileError> {
        let reconciler = self.reconciler(record.kind);

        let id = match record.identity.clone() {
            None => return self.create(&reconciler, record, spec, ctx, Outcome::Created).await,
            Some(id) => id,
        };

        let observed = match reconciler.read(&id, ctx).await? {
            ReadOutcome::Absent => {
                log::info!("{id} was deleted out of band, recreating");
                record.clear();
                return self.create(&reconciler, record, spec, ctx, Outcome::Recreated).await;
            }
            ReadOutcome::Present(observed) if !observed.status.is_terminal() => {
                log::info!("{id} is {:?}, waiting for it to settle", observed.status);
                record.state = Some(observed);
                forget_vanished(record, reconciler.settle(&id, ctx).await)?
            }
            ReadOutcome::Present(observed) => observed,
        };
        record.state = Some(observed.clone());

        let replace = replacement_fields(reconciler.descriptor(), spec, &observed);
        if !replace.is_empty() {
            log::warn!("{id} needs replacement to change {replace:?}, leaving those as they are");
        }

        let unchanged = reconciler.diff(spec, &observed).is_empty();
        let state = forget_vanished(record, reconciler.update(&id, spec, &observed, ctx).await)?;
        record.state = Some(state);

        Ok(if unchanged {
            Outcome::Unchanged
        } else {
            Outcome::Updated
        })
    }

    /// Re-read the resource, detecting drift and out-of-band deletion.
    pub async fn refresh(
        &self,
        record: &mut ManagedRecord,
        ctx: &Context,
    ) -> Result<Outcome, ReconcileError> {
        let id = match record.identity.clone() {
            Some(id) => id,
            None => return Ok(Outcome::Gone),
        };

        match self.reconciler(record.kind).read(&id, ctx).await? {
            ReadOutcome::Absent => {
                record.clear();
                Ok(Outcome::Gone)
            }
            ReadOutcome::Present(state) => {
                record.state = Some(state);
                Ok(Outcome::Refreshed)
            }
        }
    }

    /// Delete the resource; the identity is kept if that fails.
    pub async fn destroy(
        &self,
        record: &mut ManagedRecord,
        ctx: &Context,
    ) -> Result<Outcome, ReconcileError> {
        if let Some(id) = record.identity.clone() {
            self.reconciler(record.kind).delete(&id, ctx).await?;
        }
        record.clear();
        Ok(Outcome::Deleted)
    }

    pub async fn import(
        &self,
        kind: ResourceType,
        raw: &str,
        ctx: &Context,
    ) -> Result<ManagedRecord, ReconcileError> {
        let (id, state) = self.reconciler(kind).import(raw, ctx).await?;
        let mut record = ManagedRecord::unmanaged(kind);
        record.assign(id, state);
        Ok(record)
    }

    async fn create(
        &self,
        reconciler: &ResourceReconciler<A>,
        record: &mut ManagedRecord,
        spec: &DesiredSpec,
        ctx: &Context,
        outcome: Outcome,
    ) -> Result<Outcome, ReconcileError> {
        match reconciler.create(spec, ctx).await {
            Ok((id, state)) => {
                record.assign(id, state);
                Ok(outcome)
            }
            Err(err) => {
                if let Some(id) = err.assigned_identity() {
                    // created remotely, keep it so the next run picks it up
                    record.identity = Some(id.clone());
                    record.state = None;
                }
                Err(err)
            }
        }
    }
}

fn forget_vanished<T>(
    record: &mut ManagedRecord,
    result: Result<T, ReconcileError>,
) -> Result<T, ReconcileError> {
    if let Err(ReconcileError::Vanished { id }) = &result {
        log::info!("{id} disappeared, the next apply creates it again");
        record.clear();
    }
    result
}

use crate::client::RemoteApi;
use crate::context::Context;
use crate::diff::{changed_values, creation_values, diff, validate_spec};
use crate::error::{ApiError, ReconcileError};
use crate::identity::{Identity, IdentityLocks};
use crate::model::{DesiredSpec, ReadOutcome, RemoteState, Status};
use crate::schema::ResourceDescriptor;
use crate::waiter::{self, AsyncOperation};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Create, read, update, delete and import of one resource instance.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Create the resource and wait until it is usable.
    ///
    /// If the creation call succeeded but confirming it failed, the error is
    /// [`ReconcileError::Incomplete`] and carries the assigned identity.
    async fn create(
        &self,
        spec: &DesiredSpec,
        ctx: &Context,
    ) -> Result<(Identity, RemoteState), ReconcileError>;

    /// Current remote state. A missing resource is [`ReadOutcome::Absent`].
    async fn read(&self, id: &Identity, ctx: &Context) -> Result<ReadOutcome, ReconcileError>;

    /// Push the changed, mutable attributes. Without changes nothing is sent
    /// and the resource is only re-read.
    async fn update(
        &self,
        id: &Identity,
        spec: &DesiredSpec,
        observed: &RemoteState,
        ctx: &Context,
    ) -> Result<RemoteState, ReconcileError>;

    /// Delete the resource. Deleting a resource that is already gone succeeds.
    async fn delete(&self, id: &Identity, ctx: &Context) -> Result<(), ReconcileError>;

    /// Adopt an existing resource by its raw ID.
    async fn import(
        &self,
        raw: &str,
        ctx: &Context,
    ) -> Result<(Identity, RemoteState), ReconcileError>;
}

pub struct ResourceReconciler<A> {
    api: A,
    descriptor: ResourceDescriptor,
    locks: Arc<IdentityLocks>,
}

impl<A> ResourceReconciler<A>
where
    A: RemoteApi,
{
    pub fn new(api: A, descriptor: ResourceDescriptor) -> Self {
        Self::with_locks(api, descriptor, Default::default())
    }

    /// Share per-identity critical sections with other reconcilers.
    pub fn with_locks(api: A, descriptor: ResourceDescriptor, locks: Arc<IdentityLocks>) -> Self {
        Self {
            api,
            descriptor,
            locks,
        }
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    /// Whether `raw` is an acceptable ID for this resource type.
    pub fn validate_id(&self, raw: &str) -> bool {
        self.descriptor.id_format.validate(raw)
    }

    pub fn diff(&self, spec: &DesiredSpec, observed: &RemoteState) -> BTreeSet<String> {
        diff(&self.descriptor, spec, observed)
    }

    /// Wait for a resource found in a transitional status, e.g. one whose
    /// creation was never confirmed.
    pub async fn settle(&self, id: &Identity, ctx: &Context) -> Result<RemoteState, ReconcileError> {
        let ctx = ctx.narrowed(self.descriptor.timeout);
        let _guard = ctx.run(self.locks.lock(id)).await?;
        match &self.descriptor.asynchronous {
            Some(wait) => {
                let op = AsyncOperation::from_descriptor(id.clone(), &self.descriptor, wait);
                waiter::wait(&self.api, &self.descriptor, &op, &ctx).await
            }
            None => self.confirm(id, &ctx).await,
        }
    }

    async fn read_unlocked(
        &self,
        id: &Identity,
        ctx: &Context,
    ) -> Result<ReadOutcome, ReconcileError> {
        match ctx.run(self.api.get(&self.descriptor, id)).await? {
            Ok(state) if state.status == Status::Absent => Ok(ReadOutcome::Absent),
            Ok(state) => Ok(ReadOutcome::Present(state)),
            Err(ApiError::NotFound) => {
                log::info!("{id} not found remotely");
                Ok(ReadOutcome::Absent)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read after a mutation of ours; the resource must still be there.
    async fn confirm(&self, id: &Identity, ctx: &Context) -> Result<RemoteState, ReconcileError> {
        self.read_unlocked(id, ctx)
            .await?
            .present()
            .ok_or_else(|| ReconcileError::Vanished { id: id.clone() })
    }

    async fn settle_created(&self, id: &Identity, ctx: &Context) -> Result<RemoteState, ReconcileError> {
        if let Some(wait) = self.descriptor.wait_on(|w| w.on_create) {
            let op = AsyncOperation::from_descriptor(id.clone(), &self.descriptor, wait);
            waiter::wait(&self.api, &self.descriptor, &op, ctx).await?;
        }
        self.confirm(id, ctx).await
    }
}

#[async_trait]
impl<A> Reconciler for ResourceReconciler<A>
where
    A: RemoteApi,
{
    async fn create(
        &self,
        spec: &DesiredSpec,
        ctx: &Context,
    ) -> Result<(Identity, RemoteState), ReconcileError> {
        validate_spec(&self.descriptor, spec)?;
        let ctx = ctx.narrowed(self.descriptor.timeout);
        let payload = creation_values(&self.descriptor, spec);

        log::info!("Creating {:?}", self.descriptor.kind);
        let id = ctx.run(self.api.create(&self.descriptor, &payload)).await??;
        log::info!("Created {:?}: {id}", self.descriptor.kind);

        let confirmed = async {
            let _guard = ctx.run(self.locks.lock(&id)).await?;
            self.settle_created(&id, &ctx).await
        };
        match confirmed.await {
            Ok(state) => Ok((id, state)),
            Err(err) => {
                log::warn!("Failed to confirm creation of {id}: {err}");
                Err(ReconcileError::incomplete(id, err))
            }
        }
    }

    async fn read(&self, id: &Identity, ctx: &Context) -> Result<ReadOutcome, ReconcileError> {
        let ctx = ctx.narrowed(self.descriptor.timeout);
        let _guard = ctx.run(self.locks.lock(id)).await?;
        self.read_unlocked(id, &ctx).await
    }

    async fn update(
        &self,
        id: &Identity,
        spec: &DesiredSpec,
        observed: &RemoteState,
        ctx: &Context,
    ) -> Result<RemoteState, ReconcileError> {
        validate_spec(&self.descriptor, spec)?;
        let ctx = ctx.narrowed(self.descriptor.timeout);
        let _guard = ctx.run(self.locks.lock(id)).await?;

        let changed = self.diff(spec, observed);
        if changed.is_empty() {
            log::debug!("{id} is up to date");
            return self.confirm(id, &ctx).await;
        }

        let changes = changed_values(&self.descriptor, spec, &changed);
        log::info!("Updating {id}: {changed:?}");
        match ctx.run(self.api.update(&self.descriptor, id, &changes)).await? {
            Ok(()) => {}
            Err(ApiError::NotFound) => {
                log::info!("{id} is gone, nothing to update");
                return Err(ReconcileError::Vanished { id: id.clone() });
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(wait) = self.descriptor.wait_on(|w| w.on_update) {
            let op = AsyncOperation::from_descriptor(id.clone(), &self.descriptor, wait);
            waiter::wait(&self.api, &self.descriptor, &op, &ctx).await?;
        }
        self.confirm(id, &ctx).await
    }

    async fn delete(&self, id: &Identity, ctx: &Context) -> Result<(), ReconcileError> {
        let ctx = ctx.narrowed(self.descriptor.timeout);
        let _guard = ctx.run(self.locks.lock(id)).await?;

        log::info!("Deleting {id}");
        match ctx.run(self.api.delete(&self.descriptor, id)).await? {
            Ok(()) => {}
            Err(ApiError::NotFound) if self.descriptor.delete_not_found_is_absent => {
                log::info!("{id} already gone");
                return Ok(());
            }
            Err(ApiError::NotFound) => {
                // not-found on delete is ambiguous for this type, look again
                return match self.read_unlocked(id, &ctx).await? {
                    ReadOutcome::Absent => Ok(()),
                    ReadOutcome::Present(state) => Err(ReconcileError::Conflict {
                        reason: format!(
                            "delete of {id} answered not found, but it is still {:?}",
                            state.status
                        ),
                    }),
                };
            }
            Err(err) => return Err(err.into()),
        }

        if let Some(wait) = self.descriptor.wait_on(|w| w.on_delete) {
            let op = AsyncOperation::deletion(id.clone(), &self.descriptor, wait);
            waiter::wait(&self.api, &self.descriptor, &op, &ctx).await?;
        }
        log::info!("Deleted {id}");
        Ok(())
    }

    async fn import(
        &self,
        raw: &str,
        ctx: &Context,
    ) -> Result<(Identity, RemoteState), ReconcileError> {
        let id = Identity::import(raw, self.descriptor.id_format).ok_or_else(|| {
            ReconcileError::InvalidId {
                raw: raw.to_string(),
            }
        })?;

        match self.read(&id, ctx).await? {
            ReadOutcome::Present(state) => {
                log::info!("Imported {id}");
                Ok((id, state))
            }
            ReadOutcome::Absent => Err(ReconcileError::ImportNonexistent { id }),
        }
    }
}

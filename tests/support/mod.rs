#![allow(dead_code)]

use async_trait::async_trait;
use cloud_reconciler::client::Attributes;
use cloud_reconciler::schema::ResourceDescriptor;
use cloud_reconciler::{ApiError, Identity, RemoteApi, RemoteState, Status};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Calls {
    pub create: usize,
    pub get: usize,
    pub update: usize,
    pub delete: usize,
}

impl Calls {
    pub fn mutations(&self) -> usize {
        self.create + self.update + self.delete
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Get,
    Update,
    Delete,
}

struct Entry {
    attributes: Attributes,
    status: Status,
    /// Polls left before `status` shows.
    pending: usize,
    transitional: Status,
    /// Gone once `pending` runs out.
    deleting: bool,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<Identity, Entry>,
    next_id: u32,
    calls: Calls,
    failures: HashMap<Op, VecDeque<ApiError>>,
    settle_polls: usize,
    settle_to: Option<Status>,
    updates: Vec<Attributes>,
}

/// In-memory control plane counting every call.
#[derive(Default)]
pub struct FakeApi {
    inner: Mutex<Inner>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Asynchronous mutations take `polls` reads to settle.
    pub fn settle_after(&self, polls: usize) {
        self.inner.lock().unwrap().settle_polls = polls;
    }

    /// Asynchronous mutations end in `status` instead of ready.
    pub fn settle_to(&self, status: Status) {
        self.inner.lock().unwrap().settle_to = Some(status);
    }

    pub fn fail_next(&self, op: Op, err: ApiError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self) -> Calls {
        self.inner.lock().unwrap().calls
    }

    pub fn updates(&self) -> Vec<Attributes> {
        self.inner.lock().unwrap().updates.clone()
    }

    pub fn exists(&self, id: &Identity) -> bool {
        self.inner.lock().unwrap().resources.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().resources.len()
    }

    /// Out-of-band creation, ready immediately.
    pub fn insert(&self, id: &str, attributes: &[(&str, Value)]) -> Identity {
        let id = Identity::assigned(id).unwrap();
        self.inner.lock().unwrap().resources.insert(
            id.clone(),
            Entry {
                attributes: attributes
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                status: Status::Ready,
                pending: 0,
                transitional: Status::Ready,
                deleting: false,
            },
        );
        id
    }

    /// Out-of-band deletion.
    pub fn remove(&self, id: &Identity) {
        self.inner.lock().unwrap().resources.remove(id);
    }

    /// Out-of-band change.
    pub fn drift(&self, id: &Identity, name: &str, value: Value) {
        if let Some(entry) = self.inner.lock().unwrap().resources.get_mut(id) {
            entry.attributes.insert(name.to_string(), value);
        }
    }

    fn failure(inner: &mut Inner, op: Op) -> Result<(), ApiError> {
        match inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn settle(inner: &Inner, entry: &mut Entry, transitional: Status) {
        entry.pending = inner.settle_polls;
        entry.transitional = transitional;
        entry.status = inner.settle_to.clone().unwrap_or(Status::Ready);
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        attributes: &Attributes,
    ) -> Result<Identity, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.create += 1;
        Self::failure(&mut inner, Op::Create)?;

        inner.next_id += 1;
        let uuid = format!("00000000-0000-0000-0000-{:012}", inner.next_id);
        let mut attributes = attributes.clone();
        let raw = if descriptor.is_zoned() {
            let zone = attributes
                .get("zone")
                .and_then(Value::as_str)
                .unwrap_or("fr-par-1")
                .to_string();
            attributes.insert("zone".into(), Value::from(zone.clone()));
            format!("{zone}/{uuid}")
        } else {
            uuid
        };
        attributes.insert("organization_id".into(), Value::from("org-1"));

        let id = Identity::assigned(raw).unwrap();
        let mut entry = Entry {
            attributes,
            status: Status::Ready,
            pending: 0,
            transitional: Status::Ready,
            deleting: false,
        };
        if descriptor.asynchronous.is_some() {
            Self::settle(&inner, &mut entry, Status::Creating);
        }
        inner.resources.insert(id.clone(), entry);
        Ok(id)
    }

    async fn get(
        &self,
        _descriptor: &ResourceDescriptor,
        id: &Identity,
    ) -> Result<RemoteState, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.get += 1;
        Self::failure(&mut inner, Op::Get)?;

        let entry = inner.resources.get_mut(id).ok_or(ApiError::NotFound)?;
        if entry.pending > 0 {
            entry.pending -= 1;
            return Ok(RemoteState::new(
                entry.transitional.clone(),
                entry.attributes.clone(),
            ));
        }
        if entry.deleting {
            inner.resources.remove(id);
            return Err(ApiError::NotFound);
        }
        Ok(RemoteState::new(entry.status.clone(), entry.attributes.clone()))
    }

    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        id: &Identity,
        changes: &Attributes,
    ) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.update += 1;
        Self::failure(&mut inner, Op::Update)?;
        inner.updates.push(changes.clone());

        let settle_polls = inner.settle_polls;
        let settle_to = inner.settle_to.clone();
        let entry = inner.resources.get_mut(id).ok_or(ApiError::NotFound)?;
        entry.attributes.extend(changes.clone());
        if descriptor.asynchronous.is_some() {
            entry.pending = settle_polls;
            entry.transitional = Status::Updating;
            entry.status = settle_to.unwrap_or(Status::Ready);
        }
        Ok(())
    }

    async fn delete(&self, descriptor: &ResourceDescriptor, id: &Identity) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.delete += 1;
        Self::failure(&mut inner, Op::Delete)?;

        if !inner.resources.contains_key(id) {
            return Err(ApiError::NotFound);
        }
        if descriptor.asynchronous.is_some() && inner.settle_polls > 0 {
            let settle_polls = inner.settle_polls;
            if let Some(entry) = inner.resources.get_mut(id) {
                entry.pending = settle_polls;
                entry.transitional = Status::Deleting;
                entry.deleting = true;
            }
        } else {
            inner.resources.remove(id);
        }
        Ok(())
    }
}

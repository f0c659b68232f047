use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

/// Opaque remote resource ID. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an ID handed out by the remote API in a creation response.
    ///
    /// Returns `None` for an empty ID, there is nothing to record then.
    pub fn assigned<S: Into<String>>(raw: S) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Accept a user supplied ID, checked against the resource type's format.
    pub fn import(raw: &str, format: IdFormat) -> Option<Self> {
        if format.validate(raw) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a zoned ID into `(zone, id)`.
    pub fn zoned(&self) -> Option<(&str, &str)> {
        self.0.split_once('/')
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> serde::Deserialize<'de> for Identity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Identity::assigned(raw).ok_or_else(|| serde::de::Error::custom("empty resource id"))
    }
}

/// Accepted shape of a resource ID.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdFormat {
    /// Any non-empty string.
    #[default]
    Any,
    Uuid,
    /// `<zone>/<uuid>`, e.g. `fr-par-1/11111111-2222-3333-4444-555555555555`.
    Zoned,
}

impl IdFormat {
    pub fn validate(&self, raw: &str) -> bool {
        if raw.trim().is_empty() {
            return false;
        }
        match self {
            Self::Any => true,
            Self::Uuid => Uuid::parse_str(raw).is_ok(),
            Self::Zoned => match raw.split_once('/') {
                Some((zone, id)) => is_zone(zone) && Uuid::parse_str(id).is_ok(),
                None => false,
            },
        }
    }
}

fn is_zone(zone: &str) -> bool {
    // region-code plus ordinal, e.g. `fr-par-1`, `nl-ams`
    let parts: Vec<_> = zone.split('-').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Per-identity critical sections.
///
/// Operations against one identity are serialized; independent identities
/// proceed concurrently.
#[derive(Debug, Default)]
pub struct IdentityLocks {
    entries: Mutex<HashMap<Identity, Entry>>,
}

#[derive(Debug, Default)]
struct Entry {
    lock: Arc<tokio::sync::Mutex<()>>,
    /// Holder plus waiters.
    users: usize,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    ///
    /// Dropping the future while it waits gives up its place in the queue.
    pub async fn lock(self: &Arc<Self>, id: &Identity) -> IdentityGuard {
        let lock = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry(id.clone()).or_default();
            entry.users += 1;
            entry.lock.clone()
        };
        let mut held = IdentityGuard {
            locks: self.clone(),
            id: id.clone(),
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct IdentityGuard {
    locks: Arc<IdentityLocks>,
    id: Identity,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut entries = self.locks.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(&self.id) {
            entry.users = entry.users.saturating_sub(1);
            if entry.users == 0 {
                entries.remove(&self.id);
            }
        }
    }
}

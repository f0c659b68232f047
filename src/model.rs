use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

/// Declared attributes of one resource instance, with references already
/// resolved to the referenced resources' identities.
#[derive(Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(transparent)]
pub struct DesiredSpec(IndexMap<String, Value>);

impl DesiredSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for DesiredSpec
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Remote lifecycle status of a resource.
#[derive(Clone, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Absent,
    Creating,
    Ready,
    Updating,
    Deleting,
    Error(String),
}

impl Status {
    /// Map a status string as reported by the remote API.
    ///
    /// `reason` is the accompanying error message, if the API sends one.
    pub fn parse(raw: &str, reason: Option<&str>) -> Self {
        let status = raw.to_ascii_lowercase();
        if status.starts_with("error:") {
            return Self::Error(raw["error:".len()..].to_string());
        }
        match status.as_str() {
            "ready" | "running" | "active" => Self::Ready,
            "pending" | "creating" | "provisioning" | "to_create" => Self::Creating,
            "updating" | "migrating" | "to_update" => Self::Updating,
            "deleting" | "to_delete" => Self::Deleting,
            "error" | "failed" | "locked" | "stopped" => {
                Self::Error(reason.unwrap_or(raw).to_string())
            }
            "absent" | "deleted" => Self::Absent,
            other => {
                log::debug!("Unknown remote status '{other}', treating as pending");
                Self::Updating
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// No further automatic transition happens from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Absent | Self::Ready | Self::Error(_))
    }
}

/// Attribute values last observed from the remote API.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteState {
    pub status: Status,
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,
    pub observed_at: DateTime<Utc>,
}

impl RemoteState {
    pub fn new(status: Status, attributes: IndexMap<String, Value>) -> Self {
        Self {
            status,
            attributes,
            observed_at: Utc::now(),
        }
    }

    pub fn absent() -> Self {
        Self::new(Status::Absent, IndexMap::new())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Result of reading a resource. Absence is an outcome, not an error.
#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutcome {
    Present(RemoteState),
    Absent,
}

impl ReadOutcome {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn present(self) -> Option<RemoteState> {
        match self {
            Self::Present(state) => Some(state),
            Self::Absent => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_status() {
        assert_eq!(Status::parse("ready", None), Status::Ready);
        assert_eq!(Status::parse("to_create", None), Status::Creating);
        assert_eq!(
            Status::parse("error:quota", None),
            Status::Error("quota".into())
        );
        assert_eq!(
            Status::parse("error", Some("out of capacity")),
            Status::Error("out of capacity".into())
        );
        assert!(!Status::parse("something_new", None).is_terminal());
    }

    #[test]
    fn test_parse_status_ignores_case() {
        assert_eq!(Status::parse("READY", None), Status::Ready);
        assert_eq!(
            Status::parse("Error:Quota", None),
            Status::Error("Quota".into())
        );
        // a stopped LB never becomes ready on its own
        assert_eq!(Status::parse("stopped", None), Status::Error("stopped".into()));
        assert!(Status::parse("Stopped", None).is_failure());
        assert!(!Status::parse("unknown", None).is_terminal());
    }

    #[test]
    fn test_spec_keeps_order() {
        let spec: DesiredSpec = [("b", json!(1)), ("a", json!(2))].into_iter().collect();
        let names: Vec<_> = spec.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}

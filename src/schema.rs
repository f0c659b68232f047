//! Static descriptors for the supported resource types.

use crate::equivalence::FieldEquivalence;
use crate::identity::IdFormat;
use crate::model::Status;
use indexmap::IndexMap;
use serde_json::Value;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    AccountSshKey,
    Lb,
    LbRoute,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [Self::AccountSshKey, Self::Lb, Self::LbRoute];

    pub fn descriptor(&self) -> ResourceDescriptor {
        match self {
            Self::AccountSshKey => ResourceDescriptor {
                kind: *self,
                attributes: SSH_KEY_ATTRIBUTES,
                id_format: IdFormat::Uuid,
                api_path: &["account", "v2alpha1", "ssh-keys"],
                status_field: None,
                asynchronous: None,
                timeout: Duration::from_secs(5 * 60),
                delete_not_found_is_absent: true,
            },
            Self::Lb => ResourceDescriptor {
                kind: *self,
                attributes: LB_ATTRIBUTES,
                id_format: IdFormat::Zoned,
                api_path: &["lb", "v1", "zones", ZONE, "lbs"],
                status_field: Some("status"),
                asynchronous: Some(AsyncDescriptor {
                    terminal: Status::Ready,
                    poll: PollPolicy {
                        interval: Duration::from_secs(5),
                        max_interval: Duration::from_secs(30),
                        multiplier: 2,
                    },
                    on_create: true,
                    on_update: true,
                    on_delete: true,
                }),
                timeout: Duration::from_secs(10 * 60),
                delete_not_found_is_absent: true,
            },
            Self::LbRoute => ResourceDescriptor {
                kind: *self,
                attributes: LB_ROUTE_ATTRIBUTES,
                id_format: IdFormat::Zoned,
                api_path: &["lb", "v1", "zones", ZONE, "routes"],
                status_field: None,
                asynchronous: None,
                timeout: Duration::from_secs(10 * 60),
                // a 404 on delete is not known to mean the route is gone
                delete_not_found_is_absent: false,
            },
        }
    }
}

/// Placeholder segment in `api_path`, replaced by the zone of the request.
pub const ZONE: &str = "{zone}";

/// Constant default value of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Literal {
    Str(&'static str),
    Int(i64),
    Bool(bool),
    EmptyList,
}

impl Literal {
    pub fn to_value(self) -> Value {
        match self {
            Self::Str(s) => Value::from(s),
            Self::Int(i) => Value::from(i),
            Self::Bool(b) => Value::from(b),
            Self::EmptyList => Value::Array(Vec::new()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeSchema {
    pub name: &'static str,
    pub required: bool,
    /// Changing it requires replacement, never an update.
    pub immutable: bool,
    /// Set by the remote API only, never declared.
    pub computed: bool,
    pub default: Option<Literal>,
    pub rule: Option<FieldEquivalence>,
}

impl AttributeSchema {
    const fn optional(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            immutable: false,
            computed: false,
            default: None,
            rule: None,
        }
    }

    const fn required(name: &'static str) -> Self {
        Self {
            required: true,
            ..Self::optional(name)
        }
    }

    const fn computed(name: &'static str) -> Self {
        Self {
            computed: true,
            ..Self::optional(name)
        }
    }

    const fn immutable(self) -> Self {
        Self {
            immutable: true,
            ..self
        }
    }

    const fn rule(self, rule: FieldEquivalence) -> Self {
        Self {
            rule: Some(rule),
            ..self
        }
    }

    const fn default(self, default: Literal) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    /// Value sent to the remote API, normalized by the attribute's rule.
    pub fn normalize(&self, value: &Value) -> Value {
        match &self.rule {
            Some(rule) => rule.normalize(value),
            None => value.clone(),
        }
    }
}

const SSH_KEY_ATTRIBUTES: &[AttributeSchema] = &[
    AttributeSchema::optional("name"),
    AttributeSchema::required("public_key")
        .immutable()
        .rule(FieldEquivalence::TrimTrailingNewlines),
    AttributeSchema::optional("project_id").immutable(),
    AttributeSchema::computed("organization_id"),
];

const LB_ATTRIBUTES: &[AttributeSchema] = &[
    AttributeSchema::optional("zone").immutable(),
    AttributeSchema::required("name"),
    AttributeSchema::required("type")
        .immutable()
        .rule(FieldEquivalence::CaseInsensitive),
    AttributeSchema::optional("ip_id").immutable(),
    AttributeSchema::optional("description").rule(FieldEquivalence::UnsetEqualsEmpty),
    AttributeSchema::optional("tags")
        .default(Literal::EmptyList)
        .rule(FieldEquivalence::AbsentEqualsZero),
    AttributeSchema::optional("project_id").immutable(),
    AttributeSchema::computed("organization_id"),
];

const LB_ROUTE_ATTRIBUTES: &[AttributeSchema] = &[
    AttributeSchema::optional("zone").immutable(),
    AttributeSchema::required("frontend_id").immutable(),
    AttributeSchema::required("backend_id"),
    AttributeSchema::optional("match_sni").rule(FieldEquivalence::UnsetEqualsEmpty),
    AttributeSchema::optional("match_host_header").rule(FieldEquivalence::UnsetEqualsEmpty),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    /// Growth factor of the interval after each pending poll; 1 keeps it fixed.
    pub multiplier: u32,
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_interval: interval,
            multiplier: 1,
        }
    }

    pub fn next(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.multiplier.max(1))
            .min(self.max_interval.max(self.interval))
    }
}

/// Which mutations complete asynchronously, and how to wait for them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncDescriptor {
    pub terminal: Status,
    pub poll: PollPolicy,
    pub on_create: bool,
    pub on_update: bool,
    pub on_delete: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: ResourceType,
    pub attributes: &'static [AttributeSchema],
    pub id_format: IdFormat,
    pub api_path: &'static [&'static str],
    /// Payload field carrying the lifecycle status; none means "ready when present".
    pub status_field: Option<&'static str>,
    pub asynchronous: Option<AsyncDescriptor>,
    /// Default deadline of a single operation.
    pub timeout: Duration,
    /// Whether a not-found answer to a delete call reliably means "already gone".
    pub delete_not_found_is_absent: bool,
}

impl ResourceDescriptor {
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn is_zoned(&self) -> bool {
        self.id_format == IdFormat::Zoned
    }

    pub(crate) fn wait_on(&self, pick: impl Fn(&AsyncDescriptor) -> bool) -> Option<&AsyncDescriptor> {
        self.asynchronous.as_ref().filter(|a| pick(a))
    }
}

/// Tunables a deployment may adjust per resource type.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOverrides {
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub max_poll_interval: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct Registry {
    descriptors: IndexMap<ResourceType, ResourceDescriptor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            descriptors: ResourceType::ALL
                .iter()
                .map(|kind| (*kind, kind.descriptor()))
                .collect(),
        }
    }
}

impl Registry {
    pub fn new(overrides: &IndexMap<ResourceType, ResourceOverrides>) -> Self {
        let mut registry = Self::default();
        for (kind, o) in overrides {
            if let Some(descriptor) = registry.descriptors.get_mut(kind) {
                if let Some(timeout) = o.timeout {
                    descriptor.timeout = timeout;
                }
                if let Some(wait) = descriptor.asynchronous.as_mut() {
                    if let Some(interval) = o.poll_interval {
                        wait.poll.interval = interval;
                    }
                    if let Some(max) = o.max_poll_interval {
                        wait.poll.max_interval = max;
                    }
                }
                log::debug!("Applied overrides for {kind:?}: {o:?}");
            }
        }
        registry
    }

    pub fn get(&self, kind: ResourceType) -> ResourceDescriptor {
        self.descriptors
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.descriptor())
    }
}

use crate::schema::{Registry, ResourceOverrides, ResourceType};
use anyhow::Context;
use indexmap::IndexMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub client: ClientConfig,
    /// Per resource type tuning of deadlines and polling.
    #[serde(default)]
    pub resources: IndexMap<ResourceType, ResourceOverrides>,
}

impl Config {
    pub fn registry(&self) -> Registry {
        Registry::new(&self.resources)
    }
}

#[derive(Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// API URL
    pub url: Url,

    /// Secret key sent as `X-Auth-Token`
    pub secret_key: String,

    /// Zone used for zoned resources that don't declare one
    #[serde(default)]
    pub default_zone: Option<String>,

    /// Timeout of a single HTTP request
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("secret_key", &"***")
            .field("default_zone", &self.default_zone)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_yaml::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
}

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// engine configuration
///
/// one instance per repository; every threshold has the documented default
/// so an empty TOML document yields a usable config.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// payloads at or below this size stay in the row store; larger ones
    /// go to the warm tier
    pub hot_max_size: u64,
    /// object cache entry count bound
    pub cache_max_count: usize,
    /// object cache byte bound
    pub cache_max_bytes: u64,
    /// optional per-entry cache TTL in seconds
    pub cache_ttl_secs: Option<u64>,
    /// bundle writer rotation threshold
    pub max_bundle_size: u64,
    /// bundles smaller than this are compaction candidates
    pub small_bundle_threshold: u64,
    /// dead/total ratio above which a bundle is a compaction candidate
    pub dead_object_threshold: f64,
    /// below this many candidates, compaction is a no-op
    pub min_bundles_for_compaction: usize,
    /// key prefix for bundles in the remote bucket
    pub key_prefix: String,
    /// rename/copy detection cutoff in percent
    pub similarity_threshold: u8,
    /// identity used for engine-synthesised commits (merge, squash)
    pub identity: Option<Identity>,
    /// name of the default branch
    pub default_branch: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hot_max_size: 1024 * 1024,
            cache_max_count: 500,
            cache_max_bytes: 25 * 1024 * 1024,
            cache_ttl_secs: None,
            max_bundle_size: 128 * 1024 * 1024,
            small_bundle_threshold: 1024 * 1024,
            dead_object_threshold: 0.3,
            min_bundles_for_compaction: 4,
            key_prefix: "bundles/".to_string(),
            similarity_threshold: 50,
            identity: None,
            default_branch: "main".to_string(),
        }
    }
}

impl Config {
    /// parse config from a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// serialize config to TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// set the committer identity
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some(Identity {
            name: name.into(),
            email: email.into(),
        });
        self
    }
}

/// name and email used when the engine writes commits itself
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

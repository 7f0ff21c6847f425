//! Runtime configuration

use crate::isolation::mounts::DetachStrategy;
use crate::isolation::seccomp::SeccompProfile;
use crate::{CordonError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How identity reports are rendered on stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for a cordon run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CordonConfig {
    /// Directory that becomes the new filesystem root in `-chroot` mode
    pub detach_root: PathBuf,

    /// How the filesystem root is detached
    pub detach_strategy: DetachStrategy,

    /// Size of the tmpfs mounted on the new root, in bytes
    pub root_size: u64,

    /// Map the caller's uid/gid to root inside new user namespaces
    pub map_user_ids: bool,

    /// Allow-list installed in `-seccomp` mode
    pub seccomp_profile: SeccompProfile,

    /// Give up waiting for a child after this long (None = block forever)
    #[serde(with = "opt_secs")]
    pub wait_timeout: Option<Duration>,

    /// Identity report format
    pub report_format: ReportFormat,
}

impl Default for CordonConfig {
    fn default() -> Self {
        Self {
            detach_root: default_detach_root(),
            detach_strategy: DetachStrategy::default(),
            root_size: 16 * 1024 * 1024, // 16MB
            map_user_ids: true,
            seccomp_profile: SeccompProfile::default(),
            wait_timeout: None,
            report_format: ReportFormat::default(),
        }
    }
}

impl CordonConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> CordonConfigBuilder {
        CordonConfigBuilder::default()
    }

    /// Load a JSON config file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CordonError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    /// Parse a JSON config document
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| CordonError::Config(format!("invalid config: {e}")))
    }

    /// Start a builder from this config, for layering overrides on top
    #[must_use]
    pub fn into_builder(self) -> CordonConfigBuilder {
        CordonConfigBuilder { config: self }
    }
}

/// Builder for `CordonConfig`
#[derive(Debug, Default)]
pub struct CordonConfigBuilder {
    config: CordonConfig,
}

impl CordonConfigBuilder {
    #[must_use]
    pub fn detach_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.detach_root = path.into();
        self
    }

    #[must_use]
    pub const fn detach_strategy(mut self, strategy: DetachStrategy) -> Self {
        self.config.detach_strategy = strategy;
        self
    }

    #[must_use]
    pub const fn root_size(mut self, bytes: u64) -> Self {
        self.config.root_size = bytes;
        self
    }

    #[must_use]
    pub const fn root_size_mb(self, mb: u64) -> Self {
        self.root_size(mb * 1024 * 1024)
    }

    #[must_use]
    pub const fn map_user_ids(mut self, map: bool) -> Self {
        self.config.map_user_ids = map;
        self
    }

    #[must_use]
    pub const fn seccomp_profile(mut self, profile: SeccompProfile) -> Self {
        self.config.seccomp_profile = profile;
        self
    }

    #[must_use]
    pub const fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn wait_timeout_secs(self, secs: u64) -> Self {
        self.wait_timeout(Some(Duration::from_secs(secs)))
    }

    #[must_use]
    pub const fn report_format(mut self, format: ReportFormat) -> Self {
        self.config.report_format = format;
        self
    }

    #[must_use]
    pub fn build(self) -> CordonConfig {
        self.config
    }
}

/// Get default detach root from CORDON_ROOT env var or system default
///
/// Returns:
/// - `$CORDON_ROOT` if set
/// - `/tmp/cordon-root` otherwise
pub fn default_detach_root() -> PathBuf {
    std::env::var("CORDON_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/cordon-root"))
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => ser.serialize_some(&d.as_secs()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(de)?.map(Duration::from_secs))
    }
}

//! Configuration loading.
//!
//! Loads Weir configuration from `./weir.toml` (or `$WEIR_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::kernel::namespace::PartitionNaming;
use crate::kernel::store::TagRequest;
use crate::types::Principal;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "weir.toml";

/// File name of the policy-query socket.
pub const QUERY_SOCKET_NAME: &str = "weir.sock";

/// File name of the DNS-observation socket.
pub const DNS_SOCKET_NAME: &str = "weir_dns.sock";

// ── Top-level config ────────────────────────────────────────────

/// Top-level Weir configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WeirConfig {
    /// Service settings (`[service]`).
    pub service: ServiceConfig,
    /// Listener socket paths (`[sockets]`).
    pub sockets: SocketsConfig,
    /// Partition naming (`[namespace]`).
    pub namespace: NamespaceConfig,
    /// Tags created at start-up (`[[tags]]`).
    pub tags: Vec<TagBootstrap>,
}

impl WeirConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Uses `explicit` if given, otherwise `$WEIR_CONFIG_PATH` or
    /// `./weir.toml`. A missing default file yields defaults; a missing
    /// explicit file is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path, true)?,
            None => Self::load_from_file(&Self::config_path(), false)?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file(path: &Path, required: bool) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config file {}: {e}",
                path.display()
            )),
        }
    }

    fn config_path() -> PathBuf {
        Self::config_path_with(|key| std::env::var(key).ok())
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("WEIR_CONFIG_PATH").map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("WEIR_LOG_LEVEL") {
            self.service.log_level = v;
        }
        if let Some(v) = env("WEIR_LOGS_DIR") {
            self.service.logs_dir = Some(PathBuf::from(v));
        }

        if let Some(v) = env("WEIR_QUERY_SOCKET") {
            self.sockets.query = PathBuf::from(v);
        }
        if let Some(v) = env("WEIR_DNS_SOCKET") {
            self.sockets.dns = PathBuf::from(v);
        }

        if let Some(v) = env("WEIR_NAMESPACE_NAMING") {
            match v.parse() {
                Ok(naming) => self.namespace.naming = naming,
                Err(_) => tracing::warn!(
                    var = "WEIR_NAMESPACE_NAMING",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has unknown value types.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: WeirConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.service.log_level)
            .with_context(|| format!("invalid log_level '{}'", self.service.log_level))?;

        if self.sockets.query == self.sockets.dns {
            bail!(
                "query and dns sockets share a path: {}",
                self.sockets.query.display()
            );
        }
        if self.sockets.mode > 0o777 {
            bail!("socket mode {:o} has bits outside 0o777", self.sockets.mode);
        }

        let mut seen = HashSet::new();
        for tag in &self.tags {
            if tag.owner.is_empty() || tag.name.is_empty() {
                bail!("bootstrap tag needs a non-empty owner and name");
            }
            if tag.name.contains(':') {
                bail!("bootstrap tag name '{}' must not contain ':'", tag.name);
            }
            if !seen.insert((tag.owner.as_str(), tag.name.as_str())) {
                bail!("bootstrap tag {}:{} listed twice", tag.owner, tag.name);
            }
        }
        Ok(())
    }
}

// ── Service config ──────────────────────────────────────────────

/// Service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rotated JSON logs. Console-only when unset.
    pub logs_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            logs_dir: None,
        }
    }
}

// ── Sockets config ──────────────────────────────────────────────

/// Listener socket paths and permissions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketsConfig {
    /// Policy-query socket.
    pub query: PathBuf,
    /// DNS-observation socket.
    pub dns: PathBuf,
    /// Permission bits applied to both sockets after bind.
    pub mode: u32,
}

impl Default for SocketsConfig {
    fn default() -> Self {
        let dir = runtime_dir();
        Self {
            query: dir.join(QUERY_SOCKET_NAME),
            dns: dir.join(DNS_SOCKET_NAME),
            mode: 0o660,
        }
    }
}

/// `<runtime dir>/weir`, falling back to the temp dir when the platform
/// has no per-user runtime directory.
pub fn runtime_dir() -> PathBuf {
    directories::BaseDirs::new()
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir)
        .join("weir")
}

// ── Namespace config ────────────────────────────────────────────

/// Partition naming.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// `"sequential"` or `"random"`.
    pub naming: PartitionNaming,
}

// ── Bootstrap tags ──────────────────────────────────────────────

/// A tag created when the service starts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagBootstrap {
    /// Owning principal.
    pub owner: String,
    /// Local tag name.
    pub name: String,
    /// Grant the positive capability to everyone.
    pub global_positive: bool,
    /// Grant the negative capability to everyone.
    pub global_negative: bool,
    /// Principals granted the positive capability.
    pub positive_grantees: Vec<String>,
    /// Principals granted the negative capability.
    pub negative_grantees: Vec<String>,
    /// Hostnames the tag may be declassified to.
    pub domains: Option<Vec<String>>,
}

impl TagBootstrap {
    /// The owner and creation request this entry describes.
    pub fn to_request(&self) -> (Principal, TagRequest) {
        let principals =
            |names: &[String]| names.iter().map(|n| Principal::new(n.as_str())).collect();
        let request = TagRequest {
            name: self.name.clone(),
            global_positive: self.global_positive,
            global_negative: self.global_negative,
            positive_grantees: principals(&self.positive_grantees),
            negative_grantees: principals(&self.negative_grantees),
            domains: self.domains.clone(),
        };
        (Principal::new(self.owner.as_str()), request)
    }
}

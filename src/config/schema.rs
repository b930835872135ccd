//! Configuration schema definitions.
//!
//! This module defines the structure of the lantern-chain configuration files.
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. User config: `~/.config/lantern-chain/config.toml`
//! 2. Additional config file (via `--config` flag)
//! 3. CLI flags (highest priority)
//!
//! Every setting is optional in a file; unset values fall back to defaults
//! when the configuration is resolved.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener and upstream settings.
    #[serde(default)]
    pub relay: RelaySection,

    /// Certificate authority settings.
    #[serde(default)]
    pub ca: CaSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Values set in `other` override values set here.
    pub fn merge(&mut self, other: Config) {
        self.relay.merge(other.relay);
        self.ca.merge(other.ca);
        self.logging.merge(other.logging);
    }
}

/// `[relay]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Primary listener address.
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Interception listener address (ingress only).
    #[serde(default)]
    pub mitm_addr: Option<String>,

    /// Egress relay host. Setting it selects the ingress role.
    #[serde(default)]
    pub upstream_host: Option<String>,

    /// Port used to dial the egress relay.
    #[serde(default)]
    pub upstream_port: Option<u16>,

    /// Host dialed instead of `upstream_host`.
    #[serde(default)]
    pub masquerade_host: Option<String>,

    /// Per-operation I/O deadline on accepted connections, in seconds.
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,

    /// Timeout for upstream dials, in seconds.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl RelaySection {
    fn merge(&mut self, other: RelaySection) {
        merge_opt(&mut self.listen_addr, other.listen_addr);
        merge_opt(&mut self.mitm_addr, other.mitm_addr);
        merge_opt(&mut self.upstream_host, other.upstream_host);
        merge_opt(&mut self.upstream_port, other.upstream_port);
        merge_opt(&mut self.masquerade_host, other.masquerade_host);
        merge_opt(&mut self.io_timeout_secs, other.io_timeout_secs);
        merge_opt(&mut self.connect_timeout_secs, other.connect_timeout_secs);
    }
}

/// `[ca]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CaSection {
    /// PEM file holding the root private key.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// PEM file holding the root certificate.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    /// Subject common name of the root.
    #[serde(default)]
    pub common_name: Option<String>,

    /// Subject organization of the root.
    #[serde(default)]
    pub organization: Option<String>,
}

impl CaSection {
    fn merge(&mut self, other: CaSection) {
        merge_opt(&mut self.key_path, other.key_path);
        merge_opt(&mut self.cert_path, other.cert_path);
        merge_opt(&mut self.common_name, other.common_name);
        merge_opt(&mut self.organization, other.organization);
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: Option<String>,
}

impl LoggingSection {
    fn merge(&mut self, other: LoggingSection) {
        merge_opt(&mut self.level, other.level);
    }
}

// Scalars are overridden when set in the later source.
fn merge_opt<T>(slot: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *slot = other;
    }
}

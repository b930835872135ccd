//! Resolved runtime configuration.

use super::error::ConfigError;
use super::schema::Config;
use crate::ca::CaSettings;
use crate::proxy::director::{DEFAULT_UPSTREAM_PORT, Upstream};
use std::time::Duration;

/// Default interception listener address.
pub const DEFAULT_MITM_ADDR: &str = "localhost:10093";

/// Default per-operation I/O deadline, in seconds.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

/// Default upstream dial timeout, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Which half of the relay pair this process runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRole {
    /// Client-facing side: intercepts and tunnels to the egress relay.
    Ingress(IngressConfig),
    /// Destination-facing side: decodes the side channel and delivers.
    Egress,
}

/// Settings only the ingress role uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressConfig {
    /// Address of the listener accepting direct TLS sessions.
    pub mitm_addr: String,
    /// The egress relay.
    pub upstream: Upstream,
}

/// Fully resolved settings for one relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Primary listener address.
    pub listen_addr: String,
    /// Role, fixed at startup.
    pub role: RelayRole,
    /// Per-operation I/O deadline on accepted connections.
    pub io_timeout: Duration,
    /// Timeout for upstream dials and TLS handshakes.
    pub connect_timeout: Duration,
    /// Certificate authority settings (ingress only uses them).
    pub ca: CaSettings,
}

impl Config {
    /// Resolve merged settings into a runtime configuration.
    ///
    /// The ingress role is selected when a non-empty upstream host is set.
    pub fn resolve(&self) -> Result<RelayConfig, ConfigError> {
        let relay = &self.relay;

        let listen_addr = non_empty(relay.listen_addr.as_deref())
            .ok_or(ConfigError::MissingValue("relay.listen_addr"))?
            .to_string();

        let role = match non_empty(relay.upstream_host.as_deref()) {
            Some(host) => RelayRole::Ingress(IngressConfig {
                mitm_addr: non_empty(relay.mitm_addr.as_deref())
                    .unwrap_or(DEFAULT_MITM_ADDR)
                    .to_string(),
                upstream: Upstream {
                    host: host.to_string(),
                    port: relay.upstream_port.unwrap_or(DEFAULT_UPSTREAM_PORT),
                    masquerade: non_empty(relay.masquerade_host.as_deref()).map(str::to_string),
                },
            }),
            None => RelayRole::Egress,
        };

        if let RelayRole::Ingress(ref ingress) = role
            && ingress.upstream.port == 0
        {
            return Err(ConfigError::InvalidValue {
                field: "relay.upstream_port".into(),
                message: "must be non-zero".into(),
            });
        }

        let io_timeout = seconds(
            "relay.io_timeout_secs",
            relay.io_timeout_secs.unwrap_or(DEFAULT_IO_TIMEOUT_SECS),
        )?;
        let connect_timeout = seconds(
            "relay.connect_timeout_secs",
            relay
                .connect_timeout_secs
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
        )?;

        let defaults = CaSettings::default();
        let ca = CaSettings {
            key_path: self.ca.key_path.clone().unwrap_or(defaults.key_path),
            cert_path: self.ca.cert_path.clone().unwrap_or(defaults.cert_path),
            common_name: self.ca.common_name.clone().unwrap_or(defaults.common_name),
            organization: self.ca.organization.clone().unwrap_or(defaults.organization),
        };

        Ok(RelayConfig {
            listen_addr,
            role,
            io_timeout,
            connect_timeout,
            ca,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn seconds(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be at least 1 second".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{DEFAULT_CERT_FILE, DEFAULT_KEY_FILE};
    use std::path::PathBuf;

    fn config(toml_text: &str) -> Config {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    fn test_missing_listen_addr() {
        let err = config("").resolve().unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue("relay.listen_addr")));
    }

    #[test]
    fn test_egress_role_without_upstream() {
        let resolved = config("[relay]\nlisten_addr = \"0.0.0.0:80\"\n")
            .resolve()
            .unwrap();
        assert_eq!(resolved.role, RelayRole::Egress);
        assert_eq!(resolved.io_timeout, Duration::from_secs(10));
        assert_eq!(resolved.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_blank_upstream_is_egress() {
        let resolved = config("[relay]\nlisten_addr = \"0.0.0.0:80\"\nupstream_host = \"  \"\n")
            .resolve()
            .unwrap();
        assert_eq!(resolved.role, RelayRole::Egress);
    }

    #[test]
    fn test_ingress_role_defaults() {
        let resolved = config(
            "[relay]\nlisten_addr = \"127.0.0.1:8080\"\nupstream_host = \"relay.example.com\"\n",
        )
        .resolve()
        .unwrap();

        let RelayRole::Ingress(ingress) = resolved.role else {
            panic!("expected ingress role");
        };
        assert_eq!(ingress.mitm_addr, DEFAULT_MITM_ADDR);
        assert_eq!(ingress.upstream, Upstream::new("relay.example.com"));
    }

    #[test]
    fn test_ingress_with_masquerade() {
        let resolved = config(
            r#"
            [relay]
            listen_addr = "127.0.0.1:8080"
            upstream_host = "relay.example.com"
            upstream_port = 443
            masquerade_host = "cdn.example.net"
            "#,
        )
        .resolve()
        .unwrap();

        let RelayRole::Ingress(ingress) = resolved.role else {
            panic!("expected ingress role");
        };
        assert_eq!(ingress.upstream.dial_address(), "cdn.example.net:443");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = config("[relay]\nlisten_addr = \"0.0.0.0:80\"\nio_timeout_secs = 0\n")
            .resolve()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_ca_defaults() {
        let resolved = config("[relay]\nlisten_addr = \"0.0.0.0:80\"\n")
            .resolve()
            .unwrap();
        assert_eq!(resolved.ca.key_path, PathBuf::from(DEFAULT_KEY_FILE));
        assert_eq!(resolved.ca.cert_path, PathBuf::from(DEFAULT_CERT_FILE));
        assert_eq!(resolved.ca.common_name, "lantern.io");
        assert_eq!(resolved.ca.organization, "Lantern");
    }
}

//! Command-line interface definitions for lantern-chain.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{CommandFactory, Parser};
use std::path::PathBuf;

/// Two-sided chained HTTP(S) relay.
///
/// Run with `--server` on the client side (ingress): plain HTTP and
/// intercepted HTTPS are tunneled to that egress relay with the true
/// destination carried in X-Lantern-* headers. Run without `--server`
/// near the destination (egress): tunneled requests are decoded and
/// delivered.
#[derive(Parser, Debug)]
#[command(name = "lantern-chain")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_flag = true)]
pub struct Cli {
    /// Address to listen on (e.g. 127.0.0.1:8080).
    #[arg(long = "addr", value_name = "HOST:PORT")]
    pub addr: Option<String>,

    /// Address of the TLS interception listener (ingress only).
    ///
    /// Defaults to localhost:10093.
    #[arg(long = "mitm-addr", alias = "mitmAddr", value_name = "HOST:PORT")]
    pub mitm_addr: Option<String>,

    /// Egress relay host. Selects the ingress role.
    ///
    /// Sent as the Host header of every tunneled request.
    #[arg(long = "server", value_name = "HOST")]
    pub server: Option<String>,

    /// Port used to dial the egress relay. Defaults to 80.
    #[arg(long = "server-port", alias = "serverPort", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Host to dial instead of the egress relay (e.g. a CDN edge).
    ///
    /// Only the physical connection changes; the Host header still names
    /// the egress relay.
    #[arg(long = "masquerade", value_name = "HOST")]
    pub masquerade: Option<String>,

    /// Path to additional config file.
    ///
    /// This config file is merged on top of the user config, giving it the
    /// highest priority except for CLI flags.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print usage and exit.
    #[arg(short = 'h', long = "help")]
    pub help: bool,
}

impl Cli {
    /// Whether usage should be printed instead of running.
    ///
    /// True when help was requested or no listen address came from the
    /// command line or a config file.
    pub fn wants_usage(&self, listen_addr_configured: bool) -> bool {
        self.help || !listen_addr_configured
    }

    /// Print usage to stderr.
    pub fn print_usage() {
        let help = Self::command().render_help();
        eprintln!("{help}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_egress() {
        let cli = Cli::parse_from(["lantern-chain", "--addr", "0.0.0.0:80"]);
        assert_eq!(cli.addr.as_deref(), Some("0.0.0.0:80"));
        assert!(cli.server.is_none());
        assert!(!cli.help);
    }

    #[test]
    fn test_cli_parse_ingress() {
        let cli = Cli::parse_from([
            "lantern-chain",
            "--addr",
            "127.0.0.1:8080",
            "--server",
            "relay.example.com",
            "--server-port",
            "443",
            "--masquerade",
            "cdn.example.net",
            "--mitm-addr",
            "127.0.0.1:10093",
        ]);
        assert_eq!(cli.server.as_deref(), Some("relay.example.com"));
        assert_eq!(cli.server_port, Some(443));
        assert_eq!(cli.masquerade.as_deref(), Some("cdn.example.net"));
        assert_eq!(cli.mitm_addr.as_deref(), Some("127.0.0.1:10093"));
    }

    #[test]
    fn test_cli_legacy_aliases() {
        let cli = Cli::parse_from([
            "lantern-chain",
            "--mitmAddr",
            "localhost:9000",
            "--serverPort",
            "8080",
        ]);
        assert_eq!(cli.mitm_addr.as_deref(), Some("localhost:9000"));
        assert_eq!(cli.server_port, Some(8080));
    }

    #[test]
    fn test_cli_help_flag() {
        let cli = Cli::parse_from(["lantern-chain", "-h"]);
        assert!(cli.help);
        assert!(cli.wants_usage(true));
    }

    #[test]
    fn test_missing_addr_wants_usage() {
        let cli = Cli::parse_from(["lantern-chain"]);
        assert!(cli.wants_usage(false));
        assert!(!cli.wants_usage(true));
    }

    #[test]
    fn test_cli_verbose() {
        let cli = Cli::parse_from(["lantern-chain", "-vv", "--addr", ":8080"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let result = Cli::try_parse_from(["lantern-chain", "--server-port", "99999"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}

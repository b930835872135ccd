//! Relay engine: interception, tunneling and delivery.
//!
//! This module provides both halves of the chained relay:
//! - HTTP CONNECT handling with in-process TLS interception
//! - A direct-TLS interception listener for redirected traffic
//! - Dynamic leaf certificates signed by the local authority
//! - Tunneling of every request to a fixed egress relay, with the true
//!   destination carried in `X-Lantern-*` headers
//! - Optional masquerade dialing (connect to one host, name another)
//! - Egress delivery of tunneled requests to their destination
//!
//! # Architecture
//!
//! ```text
//!  client ──HTTP──▶ ┌──────────────┐
//!                   │ IngressRelay │─┐
//!  client ─CONNECT─▶└──────┬───────┘ │
//!                          ▼         │
//!                  ┌───────────────┐ │   Host: upstream
//!  client ──TLS──▶ │ Interception  │─┤   X-Lantern-Host: dest:port
//!                  │    Engine     │ │   X-Lantern-Scheme: http|https
//!                  └───────────────┘ ▼
//!                          ┌────────────────┐        ┌─────────────┐
//!                          │ TunnelDirector │──TCP──▶│ EgressRelay │──▶ destination
//!                          └────────────────┘        └─────────────┘
//!                        (dials masquerade or upstream)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use lantern_chain::proxy::RelayServer;
//! use std::sync::Arc;
//!
//! let ca = Arc::new(CertificateAuthority::load_or_create(&config.ca)?);
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = RelayServer::new(config, shutdown_rx).with_authority(ca);
//! server.run().await?;
//! ```

pub mod director;
pub mod egress;
pub mod envelope;
pub mod error;
pub mod forward;
pub mod headers;
pub mod ingress;
pub mod intercept;
pub mod io;
pub mod response;
pub mod server;
pub mod side_channel;
pub mod tls;

// Re-export main types for convenient access
pub use director::{TunnelDirector, Upstream};
pub use egress::EgressRelay;
pub use envelope::Envelope;
pub use error::{ProxyError, ProxyResult};
pub use forward::{DialTarget, Forwarder};
pub use ingress::IngressRelay;
pub use intercept::InterceptionEngine;
pub use server::{BoundRelay, ConnectionHandler, RelayServer};
pub use side_channel::{Destination, Scheme};
pub use tls::{
    CertificateCache, create_tls_acceptor, create_tls_connector, create_tls_connector_with_roots,
};

//! lantern-chain: two-sided chained HTTP(S) relay
//!
//! One process runs in one of two roles. The **ingress** relay sits next to
//! the client: it accepts plain HTTP, CONNECT, and redirected TLS, terminates
//! TLS with certificates minted by a local authority, and tunnels every
//! request over plain HTTP to a single egress relay. The true destination
//! travels in the `X-Lantern-Host` and `X-Lantern-Scheme` headers, so the
//! connection itself only ever names the egress relay (or a masquerade host).
//! The **egress** relay decodes those headers and delivers the request.
//!
//! # Architecture
//!
//! - **CA**: Persistent root authority and per-host leaf issuance
//! - **Proxy**: Interception, tunneling and egress delivery
//! - **Config**: Hierarchical TOML configuration merged with CLI flags
//! - **Telemetry**: Per-peer byte counts published to subscribers

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod ca;
pub mod cli;
pub mod config;
pub mod proxy;
pub mod telemetry;

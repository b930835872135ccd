//! Error types for relay operations.
//!
//! This module defines structured error types for both relay roles:
//! - Server errors (binding, accept)
//! - TLS errors (leaf issuance, handshake)
//! - Forwarding errors (upstream dial, timeouts)
//! - Side-channel errors (missing or malformed destination headers)

use super::side_channel::SideChannelError;
use crate::ca::CaError;
use thiserror::Error;

/// Unified error type for relay operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Invalid CONNECT request.
    #[error("Invalid CONNECT request: {0}")]
    InvalidConnect(String),

    /// Request cannot be routed (no host, bad URI).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// TLS error during handshake or configuration.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Leaf certificate issuance failed.
    #[error("Certificate generation failed: {0}")]
    CertGeneration(#[from] CaError),

    /// Side-channel headers missing or malformed.
    #[error("Side channel error: {0}")]
    SideChannel(#[from] SideChannelError),

    /// Connection timeout.
    #[error("Connection timeout")]
    Timeout,

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// Failed to bind a listener.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for relay operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}

impl From<http::Error> for ProxyError {
    fn from(err: http::Error) -> Self {
        ProxyError::InvalidRequest(err.to_string())
    }
}

impl ProxyError {
    /// Whether the error is an ordinary peer disconnect.
    ///
    /// Resets and broken pipes are common at connection boundaries and
    /// are logged at debug rather than warn.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            ProxyError::Http(e) => e.is_incomplete_message() || e.is_closed() || e.is_canceled(),
            _ => false,
        }
    }
}

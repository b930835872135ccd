//! Error types for certificate authority operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors related to root and leaf certificate handling.
///
/// These errors occur when generating or persisting the root key pair and
/// certificate, or when minting leaf certificates for intercepted hosts.
#[derive(Debug, Error)]
pub enum CaError {
    /// Failed to generate a key pair.
    #[error("Failed to generate key pair: {0}")]
    KeyGeneration(String),

    /// Failed to generate the root certificate.
    #[error("Failed to generate certificate: {0}")]
    CertGeneration(String),

    /// Failed to sign a leaf certificate with the root key.
    #[error("Failed to sign certificate: {0}")]
    Signing(String),

    /// Failed to read persisted key material.
    #[error("Failed to read {path}: {source}")]
    ReadFile {
        /// File that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to persist key material.
    #[error("Failed to write {path}: {source}")]
    WriteFile {
        /// File that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Persisted key or certificate could not be used.
    #[error("Invalid persisted material in {path}: {message}")]
    InvalidPersisted {
        /// File holding the rejected material.
        path: PathBuf,
        /// Why it was rejected.
        message: String,
    },

    /// Host name cannot be carried in a certificate.
    #[error("Invalid host '{host}': {message}")]
    InvalidHost {
        /// The rejected host.
        host: String,
        /// Why it was rejected.
        message: String,
    },

    /// Leaf requested for an empty host name.
    #[error("No host specified for certificate")]
    NoHost,
}

//! Local certificate authority for TLS interception.
//!
//! The ingress relay decrypts HTTPS traffic from the local client by
//! presenting leaf certificates signed by a root the client has been told to
//! trust. This module owns that root and mints the leaves.

mod authority;
mod error;

pub use authority::{
    CaSettings, CertificateAuthority, DEFAULT_CERT_FILE, DEFAULT_KEY_FILE, LeafCertificate,
};
pub use error::CaError;

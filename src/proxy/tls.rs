//! TLS interception for the ingress relay.
//!
//! The ingress relay terminates client TLS with leaves minted by the local
//! authority and picked by SNI. The egress relay opens TLS to `https`
//! destinations with a connector built here.
//!
//! # ALPN
//!
//! Intercepted sessions only ever advertise `http/1.1`. The decrypted stream
//! is served by hyper's HTTP/1.1 server and every request is re-sent to the
//! egress relay as HTTP/1.1; a client that negotiated h2 could not be served.

use super::error::ProxyError;
use crate::ca::CertificateAuthority;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::ServerName;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use time::{Duration, OffsetDateTime};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error, trace};

/// Cached leaves are re-issued this long before they expire.
const REFRESH_MARGIN: Duration = Duration::hours(1);

struct CachedLeaf {
    key: Arc<CertifiedKey>,
    refresh_after: OffsetDateTime,
}

/// Leaf certificate cache for TLS interception.
///
/// Caches issued certificates per host name (case-insensitive) until shortly
/// before they expire. Concurrent misses for the same host may each issue a
/// leaf; the last one written is kept.
pub struct CertificateCache {
    /// Cache of host -> certified key.
    cache: RwLock<HashMap<String, CachedLeaf>>,
    /// Authority that issues the leaves.
    ca: Arc<CertificateAuthority>,
}

impl CertificateCache {
    /// Create a new certificate cache with the given CA.
    pub fn new(ca: Arc<CertificateAuthority>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ca,
        }
    }

    /// The issuing authority.
    pub fn authority(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    /// Get or issue a certificate for the given host.
    ///
    /// A cached leaf is returned while it is comfortably within its validity
    /// window; otherwise a new one is issued and cached.
    pub fn get_or_generate(&self, host: &str) -> Result<Arc<CertifiedKey>, ProxyError> {
        let host_lower = host.trim().to_lowercase();
        let now = OffsetDateTime::now_utc();

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(leaf) = cache.get(&host_lower)
                && now < leaf.refresh_after
            {
                trace!("Certificate cache hit for {}", host);
                return Ok(leaf.key.clone());
            }
        }

        debug!("Issuing certificate for {}", host);

        let leaf = self.ca.issue_leaf(&host_lower)?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&leaf.key_der)
            .map_err(|e| ProxyError::Tls(format!("Failed to create signing key: {}", e)))?;

        let certified_key = Arc::new(CertifiedKey::new(vec![leaf.cert_der], signing_key));

        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            cache.insert(
                host_lower,
                CachedLeaf {
                    key: certified_key.clone(),
                    refresh_after: leaf.not_after - REFRESH_MARGIN,
                },
            );
        }

        Ok(certified_key)
    }

    /// Clear the certificate cache.
    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.clear();
        debug!("Certificate cache cleared");
    }

    /// Get the number of cached certificates.
    pub fn len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateCache")
            .field("cached", &self.len())
            .field("root", &self.ca.cert_path())
            .finish()
    }
}

/// Picks the leaf for an intercepted session.
///
/// The SNI name wins; sessions without one fall back to the host of the
/// tunnel they arrived on.
pub struct DynamicCertResolver {
    cache: Arc<CertificateCache>,
    /// Host of the `CONNECT` target, if any.
    domain_hint: Option<String>,
}

impl DynamicCertResolver {
    /// Resolver for sessions with no tunnel target (direct TLS).
    pub fn new(cache: Arc<CertificateCache>) -> Self {
        Self {
            cache,
            domain_hint: None,
        }
    }

    /// Resolver that names leaves after `domain` when SNI is absent.
    ///
    /// Clients addressing an IP literal send no SNI.
    pub fn with_domain_hint(cache: Arc<CertificateCache>, domain: String) -> Self {
        Self {
            cache,
            domain_hint: Some(domain),
        }
    }
}

impl ResolvesServerCert for DynamicCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let domain = client_hello
            .server_name()
            .map(|s| s.to_string())
            .or_else(|| self.domain_hint.clone())?;

        trace!("Resolving certificate for: {}", domain);

        match self.cache.get_or_generate(&domain) {
            Ok(key) => Some(key),
            Err(e) => {
                error!("Failed to issue certificate for {}: {}", domain, e);
                None
            }
        }
    }
}

// ResolvesServerCert requires Debug.
impl std::fmt::Debug for DynamicCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCertResolver")
            .field("domain_hint", &self.domain_hint)
            .field("cache_size", &self.cache.len())
            .finish()
    }
}

/// Acceptor for one intercepted client session.
///
/// `domain_hint` names the leaf for clients that send no SNI.
pub fn create_tls_acceptor(
    cert_cache: Arc<CertificateCache>,
    domain_hint: Option<String>,
) -> Result<TlsAcceptor, ProxyError> {
    let resolver: Arc<dyn ResolvesServerCert> = if let Some(domain) = domain_hint {
        Arc::new(DynamicCertResolver::with_domain_hint(cert_cache, domain))
    } else {
        Arc::new(DynamicCertResolver::new(cert_cache))
    };

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    // Sessions are served as HTTP/1.1 only.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Connector the egress relay uses for `https` destinations.
///
/// Trusts the platform's root store. Fails when that store is empty.
pub fn create_tls_connector() -> Result<TlsConnector, ProxyError> {
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        debug!("Skipping unreadable system certificate: {}", err);
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if ignored > 0 {
        debug!("Ignored {} unparsable system certificates", ignored);
    }
    if added == 0 {
        return Err(ProxyError::Tls("No system root certificates found".into()));
    }

    debug!("Trusting {} system root certificates", added);
    Ok(create_tls_connector_with_roots(roots))
}

/// Create a TLS connector that trusts exactly `roots`.
pub fn create_tls_connector_with_roots(roots: RootCertStore) -> TlsConnector {
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Convert a host name or IP literal to a ServerName for TLS connection.
pub fn domain_to_server_name(domain: &str) -> Result<ServerName<'static>, ProxyError> {
    ServerName::try_from(domain.to_string())
        .map_err(|_| ProxyError::Tls(format!("Invalid server name: {}", domain)))
}

//! In-flight requests tagged with their declared destination.

use super::error::{ProxyError, ProxyResult};
use super::side_channel::{Destination, Scheme, explicit_port};
use http::Request;
use http::header::HOST;
use http::uri::Authority;

/// A request together with the destination the client asked for.
///
/// The destination, not the request's Host header, decides where the
/// request is ultimately delivered.
#[derive(Debug)]
pub struct Envelope<B> {
    request: Request<B>,
    destination: Destination,
}

impl<B> Envelope<B> {
    /// Wrap a request with an explicit destination.
    pub fn new(request: Request<B>, destination: Destination) -> Self {
        Self {
            request,
            destination,
        }
    }

    /// Wrap a plain proxy request, taking the host from the URI or Host header.
    pub fn from_plain(request: Request<B>) -> ProxyResult<Self> {
        let host = request_host(&request).ok_or_else(|| {
            ProxyError::InvalidRequest(format!("No host for {} {}", request.method(), request.uri()))
        })?;
        let destination = Destination::new(Scheme::Http, host);
        destination.authority()?;
        Ok(Self::new(request, destination))
    }

    /// Declared destination.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The wrapped request.
    pub fn request(&self) -> &Request<B> {
        &self.request
    }

    /// Split into request and destination.
    pub fn into_parts(self) -> (Request<B>, Destination) {
        (self.request, self.destination)
    }
}

/// Host the request addresses: the URI authority, else the Host header.
pub fn request_host<B>(request: &Request<B>) -> Option<String> {
    if let Some(authority) = request.uri().authority() {
        return Some(authority.as_str().to_string());
    }

    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}

/// Normalise an authority to `host:port`, appending `default_port` when absent.
///
/// Bracketed IPv6 literals are kept bracketed.
pub fn normalize_authority(raw: &str, default_port: u16) -> ProxyResult<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains('@') {
        return Err(ProxyError::InvalidConnect(format!("Invalid authority '{raw}'")));
    }

    let authority: Authority = raw
        .parse()
        .map_err(|e| ProxyError::InvalidConnect(format!("Invalid authority '{raw}': {e}")))?;

    if authority.host().is_empty() {
        return Err(ProxyError::InvalidConnect(format!("Invalid authority '{raw}'")));
    }

    let port = explicit_port(&authority)
        .map_err(|e| ProxyError::InvalidConnect(format!("Invalid authority '{raw}': {e}")))?
        .unwrap_or(default_port);
    Ok(format!("{}:{}", authority.host(), port))
}

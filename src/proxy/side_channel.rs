//! Side channel carrying the logical destination of a tunneled request.
//!
//! The ingress relay sends every request to the egress relay over plain HTTP,
//! addressed to the relay itself. The host and scheme the client actually
//! asked for travel in two ordinary headers:
//!
//! - `X-Lantern-Host`: the destination authority (`host` or `host:port`)
//! - `X-Lantern-Scheme`: `http` or `https`
//!
//! [`encode`] writes them on the ingress side and [`decode`] reads them on the
//! egress side. The headers are neither signed nor encrypted.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::uri::{Authority, PathAndQuery, Uri};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Header carrying the declared destination host.
pub const LANTERN_HOST: HeaderName = HeaderName::from_static("x-lantern-host");

/// Header carrying the declared destination scheme.
pub const LANTERN_SCHEME: HeaderName = HeaderName::from_static("x-lantern-scheme");

/// Errors reading or writing the side channel.
#[derive(Debug, Error)]
pub enum SideChannelError {
    /// A side-channel header is absent.
    #[error("Missing side-channel header {0}")]
    Missing(HeaderName),

    /// A side-channel header holds non-text bytes.
    #[error("Side-channel header {0} is not valid text")]
    NotText(HeaderName),

    /// The declared scheme is neither `http` nor `https`.
    #[error("Unknown scheme '{0}'")]
    UnknownScheme(String),

    /// The declared host cannot be used as a URL authority.
    #[error("Invalid destination host '{host}': {message}")]
    InvalidHost {
        /// The rejected host.
        host: String,
        /// Why it was rejected.
        message: String,
    },
}

/// URL scheme of the logical destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Lowercase scheme name.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Port used when the destination names none.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = SideChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            _ => Err(SideChannelError::UnknownScheme(s.to_string())),
        }
    }
}

/// Port named by `authority`, if any.
///
/// `Authority` accepts any text after the last colon; a port part that is not
/// a valid `u16` is an error rather than "no port".
pub fn explicit_port(authority: &Authority) -> Result<Option<u16>, &'static str> {
    match authority.port_u16() {
        Some(port) => Ok(Some(port)),
        None if authority.as_str().len() > authority.host().len() => Err("invalid port"),
        None => Ok(None),
    }
}

/// Logical destination of a request, independent of where it is dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Scheme the client used.
    pub scheme: Scheme,
    /// Authority the client addressed, with or without a port.
    pub host: String,
}

impl Destination {
    /// Create a destination.
    pub fn new(scheme: Scheme, host: impl Into<String>) -> Self {
        Self {
            scheme,
            host: host.into(),
        }
    }

    /// Parse the host as a URL authority.
    ///
    /// Empty hosts and hosts carrying user info are rejected.
    pub fn authority(&self) -> Result<Authority, SideChannelError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(self.invalid("empty host"));
        }
        if host.contains('@') {
            return Err(self.invalid("user info is not allowed"));
        }
        let authority = host
            .parse::<Authority>()
            .map_err(|e| self.invalid(&e.to_string()))?;
        explicit_port(&authority).map_err(|message| self.invalid(message))?;
        Ok(authority)
    }

    /// Port to dial, falling back to the scheme default.
    pub fn port(&self) -> Result<u16, SideChannelError> {
        let authority = self.authority()?;
        Ok(authority
            .port_u16()
            .unwrap_or_else(|| self.scheme.default_port()))
    }

    /// `host:port` socket address to dial for this destination.
    pub fn dial_address(&self) -> Result<String, SideChannelError> {
        let authority = self.authority()?;
        let port = authority
            .port_u16()
            .unwrap_or_else(|| self.scheme.default_port());
        Ok(format!("{}:{}", authority.host(), port))
    }

    /// Host name without port or IPv6 brackets, as used for TLS SNI.
    pub fn server_name(&self) -> Result<String, SideChannelError> {
        let authority = self.authority()?;
        Ok(authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string())
    }

    /// Absolute URL of this destination with the given path and query.
    pub fn url(&self, path_and_query: Option<&PathAndQuery>) -> Result<Uri, SideChannelError> {
        let authority = self.authority()?;
        let path = path_and_query
            .map(PathAndQuery::as_str)
            .unwrap_or("/");

        Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(authority)
            .path_and_query(path)
            .build()
            .map_err(|e| self.invalid(&e.to_string()))
    }

    fn invalid(&self, message: &str) -> SideChannelError {
        SideChannelError::InvalidHost {
            host: self.host.clone(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)
    }
}

/// Write the destination into the side-channel headers.
///
/// Existing side-channel headers are replaced.
pub fn encode(destination: &Destination, headers: &mut HeaderMap) -> Result<(), SideChannelError> {
    let host = HeaderValue::from_str(&destination.host).map_err(|e| SideChannelError::InvalidHost {
        host: destination.host.clone(),
        message: e.to_string(),
    })?;

    headers.insert(LANTERN_HOST, host);
    headers.insert(
        LANTERN_SCHEME,
        HeaderValue::from_static(destination.scheme.as_str()),
    );
    Ok(())
}

/// Read the destination from the side-channel headers.
///
/// Both headers must be present; the host must be a usable authority.
pub fn decode(headers: &HeaderMap) -> Result<Destination, SideChannelError> {
    let host = header_text(headers, LANTERN_HOST)?;
    let scheme = header_text(headers, LANTERN_SCHEME)?.parse::<Scheme>()?;

    let destination = Destination::new(scheme, host.trim());
    destination.authority()?;
    Ok(destination)
}

/// Remove the side-channel headers.
pub fn strip(headers: &mut HeaderMap) {
    headers.remove(LANTERN_HOST);
    headers.remove(LANTERN_SCHEME);
}

fn header_text(headers: &HeaderMap, name: HeaderName) -> Result<&str, SideChannelError> {
    headers
        .get(&name)
        .ok_or_else(|| SideChannelError::Missing(name.clone()))?
        .to_str()
        .map_err(|_| SideChannelError::NotText(name.clone()))
}

//! Tunnel director: routes ingress traffic to the egress relay.
//!
//! Every request leaving the ingress relay is addressed to the egress relay
//! itself. The destination the client asked for travels in the side-channel
//! headers, and the physical connection may go to a masquerade host (for
//! example a CDN edge) instead of the relay's own name:
//!
//! ```text
//! client request                   wire request (to masquerade:port)
//! GET https://example.com/a   ──▶   GET /a HTTP/1.1
//!                                   Host: relay.example.com
//!                                   X-Lantern-Host: example.com:443
//!                                   X-Lantern-Scheme: https
//! ```

use super::envelope::Envelope;
use super::error::{ProxyError, ProxyResult};
use super::forward::{DialTarget, Forwarder};
use super::headers::strip_hop_by_hop;
use super::response::ProxyBody;
use super::side_channel;
use bytes::Bytes;
use http::header::{HOST, HeaderValue};
use http::uri::Uri;
use hyper::body::Body;
use hyper::{Request, Response};
use tracing::debug;

/// Default port for the physical connection to the egress relay.
pub const DEFAULT_UPSTREAM_PORT: u16 = 80;

/// The egress relay as seen from the ingress side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Logical host name of the egress relay, sent as the Host header.
    pub host: String,
    /// Port to dial.
    pub port: u16,
    /// Host to dial instead of `host`, if any.
    pub masquerade: Option<String>,
}

impl Upstream {
    /// Upstream without masquerade on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_UPSTREAM_PORT,
            masquerade: None,
        }
    }

    /// Address the physical connection is made to.
    ///
    /// The masquerade host when configured, else the upstream host; the
    /// side-channel headers play no part in this choice.
    pub fn dial_address(&self) -> String {
        let host = self
            .masquerade
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.host);
        format!("{}:{}", host, self.port)
    }
}

/// Rewrites envelopes into requests for the egress relay and forwards them.
#[derive(Debug, Clone)]
pub struct TunnelDirector {
    upstream: Upstream,
    forwarder: Forwarder,
}

impl TunnelDirector {
    /// Create a director for `upstream`.
    pub fn new(upstream: Upstream, forwarder: Forwarder) -> Self {
        Self {
            upstream,
            forwarder,
        }
    }

    /// The configured egress relay.
    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Rewrite an envelope into the request sent to the egress relay.
    ///
    /// The declared destination is written to the side channel, the request
    /// target becomes `http://{upstream}{path}` and Host is the upstream host.
    pub fn direct<B>(&self, envelope: Envelope<B>) -> ProxyResult<Request<B>> {
        let (mut request, destination) = envelope.into_parts();

        strip_hop_by_hop(request.headers_mut());
        side_channel::encode(&destination, request.headers_mut())?;

        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = Uri::builder()
            .scheme("http")
            .authority(self.upstream.host.as_str())
            .path_and_query(path)
            .build()
            .map_err(|e| {
                ProxyError::InvalidRequest(format!(
                    "Cannot address upstream '{}': {}",
                    self.upstream.host, e
                ))
            })?;
        *request.uri_mut() = uri;

        let host = HeaderValue::from_str(&self.upstream.host).map_err(|e| {
            ProxyError::InvalidRequest(format!("Invalid upstream host '{}': {}", self.upstream.host, e))
        })?;
        request.headers_mut().insert(HOST, host);

        Ok(request)
    }

    /// Direct the envelope and forward it over a plain connection.
    pub async fn forward<B>(&self, envelope: Envelope<B>) -> ProxyResult<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let destination = envelope.destination().clone();
        let request = self.direct(envelope)?;
        let target = DialTarget::plain(self.upstream.dial_address());

        debug!(
            "Tunneling {} {} via {}",
            request.method(),
            destination,
            target.address
        );

        self.forwarder.send(&target, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::side_channel::{Destination, LANTERN_HOST, LANTERN_SCHEME, Scheme};
    use std::time::Duration;

    fn director(masquerade: Option<&str>) -> TunnelDirector {
        TunnelDirector::new(
            Upstream {
                host: "relay.example.com".into(),
                port: 8080,
                masquerade: masquerade.map(str::to_string),
            },
            Forwarder::plain(Duration::from_secs(1)),
        )
    }

    #[test]
    fn test_direct_sets_side_channel_and_host() {
        let request = Request::get("/a?b=c")
            .header(HOST, "example.com")
            .body(())
            .unwrap();
        let envelope = Envelope::new(request, Destination::new(Scheme::Https, "example.com:443"));

        let out = director(None).direct(envelope).unwrap();

        assert_eq!(out.uri(), "http://relay.example.com/a?b=c");
        assert_eq!(out.headers()[HOST], "relay.example.com");
        assert_eq!(out.headers()[LANTERN_HOST], "example.com:443");
        assert_eq!(out.headers()[LANTERN_SCHEME], "https");
    }

    #[test]
    fn test_direct_overwrites_client_side_channel() {
        let request = Request::get("http://example.com/")
            .header("x-lantern-host", "spoofed.example")
            .body(())
            .unwrap();
        let envelope = Envelope::from_plain(request).unwrap();

        let out = director(None).direct(envelope).unwrap();

        assert_eq!(out.headers().get_all(LANTERN_HOST).iter().count(), 1);
        assert_eq!(out.headers()[LANTERN_HOST], "example.com");
        assert_eq!(out.headers()[LANTERN_SCHEME], "http");
    }

    #[test]
    fn test_direct_strips_hop_by_hop() {
        let request = Request::get("http://example.com/")
            .header("proxy-connection", "keep-alive")
            .header("proxy-authorization", "Basic Zm9vOmJhcg==")
            .body(())
            .unwrap();
        let out = director(None)
            .direct(Envelope::from_plain(request).unwrap())
            .unwrap();

        assert!(!out.headers().contains_key("proxy-connection"));
        assert!(!out.headers().contains_key("proxy-authorization"));
    }

    #[test]
    fn test_dial_address_prefers_masquerade() {
        assert_eq!(
            director(Some("cdn.example.net")).upstream().dial_address(),
            "cdn.example.net:8080"
        );
        assert_eq!(
            director(None).upstream().dial_address(),
            "relay.example.com:8080"
        );
        assert_eq!(
            director(Some("")).upstream().dial_address(),
            "relay.example.com:8080"
        );
    }

    #[test]
    fn test_masquerade_does_not_change_headers() {
        let build = || {
            Envelope::new(
                Request::get("/").body(()).unwrap(),
                Destination::new(Scheme::Http, "example.com"),
            )
        };

        let plain = director(None).direct(build()).unwrap();
        let masked = director(Some("cdn.example.net")).direct(build()).unwrap();

        assert_eq!(plain.uri(), masked.uri());
        assert_eq!(plain.headers(), masked.headers());
    }
}

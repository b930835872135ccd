//! Egress relay: delivers tunneled requests to their real destination.
//!
//! Requests arrive addressed to the relay itself. The side-channel headers
//! name the actual destination; the relay rebuilds the absolute URL from
//! them, removes them, and forwards to that destination over plain TCP or
//! TLS according to the declared scheme.

use super::error::{ProxyError, ProxyResult};
use super::forward::{DialTarget, Forwarder};
use super::headers::strip_hop_by_hop;
use super::response::{ProxyBody, error_response, text_response};
use super::server::{ConnectionHandler, HandlerFuture, RelayStream};
use super::side_channel::{self, Scheme};
use bytes::Bytes;
use http::header::{HOST, HeaderValue};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Egress half of the relay pair.
#[derive(Debug, Clone)]
pub struct EgressRelay {
    forwarder: Forwarder,
}

impl EgressRelay {
    /// Create an egress relay that forwards with `forwarder`.
    ///
    /// The forwarder needs a TLS connector to reach `https` destinations.
    pub fn new(forwarder: Forwarder) -> Self {
        Self { forwarder }
    }

    /// Turn a tunneled request into the request for its real destination.
    ///
    /// Returns the rewritten request and where to dial it. Fails without side
    /// effects when the side channel is missing or malformed.
    pub fn outbound_request<B>(mut request: Request<B>) -> ProxyResult<(Request<B>, DialTarget)> {
        let destination = side_channel::decode(request.headers())?;

        let url = destination.url(request.uri().path_and_query())?;
        *request.uri_mut() = url;

        let headers = request.headers_mut();
        side_channel::strip(headers);
        strip_hop_by_hop(headers);
        let host = HeaderValue::from_str(&destination.host).map_err(|e| {
            ProxyError::InvalidRequest(format!("Invalid destination host: {e}"))
        })?;
        headers.insert(HOST, host);

        let address = destination.dial_address()?;
        let target = match destination.scheme {
            Scheme::Http => DialTarget::plain(address),
            Scheme::Https => DialTarget::tls(address, destination.server_name()?),
        };

        Ok((request, target))
    }

    /// Handle one request from the ingress side.
    ///
    /// Failures are reported to the caller as error responses: `405` for
    /// `CONNECT`, `502` for a bad side channel or unreachable destination.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if request.method() == Method::CONNECT {
            debug!("Rejecting CONNECT {} on egress", request.uri());
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "CONNECT is not supported");
        }

        let (request, target) = match Self::outbound_request(request) {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!("Cannot route tunneled request: {}", e);
                return text_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
            }
        };

        info!("{} {} via {}", request.method(), request.uri(), target.address);

        match self.forwarder.send(&target, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Forwarding to {} failed: {}", target.address, e);
                error_response(&e)
            }
        }
    }
}

impl ConnectionHandler for EgressRelay {
    fn serve(self: Arc<Self>, stream: RelayStream) -> HandlerFuture {
        Box::pin(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let relay = self.clone();
                async move { Ok::<_, Infallible>(relay.handle(req).await) }
            });

            http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(TokioIo::new(stream), service)
                .await
                .map_err(ProxyError::from)
        })
    }
}

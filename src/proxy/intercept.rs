//! TLS interception of client HTTPS traffic.
//!
//! The engine terminates the client's TLS session with a leaf issued by the
//! local authority, then serves HTTP/1.1 on the decrypted stream. Every
//! request read from it is tagged with scheme `https` and its true host and
//! handed to the [`TunnelDirector`].
//!
//! Sessions reach the engine two ways:
//!
//! 1. `CONNECT host:port` on the ingress listener. The relay answers
//!    `200`, and after the upgrade the tunnel is intercepted with the
//!    `CONNECT` target as the destination of every request.
//! 2. Direct TLS on the interception listener. There is no `CONNECT`
//!    target, so each request's Host header decides, with `:443` appended
//!    when it names no port.

use super::director::TunnelDirector;
use super::envelope::{Envelope, normalize_authority, request_host};
use super::error::{ProxyError, ProxyResult};
use super::response::{ProxyBody, empty_body, error_response};
use super::server::{ConnectionHandler, HandlerFuture, RelayStream, log_connection_error};
use super::side_channel::{Destination, Scheme};
use super::tls::{CertificateCache, create_tls_acceptor};
use http::uri::Authority;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Port assumed for HTTPS destinations that name none.
const HTTPS_PORT: u16 = 443;

/// Terminates client TLS and feeds the decrypted requests to the director.
#[derive(Debug)]
pub struct InterceptionEngine {
    certs: Arc<CertificateCache>,
    director: Arc<TunnelDirector>,
}

impl InterceptionEngine {
    /// Create an engine issuing leaves from `certs`.
    pub fn new(certs: Arc<CertificateCache>, director: Arc<TunnelDirector>) -> Self {
        Self { certs, director }
    }

    /// Answer a `CONNECT` request and intercept the tunnel it opens.
    ///
    /// Returns `200` and spawns the interception once hyper hands over the
    /// upgraded connection. A missing or malformed authority answers `400`.
    pub fn handle_connect(self: &Arc<Self>, req: Request<Incoming>) -> Response<ProxyBody> {
        let target = match connect_target(&req) {
            Ok(target) => target,
            Err(e) => {
                warn!("Rejecting CONNECT {}: {}", req.uri(), e);
                return error_response(&e);
            }
        };

        debug!("CONNECT request to {}", target);

        let engine = self.clone();
        tokio::spawn(async move {
            match hyper::upgrade::on(req).await {
                Ok(upgraded) => {
                    if let Err(e) = engine.intercept(TokioIo::new(upgraded), Some(target.clone())).await
                    {
                        log_connection_error(&target, &e);
                    }
                }
                Err(e) => {
                    warn!("HTTP upgrade failed for {}: {}", target, e);
                }
            }
        });

        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::OK;
        response
    }

    /// Intercept one TLS session from a client.
    ///
    /// `target` is the `host:port` the session belongs to, if known. Its host
    /// also serves as the certificate name for clients that send no SNI.
    pub async fn intercept<S>(self: Arc<Self>, stream: S, target: Option<String>) -> ProxyResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let hint = target.as_deref().and_then(host_of);
        let acceptor = create_tls_acceptor(self.certs.clone(), hint)?;

        let client_tls = acceptor
            .accept(stream)
            .await
            .map_err(|e| ProxyError::Tls(format!("Client TLS handshake failed: {}", e)))?;

        let sni = client_tls.get_ref().1.server_name().map(str::to_string);
        debug!(
            "TLS established with client (target: {:?}, sni: {:?})",
            target, sni
        );

        let service = service_fn(move |req: Request<Incoming>| {
            let engine = self.clone();
            let target = target.clone();
            async move { Ok::<_, Infallible>(engine.relay(req, target.as_deref()).await) }
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(TokioIo::new(client_tls), service)
            .await
            .map_err(ProxyError::from)
    }

    /// Tag a decrypted request with its destination and tunnel it.
    async fn relay(&self, req: Request<Incoming>, target: Option<&str>) -> Response<ProxyBody> {
        let host = match target {
            Some(target) => Ok(target.to_string()),
            None => request_host(&req)
                .ok_or_else(|| ProxyError::InvalidRequest("No Host in intercepted request".into()))
                .and_then(|host| normalize_authority(&host, HTTPS_PORT)),
        };

        let host = match host {
            Ok(host) => host,
            Err(e) => {
                warn!("Cannot route intercepted request {}: {}", req.uri(), e);
                return error_response(&e);
            }
        };

        info!("{} https://{}{}", req.method(), host, req.uri());

        let envelope = Envelope::new(req, Destination::new(Scheme::Https, host));
        match self.director.forward(envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Tunneling intercepted request failed: {}", e);
                error_response(&e)
            }
        }
    }
}

impl ConnectionHandler for InterceptionEngine {
    fn serve(self: Arc<Self>, stream: RelayStream) -> HandlerFuture {
        Box::pin(self.intercept(stream, None))
    }
}

/// Normalised `host:port` of a `CONNECT` request.
fn connect_target<B>(req: &Request<B>) -> ProxyResult<String> {
    let authority = req
        .uri()
        .authority()
        .ok_or_else(|| ProxyError::InvalidConnect("Missing authority in CONNECT request".into()))?;
    normalize_authority(authority.as_str(), HTTPS_PORT)
}

/// Host part of a `host:port` target, without IPv6 brackets.
fn host_of(target: &str) -> Option<String> {
    let authority: Authority = target.parse().ok()?;
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']');
    (!host.is_empty()).then(|| host.to_string())
}

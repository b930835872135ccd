//! Ingress relay: the client-facing HTTP proxy.
//!
//! Accepts ordinary proxy requests (`GET http://host/path`) and `CONNECT`
//! on one HTTP/1.1 listener. `CONNECT` tunnels are intercepted; everything
//! else is tagged `http` and sent straight to the [`TunnelDirector`].

use super::director::TunnelDirector;
use super::envelope::Envelope;
use super::error::ProxyError;
use super::intercept::InterceptionEngine;
use super::response::{ProxyBody, error_response};
use super::server::{ConnectionHandler, HandlerFuture, RelayStream};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, warn};

/// Ingress half of the relay pair.
#[derive(Debug)]
pub struct IngressRelay {
    engine: Arc<InterceptionEngine>,
    director: Arc<TunnelDirector>,
}

impl IngressRelay {
    /// Create an ingress relay.
    pub fn new(engine: Arc<InterceptionEngine>, director: Arc<TunnelDirector>) -> Self {
        Self { engine, director }
    }

    /// Handle one client request.
    ///
    /// Requests with no determinable host answer `400`; tunnel failures
    /// answer `502`.
    pub async fn handle(&self, req: Request<Incoming>) -> Response<ProxyBody> {
        if req.method() == Method::CONNECT {
            return self.engine.handle_connect(req);
        }

        let envelope = match Envelope::from_plain(req) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Rejecting proxy request: {}", e);
                return error_response(&e);
            }
        };

        info!(
            "{} {}{}",
            envelope.request().method(),
            envelope.destination(),
            envelope.request().uri().path()
        );

        match self.director.forward(envelope).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Tunneling request failed: {}", e);
                error_response(&e)
            }
        }
    }
}

impl ConnectionHandler for IngressRelay {
    fn serve(self: Arc<Self>, stream: RelayStream) -> HandlerFuture {
        Box::pin(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let relay = self.clone();
                async move { Ok::<_, Infallible>(relay.handle(req).await) }
            });

            // Upgrades are needed for CONNECT.
            http1::Builder::new()
                .preserve_header_case(true)
                .title_case_headers(true)
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades()
                .await
                .map_err(ProxyError::from)
        })
    }
}

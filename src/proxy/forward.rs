//! Forwarding primitive shared by both relays.
//!
//! A [`Forwarder`] dials a transport address of the caller's choosing,
//! independent of the request's logical target, optionally wraps it in TLS,
//! and exchanges a single HTTP/1.1 request over the new connection.

use super::error::{ProxyError, ProxyResult};
use super::headers::strip_hop_by_hop;
use super::response::ProxyBody;
use super::tls::domain_to_server_name;
use bytes::Bytes;
use http::header::{HOST, HeaderValue};
use http::uri::Uri;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::client::conn::http1::Builder;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Default timeout for establishing upstream connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a request is physically sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    /// `host:port` to open a TCP connection to.
    pub address: String,
    /// Server name for TLS, or `None` for plain TCP.
    pub tls_server_name: Option<String>,
}

impl DialTarget {
    /// Plain TCP target.
    pub fn plain(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls_server_name: None,
        }
    }

    /// TLS target verified against `server_name`.
    pub fn tls(address: impl Into<String>, server_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            tls_server_name: Some(server_name.into()),
        }
    }
}

/// Sends one request per fresh upstream connection.
#[derive(Clone)]
pub struct Forwarder {
    connect_timeout: Duration,
    tls: Option<TlsConnector>,
}

impl Forwarder {
    /// Forwarder that can only dial plain TCP targets.
    pub fn plain(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            tls: None,
        }
    }

    /// Forwarder that can also dial TLS targets with `connector`.
    pub fn with_tls(connect_timeout: Duration, connector: TlsConnector) -> Self {
        Self {
            connect_timeout,
            tls: Some(connector),
        }
    }

    /// Send `request` to `target` and return the response.
    ///
    /// Hop-by-hop headers are removed from the request and the response. The
    /// request target is sent in origin form; the Host header is kept as set
    /// by the caller, or taken from the URI authority when absent.
    pub async fn send<B>(
        &self,
        target: &DialTarget,
        mut request: Request<B>,
    ) -> ProxyResult<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        strip_hop_by_hop(request.headers_mut());
        to_origin_form(&mut request)?;

        let tls = match &target.tls_server_name {
            None => None,
            Some(name) => {
                let connector = self.tls.as_ref().ok_or_else(|| {
                    ProxyError::Tls(format!("No TLS connector for {}", target.address))
                })?;
                Some((connector, domain_to_server_name(name)?))
            }
        };

        let stream = self.dial(&target.address).await?;

        let response = match tls {
            None => exchange(stream, request).await?,
            Some((connector, server_name)) => {
                let tls = timeout(self.connect_timeout, connector.connect(server_name, stream))
                    .await
                    .map_err(|_| ProxyError::Timeout)?
                    .map_err(|e| ProxyError::Tls(format!("Upstream TLS handshake failed: {e}")))?;
                debug!("TLS established with upstream {}", target.address);
                exchange(tls, request).await?
            }
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, body.boxed()))
    }

    async fn dial(&self, address: &str) -> ProxyResult<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ProxyError::Timeout)?
            .map_err(|e| ProxyError::UpstreamConnect {
                addr: address.to_string(),
                message: e.to_string(),
            })?;
        debug!("Connected to upstream {}", address);
        Ok(stream)
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("connect_timeout", &self.connect_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Rewrite the request target to origin form, keeping a Host header.
fn to_origin_form<B>(request: &mut Request<B>) -> ProxyResult<()> {
    if !request.headers().contains_key(HOST)
        && let Some(authority) = request.uri().authority()
    {
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ProxyError::InvalidRequest(format!("Invalid host: {e}")))?;
        request.headers_mut().insert(HOST, host);
    }

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let origin: Uri = path
        .parse()
        .map_err(|e| ProxyError::InvalidRequest(format!("Invalid request target: {e}")))?;
    *request.uri_mut() = origin;
    Ok(())
}

async fn exchange<T, B>(io: T, request: Request<B>) -> ProxyResult<Response<hyper::body::Incoming>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (mut sender, conn) = Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(io))
        .await?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!("Upstream connection ended: {}", e);
        }
    });

    let response = sender.send_request(request).await?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{Empty, Full};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    // Accept one connection, capture the request head, answer with `reply`.
    async fn one_shot_server(reply: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        (addr, handle)
    }

    #[test]
    fn test_origin_form_keeps_host() {
        let mut request = Request::get("http://example.com:8080/a/b?c=d")
            .body(())
            .unwrap();
        to_origin_form(&mut request).unwrap();
        assert_eq!(request.uri(), "/a/b?c=d");
        assert_eq!(request.headers()[HOST], "example.com:8080");
    }

    #[test]
    fn test_origin_form_respects_existing_host() {
        let mut request = Request::get("http://example.com/")
            .header(HOST, "relay.example")
            .body(())
            .unwrap();
        to_origin_form(&mut request).unwrap();
        assert_eq!(request.uri(), "/");
        assert_eq!(request.headers()[HOST], "relay.example");
    }

    #[tokio::test]
    async fn test_send_dials_target_not_host() {
        let (addr, server) =
            one_shot_server("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nKeep-Alive: timeout=5\r\n\r\nok")
                .await;

        let forwarder = Forwarder::plain(Duration::from_secs(5));
        let request = Request::get("http://logical.example/path")
            .header("connection", "keep-alive")
            .body(Empty::<Bytes>::new())
            .unwrap();

        let response = forwarder
            .send(&DialTarget::plain(addr), request)
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(!response.headers().contains_key("keep-alive"));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /path http/1.1"));
        assert!(head.contains("host: logical.example"));
        assert!(!head.contains("connection: keep-alive"));
    }

    #[tokio::test]
    async fn test_send_refused_is_upstream_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let forwarder = Forwarder::plain(Duration::from_secs(5));
        let request = Request::get("http://example.com/")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let err = forwarder
            .send(&DialTarget::plain(addr), request)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamConnect { .. }));
    }

    #[tokio::test]
    async fn test_tls_target_without_connector_fails() {
        let (addr, _server) = one_shot_server("HTTP/1.1 200 OK\r\n\r\n").await;

        let forwarder = Forwarder::plain(Duration::from_secs(5));
        let request = Request::get("/").body(Empty::<Bytes>::new()).unwrap();

        let err = forwarder
            .send(&DialTarget::tls(addr, "example.com"), request)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Tls(_)));
    }
}

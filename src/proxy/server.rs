//! Relay server: listeners, accept loops and connection tasks.
//!
//! This module provides the server that:
//! - Binds the listeners for the configured role
//! - Runs one accept loop per listener
//! - Spawns one task per accepted connection
//! - Wraps each connection with byte counting and per-operation I/O deadlines
//! - Stops accepting when the shutdown signal fires
//!
//! # Listeners
//!
//! | Role    | Listener         | Handler                 |
//! |---------|------------------|-------------------------|
//! | Ingress | `listen_addr`    | [`IngressRelay`]        |
//! | Ingress | `mitm_addr`      | [`InterceptionEngine`]  |
//! | Egress  | `listen_addr`    | [`EgressRelay`]         |
//!
//! # Example
//!
//! ```ignore
//! use lantern_chain::proxy::RelayServer;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let server = RelayServer::new(config, shutdown_rx).with_authority(ca);
//! server.bind().await?.run().await?;
//!
//! // To shutdown:
//! shutdown_tx.send(true)?;
//! ```

use super::director::TunnelDirector;
use super::egress::EgressRelay;
use super::error::{ProxyError, ProxyResult};
use super::forward::Forwarder;
use super::ingress::IngressRelay;
use super::intercept::InterceptionEngine;
use super::io::DeadlineStream;
use super::tls::{CertificateCache, create_tls_connector};
use crate::ca::CertificateAuthority;
use crate::config::{RelayConfig, RelayRole};
use crate::telemetry::{CountingStream, NoopObserver, TrafficObserver};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Pause after the first failed accept.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);

/// Longest pause between failed accepts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Consecutive failed accepts after which a listener stops.
const MAX_ACCEPT_FAILURES: u32 = 30;

/// Stream type every connection handler receives.
pub type RelayStream = DeadlineStream<CountingStream<TcpStream>>;

/// Future returned by [`ConnectionHandler::serve`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = ProxyResult<()>> + Send>>;

/// Serves one accepted connection to completion.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serve `stream` until the peer or the protocol ends it.
    fn serve(self: Arc<Self>, stream: RelayStream) -> HandlerFuture;
}

/// Log a failed connection at the level it deserves.
///
/// Don't log connection resets as errors; they're common.
pub fn log_connection_error(context: &str, err: &ProxyError) {
    if err.is_disconnect() {
        debug!("Connection ended ({}): {}", context, err);
    } else {
        warn!("Connection error ({}): {}", context, err);
    }
}

/// The relay server for one process.
pub struct RelayServer {
    config: RelayConfig,
    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,
    /// Root authority for interception (ingress only).
    ca: Option<Arc<CertificateAuthority>>,
    /// Receives per-peer byte counts.
    observer: Arc<dyn TrafficObserver>,
    /// Connector for `https` destinations (egress only).
    upstream_tls: Option<TlsConnector>,
}

impl RelayServer {
    /// Create a new relay server.
    ///
    /// # Arguments
    ///
    /// * `config` - Resolved relay configuration.
    /// * `shutdown_rx` - Receiver for shutdown signal.
    pub fn new(config: RelayConfig, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            config,
            shutdown_rx,
            ca: None,
            observer: Arc::new(NoopObserver),
            upstream_tls: None,
        }
    }

    /// Set the certificate authority used for interception.
    pub fn with_authority(mut self, ca: Arc<CertificateAuthority>) -> Self {
        self.ca = Some(ca);
        self
    }

    /// Set the observer receiving per-peer byte counts.
    pub fn with_observer(mut self, observer: Arc<dyn TrafficObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Set the connector used to reach `https` destinations.
    ///
    /// Without one, the egress role verifies against the system roots.
    pub fn with_upstream_tls(mut self, connector: TlsConnector) -> Self {
        self.upstream_tls = Some(connector);
        self
    }

    /// Bind every listener the configured role needs.
    ///
    /// Bind failures are fatal and returned before anything is served.
    pub async fn bind(self) -> ProxyResult<BoundRelay> {
        let mut listeners = Vec::new();

        match &self.config.role {
            RelayRole::Ingress(ingress) => {
                let ca = self.ca.clone().ok_or_else(|| {
                    ProxyError::Tls("Ingress role requires a certificate authority".into())
                })?;

                let forwarder = Forwarder::plain(self.config.connect_timeout);
                let director = Arc::new(TunnelDirector::new(ingress.upstream.clone(), forwarder));
                let certs = Arc::new(CertificateCache::new(ca));
                let engine = Arc::new(InterceptionEngine::new(certs, director.clone()));
                let relay = Arc::new(IngressRelay::new(engine.clone(), director));

                listeners.push(Listener::bind("ingress", &self.config.listen_addr, relay).await?);
                listeners.push(Listener::bind("mitm", &ingress.mitm_addr, engine).await?);

                info!(
                    "Ingress relay tunneling to {} (dialing {})",
                    ingress.upstream.host,
                    ingress.upstream.dial_address()
                );
            }
            RelayRole::Egress => {
                let forwarder = match self.upstream_tls.clone() {
                    Some(connector) => Forwarder::with_tls(self.config.connect_timeout, connector),
                    None => match create_tls_connector() {
                        Ok(connector) => {
                            Forwarder::with_tls(self.config.connect_timeout, connector)
                        }
                        Err(e) => {
                            warn!("HTTPS destinations unavailable: {}", e);
                            Forwarder::plain(self.config.connect_timeout)
                        }
                    },
                };
                let relay = Arc::new(EgressRelay::new(forwarder));

                listeners.push(Listener::bind("egress", &self.config.listen_addr, relay).await?);
            }
        }

        Ok(BoundRelay {
            listeners,
            io_timeout: self.config.io_timeout,
            observer: self.observer,
            shutdown_rx: self.shutdown_rx,
        })
    }

    /// Bind and serve until shutdown or a listener fails.
    pub async fn run(self) -> ProxyResult<()> {
        self.bind().await?.run().await
    }
}

struct Listener {
    name: &'static str,
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
}

impl Listener {
    async fn bind(
        name: &'static str,
        addr: &str,
        handler: Arc<dyn ConnectionHandler>,
    ) -> ProxyResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ProxyError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        info!("{} listening on {}", name, listener.local_addr()?);
        Ok(Self {
            name,
            listener,
            handler,
        })
    }
}

/// A relay whose listeners are bound but not yet serving.
pub struct BoundRelay {
    listeners: Vec<Listener>,
    io_timeout: Duration,
    observer: Arc<dyn TrafficObserver>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BoundRelay {
    /// Local address of the primary listener.
    pub fn listen_addr(&self) -> ProxyResult<SocketAddr> {
        self.local_addr(0)
    }

    /// Local address of the interception listener, on the ingress role.
    pub fn mitm_addr(&self) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.name == "mitm")
            .and_then(|l| l.listener.local_addr().ok())
    }

    fn local_addr(&self, index: usize) -> ProxyResult<SocketAddr> {
        let listener = self
            .listeners
            .get(index)
            .ok_or_else(|| ProxyError::Io(std::io::ErrorKind::NotConnected.into()))?;
        Ok(listener.listener.local_addr()?)
    }

    /// Serve every listener.
    ///
    /// Returns when the shutdown signal fires, or as soon as any accept loop
    /// fails.
    pub async fn run(self) -> ProxyResult<()> {
        let mut loops = JoinSet::new();

        for listener in self.listeners {
            loops.spawn(accept_loop(
                listener,
                self.io_timeout,
                self.observer.clone(),
                self.shutdown_rx.clone(),
            ));
        }

        while let Some(joined) = loops.join_next().await {
            let result = joined.map_err(|e| ProxyError::Io(std::io::Error::other(e)))?;
            if let Err(e) = result {
                loops.abort_all();
                return Err(e);
            }
        }

        Ok(())
    }
}

/// Accept connections until shutdown.
async fn accept_loop(
    listener: Listener,
    io_timeout: Duration,
    observer: Arc<dyn TrafficObserver>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ProxyResult<()> {
    if *shutdown_rx.borrow() {
        return Ok(());
    }

    let mut failures = AcceptFailures::default();

    loop {
        tokio::select! {
            accept_result = listener.listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        debug!("{}: accepted connection from {}", listener.name, peer);
                        spawn_connection_handler(
                            &listener,
                            stream,
                            peer,
                            io_timeout,
                            observer.clone(),
                        );
                    }
                    Err(e) => {
                        warn!("{}: failed to accept connection: {}", listener.name, e);
                        match failures.record() {
                            Some(pause) => tokio::time::sleep(pause).await,
                            None => return Err(ProxyError::Io(e)),
                        }
                        continue;
                    }
                }
                failures.reset();
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("{} shutting down", listener.name);
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Consecutive accept failures on one listener.
///
/// Each failure pauses the loop, doubling up to [`ACCEPT_BACKOFF_MAX`];
/// after [`MAX_ACCEPT_FAILURES`] in a row the listener gives up.
#[derive(Debug, Default)]
struct AcceptFailures {
    count: u32,
}

impl AcceptFailures {
    /// Record a failure. Returns the pause before the next attempt, or
    /// `None` once the listener should stop.
    fn record(&mut self) -> Option<Duration> {
        self.count += 1;
        if self.count >= MAX_ACCEPT_FAILURES {
            return None;
        }
        let pause = ACCEPT_BACKOFF_MIN.saturating_mul(1 << (self.count - 1).min(16));
        Some(pause.min(ACCEPT_BACKOFF_MAX))
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// Spawn a task to handle a single connection.
fn spawn_connection_handler(
    listener: &Listener,
    stream: TcpStream,
    peer: SocketAddr,
    io_timeout: Duration,
    observer: Arc<dyn TrafficObserver>,
) {
    let name = listener.name;
    let handler = listener.handler.clone();
    let counted = CountingStream::new(stream, peer.ip().to_string(), observer);
    let stream = DeadlineStream::new(counted, io_timeout);

    tokio::spawn(async move {
        if let Err(e) = handler.serve(stream).await {
            log_connection_error(&format!("{name} {peer}"), &e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CaSettings;
    use crate::config::IngressConfig;
    use crate::proxy::director::Upstream;
    use crate::telemetry::PeerStats;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn egress_config() -> RelayConfig {
        RelayConfig {
            listen_addr: "127.0.0.1:0".into(),
            role: RelayRole::Egress,
            io_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            ca: CaSettings::default(),
        }
    }

    #[tokio::test]
    async fn test_ingress_requires_authority() {
        let mut config = egress_config();
        config.role = RelayRole::Ingress(IngressConfig {
            mitm_addr: "127.0.0.1:0".into(),
            upstream: Upstream::new("relay.example.com"),
        });
        let (_tx, rx) = watch::channel(false);

        let result = RelayServer::new(config, rx).bind().await;
        assert!(matches!(result, Err(ProxyError::Tls(_))));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = egress_config();
        config.listen_addr = taken.local_addr().unwrap().to_string();
        let (_tx, rx) = watch::channel(false);

        let result = RelayServer::new(config, rx).bind().await;
        assert!(matches!(result, Err(ProxyError::Bind { .. })));
    }

    #[test]
    fn test_accept_failures_back_off_then_give_up() {
        let mut failures = AcceptFailures::default();
        assert_eq!(failures.record(), Some(Duration::from_millis(10)));
        assert_eq!(failures.record(), Some(Duration::from_millis(20)));
        assert_eq!(failures.record(), Some(Duration::from_millis(40)));

        failures.reset();
        assert_eq!(failures.record(), Some(Duration::from_millis(10)));

        let mut last = None;
        for _ in 1..MAX_ACCEPT_FAILURES - 1 {
            last = failures.record();
        }
        assert_eq!(last, Some(ACCEPT_BACKOFF_MAX));
        assert_eq!(failures.record(), None);
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let (tx, rx) = watch::channel(false);
        let bound = RelayServer::new(egress_config(), rx).bind().await.unwrap();
        assert!(bound.mitm_addr().is_none());

        let handle = tokio::spawn(bound.run());
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_traffic_is_counted() {
        let stats = Arc::new(PeerStats::new());
        let (_tx, rx) = watch::channel(false);
        let bound = RelayServer::new(egress_config(), rx)
            .with_observer(stats.clone())
            .bind()
            .await
            .unwrap();
        let addr = bound.listen_addr().unwrap();
        tokio::spawn(bound.run());

        // CONNECT on egress answers 405 without touching the network.
        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 12];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"HTTP/1.1 405");
        drop(client);

        let peer = stats.get("127.0.0.1").unwrap();
        assert!(peer.bytes_up > 0);
        assert!(peer.bytes_dn >= 12);
    }
}

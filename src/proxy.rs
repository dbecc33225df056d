//! Interception engine configuration and lifecycle

use crate::bus::{EventBus, Subscription};
use crate::ca::CertificateAuthority;
use crate::error::{Error, Result};
use crate::server;
use crate::store::TrafficStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};

/// Configuration for the interception engine.
#[derive(Clone)]
pub struct ProxyConfig {
  /// Address the proxy listens on
  pub listen_addr: String,
  /// Directory holding `ca.pem` / `ca-key.pem`
  pub ca_dir: PathBuf,
  /// Deadline applied to handshakes, tunnel reads, and upstream calls
  pub request_timeout: Duration,
  /// Idle timeout for pooled upstream connections
  pub pool_idle_timeout: Duration,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      listen_addr: "127.0.0.1:8080".to_string(),
      ca_dir: PathBuf::from(".graphtap"),
      request_timeout: Duration::from_secs(30),
      pool_idle_timeout: Duration::from_secs(90),
    }
  }
}

/// State shared between the engine facade and its connection tasks.
pub(crate) struct ProxyShared {
  pub(crate) config: ProxyConfig,
  pub(crate) ca: Arc<CertificateAuthority>,
  pub(crate) store: Arc<dyn TrafficStore>,
  pub(crate) bus: Arc<EventBus>,
  pub(crate) client: reqwest::Client,
  pub(crate) project_tag: std::sync::Mutex<String>,
}

struct LifecycleState {
  running: bool,
  bound_addr: Option<SocketAddr>,
  shutdown: Option<oneshot::Sender<()>>,
}

/// The MITM interception engine.
///
/// Terminates client TLS with minted certificates, forwards requests
/// upstream, and emits a capture for every recognized GraphQL exchange:
/// once to the [`TrafficStore`], once to the live event bus.
pub struct InterceptionProxy {
  shared: Arc<ProxyShared>,
  state: Mutex<LifecycleState>,
}

impl InterceptionProxy {
  /// Creates an engine, loading or generating the CA under
  /// `config.ca_dir`.
  ///
  /// Upstream TLS verification is disabled on purpose: this is an
  /// interception tool and the upstream chain is not the one under test.
  pub async fn new(config: ProxyConfig, store: Arc<dyn TrafficStore>) -> Result<Self> {
    let ca = Arc::new(CertificateAuthority::new(&config.ca_dir).await?);

    let client = reqwest::Client::builder()
      .danger_accept_invalid_certs(true)
      .timeout(config.request_timeout)
      .pool_idle_timeout(config.pool_idle_timeout)
      .redirect(reqwest::redirect::Policy::none())
      .build()?;

    Ok(Self {
      shared: Arc::new(ProxyShared {
        config,
        ca,
        store,
        bus: Arc::new(EventBus::new()),
        client,
        project_tag: std::sync::Mutex::new(String::new()),
      }),
      state: Mutex::new(LifecycleState {
        running: false,
        bound_addr: None,
        shutdown: None,
      }),
    })
  }

  /// Binds the listener and starts accepting connections.
  ///
  /// Fails with [`Error::AlreadyRunning`] when called while running; bind
  /// failures surface to the caller.
  pub async fn start(&self) -> Result<()> {
    let mut state = self.state.lock().await;
    if state.running {
      return Err(Error::AlreadyRunning);
    }

    let listener = TcpListener::bind(&self.shared.config.listen_addr)
      .await
      .map_err(|e| {
        Error::other(format!("listen {}: {}", self.shared.config.listen_addr, e))
      })?;
    let bound_addr = listener.local_addr()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(server::serve(listener, shutdown_rx, self.shared.clone()));

    state.running = true;
    state.bound_addr = Some(bound_addr);
    state.shutdown = Some(shutdown_tx);

    tracing::info!(addr = %bound_addr, ca = %self.shared.ca.ca_cert_path().display(), "proxy listening");
    Ok(())
  }

  /// Stops accepting connections. Idempotent; in-flight connection tasks
  /// run to completion rather than being killed.
  pub async fn stop(&self) -> Result<()> {
    let mut state = self.state.lock().await;
    if !state.running {
      return Ok(());
    }
    state.running = false;
    if let Some(shutdown) = state.shutdown.take() {
      let _ = shutdown.send(());
    }
    Ok(())
  }

  /// Whether the engine is currently accepting connections.
  pub async fn running(&self) -> bool {
    self.state.lock().await.running
  }

  /// The proxy's listen address: the bound address while running, the
  /// configured one otherwise.
  pub async fn address(&self) -> String {
    match self.state.lock().await.bound_addr {
      Some(addr) => addr.to_string(),
      None => self.shared.config.listen_addr.clone(),
    }
  }

  /// Tags subsequent captures with the given project identifier. The empty
  /// string means untagged.
  pub fn set_project_tag(&self, tag: impl Into<String>) {
    *self.shared.project_tag.lock().expect("project tag lock poisoned") = tag.into();
  }

  /// Registers a live subscriber for capture events.
  pub async fn subscribe(&self) -> Subscription {
    self.shared.bus.subscribe().await
  }

  /// Removes a live subscriber.
  pub async fn unsubscribe(&self, subscription: &Subscription) {
    self.shared.bus.unsubscribe(subscription).await
  }

  /// Path of the CA certificate for trust-store installation.
  pub fn ca_cert_path(&self) -> PathBuf {
    self.shared.ca.ca_cert_path()
  }

  /// The CA certificate in PEM format.
  pub fn ca_cert_pem(&self) -> Result<String> {
    self.shared.ca.ca_cert_pem()
  }
}

//! Loopback relay harness

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use relay_client::RedemptionProxy;
use relay_core::{ProxyConfig, RelayConfig, RelayResult, SenderMonitor};
use relay_server::{RedemptionRelay, RelayServer};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::collaborators::{FixedRounds, RecordingStateStore, StaticSenderInfo};
use crate::fixtures::recipient;

/// Install a test log subscriber once; `RUST_LOG` overrides the default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Poll `check` every 10ms until it holds or `timeout` passes
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(timeout, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// A relay serving on an ephemeral loopback port
pub struct RelayHarness {
    /// The relay being served
    pub relay: RedemptionRelay,
    /// Where it listens
    pub addr: SocketAddr,
    serving: JoinHandle<RelayResult<()>>,
}

impl RelayHarness {
    /// Proxy configuration pointing at this relay
    pub fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::for_testing(self.addr.to_string())
    }

    /// Stop the relay and wait for its accept loop to exit
    pub async fn shutdown(self) {
        self.relay.stop();
        let _ = self.serving.await;
    }
}

/// Serve a relay in front of `authority` on `127.0.0.1:0`
pub async fn spawn_relay(authority: Arc<dyn SenderMonitor>) -> RelayHarness {
    spawn_relay_with(RelayConfig::for_testing(recipient()), authority).await
}

/// Serve a relay with an explicit configuration
pub async fn spawn_relay_with(
    config: RelayConfig,
    authority: Arc<dyn SenderMonitor>,
) -> RelayHarness {
    let relay = RedemptionRelay::builder(config)
        .float_authority(authority)
        .build()
        .expect("relay config is valid");
    let server = RelayServer::bind(relay.clone(), "127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = server.local_addr().expect("listener has an address");
    let serving = tokio::spawn(server.serve());
    RelayHarness {
        relay,
        addr,
        serving,
    }
}

/// Local collaborators handed to a harness proxy
#[derive(Clone)]
pub struct ProxyDoubles {
    /// Sender info table
    pub sender_info: Arc<StaticSenderInfo>,
    /// Round source
    pub rounds: Arc<FixedRounds>,
    /// Recording state store
    pub store: Arc<RecordingStateStore>,
}

impl Default for ProxyDoubles {
    fn default() -> Self {
        Self {
            sender_info: Arc::new(StaticSenderInfo::new()),
            rounds: Arc::new(FixedRounds::new(1)),
            store: Arc::new(RecordingStateStore::new()),
        }
    }
}

/// Connect and start a proxy with fresh doubles
pub async fn connect_proxy(config: ProxyConfig) -> (RedemptionProxy, ProxyDoubles) {
    let doubles = ProxyDoubles::default();
    let proxy = RedemptionProxy::builder(config)
        .sender_info(doubles.sender_info.clone())
        .rounds(doubles.rounds.clone())
        .sender_store(doubles.store.clone())
        .connect()
        .await
        .expect("relay is reachable");
    proxy.start();
    (proxy, doubles)
}

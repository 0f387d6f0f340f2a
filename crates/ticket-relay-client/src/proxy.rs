//! Redemption proxy
//!
//! Client half of the relay. Implements [`SenderMonitor`] for an issuing
//! node by forwarding tickets to the relay and answering max float reads
//! from a local cache that a single shared update stream keeps current.
//!
//! ## Background work
//!
//! - **Receive loop**: holds one `MonitorMaxFloat` stream open, writes every
//!   update into the cache, and forwards it to local subscribers of that
//!   sender. Reopens the stream with exponential backoff until stopped.
//! - **Cleanup sweep**: evicts cache entries idle for longer than the
//!   liveness window and clears the sender state store for each of them.
//!
//! The relay streams every sender's updates; filtering happens here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    Address, FloatEvent, FloatSink, FloatSubscription, MaxFloatUpdate, ProxyConfig,
    ReconnectConfig, RelayError, RelayResult, RoundSource, SenderInfoSource, SenderMonitor,
    SenderStateStore, ShutdownSignal, SignedTicket, TaskRegistry, U256,
};
use tokio::time::Instant;

use crate::cache::BalanceCache;
use crate::rpc::RelayRpcClient;

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyStatus {
    /// Senders with a cache entry
    pub cached_senders: usize,
    /// Live local max float subscriptions
    pub local_subscribers: usize,
    /// Whether the update stream is currently open
    pub stream_connected: bool,
    /// Whether `stop` has been called
    pub stopped: bool,
}

struct ProxyInner {
    config: ProxyConfig,
    rpc: RelayRpcClient,
    cache: BalanceCache,
    sinks: Mutex<HashMap<Address, Vec<(u64, FloatSink)>>>,
    next_sink_id: AtomicU64,
    sender_info: Arc<dyn SenderInfoSource>,
    rounds: Arc<dyn RoundSource>,
    sender_store: Arc<dyn SenderStateStore>,
    tasks: TaskRegistry,
    started: AtomicBool,
    stream_connected: AtomicBool,
}

impl ProxyInner {
    fn apply_update(&self, update: MaxFloatUpdate) {
        let MaxFloatUpdate { sender, max_float } = update;
        self.cache.update(sender, max_float, Instant::now());

        let mut sinks = self.sinks.lock();
        if let Some(local) = sinks.get_mut(&sender) {
            local.retain(|(_, sink)| sink.send(FloatEvent::Update(max_float)).is_ok());
            if local.is_empty() {
                sinks.remove(&sender);
            }
        }
        tracing::debug!(%sender, ?max_float, "max float update received");
    }

    fn remove_sink(&self, sender: Address, id: u64) {
        let mut sinks = self.sinks.lock();
        if let Some(local) = sinks.get_mut(&sender) {
            local.retain(|(sink_id, _)| *sink_id != id);
            if local.is_empty() {
                sinks.remove(&sender);
            }
        }
    }

    fn evict_stale(&self, now: Instant) -> usize {
        let evicted = self.cache.evict_stale(now, self.config.liveness_window());
        for sender in &evicted {
            self.sender_store.clear(*sender);
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "evicted idle senders from balance cache");
        }
        evicted.len()
    }
}

/// Builder validating everything the proxy needs before it exists
pub struct ProxyBuilder {
    config: ProxyConfig,
    sender_info: Option<Arc<dyn SenderInfoSource>>,
    rounds: Option<Arc<dyn RoundSource>>,
    sender_store: Option<Arc<dyn SenderStateStore>>,
}

impl ProxyBuilder {
    /// Start from a configuration
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            sender_info: None,
            rounds: None,
            sender_store: None,
        }
    }

    /// Local source of sender deposit state
    pub fn sender_info(mut self, source: Arc<dyn SenderInfoSource>) -> Self {
        self.sender_info = Some(source);
        self
    }

    /// Source of round progress
    pub fn rounds(mut self, rounds: Arc<dyn RoundSource>) -> Self {
        self.rounds = Some(rounds);
        self
    }

    /// Store cleared for every evicted sender
    pub fn sender_store(mut self, store: Arc<dyn SenderStateStore>) -> Self {
        self.sender_store = Some(store);
        self
    }

    /// Validate and construct the proxy without touching the network
    pub fn build(self) -> RelayResult<RedemptionProxy> {
        self.config.validate()?;
        let sender_info = self
            .sender_info
            .ok_or_else(|| RelayError::config("must provide a sender info source"))?;
        let rounds = self
            .rounds
            .ok_or_else(|| RelayError::config("must provide a round source"))?;
        let sender_store = self
            .sender_store
            .ok_or_else(|| RelayError::config("must provide a sender state store"))?;

        Ok(RedemptionProxy {
            inner: Arc::new(ProxyInner {
                rpc: RelayRpcClient::new(&self.config),
                cache: BalanceCache::new(),
                sinks: Mutex::new(HashMap::new()),
                next_sink_id: AtomicU64::new(1),
                sender_info,
                rounds,
                sender_store,
                tasks: TaskRegistry::new(),
                started: AtomicBool::new(false),
                stream_connected: AtomicBool::new(false),
                config: self.config,
            }),
        })
    }

    /// Construct the proxy and check the relay is reachable.
    ///
    /// An unreachable relay is fatal.
    pub async fn connect(self) -> RelayResult<RedemptionProxy> {
        let proxy = self.build()?;
        proxy.inner.rpc.probe().await?;
        tracing::info!(relay = %proxy.inner.rpc.addr(), "connected to ticket relay");
        Ok(proxy)
    }
}

/// Client half of the ticket redemption relay
#[derive(Clone)]
pub struct RedemptionProxy {
    inner: Arc<ProxyInner>,
}

impl std::fmt::Debug for RedemptionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedemptionProxy")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl RedemptionProxy {
    /// Builder for a proxy
    pub fn builder(config: ProxyConfig) -> ProxyBuilder {
        ProxyBuilder::new(config)
    }

    /// Proxy configuration
    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// Start the receive loop and the cleanup sweep. Later calls are no-ops.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.tasks.spawn(run_receive_loop(
            Arc::downgrade(&self.inner),
            self.inner.rpc.clone(),
            self.inner.config.reconnect.clone(),
            self.inner.tasks.signal(),
        ));

        let inner = Arc::downgrade(&self.inner);
        self.inner
            .tasks
            .spawn_interval_until(self.inner.config.cleanup_interval(), move || {
                let inner = inner.clone();
                async move {
                    let Some(inner) = inner.upgrade() else {
                        return false;
                    };
                    inner.evict_stale(Instant::now());
                    true
                }
            });
        tracing::info!(relay = %self.inner.rpc.addr(), "redemption proxy started");
    }

    /// Stop background work and end every local subscription.
    ///
    /// Later calls are no-ops.
    pub fn stop(&self) {
        if self.inner.tasks.shutdown() {
            self.inner.stream_connected.store(false, Ordering::SeqCst);
            self.inner.sinks.lock().clear();
            tracing::info!("redemption proxy stopped");
        }
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.tasks.is_shut_down()
    }

    /// Run one cache sweep at `now`; returns the number of evicted senders
    pub fn evict_stale(&self, now: Instant) -> usize {
        self.inner.evict_stale(now)
    }

    /// Point-in-time counters
    pub fn status(&self) -> ProxyStatus {
        ProxyStatus {
            cached_senders: self.inner.cache.len(),
            local_subscribers: self.inner.sinks.lock().values().map(Vec::len).sum(),
            stream_connected: self.inner.stream_connected.load(Ordering::SeqCst),
            stopped: self.is_stopped(),
        }
    }
}

#[async_trait]
impl SenderMonitor for RedemptionProxy {
    async fn queue_ticket(&self, ticket: SignedTicket) -> RelayResult<()> {
        let sender = ticket.sender;
        self.inner.rpc.queue_ticket(&ticket).await?;
        tracing::debug!(%sender, "ticket forwarded to relay");
        Ok(())
    }

    async fn max_float(&self, sender: Address) -> RelayResult<U256> {
        if let Some(cached) = self.inner.cache.get(sender, Instant::now()) {
            return Ok(cached);
        }
        // Only the update stream writes the cache
        let remote = self.inner.rpc.max_float(sender).await?;
        Ok(remote.unwrap_or(U256::ZERO))
    }

    async fn validate_sender(&self, sender: Address) -> RelayResult<()> {
        let info = self
            .inner
            .sender_info
            .sender_info(sender)
            .await
            .map_err(|e| {
                RelayError::delegated(format!(
                    "could not get sender info for {sender}: {}",
                    e.message()
                ))
            })?;

        let next_round = self
            .inner
            .rounds
            .last_initialized_round()
            .saturating_add(U256::from(1u64));
        if !info.withdraw_round.is_zero() && info.withdraw_round <= next_round {
            return Err(RelayError::delegated(format!(
                "deposit and reserve for sender {sender} is set to unlock soon"
            )));
        }
        Ok(())
    }

    fn subscribe_max_float(&self, sender: Address) -> FloatSubscription {
        let (sink, subscription) = FloatSubscription::channel();
        if self.is_stopped() {
            // Dropping the sink ends the subscription right away
            return subscription;
        }

        let id = self.inner.next_sink_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .sinks
            .lock()
            .entry(sender)
            .or_default()
            .push((id, sink));

        let inner = Arc::downgrade(&self.inner);
        subscription.with_cancel(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove_sink(sender, id);
            }
        })
    }
}

async fn run_receive_loop(
    inner: Weak<ProxyInner>,
    rpc: RelayRpcClient,
    reconnect: ReconnectConfig,
    mut shutdown: ShutdownSignal,
) {
    let mut attempt: u32 = 0;
    loop {
        let opened = tokio::select! {
            _ = shutdown.fired() => return,
            opened = rpc.open_monitor_stream() => opened,
        };

        match opened {
            Ok(mut stream) => {
                attempt = 0;
                set_connected(&inner, true);
                tracing::info!(relay = %rpc.addr(), "max float stream opened");

                loop {
                    let next = tokio::select! {
                        _ = shutdown.fired() => return,
                        next = stream.next() => next,
                    };
                    match next {
                        Ok(Some(update)) => {
                            let Some(inner) = inner.upgrade() else {
                                return;
                            };
                            inner.apply_update(update);
                        }
                        Ok(None) => {
                            tracing::info!("max float stream ended by relay");
                            break;
                        }
                        Err(e @ (RelayError::Serialization { .. } | RelayError::Delegated { .. })) => {
                            tracing::warn!(error = %e, "max float stream error");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "max float stream failed");
                            break;
                        }
                    }
                }
                set_connected(&inner, false);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "unable to open max float stream");
            }
        }

        let delay = reconnect.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = shutdown.fired() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn set_connected(inner: &Weak<ProxyInner>, connected: bool) {
    if let Some(inner) = inner.upgrade() {
        inner.stream_connected.store(connected, Ordering::SeqCst);
    }
}

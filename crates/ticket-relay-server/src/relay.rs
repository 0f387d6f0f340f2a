//! Redemption relay
//!
//! Accepts tickets on behalf of many issuing nodes, hands them to the Float
//! Authority, and keeps every stream subscriber informed of max float
//! changes for every sender that has recently queued a ticket.
//!
//! ## Lifecycle of a sender
//!
//! 1. The first ticket from a sender creates its liveness entry and spawns
//!    one monitor task subscribed to the Float Authority for that sender.
//! 2. Further tickets only refresh the entry.
//! 3. The periodic sweep evicts senders idle for longer than the liveness
//!    window; eviction fires the monitor's own stop signal.
//! 4. A monitor whose subscription closes releases its entry, so the next
//!    ticket starts a new one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    Address, FloatEvent, MaxFloatUpdate, RelayConfig, RelayError, RelayResult, SenderMonitor,
    ShutdownSignal, SignedTicket, TaskRegistry, U256,
};
use tokio::time::Instant;

use crate::liveness::{LivenessTracker, MonitorLease, Touch};
use crate::registry::FanoutRegistry;

/// Why delivering an update to a stream failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamSendError {
    /// The peer is gone; the subscription must be dropped
    #[error("stream closed by peer")]
    Closed,
    /// Any other failure; the update is lost but the stream stays up
    #[error("stream send failed: {0}")]
    Failed(String),
}

/// Outbound half of a `MonitorMaxFloat` call, independent of transport
#[async_trait]
pub trait UpdateStream: Send {
    /// Deliver one update to the peer
    async fn send(&mut self, update: MaxFloatUpdate) -> Result<(), StreamSendError>;

    /// Resolve once the transport reports the call is over
    async fn closed(&mut self);
}

/// How a `MonitorMaxFloat` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The relay is shutting down
    Shutdown,
    /// The transport ended the call
    Disconnected,
    /// Sending failed because the peer is gone
    PeerGone,
    /// The peer fell a full mailbox behind and was dropped
    Stalled,
}

/// Point-in-time counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    /// Senders currently tracked for liveness
    pub live_senders: usize,
    /// Sender monitor tasks currently running
    pub active_monitors: usize,
    /// Registered stream subscribers
    pub subscribers: usize,
    /// Whether `stop` has been called
    pub stopped: bool,
}

struct RelayInner {
    config: RelayConfig,
    authority: Arc<dyn SenderMonitor>,
    liveness: LivenessTracker,
    registry: FanoutRegistry,
    tasks: TaskRegistry,
    active_monitors: AtomicUsize,
}

/// Builder validating everything the relay needs before it exists
pub struct RelayBuilder {
    config: RelayConfig,
    authority: Option<Arc<dyn SenderMonitor>>,
}

impl RelayBuilder {
    /// Start from a configuration
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            authority: None,
        }
    }

    /// Float Authority that owns ticket submission and balances
    pub fn float_authority(mut self, authority: Arc<dyn SenderMonitor>) -> Self {
        self.authority = Some(authority);
        self
    }

    /// Validate and construct the relay
    pub fn build(self) -> RelayResult<RedemptionRelay> {
        self.config.validate()?;
        let authority = self
            .authority
            .ok_or_else(|| RelayError::config("must provide a Float Authority"))?;

        Ok(RedemptionRelay {
            inner: Arc::new(RelayInner {
                liveness: LivenessTracker::new(self.config.liveness_window()),
                registry: FanoutRegistry::new(self.config.subscriber_buffer),
                tasks: TaskRegistry::new(),
                active_monitors: AtomicUsize::new(0),
                authority,
                config: self.config,
            }),
        })
    }
}

/// Server half of the ticket redemption relay
#[derive(Clone)]
pub struct RedemptionRelay {
    inner: Arc<RelayInner>,
}

impl RedemptionRelay {
    /// Builder for a relay
    pub fn builder(config: RelayConfig) -> RelayBuilder {
        RelayBuilder::new(config)
    }

    /// Relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Start the periodic liveness sweep
    pub fn start(&self) {
        let inner = Arc::downgrade(&self.inner);
        self.inner
            .tasks
            .spawn_interval_until(self.inner.config.cleanup_interval(), move || {
                let inner = inner.clone();
                async move {
                    let Some(inner) = inner.upgrade() else {
                        return false;
                    };
                    let evicted = inner.liveness.sweep(Instant::now());
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "evicted idle senders");
                    }
                    true
                }
            });
        tracing::info!(recipient = %self.inner.config.recipient, "redemption relay started");
    }

    /// Signal shutdown to the sweep, every monitor, and every stream.
    ///
    /// Later calls are no-ops.
    pub fn stop(&self) {
        if self.inner.tasks.shutdown() {
            self.inner.liveness.clear();
            tracing::info!("redemption relay stopped");
        }
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.inner.tasks.is_shut_down()
    }

    /// Observer of the relay's shutdown
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.inner.tasks.signal()
    }

    /// Run one liveness sweep at `now`; returns the number of evicted senders
    pub fn sweep_liveness(&self, now: Instant) -> usize {
        self.inner.liveness.sweep(now).len()
    }

    /// Hand a ticket to the Float Authority and make sure its sender is
    /// monitored
    pub async fn queue_ticket(&self, ticket: SignedTicket) -> RelayResult<()> {
        if self.is_stopped() {
            return Err(RelayError::Shutdown);
        }

        let sender = ticket.sender;
        self.inner.authority.queue_ticket(ticket).await?;
        tracing::info!(%sender, "ticket queued");

        match self.inner.liveness.touch(sender, Instant::now()) {
            Touch::Started(lease) => self.spawn_monitor(lease),
            Touch::Refreshed => {}
        }
        Ok(())
    }

    /// Current max float for a sender, straight from the Float Authority
    pub async fn max_float(&self, sender: Address) -> RelayResult<U256> {
        self.inner
            .authority
            .max_float(sender)
            .await
            .map_err(|e| RelayError::delegated(format!("max float error: {}", e.message())))
    }

    /// Relay every broadcast update to `stream` until the relay stops, the
    /// transport ends the call, or the peer disappears.
    ///
    /// `peer` identifies the subscriber; a peer that subscribes again while
    /// its mailbox is alive shares it.
    pub async fn monitor_max_float<S>(&self, peer: &str, stream: &mut S) -> StreamEnd
    where
        S: UpdateStream + ?Sized,
    {
        let (mailbox, created) = self.inner.registry.subscribe(peer);
        if created {
            tracing::info!(subscriber = %peer, "new MonitorMaxFloat subscriber");
        }

        let mut shutdown = self.inner.tasks.signal();
        let end = loop {
            tokio::select! {
                _ = shutdown.fired() => break StreamEnd::Shutdown,
                _ = stream.closed() => break StreamEnd::Disconnected,
                update = mailbox.recv() => {
                    let Some(update) = update else {
                        break StreamEnd::Stalled;
                    };
                    match stream.send(update).await {
                        Ok(()) => {}
                        Err(StreamSendError::Closed) => break StreamEnd::PeerGone,
                        Err(StreamSendError::Failed(reason)) => {
                            tracing::error!(
                                subscriber = %peer,
                                error = %reason,
                                "unable to send max float update to client"
                            );
                        }
                    }
                }
            }
        };

        if end != StreamEnd::Shutdown {
            self.inner.registry.unsubscribe(peer);
            tracing::info!(subscriber = %peer, ?end, "MonitorMaxFloat subscriber left");
        }
        end
    }

    /// Point-in-time counters
    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            live_senders: self.inner.liveness.len(),
            active_monitors: self.inner.active_monitors.load(Ordering::SeqCst),
            subscribers: self.inner.registry.len(),
            stopped: self.is_stopped(),
        }
    }

    fn spawn_monitor(&self, lease: MonitorLease) {
        let guard = MonitorGuard::new(self.inner.clone());
        self.inner.tasks.spawn(async move {
            run_sender_monitor(&guard.0, lease).await;
        });
    }
}

/// Counts a running monitor; decrements even when the task is aborted
struct MonitorGuard(Arc<RelayInner>);

impl MonitorGuard {
    fn new(inner: Arc<RelayInner>) -> Self {
        inner.active_monitors.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.0.active_monitors.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_sender_monitor(inner: &RelayInner, lease: MonitorLease) {
    let MonitorLease {
        sender,
        generation,
        mut stop,
    } = lease;
    let mut subscription = inner.authority.subscribe_max_float(sender);
    let mut shutdown = inner.tasks.signal();
    tracing::debug!(%sender, "max float monitor started");

    loop {
        tokio::select! {
            _ = shutdown.fired() => break,
            _ = stop.fired() => {
                tracing::debug!(%sender, "sender evicted, stopping max float monitor");
                break;
            }
            event = subscription.recv() => {
                match event {
                    Some(FloatEvent::Update(max_float)) => {
                        let delivered = inner.registry.broadcast(MaxFloatUpdate { sender, max_float });
                        tracing::debug!(%sender, delivered, "broadcast max float update");
                    }
                    Some(FloatEvent::Error(reason)) => {
                        tracing::warn!(%sender, error = %reason, "max float subscription error");
                    }
                    None => {
                        tracing::warn!(%sender, "max float subscription closed");
                        inner.liveness.release(sender, generation);
                        break;
                    }
                }
            }
        }
    }
}

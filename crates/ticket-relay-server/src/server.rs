//! TCP front end for the redemption relay

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::rpc::{read_frame, write_frame};
use relay_core::wire::{address_from_bytes, encode_max_float, ticket_from_wire, update_to_wire};
use relay_core::wire::{MaxFloatValue, QueueTicketAck};
use relay_core::{
    MaxFloatUpdate, RelayError, RelayRequest, RelayResponse, RelayResult, RpcReply, RpcStatus,
    TaskRegistry,
};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::relay::{RedemptionRelay, StreamSendError, UpdateStream};

/// Serves the relay's RPC surface on a TCP listener
pub struct RelayServer {
    relay: RedemptionRelay,
    listener: TcpListener,
    connections: TaskRegistry,
}

impl RelayServer {
    /// Bind a listener for `relay`. A bind failure is fatal.
    pub async fn bind(relay: RedemptionRelay, addr: impl ToSocketAddrs) -> RelayResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::transport(format!("failed to bind relay listener: {e}")))?;
        Ok(Self::from_listener(relay, listener))
    }

    /// Serve on an already bound listener
    pub fn from_listener(relay: RedemptionRelay, listener: TcpListener) -> Self {
        Self {
            relay,
            listener,
            connections: TaskRegistry::new(),
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The relay being served
    pub fn relay(&self) -> &RedemptionRelay {
        &self.relay
    }

    /// Start the relay's background work and accept connections until the
    /// relay is stopped
    pub async fn serve(self) -> RelayResult<()> {
        self.relay.start();
        let addr = self.local_addr()?;
        tracing::info!(%addr, "relay listening");

        let mut shutdown = self.relay.shutdown_signal();
        loop {
            tokio::select! {
                _ = shutdown.fired() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let relay = self.relay.clone();
                            self.connections.spawn(async move {
                                if let Err(e) = handle_connection(relay, stream, peer).await {
                                    tracing::warn!(%peer, error = %e, "relay connection failed");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept relay connection");
                        }
                    }
                }
            }
        }

        self.connections.shutdown();
        tracing::info!(%addr, "relay listener closed");
        Ok(())
    }
}

async fn handle_connection(
    relay: RedemptionRelay,
    stream: TcpStream,
    peer: SocketAddr,
) -> RelayResult<()> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    let max_frame_size = relay.config().max_frame_size;
    let (mut reader, mut writer) = stream.into_split();

    let request: RelayRequest = match read_frame(&mut reader, max_frame_size).await {
        Ok(Some(request)) => request,
        // Connectivity probe
        Ok(None) => return Ok(()),
        Err(e @ RelayError::Serialization { .. }) => {
            let reply: RpcReply = Err(RpcStatus::invalid_request(e.message()));
            return write_frame(&mut writer, &reply, max_frame_size).await;
        }
        Err(e) => return Err(e),
    };
    tracing::debug!(%peer, method = request.method(), "relay request");

    let reply: RpcReply = match request {
        RelayRequest::QueueTicket(wire) => relay
            .queue_ticket(ticket_from_wire(&wire))
            .await
            .map(|()| RelayResponse::TicketQueued(QueueTicketAck {}))
            .map_err(RpcStatus::from),
        RelayRequest::MaxFloat(req) => relay
            .max_float(address_from_bytes(&req.sender))
            .await
            .map(|max_float| {
                RelayResponse::MaxFloat(MaxFloatValue {
                    sender: req.sender.clone(),
                    max_float: encode_max_float(Some(max_float)),
                })
            })
            .map_err(RpcStatus::from),
        RelayRequest::MonitorMaxFloat(_) => {
            let mut stream = TcpUpdateStream {
                reader,
                writer,
                max_frame_size,
                write_timeout: relay.config().stream_write_timeout(),
            };
            relay
                .monitor_max_float(&peer.to_string(), &mut stream)
                .await;
            return Ok(());
        }
    };

    write_frame(&mut writer, &reply, max_frame_size).await
}

/// Streams updates as reply frames; the read half only watches for close
struct TcpUpdateStream {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    max_frame_size: usize,
    write_timeout: Duration,
}

#[async_trait]
impl UpdateStream for TcpUpdateStream {
    async fn send(&mut self, update: MaxFloatUpdate) -> Result<(), StreamSendError> {
        let reply: RpcReply = Ok(RelayResponse::Update(update_to_wire(&update)));
        let write = write_frame(&mut self.writer, &reply, self.max_frame_size);
        let Ok(written) = tokio::time::timeout(self.write_timeout, write).await else {
            // Expiry means the peer stopped reading
            tracing::warn!("max float stream write timed out");
            return Err(StreamSendError::Closed);
        };
        match written {
            Ok(()) => Ok(()),
            Err(RelayError::Transport { message }) => {
                // Frame writes surface io errors as transport errors; any of
                // them on a stream socket means the peer is unusable.
                tracing::debug!(error = %message, "max float stream write failed");
                Err(StreamSendError::Closed)
            }
            Err(e) => Err(StreamSendError::Failed(e.to_string())),
        }
    }

    async fn closed(&mut self) {
        // Subscribers never send after the request; EOF or an error means
        // the peer has gone away.
        let mut buf = [0u8; 64];
        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "max float stream read failed");
                    return;
                }
            }
        }
    }
}

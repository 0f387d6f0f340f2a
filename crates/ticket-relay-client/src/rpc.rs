//! Wire client for the relay's RPC surface
//!
//! Every call opens its own TCP connection. Unary calls are bounded by the
//! call timeout end to end; the update stream is bounded only while
//! connecting.

use std::time::Duration;

use relay_core::rpc::{read_frame, write_frame};
use relay_core::wire::{
    decode_max_float, ticket_to_wire, update_from_wire, MaxFloatRequest, MonitorMaxFloatRequest,
};
use relay_core::{
    Address, MaxFloatUpdate, ProxyConfig, RelayError, RelayRequest, RelayResponse, RelayResult,
    RpcReply, SignedTicket, U256,
};
use tokio::net::TcpStream;

/// Connection settings for one relay
#[derive(Debug, Clone)]
pub struct RelayRpcClient {
    addr: String,
    connect_timeout: Duration,
    call_timeout: Duration,
    max_frame_size: usize,
}

impl RelayRpcClient {
    /// Client for the relay named in `config`
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            addr: config.relay_addr.clone(),
            connect_timeout: config.connect_timeout(),
            call_timeout: config.call_timeout(),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Relay address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> RelayResult<TcpStream> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(relay = %self.addr, error = %e, "failed to set TCP_NODELAY");
                }
                Ok(stream)
            }
            Ok(Err(e)) => Err(RelayError::transport(format!(
                "failed to connect to relay at {}: {e}",
                self.addr
            ))),
            Err(_) => Err(RelayError::timeout(format!("connect to {}", self.addr))),
        }
    }

    /// Check the relay accepts connections
    pub async fn probe(&self) -> RelayResult<()> {
        let stream = self.connect().await?;
        drop(stream);
        Ok(())
    }

    async fn call(&self, request: RelayRequest) -> RelayResult<RelayResponse> {
        let method = request.method();
        let exchange = async {
            let mut stream = self.connect().await?;
            write_frame(&mut stream, &request, self.max_frame_size).await?;
            let reply: Option<RpcReply> = read_frame(&mut stream, self.max_frame_size).await?;
            match reply {
                Some(reply) => reply.map_err(RelayError::from),
                None => Err(RelayError::transport(format!(
                    "relay closed the connection during {method}"
                ))),
            }
        };

        tokio::time::timeout(self.call_timeout, exchange)
            .await
            .map_err(|_| RelayError::timeout(method))?
    }

    /// Hand a ticket to the relay
    pub async fn queue_ticket(&self, ticket: &SignedTicket) -> RelayResult<()> {
        match self
            .call(RelayRequest::QueueTicket(ticket_to_wire(ticket)))
            .await?
        {
            RelayResponse::TicketQueued(_) => Ok(()),
            other => Err(unexpected("QueueTicket", &other)),
        }
    }

    /// Ask the relay for a sender's max float; `None` when it reported no value
    pub async fn max_float(&self, sender: Address) -> RelayResult<Option<U256>> {
        let request = RelayRequest::MaxFloat(MaxFloatRequest {
            sender: sender.to_vec(),
        });
        match self.call(request).await? {
            RelayResponse::MaxFloat(value) => Ok(decode_max_float(&value.max_float)),
            other => Err(unexpected("MaxFloat", &other)),
        }
    }

    /// Open the long-lived update stream
    pub async fn open_monitor_stream(&self) -> RelayResult<MonitorStream> {
        let mut stream = self.connect().await?;
        let request = RelayRequest::MonitorMaxFloat(MonitorMaxFloatRequest {});
        write_frame(&mut stream, &request, self.max_frame_size).await?;
        Ok(MonitorStream {
            stream,
            max_frame_size: self.max_frame_size,
        })
    }
}

fn unexpected(method: &str, response: &RelayResponse) -> RelayError {
    RelayError::protocol(format!("unexpected reply to {method}: {response:?}"))
}

/// Receiving side of a `MonitorMaxFloat` call
#[derive(Debug)]
pub struct MonitorStream {
    stream: TcpStream,
    max_frame_size: usize,
}

impl MonitorStream {
    /// Next streamed update; `None` once the relay ends the stream.
    ///
    /// A frame that fails to decode yields a serialization error and leaves
    /// the stream positioned at the next frame.
    pub async fn next(&mut self) -> RelayResult<Option<MaxFloatUpdate>> {
        let reply: Option<RpcReply> = read_frame(&mut self.stream, self.max_frame_size).await?;
        match reply {
            None => Ok(None),
            Some(Ok(RelayResponse::Update(value))) => Ok(Some(update_from_wire(&value))),
            Some(Ok(other)) => Err(unexpected("MonitorMaxFloat", &other)),
            Some(Err(status)) => Err(status.into()),
        }
    }
}

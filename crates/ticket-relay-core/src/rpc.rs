//! RPC envelope and length-prefixed framing
//!
//! One TCP connection carries one RPC. The caller writes a single
//! [`RelayRequest`] frame. Unary calls are answered with exactly one
//! [`RpcReply`] frame; `MonitorMaxFloat` is answered with an unbounded
//! sequence of [`RelayResponse::Update`] frames.
//!
//! Frame layout:
//! - 4 bytes: payload length (u32, big endian)
//! - payload: bincode-encoded message

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{RelayError, RelayResult};
use crate::wire::{
    MaxFloatRequest, MaxFloatValue, MonitorMaxFloatRequest, QueueTicketAck, TicketWire,
};

/// Default upper bound on a single frame payload
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1MB

/// Calls a client can make against the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayRequest {
    /// Unary: hand a ticket to the Float Authority
    QueueTicket(TicketWire),
    /// Unary: point query for a sender's max float
    MaxFloat(MaxFloatRequest),
    /// Server streaming: every max float change for every sender
    MonitorMaxFloat(MonitorMaxFloatRequest),
}

impl RelayRequest {
    /// Method name used in logs and timeout errors
    pub fn method(&self) -> &'static str {
        match self {
            Self::QueueTicket(_) => "QueueTicket",
            Self::MaxFloat(_) => "MaxFloat",
            Self::MonitorMaxFloat(_) => "MonitorMaxFloat",
        }
    }
}

/// Successful replies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayResponse {
    /// Reply to `QueueTicket`
    TicketQueued(QueueTicketAck),
    /// Reply to `MaxFloat`
    MaxFloat(MaxFloatValue),
    /// One streamed update on a `MonitorMaxFloat` call
    Update(MaxFloatValue),
}

/// Status codes carried by failed replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// Any collaborator or service failure
    Internal,
    /// The request could not be understood
    InvalidRequest,
}

/// Failure reply; the message is the underlying error text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcStatus {
    /// Status code
    pub code: StatusCode,
    /// Human-readable message
    pub message: String,
}

impl RpcStatus {
    /// Internal error status
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Internal,
            message: message.into(),
        }
    }

    /// Invalid request status
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::InvalidRequest,
            message: message.into(),
        }
    }
}

impl From<RelayError> for RpcStatus {
    fn from(err: RelayError) -> Self {
        Self::internal(err.message())
    }
}

impl From<RpcStatus> for RelayError {
    fn from(status: RpcStatus) -> Self {
        match status.code {
            StatusCode::Internal => RelayError::delegated(status.message),
            StatusCode::InvalidRequest => RelayError::protocol(status.message),
        }
    }
}

/// What travels back to the caller
pub type RpcReply = Result<RelayResponse, RpcStatus>;

/// Write one length-prefixed frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_frame_size: usize) -> RelayResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message)?;
    if payload.len() > max_frame_size {
        return Err(RelayError::protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            payload.len(),
            max_frame_size
        )));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| RelayError::protocol("frame length does not fit in u32"))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before a
/// new frame started.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> RelayResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    let first = reader.read(&mut len_bytes).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < len_bytes.len() {
        reader.read_exact(&mut len_bytes[first..]).await?;
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_frame_size {
        return Err(RelayError::protocol(format!(
            "frame of {len} bytes exceeds limit of {max_frame_size} bytes"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(bincode::deserialize(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_frames_survive_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let request = RelayRequest::MaxFloat(MaxFloatRequest {
            sender: vec![1u8; 20],
        });

        write_frame(&mut client, &request, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        let received: Option<RelayRequest> = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert_eq!(received, Some(request));
    }

    #[tokio::test]
    async fn test_clean_close_reads_as_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let received: Option<RelayRequest> = read_frame(&mut server, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frames_are_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let reply: RpcReply = Ok(RelayResponse::Update(MaxFloatValue {
            sender: vec![0u8; 20],
            max_float: vec![0u8; 256],
        }));

        let err = write_frame(&mut client, &reply, 16).await.unwrap_err();
        assert_matches!(err, RelayError::Protocol { .. });

        // A peer that ignores the limit is caught on the read side
        write_frame(&mut client, &reply, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        let err = read_frame::<_, RpcReply>(&mut server, 16).await.unwrap_err();
        assert_matches!(err, RelayError::Protocol { .. });
    }

    #[test]
    fn test_status_maps_to_delegated_error() {
        let err: RelayError = RpcStatus::internal("max float error: unknown sender").into();
        assert_eq!(
            err,
            RelayError::delegated("max float error: unknown sender")
        );

        let status: RpcStatus = RelayError::delegated("bad ticket").into();
        assert_eq!(status, RpcStatus::internal("bad ticket"));
    }
}

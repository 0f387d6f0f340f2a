#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]
//! Proxy against a loopback relay

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use relay_client::RedemptionProxy;
use relay_core::rpc::{read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE};
use relay_core::wire::update_to_wire;
use relay_core::{
    FloatEvent, MaxFloatUpdate, ProxyConfig, RelayError, RelayRequest, RelayResponse, RpcReply,
    RpcStatus, SenderInfo, SenderMonitor, U256,
};
use relay_testkit::{
    address, connect_proxy, eventually, init_tracing, sample_ticket, spawn_relay,
    FixedRounds, MemoryFloatAuthority, RecordingStateStore, StaticSenderInfo,
};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(2);

fn proxy_builder(config: ProxyConfig) -> relay_client::ProxyBuilder {
    RedemptionProxy::builder(config)
        .sender_info(Arc::new(StaticSenderInfo::new()))
        .rounds(Arc::new(FixedRounds::new(1)))
        .sender_store(Arc::new(RecordingStateStore::new()))
}

#[tokio::test]
async fn test_streamed_balance_reaches_subscriber_and_query_falls_back() {
    init_tracing();
    let authority = Arc::new(MemoryFloatAuthority::new());
    let harness = spawn_relay(authority.clone()).await;

    let (streaming, _doubles) = connect_proxy(harness.proxy_config()).await;
    assert!(eventually(WAIT, || harness.relay.status().subscribers == 1).await);
    let querying = proxy_builder(harness.proxy_config()).connect().await.unwrap();

    let sender = address(1);
    let mut local = streaming.subscribe_max_float(sender);
    let ticket = sample_ticket(sender, 1000);
    streaming.queue_ticket(ticket.clone()).await.unwrap();
    assert_eq!(authority.queued_tickets(), vec![ticket]);
    assert!(eventually(WAIT, || authority.active_subscriptions() == 1).await);

    // Face value 1000 at 50% win probability
    authority.set_max_float(sender, Some(U256::from(500u64)));
    assert_eq!(
        local.recv().await,
        Some(FloatEvent::Update(Some(U256::from(500u64))))
    );

    // Served from the cache, no query reaches the authority
    for _ in 0..3 {
        assert_eq!(streaming.max_float(sender).await.unwrap(), U256::from(500u64));
    }
    assert_eq!(authority.max_float_calls(), 0);

    // Never streamed to, so it asks the relay
    assert_eq!(querying.max_float(sender).await.unwrap(), U256::from(500u64));
    assert_eq!(authority.max_float_calls(), 1);

    streaming.stop();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_idle_sender_is_evicted_and_cleared_once() {
    init_tracing();
    let authority = Arc::new(MemoryFloatAuthority::new());
    let harness = spawn_relay(authority.clone()).await;
    // 200ms liveness window, sweep every 50ms
    let (proxy, doubles) = connect_proxy(harness.proxy_config()).await;
    assert!(eventually(WAIT, || proxy.status().stream_connected).await);
    assert!(eventually(WAIT, || harness.relay.status().subscribers == 1).await);

    let sender = address(2);
    proxy.queue_ticket(sample_ticket(sender, 1000)).await.unwrap();
    assert!(eventually(WAIT, || authority.active_subscriptions() == 1).await);
    authority.set_max_float(sender, Some(U256::from(700u64)));
    assert!(eventually(WAIT, || proxy.status().cached_senders == 1).await);

    assert!(eventually(WAIT, || doubles.store.clear_count(&sender) == 1).await);
    assert_eq!(proxy.status().cached_senders, 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(doubles.store.cleared(), vec![sender]);

    proxy.stop();
    harness.shutdown().await;
}

/// Accept the next connection and check it opens the update stream
async fn accept_monitor(listener: &TcpListener) -> TcpStream {
    let (mut socket, _) = listener.accept().await.unwrap();
    let request: RelayRequest = read_frame(&mut socket, DEFAULT_MAX_FRAME_SIZE)
        .await
        .unwrap()
        .unwrap();
    assert_matches!(request, RelayRequest::MonitorMaxFloat(_));
    socket
}

#[tokio::test]
async fn test_stream_recovers_from_drop_and_bad_frames() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ProxyConfig::for_testing(listener.local_addr().unwrap().to_string());
    let sender = address(6);

    let relay = tokio::spawn(async move {
        drop(accept_monitor(&listener).await);

        let mut socket = accept_monitor(&listener).await;
        let failed: RpcReply = Err(RpcStatus::internal("relay hiccup"));
        write_frame(&mut socket, &failed, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        socket.write_all(&3u32.to_be_bytes()).await.unwrap();
        socket.write_all(&[0xff, 0xff, 0xff]).await.unwrap();
        let update: RpcReply = Ok(RelayResponse::Update(update_to_wire(&MaxFloatUpdate::new(
            sender,
            U256::from(42u64),
        ))));
        write_frame(&mut socket, &update, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        std::future::pending::<()>().await;
    });

    let proxy = proxy_builder(config).build().unwrap();
    let mut local = proxy.subscribe_max_float(sender);
    proxy.start();

    assert_eq!(
        local.recv().await,
        Some(FloatEvent::Update(Some(U256::from(42u64))))
    );
    assert_eq!(proxy.max_float(sender).await.unwrap(), U256::from(42u64));
    assert!(proxy.status().stream_connected);

    proxy.stop();
    relay.abort();
}

#[tokio::test]
async fn test_stream_connected_tracks_reconnects() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = ProxyConfig::for_testing(listener.local_addr().unwrap().to_string());
    config.reconnect.base_delay_ms = 300;
    config.reconnect.max_delay_ms = 600;
    let (hang_up, hung_up) = oneshot::channel::<()>();

    let relay = tokio::spawn(async move {
        let first = accept_monitor(&listener).await;
        hung_up.await.unwrap();
        drop(first);
        let _second = accept_monitor(&listener).await;
        std::future::pending::<()>().await;
    });

    let proxy = proxy_builder(config).build().unwrap();
    assert!(!proxy.status().stream_connected);
    proxy.start();
    assert!(eventually(WAIT, || proxy.status().stream_connected).await);

    hang_up.send(()).unwrap();
    assert!(eventually(WAIT, || !proxy.status().stream_connected).await);
    assert!(eventually(WAIT, || proxy.status().stream_connected).await);

    proxy.stop();
    assert!(!proxy.status().stream_connected);
    relay.abort();
}

#[tokio::test]
async fn test_relay_rejection_is_delegated() {
    let authority = Arc::new(MemoryFloatAuthority::new());
    authority.reject_tickets(Some("ticket is expired".to_string()));
    let harness = spawn_relay(authority).await;
    let proxy = proxy_builder(harness.proxy_config()).connect().await.unwrap();

    let err = proxy
        .queue_ticket(sample_ticket(address(3), 1000))
        .await
        .unwrap_err();
    assert_eq!(err, RelayError::delegated("ticket is expired"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_validate_sender_uses_local_state() {
    let harness = spawn_relay(Arc::new(MemoryFloatAuthority::new())).await;
    let (proxy, doubles) = connect_proxy(harness.proxy_config()).await;
    let sender = address(4);

    let err = proxy.validate_sender(sender).await.unwrap_err();
    assert_eq!(
        err,
        RelayError::delegated(format!("could not get sender info for {sender}: unknown sender"))
    );

    doubles.sender_info.set(
        sender,
        SenderInfo {
            deposit: U256::from(1_000u64),
            withdraw_round: U256::from(10u64),
        },
    );
    doubles.rounds.set(8);
    proxy.validate_sender(sender).await.unwrap();

    doubles.rounds.set(9);
    assert_eq!(
        proxy.validate_sender(sender).await.unwrap_err(),
        RelayError::delegated(format!(
            "deposit and reserve for sender {sender} is set to unlock soon"
        ))
    );

    proxy.stop();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_silent_relay_hits_call_timeout() {
    // Accepts connections but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = ProxyConfig::for_testing(listener.local_addr().unwrap().to_string());
    config.call_timeout_ms = 100;
    let proxy = proxy_builder(config).build().unwrap();

    let err = proxy
        .queue_ticket(sample_ticket(address(5), 1000))
        .await
        .unwrap_err();
    assert_eq!(err, RelayError::timeout("QueueTicket"));
    assert!(err.is_retryable());
    drop(listener);
}

#[tokio::test]
async fn test_unreachable_relay_is_fatal_at_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = proxy_builder(ProxyConfig::for_testing(addr.to_string()))
        .connect()
        .await;
    assert_matches!(result, Err(RelayError::Transport { .. } | RelayError::Timeout { .. }));
}

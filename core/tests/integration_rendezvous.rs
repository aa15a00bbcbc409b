// Integration test: rendezvous server behaviour seen from raw clients

use dropway_core::conn::{read_expect, write_msg, FrameConn, WsClientConn};
use dropway_core::protocol::{RendezvousMessage, RendezvousMessageType as Rv};
use dropway_core::version::{ensure_compatible, fetch_rendezvous_version};
use dropway_core::{
    ClientConfig, EventSink, Password, Receiver, RendezvousConfig, RendezvousServer, Sender,
    TransferError, TransferEvent, Version,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

fn start(config: RendezvousConfig) -> (RendezvousServer, SocketAddr, oneshot::Sender<()>) {
    let server = RendezvousServer::with_config(config);
    let (tx, rx) = oneshot::channel::<()>();
    let (addr, run) = server
        .bind(([127, 0, 0, 1], 0).into(), async {
            let _ = rx.await;
        })
        .expect("bind rendezvous");
    tokio::spawn(run);
    (server, addr, tx)
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_ping() {
    let (_server, addr, _stop) = start(RendezvousConfig::default());
    let response = http_get(addr, "/ping").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with("pong"), "{response}");
}

#[tokio::test]
async fn test_version_endpoint() {
    let (_server, addr, _stop) = start(RendezvousConfig::default());
    let version = fetch_rendezvous_version(&addr.to_string(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(version, Version::current());
}

#[tokio::test]
async fn test_version_negotiation() {
    let (_server, addr, _stop) = start(RendezvousConfig::default());
    let addr = addr.to_string();
    let current = Version::current();

    let skewed = Version::new(current.major, current.minor + 7, current.patch + 3);
    ensure_compatible(&addr, skewed, Duration::from_secs(5))
        .await
        .unwrap();

    let next_major = Version::new(current.major + 1, 0, 0);
    let err = ensure_compatible(&addr, next_major, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::VersionMismatch { .. }), "{err:?}");

    let mut config = ClientConfig::new(addr);
    config.version = Some(next_major);
    let err = Sender::new(config)
        .send(&b"never sent"[..], 10)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::VersionMismatch { .. }), "{err:?}");
}

#[tokio::test]
async fn test_receiver_for_unknown_mailbox() {
    let (_server, addr, _stop) = start(RendezvousConfig::default());
    let receiver = Receiver::new(ClientConfig::new(addr.to_string()));
    let mut sink = Vec::new();
    let err = receiver
        .receive("9-nobody-here-today", &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::NoSuchMailbox), "{err:?}");
}

#[tokio::test]
async fn test_receiver_wait_timeout() {
    let (server, addr, _stop) = start(RendezvousConfig {
        receiver_timeout: Duration::from_millis(300),
        ..RendezvousConfig::default()
    });

    let (events, mut rx) = EventSink::channel();
    let sender = Sender::new(ClientConfig::new(addr.to_string())).with_events(events);
    let started = std::time::Instant::now();
    let err = sender.send(&b"lonely"[..], 6).await.unwrap_err();

    assert!(matches!(err, TransferError::ReceiverTimeout), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(matches!(rx.try_recv(), Ok(TransferEvent::Password(_))));

    assert!(wait_until(|| server.mailboxes().is_empty()).await);
    assert!(wait_until(|| server.ids().is_empty()).await);
}

#[tokio::test]
async fn test_second_receiver_is_rejected() {
    let (server, addr, _stop) = start(RendezvousConfig::default());
    let config = ClientConfig::new(addr.to_string());

    // The payload source stays open so the first session cannot finish
    let (mut feed, source) = tokio::io::duplex(1024);
    let (events, mut rx) = EventSink::channel();
    let sender = Sender::new(config.clone()).with_events(events);
    let send_task = tokio::spawn(async move { sender.send(source, 5).await });

    let password = match rx.recv().await {
        Some(TransferEvent::Password(password)) => password,
        other => panic!("expected password, got {other:?}"),
    };
    let hash = Password::parse(&password).unwrap().hash();

    let mut relay = config.clone();
    relay.force_relay = true;
    let first_password = password.clone();
    let first = tokio::spawn(async move {
        let mut sink = Vec::new();
        let result = Receiver::new(relay).receive(&first_password, &mut sink).await;
        (result, sink)
    });

    assert!(
        wait_until(|| server
            .mailboxes()
            .get(&hash)
            .map(|m| m.has_receiver())
            .unwrap_or(false))
        .await
    );

    let mut sink = Vec::new();
    let err = Receiver::new(config)
        .receive(&password, &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::MailboxOccupied), "{err:?}");
    assert!(sink.is_empty());

    // The first session is unaffected
    feed.write_all(b"hello").await.unwrap();
    drop(feed);
    let (result, sink) = first.await.unwrap();
    result.unwrap();
    assert_eq!(sink, b"hello");
    send_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_binds_are_unique() {
    let (server, addr, _stop) = start(RendezvousConfig::default());
    let url = format!("ws://{}/establish-sender", addr);

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            let mut conn = WsClientConn::connect(&url).await.unwrap();
            let bind: RendezvousMessage = read_expect(&mut conn, Rv::RendezvousToSenderBind)
                .await
                .unwrap();
            (bind.id().unwrap(), conn)
        }));
    }

    let mut ids = HashSet::new();
    let mut conns = Vec::new();
    for task in tasks {
        let (id, conn) = task.await.unwrap();
        assert!(id >= 1);
        assert!(ids.insert(id), "id {id} bound twice");
        conns.push(conn);
    }
    assert_eq!(ids, (1..=20).collect::<HashSet<u64>>());

    for mut conn in conns {
        conn.close().await.unwrap();
    }
    assert!(wait_until(|| server.ids().is_empty()).await);

    // Released ids are handed out again from the bottom
    let mut conn = WsClientConn::connect(&url).await.unwrap();
    let bind: RendezvousMessage = read_expect(&mut conn, Rv::RendezvousToSenderBind)
        .await
        .unwrap();
    assert_eq!(bind.id().unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_establish_closes_only_that_endpoint() {
    let (server, addr, _stop) = start(RendezvousConfig::default());

    let mut bad = WsClientConn::connect(&format!("ws://{}/establish-sender", addr))
        .await
        .unwrap();
    let _: RendezvousMessage = read_expect(&mut bad, Rv::RendezvousToSenderBind)
        .await
        .unwrap();
    bad.write(b"{not json".to_vec()).await.unwrap();
    assert!(bad.read().await.is_err());

    let mut good = WsClientConn::connect(&format!("ws://{}/establish-sender", addr))
        .await
        .unwrap();
    let bind: RendezvousMessage = read_expect(&mut good, Rv::RendezvousToSenderBind)
        .await
        .unwrap();
    write_msg(
        &mut good,
        &RendezvousMessage::establish(Rv::SenderToRendezvousEstablish, "feedface"),
    )
    .await
    .unwrap();
    assert!(bind.id().unwrap() >= 1);
    assert!(wait_until(|| server.mailboxes().get("feedface").is_some()).await);
}

/// Drive a raw sender and receiver through establish, PAKE and salt so both
/// sockets are left in the relay.
async fn paired_in_relay(addr: SocketAddr, hash: &str) -> (WsClientConn, WsClientConn) {
    let mut sender = WsClientConn::connect(&format!("ws://{}/establish-sender", addr))
        .await
        .unwrap();
    let _: RendezvousMessage = read_expect(&mut sender, Rv::RendezvousToSenderBind)
        .await
        .unwrap();
    write_msg(
        &mut sender,
        &RendezvousMessage::establish(Rv::SenderToRendezvousEstablish, hash),
    )
    .await
    .unwrap();

    let mut receiver = WsClientConn::connect(&format!("ws://{}/establish-receiver", addr))
        .await
        .unwrap();
    write_msg(
        &mut receiver,
        &RendezvousMessage::establish(Rv::ReceiverToRendezvousEstablish, hash),
    )
    .await
    .unwrap();

    let _: RendezvousMessage = read_expect(&mut sender, Rv::RendezvousToSenderReady)
        .await
        .unwrap();
    write_msg(
        &mut sender,
        &RendezvousMessage::pake(Rv::SenderToRendezvousPake, b"pake-a".to_vec()),
    )
    .await
    .unwrap();
    let offer: RendezvousMessage = read_expect(&mut receiver, Rv::RendezvousToReceiverPake)
        .await
        .unwrap();
    assert_eq!(offer.into_pake_bytes().unwrap(), b"pake-a");
    write_msg(
        &mut receiver,
        &RendezvousMessage::pake(Rv::ReceiverToRendezvousPake, b"pake-b".to_vec()),
    )
    .await
    .unwrap();
    let reply: RendezvousMessage = read_expect(&mut sender, Rv::RendezvousToSenderPake)
        .await
        .unwrap();
    assert_eq!(reply.into_pake_bytes().unwrap(), b"pake-b");
    write_msg(
        &mut sender,
        &RendezvousMessage::salt(Rv::SenderToRendezvousSalt, vec![7u8; 8]),
    )
    .await
    .unwrap();
    let _: RendezvousMessage = read_expect(&mut receiver, Rv::RendezvousToReceiverSalt)
        .await
        .unwrap();

    (sender, receiver)
}

#[tokio::test]
async fn test_sender_disconnect_while_waiting_frees_mailbox() {
    let (server, addr, _stop) = start(RendezvousConfig::default());

    let mut conn = WsClientConn::connect(&format!("ws://{}/establish-sender", addr))
        .await
        .unwrap();
    let _: RendezvousMessage = read_expect(&mut conn, Rv::RendezvousToSenderBind)
        .await
        .unwrap();
    write_msg(
        &mut conn,
        &RendezvousMessage::establish(Rv::SenderToRendezvousEstablish, "abandoned"),
    )
    .await
    .unwrap();
    assert!(wait_until(|| server.mailboxes().get("abandoned").is_some()).await);

    // Well inside the 30 s receiver wait
    conn.close().await.unwrap();
    drop(conn);
    assert!(wait_until(|| server.mailboxes().is_empty()).await);
    assert!(wait_until(|| server.ids().is_empty()).await);
}

#[tokio::test]
async fn test_shutdown_while_waiting_is_not_a_receiver_timeout() {
    let (_server, addr, stop) = start(RendezvousConfig {
        shutdown_drain: Duration::from_millis(100),
        ..RendezvousConfig::default()
    });

    let (events, mut rx) = EventSink::channel();
    let sender = Sender::new(ClientConfig::new(addr.to_string())).with_events(events);
    let send_task = tokio::spawn(async move { sender.send(&b"pending"[..], 7).await });
    assert!(matches!(rx.recv().await, Some(TransferEvent::Password(_))));

    stop.send(()).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(5), send_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(!matches!(err, TransferError::ReceiverTimeout), "{err:?}");
    assert!(err.is_disconnect(), "{err:?}");
}

#[tokio::test]
async fn test_idle_relay_is_closed() {
    let (server, addr, _stop) = start(RendezvousConfig {
        io_timeout: Duration::from_millis(300),
        ..RendezvousConfig::default()
    });

    let (mut sender, mut receiver) = paired_in_relay(addr, "quiet").await;

    // Neither side sends anything; the rendezvous hangs up on both
    let closed = tokio::time::timeout(Duration::from_secs(3), sender.read())
        .await
        .unwrap();
    assert!(closed.is_err());
    let closed = tokio::time::timeout(Duration::from_secs(3), receiver.read())
        .await
        .unwrap();
    assert!(closed.is_err());
    assert!(wait_until(|| server.mailboxes().is_empty()).await);
}

#[tokio::test]
async fn test_one_way_stream_outlives_io_timeout() {
    let (_server, addr, _stop) = start(RendezvousConfig {
        io_timeout: Duration::from_millis(300),
        ..RendezvousConfig::default()
    });

    let (mut sender, mut receiver) = paired_in_relay(addr, "stream").await;

    // The receiver stays silent for well over io_timeout while frames flow
    let writer = tokio::spawn(async move {
        for i in 0u8..12 {
            sender.write(vec![i; 64]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        sender
    });

    for i in 0u8..12 {
        assert_eq!(receiver.read().await.unwrap(), vec![i; 64]);
    }
    let _sender = writer.await.unwrap();
}

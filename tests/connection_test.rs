//! Connection actor tests over in-memory WebSocket streams

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use shop_relay::{
    BroadcastEnvelope, ClientIdentity, Error, Hub, HubConfig, HubStats, PumpExit, ShopId,
    ShopMessage, ShopMessageWithUsername,
};

type Socket = WebSocketStream<DuplexStream>;

async fn socket_pair() -> (Socket, Socket) {
    socket_pair_with_buffer(64 * 1024).await
}

async fn socket_pair_with_buffer(buffer: usize) -> (Socket, Socket) {
    let (server_io, client_io) = tokio::io::duplex(buffer);
    tokio::join!(
        WebSocketStream::from_raw_socket(server_io, Role::Server, None),
        WebSocketStream::from_raw_socket(client_io, Role::Client, None),
    )
}

fn envelope(shop: &str, id: &str, text: &str) -> BroadcastEnvelope {
    BroadcastEnvelope::new(
        shop,
        ShopMessageWithUsername::new(
            ShopMessage {
                id: id.into(),
                shop_id: shop.into(),
                user_id: "author".into(),
                message: text.into(),
                created_at: None,
                updated_at: None,
                is_edited: Some(false),
            },
            "author-name",
        ),
    )
}

async fn next_text(client: &mut Socket) -> serde_json::Value {
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

async fn settle(hub: &Hub, done: impl Fn(&HubStats) -> bool) -> HubStats {
    for _ in 0..500 {
        let stats = hub.stats().await;
        if done(&stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("hub did not reach expected state: {:?}", hub.stats().await);
}

#[tokio::test]
async fn test_broadcast_reaches_every_shop_member_only() {
    let hub = Hub::spawn(HubConfig::default()).unwrap();

    let mut clients = Vec::new();
    for user in ["u1", "u2", "u3"] {
        let (server, client) = socket_pair().await;
        hub.attach(server, ClientIdentity::new("S1", user, user)).await;
        clients.push(client);
    }
    let (server, mut outsider) = socket_pair().await;
    hub.attach(server, ClientIdentity::new("S2", "u4", "u4")).await;

    hub.broadcast(envelope("S1", "m1", "hi"));

    for client in &mut clients {
        let value = next_text(client).await;
        assert_eq!(value["id"], "m1");
        assert_eq!(value["message"], "hi");
        assert_eq!(value["username"], "author-name");
    }

    let nothing = tokio::time::timeout(Duration::from_millis(50), outsider.next()).await;
    assert!(nothing.is_err(), "shop S2 must not receive S1 broadcasts");

    let stats = settle(&hub, |s| s.frames_enqueued == 3).await;
    assert_eq!(stats.shop_connections(&ShopId::from("S1")), 3);
    assert_eq!(stats.shop_connections(&ShopId::from("S2")), 1);
}

#[tokio::test]
async fn test_frames_arrive_in_broadcast_order() {
    let hub = Hub::spawn(HubConfig::default()).unwrap();
    let (server, mut client) = socket_pair().await;
    hub.attach(server, ClientIdentity::new("S1", "u1", "alice")).await;

    for i in 0..5 {
        hub.broadcast(envelope("S1", &format!("m{i}"), "x"));
    }

    for i in 0..5 {
        assert_eq!(next_text(&mut client).await["id"], format!("m{i}"));
    }
}

#[tokio::test]
async fn test_client_payloads_are_ignored() {
    let hub = Hub::spawn(HubConfig::default()).unwrap();
    let (server, mut client) = socket_pair().await;
    hub.attach(server, ClientIdentity::new("S1", "u1", "alice")).await;

    client.send(Message::text("hello hub")).await.unwrap();
    client.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();

    hub.broadcast(envelope("S1", "m1", "still here"));
    assert_eq!(next_text(&mut client).await["id"], "m1");

    let stats = settle(&hub, |s| s.active_connections == 1).await;
    assert_eq!(stats.active_shops, 1);
}

#[tokio::test]
async fn test_peer_close_unregisters() {
    let hub = Hub::spawn(HubConfig::default()).unwrap();
    let (server, mut client) = socket_pair().await;
    let tasks = hub.attach(server, ClientIdentity::new("S1", "u1", "alice")).await;
    settle(&hub, |s| s.active_connections == 1).await;

    client.close(None).await.unwrap();
    // Drive the client until the closing handshake finishes
    while let Some(Ok(_)) = client.next().await {}

    let (inbound, outbound) = tasks.join().await.unwrap();
    assert!(matches!(inbound, PumpExit::PeerClosed));
    assert!(outbound.is_clean());

    let stats = settle(&hub, |s| s.active_connections == 0).await;
    assert!(stats.shops.is_empty());
}

#[tokio::test]
async fn test_oversized_frame_disconnects() {
    let config = HubConfig::default().max_frame_size(1024);
    let hub = Hub::spawn(config).unwrap();

    // Transport built without a protocol-level limit, so the pump enforces it
    let (server, mut client) = socket_pair().await;
    let tasks = hub.attach(server, ClientIdentity::new("S1", "u1", "alice")).await;

    client.send(Message::text("x".repeat(2048))).await.unwrap();
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = client.next().await {} });

    let (inbound, _) = tasks.join().await.unwrap();
    assert!(matches!(
        inbound,
        PumpExit::Failed(Error::FrameTooLarge { size: 2048, max: 1024 })
    ));
    settle(&hub, |s| s.active_connections == 0).await;
    reader.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_sends_close_and_stops_pumps() {
    let hub = Hub::spawn(HubConfig::default()).unwrap();

    let mut running = Vec::new();
    for user in ["u1", "u2"] {
        let (server, client) = socket_pair().await;
        let tasks = hub.attach(server, ClientIdentity::new("S1", user, user)).await;
        running.push((tasks, client));
    }
    settle(&hub, |s| s.active_connections == 2).await;

    hub.shutdown();

    for (tasks, mut client) in running {
        match client.next().await {
            Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Away),
            other => panic!("expected close frame, got {other:?}"),
        }
        while let Some(Ok(_)) = client.next().await {}

        let (inbound, outbound) = tasks.join().await.unwrap();
        assert!(matches!(outbound, PumpExit::QueueClosed));
        assert!(inbound.is_clean());
    }

    hub.broadcast(envelope("S1", "late", "x"));
    let stats = hub.stats().await;
    assert_eq!(stats.broadcasts_accepted, 0);
    assert_eq!(stats.active_connections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_is_reaped_and_live_peer_kept() {
    let config = HubConfig::default().peer_timeout(Duration::from_secs(10));
    let hub = Hub::spawn(config).unwrap();

    // Never polled, so never answers a ping
    let (server, _silent_client) = socket_pair().await;
    let silent = hub.attach(server, ClientIdentity::new("S1", "silent", "silent")).await;

    // Reading drives tungstenite's automatic pong replies
    let (server, mut live_client) = socket_pair().await;
    hub.attach(server, ClientIdentity::new("S1", "live", "live")).await;
    let live = tokio::spawn(async move { while let Some(Ok(_)) = live_client.next().await {} });

    settle(&hub, |s| s.active_connections == 2).await;

    // Peer timeout (10s) plus one probe interval (9s)
    tokio::time::sleep(Duration::from_secs(19)).await;
    let stats = hub.stats().await;
    assert_eq!(stats.active_connections, 1);

    let (inbound, _) = silent.join().await.unwrap();
    assert!(matches!(inbound, PumpExit::Failed(Error::ReadTimeout)));

    // Several more probe rounds; the answering peer stays registered
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(hub.stats().await.active_connections, 1);

    hub.shutdown();
    hub.join().await;
    live.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stalled_writer_leaves_reaping_to_hub_and_reader() {
    let config = HubConfig::default().write_timeout(Duration::from_secs(1));
    let hub = Hub::spawn(config).unwrap();

    // Tiny pipe and a client that never reads, so the first frame cannot flush
    let (server, _stalled_client) = socket_pair_with_buffer(256).await;
    let tasks = hub.attach(server, ClientIdentity::new("S1", "u1", "alice")).await;
    settle(&hub, |s| s.active_connections == 1).await;

    for i in 0..5 {
        hub.broadcast(envelope("S1", &format!("m{i}"), &"x".repeat(300)));
    }

    // Write deadline plus the deadline on closing the half; the outbound
    // pump is done but does not unregister
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(hub.stats().await.active_connections, 1);

    // The next broadcast finds the queue receiver gone
    hub.broadcast(envelope("S1", "m5", "x"));
    settle(&hub, |s| s.active_connections == 0).await;

    // Inbound still waits out the peer timeout before ending
    let (inbound, outbound) = tasks.join().await.unwrap();
    assert!(matches!(outbound, PumpExit::Failed(Error::WriteTimeout)));
    assert!(matches!(inbound, PumpExit::Failed(Error::ReadTimeout)));
}

//! Integration tests for the connection state machine driven through the
//! public network API.
//!
//! Each test wires a [`LoopbackTransport`] into a [`NetworkManager`], injects
//! the status changes a real server would cause, and observes the events that
//! reach the bus.  Every return to `Disconnected` shuts the loopback session
//! down, so tests that end that way need no explicit `close`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brick_client::application::events::{ConnectEvent, DisconnectEvent, EventBus};
use brick_client::infrastructure::network::loopback::LoopbackTransport;
use brick_client::infrastructure::network::{
    AlwaysApprove, ConnectionState, DeliveryMethod, DispatchLoop, NetworkError, NetworkManager,
    TransportError, TransportStatus,
};
use brick_core::protocol::codec::encode_message;
use brick_core::protocol::messages::{
    ChatMessage, Decoded, InitMessage, Message, MessageContext, PublicKeyMessage, Version,
};
use tokio::task::JoinHandle;
use brick_core::RoomSummary;
use uuid::Uuid;

fn server() -> SocketAddr {
    "127.0.0.1:14242".parse().unwrap()
}

fn auth() -> SocketAddr {
    "127.0.0.1:14241".parse().unwrap()
}

fn setup() -> (
    Arc<LoopbackTransport>,
    Arc<EventBus>,
    NetworkManager<LoopbackTransport>,
    DispatchLoop<LoopbackTransport>,
) {
    let transport = Arc::new(LoopbackTransport::new());
    let bus = Arc::new(EventBus::new());
    let (net, dispatch) = NetworkManager::with_auth_endpoint(
        Arc::clone(&transport),
        Arc::clone(&bus),
        auth(),
        Box::new(AlwaysApprove),
    )
    .expect("fresh transport must start");
    (transport, bus, net, dispatch)
}

fn handshake() -> InitMessage {
    InitMessage {
        version: Version::new(1, 2, 3, 4),
        server_name: "Integration".to_string(),
        description: "lifecycle test server".to_string(),
        intro: "hi".to_string(),
        online: 2,
        rooms: vec![RoomSummary {
            uuid: Uuid::new_v4(),
            name: "Spawn".to_string(),
            description: String::new(),
            online: 2,
            plays: 10,
            rating: 5.0,
        }],
    }
}

fn record_connects(bus: &EventBus) -> Arc<Mutex<Vec<InitMessage>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    bus.network
        .game
        .connect
        .add_handler(move |e: &ConnectEvent| seen_clone.lock().unwrap().push(e.handshake.clone()));
    seen
}

fn record_disconnects(bus: &EventBus) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    bus.network
        .game
        .disconnect
        .add_handler(move |e: &DisconnectEvent| seen_clone.lock().unwrap().push(e.reason.clone()));
    seen
}

async fn finished(task: JoinHandle<()>) {
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("dispatch loop must stop once the session ends")
        .expect("dispatch task panicked");
}

async fn wait_for_state(net: &NetworkManager<LoopbackTransport>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while net.state() != want {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state never became {want:?}"));
}

#[tokio::test]
async fn test_full_handshake_publishes_one_connect_with_server_info() {
    // Arrange
    let (transport, bus, net, dispatch) = setup();
    let connects = record_connects(&bus);
    let hail = Message::PublicKey(PublicKeyMessage {
        username: "pyratron".to_string(),
        uid: Uuid::new_v4(),
        public_key: vec![7; 32],
    });

    // Act
    net.connect_with_hail(server(), &hail).unwrap();
    transport.inject_status(TransportStatus::RespondedAwaitingApproval, "", None);
    transport.inject_status(
        TransportStatus::Connected,
        "",
        Some(encode_message(&Message::Init(handshake())).unwrap()),
    );
    transport.close();
    dispatch.run().await;

    // Assert
    let connects = connects.lock().unwrap();
    assert_eq!(connects.len(), 1, "exactly one connect event");
    assert_eq!(connects[0].version, Version::new(1, 2, 3, 4));
    assert_eq!(connects[0].rooms.len(), 1);
    assert_eq!(net.state(), ConnectionState::Connected);
    assert_eq!(transport.approvals(), 1);
    assert_eq!(transport.connects()[0].hail, Some(encode_message(&hail).unwrap()));
}

#[tokio::test]
async fn test_connect_without_approval_step_is_accepted() {
    let (transport, bus, net, dispatch) = setup();
    let connects = record_connects(&bus);

    net.connect(server()).unwrap();
    transport.inject_status(
        TransportStatus::Connected,
        "",
        Some(encode_message(&Message::Init(handshake())).unwrap()),
    );
    transport.close();
    dispatch.run().await;

    assert_eq!(connects.lock().unwrap().len(), 1);
    assert_eq!(transport.approvals(), 0);
}

#[tokio::test]
async fn test_manual_disconnect_publishes_once_and_is_idempotent() {
    // Arrange – connected session.
    let (transport, bus, net, dispatch) = setup();
    let disconnects = record_disconnects(&bus);
    net.connect(server()).unwrap();
    transport.inject_status(
        TransportStatus::Connected,
        "",
        Some(encode_message(&Message::Init(handshake())).unwrap()),
    );
    transport.close();
    dispatch.run().await;
    assert_eq!(net.state(), ConnectionState::Connected);

    // Act
    net.disconnect("manual");
    net.disconnect("manual");

    // Assert
    assert_eq!(*disconnects.lock().unwrap(), vec!["manual".to_string()]);
    assert_eq!(net.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_game_events_after_disconnect_returns() {
    // Arrange – live dispatch task, and a "server" that never stops chatting.
    let (transport, bus, net, dispatch) = setup();
    let chats = Arc::new(Mutex::new(Vec::new()));
    let chats_clone = Arc::clone(&chats);
    bus.network
        .game
        .chat
        .add_handler(move |m: &Decoded<ChatMessage>| chats_clone.lock().unwrap().push(m.message.clone()));
    let task = dispatch.spawn();

    net.connect(server()).unwrap();
    transport.inject_status(
        TransportStatus::Connected,
        "",
        Some(encode_message(&Message::Init(handshake())).unwrap()),
    );
    wait_for_state(&net, ConnectionState::Connected).await;

    let chatter = encode_message(&Message::Chat(ChatMessage {
        sender: Some(1),
        message: "still here".to_string(),
    }))
    .unwrap();
    let injector = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            while transport.inject_data(&chatter) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };
    tokio::time::timeout(Duration::from_secs(2), async {
        while chats.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("chat never arrived while connected");

    // Act
    net.disconnect("manual");
    let seen_at_disconnect = chats.lock().unwrap().len();

    // Assert – the loop ends by itself and nothing was published afterwards.
    finished(task).await;
    injector.await.unwrap();
    assert_eq!(chats.lock().unwrap().len(), seen_at_disconnect);
    assert_eq!(transport.recycled(), transport.injected());
}

#[tokio::test]
async fn test_remote_disconnect_reason_reaches_subscribers() {
    let (transport, bus, net, dispatch) = setup();
    let disconnects = record_disconnects(&bus);
    net.connect(server()).unwrap();
    transport.inject_status(
        TransportStatus::Connected,
        "",
        Some(encode_message(&Message::Init(handshake())).unwrap()),
    );
    transport.inject_status(TransportStatus::Disconnected, "Kicked by moderator.", None);
    transport.close();
    dispatch.run().await;

    assert_eq!(*disconnects.lock().unwrap(), vec!["Kicked by moderator.".to_string()]);
    assert_eq!(net.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_failed_connection_attempt_reports_generic_reason() {
    let (transport, bus, net, dispatch) = setup();
    let disconnects = record_disconnects(&bus);
    net.connect(server()).unwrap();
    transport.inject_status(TransportStatus::None, "", None);
    transport.close();
    dispatch.run().await;

    assert_eq!(
        *disconnects.lock().unwrap(),
        vec!["Error connecting to the server.".to_string()]
    );
}

#[tokio::test]
async fn test_garbage_handshake_disconnects_transport() {
    let (transport, bus, net, dispatch) = setup();
    let connects = record_connects(&bus);
    let disconnects = record_disconnects(&bus);
    net.connect(server()).unwrap();
    transport.inject_status(TransportStatus::Connected, "", Some(vec![5, 0xFF]));
    transport.close();
    dispatch.run().await;

    assert!(connects.lock().unwrap().is_empty());
    assert_eq!(*disconnects.lock().unwrap(), vec!["Invalid handshake.".to_string()]);
    assert_eq!(transport.shutdowns(), vec!["Invalid handshake.".to_string()]);
    assert_eq!(net.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_send_only_succeeds_while_connected() {
    // Arrange
    let (transport, _bus, net, dispatch) = setup();
    let chat = Message::Chat(ChatMessage {
        sender: None,
        message: "hello".to_string(),
    });

    // Act / Assert – before the handshake.
    net.connect(server()).unwrap();
    assert!(matches!(net.send(&chat), Err(NetworkError::NotConnected)));

    transport.inject_status(
        TransportStatus::Connected,
        "",
        Some(encode_message(&Message::Init(handshake())).unwrap()),
    );
    transport.close();
    dispatch.run().await;

    // After the handshake.
    tokio_test::assert_ok!(net.send_with(&chat, DeliveryMethod::ReliableOrdered));
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, DeliveryMethod::ReliableOrdered);
    let decoded = brick_core::decode_message(&sent[0].payload, MessageContext::Server).unwrap();
    assert_eq!(decoded.message(), &chat);
}

#[tokio::test]
async fn test_dispatch_loop_completes_after_disconnect() {
    // Arrange
    let (transport, bus, net, dispatch) = setup();
    let task = dispatch.spawn();
    net.connect(server()).unwrap();

    // Act
    net.disconnect("retry");

    // Assert – the session is over; reconnecting takes a new manager.
    finished(task).await;
    assert!(matches!(
        net.connect(server()),
        Err(NetworkError::Transport(TransportError::NotStarted))
    ));
    let (fresh, fresh_dispatch) = NetworkManager::with_auth_endpoint(
        Arc::clone(&transport),
        bus,
        auth(),
        Box::new(AlwaysApprove),
    )
    .expect("a shut-down transport can start a new session");
    let fresh_task = fresh_dispatch.spawn();
    tokio_test::assert_ok!(fresh.connect(server()));
    assert_eq!(fresh.state(), ConnectionState::Connecting);
    fresh.disconnect("done");
    finished(fresh_task).await;
}

#[tokio::test]
async fn test_dispatch_loop_completes_after_remote_disconnect() {
    // Arrange
    let (transport, bus, net, dispatch) = setup();
    let disconnects = record_disconnects(&bus);
    let task = dispatch.spawn();
    net.connect(server()).unwrap();

    // Act – no `close`: the transition itself must end the session.
    transport.inject_status(
        TransportStatus::Connected,
        "",
        Some(encode_message(&Message::Init(handshake())).unwrap()),
    );
    transport.inject_status(TransportStatus::Disconnected, "Server restarting.", None);

    // Assert
    finished(task).await;
    assert_eq!(*disconnects.lock().unwrap(), vec!["Server restarting.".to_string()]);
    assert_eq!(transport.shutdowns(), vec!["Server restarting.".to_string()]);
}

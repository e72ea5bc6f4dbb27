//! Integration tests for PeerNode request/response, broadcast and serving.
//!
//! Most tests run several nodes on one in-process `MemoryNetwork`; the last
//! one goes over real TCP sockets on localhost.

use async_trait::async_trait;
use peerlink_types::config::RetryConfig;
use peerlink_wire::frame::{read_frame, write_frame};
use peerlink_wire::{
    Endpoint, Keypair, Message, MessageHandler, MessageHeader, MemoryNetwork, MemoryTransport,
    NodeConfig, PeerId, PeerNode, PeerRegistry, Responder, TcpTransport, Transport, WireError,
    INTERNAL_ERROR_CODE,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Test handler
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Behaviour {
    /// Reply "ok:<body>".
    Succeed,
    /// Answer status 500 with message "boom".
    Fail,
    /// Hold the request and never answer.
    Stall,
}

struct ScriptedHandler {
    behaviour: Behaviour,
    received: Mutex<Vec<Message>>,
}

impl ScriptedHandler {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            received: Mutex::new(Vec::new()),
        })
    }

    fn received(&self) -> Vec<Message> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle_message(&self, message: Message, responder: Responder) {
        let body = message.body.clone();
        self.received.lock().unwrap().push(message);
        match self.behaviour {
            Behaviour::Succeed => {
                let mut reply = b"ok:".to_vec();
                reply.extend_from_slice(&body);
                let _ = responder.reply(reply).await;
            }
            Behaviour::Fail => {
                let _ = responder.error(INTERNAL_ERROR_CODE, "boom").await;
            }
            Behaviour::Stall => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(responder);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn test_config() -> NodeConfig {
    NodeConfig {
        retry: RetryConfig {
            backoff_ms: 10,
            max_attempts: Some(3),
            max_elapsed_secs: None,
        },
        broadcast_concurrency: 4,
        request_timeout: TIMEOUT,
    }
}

/// A node on `network` plus its concrete transport (for dial counts and raw
/// streams) and its listen address.
fn spawn_node(network: &MemoryNetwork, name: &str) -> (PeerNode, Arc<MemoryTransport>, String) {
    let transport = Arc::new(network.bind(name, PeerId::new(name)).unwrap());
    let address = transport.listen_address();
    let node = PeerNode::new(transport.clone(), PeerRegistry::new(), test_config());
    (node, transport, address)
}

// ---------------------------------------------------------------------------
// Request/response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_success_and_remote_error_statuses() {
    let network = MemoryNetwork::new();
    let (good, _, good_addr) = spawn_node(&network, "good");
    let (bad, _, bad_addr) = spawn_node(&network, "bad");
    let (client, _, _) = spawn_node(&network, "client");

    let _g = good.serve(ScriptedHandler::new(Behaviour::Succeed));
    let _b = bad.serve(ScriptedHandler::new(Behaviour::Fail));

    let good_id = client.connect(&good_addr).await.unwrap();
    let bad_id = client.connect(&bad_addr).await.unwrap();

    let response = client
        .send_request("sess-200", &good_id, Message::request("hello"), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(response.body, b"ok:hello");
    assert_eq!(response.header.status, 0);
    assert_eq!(response.header.session, "sess-200");

    match client
        .send_request("sess-500", &bad_id, Message::request("hello"), TIMEOUT)
        .await
    {
        Err(WireError::Remote { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("Expected Remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_send_overwrites_caller_header_fields() {
    let network = MemoryNetwork::new();
    let (server, _, server_addr) = spawn_node(&network, "server");
    let (client, _, _) = spawn_node(&network, "client");
    let handler = ScriptedHandler::new(Behaviour::Succeed);
    let _s = server.serve(handler.clone());
    let peer = client.connect(&server_addr).await.unwrap();

    let mut message = Message::request("abc");
    message.header.size = 999;
    message.header.status = 42;
    message.header.error_message = "stale".to_string();
    message.header.session = "ignored".to_string();

    client
        .send_request("real", &peer, message, TIMEOUT)
        .await
        .unwrap();

    let seen = handler.received();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].header.size, 3);
    assert_eq!(seen[0].header.status, 0);
    assert_eq!(seen[0].header.error_message, "");
    assert_eq!(seen[0].header.session, "real");
    assert!(!seen[0].header.is_broadcast);
}

#[tokio::test]
async fn test_unknown_peer_fails_without_dialing() {
    let network = MemoryNetwork::new();
    let (client, transport, _) = spawn_node(&network, "client");

    let result = client
        .send_request(
            "s",
            &PeerId::new("nobody"),
            Message::request("x"),
            TIMEOUT,
        )
        .await;

    assert!(matches!(result, Err(WireError::PeerNotFound(ref p)) if p.as_str() == "nobody"));
    assert_eq!(transport.dial_count(), 0);
}

#[tokio::test]
async fn test_unresponsive_peer_times_out() {
    let network = MemoryNetwork::new();
    let (server, _, server_addr) = spawn_node(&network, "server");
    let (client, _, _) = spawn_node(&network, "client");
    let _s = server.serve(ScriptedHandler::new(Behaviour::Stall));
    let peer = client.connect(&server_addr).await.unwrap();

    let started = tokio::time::Instant::now();
    let result = client
        .send_request("s", &peer, Message::request("x"), Duration::from_millis(100))
        .await;

    assert!(matches!(result, Err(WireError::Timeout(d)) if d == Duration::from_millis(100)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_peer_gone_after_connect_is_an_error() {
    let network = MemoryNetwork::new();
    let (server, server_transport, server_addr) = spawn_node(&network, "server");
    let (client, _, _) = spawn_node(&network, "client");
    let peer = client.connect(&server_addr).await.unwrap();

    drop(server);
    drop(server_transport);

    let result = client
        .send_request("s", &peer, Message::request("x"), TIMEOUT)
        .await;
    assert!(matches!(result, Err(WireError::Connection(_))));
}

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_broadcast_attempts_every_peer_and_reports_failures() {
    let network = MemoryNetwork::new();
    let (client, _, _) = spawn_node(&network, "client");

    let mut handlers = Vec::new();
    let mut servers = Vec::new();
    for (name, behaviour) in [
        ("p1", Behaviour::Succeed),
        ("p2", Behaviour::Fail),
        ("p3", Behaviour::Succeed),
        ("p4", Behaviour::Fail),
    ] {
        let (node, transport, address) = spawn_node(&network, name);
        let handler = ScriptedHandler::new(behaviour);
        let serving = node.serve(handler.clone());
        client.connect(&address).await.unwrap();
        handlers.push(handler);
        servers.push((node, transport, serving));
    }

    let err = client
        .broadcast("b-1", Message::request("news"), TIMEOUT)
        .await
        .unwrap_err();

    match err {
        WireError::Broadcast { failures } => {
            let failed: Vec<&str> = failures.iter().map(|(p, _)| p.as_str()).collect();
            assert_eq!(failed, vec!["p2", "p4"]);
            for (_, cause) in &failures {
                assert!(matches!(cause, WireError::Remote { status: 500, .. }));
            }
        }
        other => panic!("Expected Broadcast error, got {other:?}"),
    }

    for handler in &handlers {
        let seen = handler.received();
        assert_eq!(seen.len(), 1, "every peer must be attempted");
        assert!(seen[0].header.is_broadcast);
        assert_eq!(seen[0].header.session, "b-1");
        assert_eq!(seen[0].body, b"news");
    }
}

#[tokio::test]
async fn test_sequential_broadcast_succeeds() {
    let network = MemoryNetwork::new();
    let transport = Arc::new(network.bind("client", PeerId::new("client")).unwrap());
    let config = NodeConfig {
        broadcast_concurrency: 1,
        ..test_config()
    };
    let client = PeerNode::new(transport, PeerRegistry::new(), config);

    let mut keep = Vec::new();
    let mut handlers = Vec::new();
    for name in ["a", "b", "c"] {
        let (node, transport, address) = spawn_node(&network, name);
        let handler = ScriptedHandler::new(Behaviour::Succeed);
        let serving = node.serve(handler.clone());
        client.connect(&address).await.unwrap();
        keep.push((node, transport, serving));
        handlers.push(handler);
    }

    client
        .broadcast("seq", Message::request("hi"), TIMEOUT)
        .await
        .unwrap();
    assert!(handlers.iter().all(|h| h.received().len() == 1));
}

#[tokio::test]
async fn test_sequential_broadcast_continues_past_failures() {
    let network = MemoryNetwork::new();
    let transport = Arc::new(network.bind("client", PeerId::new("client")).unwrap());
    let config = NodeConfig {
        broadcast_concurrency: 1,
        ..test_config()
    };
    let client = PeerNode::new(transport, PeerRegistry::new(), config);

    let mut keep = Vec::new();
    let mut handlers = Vec::new();
    for (name, behaviour) in [
        ("a", Behaviour::Fail),
        ("b", Behaviour::Succeed),
        ("c", Behaviour::Fail),
        ("d", Behaviour::Succeed),
    ] {
        let (node, transport, address) = spawn_node(&network, name);
        let handler = ScriptedHandler::new(behaviour);
        let serving = node.serve(handler.clone());
        client.connect(&address).await.unwrap();
        keep.push((node, transport, serving));
        handlers.push(handler);
    }

    let err = client
        .broadcast("seq-fail", Message::request("hi"), TIMEOUT)
        .await
        .unwrap_err();

    match err {
        WireError::Broadcast { failures } => {
            let failed: Vec<&str> = failures.iter().map(|(p, _)| p.as_str()).collect();
            assert_eq!(failed, vec!["a", "c"]);
            for (_, cause) in &failures {
                assert!(matches!(cause, WireError::Remote { status: 500, .. }));
            }
        }
        other => panic!("Expected Broadcast error, got {other:?}"),
    }
    for handler in &handlers {
        assert_eq!(handler.received().len(), 1, "every peer must be attempted");
    }
}

#[tokio::test]
async fn test_broadcast_unreachable_peer_is_reported() {
    let network = MemoryNetwork::new();
    let (client, _, _) = spawn_node(&network, "client");
    let (live, _live_transport, live_addr) = spawn_node(&network, "live");
    let _serving = live.serve(ScriptedHandler::new(Behaviour::Succeed));
    let (gone, gone_transport, gone_addr) = spawn_node(&network, "gone");

    client.connect(&live_addr).await.unwrap();
    client.connect(&gone_addr).await.unwrap();
    drop(gone);
    drop(gone_transport);

    let err = client
        .broadcast("s", Message::request("x"), TIMEOUT)
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("Failed to broadcast message to 1 peers"));
    assert!(text.contains("gone"));
}

// ---------------------------------------------------------------------------
// Inbound failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_truncated_request_gets_error_response() {
    let network = MemoryNetwork::new();
    let (server, server_transport, _) = spawn_node(&network, "server");
    let handler = ScriptedHandler::new(Behaviour::Succeed);
    let _s = server.serve(handler.clone());

    let (_client, client_transport, _) = spawn_node(&network, "client");
    client_transport.add_route(&PeerId::new("server"), &[server_transport.endpoint()]);
    let mut stream = client_transport.dial(&PeerId::new("server")).await.unwrap();

    // Header promises 100 bytes; only 4 arrive before the writer closes.
    let mut header = MessageHeader::request();
    header.session = "short".to_string();
    header.size = 100;
    let json = serde_json::to_vec(&header).unwrap();
    stream.write_all(&(json.len() as u32).to_be_bytes()).await.unwrap();
    stream.write_all(&json).await.unwrap();
    stream.write_all(b"only").await.unwrap();
    stream.shutdown().await.unwrap();

    let response = tokio::time::timeout(TIMEOUT, read_frame(&mut stream))
        .await
        .expect("server must not hang on a short body")
        .unwrap();
    assert_eq!(response.header.status, INTERNAL_ERROR_CODE);
    assert_eq!(response.header.session, "short");
    assert!(!response.header.error_message.is_empty());
    assert!(handler.received().is_empty());
}

#[tokio::test]
async fn test_server_survives_bad_stream() {
    let network = MemoryNetwork::new();
    let (server, server_transport, server_addr) = spawn_node(&network, "server");
    let _s = server.serve(ScriptedHandler::new(Behaviour::Succeed));
    let (client, client_transport, _) = spawn_node(&network, "client");

    // A garbage frame first.
    client_transport.add_route(&PeerId::new("server"), &[server_transport.endpoint()]);
    let mut raw = client_transport.dial(&PeerId::new("server")).await.unwrap();
    raw.write_all(&3u32.to_be_bytes()).await.unwrap();
    raw.write_all(b"???").await.unwrap();
    let response = read_frame(&mut raw).await.unwrap();
    assert_eq!(response.header.status, INTERNAL_ERROR_CODE);

    // Then a well-formed exchange on a new stream.
    let peer = client.connect(&server_addr).await.unwrap();
    let response = client
        .send_request("after", &peer, Message::request("x"), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(response.body, b"ok:x");
}

#[tokio::test]
async fn test_response_frame_sent_as_request_is_rejected() {
    let network = MemoryNetwork::new();
    let (server, server_transport, _) = spawn_node(&network, "server");
    let _s = server.serve(ScriptedHandler::new(Behaviour::Succeed));
    let (_client, client_transport, _) = spawn_node(&network, "client");
    client_transport.add_route(&PeerId::new("server"), &[server_transport.endpoint()]);

    let mut raw = client_transport.dial(&PeerId::new("server")).await.unwrap();
    let header = MessageHeader::response("x", 0, "");
    write_frame(&mut raw, &header, &[]).await.unwrap();

    let response = read_frame(&mut raw).await.unwrap();
    assert_eq!(response.header.status, INTERNAL_ERROR_CODE);
    assert_eq!(response.header.session, "x");
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_request_over_tcp() {
    let listen = Endpoint::parse("/ip4/127.0.0.1/tcp/0").unwrap();
    let server_transport = TcpTransport::bind(&listen, Keypair::generate(), TIMEOUT)
        .await
        .unwrap();
    let server_addr = server_transport.listen_address();
    let client_transport = TcpTransport::bind(&listen, Keypair::generate(), TIMEOUT)
        .await
        .unwrap();

    let server = PeerNode::new(
        Arc::new(server_transport),
        PeerRegistry::new(),
        test_config(),
    );
    let client = PeerNode::new(
        Arc::new(client_transport),
        PeerRegistry::new(),
        test_config(),
    );
    let _s = server.serve(ScriptedHandler::new(Behaviour::Succeed));

    let peer = client.connect(&server_addr).await.unwrap();
    assert_eq!(&peer, server.peer_id());

    let response = client
        .send_request("tcp", &peer, Message::request("over the wire"), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(response.body_lossy(), "ok:over the wire");

    client
        .broadcast("tcp-b", Message::request("all"), TIMEOUT)
        .await
        .unwrap();
}

use std::net::Ipv4Addr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use greenpact_core::{ChannelRequest, ContractId, ContractStatus};
use greenpact_realtime::{
    ChannelConfig, ChannelEvent, ChannelState, ContractChannel, RealtimeLink, ReconnectPolicy,
    ReplyTo,
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

struct MockServer {
    base_url: String,
    connections: mpsc::UnboundedReceiver<ServerConnection>,
}

struct ServerConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockServer {
    async fn start() -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, connections) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                if tx.send(ServerConnection { ws }).is_err() {
                    break;
                }
            }
        });
        Self {
            base_url: format!("ws://127.0.0.1:{port}"),
            connections,
        }
    }

    fn config(&self) -> ChannelConfig {
        ChannelConfig::contracts(&self.base_url).with_reconnect(ReconnectPolicy::disabled())
    }

    async fn accept(&mut self) -> ServerConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("client connection")
            .expect("server running")
    }
}

impl ServerConnection {
    async fn recv_json(&mut self) -> Value {
        loop {
            let frame = timeout(WAIT, self.ws.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("valid frame");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
        }
    }

    async fn send_json(&mut self, value: Value) {
        self.ws
            .send(Message::text(value.to_string()))
            .await
            .expect("send frame");
    }
}

fn record(id: &str, status: bool) -> Value {
    json!({
        "contract_id": id,
        "crop_name": "Soybean",
        "farmer_name": "Ravi",
        "buyer_name": "Harvest Co",
        "quantity": 40,
        "nego_price": 5100,
        "delivery_date": "2026-12-15",
        "delivery_address": "Indore",
        "created_at": "2026-10-10T08:00:00Z",
        "status": status,
    })
}

async fn wait_open(channel: &ContractChannel) {
    let mut state = channel.state_changes();
    timeout(WAIT, state.wait_for(|state| *state == ChannelState::Open))
        .await
        .expect("channel opens in time")
        .expect("channel alive");
}

#[tokio::test]
async fn fetches_on_connect_and_replaces_list_on_each_snapshot() {
    let mut server = MockServer::start().await;
    let channel = ContractChannel::connect(server.config(), Some("tok-1".to_string()));
    assert!(channel.is_loading());

    let mut conn = server.accept().await;
    assert_eq!(
        conn.recv_json().await,
        json!({"token": "tok-1", "action": "fetch_contracts"})
    );

    let snapshot = json!({"data": [record("a", true), record("b", false)]});
    conn.send_json(snapshot.clone()).await;

    let mut updates = channel.snapshot();
    let first = timeout(WAIT, updates.wait_for(|s| s.sequence >= 1))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(!first.loading);
    assert_eq!(first.contracts.len(), 2);
    assert_eq!(first.contracts[0].status, ContractStatus::Active);
    assert_eq!(first.contracts[1].status, ContractStatus::Pending);

    conn.send_json(snapshot).await;
    let second = timeout(WAIT, updates.wait_for(|s| s.sequence >= 2))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(second.contracts, first.contracts);

    conn.send_json(json!({"data": [record("c", false)]})).await;
    let third = timeout(WAIT, updates.wait_for(|s| s.sequence >= 3))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(third.contracts.len(), 1);
    assert_eq!(third.contracts[0].id, ContractId::from("c"));
}

#[tokio::test]
async fn without_token_the_channel_never_connects() {
    let server = MockServer::start().await;
    let channel = ContractChannel::connect(server.config(), None);

    assert_eq!(channel.state(), ChannelState::Disconnected);
    assert!(!channel.send(ChannelRequest::FetchContracts));
    assert!(!channel.handle().send(ChannelRequest::DeleteContract {
        contract_id: ContractId::from("a"),
    }));
    assert!(channel.is_loading());
    assert!(channel.contracts().is_empty());
}

#[tokio::test]
async fn send_attaches_token_while_open() {
    let mut server = MockServer::start().await;
    let channel = ContractChannel::connect(server.config(), Some("tok-2".to_string()));
    let mut conn = server.accept().await;
    conn.recv_json().await;
    wait_open(&channel).await;

    let handle = channel.handle();
    assert!(handle.send(ChannelRequest::ApproveContract {
        contract_id: ContractId::from("a"),
    }));
    assert_eq!(
        conn.recv_json().await,
        json!({"token": "tok-2", "action": "approve_contracts", "contract_id": "a"})
    );
}

#[tokio::test]
async fn malformed_snapshot_degrades_to_empty_list() {
    let mut server = MockServer::start().await;
    let channel = ContractChannel::connect(server.config(), Some("tok".to_string()));
    let mut conn = server.accept().await;
    conn.recv_json().await;

    conn.send_json(json!({"data": [record("a", true)]})).await;
    conn.send_json(json!({"data": "not a list"})).await;

    let mut updates = channel.snapshot();
    let snapshot = timeout(WAIT, updates.wait_for(|s| s.sequence >= 2))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(snapshot.contracts.is_empty());
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn stale_versioned_snapshots_are_dropped() {
    let mut server = MockServer::start().await;
    let channel = ContractChannel::connect(server.config(), Some("tok".to_string()));
    let mut conn = server.accept().await;
    conn.recv_json().await;

    conn.send_json(json!({"data": [record("a", false)], "version": 5}))
        .await;
    conn.send_json(json!({"data": [], "version": 3})).await;
    conn.send_json(json!({"data": [record("a", true)], "version": 6}))
        .await;

    let mut updates = channel.snapshot();
    let snapshot = timeout(WAIT, updates.wait_for(|s| s.version == Some(6)))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(snapshot.sequence, 2);
    assert_eq!(snapshot.contracts[0].status, ContractStatus::Active);
}

#[tokio::test]
async fn replies_are_attributed_to_requests_in_send_order() {
    let mut server = MockServer::start().await;
    let channel = ContractChannel::connect(server.config(), Some("tok".to_string()));
    let mut events = channel.subscribe();
    let mut conn = server.accept().await;
    conn.recv_json().await;
    wait_open(&channel).await;

    let handle = channel.handle();
    assert!(handle.send(ChannelRequest::ApproveContract {
        contract_id: ContractId::from("a"),
    }));
    assert!(handle.send(ChannelRequest::DeleteContract {
        contract_id: ContractId::from("b"),
    }));
    assert_eq!(conn.recv_json().await["action"], "approve_contracts");
    assert_eq!(conn.recv_json().await["action"], "delete_contract");

    conn.send_json(json!({"data": [record("a", false)]})).await;
    conn.send_json(json!({"type": "chat_message", "body": "hi"}))
        .await;
    conn.send_json(json!({"success": true})).await;
    conn.send_json(json!({"error": "Unknown action"})).await;

    let first = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(first, ChannelEvent::Snapshot { sequence: 1, .. }));
    let second = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        second,
        ChannelEvent::Acknowledged {
            reply_to: Some(ReplyTo {
                action: "approve_contracts",
                contract_id: Some(ContractId::from("a")),
            })
        }
    );
    let third = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        third,
        ChannelEvent::Rejected {
            reply_to: Some(ReplyTo {
                action: "delete_contract",
                contract_id: Some(ContractId::from("b")),
            }),
            message: "Unknown action".to_string()
        }
    );
}

#[tokio::test]
async fn replies_with_nothing_outstanding_have_no_request() {
    let mut server = MockServer::start().await;
    let channel = ContractChannel::connect(server.config(), Some("tok".to_string()));
    let mut events = channel.subscribe();
    let mut conn = server.accept().await;
    conn.recv_json().await;

    conn.send_json(json!({"error": "Authentication failed"}))
        .await;
    conn.send_json(json!({"error": "Failed to approve contract"}))
        .await;

    let first = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        first,
        ChannelEvent::Rejected {
            reply_to: Some(ReplyTo {
                action: "fetch_contracts",
                contract_id: None,
            }),
            message: "Authentication failed".to_string()
        }
    );
    let second = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        second,
        ChannelEvent::Rejected {
            reply_to: None,
            message: "Failed to approve contract".to_string()
        }
    );
    assert!(channel.is_loading());
}

#[tokio::test]
async fn close_tears_down_the_connection() {
    let mut server = MockServer::start().await;
    let mut channel = ContractChannel::connect(server.config(), Some("tok".to_string()));
    let mut conn = server.accept().await;
    conn.recv_json().await;
    wait_open(&channel).await;

    channel.close().await;
    assert_eq!(channel.state(), ChannelState::Closed);
    assert!(!channel.send(ChannelRequest::FetchContracts));

    let next = timeout(WAIT, conn.ws.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn token_change_opens_a_fresh_connection() {
    let mut server = MockServer::start().await;
    let mut channel = ContractChannel::connect(server.config(), Some("old".to_string()));
    let mut first = server.accept().await;
    assert_eq!(first.recv_json().await["token"], "old");
    first.send_json(json!({"data": [record("a", true)]})).await;
    let mut updates = channel.snapshot();
    timeout(WAIT, updates.wait_for(|s| !s.loading))
        .await
        .unwrap()
        .unwrap();

    channel.set_token(Some("new".to_string())).await;
    assert!(channel.is_loading());

    let mut second = server.accept().await;
    assert_eq!(
        second.recv_json().await,
        json!({"token": "new", "action": "fetch_contracts"})
    );
}

#[tokio::test]
async fn reconnects_and_refetches_after_server_drop() {
    let mut server = MockServer::start().await;
    let config = ChannelConfig::contracts(&server.base_url).with_reconnect(ReconnectPolicy {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(50),
        multiplier: 2,
        max_attempts: 3,
        jitter: false,
    });
    let channel = ContractChannel::connect(config, Some("tok".to_string()));

    let mut first = server.accept().await;
    first.recv_json().await;
    first.ws.close(None).await.unwrap();
    drop(first);

    let mut second = server.accept().await;
    assert_eq!(second.recv_json().await["action"], "fetch_contracts");
    wait_open(&channel).await;
}

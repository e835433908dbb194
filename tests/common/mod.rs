// Shared test peers: subject servers, a raw peer and an in-memory relay
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assessor::engine::SessionSettings;
use assessor::environment::{RecordStoreFactory, Task};
use assessor::protocol::{
    PeerStatus, RegisterPeerRequest, RegisterPeerResponse, RelayEnvelope, SubjectRequest,
};
use assessor::subject::http::{read_request, write_response};
use assessor::subject::{Conversation, SubjectAgent, SubjectServer};
use assessor::transport::{DirectTransport, SetupPolicy, Transport};
use assessor::Coordinator;
use async_trait::async_trait;
use serde_json::json;
use tokio::io::BufReader;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Order-cancellation task used across the suites
pub fn order_task() -> Task {
    Task::new("cancel-order-7", "Cancel order 7")
        .with_entry("order_7", json!("pending"))
        .with_entry("order_8", json!("shipped"))
        .expecting("order_7", json!("cancelled"))
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        turn_timeout_ms: 2_000,
        max_turns: 10,
        max_corrections: 2,
        session_retries: 0,
    }
}

pub fn fast_setup() -> SetupPolicy {
    SetupPolicy {
        poll_interval_ms: 10,
        max_poll_interval_ms: 40,
        setup_timeout_ms: 2_000,
        max_polls: 10,
        max_attempts: 2,
    }
}

/// Host `agent` on an ephemeral port; returns its base URL and the server
pub async fn spawn_subject(agent: Arc<dyn SubjectAgent>) -> (String, SubjectServer) {
    let server = SubjectServer::new(agent);
    let (addr, _handle) = server
        .clone()
        .spawn("127.0.0.1:0")
        .await
        .expect("bind subject server");
    (format!("http://{}", addr), server)
}

/// Coordinator with a single direct peer named `subject`
pub fn direct_coordinator(address: &str, settings: SessionSettings) -> Coordinator {
    let direct: Arc<dyn Transport> = Arc::new(
        DirectTransport::new(HashMap::new(), REQUEST_TIMEOUT).with_peer("subject", address),
    );
    Coordinator::new(direct, Arc::new(RecordStoreFactory), settings, fast_setup())
}

/// Never answers
pub struct SilentAgent;

#[async_trait]
impl SubjectAgent for SilentAgent {
    async fn respond(&self, _conversation: &Conversation) -> anyhow::Result<assessor::protocol::Action> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        anyhow::bail!("woke up")
    }
}

/// Peer that answers every `/turn` with whatever `reply` builds
pub async fn spawn_raw_peer<F>(reply: F) -> String
where
    F: Fn(SubjectRequest) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let reply = Arc::new(reply);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let reply = reply.clone();
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut reader = BufReader::new(reader);
                if let Ok(Some(request)) = read_request(&mut reader).await {
                    let body = match serde_json::from_str::<SubjectRequest>(&request.body) {
                        Ok(req) => (*reply)(req),
                        Err(_) => "{}".to_string(),
                    };
                    let _ = write_response(&mut writer, 200, &body).await;
                }
            });
        }
    });

    format!("http://{}", addr)
}

/// Accepts connections and never writes a byte back
pub async fn spawn_unresponsive_peer() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    format!("http://{}", addr)
}

#[derive(Debug, Clone)]
struct RelayPeer {
    token: String,
    checks: u32,
}

#[derive(Default)]
struct RelayState {
    /// peer id -> registration
    peers: HashMap<String, RelayPeer>,
    /// peer id -> subject address, for peers whose controller is up
    routes: HashMap<String, String>,
    /// Checks before a routed peer reports reachable
    ready_after: u32,
    forwarded: Vec<RelayEnvelope>,
}

/// In-memory relay speaking the relay protocol
#[derive(Clone)]
pub struct MockRelay {
    state: Arc<Mutex<RelayState>>,
    client: reqwest::Client,
    pub url: String,
}

impl MockRelay {
    pub async fn spawn(ready_after: u32) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = Self {
            state: Arc::new(Mutex::new(RelayState {
                ready_after,
                ..RelayState::default()
            })),
            client: reqwest::Client::new(),
            url: format!("http://{}", addr),
        };

        let server = relay.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let server = server.clone();
                tokio::spawn(async move {
                    let (reader, mut writer) = stream.into_split();
                    let mut reader = BufReader::new(reader);
                    if let Ok(Some(request)) = read_request(&mut reader).await {
                        let (status, body) = server
                            .route(&request.method, &request.path, &request.body)
                            .await;
                        let _ = write_response(&mut writer, status, &body).await;
                    }
                });
            }
        });

        relay
    }

    /// Make `peer_id`'s controller reachable at `address`
    pub async fn connect(&self, peer_id: &str, address: &str) {
        self.state
            .lock()
            .await
            .routes
            .insert(peer_id.to_string(), address.to_string());
    }

    pub async fn is_registered(&self, peer_id: &str) -> bool {
        self.state.lock().await.peers.contains_key(peer_id)
    }

    pub async fn checks(&self, peer_id: &str) -> u32 {
        self.state
            .lock()
            .await
            .peers
            .get(peer_id)
            .map(|p| p.checks)
            .unwrap_or(0)
    }

    pub async fn forwarded(&self) -> Vec<RelayEnvelope> {
        self.state.lock().await.forwarded.clone()
    }

    async fn route(&self, method: &str, path: &str, body: &str) -> (u16, String) {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (method, segments.as_slice()) {
            ("POST", ["peers"]) => self.register(body).await,
            ("POST", ["peers", peer_id, "check"]) => self.check(peer_id).await,
            ("GET", ["peers", peer_id]) => self.status(peer_id).await,
            ("DELETE", ["peers", peer_id]) => {
                self.state.lock().await.peers.remove(*peer_id);
                (200, "{}".to_string())
            }
            ("POST", ["forward"]) => self.forward(body).await,
            _ => (404, json!({"error": "no route"}).to_string()),
        }
    }

    async fn register(&self, body: &str) -> (u16, String) {
        let Ok(request) = serde_json::from_str::<RegisterPeerRequest>(body) else {
            return (400, "{}".to_string());
        };
        let mut state = self.state.lock().await;
        let peer = state
            .peers
            .entry(request.peer_id.clone())
            .or_insert_with(|| RelayPeer {
                token: format!("tok-{}", request.peer_id),
                checks: 0,
            });
        let response = RegisterPeerResponse {
            peer_id: request.peer_id,
            token: peer.token.clone(),
        };
        (200, serde_json::to_string(&response).unwrap())
    }

    async fn check(&self, peer_id: &str) -> (u16, String) {
        let mut state = self.state.lock().await;
        match state.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.checks += 1;
                (200, "{}".to_string())
            }
            None => (404, "{}".to_string()),
        }
    }

    async fn status(&self, peer_id: &str) -> (u16, String) {
        let state = self.state.lock().await;
        let Some(peer) = state.peers.get(peer_id) else {
            return (404, json!({"error": "unknown peer"}).to_string());
        };
        let reachable = state.routes.contains_key(peer_id) && peer.checks >= state.ready_after;
        let status = PeerStatus {
            peer_id: peer_id.to_string(),
            token: peer.token.clone(),
            reachable,
            agent_count: if reachable { 1 } else { 0 },
        };
        (200, serde_json::to_string(&status).unwrap())
    }

    async fn forward(&self, body: &str) -> (u16, String) {
        let Ok(envelope) = serde_json::from_str::<RelayEnvelope>(body) else {
            return (400, "{}".to_string());
        };

        let target = {
            let mut state = self.state.lock().await;
            state.forwarded.push(envelope.clone());
            state
                .peers
                .iter()
                .find(|(_, peer)| peer.token == envelope.token)
                .and_then(|(peer_id, _)| state.routes.get(peer_id).cloned())
        };
        let Some(address) = target else {
            return (404, json!({"error": "unknown token"}).to_string());
        };

        let response = match self
            .client
            .post(format!("{}/turn", address))
            .json(&envelope.payload)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return (502, json!({"error": e.to_string()}).to_string()),
        };
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }
}

//! HTTP server hosting a subject agent

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::json;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::agent::{Conversation, SubjectAgent};
use super::http::{read_request, write_response, HttpRequest};
use crate::protocol::{SubjectRequest, SubjectResponse};

/// Conversations untouched for this long are dropped
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

struct Tracked {
    conversation: Conversation,
    last_seen: Instant,
}

/// Serves `POST /turn` for one agent and keeps each session's history.
///
/// Histories idle for longer than the TTL are evicted when the next turn
/// arrives, so a long-running server does not grow without bound.
#[derive(Clone)]
pub struct SubjectServer {
    agent: Arc<dyn SubjectAgent>,
    conversations: Arc<RwLock<HashMap<String, Tracked>>>,
    idle_ttl: Duration,
}

impl SubjectServer {
    pub fn new(agent: Arc<dyn SubjectAgent>) -> Self {
        Self {
            agent,
            conversations: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }

    pub fn with_idle_ttl(mut self, idle_ttl: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    /// Bind `addr` and serve in the background
    pub async fn spawn(self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!("Subject server listening on {}", local);

        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                error!("Subject server stopped: {}", e);
            }
        });
        Ok((local, handle))
    }

    /// Accept connections until the listener fails
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!("Accepted connection from {}", addr);

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    warn!("Error handling connection from {}: {}", addr, e);
                }
            });
        }
    }

    /// History the server holds for a session
    pub async fn conversation(&self, session_id: &str) -> Option<Conversation> {
        self.conversations
            .read()
            .await
            .get(session_id)
            .map(|t| t.conversation.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.conversations.read().await.len()
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let Some(request) = read_request(&mut reader).await? else {
            return Ok(());
        };

        let (status, body) = self.route(request).await;
        write_response(&mut writer, status, &body).await
    }

    async fn route(&self, request: HttpRequest) -> (u16, String) {
        match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/turn") => self.handle_turn(&request.body).await,
            ("GET", "/health") => (200, json!({"status": "ok"}).to_string()),
            (method, path) => (
                404,
                json!({"error": format!("No route for {} {}", method, path)}).to_string(),
            ),
        }
    }

    async fn handle_turn(&self, body: &str) -> (u16, String) {
        let request: SubjectRequest = match serde_json::from_str(body) {
            Ok(r) => r,
            Err(e) => {
                return (
                    400,
                    json!({"error": format!("Parse error: {}", e)}).to_string(),
                )
            }
        };

        let conversation = {
            let mut conversations = self.conversations.write().await;
            let now = Instant::now();
            let before = conversations.len();
            conversations.retain(|id, t| {
                id == &request.session_id || now.duration_since(t.last_seen) < self.idle_ttl
            });
            if conversations.len() < before {
                debug!("Evicted {} idle conversation(s)", before - conversations.len());
            }

            let tracked = conversations
                .entry(request.session_id.clone())
                .or_insert_with(|| Tracked {
                    conversation: Conversation::new(request.session_id.clone()),
                    last_seen: now,
                });
            tracked.last_seen = now;
            let conversation = &mut tracked.conversation;

            if let Some(last) = conversation.last_turn() {
                if request.turn_index <= last {
                    return (
                        409,
                        json!({"error": format!(
                            "Turn {} already seen (last was {})",
                            request.turn_index, last
                        )})
                        .to_string(),
                    );
                }
            }
            conversation
                .observations
                .push((request.turn_index, request.observation));
            conversation.clone()
        };

        let action = match self.agent.respond(&conversation).await {
            Ok(action) => action,
            Err(e) => {
                error!("Agent failed on session {}: {}", request.session_id, e);
                return (500, json!({"error": e.to_string()}).to_string());
            }
        };

        debug!(
            "Session {} turn {}: answering {}",
            request.session_id, request.turn_index, action.name
        );
        let response = SubjectResponse {
            session_id: request.session_id,
            turn_index: request.turn_index,
            action,
        };
        match serde_json::to_string(&response) {
            Ok(body) => (200, body),
            Err(e) => (500, json!({"error": e.to_string()}).to_string()),
        }
    }
}

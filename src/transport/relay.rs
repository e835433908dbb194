//! Relayed transport: the subject is only reachable through a relay that
//! forwards by routing token

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::binding::{TransportBinding, TransportMode};
use super::client::PeerClient;
use super::mailbox::PendingReplies;
use super::Transport;
use crate::cancel::CancelToken;
use crate::error::TransportError;
use crate::protocol::{
    PeerStatus, RegisterPeerRequest, RegisterPeerResponse, RelayEnvelope, SubjectRequest,
    SubjectResponse,
};

/// How long and how often to wait for the relay to report a peer routable
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupPolicy {
    /// First delay between readiness polls (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Backoff ceiling between polls (milliseconds)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    /// Wall-clock budget for one resolution (milliseconds)
    #[serde(default = "default_setup_timeout_ms")]
    pub setup_timeout_ms: u64,
    /// Polls per resolution
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Resolutions the coordinator attempts before giving up on setup
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    3_000
}

fn default_max_poll_interval_ms() -> u64 {
    12_000
}

fn default_setup_timeout_ms() -> u64 {
    90_000
}

fn default_max_polls() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for SetupPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            setup_timeout_ms: default_setup_timeout_ms(),
            max_polls: default_max_polls(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl SetupPolicy {
    /// Delay before poll `attempt + 1`, doubling from the base interval
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay = self.poll_interval_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_poll_interval_ms))
    }
}

pub struct RelayTransport {
    base_url: String,
    client: PeerClient,
    policy: SetupPolicy,
    replies: PendingReplies,
}

impl RelayTransport {
    pub fn new(base_url: &str, policy: SetupPolicy, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: PeerClient::new(request_timeout),
            policy,
            replies: PendingReplies::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn peer_url(&self, peer_id: &str) -> String {
        format!("{}/peers/{}", self.base_url, peer_id)
    }

    /// Ask the relay to re-check the peer, then read the latest result.
    /// `None` means the peer is not registered yet.
    async fn poll(&self, peer_id: &str) -> Result<Option<PeerStatus>, TransportError> {
        let peer_url = self.peer_url(peer_id);

        if let Err(e) = self.client.post_empty(&format!("{}/check", peer_url)).await {
            debug!("Readiness check trigger for {} failed: {}", peer_id, e);
        }

        match self.client.get_json::<PeerStatus>(&peer_url).await {
            Ok(status) => Ok(Some(status)),
            Err(TransportError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Relayed
    }

    async fn register(&self, peer_id: &str) -> Result<(), TransportError> {
        let url = format!("{}/peers", self.base_url);
        let request = RegisterPeerRequest {
            peer_id: peer_id.to_string(),
        };
        let response: RegisterPeerResponse = self.client.post_json(&url, &request).await?;
        info!("Registered {} with relay {}", response.peer_id, self.base_url);
        Ok(())
    }

    async fn resolve(
        &self,
        peer_id: &str,
        cancel: &CancelToken,
    ) -> Result<TransportBinding, TransportError> {
        let started = Instant::now();
        let budget = Duration::from_millis(self.policy.setup_timeout_ms);
        let max_polls = self.policy.max_polls.max(1);

        for attempt in 1..=max_polls {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            // Each poll is two round trips; bound them by what is left of the budget
            let remaining = budget.saturating_sub(started.elapsed());
            let polled = tokio::select! {
                polled = tokio::time::timeout(remaining, self.poll(peer_id)) => polled,
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            };
            let Ok(polled) = polled else {
                warn!(
                    "Relay did not answer for {} within the {}ms setup budget",
                    peer_id, self.policy.setup_timeout_ms
                );
                return Err(TransportError::UnreachablePeer {
                    peer_id: peer_id.to_string(),
                    attempts: attempt,
                });
            };

            match polled {
                Ok(Some(status)) if status.is_ready() => {
                    info!(
                        "{} reachable through relay ({} agent(s))",
                        peer_id, status.agent_count
                    );
                    return Ok(TransportBinding::relayed(
                        peer_id,
                        self.base_url.clone(),
                        status.token,
                    ));
                }
                Ok(Some(status)) => debug!(
                    "{} not ready yet (reachable={}, agents={})",
                    peer_id, status.reachable, status.agent_count
                ),
                Ok(None) => debug!("{} has no forwarding path yet", peer_id),
                Err(e) => warn!("Relay poll for {} failed: {}", peer_id, e),
            }

            let delay = self.policy.backoff(attempt);
            if attempt == max_polls || started.elapsed() + delay > budget {
                return Err(TransportError::UnreachablePeer {
                    peer_id: peer_id.to_string(),
                    attempts: attempt,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            }
        }

        Err(TransportError::UnreachablePeer {
            peer_id: peer_id.to_string(),
            attempts: max_polls,
        })
    }

    async fn send(
        &self,
        binding: &TransportBinding,
        request: SubjectRequest,
    ) -> Result<(), TransportError> {
        let token = binding
            .token
            .clone()
            .ok_or_else(|| TransportError::UnknownPeer(binding.peer_id.clone()))?;
        let url = format!("{}/forward", binding.endpoint.trim_end_matches('/'));
        debug!(
            "Relaying turn {} of session {} for {}",
            request.turn_index, request.session_id, binding.peer_id
        );

        let client = self.client.clone();
        let session_id = request.session_id.clone();
        let envelope = RelayEnvelope {
            token,
            payload: request,
        };
        self.replies
            .dispatch(&session_id, async move {
                client.post_json::<_, SubjectResponse>(&url, &envelope).await
            })
            .await;
        Ok(())
    }

    async fn receive(
        &self,
        _binding: &TransportBinding,
        session_id: &str,
    ) -> Result<SubjectResponse, TransportError> {
        self.replies.take(session_id).await
    }

    async fn abandon(&self, session_id: &str) {
        self.replies.forget(session_id).await;
    }

    async fn release(&self, peer_id: &str) -> Result<(), TransportError> {
        self.client.delete(&self.peer_url(peer_id)).await?;
        info!("Released {} from relay", peer_id);
        Ok(())
    }
}

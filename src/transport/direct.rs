//! Direct transport: the subject is reachable at its own address

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::binding::{TransportBinding, TransportMode};
use super::client::PeerClient;
use super::mailbox::PendingReplies;
use super::Transport;
use crate::cancel::CancelToken;
use crate::error::TransportError;
use crate::protocol::{SubjectRequest, SubjectResponse};

pub struct DirectTransport {
    /// peer id -> advertised address
    peers: HashMap<String, String>,
    client: PeerClient,
    replies: PendingReplies,
}

impl DirectTransport {
    pub fn new(peers: HashMap<String, String>, request_timeout: Duration) -> Self {
        Self {
            peers,
            client: PeerClient::new(request_timeout),
            replies: PendingReplies::new(),
        }
    }

    pub fn with_peer(mut self, peer_id: impl Into<String>, address: impl Into<String>) -> Self {
        self.peers.insert(peer_id.into(), address.into());
        self
    }
}

#[async_trait]
impl Transport for DirectTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Direct
    }

    async fn resolve(
        &self,
        peer_id: &str,
        _cancel: &CancelToken,
    ) -> Result<TransportBinding, TransportError> {
        let address = self
            .peers
            .get(peer_id)
            .ok_or_else(|| TransportError::UnknownPeer(peer_id.to_string()))?;
        Ok(TransportBinding::direct(peer_id, address.clone()))
    }

    async fn send(
        &self,
        binding: &TransportBinding,
        request: SubjectRequest,
    ) -> Result<(), TransportError> {
        let url = format!("{}/turn", binding.endpoint.trim_end_matches('/'));
        debug!(
            "Sending turn {} of session {} to {}",
            request.turn_index, request.session_id, url
        );

        let client = self.client.clone();
        let session_id = request.session_id.clone();
        self.replies
            .dispatch(&session_id, async move {
                client.post_json::<_, SubjectResponse>(&url, &request).await
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
}

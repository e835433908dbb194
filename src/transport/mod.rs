//! Peer transports
//!
//! The engine only sees [`Transport`]. Which variant it gets, direct or
//! relayed, is decided once when the session starts.

pub mod binding;
pub mod client;
pub mod direct;
pub mod mailbox;
pub mod relay;

use async_trait::async_trait;

pub use binding::{TransportBinding, TransportMode};
pub use client::PeerClient;
pub use direct::DirectTransport;
pub use relay::{RelayTransport, SetupPolicy};

use crate::cancel::CancelToken;
use crate::error::TransportError;
use crate::protocol::{SubjectRequest, SubjectResponse};

/// Resolve, send to and receive from a subject peer.
///
/// Implementations are shared between concurrent sessions; in-flight replies
/// are keyed by session id.
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> TransportMode;

    /// Make the peer known to the transport before it is resolved
    async fn register(&self, _peer_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    /// Map a logical peer id to a binding. Has no side effects on the peer.
    async fn resolve(
        &self,
        peer_id: &str,
        cancel: &CancelToken,
    ) -> Result<TransportBinding, TransportError>;

    /// Dispatch a request; the reply is collected with [`Transport::receive`]
    async fn send(
        &self,
        binding: &TransportBinding,
        request: SubjectRequest,
    ) -> Result<(), TransportError>;

    /// Wait for the reply to the session's outstanding request
    async fn receive(
        &self,
        binding: &TransportBinding,
        session_id: &str,
    ) -> Result<SubjectResponse, TransportError>;

    /// Drop any reply still outstanding for the session
    async fn abandon(&self, _session_id: &str) {}

    /// Undo [`Transport::register`]
    async fn release(&self, _peer_id: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

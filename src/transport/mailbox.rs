//! In-flight subject requests, keyed by session id

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::{oneshot, Mutex};

use crate::error::TransportError;
use crate::protocol::SubjectResponse;

type Reply = Result<SubjectResponse, TransportError>;

/// `send` dispatches a request in the background and parks its reply here;
/// `receive` waits for it. One outstanding request per session.
#[derive(Debug, Default)]
pub struct PendingReplies {
    pending: Mutex<HashMap<String, oneshot::Receiver<Reply>>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn dispatch<F>(&self, session_id: &str, request: F)
    where
        F: Future<Output = Reply> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            // Receiver is gone if the turn already timed out
            let _ = tx.send(request.await);
        });
        self.pending.lock().await.insert(session_id.to_string(), rx);
    }

    pub async fn take(&self, session_id: &str) -> Reply {
        let rx = self
            .pending
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| TransportError::NoPendingRequest(session_id.to_string()))?;

        rx.await
            .map_err(|_| TransportError::Http("request task ended without a reply".to_string()))?
    }

    pub async fn forget(&self, session_id: &str) {
        self.pending.lock().await.remove(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Action;

    #[tokio::test]
    async fn test_reply_is_delivered_once() {
        let replies = PendingReplies::new();
        replies
            .dispatch("s1", async {
                Ok(SubjectResponse {
                    session_id: "s1".into(),
                    turn_index: 0,
                    action: Action::finish(),
                })
            })
            .await;

        let reply = replies.take("s1").await.unwrap();
        assert!(reply.action.is_finish());
        assert!(matches!(
            replies.take("s1").await,
            Err(TransportError::NoPendingRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_replies() {
        let replies = PendingReplies::new();
        replies
            .dispatch("a", async { Err(TransportError::Http("boom".into())) })
            .await;
        assert!(matches!(
            replies.take("b").await,
            Err(TransportError::NoPendingRequest(_))
        ));
        assert!(matches!(replies.take("a").await, Err(TransportError::Http(_))));
    }
}

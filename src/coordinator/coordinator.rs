//! Evaluator coordinator

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use super::result::AssessmentResult;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::engine::{SessionSettings, TurnEngine};
use crate::environment::{EnvironmentFactory, Task};
use crate::error::{SessionError, TransportError};
use crate::session::Session;
use crate::transport::{
    DirectTransport, RelayTransport, SetupPolicy, Transport, TransportBinding, TransportMode,
};

/// Extra time an HTTP request may outlive the turn deadline
const REQUEST_GRACE: Duration = Duration::from_secs(5);

/// Resolves the subject, runs sessions to completion and collects results.
///
/// Holds no per-session state, so any number of runs may share one
/// coordinator concurrently.
pub struct Coordinator {
    direct: Arc<dyn Transport>,
    relay: Option<Arc<dyn Transport>>,
    factory: Arc<dyn EnvironmentFactory>,
    settings: SessionSettings,
    setup: SetupPolicy,
}

impl Coordinator {
    pub fn new(
        direct: Arc<dyn Transport>,
        factory: Arc<dyn EnvironmentFactory>,
        settings: SessionSettings,
        setup: SetupPolicy,
    ) -> Self {
        Self {
            direct,
            relay: None,
            factory,
            settings,
            setup,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn Transport>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Build both transports from configuration
    pub fn from_config(config: &Config, factory: Arc<dyn EnvironmentFactory>) -> Self {
        let request_timeout = config.session.turn_timeout() + REQUEST_GRACE;
        let direct = DirectTransport::new(config.peer_addresses(), request_timeout);
        let coordinator = Self::new(
            Arc::new(direct),
            factory,
            config.session.clone(),
            config.setup.clone(),
        );

        match &config.relay {
            Some(relay) => coordinator.with_relay(Arc::new(RelayTransport::new(
                &relay.base_url,
                config.setup.clone(),
                request_timeout,
            ))),
            None => coordinator,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn transport(&self, mode: TransportMode) -> Result<Arc<dyn Transport>, SessionError> {
        match mode {
            TransportMode::Direct => Ok(self.direct.clone()),
            TransportMode::Relayed => self.relay.clone().ok_or_else(|| {
                SessionError::SessionSetup("relayed mode requested but no relay is configured".into())
            }),
        }
    }

    /// Register and resolve the subject, retrying unreachable peers
    pub async fn resolve(
        &self,
        subject_peer_id: &str,
        mode: TransportMode,
        cancel: &CancelToken,
    ) -> Result<TransportBinding, SessionError> {
        let transport = self.transport(mode)?;

        if let Err(e) = transport.register(subject_peer_id).await {
            warn!("Could not register {}: {}", subject_peer_id, e);
        }

        let max_attempts = self.setup.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match transport.resolve(subject_peer_id, cancel).await {
                Ok(binding) => {
                    info!(
                        "Resolved {} to {} ({})",
                        subject_peer_id,
                        binding.endpoint,
                        binding.mode.as_str()
                    );
                    return Ok(binding);
                }
                Err(TransportError::Cancelled) => return Err(SessionError::Cancelled),
                Err(e @ TransportError::UnknownPeer(_)) => {
                    return Err(SessionError::SessionSetup(e.to_string()))
                }
                Err(e) => {
                    warn!(
                        "Resolving {} failed (attempt {}/{}): {}",
                        subject_peer_id, attempt, max_attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no resolution attempted".to_string());
        Err(SessionError::SessionSetup(format!(
            "{} after {} attempt(s)",
            reason, max_attempts
        )))
    }

    pub async fn run(
        &self,
        task: Arc<Task>,
        subject_peer_id: &str,
        mode: TransportMode,
    ) -> AssessmentResult {
        self.run_with_cancel(task, subject_peer_id, mode, CancelToken::new())
            .await
    }

    /// Run one assessment; cancelling `cancel` ends it at the next wait
    pub async fn run_with_cancel(
        &self,
        task: Arc<Task>,
        subject_peer_id: &str,
        mode: TransportMode,
        cancel: CancelToken,
    ) -> AssessmentResult {
        let started_at = Utc::now();

        let transport = match self.transport(mode) {
            Ok(t) => t,
            Err(e) => {
                return AssessmentResult::setup_failure(e, &task.id, subject_peer_id, mode, started_at)
            }
        };
        let binding = match self.resolve(subject_peer_id, mode, &cancel).await {
            Ok(b) => b,
            Err(e) => {
                warn!("Setup for {} failed: {}", subject_peer_id, e);
                return AssessmentResult::setup_failure(e, &task.id, subject_peer_id, mode, started_at);
            }
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let session = Session::new(task.clone(), binding.clone());
            let engine = TurnEngine::new(
                transport.clone(),
                self.factory.clone(),
                self.settings.clone(),
                cancel.clone(),
            );
            let outcome = engine.run(session).await;

            let retryable = outcome
                .error
                .as_ref()
                .map(|e| e.is_retryable())
                .unwrap_or(false);
            if retryable && attempts <= self.settings.session_retries && !cancel.is_cancelled() {
                warn!(
                    "Retrying {} against {} (attempt {} of {})",
                    task.id,
                    subject_peer_id,
                    attempts + 1,
                    self.settings.session_retries + 1
                );
                continue;
            }

            return AssessmentResult::from_outcome(
                outcome,
                &task.id,
                subject_peer_id,
                mode,
                attempts,
                started_at,
            );
        }
    }

    /// Run `repeat` independent sessions of the same task concurrently
    pub async fn run_repeated(
        &self,
        task: Arc<Task>,
        subject_peer_id: &str,
        mode: TransportMode,
        repeat: usize,
        cancel: CancelToken,
    ) -> Vec<AssessmentResult> {
        info!(
            "Running {} assessment(s) of {} against {}",
            repeat, task.id, subject_peer_id
        );
        let runs = (0..repeat).map(|_| {
            self.run_with_cancel(task.clone(), subject_peer_id, mode, cancel.clone())
        });
        join_all(runs).await
    }

    /// Drop the subject's relay registration, if any
    pub async fn release(&self, subject_peer_id: &str, mode: TransportMode) -> Result<(), SessionError> {
        let transport = self.transport(mode)?;
        transport
            .release(subject_peer_id)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }
}

//! Turn protocol engine
//!
//! Drives one session through `Init -> AwaitSubject -> ApplyAction ->
//! (AwaitSubject | Done | Failed)`. Every exit path, including transport
//! errors and cancellation, ends in `Done` or `Failed` with the log intact up
//! to that point; nothing is thrown past [`TurnEngine::run`].

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::environment::{EnvironmentAdapter, EnvironmentFactory};
use crate::error::{EnvironmentError, SessionError, TransportError};
use crate::protocol::{Action, Observation, SubjectRequest, SubjectResponse};
use crate::session::{LogError, MessageLog, Session, SessionStatus};
use crate::transport::Transport;

/// Per-session limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    /// How long the subject may take to answer one turn (milliseconds)
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    /// Subject turns allowed before the session is failed
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Consecutive invalid actions tolerated before the session is failed
    #[serde(default = "default_max_corrections")]
    pub max_corrections: u32,
    /// Whole-session retries after a subject timeout
    #[serde(default)]
    pub session_retries: u32,
}

fn default_turn_timeout_ms() -> u64 {
    30_000
}

fn default_max_turns() -> u32 {
    30
}

fn default_max_corrections() -> u32 {
    3
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            turn_timeout_ms: default_turn_timeout_ms(),
            max_turns: default_max_turns(),
            max_corrections: default_max_corrections(),
            session_retries: 0,
        }
    }
}

impl SessionSettings {
    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Init,
    AwaitSubject,
    ApplyAction,
    Done,
    Failed,
}

/// Terminal result of one session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub state: EngineState,
    pub status: SessionStatus,
    pub reward: f64,
    pub error: Option<SessionError>,
    pub log: MessageLog,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.state == EngineState::Done
    }
}

/// Non-terminal states the run loop steps through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Init,
    AwaitSubject,
    ApplyAction,
}

impl From<Step> for EngineState {
    fn from(step: Step) -> Self {
        match step {
            Step::Init => EngineState::Init,
            Step::AwaitSubject => EngineState::AwaitSubject,
            Step::ApplyAction => EngineState::ApplyAction,
        }
    }
}

enum Transition {
    Next(Step),
    Done(f64),
    Fail(SessionError),
}

/// Mutable bookkeeping for one run, dropped with it
struct Turn {
    /// Last observation produced by reset or a successful step
    current: Option<Observation>,
    pending: Option<Action>,
    corrections: u32,
}

pub struct TurnEngine {
    transport: Arc<dyn Transport>,
    factory: Arc<dyn EnvironmentFactory>,
    settings: SessionSettings,
    cancel: CancelToken,
}

impl TurnEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        factory: Arc<dyn EnvironmentFactory>,
        settings: SessionSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            transport,
            factory,
            settings,
            cancel,
        }
    }

    /// Run the session to a terminal state
    pub async fn run(&self, mut session: Session) -> SessionOutcome {
        info!(
            "Session {} starting task {} with {} ({})",
            session.id,
            session.task.id,
            session.binding.peer_id,
            session.binding.mode.as_str()
        );

        let mut turn = Turn {
            current: None,
            pending: None,
            corrections: 0,
        };
        let mut step = Step::Init;

        let (state, reward, error) = loop {
            let transition = match step {
                Step::Init => self.init(&mut session, &mut turn),
                Step::AwaitSubject => self.await_subject(&mut session, &mut turn).await,
                Step::ApplyAction => self.apply_action(&mut session, &mut turn),
            };

            match transition {
                Transition::Next(next) => {
                    debug!(
                        "Session {}: {:?} -> {:?}",
                        session.id,
                        EngineState::from(step),
                        EngineState::from(next)
                    );
                    step = next;
                }
                Transition::Done(reward) => break (EngineState::Done, reward, None),
                Transition::Fail(error) => break (EngineState::Failed, 0.0, Some(error)),
            }
        };

        self.finish(session, state, reward, error).await
    }

    fn init(&self, session: &mut Session, turn: &mut Turn) -> Transition {
        let (adapter, observation) = EnvironmentAdapter::reset(self.factory.as_ref(), &session.task);
        let initial_reward = adapter.reward();
        session.environment = Some(adapter);
        session.status = SessionStatus::Active;

        if let Err(e) = session.log.push_observation(observation.clone()) {
            return Transition::Fail(log_violation(e));
        }

        if observation.done {
            return Transition::Done(observation.reward.unwrap_or(initial_reward));
        }
        turn.current = Some(observation);
        Transition::Next(Step::AwaitSubject)
    }

    async fn await_subject(&self, session: &mut Session, turn: &mut Turn) -> Transition {
        let subject_turns = session.log.subject_turns();
        if subject_turns >= self.settings.max_turns {
            warn!(
                "Session {} hit the turn ceiling ({})",
                session.id, self.settings.max_turns
            );
            return Transition::Fail(SessionError::MaxTurnsExceeded(self.settings.max_turns));
        }
        if self.cancel.is_cancelled() {
            return Transition::Fail(SessionError::Cancelled);
        }

        let (turn_index, observation) = match session.log.messages().last() {
            Some(message) => match session.log.last_observation() {
                Some(obs) => (message.turn_index, obs.clone()),
                None => {
                    return Transition::Fail(SessionError::ProtocolViolation(
                        "no observation to send".to_string(),
                    ))
                }
            },
            None => {
                return Transition::Fail(SessionError::ProtocolViolation(
                    "empty message log".to_string(),
                ))
            }
        };

        let request = SubjectRequest {
            session_id: session.id.clone(),
            turn_index,
            observation,
        };
        if let Err(e) = self.transport.send(&session.binding, request).await {
            return Transition::Fail(transport_failure(e));
        }

        let timeout = self.settings.turn_timeout();
        let reply = tokio::select! {
            reply = tokio::time::timeout(
                timeout,
                self.transport.receive(&session.binding, &session.id),
            ) => reply,
            _ = self.cancel.cancelled() => {
                info!("Session {} cancelled while waiting on turn {}", session.id, turn_index);
                return Transition::Fail(SessionError::Cancelled);
            }
        };

        let response = match reply {
            Err(_elapsed) => {
                warn!(
                    "Session {}: subject silent on turn {} for {}ms",
                    session.id, turn_index, self.settings.turn_timeout_ms
                );
                return Transition::Fail(SessionError::SubjectTimeout {
                    turn_index,
                    timeout_ms: self.settings.turn_timeout_ms,
                });
            }
            Ok(Err(e)) => return Transition::Fail(transport_failure(e)),
            Ok(Ok(response)) => response,
        };

        if let Err(reason) = check_response(&session.id, turn_index, &response) {
            warn!("Session {}: {}", session.id, reason);
            return Transition::Fail(SessionError::ProtocolViolation(reason));
        }

        debug!(
            "Session {} turn {}: subject chose {}",
            session.id, turn_index, response.action.name
        );
        if let Err(e) = session.log.push_action(response.action.clone()) {
            return Transition::Fail(log_violation(e));
        }
        turn.pending = Some(response.action);
        Transition::Next(Step::ApplyAction)
    }

    fn apply_action(&self, session: &mut Session, turn: &mut Turn) -> Transition {
        let Some(action) = turn.pending.take() else {
            return Transition::Fail(SessionError::ProtocolViolation(
                "no action to apply".to_string(),
            ));
        };
        let Some(env) = session.environment.as_mut() else {
            return Transition::Fail(SessionError::ProtocolViolation(
                "environment not initialised".to_string(),
            ));
        };

        if action.is_finish() {
            info!("Session {}: subject finished early", session.id);
            let reward = env.finish().unwrap_or_else(|_| env.reward());
            return Transition::Done(reward);
        }

        match env.step(&action) {
            Ok(observation) if observation.done => {
                let reward = observation.reward.unwrap_or_else(|| env.reward());
                if let Err(e) = session.log.push_observation(observation) {
                    return Transition::Fail(log_violation(e));
                }
                Transition::Done(reward)
            }
            Ok(observation) => {
                turn.corrections = 0;
                if let Err(e) = session.log.push_observation(observation.clone()) {
                    return Transition::Fail(log_violation(e));
                }
                turn.current = Some(observation);
                Transition::Next(Step::AwaitSubject)
            }
            Err(EnvironmentError::InvalidAction(reason)) => {
                turn.corrections += 1;
                if turn.corrections > self.settings.max_corrections {
                    warn!(
                        "Session {}: {} invalid action(s) in a row, giving up",
                        session.id, turn.corrections
                    );
                    return Transition::Fail(SessionError::InvalidAction {
                        attempts: turn.corrections,
                        reason,
                    });
                }

                warn!(
                    "Session {}: rejected {} ({}), correction {}/{}",
                    session.id,
                    action.name,
                    reason,
                    turn.corrections,
                    self.settings.max_corrections
                );
                let correction = match &turn.current {
                    Some(current) => current.correction(reason),
                    None => Observation::new("", serde_json::Value::Null).correction(reason),
                };
                if let Err(e) = session.log.push_observation(correction) {
                    return Transition::Fail(log_violation(e));
                }
                Transition::Next(Step::AwaitSubject)
            }
            Err(EnvironmentError::EnvironmentTerminated) => Transition::Done(env.reward()),
        }
    }

    async fn finish(
        &self,
        mut session: Session,
        state: EngineState,
        reward: f64,
        error: Option<SessionError>,
    ) -> SessionOutcome {
        self.transport.abandon(&session.id).await;
        session.release_environment();

        session.status = match (&state, &error) {
            (EngineState::Done, _) => SessionStatus::Completed,
            (_, Some(SessionError::SubjectTimeout { .. })) => SessionStatus::TimedOut,
            _ => SessionStatus::Failed,
        };

        match &error {
            None => info!(
                "Session {} completed after {} turn(s), reward {}",
                session.id,
                session.log.subject_turns(),
                reward
            ),
            Some(e) => warn!(
                "Session {} ended {}: {}",
                session.id,
                session.status.as_str(),
                e
            ),
        }

        SessionOutcome {
            session_id: session.id,
            state,
            status: session.status,
            reward,
            error,
            log: session.log,
        }
    }
}

fn check_response(
    session_id: &str,
    turn_index: u32,
    response: &SubjectResponse,
) -> Result<(), String> {
    if response.session_id != session_id {
        return Err(format!(
            "reply for session {} arrived on session {}",
            response.session_id, session_id
        ));
    }
    if response.turn_index != turn_index {
        return Err(format!(
            "reply carries turn {} but turn {} was asked",
            response.turn_index, turn_index
        ));
    }
    if response.action.name.trim().is_empty() {
        return Err("reply has an empty action name".to_string());
    }
    Ok(())
}

fn transport_failure(e: TransportError) -> SessionError {
    match e {
        TransportError::Decode(reason) => SessionError::ProtocolViolation(reason),
        TransportError::Cancelled => SessionError::Cancelled,
        other => SessionError::Transport(other.to_string()),
    }
}

fn log_violation(e: LogError) -> SessionError {
    SessionError::ProtocolViolation(e.to_string())
}

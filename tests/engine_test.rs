// Tests for the turn protocol engine against live subject peers

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use assessor::engine::{EngineState, SessionOutcome, SessionSettings, TurnEngine};
use assessor::environment::{
    ActionSchema, Environment, EnvironmentFactory, RecordStore, RecordStoreFactory, Task,
};
use assessor::protocol::{Action, Observation, SubjectResponse};
use assessor::session::{MessageContent, Role, Session, SessionStatus};
use assessor::subject::ScriptedAgent;
use assessor::transport::{DirectTransport, TransportBinding};
use assessor::{CancelToken, SessionError};
use common::{order_task, settings, spawn_raw_peer, spawn_subject, SilentAgent, REQUEST_TIMEOUT};
use serde_json::json;

async fn run_session(
    address: &str,
    task: Task,
    settings: SessionSettings,
    cancel: CancelToken,
) -> SessionOutcome {
    let transport = Arc::new(DirectTransport::new(HashMap::new(), REQUEST_TIMEOUT));
    let engine = TurnEngine::new(transport, Arc::new(RecordStoreFactory), settings, cancel);
    let session = Session::new(Arc::new(task), TransportBinding::direct("subject", address));
    engine.run(session).await
}

fn cancel_order() -> Action {
    Action::new("update", json!({"key": "order_7", "value": "cancelled"}))
}

fn observation_error(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Observation(obs) => obs.error.clone(),
        MessageContent::Action(_) => panic!("expected an observation"),
    }
}

#[tokio::test]
async fn test_scripted_session_completes_with_alternating_log() {
    let agent = ScriptedAgent::new(vec![
        Action::new("lookup", json!({"key": "order_7"})),
        cancel_order(),
        Action::finish(),
    ]);
    let (address, server) = spawn_subject(Arc::new(agent)).await;

    let outcome = run_session(&address, order_task(), settings(), CancelToken::new()).await;

    assert_eq!(outcome.state, EngineState::Done);
    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.reward, 1.0);
    assert!(outcome.error.is_none());

    let messages = outcome.log.messages();
    assert_eq!(messages.len(), 6);
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.turn_index, i as u32);
        let expected = if i % 2 == 0 {
            Role::Evaluator
        } else {
            Role::Subject
        };
        assert_eq!(message.role, expected);
    }

    // The subject saw every observation, each tagged with its log index
    let conversation = server.conversation(&outcome.session_id).await.unwrap();
    let turns: Vec<u32> = conversation.observations.iter().map(|(t, _)| *t).collect();
    assert_eq!(turns, vec![0, 2, 4]);
}

#[tokio::test]
async fn test_stop_on_success_ends_on_terminal_observation() {
    let agent = ScriptedAgent::new(vec![cancel_order()]);
    let (address, _server) = spawn_subject(Arc::new(agent)).await;

    let outcome = run_session(
        &address,
        order_task().stop_on_success(),
        settings(),
        CancelToken::new(),
    )
    .await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.reward, 1.0);
    let messages = outcome.log.messages();
    assert_eq!(messages.len(), 3);
    match &messages[2].content {
        MessageContent::Observation(obs) => {
            assert!(obs.done);
            assert_eq!(obs.reward, Some(1.0));
        }
        other => panic!("expected terminal observation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_finish_scores_current_state() {
    let agent = ScriptedAgent::new(vec![Action::new("list", json!({}))]);
    let (address, _server) = spawn_subject(Arc::new(agent)).await;

    let outcome = run_session(&address, order_task(), settings(), CancelToken::new()).await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.reward, 0.0);
    assert_eq!(outcome.log.subject_turns(), 2);
}

#[tokio::test]
async fn test_silent_subject_times_out_after_initial_observation() {
    let (address, _server) = spawn_subject(Arc::new(SilentAgent)).await;
    let settings = SessionSettings {
        turn_timeout_ms: 200,
        ..settings()
    };

    let outcome = run_session(&address, order_task(), settings, CancelToken::new()).await;

    assert_eq!(outcome.state, EngineState::Failed);
    assert_eq!(outcome.status, SessionStatus::TimedOut);
    assert_eq!(outcome.reward, 0.0);
    assert_eq!(outcome.log.len(), 1);
    assert_eq!(outcome.log.messages()[0].role, Role::Evaluator);
    assert_eq!(
        outcome.error,
        Some(SessionError::SubjectTimeout {
            turn_index: 0,
            timeout_ms: 200
        })
    );
}

#[tokio::test]
async fn test_invalid_action_gets_a_correction() {
    let agent = ScriptedAgent::new(vec![
        Action::new("truncate", json!({})),
        cancel_order(),
        Action::finish(),
    ]);
    let (address, server) = spawn_subject(Arc::new(agent)).await;

    let outcome = run_session(&address, order_task(), settings(), CancelToken::new()).await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(outcome.reward, 1.0);

    let messages = outcome.log.messages();
    assert_eq!(messages.len(), 6);
    let correction = observation_error(&messages[2].content).unwrap();
    assert!(correction.contains("truncate"));
    assert!(observation_error(&messages[4].content).is_none());

    // Corrections are delivered to the subject like any other observation
    let conversation = server.conversation(&outcome.session_id).await.unwrap();
    assert!(conversation.observations[1].1.error.is_some());
}

#[tokio::test]
async fn test_corrections_exhausted_fails_session() {
    let agent = ScriptedAgent::new(vec![Action::new("truncate", json!({}))]).looping();
    let (address, _server) = spawn_subject(Arc::new(agent)).await;

    let outcome = run_session(&address, order_task(), settings(), CancelToken::new()).await;

    assert_eq!(outcome.state, EngineState::Failed);
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.reward, 0.0);
    match outcome.error {
        Some(SessionError::InvalidAction { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected InvalidAction, got {:?}", other),
    }
    assert_eq!(outcome.log.len(), 6);
}

#[tokio::test]
async fn test_rejected_action_leaves_environment_untouched() {
    let probe = Action::new("lookup", json!({"key": "order_7"}));

    let direct = ScriptedAgent::new(vec![probe.clone()]);
    let (direct_address, _a) = spawn_subject(Arc::new(direct)).await;
    let after_probe = run_session(&direct_address, order_task(), settings(), CancelToken::new()).await;

    let rejected_first = ScriptedAgent::new(vec![
        Action::new("update", json!({"key": "order_7"})),
        probe,
    ]);
    let (rejected_address, _b) = spawn_subject(Arc::new(rejected_first)).await;
    let after_rejection =
        run_session(&rejected_address, order_task(), settings(), CancelToken::new()).await;

    assert_eq!(
        after_probe.log.messages()[2].content,
        after_rejection.log.messages()[4].content
    );
}

#[tokio::test]
async fn test_turn_ceiling_is_exact() {
    let agent = ScriptedAgent::new(vec![Action::new("list", json!({}))]).looping();
    let (address, server) = spawn_subject(Arc::new(agent)).await;
    let settings = SessionSettings {
        max_turns: 4,
        ..settings()
    };

    let outcome = run_session(&address, order_task(), settings, CancelToken::new()).await;

    assert_eq!(outcome.error, Some(SessionError::MaxTurnsExceeded(4)));
    assert_eq!(outcome.status, SessionStatus::Failed);
    assert_eq!(outcome.log.subject_turns(), 4);
    assert_eq!(outcome.log.len(), 9);

    let conversation = server.conversation(&outcome.session_id).await.unwrap();
    assert_eq!(conversation.len(), 4);
}

#[tokio::test]
async fn test_mismatched_turn_is_a_protocol_violation() {
    let address = spawn_raw_peer(|request| {
        serde_json::to_string(&SubjectResponse {
            session_id: request.session_id,
            turn_index: request.turn_index + 1,
            action: Action::new("list", json!({})),
        })
        .unwrap()
    })
    .await;

    let outcome = run_session(&address, order_task(), settings(), CancelToken::new()).await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(matches!(
        outcome.error,
        Some(SessionError::ProtocolViolation(_))
    ));
    assert_eq!(outcome.log.len(), 1);
}

#[tokio::test]
async fn test_undecodable_reply_is_a_protocol_violation() {
    let address = spawn_raw_peer(|_| r#"{"thought": "hmm"}"#.to_string()).await;

    let outcome = run_session(&address, order_task(), settings(), CancelToken::new()).await;

    assert!(matches!(
        outcome.error,
        Some(SessionError::ProtocolViolation(_))
    ));
}

#[tokio::test]
async fn test_unreachable_subject_is_a_transport_failure() {
    // Bind then drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let outcome = run_session(&address, order_task(), settings(), CancelToken::new()).await;

    assert_eq!(outcome.status, SessionStatus::Failed);
    assert!(matches!(outcome.error, Some(SessionError::Transport(_))));
}

#[tokio::test]
async fn test_cancel_interrupts_wait() {
    let (address, _server) = spawn_subject(Arc::new(SilentAgent)).await;
    let settings = SessionSettings {
        turn_timeout_ms: 30_000,
        ..settings()
    };
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = run_session(&address, order_task(), settings, cancel).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.error, Some(SessionError::Cancelled));
    assert_eq!(outcome.state, EngineState::Failed);
    assert_eq!(outcome.log.len(), 1);
}

/// Record store that counts how often it is closed
struct Counted {
    inner: RecordStore,
    closes: Arc<AtomicUsize>,
}

impl Environment for Counted {
    fn schema(&self) -> ActionSchema {
        self.inner.schema()
    }

    fn reset(&mut self, task: &Task) -> Observation {
        self.inner.reset(task)
    }

    fn apply(&mut self, action: &Action) -> Observation {
        self.inner.apply(action)
    }

    fn reward(&self) -> f64 {
        self.inner.reward()
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingFactory {
    closes: Arc<AtomicUsize>,
}

impl EnvironmentFactory for CountingFactory {
    fn create(&self) -> Box<dyn Environment> {
        Box::new(Counted {
            inner: RecordStore::new(),
            closes: self.closes.clone(),
        })
    }
}

/// Run one session and report how many times its environment was closed
async fn closes_after(
    address: &str,
    settings: SessionSettings,
    cancel: CancelToken,
) -> (SessionOutcome, usize) {
    let closes = Arc::new(AtomicUsize::new(0));
    let factory = Arc::new(CountingFactory {
        closes: closes.clone(),
    });
    let transport = Arc::new(DirectTransport::new(HashMap::new(), REQUEST_TIMEOUT));
    let engine = TurnEngine::new(transport, factory, settings, cancel);
    let session = Session::new(
        Arc::new(order_task()),
        TransportBinding::direct("subject", address),
    );
    let outcome = engine.run(session).await;
    (outcome, closes.load(Ordering::SeqCst))
}

#[tokio::test]
async fn test_environment_closed_after_timeout() {
    let (address, _server) = spawn_subject(Arc::new(SilentAgent)).await;
    let settings = SessionSettings {
        turn_timeout_ms: 100,
        ..settings()
    };

    let (outcome, closes) = closes_after(&address, settings, CancelToken::new()).await;

    assert_eq!(outcome.status, SessionStatus::TimedOut);
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_environment_closed_after_cancel() {
    let (address, _server) = spawn_subject(Arc::new(SilentAgent)).await;
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let (outcome, closes) = closes_after(&address, settings(), cancel).await;

    assert_eq!(outcome.error, Some(SessionError::Cancelled));
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_environment_closed_after_protocol_violation() {
    let address = spawn_raw_peer(|_| "not json".to_string()).await;

    let (outcome, closes) = closes_after(&address, settings(), CancelToken::new()).await;

    assert!(matches!(
        outcome.error,
        Some(SessionError::ProtocolViolation(_))
    ));
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_environment_closed_after_corrections_run_out() {
    let agent = ScriptedAgent::new(vec![Action::new("truncate", json!({}))]).looping();
    let (address, _server) = spawn_subject(Arc::new(agent)).await;

    let (outcome, closes) = closes_after(&address, settings(), CancelToken::new()).await;

    assert!(matches!(
        outcome.error,
        Some(SessionError::InvalidAction { .. })
    ));
    assert_eq!(closes, 1);
}

#[tokio::test]
async fn test_environment_closed_after_completion() {
    let agent = ScriptedAgent::new(vec![cancel_order()]);
    let (address, _server) = spawn_subject(Arc::new(agent)).await;

    let (outcome, closes) = closes_after(&address, settings(), CancelToken::new()).await;

    assert_eq!(outcome.status, SessionStatus::Completed);
    assert_eq!(closes, 1);
}

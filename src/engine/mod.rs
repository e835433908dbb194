//! Turn-based session orchestration

pub mod turn;

pub use turn::{EngineState, SessionOutcome, SessionSettings, TurnEngine};

//! Assessor - turn-based evaluation sessions between an evaluator and a subject agent

pub mod cancel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod environment;
pub mod error;
pub mod protocol;
pub mod session;
pub mod subject;
pub mod transport;

pub use cancel::CancelToken;
pub use coordinator::{AssessmentResult, Coordinator};
pub use error::{EnvironmentError, SessionError, TransportError};

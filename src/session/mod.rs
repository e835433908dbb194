//! Session state and message log

pub mod message;
pub mod state;

pub use message::{LogError, Message, MessageContent, MessageLog, Role};
pub use state::{Session, SessionStatus};

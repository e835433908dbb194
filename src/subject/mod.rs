//! Subject-side hosting: agents and the HTTP server that exposes them

pub mod agent;
pub mod http;
pub mod server;

pub use agent::{Conversation, ScriptedAgent, SubjectAgent};
pub use server::SubjectServer;

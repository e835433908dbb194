//! Top-level assessment driver

pub mod coordinator;
pub mod result;

pub use coordinator::Coordinator;
pub use result::AssessmentResult;

//! Wire protocol shared by evaluator, subject and relay

pub mod types;

pub use types::*;

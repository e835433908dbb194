//! Simulated environments driven by subject actions

pub mod adapter;
pub mod records;
pub mod schema;
pub mod task;

pub use adapter::{Environment, EnvironmentAdapter, EnvironmentFactory};
pub use records::{RecordStore, RecordStoreFactory};
pub use schema::{ActionSchema, ParamKind, ParamSpec, ToolSpec};
pub use task::{SuccessCriteria, Task};

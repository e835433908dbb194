//! Environment adapter
//!
//! Sessions never hold an environment directly. They get an
//! [`EnvironmentAdapter`], which is only constructed by resetting a brand new
//! instance from a factory, validates every action before it reaches the
//! environment, and refuses to step once a terminal observation was produced.

use tracing::debug;

use super::schema::ActionSchema;
use super::task::Task;
use crate::error::EnvironmentError;
use crate::protocol::{Action, Observation};

/// A deterministic, resettable simulated environment
pub trait Environment: Send {
    /// Actions this environment accepts
    fn schema(&self) -> ActionSchema;

    /// Load the task's initial configuration and describe it
    fn reset(&mut self, task: &Task) -> Observation;

    /// Apply an action that already passed schema validation
    fn apply(&mut self, action: &Action) -> Observation;

    /// Score of the current state
    fn reward(&self) -> f64;

    /// Release held resources
    fn close(&mut self) {}
}

/// Creates fresh environment instances, one per session
pub trait EnvironmentFactory: Send + Sync {
    fn create(&self) -> Box<dyn Environment>;
}

impl<F> EnvironmentFactory for F
where
    F: Fn() -> Box<dyn Environment> + Send + Sync,
{
    fn create(&self) -> Box<dyn Environment> {
        self()
    }
}

pub struct EnvironmentAdapter {
    env: Box<dyn Environment>,
    schema: ActionSchema,
    terminated: bool,
    closed: bool,
}

impl EnvironmentAdapter {
    /// Build a fresh environment for `task` and return its initial observation
    pub fn reset(factory: &dyn EnvironmentFactory, task: &Task) -> (Self, Observation) {
        let mut env = factory.create();
        let schema = env.schema();
        let observation = env.reset(task);
        debug!("Environment reset for task {}", task.id);

        let adapter = Self {
            env,
            schema,
            terminated: observation.done,
            closed: false,
        };
        (adapter, observation)
    }

    pub fn schema(&self) -> &ActionSchema {
        &self.schema
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Apply an action. Rejected actions leave the environment untouched.
    pub fn step(&mut self, action: &Action) -> Result<Observation, EnvironmentError> {
        if self.terminated {
            return Err(EnvironmentError::EnvironmentTerminated);
        }

        self.schema
            .validate(action)
            .map_err(EnvironmentError::InvalidAction)?;

        let mut observation = self.env.apply(action);
        if observation.done {
            self.terminated = true;
            if observation.reward.is_none() {
                observation.reward = Some(self.env.reward());
            }
        }
        Ok(observation)
    }

    /// End the episode on the subject's request and return the final score
    pub fn finish(&mut self) -> Result<f64, EnvironmentError> {
        if self.terminated {
            return Err(EnvironmentError::EnvironmentTerminated);
        }
        self.terminated = true;
        Ok(self.env.reward())
    }

    pub fn reward(&self) -> f64 {
        self.env.reward()
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.terminated = true;
            self.env.close();
        }
    }
}

impl Drop for EnvironmentAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

//! Workflow error types.

use crate::step::StepName;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type returned by step actions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Structural problem found while building a workflow graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphDefinitionError {
    /// A step was declared with an empty name.
    #[error("step names must not be empty")]
    EmptyName,

    /// Two steps share a name.
    #[error("duplicate step name '{0}'")]
    DuplicateStep(StepName),

    /// A dependency refers to a step that was never declared.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        /// The step declaring the dependency.
        step: StepName,
        /// The missing dependency.
        dependency: StepName,
    },

    /// A step waits on itself under an AND join and could never start.
    #[error("step '{0}' cannot depend on itself with an AND join")]
    SelfDependency(StepName),

    /// No step is seeded when a run begins.
    #[error("workflow has no start step")]
    MissingStart,

    /// No step can terminate a run.
    #[error("workflow has no end step")]
    MissingEnd,
}

/// A step action failed.
///
/// Carries the step, the attempt that failed (starting at 1) and the error
/// the action returned. Cheap to clone; the source is shared.
#[derive(Error, Debug, Clone)]
#[error("step '{step_name}' failed on attempt {attempt}: {source}")]
pub struct StepExecutionError {
    /// The step that failed.
    pub step_name: StepName,
    /// The failing attempt, starting at 1. Zero when the step's guard
    /// panicked before any attempt ran.
    pub attempt: u32,
    /// What the action returned.
    pub source: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl StepExecutionError {
    /// Wraps an action error.
    pub fn new(step_name: StepName, attempt: u32, source: BoxError) -> Self {
        Self {
            step_name,
            attempt,
            source: Arc::from(source),
        }
    }
}

/// Source of a [`StepExecutionError`] when an attempt ran out of time.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("step timed out after {after:?}")]
pub struct StepTimedOut {
    /// The timeout that fired.
    pub after: Duration,
}

/// Source of a [`StepExecutionError`] when an attempt panicked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("step panicked: {message}")]
pub struct StepPanicked {
    /// The panic payload, when it was a string.
    pub message: String,
}

/// Errors surfaced by building or running a workflow.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// The graph is malformed; no run was started.
    #[error(transparent)]
    Definition(#[from] GraphDefinitionError),

    /// Nothing is ready, nothing is in flight, and no end step succeeded.
    #[error("workflow deadlocked; stalled steps: {}", join_names(.stalled))]
    Deadlock {
        /// Steps that were still waiting when the run stalled.
        stalled: Vec<StepName>,
    },

    /// A step exhausted its retries and no end step could be reached.
    #[error("workflow failed: {0}")]
    Failure(#[source] StepExecutionError),

    /// More activations were dispatched than the configured cap allows.
    #[error("workflow exceeded the limit of {limit} step executions")]
    StepLimitExceeded {
        /// The configured cap.
        limit: usize,
    },
}

fn join_names(names: &[StepName]) -> String {
    names
        .iter()
        .map(StepName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

//! Core types for the musubi workflow engine.
//!
//! This crate holds the step model and the dependency graph without any
//! runtime dependency. Library authors implementing reusable steps only need
//! this crate; the scheduler lives in `musubi`.
//!
//! # Core Types
//!
//! - [`Step`] - The trait every step action implements
//! - [`StepSpec`] - A step declaration: action, dependencies, join, guard, retry
//! - [`Graph`] - Validated dependency graph built from declarations
//! - [`RunState`] - Shared state of one run
//! - [`WorkflowError`] - Errors surfaced by building or running a workflow

mod error;
mod graph;
mod state;
mod step;

pub use error::{
    BoxError, GraphDefinitionError, StepExecutionError, StepPanicked, StepTimedOut,
    WorkflowError,
};
pub use graph::{
    DependencyRef, Edge, Graph, GraphDescription, Guard, Node, StepDescription, StepHandle,
    StepSpec, Successor,
};
pub use state::RunState;
pub use step::{
    FnStep, JoinCondition, RetryPolicy, RetryPolicyError, Step, StepConfig, StepContext,
    StepInputs, StepName, StepRole, StepStatus,
};

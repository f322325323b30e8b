//! A dependency-graph workflow engine for Rust.
//!
//! Steps are async actions wired together by AND/OR joins. A run starts from
//! the start steps, dispatches every step whose join is satisfied
//! concurrently, skips steps whose guard is false, retries failed attempts,
//! and ends as soon as an end step succeeds.
//!
//! # Example
//!
//! ```rust
//! use musubi::prelude::*;
//!
//! #[derive(Default)]
//! struct Draft {
//!     revisions: u32,
//! }
//!
//! # fn main() -> Result<(), WorkflowError> {
//! # tokio_test::block_on(async {
//! let workflow = Workflow::builder()
//!     .name("drafting")
//!     .step(StepSpec::from_fn("outline", |_ctx: StepContext<Draft, String>| async {
//!         Ok::<_, BoxError>("outline".to_string())
//!     }).start())
//!     .step(
//!         StepSpec::from_fn("revise", |ctx: StepContext<Draft, String>| async move {
//!             let n = ctx.update(|d| {
//!                 d.revisions += 1;
//!                 d.revisions
//!             });
//!             Ok::<_, BoxError>(format!("revision {n}"))
//!         })
//!         .after_any(["outline", "revise"])
//!         .when(|d: &Draft| d.revisions < 3),
//!     )
//!     .step(
//!         StepSpec::from_fn("publish", |mut ctx: StepContext<Draft, String>| async move {
//!             let last = ctx.take_inputs().into_values().pop().unwrap_or_default();
//!             Ok::<_, BoxError>(format!("published {last}"))
//!         })
//!         .after("revise")
//!         .when(|d: &Draft| d.revisions >= 3)
//!         .end(),
//!     )
//!     .build()?;
//!
//! let output = workflow.run(Draft::default()).await?;
//! assert_eq!(output.result, "published revision 3");
//! assert_eq!(output.runs("revise"), 3);
//! # Ok(())
//! # })
//! # }
//! ```

mod config;
mod event;
mod scheduler;
mod workflow;

// Re-export core types
pub use musubi_core::*;

pub use config::{AbandonPolicy, WorkflowConfig};
pub use event::{Event, EventEmitter, EventKind, SubscriptionId};
pub use workflow::{RunOutput, StepSummary, Workflow, WorkflowBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        AbandonPolicy, BoxError, Event, EventKind, JoinCondition, RetryPolicy, RunOutput,
        RunState, Step, StepConfig, StepContext, StepHandle, StepInputs, StepName, StepSpec,
        StepStatus, Workflow, WorkflowBuilder, WorkflowConfig, WorkflowError,
    };
}

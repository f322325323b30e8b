//! Workflow definition and execution entry point.

use crate::config::WorkflowConfig;
use crate::event::{Event, EventEmitter, EventKind, SubscriptionId};
use crate::scheduler::Scheduler;
use musubi_core::{
    Graph, GraphDescription, RunState, StepHandle, StepName, StepSpec, StepStatus, WorkflowError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// A validated dependency graph of steps, ready to run.
///
/// `S` is the run state shared by every step, `O` the value steps return.
/// The graph is built once; each [`run`](Self::run) gets fresh state.
pub struct Workflow<S, O> {
    name: String,
    graph: Graph<S, O>,
    config: WorkflowConfig,
    events: EventEmitter,
}

impl<S, O> fmt::Debug for Workflow<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("steps", &self.step_names().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl<S, O> Workflow<S, O> {
    /// Creates a new workflow builder.
    pub fn builder() -> WorkflowBuilder<S, O> {
        WorkflowBuilder::new()
    }

    /// Workflow name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run configuration.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// The validated graph.
    pub fn graph(&self) -> &Graph<S, O> {
        &self.graph
    }

    /// Returns an iterator over step names in declaration order.
    pub fn step_names(&self) -> impl Iterator<Item = &StepName> {
        self.graph.nodes().map(|node| node.name())
    }

    /// Returns `true` if a step with the given name exists.
    pub fn has_step(&self, name: &str) -> bool {
        self.graph.position(name).is_some()
    }

    /// Returns the number of steps.
    pub fn step_count(&self) -> usize {
        self.graph.len()
    }

    /// Structural summary of the graph.
    pub fn describe(&self) -> GraphDescription {
        self.graph.describe()
    }

    /// Mermaid flowchart of the graph.
    pub fn to_mermaid(&self) -> String {
        self.graph.to_mermaid()
    }

    /// The emitter runs publish to.
    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Subscribes to one event kind. See [`EventEmitter::subscribe`].
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.subscribe(kind, handler)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }
}

impl<S, O> Workflow<S, O>
where
    S: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Runs the workflow against fresh state.
    ///
    /// Returns as soon as an end step succeeds. Steps still in flight at that
    /// point are handled per [`AbandonPolicy`](crate::AbandonPolicy).
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::Failure`] if a step exhausted its retries and no
    ///   end step was reached; wraps the first such failure
    /// - [`WorkflowError::Deadlock`] if the run stalled with no failure
    /// - [`WorkflowError::StepLimitExceeded`] if `max_steps` was hit
    pub async fn run(&self, state: S) -> Result<RunOutput<S, O>, WorkflowError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("workflow_run", workflow = %self.name, %run_id);

        async move {
            info!(steps = self.graph.len(), "Starting workflow '{}'", self.name);
            let state = RunState::new(state);
            let mut scheduler =
                Scheduler::new(&self.graph, &self.config, &self.events, run_id, state.clone());
            let result = scheduler.run().await;
            let steps = scheduler.summaries();

            match result {
                Ok((end, output)) => {
                    let end_step = self.graph.node(end).name().clone();
                    info!(
                        end_step = %end_step,
                        elapsed = ?state.elapsed(),
                        "Workflow '{}' finished",
                        self.name
                    );
                    Ok(RunOutput {
                        run_id,
                        end_step,
                        result: output,
                        state,
                        steps,
                    })
                }
                Err(error) => {
                    warn!(error = %error, "Workflow '{}' failed", self.name);
                    Err(error)
                }
            }
        }
        .instrument(span)
        .await
    }
}

/// Counters for one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepSummary {
    /// Status after the step's latest activation.
    pub status: StepStatus,
    /// Activations that passed the guard and ran.
    pub runs: u32,
    /// Attempts across all runs, retries included.
    pub attempts: u32,
    /// Activations skipped by the guard.
    pub skips: u32,
}

/// Result of a successful run.
pub struct RunOutput<S, O> {
    /// Identifier carried by every event of the run.
    pub run_id: Uuid,
    /// The end step that finished the run.
    pub end_step: StepName,
    /// Its output.
    pub result: O,
    /// Final run state. Detached steps may still be writing to it.
    pub state: RunState<S, O>,
    /// Per-step counters.
    pub steps: HashMap<StepName, StepSummary>,
}

impl<S, O: fmt::Debug> fmt::Debug for RunOutput<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOutput")
            .field("run_id", &self.run_id)
            .field("end_step", &self.end_step)
            .field("result", &self.result)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

impl<S, O> RunOutput<S, O> {
    /// Counters of the named step.
    pub fn summary(&self, step: &str) -> Option<&StepSummary> {
        self.steps.get(step)
    }

    /// Status of the named step.
    pub fn status(&self, step: &str) -> Option<StepStatus> {
        self.summary(step).map(|s| s.status)
    }

    /// Number of times the named step ran. Zero for unknown steps.
    pub fn runs(&self, step: &str) -> u32 {
        self.summary(step).map_or(0, |s| s.runs)
    }

    /// Number of attempts of the named step. Zero for unknown steps.
    pub fn attempts(&self, step: &str) -> u32 {
        self.summary(step).map_or(0, |s| s.attempts)
    }

    /// Reads the final user state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        self.state.read(f)
    }
}

impl<S, O: Clone> RunOutput<S, O> {
    /// Latest output of the named step.
    pub fn output(&self, step: &str) -> Option<O> {
        self.state.output(step)
    }
}

/// Builder for constructing [`Workflow`] instances.
pub struct WorkflowBuilder<S, O> {
    name: String,
    steps: Vec<StepSpec<S, O>>,
    config: WorkflowConfig,
}

impl<S, O> Default for WorkflowBuilder<S, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, O> fmt::Debug for WorkflowBuilder<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("config", &self.config)
            .finish()
    }
}

impl<S, O> WorkflowBuilder<S, O> {
    /// Creates a new empty workflow builder.
    pub fn new() -> Self {
        Self {
            name: "workflow".to_string(),
            steps: Vec::new(),
            config: WorkflowConfig::default(),
        }
    }

    /// Sets the workflow name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Adds a step.
    pub fn step(mut self, spec: StepSpec<S, O>) -> Self {
        self.steps.push(spec);
        self
    }

    /// Adds a step and returns a handle later steps can depend on.
    pub fn declare(&mut self, spec: StepSpec<S, O>) -> StepHandle {
        let handle = StepHandle::new(self.steps.len(), spec.name().clone());
        self.steps.push(spec);
        handle
    }

    /// Sets the run configuration.
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the steps and builds the workflow.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Definition`] if the graph is malformed.
    pub fn build(self) -> Result<Workflow<S, O>, WorkflowError> {
        let graph = Graph::build(self.steps)?;
        Ok(Workflow {
            name: self.name,
            graph,
            config: self.config,
            events: EventEmitter::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use musubi_core::{BoxError, GraphDefinitionError, StepContext};

    fn constant(name: &str, value: &'static str) -> StepSpec<(), String> {
        StepSpec::from_fn(name, move |_ctx: StepContext<(), String>| async move {
            Ok::<_, BoxError>(value.to_string())
        })
    }

    #[tokio::test]
    async fn test_workflow_success() {
        let workflow = Workflow::builder()
            .name("greeting")
            .step(constant("hello", "hi").start())
            .step(constant("bye", "bye").after("hello").end())
            .build()
            .expect("valid workflow");

        let output = workflow.run(()).await.expect("run succeeds");
        assert_eq!(output.result, "bye");
        assert_eq!(output.end_step, "bye");
        assert_eq!(output.status("hello"), Some(StepStatus::Succeeded));
        assert_eq!(output.output("hello"), Some("hi".to_string()));
        assert_eq!(output.runs("missing"), 0);
    }

    #[tokio::test]
    async fn test_workflow_failure() {
        let workflow = Workflow::builder()
            .step(
                StepSpec::from_fn("failure", |_ctx: StepContext<(), String>| async {
                    Err::<String, BoxError>("Intentional failure".into())
                })
                .end(),
            )
            .build()
            .expect("valid workflow");

        let result = workflow.run(()).await;
        assert!(matches!(result, Err(WorkflowError::Failure(ref e)) if e.step_name == "failure"));
    }

    #[test]
    fn test_workflow_builder_validation() {
        let result = Workflow::builder()
            .step(constant("step", "x").start())
            .build();
        assert!(matches!(
            result,
            Err(WorkflowError::Definition(GraphDefinitionError::MissingEnd))
        ));
    }

    #[test]
    fn test_declare_returns_usable_handles() {
        let mut builder = Workflow::builder();
        let first = builder.declare(constant("first", "1").start());
        let second = builder.declare(constant("second", "2").after(&first));
        let workflow = builder
            .step(constant("last", "3").after(second).end())
            .build()
            .expect("valid workflow");

        assert_eq!(workflow.step_count(), 3);
        assert!(workflow.has_step("second"));
        assert_eq!(
            workflow.step_names().map(StepName::as_str).collect::<Vec<_>>(),
            vec!["first", "second", "last"]
        );
        assert_eq!(workflow.describe().edges.len(), 2);
    }
}

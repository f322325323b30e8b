//! Readiness-driven dispatch loop for a single run.
//!
//! Every terminal outcome of a step (succeeded, skipped, failed) is delivered
//! as an arrival to each successor. OR-joined successors activate on the
//! first successful arrival; AND-joined successors collect one arrival per
//! dependency and activate once every slot is filled. Activations run through
//! a FIFO queue, and each attempt is a task in a [`JoinSet`].

use crate::config::{AbandonPolicy, WorkflowConfig};
use crate::event::{Event, EventEmitter, EventKind};
use crate::workflow::StepSummary;
use musubi_core::{
    BoxError, Graph, JoinCondition, RunState, StepContext, StepExecutionError, StepInputs,
    StepName, StepPanicked, StepStatus, StepTimedOut, Successor, WorkflowError,
};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Terminal outcome of one activation, as seen by a successor.
#[derive(Clone)]
enum Arrival<O> {
    Succeeded(O),
    Skipped,
    /// Index into the run's failure list.
    Failed(usize),
}

enum Activation<O> {
    Run(StepInputs<O>),
    /// An AND dependency failed terminally; fail without running.
    Poison(usize),
}

struct Slot<O> {
    status: StepStatus,
    /// Queued, running or retrying. Cleared when the activation settles.
    busy: bool,
    /// Activation parked while busy; the latest one wins.
    pending: Option<Activation<O>>,
    /// One entry per dependency, AND joins only.
    ledger: Vec<Option<Arrival<O>>>,
    /// Inputs of the current activation, replayed on retry.
    inputs: StepInputs<O>,
    poisoned_by: Option<usize>,
    runs: u32,
    attempts: u32,
    skips: u32,
}

impl<O> Slot<O> {
    fn new(join: JoinCondition, dependencies: usize) -> Self {
        let ledger = match join {
            JoinCondition::All => (0..dependencies).map(|_| None).collect(),
            JoinCondition::Any => Vec::new(),
        };
        Self {
            status: StepStatus::Waiting,
            busy: false,
            pending: None,
            ledger,
            inputs: StepInputs::default(),
            poisoned_by: None,
            runs: 0,
            attempts: 0,
            skips: 0,
        }
    }
}

type AttemptResult<O> = (usize, u32, Result<O, BoxError>);

/// Drives one run of a graph to an end step, a terminal failure or a
/// deadlock.
pub(crate) struct Scheduler<'a, S, O> {
    graph: &'a Graph<S, O>,
    config: &'a WorkflowConfig,
    events: &'a EventEmitter,
    run_id: Uuid,
    state: RunState<S, O>,
    slots: Vec<Slot<O>>,
    queue: VecDeque<(usize, Activation<O>)>,
    tasks: JoinSet<AttemptResult<O>>,
    in_flight: HashMap<task::Id, (usize, u32)>,
    failures: Vec<StepExecutionError>,
    dispatched: usize,
}

impl<'a, S, O> Scheduler<'a, S, O>
where
    S: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        graph: &'a Graph<S, O>,
        config: &'a WorkflowConfig,
        events: &'a EventEmitter,
        run_id: Uuid,
        state: RunState<S, O>,
    ) -> Self {
        let slots = graph
            .nodes()
            .map(|node| Slot::new(node.join(), node.dependencies().len()))
            .collect();
        Self {
            graph,
            config,
            events,
            run_id,
            state,
            slots,
            queue: VecDeque::new(),
            tasks: JoinSet::new(),
            in_flight: HashMap::new(),
            failures: Vec::new(),
            dispatched: 0,
        }
    }

    /// Runs to completion. Returns the index and output of the end step that
    /// finished the run.
    pub(crate) async fn run(&mut self) -> Result<(usize, O), WorkflowError> {
        self.events.emit(&Event::run(self.run_id, EventKind::Start));
        for &index in self.graph.start_steps() {
            self.activate(index, Activation::Run(StepInputs::default()));
        }

        let result = self.drive().await;

        let abandoned = self.tasks.len();
        if abandoned > 0 {
            debug!(abandoned, policy = ?self.config.abandon_policy, "Abandoning in-flight steps");
        }
        match self.config.abandon_policy {
            AbandonPolicy::Detach => self.tasks.detach_all(),
            AbandonPolicy::Abort => self.tasks.abort_all(),
        }
        self.in_flight.clear();

        if let Ok((end, _)) = &result {
            let event = Event::step(self.run_id, EventKind::Finish, self.graph.node(*end).name());
            self.events.emit(&event);
        }
        result
    }

    /// Per-step counters for the run so far.
    pub(crate) fn summaries(&self) -> HashMap<StepName, StepSummary> {
        self.graph
            .nodes()
            .zip(&self.slots)
            .map(|(node, slot)| {
                (
                    node.name().clone(),
                    StepSummary {
                        status: slot.status,
                        runs: slot.runs,
                        attempts: slot.attempts,
                        skips: slot.skips,
                    },
                )
            })
            .collect()
    }

    async fn drive(&mut self) -> Result<(usize, O), WorkflowError> {
        loop {
            while let Some((index, activation)) = self.queue.pop_front() {
                self.dispatch(index, activation)?;
            }

            if let Some(first) = self.failures.first() {
                if !self.end_reachable() {
                    warn!(cause = %first.step_name, "No end step can still be reached");
                    return Err(WorkflowError::Failure(first.clone()));
                }
            }

            let Some(joined) = self.tasks.join_next_with_id().await else {
                return Err(self.quiesced());
            };

            let (index, attempt, outcome) = match joined {
                Ok((id, (index, attempt, outcome))) => {
                    self.in_flight.remove(&id);
                    (index, attempt, outcome)
                }
                Err(error) => match self.in_flight.remove(&error.id()) {
                    Some((index, attempt)) => (index, attempt, Err(panic_error(error))),
                    None => continue,
                },
            };

            if let Some(output) = self.complete(index, attempt, outcome) {
                return Ok((index, output));
            }
        }
    }

    /// Queues an activation, or parks it if the step is busy.
    fn activate(&mut self, index: usize, activation: Activation<O>) {
        let slot = &mut self.slots[index];
        if slot.busy {
            slot.pending = Some(activation);
        } else {
            slot.busy = true;
            self.queue.push_back((index, activation));
        }
    }

    fn dispatch(&mut self, index: usize, activation: Activation<O>) -> Result<(), WorkflowError> {
        let graph = self.graph;
        let node = graph.node(index);
        let inputs = match activation {
            Activation::Run(inputs) => inputs,
            Activation::Poison(failure) => {
                let error = self.failures[failure].clone();
                warn!(
                    step = %node.name(),
                    cause = %error.step_name,
                    "Step '{}' failed because dependency '{}' failed",
                    node.name(),
                    error.step_name
                );
                let slot = &mut self.slots[index];
                slot.status = StepStatus::Failed;
                slot.poisoned_by = Some(failure);
                self.events.emit(
                    &Event::step(self.run_id, EventKind::Error, node.name()).with_error(error),
                );
                self.settle(index, Arrival::Failed(failure));
                return Ok(());
            }
        };

        let runs = match node.guard() {
            Some(guard) => {
                catch_unwind(AssertUnwindSafe(|| self.state.read(|state| guard(state))))
            }
            None => Ok(true),
        };
        let runs = match runs {
            Ok(runs) => runs,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(step = %node.name(), %message, "Guard of step '{}' panicked", node.name());
                let source = Box::new(StepPanicked { message });
                let error = StepExecutionError::new(node.name().clone(), 0, source);
                self.fail(index, error);
                return Ok(());
            }
        };
        if !runs {
            debug!(step = %node.name(), "Guard returned false; skipping");
            let slot = &mut self.slots[index];
            slot.status = StepStatus::Skipped;
            slot.skips += 1;
            self.events
                .emit(&Event::step(self.run_id, EventKind::SkipStep, node.name()));
            self.settle(index, Arrival::Skipped);
            return Ok(());
        }

        if let Some(limit) = self.config.max_steps {
            if self.dispatched >= limit {
                warn!(limit, step = %node.name(), "Step limit reached");
                return Err(WorkflowError::StepLimitExceeded { limit });
            }
        }
        self.dispatched += 1;

        let slot = &mut self.slots[index];
        slot.status = StepStatus::Running;
        slot.runs += 1;
        slot.inputs = inputs;
        self.spawn_attempt(index, 1);
        Ok(())
    }

    fn spawn_attempt(&mut self, index: usize, attempt: u32) {
        let graph = self.graph;
        let node = graph.node(index);
        let name = node.name().clone();
        let action = Arc::clone(node.action());
        let limit = node.timeout().or(self.config.step_timeout);
        let delay = match attempt {
            1 => None,
            n => node.retry_policy().delay_for_attempt(n - 2),
        };

        let slot = &mut self.slots[index];
        slot.attempts += 1;
        let ctx = StepContext::new(name.clone(), attempt, slot.inputs.clone(), self.state.clone());

        self.events.emit(
            &Event::step(self.run_id, EventKind::StartStep, &name).with_attempt(attempt),
        );

        let span = info_span!("step", step = %name, attempt);
        let handle = self.tasks.spawn(
            async move {
                if let Some(delay) = delay.filter(|d| !d.is_zero()) {
                    tokio::time::sleep(delay).await;
                }
                let outcome = match limit {
                    Some(after) => tokio::time::timeout(after, action.execute(ctx))
                        .await
                        .unwrap_or_else(|_| Err(Box::new(StepTimedOut { after }) as BoxError)),
                    None => action.execute(ctx).await,
                };
                (index, attempt, outcome)
            }
            .instrument(span),
        );
        self.in_flight.insert(handle.id(), (index, attempt));
    }

    /// Handles a finished attempt. Returns the output if an end step
    /// succeeded.
    fn complete(&mut self, index: usize, attempt: u32, outcome: Result<O, BoxError>) -> Option<O> {
        let graph = self.graph;
        let node = graph.node(index);
        let name = node.name();

        match outcome {
            Ok(output) => {
                info!(step = %name, attempt, "Step '{}' completed successfully", name);
                self.slots[index].status = StepStatus::Succeeded;
                self.state.record_output(name.clone(), output.clone());
                self.events.emit(
                    &Event::step(self.run_id, EventKind::Success, name).with_attempt(attempt),
                );
                if node.is_end() {
                    return Some(output);
                }
                self.settle(index, Arrival::Succeeded(output));
                None
            }
            Err(source) => {
                let error = StepExecutionError::new(name.clone(), attempt, source);
                let max_retries = node.retry_policy().max_retries();
                if attempt <= max_retries {
                    warn!(
                        step = %name,
                        error = %error.source,
                        "Step '{}' failed, retrying ({}/{})",
                        name,
                        attempt,
                        max_retries
                    );
                    self.events.emit(
                        &Event::step(self.run_id, EventKind::RetryStep, name)
                            .with_attempt(attempt + 1)
                            .with_error(error),
                    );
                    self.spawn_attempt(index, attempt + 1);
                    return None;
                }

                warn!(
                    step = %name,
                    error = %error.source,
                    "Step '{}' failed after {} attempts",
                    name,
                    attempt
                );
                self.fail(index, error);
                None
            }
        }
    }

    /// Records a terminal failure and poisons AND-joined successors.
    fn fail(&mut self, index: usize, error: StepExecutionError) {
        let failure = self.failures.len();
        self.failures.push(error.clone());
        let slot = &mut self.slots[index];
        slot.status = StepStatus::Failed;
        slot.poisoned_by = Some(failure);

        let mut event = Event::step(self.run_id, EventKind::Error, &error.step_name);
        if error.attempt > 0 {
            event = event.with_attempt(error.attempt);
        }
        self.events.emit(&event.with_error(error));
        self.settle(index, Arrival::Failed(failure));
    }

    /// Frees the step, starts any parked activation, then notifies successors.
    fn settle(&mut self, index: usize, arrival: Arrival<O>) {
        let slot = &mut self.slots[index];
        slot.busy = false;
        if let Some(next) = slot.pending.take() {
            self.activate(index, next);
        }
        self.deliver(index, arrival);
    }

    fn deliver(&mut self, from: usize, arrival: Arrival<O>) {
        let graph = self.graph;
        let from_name = graph.node(from).name();

        for Successor { step, position } in graph.successors(from) {
            let target = graph.node(step);
            match (target.join(), &arrival) {
                (JoinCondition::Any, Arrival::Succeeded(output)) => {
                    if self.slots[step].busy {
                        debug!(step = %target.name(), from = %from_name, "Step already active; arrival absorbed");
                        continue;
                    }
                    let inputs = std::iter::once((from_name.clone(), output.clone())).collect();
                    self.activate(step, Activation::Run(inputs));
                }
                (JoinCondition::Any, _) => {}
                (JoinCondition::All, Arrival::Failed(failure)) => {
                    let slot = &mut self.slots[step];
                    if slot.poisoned_by == Some(*failure) {
                        continue;
                    }
                    slot.poisoned_by = Some(*failure);
                    slot.ledger.iter_mut().for_each(|entry| *entry = None);
                    self.activate(step, Activation::Poison(*failure));
                }
                (JoinCondition::All, arrival) => {
                    let slot = &mut self.slots[step];
                    slot.ledger[position] = Some(arrival.clone());
                    if slot.ledger.iter().all(Option::is_some) {
                        let inputs = target
                            .dependencies()
                            .iter()
                            .zip(slot.ledger.iter_mut())
                            .filter_map(|(&dependency, entry)| match entry.take() {
                                Some(Arrival::Succeeded(output)) => {
                                    Some((graph.node(dependency).name().clone(), output))
                                }
                                _ => None,
                            })
                            .collect();
                        self.activate(step, Activation::Run(inputs));
                    }
                }
            }
        }
    }

    /// Whether some end step can still succeed: it is busy, or busy steps can
    /// still satisfy its join, directly or through other steps.
    fn end_reachable(&self) -> bool {
        let graph = self.graph;
        let mut live: Vec<bool> = self.slots.iter().map(|slot| slot.busy).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for index in 0..live.len() {
                if live[index] {
                    continue;
                }
                let node = graph.node(index);
                let ready = match node.join() {
                    JoinCondition::Any => graph.predecessors(index).any(|p| live[p]),
                    JoinCondition::All => {
                        !node.dependencies().is_empty()
                            && node
                                .dependencies()
                                .iter()
                                .zip(&self.slots[index].ledger)
                                .all(|(&dependency, entry)| entry.is_some() || live[dependency])
                    }
                };
                if ready {
                    live[index] = true;
                    changed = true;
                }
            }
        }
        graph.end_steps().iter().any(|&end| live[end])
    }

    /// Builds the error for a run with nothing queued and nothing in flight.
    fn quiesced(&self) -> WorkflowError {
        if let Some(first) = self.failures.first() {
            return WorkflowError::Failure(first.clone());
        }

        let mut stalled = self.names_where(|_, slot| slot.ledger.iter().any(Option::is_some));
        if stalled.is_empty() {
            stalled = self.names_where(|_, slot| slot.status == StepStatus::Waiting);
        }
        if stalled.is_empty() {
            stalled = self.names_where(|i, _| self.graph.node(i).is_end());
        }
        warn!(stalled = ?stalled, "Workflow deadlocked");
        WorkflowError::Deadlock { stalled }
    }

    fn names_where(&self, pick: impl Fn(usize, &Slot<O>) -> bool) -> Vec<StepName> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, slot)| pick(*i, *slot))
            .map(|(i, _)| self.graph.node(i).name().clone())
            .collect()
    }
}

fn panic_error(error: JoinError) -> BoxError {
    if !error.is_panic() {
        return Box::new(error);
    }
    let message = panic_message(error.into_panic().as_ref());
    Box::new(StepPanicked { message })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use musubi_core::StepSpec;
    use std::sync::Mutex;

    type Spec = StepSpec<Vec<String>, u32>;

    fn record(name: &'static str, value: u32) -> Spec {
        StepSpec::from_fn(name, move |ctx: StepContext<Vec<String>, u32>| async move {
            ctx.update(|log| log.push(name.to_string()));
            Ok::<_, BoxError>(value + ctx.inputs().iter().map(|(_, v)| *v).sum::<u32>())
        })
    }

    fn delayed(name: &'static str, value: u32, millis: u64) -> Spec {
        StepSpec::from_fn(name, move |ctx: StepContext<Vec<String>, u32>| async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            ctx.update(|log| log.push(name.to_string()));
            Ok::<_, BoxError>(value + ctx.inputs().iter().map(|(_, v)| *v).sum::<u32>())
        })
    }

    async fn run(
        specs: Vec<Spec>,
        config: WorkflowConfig,
    ) -> (Result<(usize, u32), WorkflowError>, HashMap<StepName, StepSummary>, Vec<String>) {
        let graph = Graph::build(specs).expect("valid graph");
        let events = EventEmitter::new();
        let state = RunState::new(Vec::new());
        let mut scheduler = Scheduler::new(&graph, &config, &events, Uuid::new_v4(), state.clone());
        let result = scheduler.run().await;
        (result, scheduler.summaries(), state.snapshot())
    }

    #[tokio::test]
    async fn test_and_join_collects_inputs_in_dependency_order() {
        let (result, _, log) = run(
            vec![
                record("a", 1).start(),
                record("b", 10).after("a"),
                record("c", 100).after("a"),
                record("d", 0).after_all(["c", "b"]).end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        // b = 11, c = 101, d = 112
        assert_eq!(result.ok(), Some((3, 112)));
        assert_eq!(log.first().map(String::as_str), Some("a"));
        assert_eq!(log.last().map(String::as_str), Some("d"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_or_join_absorbs_arrivals_while_running() {
        let (result, summaries, _) = run(
            vec![
                record("a", 1).start(),
                delayed("b", 2, 0).after("a"),
                delayed("c", 3, 10).after("a"),
                delayed("join", 0, 50).after_any(["b", "c"]),
                record("end", 0).after("join").end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        // join starts on b; c lands while join is still running
        assert_eq!(result.ok(), Some((4, 3)));
        assert_eq!(summaries[&StepName::new("join")].runs, 1);
        assert_eq!(summaries[&StepName::new("c")].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_skip_satisfies_and_join_without_input() {
        let (result, summaries, log) = run(
            vec![
                record("a", 1).start(),
                record("b", 10).after("a").when(|_| false),
                record("c", 100).after("a"),
                record("d", 0).after_all(["b", "c"]).end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        assert_eq!(result.ok(), Some((3, 101)));
        assert_eq!(summaries[&StepName::new("b")].status, StepStatus::Skipped);
        assert_eq!(summaries[&StepName::new("b")].attempts, 0);
        assert!(!log.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_failure_poisons_and_dependents() {
        let failing: Spec = StepSpec::from_fn("fail", |_ctx: StepContext<Vec<String>, u32>| async {
            Err::<u32, BoxError>("nope".into())
        });
        let (result, summaries, log) = run(
            vec![
                record("a", 1).start(),
                failing.after("a"),
                record("b", 2).after("fail"),
                record("end", 0).after("b").end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        match result {
            Err(WorkflowError::Failure(error)) => {
                assert_eq!(error.step_name, "fail");
                assert_eq!(error.attempt, 1);
            }
            other => panic!("expected failure, got {:?}", other.map(|(i, _)| i)),
        }
        assert_eq!(summaries[&StepName::new("b")].status, StepStatus::Failed);
        assert_eq!(summaries[&StepName::new("b")].runs, 0);
        assert_eq!(summaries[&StepName::new("end")].status, StepStatus::Failed);
        assert_eq!(log, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_poison_does_not_cycle() {
        let failing: Spec = StepSpec::from_fn("a", |_ctx: StepContext<Vec<String>, u32>| async {
            Err::<u32, BoxError>("nope".into())
        });
        let (result, summaries, _) = run(
            vec![
                failing.after("b").start(),
                record("b", 0).after("a"),
                record("end", 0).after("b").end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(WorkflowError::Failure(_))));
        assert_eq!(summaries[&StepName::new("a")].attempts, 1);
    }

    #[tokio::test]
    async fn test_deadlock_names_partial_and_joins() {
        let (result, _, _) = run(
            vec![
                record("a", 1).start(),
                record("never", 0).after("missing_trigger"),
                record("missing_trigger", 0).after("never"),
                record("end", 0).after_all(["a", "never"]).end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        match result {
            Err(WorkflowError::Deadlock { stalled }) => {
                assert_eq!(stalled, vec![StepName::new("end")]);
            }
            other => panic!("expected deadlock, got {:?}", other.map(|(i, _)| i)),
        }
    }

    #[tokio::test]
    async fn test_step_limit_stops_runaway_loop() {
        let (result, _, _) = run(
            vec![
                record("start", 0).start(),
                record("spin", 0).after_any(["start", "spin"]),
                record("end", 0).after("spin").when(|_| false).end(),
            ],
            WorkflowConfig::default().with_max_steps(10),
        )
        .await;

        assert!(matches!(
            result,
            Err(WorkflowError::StepLimitExceeded { limit: 10 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_ends_run_when_no_end_step_is_reachable() {
        let failing: Spec = StepSpec::from_fn("broken", |_ctx: StepContext<Vec<String>, u32>| async {
            Err::<u32, BoxError>("down".into())
        });
        let started = tokio::time::Instant::now();
        let (result, summaries, _) = run(
            vec![
                record("start", 0).start(),
                failing.after("start"),
                record("end", 0).after("broken").end(),
                delayed("audit", 0, 600_000).after("start"),
                delayed("heartbeat", 0, 1_000).after_any(["start", "heartbeat"]),
            ],
            WorkflowConfig::default(),
        )
        .await;

        match result {
            Err(WorkflowError::Failure(error)) => assert_eq!(error.step_name, "broken"),
            other => panic!("expected failure, got {:?}", other.map(|(i, _)| i)),
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert_eq!(summaries[&StepName::new("audit")].status, StepStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_waits_while_an_or_path_can_still_reach_the_end() {
        let failing: Spec = StepSpec::from_fn("primary", |_ctx: StepContext<Vec<String>, u32>| async {
            Err::<u32, BoxError>("down".into())
        });
        let (result, summaries, _) = run(
            vec![
                record("start", 0).start(),
                failing.after("start"),
                delayed("slow", 7, 100).after("start"),
                delayed("backup", 0, 100).after("slow"),
                record("end", 0).after_any(["primary", "backup"]).end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        assert_eq!(result.ok(), Some((4, 7)));
        assert_eq!(summaries[&StepName::new("primary")].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn test_panicking_guard_fails_the_step() {
        let (result, summaries, log) = run(
            vec![
                record("start", 0).start(),
                record("end", 0)
                    .after("start")
                    .when(|_| panic!("guard bug"))
                    .end(),
            ],
            WorkflowConfig::default(),
        )
        .await;

        match result {
            Err(WorkflowError::Failure(error)) => {
                assert_eq!(error.step_name, "end");
                assert_eq!(error.attempt, 0);
                assert_eq!(
                    error.source.downcast_ref::<StepPanicked>(),
                    Some(&StepPanicked {
                        message: "guard bug".to_string()
                    })
                );
            }
            other => panic!("expected failure, got {:?}", other.map(|(i, _)| i)),
        }
        assert_eq!(summaries[&StepName::new("end")].status, StepStatus::Failed);
        assert_eq!(summaries[&StepName::new("end")].attempts, 0);
        assert_eq!(log, vec!["start".to_string()]);
    }

    #[tokio::test]
    async fn test_panicking_step_is_a_failed_attempt() {
        let attempts = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&attempts);
        let panicky: Spec = StepSpec::from_fn("panicky", move |_ctx: StepContext<Vec<String>, u32>| {
            let counter = Arc::clone(&counter);
            async move {
                let n = {
                    let mut guard = counter.lock().expect("counter lock");
                    *guard += 1;
                    *guard
                };
                if n < 2 {
                    panic!("first attempt explodes");
                }
                Ok::<_, BoxError>(5)
            }
        });
        let (result, summaries, _) = run(
            vec![panicky.retry(1).start().end()],
            WorkflowConfig::default(),
        )
        .await;

        assert_eq!(result.ok(), Some((0, 5)));
        assert_eq!(summaries[&StepName::new("panicky")].attempts, 2);
    }
}

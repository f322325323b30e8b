//! Step declarations and the validated dependency graph built from them.

use crate::error::{BoxError, GraphDefinitionError};
use crate::step::{FnStep, JoinCondition, RetryPolicy, Step, StepConfig, StepContext, StepName, StepRole};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Predicate over the run state deciding whether an activated step runs.
pub type Guard<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Reference to a step returned when it is declared.
///
/// Lets later declarations depend on the step without repeating its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepHandle {
    index: usize,
    name: StepName,
}

impl StepHandle {
    /// Creates a handle for the step declared at `index`.
    pub fn new(index: usize, name: StepName) -> Self {
        Self { index, name }
    }

    /// Name of the referenced step.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Declaration position of the referenced step.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// A dependency, either by name or by handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRef {
    /// Resolved by looking the name up among declared steps.
    ByName(StepName),
    /// Resolved through the handle's declaration position.
    ByStep(StepHandle),
}

impl DependencyRef {
    /// Name the reference points at.
    pub fn name(&self) -> &StepName {
        match self {
            DependencyRef::ByName(name) => name,
            DependencyRef::ByStep(handle) => handle.name(),
        }
    }
}

impl From<&str> for DependencyRef {
    fn from(name: &str) -> Self {
        DependencyRef::ByName(StepName::new(name))
    }
}

impl From<String> for DependencyRef {
    fn from(name: String) -> Self {
        DependencyRef::ByName(StepName::from(name))
    }
}

impl From<StepName> for DependencyRef {
    fn from(name: StepName) -> Self {
        DependencyRef::ByName(name)
    }
}

impl From<StepHandle> for DependencyRef {
    fn from(handle: StepHandle) -> Self {
        DependencyRef::ByStep(handle)
    }
}

impl From<&StepHandle> for DependencyRef {
    fn from(handle: &StepHandle) -> Self {
        DependencyRef::ByStep(handle.clone())
    }
}

/// Declaration of one step: its action plus scheduling metadata.
///
/// # Examples
///
/// ```
/// use musubi_core::{BoxError, StepContext, StepSpec};
///
/// #[derive(Default)]
/// struct Review {
///     approved: bool,
/// }
///
/// let spec: StepSpec<Review, String> = StepSpec::from_fn("publish", |_ctx: StepContext<Review, String>| async {
///     Ok::<_, BoxError>("published".to_string())
/// })
/// .after_any(["review", "override"])
/// .when(|review: &Review| review.approved)
/// .retry(2)
/// .end();
///
/// assert_eq!(spec.name().as_str(), "publish");
/// ```
pub struct StepSpec<S, O> {
    name: StepName,
    action: Arc<dyn Step<S, O>>,
    dependencies: Vec<DependencyRef>,
    join: JoinCondition,
    guard: Option<Guard<S>>,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    role: StepRole,
}

impl<S, O> fmt::Debug for StepSpec<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("join", &self.join)
            .field("guarded", &self.guard.is_some())
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl<S, O> StepSpec<S, O> {
    /// Declares a step backed by a [`Step`] implementation.
    pub fn new(name: impl Into<StepName>, step: impl Step<S, O> + 'static) -> Self {
        Self::from_arc(name, Arc::new(step))
    }

    /// Declares a step backed by a shared [`Step`].
    pub fn from_arc(name: impl Into<StepName>, action: Arc<dyn Step<S, O>>) -> Self {
        Self {
            name: name.into(),
            action,
            dependencies: Vec::new(),
            join: JoinCondition::All,
            guard: None,
            retry_policy: RetryPolicy::None,
            timeout: None,
            role: StepRole::Normal,
        }
    }

    /// Declares a step backed by an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<StepName>, f: F) -> Self
    where
        S: Send + Sync + 'static,
        O: Send + Sync + 'static,
        F: Fn(StepContext<S, O>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, BoxError>> + Send + 'static,
    {
        Self::new(name, FnStep::new(f))
    }

    /// Adds one dependency, keeping the current join condition.
    pub fn after(mut self, dependency: impl Into<DependencyRef>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Adds dependencies that must all complete (AND join).
    pub fn after_all<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DependencyRef>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self.join = JoinCondition::All;
        self
    }

    /// Adds dependencies of which one success suffices (OR join).
    pub fn after_any<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DependencyRef>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self.join = JoinCondition::Any;
        self
    }

    /// Sets the join condition explicitly.
    pub fn join_condition(mut self, join: JoinCondition) -> Self {
        self.join = join;
        self
    }

    /// Gates the step on a predicate over the run state. When it returns
    /// `false` at activation the step is skipped.
    pub fn when(mut self, guard: impl Fn(&S) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Allows `retries` additional immediate attempts after a failure.
    pub fn retry(mut self, retries: u32) -> Self {
        self.retry_policy = RetryPolicy::immediate(retries);
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Bounds each attempt; an attempt that runs out of time counts as failed.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Applies a [`StepConfig`] bundle.
    pub fn config(mut self, config: StepConfig) -> Self {
        self.timeout = config.timeout;
        self.retry_policy = config.retry_policy;
        self
    }

    /// Sets the role.
    pub fn role(mut self, role: StepRole) -> Self {
        self.role = role;
        self
    }

    /// Marks the step as a start step.
    pub fn start(self) -> Self {
        self.role(StepRole::Start)
    }

    /// Marks the step as an end step.
    pub fn end(self) -> Self {
        self.role(StepRole::End)
    }

    /// Marks the step as a fork point.
    pub fn fork(self) -> Self {
        self.role(StepRole::Fork)
    }

    /// Marks the step as a join point.
    pub fn join(self) -> Self {
        self.role(StepRole::Join)
    }

    /// The declared name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// The declared dependencies, in order.
    pub fn dependencies(&self) -> &[DependencyRef] {
        &self.dependencies
    }
}

/// A validated step inside a [`Graph`].
pub struct Node<S, O> {
    name: StepName,
    action: Arc<dyn Step<S, O>>,
    dependencies: Vec<usize>,
    join: JoinCondition,
    guard: Option<Guard<S>>,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    role: StepRole,
}

impl<S, O> Node<S, O> {
    /// Step name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// The step action.
    pub fn action(&self) -> &Arc<dyn Step<S, O>> {
        &self.action
    }

    /// Indices of the dependencies, in declared order without duplicates.
    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    /// Join condition over the dependencies.
    pub fn join(&self) -> JoinCondition {
        self.join
    }

    /// Guard predicate, if any.
    pub fn guard(&self) -> Option<&Guard<S>> {
        self.guard.as_ref()
    }

    /// Retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Per-attempt timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Declared role.
    pub fn role(&self) -> StepRole {
        self.role
    }

    /// Returns `true` if the step is seeded when a run begins.
    pub fn is_start(&self) -> bool {
        self.role == StepRole::Start || self.dependencies.is_empty()
    }

    /// Returns `true` if the step terminates the run on success.
    pub fn is_end(&self) -> bool {
        self.role == StepRole::End
    }
}

/// A directed "runs after" edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// The dependency.
    pub from: StepName,
    /// The dependent step.
    pub to: StepName,
    /// Join condition of the dependent step.
    pub condition: JoinCondition,
}

/// Successor entry: the dependent step and this dependency's position in its
/// dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Successor {
    /// Index of the dependent step.
    pub step: usize,
    /// Position of the dependency within the dependent's list.
    pub position: usize,
}

/// Validated, immutable dependency graph.
///
/// Steps are stored in declaration order, so a step's index is also its
/// position in the builder. Each edge runs from a dependency to its dependent
/// and carries the dependency's position in the dependent's list.
pub struct Graph<S, O> {
    steps: DiGraph<Node<S, O>, usize>,
    index: HashMap<StepName, NodeIndex>,
    starts: Vec<usize>,
    ends: Vec<usize>,
}

impl<S, O> fmt::Debug for Graph<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("steps", &self.nodes().map(Node::name).collect::<Vec<_>>())
            .field("edges", &self.edges())
            .finish()
    }
}

impl<S, O> Graph<S, O> {
    /// Validates the declarations and builds the graph.
    ///
    /// # Errors
    ///
    /// Returns [`GraphDefinitionError`] naming the offending step when a name
    /// is empty or duplicated, a dependency is unknown, a step AND-depends on
    /// itself, or no start or end step exists.
    pub fn build(specs: Vec<StepSpec<S, O>>) -> Result<Self, GraphDefinitionError> {
        let mut positions = HashMap::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            if spec.name.as_str().is_empty() {
                return Err(GraphDefinitionError::EmptyName);
            }
            if positions.insert(spec.name.clone(), position).is_some() {
                return Err(GraphDefinitionError::DuplicateStep(spec.name.clone()));
            }
        }

        let mut resolved = Vec::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            let mut dependencies: Vec<usize> = Vec::with_capacity(spec.dependencies.len());
            for dependency in &spec.dependencies {
                let target = resolve(&positions, &specs, &spec.name, dependency)?;
                if target == position && spec.join == JoinCondition::All {
                    return Err(GraphDefinitionError::SelfDependency(spec.name.clone()));
                }
                if !dependencies.contains(&target) {
                    dependencies.push(target);
                }
            }
            resolved.push(dependencies);
        }

        let edge_count = resolved.iter().map(Vec::len).sum();
        let mut steps = DiGraph::with_capacity(specs.len(), edge_count);
        let mut links = Vec::with_capacity(edge_count);
        for (spec, dependencies) in specs.into_iter().zip(resolved) {
            let step = NodeIndex::new(steps.node_count());
            links.extend(
                dependencies
                    .iter()
                    .enumerate()
                    .map(|(position, &dependency)| (NodeIndex::new(dependency), step, position)),
            );
            steps.add_node(Node {
                name: spec.name,
                action: spec.action,
                dependencies,
                join: spec.join,
                guard: spec.guard,
                retry_policy: spec.retry_policy,
                timeout: spec.timeout,
                role: spec.role,
            });
        }
        for (dependency, step, position) in links {
            steps.add_edge(dependency, step, position);
        }

        let starts: Vec<usize> = steps
            .node_indices()
            .filter(|&i| steps[i].is_start())
            .map(|i| i.index())
            .collect();
        if starts.is_empty() {
            return Err(GraphDefinitionError::MissingStart);
        }
        let ends: Vec<usize> = steps
            .node_indices()
            .filter(|&i| steps[i].is_end())
            .map(|i| i.index())
            .collect();
        if ends.is_empty() {
            return Err(GraphDefinitionError::MissingEnd);
        }

        let index = positions
            .into_iter()
            .map(|(name, position)| (name, NodeIndex::new(position)))
            .collect();

        Ok(Self {
            steps,
            index,
            starts,
            ends,
        })
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.node_count()
    }

    /// Returns `true` if the graph has no steps. A built graph never is.
    pub fn is_empty(&self) -> bool {
        self.steps.node_count() == 0
    }

    /// All steps in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node<S, O>> + '_ {
        self.steps.raw_nodes().iter().map(|node| &node.weight)
    }

    /// Step at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn node(&self, index: usize) -> &Node<S, O> {
        &self.steps[NodeIndex::new(index)]
    }

    /// Index of the named step.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).map(|i| i.index())
    }

    /// Looks a step up by name.
    pub fn get(&self, name: &str) -> Option<&Node<S, O>> {
        self.index.get(name).map(|&i| &self.steps[i])
    }

    /// Steps that run after the given one, ordered by dependent index.
    pub fn successors(&self, index: usize) -> Vec<Successor> {
        let mut successors: Vec<Successor> = self
            .steps
            .edges_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(|edge| Successor {
                step: edge.target().index(),
                position: *edge.weight(),
            })
            .collect();
        successors.sort_unstable_by_key(|s| (s.step, s.position));
        successors
    }

    /// Steps the given one depends on, in no particular order.
    pub fn predecessors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.steps
            .neighbors_directed(NodeIndex::new(index), Direction::Incoming)
            .map(|i| i.index())
    }

    /// Steps seeded when a run begins.
    pub fn start_steps(&self) -> &[usize] {
        &self.starts
    }

    /// Steps that terminate a run on success.
    pub fn end_steps(&self) -> &[usize] {
        &self.ends
    }

    /// All edges, grouped by dependent step in declaration order.
    pub fn edges(&self) -> Vec<Edge> {
        self.steps
            .edge_references()
            .map(|edge| {
                let to = &self.steps[edge.target()];
                Edge {
                    from: self.steps[edge.source()].name.clone(),
                    to: to.name.clone(),
                    condition: to.join,
                }
            })
            .collect()
    }

    /// Serializable structural summary of the graph.
    pub fn describe(&self) -> GraphDescription {
        GraphDescription {
            steps: self
                .nodes()
                .map(|node| StepDescription {
                    name: node.name.clone(),
                    role: node.role,
                    join: node.join,
                    dependencies: node
                        .dependencies
                        .iter()
                        .map(|&d| self.node(d).name.clone())
                        .collect(),
                    retry_limit: node.retry_policy.max_retries(),
                    guarded: node.guard.is_some(),
                })
                .collect(),
            edges: self.edges(),
        }
    }

    /// Renders the graph as a Mermaid flowchart.
    ///
    /// AND edges are solid, OR edges dotted; start and end steps are drawn as
    /// stadiums, forks and joins as hexagons.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("flowchart TD\n");
        for (i, node) in self.nodes().enumerate() {
            let label = node.name.as_str().replace('"', "'");
            let shape = match node.role {
                StepRole::Start | StepRole::End => format!("([\"{label}\"])"),
                StepRole::Fork | StepRole::Join => format!("{{{{\"{label}\"}}}}"),
                StepRole::Normal => format!("[\"{label}\"]"),
            };
            out.push_str(&format!("    s{i}{shape}\n"));
        }
        for edge in self.steps.edge_references() {
            let arrow = match self.steps[edge.target()].join {
                JoinCondition::All => "-->",
                JoinCondition::Any => "-.->",
            };
            out.push_str(&format!(
                "    s{} {arrow} s{}\n",
                edge.source().index(),
                edge.target().index()
            ));
        }
        out
    }
}

fn resolve<S, O>(
    positions: &HashMap<StepName, usize>,
    specs: &[StepSpec<S, O>],
    step: &StepName,
    dependency: &DependencyRef,
) -> Result<usize, GraphDefinitionError> {
    let found = match dependency {
        DependencyRef::ByName(name) => positions.get(name).copied(),
        DependencyRef::ByStep(handle) => specs
            .get(handle.index())
            .filter(|spec| spec.name == *handle.name())
            .map(|_| handle.index()),
    };
    found.ok_or_else(|| GraphDefinitionError::UnknownDependency {
        step: step.clone(),
        dependency: dependency.name().clone(),
    })
}

/// Structural summary of a graph; equal for graphs built from equal
/// declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Steps in declaration order.
    pub steps: Vec<StepDescription>,
    /// All edges.
    pub edges: Vec<Edge>,
}

/// Structural summary of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescription {
    /// Step name.
    pub name: StepName,
    /// Declared role.
    pub role: StepRole,
    /// Join condition.
    pub join: JoinCondition,
    /// Dependencies in declared order.
    pub dependencies: Vec<StepName>,
    /// Additional attempts allowed after a failure.
    pub retry_limit: u32,
    /// Whether a guard gates the step.
    pub guarded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    type Spec = StepSpec<(), u32>;

    fn step(name: &str) -> Spec {
        StepSpec::from_fn(name, |_ctx: StepContext<(), u32>| async { Ok::<_, BoxError>(1) })
    }

    fn linear() -> Vec<Spec> {
        vec![
            step("a").start(),
            step("b").after("a"),
            step("c").after("b").end(),
        ]
    }

    #[test]
    fn test_build_linear_graph() {
        let graph = Graph::build(linear()).expect("valid graph");

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.start_steps(), &[0]);
        assert_eq!(graph.end_steps(), &[2]);
        assert_eq!(graph.successors(0), vec![Successor { step: 1, position: 0 }]);
        assert_eq!(graph.position("c"), Some(2));
        assert!(graph.get("missing").is_none());
        assert_eq!(
            graph.edges(),
            vec![
                Edge {
                    from: "a".into(),
                    to: "b".into(),
                    condition: JoinCondition::All
                },
                Edge {
                    from: "b".into(),
                    to: "c".into(),
                    condition: JoinCondition::All
                },
            ]
        );
    }

    #[test]
    fn test_unknown_dependency_is_named() {
        let result = Graph::build(vec![
            step("A").start(),
            step("B").after("C").end(),
        ]);

        let error = result.err().expect("dangling dependency");
        assert_eq!(
            error,
            GraphDefinitionError::UnknownDependency {
                step: "B".into(),
                dependency: "C".into()
            }
        );
        assert!(error.to_string().contains("'C'"));
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let result = Graph::build(vec![step("a").start(), step("a").end()]);
        assert_eq!(
            result.err(),
            Some(GraphDefinitionError::DuplicateStep("a".into()))
        );

        let result = Graph::build(vec![step("").start().end()]);
        assert_eq!(result.err(), Some(GraphDefinitionError::EmptyName));
    }

    #[test]
    fn test_self_dependency_only_allowed_for_or_joins() {
        let result = Graph::build(vec![
            step("start").start(),
            step("loop").after_all(["start", "loop"]),
            step("end").after("loop").end(),
        ]);
        assert_eq!(
            result.err(),
            Some(GraphDefinitionError::SelfDependency("loop".into()))
        );

        let graph = Graph::build(vec![
            step("start").start(),
            step("loop").after_any(["start", "loop"]),
            step("end").after("loop").end(),
        ])
        .expect("OR self-loop is valid");
        assert!(graph
            .successors(1)
            .contains(&Successor { step: 1, position: 1 }));
    }

    #[test]
    fn test_successors_and_predecessors_follow_edges() {
        let graph = Graph::build(vec![
            step("a").start(),
            step("b").after("a"),
            step("c").after_all(["b", "a"]).end(),
        ])
        .expect("valid graph");

        assert_eq!(
            graph.successors(0),
            vec![
                Successor { step: 1, position: 0 },
                Successor { step: 2, position: 1 },
            ]
        );
        let mut predecessors: Vec<usize> = graph.predecessors(2).collect();
        predecessors.sort_unstable();
        assert_eq!(predecessors, vec![0, 1]);
        assert_eq!(graph.predecessors(0).count(), 0);
    }

    #[test]
    fn test_missing_start_and_end() {
        let result = Graph::build(vec![step("a").after("b"), step("b").after("a").end()]);
        assert_eq!(result.err(), Some(GraphDefinitionError::MissingStart));

        let result = Graph::build(vec![step("a").start(), step("b").after("a")]);
        assert_eq!(result.err(), Some(GraphDefinitionError::MissingEnd));

        let result = Graph::<(), u32>::build(Vec::new());
        assert_eq!(result.err(), Some(GraphDefinitionError::MissingStart));
    }

    #[test]
    fn test_steps_without_dependencies_are_start_steps() {
        let graph = Graph::build(vec![step("only").end()]).expect("single step workflow");
        assert_eq!(graph.start_steps(), &[0]);
        assert_eq!(graph.end_steps(), &[0]);
    }

    #[test]
    fn test_handles_resolve_to_their_step() {
        let a = StepHandle::new(0, "a".into());
        let graph = Graph::build(vec![step("a").start(), step("b").after(&a).end()])
            .expect("handle dependency");
        assert_eq!(graph.node(1).dependencies(), &[0]);

        let foreign = StepHandle::new(0, "elsewhere".into());
        let result = Graph::build(vec![step("a").start(), step("b").after(foreign).end()]);
        assert_eq!(
            result.err(),
            Some(GraphDefinitionError::UnknownDependency {
                step: "b".into(),
                dependency: "elsewhere".into()
            })
        );
    }

    #[test]
    fn test_duplicate_dependencies_collapse() {
        let graph = Graph::build(vec![
            step("a").start(),
            step("b").after("a").after("a").end(),
        ])
        .expect("valid graph");
        assert_eq!(graph.node(1).dependencies(), &[0]);
        assert_eq!(graph.successors(0).len(), 1);
    }

    #[test]
    fn test_rebuilding_yields_identical_structure() {
        let first = Graph::build(linear()).expect("valid graph").describe();
        let second = Graph::build(linear()).expect("valid graph").describe();
        assert_eq!(first, second);
        assert_eq!(first.steps[2].dependencies, vec![StepName::new("b")]);
    }

    #[test]
    fn test_description_reports_metadata() {
        let graph = Graph::build(vec![
            step("a").start().fork(),
            step("b").after("a").when(|_| true).retry(3),
            step("c").after("a"),
            step("d").after_any(["b", "c"]).end(),
        ])
        .expect("valid graph");

        let description = graph.describe();
        // later role calls replace earlier ones; `a` has no deps so it still starts runs
        assert_eq!(description.steps[0].role, StepRole::Fork);
        assert_eq!(graph.start_steps(), &[0]);
        assert!(description.steps[1].guarded);
        assert_eq!(description.steps[1].retry_limit, 3);
        assert_eq!(description.steps[3].join, JoinCondition::Any);
    }

    #[test]
    fn test_mermaid_export() {
        let graph = Graph::build(vec![
            step("a").start(),
            step("b").after("a"),
            step("c").after_any(["a", "b"]).end(),
        ])
        .expect("valid graph");

        let diagram = graph.to_mermaid();
        assert!(diagram.starts_with("flowchart TD\n"));
        assert!(diagram.contains("    s0([\"a\"])\n"));
        assert!(diagram.contains("    s1[\"b\"]\n"));
        assert!(diagram.contains("    s0 --> s1\n"));
        assert!(diagram.contains("    s1 -.-> s2\n"));
    }
}

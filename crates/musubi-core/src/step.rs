//! Step trait and related types.

use crate::error::BoxError;
use crate::state::RunState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Type-safe step name wrapper.
///
/// # Examples
///
/// ```
/// use musubi_core::StepName;
///
/// let name = StepName::new("summarize");
/// assert_eq!(name.as_str(), "summarize");
///
/// let name: StepName = "review".into();
/// assert_eq!(name, "review");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for StepName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// How a step's dependencies combine into readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinCondition {
    /// Every dependency must have completed (succeeded or been skipped).
    #[default]
    All,
    /// A single succeeded dependency is enough.
    Any,
}

impl fmt::Display for JoinCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinCondition::All => write!(f, "and"),
            JoinCondition::Any => write!(f, "or"),
        }
    }
}

/// Role annotation of a step.
///
/// Only `Start` and `End` change scheduling: start steps are seeded when a run
/// begins and the first end step to succeed terminates the run. `Fork` and
/// `Join` are bookkeeping for validation and diagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRole {
    /// Seeded at run start.
    Start,
    /// Ordinary step.
    #[default]
    Normal,
    /// Several successors branch off this step.
    Fork,
    /// Several branches merge into this step.
    Join,
    /// Terminates the run on success; its output is the run result.
    End,
}

impl fmt::Display for StepRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StepRole::Start => "start",
            StepRole::Normal => "normal",
            StepRole::Fork => "fork",
            StepRole::Join => "join",
            StepRole::End => "end",
        };
        f.write_str(label)
    }
}

/// Lifecycle status of a step within one run.
///
/// `Waiting -> Running -> {Succeeded, Skipped, Failed}`. A failed attempt with
/// retry budget left goes back to `Running` without becoming `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not activated yet.
    #[default]
    Waiting,
    /// An attempt is in flight.
    Running,
    /// Last activation returned a value.
    Succeeded,
    /// Last activation was gated off by the step's guard.
    Skipped,
    /// Last activation exhausted its retries or was poisoned by a failed
    /// AND dependency.
    Failed,
}

impl StepStatus {
    /// Returns `true` for `Succeeded`, `Skipped` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Skipped | StepStatus::Failed
        )
    }
}

/// Retry policy for step execution.
///
/// # Examples
///
/// ```
/// use musubi_core::RetryPolicy;
/// use std::time::Duration;
///
/// // No retry (default)
/// let policy = RetryPolicy::None;
/// assert_eq!(policy.max_retries(), 0);
///
/// // Retry 3 times with 1 second between attempts
/// let policy = RetryPolicy::fixed(3, Duration::from_secs(1));
///
/// // Retry 5 times starting at 100ms, doubling each time
/// let policy = RetryPolicy::exponential(5, Duration::from_millis(100));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RetryPolicy {
    /// No retry - fail immediately on error.
    #[default]
    None,
    /// Fixed delay between retries.
    Fixed {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Delay between each retry.
        delay: Duration,
    },
    /// Exponential backoff with configurable parameters.
    ExponentialBackoff {
        /// Maximum number of retry attempts.
        max_retries: u32,
        /// Initial delay before first retry.
        initial_delay: Duration,
        /// Maximum delay cap.
        max_delay: Duration,
        /// Multiplier for each retry.
        multiplier: u32,
    },
}

/// Error returned when [`RetryPolicy`] configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RetryPolicyError(pub &'static str);

impl RetryPolicy {
    /// Retries `max_retries` times immediately, with no delay.
    pub fn immediate(max_retries: u32) -> Self {
        Self::fixed(max_retries, Duration::ZERO)
    }

    /// Creates a fixed retry policy.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        if max_retries == 0 {
            return RetryPolicy::None;
        }
        RetryPolicy::Fixed { max_retries, delay }
    }

    /// Creates an exponential backoff retry policy (`multiplier=2`,
    /// `max_delay=60s`).
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(60),
            multiplier: 2,
        }
    }

    /// Creates an exponential backoff retry policy with custom settings.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError`] if `multiplier` is 0 or greater than 10,
    /// or if `max_delay` is less than `initial_delay`.
    pub fn exponential_backoff(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: u32,
    ) -> Result<Self, RetryPolicyError> {
        if multiplier == 0 {
            return Err(RetryPolicyError("multiplier must be greater than 0"));
        }
        if multiplier > 10 {
            return Err(RetryPolicyError(
                "multiplier must be 10 or less to avoid overflow",
            ));
        }
        if max_delay < initial_delay {
            return Err(RetryPolicyError("max_delay must be >= initial_delay"));
        }
        Ok(RetryPolicy::ExponentialBackoff {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        })
    }

    /// Number of additional attempts allowed after the first failure.
    pub fn max_retries(&self) -> u32 {
        match self {
            RetryPolicy::None => 0,
            RetryPolicy::Fixed { max_retries, .. } => *max_retries,
            RetryPolicy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }

    /// Delay before the given retry. Retries are 0-indexed: the delay before
    /// the second attempt is `delay_for_attempt(0)`.
    pub fn delay_for_attempt(&self, retry: u32) -> Option<Duration> {
        match self {
            RetryPolicy::None => None,
            RetryPolicy::Fixed { delay, .. } => Some(*delay),
            RetryPolicy::ExponentialBackoff {
                initial_delay,
                max_delay,
                multiplier,
                ..
            } => {
                let factor = (*multiplier as u64).saturating_pow(retry);
                let delay = (initial_delay.as_millis() as u64).saturating_mul(factor);
                Some(Duration::from_millis(
                    delay.min(max_delay.as_millis() as u64),
                ))
            }
        }
    }
}

/// Timeout and retry settings that can be applied to a step declaration.
///
/// The engine imposes no timeout of its own; `timeout` is an opt-in wrapper
/// around the step action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepConfig {
    /// Maximum time allowed for one attempt. `None` means no timeout.
    pub timeout: Option<Duration>,
    /// Retry policy when an attempt fails.
    pub retry_policy: RetryPolicy,
}

/// Outputs of the dependencies that activated a step.
///
/// Entries keep the step's declared dependency order. Skipped and failed
/// dependencies contribute nothing, and an OR-joined step only sees the
/// dependency that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInputs<O> {
    entries: Vec<(StepName, O)>,
}

impl<O> Default for StepInputs<O> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<O> StepInputs<O> {
    /// Returns the output of the named dependency.
    pub fn get(&self, name: &str) -> Option<&O> {
        self.entries
            .iter()
            .find(|(dep, _)| dep.as_str() == name)
            .map(|(_, output)| output)
    }

    /// Returns the first output in dependency order.
    pub fn first(&self) -> Option<&O> {
        self.entries.first().map(|(_, output)| output)
    }

    /// Returns the output at the given position.
    pub fn nth(&self, index: usize) -> Option<&O> {
        self.entries.get(index).map(|(_, output)| output)
    }

    /// Iterates over `(dependency, output)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&StepName, &O)> {
        self.entries.iter().map(|(name, output)| (name, output))
    }

    /// Names of the dependencies that contributed an output.
    pub fn names(&self) -> impl Iterator<Item = &StepName> {
        self.entries.iter().map(|(name, _)| name)
    }

    /// Number of outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no dependency contributed an output.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the inputs, returning the outputs in dependency order.
    pub fn into_values(self) -> Vec<O> {
        self.entries.into_iter().map(|(_, output)| output).collect()
    }
}

impl<O> FromIterator<(StepName, O)> for StepInputs<O> {
    fn from_iter<I: IntoIterator<Item = (StepName, O)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Everything a step attempt gets to work with.
pub struct StepContext<S, O> {
    name: StepName,
    attempt: u32,
    inputs: StepInputs<O>,
    state: RunState<S, O>,
}

impl<S, O> StepContext<S, O> {
    /// Creates a context for one attempt of the named step.
    pub fn new(name: StepName, attempt: u32, inputs: StepInputs<O>, state: RunState<S, O>) -> Self {
        Self {
            name,
            attempt,
            inputs,
            state,
        }
    }

    /// Name of the running step.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Attempt number, starting at 1.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Outputs of the dependencies that activated this step.
    pub fn inputs(&self) -> &StepInputs<O> {
        &self.inputs
    }

    /// Takes ownership of the inputs, leaving an empty set behind.
    pub fn take_inputs(&mut self) -> StepInputs<O> {
        std::mem::take(&mut self.inputs)
    }

    /// Shared run state.
    pub fn state(&self) -> &RunState<S, O> {
        &self.state
    }

    /// Reads the user state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        self.state.read(f)
    }

    /// Mutates the user state.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        self.state.update(f)
    }
}

impl<S, O: fmt::Debug> fmt::Debug for StepContext<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("name", &self.name)
            .field("attempt", &self.attempt)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// A workflow step that can be executed asynchronously.
///
/// A step receives the run state and the outputs of the dependencies that
/// activated it, and returns its own output. Returning an error counts as a
/// failed attempt and may trigger a retry.
///
/// Retries re-run `execute` with the same inputs; non-idempotent side effects
/// repeat.
///
/// # Examples
///
/// ```
/// use musubi_core::{BoxError, Step, StepContext};
/// use async_trait::async_trait;
///
/// struct Shout;
///
/// #[async_trait]
/// impl Step<Vec<String>, String> for Shout {
///     async fn execute(&self, ctx: StepContext<Vec<String>, String>) -> Result<String, BoxError> {
///         let last = ctx.read(|messages| messages.last().cloned()).unwrap_or_default();
///         Ok(last.to_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait Step<S, O>: Send + Sync {
    /// Runs one attempt of the step.
    async fn execute(&self, ctx: StepContext<S, O>) -> Result<O, BoxError>;
}

/// Adapts an async closure into a [`Step`].
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnStep<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").finish_non_exhaustive()
    }
}

#[async_trait]
impl<S, O, F, Fut> Step<S, O> for FnStep<F>
where
    S: Send + Sync + 'static,
    O: Send + Sync + 'static,
    F: Fn(StepContext<S, O>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O, BoxError>> + Send,
{
    async fn execute(&self, ctx: StepContext<S, O>) -> Result<O, BoxError> {
        (self.f)(ctx).await
    }
}

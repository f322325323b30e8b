//! Shared state of a single workflow run.

use crate::step::StepName;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Handle to the mutable state of one run.
///
/// Every step attempt of the run holds a clone of the same handle. Each
/// [`read`](Self::read) or [`update`](Self::update) call is atomic on its
/// own, but nothing spans an `.await`: two concurrent steps that
/// read-modify-write the same field race, and the last write wins.
///
/// # Examples
///
/// ```
/// use musubi_core::RunState;
///
/// #[derive(Default)]
/// struct Chat {
///     messages: Vec<String>,
/// }
///
/// let state: RunState<Chat, String> = RunState::new(Chat::default());
/// state.update(|chat| chat.messages.push("hello".to_string()));
///
/// assert_eq!(state.read(|chat| chat.messages.len()), 1);
/// ```
pub struct RunState<S, O> {
    inner: Arc<Inner<S, O>>,
}

struct Inner<S, O> {
    state: RwLock<S>,
    outputs: RwLock<HashMap<StepName, O>>,
    started_at: Instant,
}

impl<S, O> Clone for RunState<S, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, O> fmt::Debug for RunState<S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<StepName> = self
            .inner
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("RunState")
            .field("outputs", &steps)
            .field("started_at", &self.inner.started_at)
            .finish_non_exhaustive()
    }
}

impl<S, O> RunState<S, O> {
    /// Creates fresh run state around the initial user state.
    pub fn new(state: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                outputs: RwLock::new(HashMap::new()),
                started_at: Instant::now(),
            }),
        }
    }

    /// Reads the user state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let guard = self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Mutates the user state.
    pub fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = self
            .inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Records the latest output of a step, replacing any earlier one.
    pub fn record_output(&self, step: StepName, output: O) {
        self.inner
            .outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(step, output);
    }

    /// Returns `true` if the step has produced an output in this run.
    pub fn has_output(&self, step: &str) -> bool {
        self.inner
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(step)
    }

    /// Time since the run started.
    pub fn elapsed(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// Returns `true` if both handles point at the same run.
    pub fn same_run(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S: Clone, O> RunState<S, O> {
    /// Clones the current user state.
    pub fn snapshot(&self) -> S {
        self.read(S::clone)
    }
}

impl<S, O: Clone> RunState<S, O> {
    /// Latest output of the named step.
    pub fn output(&self, step: &str) -> Option<O> {
        self.inner
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(step)
            .cloned()
    }

    /// Latest output of every step that succeeded so far.
    pub fn outputs(&self) -> HashMap<StepName, O> {
        self.inner
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

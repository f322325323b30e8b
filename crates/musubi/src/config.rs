//! Run-level configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to step attempts still in flight when an end step succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonPolicy {
    /// Leave them running to completion. Their writes to the run state stay
    /// visible through the returned [`RunState`](musubi_core::RunState).
    #[default]
    Detach,
    /// Abort them at their next suspension point.
    Abort,
}

/// Settings shared by every run of a workflow.
///
/// # Examples
///
/// ```
/// use musubi::{AbandonPolicy, WorkflowConfig};
/// use std::time::Duration;
///
/// let config = WorkflowConfig::default()
///     .with_max_steps(100)
///     .with_step_timeout(Duration::from_secs(30))
///     .with_abandon_policy(AbandonPolicy::Abort);
///
/// assert_eq!(config.max_steps, Some(100));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Cap on dispatched step activations per run. Loops that never flip
    /// their guard fail with `StepLimitExceeded` instead of spinning forever.
    pub max_steps: Option<usize>,
    /// Timeout for steps that declare none. `None` means no timeout.
    pub step_timeout: Option<Duration>,
    /// Handling of in-flight attempts once the run has a result.
    pub abandon_policy: AbandonPolicy,
}

impl WorkflowConfig {
    /// Sets the activation cap.
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Sets the default step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = Some(timeout);
        self
    }

    /// Sets the abandon policy.
    pub fn with_abandon_policy(mut self, policy: AbandonPolicy) -> Self {
        self.abandon_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_steps, None);
        assert_eq!(config.step_timeout, None);
        assert_eq!(config.abandon_policy, AbandonPolicy::Detach);
    }

    #[test]
    fn test_builder_methods() {
        let config = WorkflowConfig::default()
            .with_max_steps(5)
            .with_step_timeout(Duration::from_millis(250))
            .with_abandon_policy(AbandonPolicy::Abort);

        assert_eq!(
            config,
            WorkflowConfig {
                max_steps: Some(5),
                step_timeout: Some(Duration::from_millis(250)),
                abandon_policy: AbandonPolicy::Abort,
            }
        );
    }
}

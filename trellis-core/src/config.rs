//! Runtime Configuration
//!
//! A [`RuntimeConfig`] tunes the runtime's safety valves. Every field has a
//! default, so a config can be deserialized from a partial document:
//!
//! ```rust,ignore
//! let config: RuntimeConfig = serde_json::from_str(r#"{ "cycle_policy": "error" }"#)?;
//! let rt = Runtime::with_config(config);
//! ```

use serde::{Deserialize, Serialize};

/// What to do when a required computation is re-entered while in flight.
///
/// Computations marked optional are always skipped quietly, whatever the
/// policy says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Log a warning and skip the re-entrant run.
    #[default]
    Warn,

    /// Fail the reading computation with a `CircularDependencyError`.
    Error,
}

/// Tuning knobs for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Resolution policy for cycles among required computations.
    pub cycle_policy: CyclePolicy,

    /// How deep effects may re-enter each other through immediate
    /// invalidation before further runs are deferred to [`Runtime::tick`].
    ///
    /// [`Runtime::tick`]: crate::Runtime::tick
    pub max_reentrant_depth: usize,

    /// How many passes a single flush may take before the remaining work
    /// is deferred to [`Runtime::tick`].
    ///
    /// [`Runtime::tick`]: crate::Runtime::tick
    pub max_flush_passes: usize,

    /// Number of detected cycles kept for introspection.
    pub cycle_history: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_policy: CyclePolicy::Warn,
            max_reentrant_depth: 100,
            max_flush_passes: 100,
            cycle_history: 64,
        }
    }
}

impl RuntimeConfig {
    /// Set the cycle resolution policy.
    pub fn cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    /// Set the re-entrant invalidation bound.
    pub fn max_reentrant_depth(mut self, depth: usize) -> Self {
        self.max_reentrant_depth = depth.max(1);
        self
    }

    /// Set the flush pass bound.
    pub fn max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_warn_on_cycles() {
        let config = RuntimeConfig::default();
        assert_eq!(config.cycle_policy, CyclePolicy::Warn);
        assert_eq!(config.max_reentrant_depth, 100);
        assert_eq!(config.max_flush_passes, 100);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{ "cycle_policy": "error", "max_flush_passes": 3 }"#)
                .expect("valid config");

        assert_eq!(config.cycle_policy, CyclePolicy::Error);
        assert_eq!(config.max_flush_passes, 3);
        assert_eq!(config.max_reentrant_depth, 100);
        assert_eq!(config.cycle_history, 64);
    }

    #[test]
    fn builder_clamps_bounds() {
        let config = RuntimeConfig::default()
            .max_reentrant_depth(0)
            .max_flush_passes(0);
        assert_eq!(config.max_reentrant_depth, 1);
        assert_eq!(config.max_flush_passes, 1);
    }
}

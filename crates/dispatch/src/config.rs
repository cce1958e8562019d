//! Dispatch service configuration.

use crate::request::OptLevel;

/// Tunables for the dispatcher and its reference compilation engine.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of optimization plans alive at once.
    pub plan_capacity: usize,
    /// Number of background compile worker threads (min 1).
    pub compile_workers: usize,
    /// Compile work that may wait for a worker before submissions are
    /// rejected.
    pub queue_capacity: usize,
    /// Highest level the default strategy will grant.
    pub max_opt_level: OptLevel,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            plan_capacity: 64,
            compile_workers: 1,
            queue_capacity: 128,
            max_opt_level: OptLevel::Scorching,
        }
    }
}

//! Interface to the asynchronous compilation engine.

use aotserver_cache::{CacheOffset, ResidentMethod};

use crate::plan::OptimizationPlan;
use crate::sink::CompletionSink;

/// Identity of the method being compiled, as the engine needs it.
#[derive(Debug, Clone)]
pub struct MethodDetails {
    pub method: ResidentMethod,
    pub class_name: String,
    pub method_name: String,
    pub rom_class: CacheOffset,
    pub rom_method: CacheOffset,
}

/// Everything the engine takes ownership of on a successful submission.
#[derive(Debug)]
pub struct CompileWork {
    pub details: MethodDetails,
    pub plan: OptimizationPlan,
    pub sink: CompletionSink,
}

/// Why the engine refused a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    ShutDown,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::QueueFull => "queue-full",
            RejectReason::ShutDown => "shut-down",
        }
    }
}

/// Result of [`CompilationEngine::submit`].
#[derive(Debug)]
pub enum Submission {
    /// Compilation is in progress. The engine owns the plan and the sink
    /// and will report exactly once when it is done.
    Queued,
    /// Nothing was queued; ownership of the work returns to the caller,
    /// which must release the plan and report the failure.
    Rejected {
        work: CompileWork,
        reason: RejectReason,
    },
}

/// Accepts compile work and runs it outside the dispatcher.
pub trait CompilationEngine: Send + Sync {
    fn submit(&self, work: CompileWork) -> Submission;
}

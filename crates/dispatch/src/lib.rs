//! Remote compile request dispatch.
//!
//! A decoded [`CompileRequest`] is resolved against the shared cache,
//! checked by the admission policy, turned into an optimization plan by a
//! [`CompilationStrategy`], and handed to a [`CompilationEngine`]. The
//! client learns the result through a single-use [`CompletionSink`].
//!
//! # Architecture
//!
//! ```text
//! CompileRequest ──► Dispatcher::dispatch
//!                      │ Resolver::resolve      (VM access held here only)
//!                      │ admission::admit ──────► NotNeeded / Failure
//!                      │ strategy.process_event ► Failure (no plan)
//!                      │ engine.submit
//!                      │   ├── Rejected ────────► plan dropped, Failure
//!                      │   └── Queued
//!                      ▼
//!                 WorkerPoolEngine workers ─────► Success / Failure
//! ```

pub mod admission;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod request;
pub mod sink;
pub mod worker_pool;

pub use admission::{AdmissionOutcome, admit};
pub use config::DispatchConfig;
pub use dispatcher::{Dispatched, Dispatcher};
pub use engine::{
    CompilationEngine, CompileWork, MethodDetails, RejectReason, Submission,
};
pub use error::CompileError;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use plan::{
    CompilationStrategy, DefaultStrategy, EventKind, MethodEvent, OptimizationPlan, PlanOutcome,
    PlanPool,
};
pub use request::{CodeBufferHint, CompileRequest, OptLevel};
pub use sink::{CompletionReceiver, CompletionSink, CompletionStatus};
pub use worker_pool::{CodeGenerator, StubCodeGenerator, WorkerPoolEngine};

#[cfg(test)]
mod tests;

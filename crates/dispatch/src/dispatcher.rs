//! The request dispatcher.
//!
//! For every request exactly one terminal status reaches the client: the
//! dispatcher reports it synchronously on every path except a successful
//! hand-off to the engine, after which the engine owns the sink.

use std::sync::Arc;

use aotserver_cache::Resolver;

use crate::admission::{AdmissionOutcome, admit};
use crate::engine::{CompilationEngine, CompileWork, MethodDetails, Submission};
use crate::metrics::DispatchMetrics;
use crate::plan::{CompilationStrategy, EventKind, MethodEvent, PlanOutcome};
use crate::request::CompileRequest;
use crate::sink::{CompletionSink, CompletionStatus};

/// What [`Dispatcher::dispatch`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// The dispatcher reported this status itself.
    Reported(CompletionStatus),
    /// The engine took the work and will report.
    Queued,
}

/// Routes compile requests through resolution, admission, planning and
/// submission.
#[derive(Clone)]
pub struct Dispatcher {
    resolver: Resolver,
    strategy: Arc<dyn CompilationStrategy>,
    engine: Arc<dyn CompilationEngine>,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(
        resolver: Resolver,
        strategy: Arc<dyn CompilationStrategy>,
        engine: Arc<dyn CompilationEngine>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            resolver,
            strategy,
            engine,
            metrics,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Handle one decoded request. Runs synchronously; may block briefly
    /// while waiting for VM access.
    pub fn dispatch(&self, request: &CompileRequest, sink: CompletionSink) -> Dispatched {
        DispatchMetrics::incr(&self.metrics.requests);

        let cache = self.resolver.cache();
        let class_present = cache.is_metadata_present(request.class_offset);
        let already_compiled = cache.has_compiled(request.method_offset);
        // VM access is held inside `resolve` only.
        let resolution = self.resolver.resolve(
            request.class_offset,
            request.method_offset,
            request.direct_method,
        );
        let class_name = resolution.class_name().to_owned();
        let method_name = resolution.method_name().to_owned();

        tracing::debug!(
            class = %class_name,
            method = %method_name,
            opt_level = %request.opt_level,
            "Received request to compile"
        );

        let outcome = admit(class_present, already_compiled, resolution.method.as_ref());
        let method = match (outcome, resolution.method) {
            (AdmissionOutcome::Proceed, Some(method)) => method,
            (outcome, _) => {
                self.record_admission(outcome, &class_name, &method_name);
                let status = outcome
                    .terminal_status()
                    .unwrap_or(CompletionStatus::Failure);
                return report(sink, status);
            }
        };

        let event = MethodEvent {
            kind: EventKind::RemoteCompilationRequest,
            method: method.clone(),
            opt_level: request.opt_level,
        };
        let mut plan = match self.strategy.process_event(&event) {
            PlanOutcome::Created(plan) => plan,
            PlanOutcome::Shared => {
                DispatchMetrics::incr(&self.metrics.plans_unavailable);
                tracing::warn!(
                    class = %class_name,
                    method = %method_name,
                    "Failed to compile because a new plan could not be created"
                );
                return report(sink, CompletionStatus::Failure);
            }
            PlanOutcome::Exhausted => {
                DispatchMetrics::incr(&self.metrics.plans_unavailable);
                tracing::warn!(
                    class = %class_name,
                    method = %method_name,
                    "Failed to compile because no optimization plan was available"
                );
                return report(sink, CompletionStatus::Failure);
            }
        };
        if let Some(hint) = request.code_buffer {
            plan.set_code_buffer(hint);
        }

        let work = CompileWork {
            details: MethodDetails {
                method,
                class_name,
                method_name,
                rom_class: request.class_offset,
                rom_method: request.method_offset,
            },
            plan,
            sink,
        };
        match self.engine.submit(work) {
            Submission::Queued => {
                DispatchMetrics::incr(&self.metrics.queued);
                tracing::info!(
                    class = %event.method.class().name,
                    method = %event.method.name(),
                    opt_level = %request.opt_level,
                    "Queued compilation"
                );
                Dispatched::Queued
            }
            Submission::Rejected { work, reason } => {
                let CompileWork {
                    details,
                    plan,
                    sink,
                } = work;
                drop(plan);
                DispatchMetrics::incr(&self.metrics.submissions_rejected);
                tracing::warn!(
                    class = %details.class_name,
                    method = %details.method_name,
                    reason = reason.as_str(),
                    "Failed to queue compilation"
                );
                report(sink, CompletionStatus::Failure)
            }
        }
    }

    fn record_admission(&self, outcome: AdmissionOutcome, class_name: &str, method_name: &str) {
        match outcome {
            AdmissionOutcome::RejectClassNotCached => {
                DispatchMetrics::incr(&self.metrics.rejected_class_not_cached);
                tracing::info!(
                    class = %class_name,
                    method = %method_name,
                    "Class is not in the shared cache, aborting compilation"
                );
            }
            AdmissionOutcome::SkipAlreadyCompiled => {
                DispatchMetrics::incr(&self.metrics.skipped_already_compiled);
                tracing::info!(
                    class = %class_name,
                    method = %method_name,
                    "Method already compiled in the shared cache, aborting compilation"
                );
            }
            AdmissionOutcome::RejectMethodNotFound => {
                DispatchMetrics::incr(&self.metrics.rejected_method_not_found);
                tracing::info!(
                    class = %class_name,
                    method = %method_name,
                    "No resident method for the requested method"
                );
            }
            AdmissionOutcome::Proceed => {}
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

fn report(sink: CompletionSink, status: CompletionStatus) -> Dispatched {
    if !sink.finish(status) {
        tracing::debug!(%status, "Client went away before the status was reported");
    }
    Dispatched::Reported(status)
}

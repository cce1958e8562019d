//! Reference compilation engine: a bounded queue feeding worker threads.
//!
//! Submission never blocks the dispatcher. When the queue is full (or the
//! pool is shutting down) the work is handed straight back so the caller
//! can release the plan and report failure. Once queued, a worker owns the
//! plan and the sink: it generates code, stores it in the shared cache,
//! drops the plan and finishes the sink exactly once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use aotserver_cache::{CompiledMethod, SharedCache};
use bytes::{BufMut, Bytes, BytesMut};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::engine::{CompilationEngine, CompileWork, MethodDetails, RejectReason, Submission};
use crate::error::CompileError;
use crate::metrics::DispatchMetrics;
use crate::plan::OptimizationPlan;
use crate::sink::CompletionStatus;

/// Turns a method into code. Runs on engine worker threads.
pub trait CodeGenerator: Send + Sync {
    fn generate(
        &self,
        details: &MethodDetails,
        plan: &OptimizationPlan,
    ) -> Result<Bytes, CompileError>;
}

/// Emits a small deterministic body instead of machine code.
///
/// Layout: `b"AOT"`, opt level code, method descriptor offset (u64 BE),
/// then the method name.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubCodeGenerator;

impl StubCodeGenerator {
    pub const MAGIC: &'static [u8; 3] = b"AOT";
}

impl CodeGenerator for StubCodeGenerator {
    fn generate(
        &self,
        details: &MethodDetails,
        plan: &OptimizationPlan,
    ) -> Result<Bytes, CompileError> {
        let name = details.method_name.as_bytes();
        let mut body = BytesMut::with_capacity(name.len().saturating_add(12));
        body.put_slice(Self::MAGIC);
        body.put_u8(plan.opt_level().code());
        body.put_u64(details.rom_method.0);
        body.put_slice(name);
        Ok(body.freeze())
    }
}

struct WorkerContext {
    cache: Arc<SharedCache>,
    generator: Arc<dyn CodeGenerator>,
    metrics: Arc<DispatchMetrics>,
}

/// Handle to the compile workers.
///
/// On `Drop` the queue is closed, the workers drain what is left, and the
/// threads are joined.
pub struct WorkerPoolEngine {
    sender: Option<Sender<CompileWork>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPoolEngine {
    /// Spawn `workers` threads (at least one) behind a queue holding up
    /// to `queue_capacity` pending jobs.
    pub fn start(
        workers: usize,
        queue_capacity: usize,
        cache: Arc<SharedCache>,
        generator: Arc<dyn CodeGenerator>,
        metrics: Arc<DispatchMetrics>,
    ) -> Result<Self, CompileError> {
        let (sender, receiver) = channel::bounded::<CompileWork>(queue_capacity);
        let context = Arc::new(WorkerContext {
            cache,
            generator,
            metrics,
        });

        let mut engine = Self {
            sender: Some(sender),
            handles: Vec::new(),
        };
        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            let context = Arc::clone(&context);
            // On error `engine` drops here, closing the queue and joining
            // whatever was already spawned.
            let handle = thread::Builder::new()
                .name(format!("aot-compiler-{index}"))
                .spawn(move || worker_loop(&receiver, &context))
                .map_err(CompileError::WorkerSpawn)?;
            engine.handles.push(handle);
        }

        tracing::info!(workers = engine.handles.len(), queue_capacity, "Compile workers started");
        Ok(engine)
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, Sender::len)
    }
}

impl CompilationEngine for WorkerPoolEngine {
    fn submit(&self, work: CompileWork) -> Submission {
        let Some(sender) = self.sender.as_ref() else {
            return Submission::Rejected {
                work,
                reason: RejectReason::ShutDown,
            };
        };
        match sender.try_send(work) {
            Ok(()) => Submission::Queued,
            Err(TrySendError::Full(work)) => Submission::Rejected {
                work,
                reason: RejectReason::QueueFull,
            },
            Err(TrySendError::Disconnected(work)) => Submission::Rejected {
                work,
                reason: RejectReason::ShutDown,
            },
        }
    }
}

impl Drop for WorkerPoolEngine {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Compile worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for WorkerPoolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolEngine")
            .field("workers", &self.handles.len())
            .field("active", &self.sender.is_some())
            .finish()
    }
}

fn worker_loop(receiver: &Receiver<CompileWork>, context: &WorkerContext) {
    while let Ok(work) = receiver.recv() {
        compile(work, context);
    }
}

fn compile(work: CompileWork, context: &WorkerContext) {
    let CompileWork {
        details,
        plan,
        sink,
    } = work;

    // A panic is turned into an ordinary failure so the plan is still
    // released before the sink reports.
    let generated =
        panic::catch_unwind(AssertUnwindSafe(|| context.generator.generate(&details, &plan)))
            .unwrap_or_else(|_| {
                tracing::error!(method = %details.rom_method, "Code generator panicked");
                Err(CompileError::GeneratorPanicked)
            });
    let result = generated.and_then(|code| fit_code_buffer(&plan, code));

    let status = match result {
        Ok(code) => {
            let stored = context.cache.store_compiled(CompiledMethod {
                method: details.rom_method,
                opt_level: plan.opt_level().code(),
                code,
            });
            if !stored {
                tracing::debug!(
                    method = %details.rom_method,
                    "Compiled code already present, keeping the existing entry"
                );
            }
            tracing::info!(
                class = %details.class_name,
                method = %details.method_name,
                opt_level = %plan.opt_level(),
                "Compiled method"
            );
            DispatchMetrics::incr(&context.metrics.compile_successes);
            CompletionStatus::Success
        }
        Err(err) => {
            tracing::warn!(
                class = %details.class_name,
                method = %details.method_name,
                opt_level = %plan.opt_level(),
                %err,
                "Compilation failed"
            );
            DispatchMetrics::incr(&context.metrics.compile_failures);
            CompletionStatus::Failure
        }
    };

    drop(plan);
    if !sink.finish(status) {
        tracing::debug!(method = %details.rom_method, "Client went away before completion");
    }
}

fn fit_code_buffer(plan: &OptimizationPlan, code: Bytes) -> Result<Bytes, CompileError> {
    let Some(hint) = plan.code_buffer() else {
        return Ok(code);
    };
    let needed = u64::try_from(code.len()).unwrap_or(u64::MAX);
    if needed > hint.size {
        return Err(CompileError::CodeBufferTooSmall {
            needed,
            available: hint.size,
        });
    }
    Ok(code)
}

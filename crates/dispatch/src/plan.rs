//! Optimization plans and the strategy that hands them out.
//!
//! A plan is an owned value with exactly one owner at a time. Plans come
//! from a bounded [`PlanPool`]; dropping a plan returns its slot to the
//! pool, so "released" simply means "dropped" and the pool counters make
//! allocations and releases observable.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use aotserver_cache::ResidentMethod;

use crate::request::{CodeBufferHint, OptLevel};

#[derive(Debug)]
struct PoolCounters {
    capacity: usize,
    live: AtomicUsize,
    allocated: AtomicU64,
    released: AtomicU64,
}

/// Bounded allocator for [`OptimizationPlan`]s.
///
/// Cloning the pool shares its counters.
#[derive(Debug, Clone)]
pub struct PlanPool {
    counters: Arc<PoolCounters>,
}

impl PlanPool {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counters: Arc::new(PoolCounters {
                capacity,
                live: AtomicUsize::new(0),
                allocated: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Allocate a plan, or `None` if `capacity` plans are already live.
    pub fn try_allocate(&self, opt_level: OptLevel) -> Option<OptimizationPlan> {
        let capacity = self.counters.capacity;
        self.counters
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < capacity).then(|| live.saturating_add(1))
            })
            .ok()?;
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        Some(OptimizationPlan {
            opt_level,
            code_buffer: None,
            pool: Arc::clone(&self.counters),
        })
    }

    pub fn capacity(&self) -> usize {
        self.counters.capacity
    }

    /// Plans currently alive.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::Acquire)
    }

    pub fn allocated(&self) -> u64 {
        self.counters.allocated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::Relaxed)
    }
}

/// How a method should be compiled. Dropping the plan releases it.
pub struct OptimizationPlan {
    opt_level: OptLevel,
    code_buffer: Option<CodeBufferHint>,
    pool: Arc<PoolCounters>,
}

impl OptimizationPlan {
    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    pub fn code_buffer(&self) -> Option<CodeBufferHint> {
        self.code_buffer
    }

    /// Attach the client's placement hint. Not validated here.
    pub fn set_code_buffer(&mut self, hint: CodeBufferHint) {
        self.code_buffer = Some(hint);
    }
}

impl Drop for OptimizationPlan {
    fn drop(&mut self) {
        self.pool.live.fetch_sub(1, Ordering::AcqRel);
        self.pool.released.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for OptimizationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationPlan")
            .field("opt_level", &self.opt_level)
            .field("code_buffer", &self.code_buffer)
            .finish()
    }
}

/// Kind of event a strategy is asked to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RemoteCompilationRequest,
}

/// What the strategy sees when deciding on a plan.
#[derive(Debug, Clone)]
pub struct MethodEvent {
    pub kind: EventKind,
    pub method: ResidentMethod,
    /// Level the client asked for.
    pub opt_level: OptLevel,
}

/// Result of asking a strategy for a plan.
#[derive(Debug)]
pub enum PlanOutcome {
    /// A new plan owned by the caller.
    Created(OptimizationPlan),
    /// The strategy attached the event to a plan it keeps owning, so no
    /// plan can be handed over.
    Shared,
    /// No plan could be allocated.
    Exhausted,
}

/// Decides how (and whether) to compile a method.
pub trait CompilationStrategy: Send + Sync {
    fn process_event(&self, event: &MethodEvent) -> PlanOutcome;
}

/// Strategy that honours the client's level, capped at `max_opt_level`.
#[derive(Debug, Clone)]
pub struct DefaultStrategy {
    pool: PlanPool,
    max_opt_level: OptLevel,
}

impl DefaultStrategy {
    pub fn new(pool: PlanPool, max_opt_level: OptLevel) -> Self {
        Self {
            pool,
            max_opt_level,
        }
    }

    pub fn pool(&self) -> &PlanPool {
        &self.pool
    }
}

impl CompilationStrategy for DefaultStrategy {
    fn process_event(&self, event: &MethodEvent) -> PlanOutcome {
        match event.kind {
            EventKind::RemoteCompilationRequest => {
                let level = event.opt_level.min(self.max_opt_level);
                if level != event.opt_level {
                    tracing::debug!(
                        requested = %event.opt_level,
                        granted = %level,
                        "Capping requested optimization level"
                    );
                }
                match self.pool.try_allocate(level) {
                    Some(plan) => PlanOutcome::Created(plan),
                    None => PlanOutcome::Exhausted,
                }
            }
        }
    }
}

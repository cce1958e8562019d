//! Shared fixtures for dispatcher tests: a seeded cache, a strategy with a
//! selectable outcome and an engine that holds or refuses work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aotserver_cache::{
    CacheManifest, CacheOffset, ClassSpec, ClassTable, ManifestIndex, MethodSpec, Resolver,
    SharedCache,
};

use crate::dispatcher::Dispatcher;
use crate::engine::{CompilationEngine, CompileWork, RejectReason, Submission};
use crate::metrics::DispatchMetrics;
use crate::plan::{CompilationStrategy, MethodEvent, PlanOutcome, PlanPool};
use crate::request::{CompileRequest, OptLevel};
use crate::sink::CompletionStatus;

/// Cache seeded with:
///
/// - `demo/Base` (loaded): `base()V`
/// - `demo/App` (loaded, extends Base): `run()V`, `stop(J)V` (already compiled)
/// - `demo/Ghost` (in the cache, never loaded): `haunt()V`
pub struct Fixture {
    pub cache: Arc<SharedCache>,
    pub classes: Arc<ClassTable>,
    pub index: ManifestIndex,
}

impl Fixture {
    pub fn new() -> Self {
        let manifest = CacheManifest {
            loaders: vec!["app".to_string()],
            classes: vec![
                ClassSpec::new("demo/Base", "app").with_method(MethodSpec::new("base", "()V")),
                ClassSpec::new("demo/App", "app")
                    .with_super("demo/Base")
                    .with_method(MethodSpec::new("run", "()V"))
                    .with_method(MethodSpec::new("stop", "(J)V").compiled()),
                ClassSpec::new("demo/Ghost", "app")
                    .not_loaded()
                    .with_method(MethodSpec::new("haunt", "()V")),
            ],
        };
        let built = manifest.build().expect("fixture manifest builds");
        Self {
            cache: Arc::new(built.cache),
            classes: Arc::new(built.classes),
            index: built.index,
        }
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(Arc::clone(&self.cache), Arc::clone(&self.classes))
    }

    pub fn offsets(&self, class: &str, method: &str) -> (CacheOffset, CacheOffset) {
        self.index
            .lookup(class, method)
            .unwrap_or_else(|| panic!("{class}.{method} is in the fixture"))
    }

    pub fn request(&self, class: &str, method: &str) -> CompileRequest {
        let (class_offset, method_offset) = self.offsets(class, method);
        CompileRequest::new(class_offset, method_offset, OptLevel::Warm)
    }
}

/// Which [`PlanOutcome`] a [`StubStrategy`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyMode {
    Create,
    Shared,
    Exhausted,
}

/// Strategy returning a fixed kind of outcome, counting how often it was asked.
pub struct StubStrategy {
    pub pool: PlanPool,
    pub mode: StrategyMode,
    pub events: AtomicUsize,
}

impl StubStrategy {
    pub fn new(pool: PlanPool, mode: StrategyMode) -> Self {
        Self {
            pool,
            mode,
            events: AtomicUsize::new(0),
        }
    }

    pub fn events(&self) -> usize {
        self.events.load(Ordering::SeqCst)
    }
}

impl CompilationStrategy for StubStrategy {
    fn process_event(&self, event: &MethodEvent) -> PlanOutcome {
        self.events.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            StrategyMode::Create => match self.pool.try_allocate(event.opt_level) {
                Some(plan) => PlanOutcome::Created(plan),
                None => PlanOutcome::Exhausted,
            },
            StrategyMode::Shared => PlanOutcome::Shared,
            StrategyMode::Exhausted => PlanOutcome::Exhausted,
        }
    }
}

/// What a [`StubEngine`] does with submitted work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Accept and keep the work until [`StubEngine::complete_all`].
    Hold,
    Reject(RejectReason),
}

pub struct StubEngine {
    pub mode: EngineMode,
    pub held: Mutex<Vec<CompileWork>>,
    pub submissions: AtomicUsize,
}

impl StubEngine {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            mode,
            held: Mutex::new(Vec::new()),
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn held(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Finish every held job the way a worker would: release the plan,
    /// then report.
    pub fn complete_all(&self, status: CompletionStatus) -> usize {
        let held: Vec<_> = self.held.lock().unwrap().drain(..).collect();
        let count = held.len();
        for CompileWork { plan, sink, .. } in held {
            drop(plan);
            sink.finish(status);
        }
        count
    }
}

impl CompilationEngine for StubEngine {
    fn submit(&self, work: CompileWork) -> Submission {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            EngineMode::Hold => {
                self.held.lock().unwrap().push(work);
                Submission::Queued
            }
            EngineMode::Reject(reason) => Submission::Rejected { work, reason },
        }
    }
}

/// A dispatcher over `fixture` with the given stubs, plus its metrics.
pub fn dispatcher(
    fixture: &Fixture,
    strategy: &Arc<StubStrategy>,
    engine: &Arc<StubEngine>,
) -> (Dispatcher, Arc<DispatchMetrics>) {
    let metrics = Arc::new(DispatchMetrics::new());
    let strategy: Arc<dyn CompilationStrategy> = Arc::<StubStrategy>::clone(strategy);
    let engine: Arc<dyn CompilationEngine> = Arc::<StubEngine>::clone(engine);
    let dispatcher = Dispatcher::new(fixture.resolver(), strategy, engine, Arc::clone(&metrics));
    (dispatcher, metrics)
}

use std::{io::IsTerminal, sync::Arc};

use aotserver_cache::{BuiltCache, CacheManifest, CacheOffset, Resolver};
use aotserver_dispatch::{
    CompilationStrategy, DefaultStrategy, DispatchConfig, DispatchMetrics, Dispatcher, PlanPool,
    StubCodeGenerator, WorkerPoolEngine,
};
use eyre::{OptionExt, WrapErr};
use tracing::{Level, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::Directive, fmt, layer::SubscriberExt,
};

use crate::cli::{LogColor, Options};

pub fn init_tracing(opts: &Options) -> eyre::Result<()> {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => std::io::stdout().is_terminal(),
    };

    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    let fmt_layer = fmt::layer()
        .with_target(include_target)
        .with_thread_names(include_target)
        .with_ansi(use_color);

    let subscriber = Registry::default().with(fmt_layer.with_filter(log_filter));

    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("setting default subscriber failed")
}

pub fn dispatch_config(opts: &Options) -> DispatchConfig {
    DispatchConfig {
        plan_capacity: opts.plan_capacity,
        compile_workers: opts.compile_workers,
        queue_capacity: opts.compile_queue,
        max_opt_level: opts.opt_max,
    }
}

fn load_manifest(opts: &Options) -> eyre::Result<CacheManifest> {
    match &opts.cache_manifest {
        Some(path) => CacheManifest::from_path(path)
            .wrap_err_with(|| format!("failed to read cache manifest {}", path.display())),
        None => Ok(CacheManifest::default()),
    }
}

/// Build the shared cache and class table from `--cache.manifest`.
pub fn init_cache(opts: &Options) -> eyre::Result<BuiltCache> {
    if opts.cache_manifest.is_none() {
        warn!("No cache manifest given, the shared cache is empty and every request will fail");
    }
    let built = load_manifest(opts)?
        .build()
        .wrap_err("invalid cache manifest")?;
    info!(
        records = built.cache.len(),
        compiled = built.cache.compiled_count(),
        loaded_classes = built.classes.len(),
        "Shared cache ready"
    );
    Ok(built)
}

/// Wire the dispatcher to the default strategy and a worker pool engine.
pub fn init_dispatcher(
    opts: &Options,
    built: BuiltCache,
) -> eyre::Result<(Dispatcher, Arc<DispatchMetrics>)> {
    let config = dispatch_config(opts);
    let cache = Arc::new(built.cache);
    let metrics = Arc::new(DispatchMetrics::new());

    let engine = WorkerPoolEngine::start(
        config.compile_workers,
        config.queue_capacity,
        Arc::clone(&cache),
        Arc::new(StubCodeGenerator),
        Arc::clone(&metrics),
    )?;
    let strategy: Arc<dyn CompilationStrategy> = Arc::new(DefaultStrategy::new(
        PlanPool::with_capacity(config.plan_capacity),
        config.max_opt_level,
    ));
    info!(
        plan_capacity = config.plan_capacity,
        max_opt_level = %config.max_opt_level,
        "Dispatcher ready"
    );

    let dispatcher = Dispatcher::new(
        Resolver::new(cache, Arc::new(built.classes)),
        strategy,
        Arc::new(engine),
        Arc::clone(&metrics),
    );
    Ok((dispatcher, metrics))
}

/// Resolve `Class.method` (or `Class.method(sig)`) to cache offsets using
/// the manifest. Building a manifest is deterministic, so the offsets match
/// those of a server started from the same file.
pub fn lookup_target(opts: &Options, target: &str) -> eyre::Result<(CacheOffset, CacheOffset)> {
    let method_start = target.find('(').unwrap_or(target.len());
    let (class, method) = target
        .get(..method_start)
        .and_then(|head| head.rsplit_once('.'))
        .map(|(class, name)| (class, target.get(class.len().saturating_add(1)..).unwrap_or(name)))
        .ok_or_eyre("target must look like Class.method")?;
    let built = load_manifest(opts)?
        .build()
        .wrap_err("invalid cache manifest")?;
    built
        .index
        .lookup(class, method)
        .ok_or_else(|| eyre::eyre!("{target} is not in the cache manifest"))
}

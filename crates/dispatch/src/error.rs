use thiserror::Error;

/// Errors raised while compiling a method on an engine worker.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("code generation failed: {0}")]
    Generation(String),
    #[error("code generator panicked")]
    GeneratorPanicked,
    #[error("code buffer too small: need {needed} bytes, {available} available")]
    CodeBufferTooSmall { needed: u64, available: u64 },
    #[error("failed to spawn compile worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

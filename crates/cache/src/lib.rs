//! Shared cache model and resolution for the aotserver compile service.
//!
//! The compile service receives cache-relative references (offsets into
//! the process-shared metadata cache) and must turn them into live,
//! in-process class and method handles before it can decide anything.
//!
//! # Layout
//!
//! ```text
//! aotserver-cache
//!   ├── types       : offsets, ids and the records stored in the cache
//!   ├── shared_cache: offset → record lookups, compiled-code store
//!   ├── class_table : loaded classes, scoped VM access guard
//!   ├── locator     : method lookup by on-disk descriptor
//!   ├── resolver    : request references → resident handles
//!   └── manifest    : JSON seeding format for development and tests
//! ```

pub mod class_table;
pub mod error;
pub mod locator;
pub mod manifest;
pub mod resolver;
pub mod shared_cache;
pub mod types;

pub use class_table::{ClassTable, MethodSlot, ResidentClass, ResidentMethod, VmAccess};
pub use error::{CacheError, ManifestError};
pub use locator::locate_method;
pub use manifest::{BuiltCache, CacheManifest, ClassSpec, ManifestIndex, MethodSpec};
pub use resolver::{Resolution, Resolver};
pub use shared_cache::{SharedCache, SharedCacheBuilder};
pub use types::{
    CacheOffset, CacheRecord, ClassChain, ClassId, CompiledMethod, LoaderId, MethodId, RomClass,
    RomMethod,
};

//! Translation of cache-relative request references into resident handles.

use std::sync::Arc;

use crate::class_table::{ClassTable, ResidentClass, ResidentMethod, VmAccess};
use crate::locator::locate_method;
use crate::shared_cache::SharedCache;
use crate::types::{CacheOffset, CacheRecord, MethodId, RomClass, RomMethod};

/// Everything a request's references resolved to.
///
/// Each field is independently optional; deciding what a missing piece
/// means is the admission policy's job, not the resolver's.
#[derive(Debug)]
pub struct Resolution<'c> {
    pub rom_class: Option<&'c RomClass>,
    pub rom_method: Option<&'c RomMethod>,
    pub class: Option<Arc<ResidentClass>>,
    pub method: Option<ResidentMethod>,
}

impl Resolution<'_> {
    pub fn class_name(&self) -> &str {
        self.rom_class.map_or("<unknown>", |class| class.name.as_str())
    }

    pub fn method_name(&self) -> &str {
        self.rom_method.map_or("<unknown>", |method| method.name.as_str())
    }
}

/// Read-only lookups over the shared cache and the VM's class table.
#[derive(Debug, Clone)]
pub struct Resolver {
    cache: Arc<SharedCache>,
    classes: Arc<ClassTable>,
}

impl Resolver {
    pub fn new(cache: Arc<SharedCache>, classes: Arc<ClassTable>) -> Self {
        Self { cache, classes }
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    pub fn classes(&self) -> &Arc<ClassTable> {
        &self.classes
    }

    pub fn resolve_offset(&self, offset: CacheOffset) -> Option<&CacheRecord> {
        self.cache.offset_to_record(offset)
    }

    /// Find the resident class with content identity `class_chain` defined
    /// by the loader identified by `loader_chain`.
    pub fn resolve_class(
        &self,
        access: &VmAccess<'_>,
        class_chain: CacheOffset,
        loader_chain: CacheOffset,
    ) -> Option<Arc<ResidentClass>> {
        let loader = access.loader_for_chain(loader_chain)?;
        access.class_for_chain(class_chain, loader)
    }

    /// Resolve a request's class and method references.
    ///
    /// VM access is held only for the duration of this call. A `direct`
    /// method handle is trusted only if it still names a loaded method
    /// whose descriptor is `method_offset` and whose class was loaded from
    /// `class_offset`; otherwise the class is looked up by chain and the
    /// method located by descriptor.
    pub fn resolve(
        &self,
        class_offset: CacheOffset,
        method_offset: CacheOffset,
        direct: Option<MethodId>,
    ) -> Resolution<'_> {
        let rom_class = self.cache.rom_class(class_offset);
        let rom_method = self.cache.rom_method(method_offset);

        let access = self.classes.acquire_access();

        if let Some(id) = direct {
            match access.method(id) {
                Some(method)
                    if method.descriptor() == method_offset
                        && method.class().rom_class == class_offset =>
                {
                    return Resolution {
                        rom_class,
                        rom_method,
                        class: Some(Arc::clone(method.class())),
                        method: Some(method),
                    };
                }
                _ => tracing::debug!(
                    handle = id.to_raw(),
                    method = %method_offset,
                    "Direct method handle is stale, resolving by class chain"
                ),
            }
        }

        let class = rom_class.and_then(|rom| {
            self.resolve_class(&access, rom.class_chain, rom.loader_chain)
        });
        let method = class
            .as_ref()
            .and_then(|class| locate_method(class, method_offset));

        Resolution {
            rom_class,
            rom_method,
            class,
            method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{CacheManifest, ClassSpec, MethodSpec};

    fn fixture() -> (Resolver, crate::manifest::ManifestIndex) {
        let manifest = CacheManifest {
            loaders: vec!["app".to_string()],
            classes: vec![
                ClassSpec::new("demo/Base", "app").with_method(MethodSpec::new("base", "()V")),
                ClassSpec::new("demo/Child", "app")
                    .with_super("demo/Base")
                    .with_method(MethodSpec::new("run", "()V"))
                    .with_method(MethodSpec::new("stop", "(J)V")),
                ClassSpec::new("demo/Unloaded", "app")
                    .not_loaded()
                    .with_method(MethodSpec::new("idle", "()V")),
            ],
        };
        let built = manifest.build().expect("manifest builds");
        (
            Resolver::new(Arc::new(built.cache), Arc::new(built.classes)),
            built.index,
        )
    }

    #[test]
    fn resolves_loaded_class_and_method() {
        let (resolver, index) = fixture();
        let (class, method) = index.lookup("demo/Child", "stop").expect("indexed");
        let resolution = resolver.resolve(class, method, None);

        assert_eq!(resolution.class_name(), "demo/Child");
        assert_eq!(resolution.method_name(), "stop");
        let resident = resolution.method.expect("method resolved");
        assert_eq!(resident.index(), 1);
        assert_eq!(resident.descriptor(), method);
    }

    #[test]
    fn repeated_resolution_yields_identical_handles() {
        let (resolver, index) = fixture();
        let (class, method) = index.lookup("demo/Child", "run").expect("indexed");
        let first = resolver.resolve(class, method, None);
        let second = resolver.resolve(class, method, None);

        let (c1, c2) = (first.class.expect("class"), second.class.expect("class"));
        assert!(Arc::ptr_eq(&c1, &c2));
        assert_eq!(first.method, second.method);
    }

    #[test]
    fn unloaded_class_resolves_metadata_only() {
        let (resolver, index) = fixture();
        let (class, method) = index.lookup("demo/Unloaded", "idle").expect("indexed");
        let resolution = resolver.resolve(class, method, None);

        assert!(resolution.rom_class.is_some());
        assert!(resolution.rom_method.is_some());
        assert!(resolution.class.is_none());
        assert!(resolution.method.is_none());
    }

    #[test]
    fn garbage_offsets_resolve_to_nothing() {
        let (resolver, _) = fixture();
        let resolution = resolver.resolve(CacheOffset(7), CacheOffset(u64::MAX), None);
        assert!(resolution.rom_class.is_none());
        assert!(resolution.rom_method.is_none());
        assert!(resolution.class.is_none());
        assert!(resolution.method.is_none());
        assert_eq!(resolution.class_name(), "<unknown>");
    }

    #[test]
    fn method_of_another_class_is_not_located() {
        let (resolver, index) = fixture();
        let (child, _) = index.lookup("demo/Child", "run").expect("indexed");
        let (_, base_method) = index.lookup("demo/Base", "base").expect("indexed");
        let resolution = resolver.resolve(child, base_method, None);
        assert!(resolution.class.is_some());
        assert!(resolution.method.is_none());
    }

    #[test]
    fn direct_handle_is_used_when_it_matches() {
        let (resolver, index) = fixture();
        let (class, method) = index.lookup("demo/Child", "run").expect("indexed");
        let id = resolver
            .resolve(class, method, None)
            .method
            .expect("resolved")
            .id();

        let resolution = resolver.resolve(class, method, Some(id));
        assert_eq!(resolution.method.map(|m| m.id()), Some(id));
    }

    #[test]
    fn direct_handle_must_belong_to_the_requested_class() {
        let (resolver, index) = fixture();
        let (base, _) = index.lookup("demo/Base", "base").expect("indexed");
        let (child, run) = index.lookup("demo/Child", "run").expect("indexed");
        let run_id = resolver.resolve(child, run, None).method.expect("run").id();

        // Same answer with and without the handle: `run` is not a Base method.
        let without = resolver.resolve(base, run, None);
        let with = resolver.resolve(base, run, Some(run_id));
        assert!(without.method.is_none());
        assert!(with.method.is_none());
        assert_eq!(with.class.map(|c| c.rom_class), Some(base));

        let unknown = resolver.resolve(CacheOffset(7), run, Some(run_id));
        assert!(unknown.method.is_none());
    }

    #[test]
    fn stale_direct_handle_falls_back_to_chain_lookup() {
        let (resolver, index) = fixture();
        let (class, run) = index.lookup("demo/Child", "run").expect("indexed");
        let (_, stop) = index.lookup("demo/Child", "stop").expect("indexed");
        let run_id = resolver.resolve(class, run, None).method.expect("run").id();

        // Handle names `run` but the request asks for `stop`.
        let resolution = resolver.resolve(class, stop, Some(run_id));
        let method = resolution.method.expect("located by descriptor");
        assert_eq!(method.name(), "stop");
    }

    #[test]
    fn unload_invalidates_resolution() {
        let (resolver, index) = fixture();
        let (class, method) = index.lookup("demo/Child", "run").expect("indexed");
        let resident = resolver.resolve(class, method, None).class.expect("loaded");

        resolver.classes().unload_class(resident.id);
        assert!(resolver.resolve(class, method, None).method.is_none());
    }
}

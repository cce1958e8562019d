//! The process-shared metadata and code cache.
//!
//! Metadata records are immutable once the cache is built, so lookups by
//! offset take no lock. The compiled-code store is the only part that
//! changes at runtime: the compilation engine writes it and admission
//! reads it.

use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use crate::types::{CacheOffset, CacheRecord, ClassChain, CompiledMethod, RomClass, RomMethod};

/// Distance between consecutive offsets handed out by [`SharedCacheBuilder`].
const RECORD_STRIDE: u64 = 16;

/// Read-mostly shared cache of class metadata and compiled code.
#[derive(Debug)]
pub struct SharedCache {
    records: FxHashMap<CacheOffset, CacheRecord>,
    compiled: RwLock<FxHashMap<CacheOffset, Arc<CompiledMethod>>>,
}

impl SharedCache {
    pub fn builder() -> SharedCacheBuilder {
        SharedCacheBuilder::default()
    }

    /// Translate an offset into the record stored there.
    ///
    /// Unknown or null offsets yield `None`; no offset can cause an
    /// out-of-bounds access.
    pub fn offset_to_record(&self, offset: CacheOffset) -> Option<&CacheRecord> {
        self.records.get(&offset)
    }

    pub fn rom_class(&self, offset: CacheOffset) -> Option<&RomClass> {
        match self.offset_to_record(offset)? {
            CacheRecord::RomClass(class) => Some(class),
            _ => None,
        }
    }

    pub fn rom_method(&self, offset: CacheOffset) -> Option<&RomMethod> {
        match self.offset_to_record(offset)? {
            CacheRecord::RomMethod(method) => Some(method),
            _ => None,
        }
    }

    pub fn class_chain(&self, offset: CacheOffset) -> Option<&ClassChain> {
        match self.offset_to_record(offset)? {
            CacheRecord::ClassChain(chain) => Some(chain),
            _ => None,
        }
    }

    /// Whether `offset` names class metadata that lives in this cache.
    pub fn is_metadata_present(&self, offset: CacheOffset) -> bool {
        self.rom_class(offset).is_some()
    }

    /// Whether compiled code has already been stored for this method.
    pub fn has_compiled(&self, method: CacheOffset) -> bool {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let compiled = self.compiled.read().unwrap();
        compiled.contains_key(&method)
    }

    pub fn compiled(&self, method: CacheOffset) -> Option<Arc<CompiledMethod>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let compiled = self.compiled.read().unwrap();
        compiled.get(&method).cloned()
    }

    /// Store compiled code for a method.
    ///
    /// Returns `false` and keeps the existing entry if code was already
    /// present; the first writer wins.
    pub fn store_compiled(&self, code: CompiledMethod) -> bool {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut compiled = self.compiled.write().unwrap();
        if compiled.contains_key(&code.method) {
            return false;
        }
        compiled.insert(code.method, Arc::new(code));
        true
    }

    /// Number of metadata records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn compiled_count(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let compiled = self.compiled.read().unwrap();
        compiled.len()
    }
}

/// Incremental builder for a [`SharedCache`].
///
/// Offsets can be reserved before their record is known so that records
/// may refer to each other.
#[derive(Debug)]
pub struct SharedCacheBuilder {
    next_offset: u64,
    records: FxHashMap<CacheOffset, CacheRecord>,
    compiled: Vec<CompiledMethod>,
}

impl Default for SharedCacheBuilder {
    fn default() -> Self {
        Self {
            next_offset: RECORD_STRIDE,
            records: FxHashMap::default(),
            compiled: Vec::new(),
        }
    }
}

impl SharedCacheBuilder {
    /// Hand out the next free offset without storing anything there yet.
    pub fn reserve(&mut self) -> CacheOffset {
        let offset = CacheOffset(self.next_offset);
        self.next_offset = self.next_offset.saturating_add(RECORD_STRIDE);
        offset
    }

    /// Store `record` at a previously reserved offset.
    pub fn insert(&mut self, offset: CacheOffset, record: CacheRecord) -> &mut Self {
        self.records.insert(offset, record);
        self
    }

    /// Reserve an offset and store `record` there.
    pub fn push(&mut self, record: CacheRecord) -> CacheOffset {
        let offset = self.reserve();
        self.records.insert(offset, record);
        offset
    }

    pub fn with_compiled(&mut self, code: CompiledMethod) -> &mut Self {
        self.compiled.push(code);
        self
    }

    pub fn build(self) -> SharedCache {
        let compiled = self
            .compiled
            .into_iter()
            .map(|code| (code.method, Arc::new(code)))
            .collect();
        SharedCache {
            records: self.records,
            compiled: RwLock::new(compiled),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn sample_cache() -> (SharedCache, CacheOffset, CacheOffset) {
        let mut builder = SharedCache::builder();
        let class_offset = builder.reserve();
        let method_offset = builder.push(CacheRecord::RomMethod(RomMethod {
            name: "run".to_string(),
            signature: "()V".to_string(),
            class: class_offset,
        }));
        let chain = builder.push(CacheRecord::ClassChain(ClassChain {
            classes: vec![class_offset],
        }));
        builder.insert(
            class_offset,
            CacheRecord::RomClass(RomClass {
                name: "demo/Task".to_string(),
                class_chain: chain,
                loader_chain: chain,
                methods: vec![method_offset],
            }),
        );
        (builder.build(), class_offset, method_offset)
    }

    #[test]
    fn typed_lookups_check_record_kind() {
        let (cache, class_offset, method_offset) = sample_cache();
        assert!(cache.rom_class(class_offset).is_some());
        assert!(cache.rom_method(class_offset).is_none());
        assert!(cache.rom_method(method_offset).is_some());
        assert!(cache.rom_class(method_offset).is_none());
    }

    #[test]
    fn malformed_offsets_are_not_found() {
        let (cache, _, _) = sample_cache();
        assert!(cache.offset_to_record(CacheOffset::NULL).is_none());
        assert!(cache.offset_to_record(CacheOffset(3)).is_none());
        assert!(cache.offset_to_record(CacheOffset(u64::MAX)).is_none());
        assert!(!cache.is_metadata_present(CacheOffset(u64::MAX)));
    }

    #[test]
    fn metadata_presence_requires_a_class_record() {
        let (cache, class_offset, method_offset) = sample_cache();
        assert!(cache.is_metadata_present(class_offset));
        assert!(!cache.is_metadata_present(method_offset));
    }

    #[test]
    fn first_compiled_store_wins() {
        let (cache, _, method_offset) = sample_cache();
        assert!(!cache.has_compiled(method_offset));

        let first = CompiledMethod {
            method: method_offset,
            opt_level: 2,
            code: Bytes::from_static(&[1, 2, 3]),
        };
        let second = CompiledMethod {
            method: method_offset,
            opt_level: 4,
            code: Bytes::from_static(&[9]),
        };
        assert!(cache.store_compiled(first.clone()));
        assert!(!cache.store_compiled(second));

        assert!(cache.has_compiled(method_offset));
        assert_eq!(cache.compiled(method_offset).as_deref(), Some(&first));
        assert_eq!(cache.compiled_count(), 1);
    }

    #[test]
    fn builder_seeds_compiled_code() {
        let mut builder = SharedCache::builder();
        let method = builder.reserve();
        builder.with_compiled(CompiledMethod {
            method,
            opt_level: 0,
            code: Bytes::new(),
        });
        let cache = builder.build();
        assert!(cache.has_compiled(method));
    }
}

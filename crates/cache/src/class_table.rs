//! The VM's table of loaded classes and the scoped access guard over it.
//!
//! Lookups are only reachable through a [`VmAccess`] guard. While any guard
//! is alive, classes cannot be unloaded, so handles obtained through the
//! guard refer to classes that were loaded at the time of the lookup.
//! Unloading takes the table exclusively and therefore waits for every
//! outstanding guard to be dropped.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use rustc_hash::FxHashMap;

use crate::error::CacheError;
use crate::shared_cache::SharedCache;
use crate::types::{CacheOffset, ClassId, LoaderId, MethodId};

/// One slot of a resident class's method table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSlot {
    /// Offset of the slot's on-disk descriptor in the shared cache.
    pub rom_method: CacheOffset,
    pub name: String,
}

/// A loaded class. Owned by the [`ClassTable`]; requests only ever hold
/// shared handles to it.
#[derive(Debug)]
pub struct ResidentClass {
    pub id: ClassId,
    pub name: String,
    pub rom_class: CacheOffset,
    pub loader: LoaderId,
    pub methods: Vec<MethodSlot>,
}

/// Handle to one method slot of a resident class.
///
/// Two handles are equal when they point at the same class object and the
/// same slot index.
#[derive(Clone)]
pub struct ResidentMethod {
    class: Arc<ResidentClass>,
    index: u16,
}

impl ResidentMethod {
    /// Build a handle for `index`, or `None` if the slot does not exist.
    pub fn new(class: Arc<ResidentClass>, index: u16) -> Option<Self> {
        class.methods.get(usize::from(index))?;
        Some(Self { class, index })
    }

    pub fn class(&self) -> &Arc<ResidentClass> {
        &self.class
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn id(&self) -> MethodId {
        MethodId {
            class: self.class.id,
            index: self.index,
        }
    }

    fn slot(&self) -> Option<&MethodSlot> {
        self.class.methods.get(usize::from(self.index))
    }

    /// Offset of this method's on-disk descriptor.
    pub fn descriptor(&self) -> CacheOffset {
        self.slot().map_or(CacheOffset::NULL, |slot| slot.rom_method)
    }

    pub fn name(&self) -> &str {
        self.slot().map_or("<invalid>", |slot| slot.name.as_str())
    }
}

impl PartialEq for ResidentMethod {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.class, &other.class) && self.index == other.index
    }
}

impl Eq for ResidentMethod {}

impl fmt::Debug for ResidentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResidentMethod")
            .field("class", &self.class.name)
            .field("method", &self.name())
            .field("index", &self.index)
            .finish()
    }
}

#[derive(Debug, Default)]
struct ClassTableInner {
    /// Persistent loader table: identifying chain of each registered loader.
    loaders: FxHashMap<CacheOffset, LoaderId>,
    classes: FxHashMap<ClassId, Arc<ResidentClass>>,
    by_chain: FxHashMap<(CacheOffset, LoaderId), ClassId>,
}

/// The VM's loaded classes, indexed by class id and by class chain.
#[derive(Debug, Default)]
pub struct ClassTable {
    inner: RwLock<ClassTableInner>,
    next_class: AtomicU32,
    next_loader: AtomicU32,
}

impl ClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire scoped VM access. Classes cannot be unloaded until the
    /// returned guard is dropped.
    pub fn acquire_access(&self) -> VmAccess<'_> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let guard = self.inner.read().unwrap();
        VmAccess { inner: guard }
    }

    /// Register a class loader identified by `loader_chain`.
    ///
    /// Registering the same chain twice returns the existing loader.
    pub fn register_loader(&self, loader_chain: CacheOffset) -> LoaderId {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        *inner.loaders.entry(loader_chain).or_insert_with(|| {
            LoaderId(self.next_loader.fetch_add(1, Ordering::Relaxed))
        })
    }

    /// Load the class whose metadata lives at `rom_class` in `cache`.
    ///
    /// The method table is built from the metadata's method records, in
    /// declaration order. Loading an already loaded class returns the
    /// existing handle.
    pub fn load_class(
        &self,
        cache: &SharedCache,
        rom_class: CacheOffset,
        loader: LoaderId,
    ) -> Result<Arc<ResidentClass>, CacheError> {
        let rom = cache
            .rom_class(rom_class)
            .ok_or(CacheError::NotAClass(rom_class))?;

        if rom.methods.len() > usize::from(u16::MAX) {
            return Err(CacheError::TooManyMethods {
                class: rom.name.clone(),
                count: rom.methods.len(),
            });
        }

        let methods = rom
            .methods
            .iter()
            .map(|&offset| {
                cache
                    .rom_method(offset)
                    .map(|method| MethodSlot {
                        rom_method: offset,
                        name: method.name.clone(),
                    })
                    .ok_or(CacheError::NotAMethod(offset))
            })
            .collect::<Result<Vec<_>, _>>()?;

        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();

        if !inner.loaders.values().any(|&id| id == loader) {
            return Err(CacheError::UnknownLoader(loader));
        }

        let key = (rom.class_chain, loader);
        if let Some(existing) = inner
            .by_chain
            .get(&key)
            .and_then(|id| inner.classes.get(id))
        {
            return Ok(Arc::clone(existing));
        }

        let id = ClassId(self.next_class.fetch_add(1, Ordering::Relaxed));
        let class = Arc::new(ResidentClass {
            id,
            name: rom.name.clone(),
            rom_class,
            loader,
            methods,
        });
        inner.classes.insert(id, Arc::clone(&class));
        inner.by_chain.insert(key, id);

        tracing::debug!(class = %class.name, class_id = id.0, "Loaded class");
        Ok(class)
    }

    /// Unload a class. Blocks until no [`VmAccess`] guard is held.
    ///
    /// Outstanding handles stay valid memory-wise but the class can no
    /// longer be found through any lookup.
    pub fn unload_class(&self, id: ClassId) -> Option<Arc<ResidentClass>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        let class = inner.classes.remove(&id)?;
        inner.by_chain.retain(|_, class_id| *class_id != id);
        tracing::debug!(class = %class.name, class_id = id.0, "Unloaded class");
        Some(class)
    }

    pub fn len(&self) -> usize {
        self.acquire_access().inner.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped VM access: a shared hold on the class table.
///
/// Dropping the guard releases it; every early return out of a resolution
/// therefore releases it too.
pub struct VmAccess<'a> {
    inner: RwLockReadGuard<'a, ClassTableInner>,
}

impl VmAccess<'_> {
    /// Loader associated with an identifying class chain.
    pub fn loader_for_chain(&self, loader_chain: CacheOffset) -> Option<LoaderId> {
        self.inner.loaders.get(&loader_chain).copied()
    }

    /// Find the class loaded by `loader` whose content identity is `class_chain`.
    pub fn class_for_chain(
        &self,
        class_chain: CacheOffset,
        loader: LoaderId,
    ) -> Option<Arc<ResidentClass>> {
        let id = self.inner.by_chain.get(&(class_chain, loader))?;
        self.inner.classes.get(id).cloned()
    }

    pub fn class(&self, id: ClassId) -> Option<Arc<ResidentClass>> {
        self.inner.classes.get(&id).cloned()
    }

    /// Resolve a method handle previously given out to a client.
    pub fn method(&self, id: MethodId) -> Option<ResidentMethod> {
        ResidentMethod::new(self.class(id.class)?, id.index)
    }
}

impl fmt::Debug for VmAccess<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmAccess")
            .field("loaded_classes", &self.inner.classes.len())
            .finish()
    }
}

//! JSON seeding format for development and tests.
//!
//! A manifest lists class loaders and classes with their methods. Building
//! it lays the metadata out in a fresh [`SharedCache`], registers the
//! loaders, loads the classes marked as loaded and returns an index from
//! class/method names to the offsets clients must send.
//!
//! ```json
//! {
//!   "loaders": ["app"],
//!   "classes": [
//!     { "name": "demo/Main", "loader": "app",
//!       "methods": [{ "name": "main", "signature": "([Ljava/lang/String;)V" }] }
//!   ]
//! }
//! ```

use std::path::Path;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::class_table::ClassTable;
use crate::error::ManifestError;
use crate::shared_cache::SharedCache;
use crate::types::{CacheOffset, CacheRecord, ClassChain, CompiledMethod, RomClass, RomMethod};

/// Code body stored for methods the manifest marks as already compiled.
const SEEDED_CODE: &[u8] = b"seeded";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheManifest {
    #[serde(default)]
    pub loaders: Vec<String>,
    #[serde(default)]
    pub classes: Vec<ClassSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSpec {
    pub name: String,
    pub loader: String,
    /// Supertypes, nearest first. Each must be declared in the manifest.
    #[serde(default)]
    pub supers: Vec<String>,
    /// Whether the VM has this class loaded. Unloaded classes exist only
    /// as cache metadata.
    #[serde(default = "default_loaded")]
    pub loaded: bool,
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

fn default_loaded() -> bool {
    true
}

impl ClassSpec {
    pub fn new(name: impl Into<String>, loader: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            loader: loader.into(),
            supers: Vec::new(),
            loaded: true,
            methods: Vec::new(),
        }
    }

    pub fn with_super(mut self, name: impl Into<String>) -> Self {
        self.supers.push(name.into());
        self
    }

    pub fn with_method(mut self, method: MethodSpec) -> Self {
        self.methods.push(method);
        self
    }

    pub fn not_loaded(mut self) -> Self {
        self.loaded = false;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    pub signature: String,
    /// Seed the cache with compiled code for this method.
    #[serde(default)]
    pub compiled: bool,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: signature.into(),
            compiled: false,
        }
    }

    pub fn compiled(mut self) -> Self {
        self.compiled = true;
        self
    }
}

/// Offsets of the classes and methods a manifest laid out.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    classes: FxHashMap<String, IndexedClass>,
}

#[derive(Debug, Clone)]
struct IndexedClass {
    offset: CacheOffset,
    /// (name, signature, offset) per method, in declaration order.
    methods: Vec<(String, String, CacheOffset)>,
}

impl ManifestIndex {
    pub fn class(&self, class: &str) -> Option<CacheOffset> {
        self.classes.get(class).map(|c| c.offset)
    }

    /// Offsets of `class` and of its method `method`.
    ///
    /// `method` is either a bare name (first declaration wins) or a name
    /// immediately followed by its signature, e.g. `put(II)V`.
    pub fn lookup(&self, class: &str, method: &str) -> Option<(CacheOffset, CacheOffset)> {
        let indexed = self.classes.get(class)?;
        let (_, _, offset) = indexed
            .methods
            .iter()
            .find(|(name, signature, _)| {
                name == method
                    || method
                        .strip_prefix(name.as_str())
                        .is_some_and(|rest| rest == signature)
            })?;
        Some((indexed.offset, *offset))
    }
}

/// The result of building a manifest.
#[derive(Debug)]
pub struct BuiltCache {
    pub cache: SharedCache,
    pub classes: ClassTable,
    pub index: ManifestIndex,
}

impl CacheManifest {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn build(&self) -> Result<BuiltCache, ManifestError> {
        let mut builder = SharedCache::builder();

        // Offsets first, so chains and method records can refer to classes
        // declared later in the manifest.
        let mut index = ManifestIndex::default();
        for class in &self.classes {
            if !self.loaders.contains(&class.loader) {
                return Err(ManifestError::UnknownLoader {
                    class: class.name.clone(),
                    loader: class.loader.clone(),
                });
            }
            let offset = builder.reserve();
            let methods = class
                .methods
                .iter()
                .map(|m| (m.name.clone(), m.signature.clone(), builder.reserve()))
                .collect();
            let previous = index
                .classes
                .insert(class.name.clone(), IndexedClass { offset, methods });
            if previous.is_some() {
                return Err(ManifestError::DuplicateClass(class.name.clone()));
            }
        }

        let mut chains = FxHashMap::default();
        for class in &self.classes {
            let mut classes = vec![index.class(&class.name).unwrap_or(CacheOffset::NULL)];
            for supertype in &class.supers {
                let offset =
                    index
                        .class(supertype)
                        .ok_or_else(|| ManifestError::UnknownSupertype {
                            class: class.name.clone(),
                            supertype: supertype.clone(),
                        })?;
                classes.push(offset);
            }
            let chain = builder.push(CacheRecord::ClassChain(ClassChain { classes }));
            chains.insert(class.name.as_str(), chain);
        }

        // A loader is identified by the chain of the first class it defines.
        let mut loader_chains: FxHashMap<&str, CacheOffset> = FxHashMap::default();
        for loader in &self.loaders {
            let chain = self
                .classes
                .iter()
                .find(|class| &class.loader == loader)
                .and_then(|class| chains.get(class.name.as_str()).copied())
                .unwrap_or_else(|| {
                    builder.push(CacheRecord::ClassChain(ClassChain {
                        classes: Vec::new(),
                    }))
                });
            loader_chains.insert(loader.as_str(), chain);
        }

        for class in &self.classes {
            let Some(indexed) = index.classes.get(&class.name) else {
                continue;
            };
            for (spec, (_, _, offset)) in class.methods.iter().zip(&indexed.methods) {
                builder.insert(
                    *offset,
                    CacheRecord::RomMethod(RomMethod {
                        name: spec.name.clone(),
                        signature: spec.signature.clone(),
                        class: indexed.offset,
                    }),
                );
                if spec.compiled {
                    builder.with_compiled(CompiledMethod {
                        method: *offset,
                        opt_level: 0,
                        code: Bytes::from_static(SEEDED_CODE),
                    });
                }
            }
            builder.insert(
                indexed.offset,
                CacheRecord::RomClass(RomClass {
                    name: class.name.clone(),
                    class_chain: chains
                        .get(class.name.as_str())
                        .copied()
                        .unwrap_or(CacheOffset::NULL),
                    loader_chain: loader_chains
                        .get(class.loader.as_str())
                        .copied()
                        .unwrap_or(CacheOffset::NULL),
                    methods: indexed.methods.iter().map(|(_, _, o)| *o).collect(),
                }),
            );
        }

        let cache = builder.build();
        let classes = ClassTable::new();

        let mut loader_ids = FxHashMap::default();
        for (name, chain) in &loader_chains {
            loader_ids.insert(*name, classes.register_loader(*chain));
        }
        for class in self.classes.iter().filter(|class| class.loaded) {
            let (Some(offset), Some(loader)) = (
                index.class(&class.name),
                loader_ids.get(class.loader.as_str()),
            ) else {
                continue;
            };
            classes.load_class(&cache, offset, *loader)?;
        }

        tracing::info!(
            records = cache.len(),
            loaded_classes = classes.len(),
            precompiled = cache.compiled_count(),
            "Built shared cache from manifest"
        );

        Ok(BuiltCache {
            cache,
            classes,
            index,
        })
    }
}

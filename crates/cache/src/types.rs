//! Shared cache record types and identifiers.
//!
//! Everything here is plain data: offsets handed out by the cache,
//! identifiers handed out by the class table, and the records the cache
//! stores at each offset.

use std::fmt;

use bytes::Bytes;

/// Offset of a record inside the shared cache.
///
/// Offsets are opaque to clients; they are produced by the cache and
/// sent back verbatim. Offset `0` never names a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheOffset(pub u64);

impl CacheOffset {
    pub const NULL: CacheOffset = CacheOffset(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for CacheOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Process-local identifier of a loaded class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Process-local identifier of a class loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(pub u32);

/// Positional identity of a resident method: owning class plus slot index.
///
/// Packs into a `u64` so clients can echo a handle they were given earlier.
/// The packed value is never `0`, which the wire format reserves for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub class: ClassId,
    pub index: u16,
}

impl MethodId {
    /// Bit set on every packed handle so a real handle never encodes as null.
    const TAG: u64 = 1 << 63;

    pub fn to_raw(self) -> u64 {
        Self::TAG | (u64::from(self.class.0) << 16) | u64::from(self.index)
    }

    /// Decode a raw handle. Returns `None` for null and for values that
    /// were not produced by [`MethodId::to_raw`].
    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw & Self::TAG == 0 {
            return None;
        }
        let body = raw & !Self::TAG;
        let class = u32::try_from(body >> 16).ok()?;
        let index = u16::try_from(body & 0xffff).ok()?;
        Some(Self {
            class: ClassId(class),
            index,
        })
    }
}

/// Immutable class metadata as stored in the shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomClass {
    pub name: String,
    /// Content identity of this class and its supertypes.
    pub class_chain: CacheOffset,
    /// Chain identifying the loader that defines this class.
    pub loader_chain: CacheOffset,
    /// Method records, in declaration order.
    pub methods: Vec<CacheOffset>,
}

/// Immutable method metadata as stored in the shared cache.
///
/// The record's offset is the method's on-disk descriptor: two resident
/// methods describe the same method iff they point at the same record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomMethod {
    pub name: String,
    pub signature: String,
    /// Offset of the declaring [`RomClass`].
    pub class: CacheOffset,
}

/// Content-derived identity of a class: the class followed by its supertypes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassChain {
    pub classes: Vec<CacheOffset>,
}

/// A record stored at some offset of the shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheRecord {
    RomClass(RomClass),
    RomMethod(RomMethod),
    ClassChain(ClassChain),
}

impl CacheRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheRecord::RomClass(_) => "rom-class",
            CacheRecord::RomMethod(_) => "rom-method",
            CacheRecord::ClassChain(_) => "class-chain",
        }
    }
}

/// Compiled code persisted in the shared cache for one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledMethod {
    /// Offset of the [`RomMethod`] this code belongs to.
    pub method: CacheOffset,
    /// Optimization level the code was produced at.
    pub opt_level: u8,
    pub code: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_id_round_trips_through_raw() {
        let id = MethodId {
            class: ClassId(7),
            index: 3,
        };
        assert_eq!(MethodId::from_raw(id.to_raw()), Some(id));
    }

    #[test]
    fn method_id_never_encodes_as_null() {
        let id = MethodId {
            class: ClassId(0),
            index: 0,
        };
        assert_ne!(id.to_raw(), 0);
    }

    #[test]
    fn untagged_raw_handle_is_rejected() {
        assert_eq!(MethodId::from_raw(0), None);
        assert_eq!(MethodId::from_raw(0x0001_0002), None);
    }
}

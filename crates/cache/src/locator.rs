//! Method lookup within a resident class.

use std::sync::Arc;

use crate::class_table::{ResidentClass, ResidentMethod};
use crate::types::CacheOffset;

/// Find the method of `class` whose on-disk descriptor is `target`.
///
/// Linear scan over the method table. Descriptors are unique within a
/// class, so the first match is the answer; a table that contains the
/// same descriptor twice cannot be resolved by descriptor alone and is
/// reported as not found.
pub fn locate_method(class: &Arc<ResidentClass>, target: CacheOffset) -> Option<ResidentMethod> {
    let mut matches = class
        .methods
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.rom_method == target)
        .map(|(index, _)| index);

    let index = matches.next()?;
    if let Some(duplicate) = matches.next() {
        tracing::warn!(
            class = %class.name,
            descriptor = %target,
            first = index,
            duplicate,
            "Method table holds duplicate descriptors, refusing to pick one"
        );
        return None;
    }

    ResidentMethod::new(Arc::clone(class), u16::try_from(index).ok()?)
}

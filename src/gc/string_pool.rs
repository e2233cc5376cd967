use std::cell::RefCell;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{AllocError, Gc, Heap};
use crate::object::string::{fnv1a, VString};

/// The interning table backing the "content equality implies pointer
/// equality" guarantee for strings.
///
/// Bucketed by the string's own cached FNV-1a hash rather than relying on
/// `Gc<VString>`'s `Hash`/`Eq` impls, which are pointer-identity
/// (appropriate for `Map` keys, but not for "does a string with this
/// *content* already exist" lookups during interning).
///
/// Kept separate from `Heap` so the collector can de-intern dead entries
/// as its own explicit step, run after marking but before the objects
/// themselves are actually swept.
#[derive(Default)]
pub struct StringPool {
  buckets: RefCell<FxHashMap<u64, SmallVec<[Gc<VString>; 1]>>>,
}

impl StringPool {
  pub fn intern(&self, heap: &Heap, s: &str) -> Result<Gc<VString>, AllocError> {
    let hash = fnv1a(s.as_bytes());
    if let Some(bucket) = self.buckets.borrow().get(&hash) {
      if let Some(existing) = bucket.iter().find(|v| v.as_str() == s) {
        return Ok(*existing);
      }
    }
    let allocated = heap.alloc(VString::new(s))?;
    self
      .buckets
      .borrow_mut()
      .entry(hash)
      .or_default()
      .push(allocated);
    Ok(allocated)
  }

  /// Drop every pool entry whose mark bit is clear. Must run after the mark
  /// phase and before sweep frees the underlying objects, or the pool would
  /// retain a dangling handle.
  pub fn remove_unmarked(&self) {
    let mut buckets = self.buckets.borrow_mut();
    buckets.retain(|_, bucket| {
      bucket.retain(|s| s.erase().is_marked());
      !bucket.is_empty()
    });
  }

  pub fn len(&self) -> usize {
    self.buckets.borrow().values().map(|b| b.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

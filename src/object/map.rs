use std::cell::RefCell;
use std::fmt::{self, Debug, Display};
use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use crate::error::{Error, Result};
use crate::gc::{Object, Tracer};
use crate::value::Value;

type MapImpl = IndexMap<Value, Value, BuildHasherDefault<FxHasher>>;

/// Insertion-preserving mapping from `Value` to `Value`. Keys may be any
/// hashable value except `Nil`. Iteration order matches insertion order
/// and is stable across reads, so `pairs`/`next` can walk it safely as
/// long as the map isn't mutated mid-iteration.
pub struct VMap {
  entries: RefCell<MapImpl>,
}

impl VMap {
  pub fn new() -> Self {
    VMap {
      entries: RefCell::new(MapImpl::default()),
    }
  }

  pub fn with_capacity(capacity: usize) -> Self {
    VMap {
      entries: RefCell::new(MapImpl::with_capacity_and_hasher(
        capacity,
        BuildHasherDefault::default(),
      )),
    }
  }

  /// Number of entries actually stored. Not the same thing as the `#`
  /// operator on a map, which always evaluates to `0` per the language's
  /// "maps are unordered" convention; that's handled at the operator
  /// dispatch site, not here.
  pub fn len(&self) -> usize {
    self.entries.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, key: &Value) -> Option<Value> {
    self.entries.borrow().get(key).copied()
  }

  pub fn insert(&self, key: Value, value: Value) -> Result<Option<Value>> {
    if key.is_nil() {
      return Err(Error::simple("map key must not be nil"));
    }
    Ok(self.entries.borrow_mut().insert(key, value))
  }

  pub fn remove(&self, key: &Value) -> Option<Value> {
    self.entries.borrow_mut().shift_remove(key)
  }

  pub fn contains_key(&self, key: &Value) -> bool {
    self.entries.borrow().contains_key(key)
  }

  /// The entry immediately following `key` in insertion order, or the
  /// first entry if `key` is `Nil` (start of iteration). Backs the
  /// `next`/`pairs` builtin.
  pub fn next_after(&self, key: Option<&Value>) -> Option<(Value, Value)> {
    let entries = self.entries.borrow();
    match key {
      None => entries.get_index(0).map(|(k, v)| (*k, *v)),
      Some(k) => {
        let idx = entries.get_index_of(k)?;
        entries.get_index(idx + 1).map(|(k, v)| (*k, *v))
      }
    }
  }

  pub fn to_vec(&self) -> Vec<(Value, Value)> {
    self.entries.borrow().iter().map(|(k, v)| (*k, *v)).collect()
  }
}

impl Default for VMap {
  fn default() -> Self {
    Self::new()
  }
}

impl Object for VMap {}

unsafe impl crate::gc::Trace for VMap {
  fn trace(&self, tracer: &mut Tracer) {
    for (k, v) in self.entries.borrow().iter() {
      tracer.mark_value(k);
      tracer.mark_value(v);
    }
  }
}

impl Debug for VMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_map().entries(self.entries.borrow().iter()).finish()
  }
}

impl Display for VMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{")?;
    for (i, (k, v)) in self.entries.borrow().iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{k}: {v}")?;
    }
    write!(f, "}}")
  }
}

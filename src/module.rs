use std::cell::RefCell;

use rustc_hash::FxHashMap;

use crate::prototype::Chunk;
use crate::value::Value;

/// External collaborator that turns a module name into a compiled
/// `Chunk`. Path resolution, file-system watching, and the surface
/// compiler all live on the host side of this trait; the VM only ever
/// sees the `Chunk` it returns (or the error string it returns instead).
pub trait ModuleLoader {
  fn load(&self, name: &str) -> std::result::Result<Chunk, String>;
}

enum CacheEntry {
  /// A user module: compiled but its root closure may or may not have run
  /// yet. Once run, the resulting exports value replaces this entry.
  Chunk(Chunk),
  /// Either a C-declared module (`defmodule`) or a user module that has
  /// already been executed once; holds the ready exports map (or the
  /// `{error: true, message: ...}` sentinel on load/run failure).
  Ready(Value),
}

/// Name → cached module mapping plus the bookkeeping hot reload needs to
/// replace an already-loaded chunk without disturbing closures made over
/// the old one.
#[derive(Default)]
pub struct ModuleManager {
  cache: RefCell<FxHashMap<Box<str>, CacheEntry>>,
}

impl ModuleManager {
  pub fn new() -> Self {
    ModuleManager::default()
  }

  pub fn register_chunk(&self, name: &str, chunk: Chunk) {
    self
      .cache
      .borrow_mut()
      .insert(name.into(), CacheEntry::Chunk(chunk));
  }

  pub fn register_native(&self, name: &str, exports: Value) {
    self
      .cache
      .borrow_mut()
      .insert(name.into(), CacheEntry::Ready(exports));
  }

  pub fn ready_exports(&self, name: &str) -> Option<Value> {
    match self.cache.borrow().get(name) {
      Some(CacheEntry::Ready(v)) => Some(*v),
      _ => None,
    }
  }

  pub fn pending_chunk(&self, name: &str) -> Option<Chunk> {
    match self.cache.borrow().get(name) {
      Some(CacheEntry::Chunk(c)) => Some(c.clone()),
      _ => None,
    }
  }

  pub fn cache_exports(&self, name: &str, exports: Value) {
    self
      .cache
      .borrow_mut()
      .insert(name.into(), CacheEntry::Ready(exports));
  }

  pub fn is_cached(&self, name: &str) -> bool {
    self.cache.borrow().contains_key(name)
  }

  /// Replace the cached chunk for `name`. The caller (the VM) is
  /// responsible for resetting method tables on any classes already
  /// exported from this module, and for re-running the new chunk on the
  /// next `import`.
  pub fn hot_reload(&self, name: &str, chunk: Chunk) {
    self
      .cache
      .borrow_mut()
      .insert(name.into(), CacheEntry::Chunk(chunk));
  }
}

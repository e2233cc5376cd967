use std::cell::Cell;
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use super::trace::Tracer;
use super::Object;

/// Per-object GC header: a forward link for the heap's intrusive list, a
/// tag for dispatch (a per-type static vtable pointer rather than an enum
/// tag), and a single mark bit reset before each collection.
pub(super) struct GcHeader {
  pub(super) next: Cell<Option<ErasedPtr>>,
  pub(super) mark: Cell<bool>,
  pub(super) size: usize,
  pub(super) vtable: &'static VTable,
}

pub(super) type ErasedPtr = NonNull<GcBox<()>>;

#[repr(C)]
pub(super) struct GcBox<T: ?Sized> {
  pub(super) header: GcHeader,
  pub(super) data: T,
}

pub(super) struct VTable {
  pub(super) free: unsafe fn(ErasedPtr),
  pub(super) trace: unsafe fn(ErasedPtr, &mut Tracer),
  pub(super) display: unsafe fn(ErasedPtr, &mut fmt::Formatter<'_>) -> fmt::Result,
  pub(super) debug: unsafe fn(ErasedPtr, &mut fmt::Formatter<'_>) -> fmt::Result,
}

unsafe fn free_impl<T: Object>(ptr: ErasedPtr) {
  drop(Box::from_raw(ptr.cast::<GcBox<T>>().as_ptr()));
}

unsafe fn trace_impl<T: Object>(ptr: ErasedPtr, tracer: &mut Tracer) {
  ptr.cast::<GcBox<T>>().as_ref().data.trace(tracer);
}

unsafe fn display_impl<T: Object>(ptr: ErasedPtr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
  Display::fmt(&ptr.cast::<GcBox<T>>().as_ref().data, f)
}

unsafe fn debug_impl<T: Object>(ptr: ErasedPtr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
  Debug::fmt(&ptr.cast::<GcBox<T>>().as_ref().data, f)
}

trait HasVTable {
  const VTABLE: &'static VTable;
}

impl<T: Object> HasVTable for T {
  const VTABLE: &'static VTable = &VTable {
    free: free_impl::<T>,
    trace: trace_impl::<T>,
    display: display_impl::<T>,
    debug: debug_impl::<T>,
  };
}

pub(super) fn vtable_of<T: Object>() -> &'static VTable {
  <T as HasVTable>::VTABLE
}

/// A type-erased handle to a heap object, used by the collector while
/// walking the intrusive object list and the gray worklist.
#[derive(Clone, Copy)]
pub struct Any {
  pub(super) ptr: ErasedPtr,
}

impl Any {
  pub(super) fn header(&self) -> &GcHeader {
    unsafe { &self.ptr.as_ref().header }
  }

  pub fn is_marked(&self) -> bool {
    self.header().mark.get()
  }

  pub fn mark(&self) {
    self.header().mark.set(true);
  }

  pub fn addr(&self) -> usize {
    self.ptr.as_ptr() as usize
  }
}

impl Debug for Any {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    unsafe { (self.header().vtable.debug)(self.ptr, f) }
  }
}

impl Display for Any {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    unsafe { (self.header().vtable.display)(self.ptr, f) }
  }
}

impl PartialEq for Any {
  fn eq(&self, other: &Self) -> bool {
    self.ptr == other.ptr
  }
}
impl Eq for Any {}

impl Hash for Any {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.ptr.as_ptr().hash(state)
  }
}

/// A typed, non-owning reference to a heap object.
///
/// Copy/clone are pointer copies: reference-kind values compare and hash
/// by pointer identity, which this type's `PartialEq`/`Hash` impls
/// (delegating to the address) give for free.
pub struct Gc<T: Object> {
  ptr: NonNull<GcBox<T>>,
}

impl<T: Object> Gc<T> {
  pub(super) fn from_box(ptr: NonNull<GcBox<T>>) -> Self {
    Gc { ptr }
  }

  #[inline]
  pub fn get(&self) -> &T {
    unsafe { &self.ptr.as_ref().data }
  }

  #[inline]
  pub fn erase(self) -> Any {
    Any {
      ptr: self.ptr.cast(),
    }
  }

  #[inline]
  pub fn addr(&self) -> usize {
    self.ptr.as_ptr() as usize
  }

  /// Reconstruct a typed reference from an erased one.
  ///
  /// # Safety
  /// `any` must actually point at a `T`.
  pub unsafe fn from_any_unchecked(any: Any) -> Self {
    Gc {
      ptr: any.ptr.cast(),
    }
  }
}

impl<T: Object> Clone for Gc<T> {
  fn clone(&self) -> Self {
    *self
  }
}
impl<T: Object> Copy for Gc<T> {}

impl<T: Object> std::ops::Deref for Gc<T> {
  type Target = T;
  fn deref(&self) -> &T {
    self.get()
  }
}

impl<T: Object> PartialEq for Gc<T> {
  fn eq(&self, other: &Self) -> bool {
    self.ptr == other.ptr
  }
}
impl<T: Object> Eq for Gc<T> {}

impl<T: Object> Hash for Gc<T> {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.ptr.as_ptr().hash(state)
  }
}

impl<T: Object> Debug for Gc<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Debug::fmt(self.get(), f)
  }
}

impl<T: Object> Display for Gc<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Display::fmt(self.get(), f)
  }
}

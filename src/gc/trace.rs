use super::header::Any;
use super::heap::mark_any;
use super::Object;
use crate::value::Value;

/// Implemented by every GC-managed type to enumerate its outgoing
/// references for the mark phase: closures trace their upvalues and any
/// heap-valued constants, lists trace each element, maps trace each key
/// and value, instances trace their class and fields, and so on.
///
/// # Safety
/// Every field holding a `Value` or a `Gc<_>` must be passed to the
/// tracer, or the collector will free a still-reachable object out from
/// under live code.
pub unsafe trait Trace {
  fn trace(&self, tracer: &mut Tracer);
}

/// The gray worklist used by the collector's mark phase.
///
/// `mark_value`/`mark_object` push newly-discovered objects; `drain` pops
/// them and calls back into each object's `Trace::trace` impl until no
/// object remains undiscovered.
pub struct Tracer {
  gray: Vec<Any>,
}

impl Tracer {
  pub(super) fn new() -> Self {
    Tracer { gray: Vec::new() }
  }

  pub fn mark_object<T: Object>(&mut self, obj: crate::gc::Gc<T>) {
    mark_any(obj.erase(), &mut self.gray);
  }

  pub fn mark_any(&mut self, obj: Any) {
    mark_any(obj, &mut self.gray);
  }

  pub fn mark_value(&mut self, value: &Value) {
    if let Some(any) = value.as_any() {
      self.mark_any(any);
    }
  }

  pub(super) fn drain(&mut self) {
    while let Some(obj) = self.gray.pop() {
      let header = obj.header();
      unsafe { (header.vtable.trace)(obj.ptr, self) };
    }
  }
}

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Display};

use rustc_hash::FxHashMap;

use crate::gc::{Gc, Object, Tracer};
use crate::object::class::{Class, NativeClass};
use crate::object::string::VString;
use crate::value::Value;

/// A script-defined object: a back-reference to its class and a
/// per-instance field map. Field lookup misses fall through to the
/// class's method table (see the dispatch rules in the VM's field/method
/// lookup).
pub struct Instance {
  class: Gc<Class>,
  fields: RefCell<FxHashMap<Gc<VString>, Value>>,
}

impl Instance {
  pub fn new(class: Gc<Class>) -> Self {
    Instance {
      class,
      fields: RefCell::new(FxHashMap::default()),
    }
  }

  pub fn class(&self) -> Gc<Class> {
    self.class
  }

  pub fn get_field(&self, name: &str) -> Option<Value> {
    self
      .fields
      .borrow()
      .iter()
      .find(|(k, _)| k.as_str() == name)
      .map(|(_, v)| *v)
  }

  pub fn set_field(&self, name: Gc<VString>, value: Value) {
    self.fields.borrow_mut().insert(name, value);
  }

  pub fn has_field(&self, name: &str) -> bool {
    self.fields.borrow().keys().any(|k| k.as_str() == name)
  }
}

impl Object for Instance {}

unsafe impl crate::gc::Trace for Instance {
  fn trace(&self, tracer: &mut Tracer) {
    tracer.mark_object(self.class);
    for (k, v) in self.fields.borrow().iter() {
      tracer.mark_object(*k);
      tracer.mark_value(v);
    }
  }
}

impl Debug for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<{} instance>", self.class.get().name().as_str())
  }
}

impl Display for Instance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Debug::fmt(self, f)
  }
}

/// An instance of a `NativeClass`: a class back-reference, a host-owned
/// opaque data pointer, a finalized flag (set once the host has released
/// the data so `__gc`/drop logic doesn't double-free), and a field map for
/// any script-visible extra properties.
pub struct NativeInstance {
  class: Gc<NativeClass>,
  data: Cell<Option<Box<dyn std::any::Any>>>,
  finalized: Cell<bool>,
  fields: RefCell<FxHashMap<Gc<VString>, Value>>,
}

impl NativeInstance {
  pub fn new(class: Gc<NativeClass>, data: Box<dyn std::any::Any>) -> Self {
    NativeInstance {
      class,
      data: Cell::new(Some(data)),
      finalized: Cell::new(false),
      fields: RefCell::new(FxHashMap::default()),
    }
  }

  pub fn class(&self) -> Gc<NativeClass> {
    self.class
  }

  pub fn is_finalized(&self) -> bool {
    self.finalized.get()
  }

  pub fn with_data<R>(&self, f: impl FnOnce(&dyn std::any::Any) -> R) -> Option<R> {
    let data = self.data.take();
    let result = data.as_deref().map(f);
    self.data.set(data);
    result
  }

  pub fn finalize(&self) {
    self.data.set(None);
    self.finalized.set(true);
  }

  pub fn get_field(&self, name: &str) -> Option<Value> {
    self
      .fields
      .borrow()
      .iter()
      .find(|(k, _)| k.as_str() == name)
      .map(|(_, v)| *v)
  }

  pub fn set_field(&self, name: Gc<VString>, value: Value) {
    self.fields.borrow_mut().insert(name, value);
  }
}

impl Object for NativeInstance {}

unsafe impl crate::gc::Trace for NativeInstance {
  fn trace(&self, tracer: &mut Tracer) {
    tracer.mark_object(self.class);
    for (k, v) in self.fields.borrow().iter() {
      tracer.mark_object(*k);
      tracer.mark_value(v);
    }
  }
}

impl Debug for NativeInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<{} native instance>", self.class.get().name().as_str())
  }
}

impl Display for NativeInstance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Debug::fmt(self, f)
  }
}

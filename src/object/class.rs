use std::cell::RefCell;
use std::fmt::{self, Debug, Display};

use rustc_hash::FxHashMap;

use crate::gc::{Gc, Object, Tracer};
use crate::magic::{Magic, MagicTable};
use crate::native::{NativeConstructor, NativeMethodDescriptor, NativePropertyDescriptor};
use crate::object::string::VString;
use crate::value::Value;

/// A user-defined class: a display name, a method table, a static table,
/// and the 23-slot magic-method vtable kept in sync with the method table
/// (any method whose name matches a magic mnemonic is mirrored into both).
pub struct Class {
  name: Gc<VString>,
  methods: RefCell<FxHashMap<Gc<VString>, Value>>,
  statics: RefCell<FxHashMap<Gc<VString>, Value>>,
  magic: RefCell<MagicTable>,
}

impl Class {
  pub fn new(name: Gc<VString>) -> Self {
    Class {
      name,
      methods: RefCell::new(FxHashMap::default()),
      statics: RefCell::new(FxHashMap::default()),
      magic: RefCell::new(MagicTable::new()),
    }
  }

  pub fn name(&self) -> Gc<VString> {
    self.name
  }

  pub fn set_method(&self, name: Gc<VString>, value: Value) {
    if let Some(magic) = Magic::from_name(name.as_str()) {
      self.magic.borrow_mut().set(magic, value);
    }
    self.methods.borrow_mut().insert(name, value);
  }

  pub fn get_method(&self, name: &str) -> Option<Value> {
    self
      .methods
      .borrow()
      .iter()
      .find(|(k, _)| k.as_str() == name)
      .map(|(_, v)| *v)
  }

  pub fn set_static(&self, name: Gc<VString>, value: Value) {
    self.statics.borrow_mut().insert(name, value);
  }

  pub fn get_static(&self, name: &str) -> Option<Value> {
    self
      .statics
      .borrow()
      .iter()
      .find(|(k, _)| k.as_str() == name)
      .map(|(_, v)| *v)
  }

  pub fn has_magic(&self, magic: Magic) -> bool {
    self.magic.borrow().has(magic)
  }

  pub fn get_magic(&self, magic: Magic) -> Option<Value> {
    self.magic.borrow().get(magic)
  }

  /// Reset every method/static/magic slot. Used by hot reload to make a
  /// live class pick up a freshly recompiled module's definitions while
  /// preserving the `Class` object's identity for anyone still holding it.
  pub fn reset(&self) {
    self.methods.borrow_mut().clear();
    self.statics.borrow_mut().clear();
    *self.magic.borrow_mut() = MagicTable::new();
  }
}

impl Object for Class {}

unsafe impl crate::gc::Trace for Class {
  fn trace(&self, tracer: &mut Tracer) {
    tracer.mark_object(self.name);
    for (k, v) in self.methods.borrow().iter() {
      tracer.mark_object(*k);
      tracer.mark_value(v);
    }
    for (k, v) in self.statics.borrow().iter() {
      tracer.mark_object(*k);
      tracer.mark_value(v);
    }
  }
}

impl Debug for Class {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<class {}>", self.name.as_str())
  }
}

impl Display for Class {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name.as_str())
  }
}

/// A class backed by host data rather than script bytecode: a constructor,
/// an ordered method descriptor list, a property descriptor list (with
/// getter/setter/read-only), and a single-inheritance parent link.
pub struct NativeClass {
  name: Gc<VString>,
  constructor: Option<NativeConstructor>,
  methods: Vec<NativeMethodDescriptor>,
  properties: Vec<NativePropertyDescriptor>,
  parent: Option<Gc<NativeClass>>,
  instance_data_size: usize,
}

impl NativeClass {
  pub fn new(
    name: Gc<VString>,
    constructor: Option<NativeConstructor>,
    methods: Vec<NativeMethodDescriptor>,
    properties: Vec<NativePropertyDescriptor>,
    parent: Option<Gc<NativeClass>>,
    instance_data_size: usize,
  ) -> Self {
    NativeClass {
      name,
      constructor,
      methods,
      properties,
      parent,
      instance_data_size,
    }
  }

  pub fn name(&self) -> Gc<VString> {
    self.name
  }

  pub fn constructor(&self) -> Option<NativeConstructor> {
    self.constructor
  }

  pub fn instance_data_size(&self) -> usize {
    self.instance_data_size
  }

  pub fn find_method(&self, name: &str) -> Option<NativeMethodDescriptor> {
    self
      .methods
      .iter()
      .find(|m| m.name == name)
      .copied()
      .or_else(|| self.parent.and_then(|p| p.get().find_method(name)))
  }

  pub fn find_property(&self, name: &str) -> Option<NativePropertyDescriptor> {
    self
      .properties
      .iter()
      .find(|p| p.name == name)
      .copied()
      .or_else(|| self.parent.and_then(|p| p.get().find_property(name)))
  }

  /// Statics are keyed by name identical to the method table for script
  /// classes; native classes don't distinguish, so static lookup here just
  /// walks the parent chain for a matching method.
  pub fn find_static(&self, name: &str) -> Option<NativeMethodDescriptor> {
    self.find_method(name)
  }

  pub fn parent(&self) -> Option<Gc<NativeClass>> {
    self.parent
  }
}

impl Object for NativeClass {}

unsafe impl crate::gc::Trace for NativeClass {
  fn trace(&self, tracer: &mut Tracer) {
    tracer.mark_object(self.name);
    if let Some(parent) = self.parent {
      tracer.mark_object(parent);
    }
  }
}

impl Debug for NativeClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<native class {}>", self.name.as_str())
  }
}

impl Display for NativeClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.name.as_str())
  }
}

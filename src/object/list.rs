use std::cell::RefCell;
use std::fmt::{self, Debug, Display};

use crate::error::{Error, Result};
use crate::gc::{Object, Tracer};
use crate::value::Value;

/// Dense ordered sequence of `Value`s, growable in place.
///
/// Backed directly by a `RefCell<Vec<Value>>`: a `Vec` already gives
/// amortised growth, and spare capacity past `len` is simply never
/// observable through `get`/indexing.
pub struct VList {
  items: RefCell<Vec<Value>>,
}

impl VList {
  pub fn new() -> Self {
    VList {
      items: RefCell::new(Vec::new()),
    }
  }

  pub fn with_capacity(capacity: usize) -> Self {
    VList {
      items: RefCell::new(Vec::with_capacity(capacity)),
    }
  }

  pub fn len(&self) -> usize {
    self.items.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn push(&self, value: Value) {
    self.items.borrow_mut().push(value);
  }

  pub fn pop(&self) -> Option<Value> {
    self.items.borrow_mut().pop()
  }

  pub fn get(&self, index: i64) -> Result<Value> {
    if index < 0 {
      return Err(Error::simple(format!("list index {index} is negative")));
    }
    self
      .items
      .borrow()
      .get(index as usize)
      .copied()
      .ok_or_else(|| Error::simple(format!("list index {index} out of range")))
  }

  pub fn set(&self, index: i64, value: Value) -> Result<()> {
    if index < 0 {
      return Err(Error::simple(format!("list index {index} is negative")));
    }
    let mut items = self.items.borrow_mut();
    match items.get_mut(index as usize) {
      Some(slot) => {
        *slot = value;
        Ok(())
      }
      None => Err(Error::simple(format!("list index {index} out of range"))),
    }
  }

  pub fn extend_from_slice(&self, values: &[Value]) {
    self.items.borrow_mut().extend_from_slice(values);
  }

  pub fn to_vec(&self) -> Vec<Value> {
    self.items.borrow().clone()
  }
}

impl Default for VList {
  fn default() -> Self {
    Self::new()
  }
}

impl Object for VList {}

unsafe impl crate::gc::Trace for VList {
  fn trace(&self, tracer: &mut Tracer) {
    for value in self.items.borrow().iter() {
      tracer.mark_value(value);
    }
  }
}

impl Debug for VList {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.items.borrow().iter()).finish()
  }
}

impl Display for VList {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, v) in self.items.borrow().iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{v}")?;
    }
    write!(f, "]")
  }
}

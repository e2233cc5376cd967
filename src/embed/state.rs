use crate::embed::{self, Status, Tag};
use crate::error::Result;
use crate::gc::Gc;
use crate::native::CFunction;
use crate::object::closure::Closure;
use crate::object::fiber::FiberObj;
use crate::value::Value;
use crate::vm::Vm;

/// A stack-index view onto the currently executing native call. Borrowed
/// fresh from a `CFunction`'s `&Vm` — it carries no state of its own
/// beyond that reference, so nothing stops a host from constructing one
/// anywhere it holds a `&Vm`, but indices only resolve meaningfully while
/// a native call is actually on top of `Vm`'s native-call stack.
pub struct State<'a> {
  vm: &'a Vm,
}

impl<'a> State<'a> {
  pub fn new(vm: &'a Vm) -> Self {
    State { vm }
  }

  pub fn vm(&self) -> &'a Vm {
    self.vm
  }

  /// Number of arguments in the current call's window. Indices (including
  /// negative ones) address this fixed argument window, not values pushed
  /// as results afterward — read args before pushing results.
  pub fn top(&self) -> i64 {
    self.window_len() as i64
  }

  fn window_len(&self) -> usize {
    self.vm.argc()
  }

  /// Translate a stack index into a 0-based offset within the current
  /// window, or `None` for an out-of-range or pseudo index.
  fn resolve(&self, index: i64) -> Option<usize> {
    if embed::is_upvalue_index(index) || index == embed::REGISTRY_INDEX {
      return None;
    }
    let len = self.window_len() as i64;
    let rel = if index > 0 { index - 1 } else { len + index };
    if rel < 0 || rel >= len {
      None
    } else {
      Some(rel as usize)
    }
  }

  /// Value at `index` (positive: 1-based from the window's bottom;
  /// negative: from the top; pseudo-indices resolve to the registry or
  /// the running native closure's upvalues). `Nil` if nothing is there.
  pub fn get(&self, index: i64) -> Value {
    if index == embed::REGISTRY_INDEX {
      return Value::Map(self.vm.registry());
    }
    if embed::is_upvalue_index(index) {
      let i = embed::upvalue_of(index) as usize;
      return self
        .vm
        .current_native_closure()
        .and_then(|c| match c.get() {
          Closure::Native(n) => n.upvalues.get(i).copied(),
          Closure::Script(_) => None,
        })
        .unwrap_or(Value::Nil);
    }
    match self.resolve(index) {
      Some(rel) => self.vm.arg(rel),
      None => Value::Nil,
    }
  }

  pub fn type_tag(&self, index: i64) -> Tag {
    if self.is_none(index) {
      return Tag::None;
    }
    Tag::of(self.get(index))
  }

  // -- push --------------------------------------------------------------

  pub fn push_nil(&self) {
    self.vm.push_result(Value::Nil);
  }

  pub fn push_bool(&self, b: bool) {
    self.vm.push_result(Value::Bool(b));
  }

  pub fn push_int(&self, i: i64) {
    self.vm.push_result(Value::Int(i));
  }

  pub fn push_float(&self, f: f64) {
    self.vm.push_result(Value::Float(f));
  }

  pub fn push_string(&self, s: &str) -> Result<()> {
    let interned = self.vm.intern(s)?;
    self.vm.push_result(Value::String(interned));
    Ok(())
  }

  pub fn push_lightuserdata(&self, p: *mut ()) {
    self.vm.push_result(Value::LightUserData(p));
  }

  pub fn push_value(&self, value: Value) {
    self.vm.push_result(value);
  }

  /// Push a native closure with no bound upvalues. Use `push_value` with a
  /// closure built through `object::closure::Closure::new_native` directly
  /// when upvalues need to travel with it.
  pub fn push_cfunction(&self, f: CFunction, arity: i32, name: &str) -> Result<()> {
    let closure = self.vm.heap().alloc(Closure::new_native(f, arity, name))?;
    self.vm.push_result(Value::Closure(closure));
    Ok(())
  }

  // -- to ------------------------------------------------------------------

  pub fn to_bool(&self, index: i64) -> bool {
    self.get(index).truthy()
  }

  pub fn to_int(&self, index: i64) -> i64 {
    self.to_intx(index).unwrap_or(0)
  }

  pub fn to_intx(&self, index: i64) -> Option<i64> {
    match self.get(index) {
      Value::Int(i) => Some(i),
      Value::Float(f) => Some(f as i64),
      _ => None,
    }
  }

  pub fn to_float(&self, index: i64) -> f64 {
    self.to_floatx(index).unwrap_or(0.0)
  }

  pub fn to_floatx(&self, index: i64) -> Option<f64> {
    match self.get(index) {
      Value::Int(i) => Some(i as f64),
      Value::Float(f) => Some(f),
      _ => None,
    }
  }

  pub fn to_lightuserdata(&self, index: i64) -> Option<*mut ()> {
    match self.get(index) {
      Value::LightUserData(p) => Some(p),
      _ => None,
    }
  }

  pub fn to_fiber(&self, index: i64) -> Option<Gc<FiberObj>> {
    match self.get(index) {
      Value::Fiber(f) => Some(f),
      _ => None,
    }
  }

  // -- is ------------------------------------------------------------------

  pub fn is_nil(&self, index: i64) -> bool {
    self.get(index).is_nil()
  }

  pub fn is_bool(&self, index: i64) -> bool {
    matches!(self.get(index), Value::Bool(_))
  }

  pub fn is_int(&self, index: i64) -> bool {
    matches!(self.get(index), Value::Int(_))
  }

  pub fn is_float(&self, index: i64) -> bool {
    matches!(self.get(index), Value::Float(_))
  }

  pub fn is_string(&self, index: i64) -> bool {
    matches!(self.get(index), Value::String(_))
  }

  pub fn is_fiber(&self, index: i64) -> bool {
    matches!(self.get(index), Value::Fiber(_))
  }

  pub fn is_none(&self, index: i64) -> bool {
    self.resolve(index).is_none() && index != embed::REGISTRY_INDEX && !embed::is_upvalue_index(index)
  }

  /// Run `closure` protected: `Status::Ok` with results pushed, or
  /// `Status::ErrRun` with the error value pushed in their place.
  pub fn pcall(&self, closure: Value, args: &[Value]) -> Status {
    let mut results = self.vm.pcall(closure, args);
    let ok = results.first().copied().map(|v| v.truthy()).unwrap_or(false);
    results.remove(0);
    for v in results {
      self.vm.push_result(v);
    }
    if ok {
      Status::Ok
    } else {
      Status::ErrRun
    }
  }
}

use crate::error::Result;
use crate::object::instance::NativeInstance;
use crate::value::Value;
use crate::vm::Vm;

/// A native function bridged into the dispatch loop. Arguments are read
/// directly out of the current register window; the return value is the
/// number of results the function pushed (negative means an error, with
/// the error value left on top of the stack).
pub type CFunction = fn(&Vm) -> Result<i32>;

pub type NativeGetter = fn(&Vm, &NativeInstance) -> Result<Value>;
pub type NativeSetter = fn(&Vm, &NativeInstance, Value) -> Result<()>;
pub type NativeConstructor = fn(&Vm, &[Value]) -> Result<Box<dyn std::any::Any>>;

#[derive(Clone, Copy)]
pub struct NativeMethodDescriptor {
  pub name: &'static str,
  pub function: CFunction,
  pub arity: i32,
}

#[derive(Clone, Copy)]
pub struct NativePropertyDescriptor {
  pub name: &'static str,
  pub getter: NativeGetter,
  pub setter: Option<NativeSetter>,
  pub read_only: bool,
}

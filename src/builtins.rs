//! Core-language surface that isn't expressed as an ordinary opcode: the
//! `Fiber` namespace (`create`/`yield`/`current`/`abort`) and the `resume`
//! method every fiber value carries. Everything else — `print`, `math`,
//! list/map/string helpers — is standard-library surface a host installs
//! itself; this crate only supplies the scheduler primitives the language
//! grammar hard-wires onto fiber values and the `Fiber` identifier.

use crate::error::{Error, Result};
use crate::native::NativeMethodDescriptor;
use crate::object::class::NativeClass;
use crate::object::closure::Closure;
use crate::object::fiber::{FiberObj, FiberState};
use crate::value::Value;
use crate::vm::Vm;

const FIBER_METHODS: &[NativeMethodDescriptor] = &[
  NativeMethodDescriptor {
    name: "create",
    function: fiber_create,
    arity: 1,
  },
  NativeMethodDescriptor {
    name: "yield",
    function: fiber_yield,
    arity: 1,
  },
  NativeMethodDescriptor {
    name: "current",
    function: fiber_current,
    arity: 0,
  },
  NativeMethodDescriptor {
    name: "abort",
    function: fiber_abort,
    arity: 1,
  },
];

/// Registers the `Fiber` global. Called once from `Vm::new`.
pub(crate) fn install(vm: &Vm) -> Result<()> {
  let name = vm.intern("Fiber")?;
  let class = NativeClass::new(name, None, FIBER_METHODS.to_vec(), Vec::new(), None, 0);
  let handle = vm.alloc(class)?;
  vm.set_global(name, Value::NativeClass(handle));
  Ok(())
}

/// `GETFIELD`/`INVOKE` fallback tried before any receiver-specific
/// dispatch (see `vm::fields`): the one instance method a bare
/// `Value::Fiber` carries, since `Value::Fiber` has no entry of its own in
/// the ordinary field-dispatch match.
pub fn lookup(vm: &Vm, receiver: Value, name: &str) -> Result<Option<Value>> {
  match receiver {
    Value::Fiber(_) if name == "resume" => {
      let closure = vm.heap().alloc(Closure::bind_native(fiber_resume, "resume", receiver))?;
      Ok(Some(Value::Closure(closure)))
    }
    _ => Ok(None),
  }
}

fn fiber_create(vm: &Vm) -> Result<i32> {
  let closure = match vm.arg(0) {
    Value::Closure(c) => c,
    other => {
      return Err(Error::simple(format!(
        "Fiber.create expects a function, got {}",
        other.type_name()
      )))
    }
  };
  let fiber = vm.alloc(FiberObj::new(closure, vm.config().max_frames))?;
  vm.push_result(Value::Fiber(fiber));
  Ok(1)
}

fn fiber_yield(vm: &Vm) -> Result<i32> {
  vm.yield_now(vm.arg(0))?;
  Ok(0)
}

fn fiber_current(vm: &Vm) -> Result<i32> {
  vm.push_result(Value::Fiber(vm.current_fiber()));
  Ok(1)
}

fn fiber_abort(vm: &Vm) -> Result<i32> {
  let err = vm.arg(0);
  let fiber = vm.current_fiber();
  fiber.set_error(err);
  fiber.set_state(FiberState::Error);
  Err(Error::simple(err.to_string()))
}

fn fiber_resume(vm: &Vm) -> Result<i32> {
  let fiber = match vm.arg(0) {
    Value::Fiber(f) => f,
    other => {
      return Err(Error::simple(format!(
        "expected a fiber receiver, got {}",
        other.type_name()
      )))
    }
  };
  let arg = vm.arg(1);
  let result = vm.resume_fiber(fiber, arg)?;
  vm.push_result(result);
  Ok(1)
}

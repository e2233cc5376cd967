//! Exercises the fiber scheduler's yield/resume continuation machinery
//! end to end: a script closure calls the real `Fiber.yield` native
//! function mid-expression, suspending across a `CALL` instruction rather
//! than at a frame boundary, and a later `resume` must deliver its
//! argument back into that same call's result register.

use corvid::config::Config;
use corvid::instruction::Op;
use corvid::object::closure::Closure;
use corvid::object::fiber::{FiberObj, FiberState};
use corvid::object::upvalue::UpvalueObj;
use corvid::value::Value;
use corvid::vm::Vm;
use corvid::Result;

fn native_class_method(vm: &Vm, name: &str) -> Value {
  match vm.get_global("Fiber").expect("Fiber global installed") {
    Value::NativeClass(class) => {
      let desc = class.get().find_static(name).expect("method exists");
      let closure = vm
        .heap()
        .alloc(Closure::new_native(desc.function, desc.arity, desc.name))
        .unwrap();
      Value::Closure(closure)
    }
    other => panic!("Fiber is not a native class: {other:?}"),
  }
}

/// `fn(x) { var y = Fiber.yield(x + 1); return y * 2; }`, with the
/// `Fiber.yield` closure threaded in as upvalue 0 instead of looked up
/// through a global (no compiler is available here to emit that lookup).
fn build_body(vm: &Vm) -> Result<Value> {
  let yield_closure = native_class_method(vm, "yield");
  let upvalue = UpvalueObj::open(0);
  upvalue.close(&[yield_closure]);
  let upvalue = vm.heap().alloc(upvalue)?;

  let mut builder = corvid::builder::PrototypeBuilder::new("fiberBody").params(1).max_stack(4);
  builder
    .emit_abc(Op::GetUpval, 1, 0, 0) // r1 = yield
    .emit_abc(Op::AddI, 2, 0, 1) // r2 = x + 1
    .emit_abc(Op::Call, 1, 2, 2) // r1 = yield(r2); suspends here
    .emit_asbx(Op::LoadI, 2, 2) // r2 = 2
    .emit_abc(Op::Mul, 3, 1, 2) // r3 = r1 * r2
    .emit_abc(Op::Return, 3, 2, 0); // return r3

  let proto = builder.build();
  let closure = Closure::new_script(proto, Box::new([upvalue]));
  Ok(Value::Closure(vm.heap().alloc(closure)?))
}

#[test]
fn yield_suspends_mid_call_and_resume_delivers_into_it() {
  let vm = Vm::new(Config::default()).unwrap();
  let body = build_body(&vm).unwrap();
  let closure = match body {
    Value::Closure(c) => c,
    _ => unreachable!(),
  };
  let fiber = vm.heap().alloc(FiberObj::new(closure, vm.config().max_frames)).unwrap();

  let first = vm.resume_fiber(fiber, Value::Int(10)).unwrap();
  assert_eq!(first, Value::Int(11));
  assert_eq!(fiber.get().state(), FiberState::Suspended);

  let second = vm.resume_fiber(fiber, Value::Int(7)).unwrap();
  assert_eq!(second, Value::Int(14));
  assert_eq!(fiber.get().state(), FiberState::Done);
}

#[test]
fn yield_from_the_main_fiber_is_rejected() {
  let vm = Vm::new(Config::default()).unwrap();
  let err = vm.yield_now(Value::Int(1)).unwrap_err();
  assert!(err.to_string().contains("main fiber"));
}

#[test]
fn resuming_a_done_fiber_errors() {
  let vm = Vm::new(Config::default()).unwrap();
  let body = build_body(&vm).unwrap();
  let closure = match body {
    Value::Closure(c) => c,
    _ => unreachable!(),
  };
  let fiber = vm.heap().alloc(FiberObj::new(closure, vm.config().max_frames)).unwrap();
  vm.resume_fiber(fiber, Value::Int(1)).unwrap();
  vm.resume_fiber(fiber, Value::Int(1)).unwrap();
  assert_eq!(fiber.get().state(), FiberState::Done);
  assert!(vm.resume_fiber(fiber, Value::Int(1)).is_err());
}

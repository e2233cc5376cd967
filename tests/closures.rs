//! Hand-assembled bytecode exercising closures, upvalues, and basic
//! arithmetic through the real dispatch loop (`Vm::call`), without going
//! through a compiler.

use corvid::builder::PrototypeBuilder;
use corvid::config::Config;
use corvid::instruction::Op;
use corvid::object::closure::Closure;
use corvid::value::Value;
use corvid::vm::Vm;

/// `fn makeCounter() { var n = 0; return fn() { n = n + 1; return n; }; }`
/// Each call to the returned closure should see the incremented, shared
/// `n` — the defining frame's local is closed over a stack slot that gets
/// captured once, then closed when `makeCounter` returns.
#[test]
fn counter_closure_shares_state_across_calls() {
  let vm = Vm::new(Config::default()).unwrap();

  let mut increment = PrototypeBuilder::new("increment").max_stack(2).upvalue(0, true);
  increment
    .emit_abc(Op::GetUpval, 0, 0, 0) // r0 = n
    .emit_abc(Op::AddI, 0, 0, 1) // r0 = n + 1
    .emit_abc(Op::SetUpval, 0, 0, 0) // n = r0
    .emit_abc(Op::Return, 0, 2, 0); // return r0
  let increment = increment.build();

  let mut make_counter = PrototypeBuilder::new("makeCounter").max_stack(2).nested(increment);
  make_counter
    .emit_asbx(Op::LoadI, 0, 0) // r0 = 0 (the captured local)
    .emit_abx(Op::Closure, 1, 0) // r1 = closure(increment) capturing r0
    .emit_abc(Op::Return, 1, 2, 0); // return r1
  let make_counter = make_counter.build();

  let make_counter = Closure::new_script(make_counter, Box::new([]));
  let make_counter = vm.heap().alloc(make_counter).unwrap();

  let results = vm.call(Value::Closure(make_counter), &[]).unwrap();
  let counter = results[0];
  assert!(matches!(counter, Value::Closure(_)));

  for expected in 1..=3i64 {
    let results = vm.call(counter, &[]).unwrap();
    assert_eq!(results, vec![Value::Int(expected)]);
  }
}

/// `fn add(a, b) { return a + b; }`
#[test]
fn integer_addition_through_the_dispatch_loop() {
  let vm = Vm::new(Config::default()).unwrap();

  let mut add = PrototypeBuilder::new("add").params(2).max_stack(3);
  add
    .emit_abc(Op::Add, 2, 0, 1) // r2 = r0 + r1
    .emit_abc(Op::Return, 2, 2, 0);
  let add = add.build();
  let add = Closure::new_script(add, Box::new([]));
  let add = vm.heap().alloc(add).unwrap();

  let results = vm.call(Value::Closure(add), &[Value::Int(17), Value::Int(25)]).unwrap();
  assert_eq!(results, vec![Value::Int(42)]);
}

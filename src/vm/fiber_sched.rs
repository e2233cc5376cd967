use crate::error::{Error, Result};
use crate::gc::Gc;
use crate::object::fiber::{FiberObj, FiberState};
use crate::value::Value;
use crate::vm::Vm;

/// `resume(fiber, arg)`: hand control to `fiber`, returning either the
/// value it yields or the value it completes with. Errors raised inside
/// the fiber surface as an `Err` here rather than a second return channel,
/// matching how every other VM-level call reports failure; the
/// `fiber.resume` *builtin* (in `builtins.rs`) is what wraps this into the
/// `(ok, value)` pair script code actually sees.
pub fn resume(vm: &Vm, fiber: Gc<FiberObj>, arg: Value) -> Result<Value> {
  if !fiber.get().is_resumable() {
    return Err(Error::simple("cannot resume a dead or running fiber"));
  }
  let caller = vm.current_fiber();
  fiber.get().set_caller(Some(caller));
  vm.set_current_fiber(fiber);

  let was_new = fiber.get().state() == FiberState::New;
  fiber.get().set_state(FiberState::Running);

  let outcome = if was_new {
    let closure = fiber
      .get()
      .take_initial_closure()
      .expect("new fiber always has an initial closure");
    fiber.get().push(arg);
    let frames_before = fiber.get().frame_count();
    match crate::vm::call::setup_call(vm, fiber, Value::Closure(closure), 0, 1, 0, -1) {
      Ok(None) => crate::vm::dispatch::run(vm, fiber, frames_before),
      Ok(Some(results)) => {
        fiber.get().set_yield_value(results.first().copied().unwrap_or(Value::Nil));
        fiber.get().set_state(FiberState::Done);
        Ok(())
      }
      Err(e) => Err(e),
    }
  } else {
    match deliver_continuation(vm, fiber, arg) {
      Ok(()) => crate::vm::dispatch::run(vm, fiber, 0),
      Err(e) => Err(e),
    }
  };

  vm.set_current_fiber(caller);
  fiber.get().set_caller(None);

  match outcome {
    Ok(()) => Ok(fiber.get().yield_value()),
    Err(e) => {
      fiber.get().set_state(FiberState::Error);
      Err(e)
    }
  }
}

/// If the fiber was parked mid-call (its top frame carries a
/// `Continuation` left by a `CALL`/`INVOKE` that yielded), run it now with
/// the incoming resume argument and deliver its result to that call's
/// target register, so the dispatch loop can simply continue past it.
fn deliver_continuation(vm: &Vm, fiber: Gc<FiberObj>, arg: Value) -> Result<()> {
  let pending = fiber
    .get()
    .with_frame_mut(|f| f.continuation.take())
    .flatten();
  let Some(cont) = pending else {
    return Ok(());
  };
  let result_base = fiber.get().stack_len();
  let nresults = (cont.callback)(vm, arg)? as usize;
  let results: Vec<Value> = (0..nresults).map(|i| fiber.get().get(result_base + i)).collect();
  fiber.get().truncate(result_base);
  crate::vm::call::deliver_results(fiber.get(), cont.return_to, &results, cont.expected_results);
  Ok(())
}

/// `yield(value)`: suspend the currently running fiber, returning control
/// to its caller. Disallowed across a `pcall` boundary (Q3): a fiber that
/// entered a protected call may not yield back out through it, since the
/// snapshot/restore machinery has no way to re-enter mid-unwind.
pub fn do_yield(vm: &Vm, value: Value) -> Result<()> {
  let fiber = vm.current_fiber();
  if fiber.get().pcall_depth() > 0 {
    return Err(Error::simple("attempt to yield across a protected call"));
  }
  // Nonzero means we're nested inside a `Vm::call` (a magic method, a
  // defer, a module body, a `pcall`) the scheduler has no way to park a
  // continuation through, unlike an ordinary `CALL`/`INVOKE` reached
  // directly from the dispatch loop.
  if fiber.get().host_call_depth() > 0 {
    return Err(Error::simple("attempt to yield across a non-yieldable call"));
  }
  if fiber == vm.main_fiber() {
    return Err(Error::simple("attempt to yield from the main fiber"));
  }
  fiber.get().set_yield_value(value);
  fiber.get().set_state(FiberState::Suspended);
  Ok(())
}

use crate::error::{Error, Result};
use crate::gc::Gc;
use crate::object::closure::Closure;
use crate::object::fiber::{CallFrame, FiberObj};
use crate::value::Value;
use crate::vm::Vm;

pub enum CallResult {
  /// The call ran to completion; here are its results.
  Returned(Vec<Value>),
  /// The fiber yielded before the call completed.
  Yielded(Value),
}

fn as_closure(v: Value) -> Result<Gc<Closure>> {
  match v {
    Value::Closure(c) => Ok(c),
    other => Err(Error::simple(format!(
      "attempt to call a {} value",
      other.type_name()
    ))),
  }
}

/// Set up a new frame for `callee` with `argc` arguments already sitting
/// on the fiber stack at `args_base`, or run it to completion immediately
/// if it's native. Returns `Some(results)` when a native call already
/// produced its results (so the caller doesn't need to enter the dispatch
/// loop at all), or `None` when a script frame was pushed and the caller
/// must keep running the dispatch loop until it pops.
pub(super) fn setup_call(
  vm: &Vm,
  fiber: Gc<FiberObj>,
  callee: Value,
  args_base: usize,
  argc: usize,
  return_to: usize,
  expected_results: i32,
) -> Result<Option<Vec<Value>>> {
  let closure = as_closure(callee)?;
  match closure.get() {
    Closure::Script(script) => {
      let proto = &script.prototype;
      let num_params = proto.num_params as usize;
      let max_stack = proto.max_stack_size as usize;
      if argc > num_params && !proto.is_vararg {
        fiber.truncate(args_base + num_params);
      }
      fiber.ensure_len(args_base + max_stack.max(num_params));
      fiber.push_frame(CallFrame {
        closure,
        ip: 0,
        base: args_base,
        return_to,
        expected_results,
        defer_base: fiber.defer_len(),
        continuation: None,
      })?;
      Ok(None)
    }
    Closure::Native(native) => {
      vm.push_native_closure(closure, args_base, argc);
      let result_base = fiber.stack_len();
      let outcome = (native.function)(vm);
      vm.pop_native_closure();

      if fiber.get().state() == crate::object::fiber::FiberState::Suspended {
        // The native call yielded instead of returning: leave the calling
        // frame exactly where it is and park a continuation on it so the
        // next `resume` can deliver this call's eventual result.
        fiber.truncate(result_base);
        fiber.get().with_frame_mut(|f| {
          f.continuation = Some(crate::object::fiber::Continuation {
            callback: deliver_resumed_value,
            return_to,
            expected_results,
          })
        });
        return Ok(None);
      }

      let nresults = outcome? as usize;
      let results = (0..nresults)
        .map(|i| fiber.get(result_base + i))
        .collect::<Vec<_>>();
      fiber.truncate(result_base);
      Ok(Some(results))
    }
  }
}

/// Default continuation installed when a call yields: the next `resume`
/// argument becomes this call's sole result, exactly as if the callee had
/// returned it directly.
fn deliver_resumed_value(vm: &Vm, value: Value) -> Result<i32> {
  vm.push_result(value);
  Ok(1)
}

/// Copy up to `expected` values from `values` into the fiber stack at
/// `return_to`, padding with `Nil` when the callee returned fewer.
pub(super) fn deliver_results(fiber: &FiberObj, return_to: usize, values: &[Value], expected: i32) {
  let count = if expected < 0 {
    values.len()
  } else {
    expected as usize
  };
  fiber.ensure_len(return_to + count);
  for i in 0..count {
    fiber.set(return_to + i, values.get(i).copied().unwrap_or(Value::Nil));
  }
  if expected < 0 {
    fiber.truncate(return_to + count);
  }
}

/// Host-facing synchronous call: run `callee` on the current fiber to
/// completion (never suspends across a yield from this entry point) and
/// return all results it produced.
pub fn call_value(vm: &Vm, callee: Value, args: &[Value]) -> Result<Vec<Value>> {
  let fiber = vm.current_fiber();
  let base = fiber.stack_len();
  for arg in args {
    fiber.push(*arg);
  }
  let frames_before = fiber.frame_count();
  fiber.enter_host_call();
  let outcome = setup_call(vm, fiber, callee, base, args.len(), base, -1);
  let outcome = outcome.and_then(|setup| match setup {
    Some(results) => {
      fiber.truncate(base);
      Ok(results)
    }
    None => {
      crate::vm::dispatch::run(vm, fiber, frames_before)?;
      let results = fiber.with_stack(|s| s[base..].to_vec());
      fiber.truncate(base);
      Ok(results)
    }
  });
  fiber.exit_host_call();
  outcome
}

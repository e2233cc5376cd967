//! Protected calls: run a closure and turn a runtime error into a value
//! instead of propagating it to the host.

use crate::value::Value;
use crate::vm::Vm;

struct Snapshot {
  frame_count: usize,
  stack_len: usize,
  defer_len: usize,
}

fn snapshot(vm: &Vm) -> Snapshot {
  let fiber = vm.current_fiber();
  Snapshot {
    frame_count: fiber.frame_count(),
    stack_len: fiber.stack_len(),
    defer_len: fiber.defer_len(),
  }
}

/// Unwind back to `snap`: fire any defers registered since the call began
/// (LIFO), close upvalues capturing stack slots above the call, then
/// truncate frames and stack back to where they stood before it.
fn unwind(vm: &Vm, snap: &Snapshot) {
  let fiber = vm.current_fiber();
  let defers = fiber.drain_defers_to(snap.defer_len);
  for defer in defers {
    // Defers run for effect; a defer that itself errors is swallowed here
    // since we're already unwinding from a failure.
    let _ = vm.call(defer, &[]);
  }
  fiber.close_upvalues_from(snap.stack_len);
  fiber.truncate_frames(snap.frame_count);
  fiber.truncate(snap.stack_len);
}

/// Call `closure` with `args`, catching any runtime error. Mirrors the
/// `pcall` builtin's contract: `[true, ...results]` on success, `[false,
/// error_value]` on failure. Yielding across this boundary is rejected by
/// the fiber scheduler via `pcall_depth`.
pub fn protected_call(vm: &Vm, closure: Value, args: &[Value]) -> Vec<Value> {
  let fiber = vm.current_fiber();
  let snap = snapshot(vm);
  fiber.enter_pcall();
  let outcome = vm.call(closure, args);
  fiber.exit_pcall();

  match outcome {
    Ok(mut results) => {
      let mut out = Vec::with_capacity(results.len() + 1);
      out.push(Value::Bool(true));
      out.append(&mut results);
      out
    }
    Err(e) => {
      unwind(vm, &snap);
      let message = e.to_string();
      let error_value = match vm.intern(&message) {
        Ok(s) => Value::String(s),
        Err(_) => Value::Nil,
      };
      vec![Value::Bool(false), error_value]
    }
  }
}

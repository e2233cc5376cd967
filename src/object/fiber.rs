use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug, Display};

use crate::error::{Error, Result};
use crate::gc::{Gc, Object, Tracer};
use crate::object::closure::Closure;
use crate::object::upvalue::UpvalueObj;
use crate::value::Value;

pub const DEFAULT_STACK_CAPACITY: usize = 256;
pub const DEFAULT_MAX_FRAMES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FiberState {
  New,
  Running,
  Suspended,
  Done,
  Error,
}

/// Left on the calling script frame when one of its `CALL`/`INVOKE`
/// targets yields instead of returning. `resume` runs `callback` with the
/// next `resume` argument to produce the eventual result of that call,
/// then delivers it to `return_to` exactly as a normal native return
/// would have, before the dispatch loop continues past the call.
pub struct Continuation {
  pub callback: fn(&crate::vm::Vm, Value) -> Result<i32>,
  pub return_to: usize,
  pub expected_results: i32,
}

/// Per in-flight call. `base` and `return_to` are indices into the owning
/// fiber's value stack rather than raw pointers, since that stack is a
/// growable `Vec` and may relocate; an index survives reallocation where a
/// pointer wouldn't.
pub struct CallFrame {
  pub closure: Gc<Closure>,
  pub ip: usize,
  pub base: usize,
  pub return_to: usize,
  pub expected_results: i32,
  pub defer_base: usize,
  pub continuation: Option<Continuation>,
}

/// A single cooperative execution context: its own value stack, call
/// frames, defer stack, and open-upvalue list.
///
/// Invariants:
/// - the value stack's logical top never exceeds its allocated length;
/// - the open-upvalue list is kept sorted by descending stack index;
/// - reallocating the value stack requires no pointer fix-up, since open
///   upvalues store an index rather than an address;
/// - a fiber in `Done` or `Error` state cannot be resumed.
pub struct FiberObj {
  stack: RefCell<Vec<Value>>,
  frames: RefCell<Vec<CallFrame>>,
  defer_stack: RefCell<Vec<Value>>,
  open_upvalues: Cell<Option<Gc<UpvalueObj>>>,
  caller: Cell<Option<Gc<FiberObj>>>,
  initial_closure: Cell<Option<Gc<Closure>>>,
  yield_value: Cell<Value>,
  error_value: Cell<Value>,
  has_error: Cell<bool>,
  state: Cell<FiberState>,
  pcall_depth: Cell<u32>,
  /// Depth of `Vm::call` invocations currently running on top of this
  /// fiber's own dispatch loop (magic methods, defers, module bodies,
  /// `pcall`). Nonzero means we're inside a call the scheduler has no way
  /// to unwind through, so `yield` is rejected there just as a `pcall`
  /// boundary rejects it.
  host_call_depth: Cell<u32>,
  max_frames: usize,
}

impl FiberObj {
  pub fn new_main(max_frames: usize) -> Self {
    FiberObj {
      stack: RefCell::new(Vec::with_capacity(DEFAULT_STACK_CAPACITY)),
      frames: RefCell::new(Vec::new()),
      defer_stack: RefCell::new(Vec::new()),
      open_upvalues: Cell::new(None),
      caller: Cell::new(None),
      initial_closure: Cell::new(None),
      yield_value: Cell::new(Value::Nil),
      error_value: Cell::new(Value::Nil),
      has_error: Cell::new(false),
      state: Cell::new(FiberState::Running),
      pcall_depth: Cell::new(0),
      host_call_depth: Cell::new(0),
      max_frames,
    }
  }

  pub fn new(closure: Gc<Closure>, max_frames: usize) -> Self {
    FiberObj {
      stack: RefCell::new(Vec::with_capacity(DEFAULT_STACK_CAPACITY)),
      frames: RefCell::new(Vec::new()),
      defer_stack: RefCell::new(Vec::new()),
      open_upvalues: Cell::new(None),
      caller: Cell::new(None),
      initial_closure: Cell::new(Some(closure)),
      yield_value: Cell::new(Value::Nil),
      error_value: Cell::new(Value::Nil),
      has_error: Cell::new(false),
      state: Cell::new(FiberState::New),
      pcall_depth: Cell::new(0),
      host_call_depth: Cell::new(0),
      max_frames,
    }
  }

  pub fn state(&self) -> FiberState {
    self.state.get()
  }

  pub fn set_state(&self, state: FiberState) {
    self.state.set(state);
  }

  pub fn is_resumable(&self) -> bool {
    matches!(self.state.get(), FiberState::New | FiberState::Suspended)
  }

  pub fn max_frames(&self) -> usize {
    self.max_frames
  }

  pub fn initial_closure(&self) -> Option<Gc<Closure>> {
    self.initial_closure.get()
  }

  pub fn take_initial_closure(&self) -> Option<Gc<Closure>> {
    self.initial_closure.take()
  }

  pub fn caller(&self) -> Option<Gc<FiberObj>> {
    self.caller.get()
  }

  pub fn set_caller(&self, caller: Option<Gc<FiberObj>>) {
    self.caller.set(caller);
  }

  pub fn yield_value(&self) -> Value {
    self.yield_value.get()
  }

  pub fn set_yield_value(&self, value: Value) {
    self.yield_value.set(value);
  }

  pub fn error_value(&self) -> Value {
    self.error_value.get()
  }

  pub fn has_error(&self) -> bool {
    self.has_error.get()
  }

  pub fn set_error(&self, value: Value) {
    self.error_value.set(value);
    self.has_error.set(true);
  }

  pub fn clear_error(&self) {
    self.error_value.set(Value::Nil);
    self.has_error.set(false);
  }

  pub fn pcall_depth(&self) -> u32 {
    self.pcall_depth.get()
  }

  pub fn enter_pcall(&self) {
    self.pcall_depth.set(self.pcall_depth.get() + 1);
  }

  pub fn exit_pcall(&self) {
    self.pcall_depth.set(self.pcall_depth.get().saturating_sub(1));
  }

  pub fn host_call_depth(&self) -> u32 {
    self.host_call_depth.get()
  }

  pub fn enter_host_call(&self) {
    self.host_call_depth.set(self.host_call_depth.get() + 1);
  }

  pub fn exit_host_call(&self) {
    self.host_call_depth.set(self.host_call_depth.get().saturating_sub(1));
  }

  // -- value stack -------------------------------------------------------

  pub fn stack_len(&self) -> usize {
    self.stack.borrow().len()
  }

  pub fn push(&self, value: Value) {
    self.stack.borrow_mut().push(value);
  }

  pub fn pop(&self) -> Option<Value> {
    self.stack.borrow_mut().pop()
  }

  pub fn get(&self, index: usize) -> Value {
    self.stack.borrow()[index]
  }

  pub fn set(&self, index: usize, value: Value) {
    self.stack.borrow_mut()[index] = value;
  }

  pub fn truncate(&self, len: usize) {
    self.stack.borrow_mut().truncate(len);
  }

  pub fn ensure_len(&self, len: usize) {
    let mut stack = self.stack.borrow_mut();
    if stack.len() < len {
      stack.resize(len, Value::Nil);
    }
  }

  pub fn with_stack<R>(&self, f: impl FnOnce(&[Value]) -> R) -> R {
    f(&self.stack.borrow())
  }

  pub fn with_stack_mut<R>(&self, f: impl FnOnce(&mut [Value]) -> R) -> R {
    f(&mut self.stack.borrow_mut())
  }

  // -- frames --------------------------------------------------------

  pub fn frame_count(&self) -> usize {
    self.frames.borrow().len()
  }

  pub fn push_frame(&self, frame: CallFrame) -> Result<()> {
    if self.frames.borrow().len() >= self.max_frames {
      return Err(Error::simple("stack overflow: too many nested calls"));
    }
    self.frames.borrow_mut().push(frame);
    Ok(())
  }

  pub fn pop_frame(&self) -> Option<CallFrame> {
    self.frames.borrow_mut().pop()
  }

  pub fn truncate_frames(&self, len: usize) {
    self.frames.borrow_mut().truncate(len);
  }

  pub fn with_frame_mut<R>(&self, f: impl FnOnce(&mut CallFrame) -> R) -> Option<R> {
    self.frames.borrow_mut().last_mut().map(f)
  }

  // -- defer stack -----------------------------------------------------

  pub fn defer_len(&self) -> usize {
    self.defer_stack.borrow().len()
  }

  pub fn push_defer(&self, closure: Value) {
    self.defer_stack.borrow_mut().push(closure);
  }

  /// Pop defers down to `base`, returning them in the LIFO firing order
  /// (last deferred runs first).
  pub fn drain_defers_to(&self, base: usize) -> Vec<Value> {
    let mut defers = self.defer_stack.borrow_mut();
    defers.split_off(base).into_iter().rev().collect()
  }

  // -- open upvalues -----------------------------------------------------

  pub fn open_upvalues_head(&self) -> Option<Gc<UpvalueObj>> {
    self.open_upvalues.get()
  }

  pub fn set_open_upvalues_head(&self, head: Option<Gc<UpvalueObj>>) {
    self.open_upvalues.set(head);
  }

  /// Find or create the open upvalue capturing `stack_index`, keeping the
  /// list sorted by descending index so later inserts/closes stay linear.
  pub fn capture_upvalue(
    &self,
    stack_index: usize,
    alloc: impl FnOnce(UpvalueObj) -> Result<Gc<UpvalueObj>>,
  ) -> Result<Gc<UpvalueObj>> {
    let mut prev: Option<Gc<UpvalueObj>> = None;
    let mut current = self.open_upvalues.get();
    while let Some(node) = current {
      match node.get().stack_index() {
        Some(idx) if idx == stack_index => return Ok(node),
        Some(idx) if idx < stack_index => break,
        _ => {
          prev = Some(node);
          current = node.get().next_open();
        }
      }
    }
    let created = alloc(UpvalueObj::open(stack_index))?;
    created.get().set_next_open(current);
    match prev {
      Some(p) => p.get().set_next_open(Some(created)),
      None => self.open_upvalues.set(Some(created)),
    }
    Ok(created)
  }

  /// Close every open upvalue whose captured index is `>= from`.
  pub fn close_upvalues_from(&self, from: usize) {
    let stack = self.stack.borrow();
    let mut current = self.open_upvalues.get();
    let mut new_head = current;
    while let Some(node) = current {
      let idx = match node.get().stack_index() {
        Some(idx) => idx,
        None => break,
      };
      if idx < from {
        break;
      }
      node.get().close(&stack);
      new_head = node.get().next_open();
      current = new_head;
    }
    drop(stack);
    self.open_upvalues.set(new_head);
  }
}

impl Object for FiberObj {}

unsafe impl crate::gc::Trace for FiberObj {
  fn trace(&self, tracer: &mut Tracer) {
    for value in self.stack.borrow().iter() {
      tracer.mark_value(value);
    }
    for frame in self.frames.borrow().iter() {
      tracer.mark_object(frame.closure);
    }
    for value in self.defer_stack.borrow().iter() {
      tracer.mark_value(value);
    }
    if let Some(head) = self.open_upvalues.get() {
      tracer.mark_object(head);
    }
    if let Some(closure) = self.initial_closure.get() {
      tracer.mark_object(closure);
    }
    if let Some(caller) = self.caller.get() {
      tracer.mark_object(caller);
    }
    tracer.mark_value(&self.yield_value.get());
    tracer.mark_value(&self.error_value.get());
  }
}

impl Debug for FiberObj {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<fiber {:?}>", self.state.get())
  }
}

impl Display for FiberObj {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Debug::fmt(self, f)
  }
}

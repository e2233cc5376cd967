mod arith;
mod call;
mod dispatch;
mod fields;
mod fiber_sched;
mod imports;

use std::cell::{Cell, RefCell};

use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gc::{Gc, Heap, StringPool};
use crate::module::{ModuleLoader, ModuleManager};
use crate::object::closure::Closure;
use crate::object::fiber::FiberObj;
use crate::object::map::VMap;
use crate::object::string::VString;
use crate::prototype::Chunk;
use crate::value::Value;

pub use call::CallResult;

/// One entry in the native-call stack: which closure is running and where
/// its arguments sit on the current fiber's value stack.
pub(crate) struct NativeCallFrame {
  pub closure: Gc<Closure>,
  pub args_base: usize,
  pub argc: usize,
}

/// The embeddable runtime: owns the heap, the string pool, the globals
/// table, the module cache, and the fiber currently executing. Everything
/// else (fibers, closures, classes) is reached through `Value`s rooted
/// here.
pub struct Vm {
  heap: Heap,
  strings: StringPool,
  globals: RefCell<FxHashMap<Gc<VString>, Value>>,
  modules: ModuleManager,
  loader: RefCell<Option<Box<dyn ModuleLoader>>>,
  main_fiber: Gc<FiberObj>,
  current_fiber: Cell<Gc<FiberObj>>,
  /// Stack of native calls currently executing, innermost last, so a
  /// trampoline can resolve `UPVALUE_INDEX` against whichever native
  /// closure is actually running, and `arg`/`argc` can find that call's
  /// argument window on the fiber stack.
  native_call_stack: RefCell<Vec<NativeCallFrame>>,
  error_handler: RefCell<Option<Box<dyn Fn(&str)>>>,
  print_handler: RefCell<Option<Box<dyn Fn(&str)>>>,
  /// Backing store for `embed::REGISTRY_INDEX` and the ref/unref table:
  /// a plain Map the embedding API can stash arbitrary values in under
  /// either a caller-chosen key or a freshly minted integer one.
  registry: Gc<VMap>,
  registry_next_ref: Cell<i64>,
  config: Config,
}

impl Vm {
  pub fn new(config: Config) -> Result<Self> {
    let heap = Heap::new(config.gc_initial_threshold, config.gc_growth_factor);
    heap.set_stress_mode(config.stress_gc);
    let strings = StringPool::default();
    let main_fiber = heap.alloc(FiberObj::new_main(config.max_frames))?;
    let registry = heap.alloc(VMap::new())?;
    let vm = Vm {
      heap,
      strings,
      globals: RefCell::new(FxHashMap::default()),
      modules: ModuleManager::new(),
      loader: RefCell::new(None),
      main_fiber,
      current_fiber: Cell::new(main_fiber),
      native_call_stack: RefCell::new(Vec::new()),
      error_handler: RefCell::new(None),
      print_handler: RefCell::new(None),
      registry,
      registry_next_ref: Cell::new(1),
      config,
    };
    crate::builtins::install(&vm)?;
    Ok(vm)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn heap(&self) -> &Heap {
    &self.heap
  }

  pub fn strings(&self) -> &StringPool {
    &self.strings
  }

  pub fn modules(&self) -> &ModuleManager {
    &self.modules
  }

  pub fn set_module_loader(&self, loader: impl ModuleLoader + 'static) {
    *self.loader.borrow_mut() = Some(Box::new(loader));
  }

  pub(crate) fn invoke_loader(&self, name: &str) -> Option<std::result::Result<Chunk, String>> {
    self.loader.borrow().as_ref().map(|l| l.load(name))
  }

  /// Install a chunk directly (bypassing the loader), as a host would for
  /// a module it already compiled itself.
  pub fn register_module(&self, name: &str, chunk: Chunk) {
    imports::register(self, name, chunk);
  }

  /// Resolve and, if necessary, run the module `name`, returning its
  /// exports map (or the `{error, message}` sentinel on failure). Backs
  /// the `IMPORT`/`IMPORT_FROM` opcodes; also callable directly by a host.
  pub fn import(&self, name: &str) -> Result<Value> {
    imports::import(self, name)
  }

  /// Replace a module's chunk and reset the method tables of any classes
  /// its previous run exported, so live instances pick up redefinitions on
  /// the next call through them without losing identity.
  pub fn hot_reload(&self, name: &str, chunk: Chunk) {
    imports::hot_reload(self, name, chunk);
  }

  pub fn set_error_handler(&self, handler: impl Fn(&str) + 'static) {
    *self.error_handler.borrow_mut() = Some(Box::new(handler));
  }

  pub fn set_print_handler(&self, handler: impl Fn(&str) + 'static) {
    *self.print_handler.borrow_mut() = Some(Box::new(handler));
  }

  pub fn report_error(&self, message: &str) {
    match self.error_handler.borrow().as_ref() {
      Some(handler) => handler(message),
      None => eprintln!("{message}"),
    }
  }

  pub fn print(&self, message: &str) {
    match self.print_handler.borrow().as_ref() {
      Some(handler) => handler(message),
      None => println!("{message}"),
    }
  }

  pub fn intern(&self, s: &str) -> Result<Gc<VString>> {
    self.strings.intern(&self.heap, s).map_err(Error::from)
  }

  pub fn main_fiber(&self) -> Gc<FiberObj> {
    self.main_fiber
  }

  pub fn current_fiber(&self) -> Gc<FiberObj> {
    self.current_fiber.get()
  }

  pub(crate) fn set_current_fiber(&self, fiber: Gc<FiberObj>) {
    self.current_fiber.set(fiber);
  }

  pub(crate) fn push_native_closure(&self, closure: Gc<Closure>, args_base: usize, argc: usize) {
    self.native_call_stack.borrow_mut().push(NativeCallFrame {
      closure,
      args_base,
      argc,
    });
  }

  pub(crate) fn pop_native_closure(&self) {
    self.native_call_stack.borrow_mut().pop();
  }

  pub fn current_native_closure(&self) -> Option<Gc<Closure>> {
    self.native_call_stack.borrow().last().map(|f| f.closure)
  }

  /// Number of arguments available to the currently executing native
  /// function (the C-style embedding API's `argc`).
  pub fn argc(&self) -> usize {
    self.native_call_stack.borrow().last().map(|f| f.argc).unwrap_or(0)
  }

  /// Argument `i` (0-based) of the currently executing native function, or
  /// `Nil` if `i` is out of range.
  pub fn arg(&self, i: usize) -> Value {
    let frame = self.native_call_stack.borrow();
    match frame.last() {
      Some(f) if i < f.argc => self.current_fiber().get(f.args_base + i),
      _ => Value::Nil,
    }
  }

  /// Push one return value for the currently executing native function.
  /// Returning `n` from a `CFunction` means the last `n` values pushed
  /// this way (in push order) become its results.
  pub fn push_result(&self, value: Value) {
    self.current_fiber().push(value);
  }

  pub fn get_global(&self, name: &str) -> Option<Value> {
    self
      .globals
      .borrow()
      .iter()
      .find(|(k, _)| k.as_str() == name)
      .map(|(_, v)| *v)
  }

  pub fn set_global(&self, name: Gc<VString>, value: Value) {
    self.globals.borrow_mut().insert(name, value);
  }

  /// The process-wide registry map backing `embed::REGISTRY_INDEX`.
  pub fn registry(&self) -> Gc<VMap> {
    self.registry
  }

  /// Pin `value` under a freshly minted integer key and return it, the
  /// embedding API's `ref` operation.
  pub fn add_ref(&self, value: Value) -> Result<i64> {
    let key = self.registry_next_ref.get();
    self.registry_next_ref.set(key + 1);
    self.registry.get().insert(Value::Int(key), value)?;
    Ok(key)
  }

  /// Release a value pinned by `add_ref`.
  pub fn drop_ref(&self, key: i64) {
    self.registry.get().remove(&Value::Int(key));
  }

  /// Run one mark-sweep cycle, rooting every live fiber's stack/frames,
  /// the globals table, the registry, the current native-closure stack,
  /// and the main fiber (even when it isn't `current_fiber`).
  pub fn collect(&self) {
    let globals = self.globals.borrow();
    let natives = self.native_call_stack.borrow();
    let current = self.current_fiber.get();
    let main = self.main_fiber;
    let registry = self.registry;
    self.heap.collect(
      |tracer| {
        for (k, v) in globals.iter() {
          tracer.mark_object(*k);
          tracer.mark_value(v);
        }
        for frame in natives.iter() {
          tracer.mark_object(frame.closure);
        }
        tracer.mark_object(current);
        tracer.mark_object(main);
        tracer.mark_object(registry);
        let mut fiber = Some(current);
        while let Some(f) = fiber {
          fiber = f.get().caller();
          if let Some(caller) = fiber {
            tracer.mark_object(caller);
          }
        }
      },
      &self.strings,
    );
  }

  fn maybe_collect(&self) {
    if self.heap.should_collect() {
      self.collect();
    }
  }

  /// Allocate through the VM's heap, triggering a collection first if the
  /// threshold (or stress mode) demands it. Every opcode that can reach
  /// this must already have protected any in-flight `Value` it needs to
  /// survive by leaving it on the fiber stack, since allocation may move
  /// the heap's internal bookkeeping (though never the objects themselves
  /// — the heap is non-moving, only the stack is relocatable).
  pub(crate) fn alloc<T: crate::gc::Object>(&self, data: T) -> Result<Gc<T>> {
    self.maybe_collect();
    self.heap.alloc(data).map_err(Error::from)
  }

  /// Run `closure` on the current fiber to completion (not suspending
  /// across a yield) and return every result it produced.
  pub fn call(&self, closure: Value, args: &[Value]) -> Result<Vec<Value>> {
    call::call_value(self, closure, args)
  }

  /// Protected call: never propagates a script error to the caller.
  /// Returns `Ok(values)` with `true` prepended on success, or the error
  /// value on failure, matching the `pcall` builtin's contract.
  pub fn pcall(&self, closure: Value, args: &[Value]) -> Vec<Value> {
    crate::pcall::protected_call(self, closure, args)
  }

  /// Suspend the currently running fiber with `value` as its yield value.
  /// Backs the `Fiber.yield` builtin; errors if called from the main fiber
  /// or across a non-yieldable boundary (a `pcall` or a nested `Vm::call`).
  pub fn yield_now(&self, value: Value) -> Result<()> {
    fiber_sched::do_yield(self, value)
  }

  /// Hand control to `fiber`, returning either the value it yields or the
  /// value it completes with. Backs the `resume` method on fiber values.
  pub fn resume_fiber(&self, fiber: Gc<FiberObj>, arg: Value) -> Result<Value> {
    fiber_sched::resume(self, fiber, arg)
  }
}

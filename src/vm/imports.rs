//! `IMPORT`/`IMPORT_FROM` module resolution: run a module's root closure on
//! first import, cache its exports, and hand back a sentinel map instead of
//! propagating a loader/runtime failure directly.

use crate::error::Result;
use crate::object::closure::Closure;
use crate::object::map::VMap;
use crate::prototype::Chunk;
use crate::value::Value;
use crate::vm::Vm;

pub(super) fn import(vm: &Vm, name: &str) -> Result<Value> {
  if let Some(v) = vm.modules().ready_exports(name) {
    return Ok(v);
  }
  let chunk = match vm.modules().pending_chunk(name) {
    Some(c) => c,
    None => match vm.invoke_loader(name) {
      Some(Ok(c)) => c,
      Some(Err(msg)) => return cache_sentinel(vm, name, &msg),
      None => return cache_sentinel(vm, name, "no module loader registered"),
    },
  };
  run_chunk(vm, name, chunk)
}

fn run_chunk(vm: &Vm, name: &str, chunk: Chunk) -> Result<Value> {
  let closure = vm.alloc(Closure::new_script(chunk.root.clone(), Box::new([])))?;
  match vm.call(Value::Closure(closure), &[]) {
    Ok(results) => {
      let map = VMap::new();
      for (i, export_name) in chunk.exports.iter().enumerate() {
        let value = results.get(i).copied().unwrap_or(Value::Nil);
        let key = Value::String(vm.intern(export_name)?);
        map.insert(key, value)?;
      }
      let handle = vm.alloc(map)?;
      let value = Value::Map(handle);
      vm.modules().cache_exports(name, value);
      Ok(value)
    }
    Err(e) => cache_sentinel(vm, name, &e.to_string()),
  }
}

fn cache_sentinel(vm: &Vm, name: &str, message: &str) -> Result<Value> {
  let map = VMap::new();
  map.insert(Value::String(vm.intern("error")?), Value::Bool(true))?;
  map.insert(Value::String(vm.intern("message")?), Value::String(vm.intern(message)?))?;
  let handle = vm.alloc(map)?;
  let value = Value::Map(handle);
  vm.modules().cache_exports(name, value);
  Ok(value)
}

pub(super) fn register(vm: &Vm, name: &str, chunk: Chunk) {
  vm.modules().register_chunk(name, chunk);
}

/// Reset method tables on any classes the previous exports of `name`
/// handed out, then install `chunk` so the next `import` re-runs it.
pub(super) fn hot_reload(vm: &Vm, name: &str, chunk: Chunk) {
  if let Some(Value::Map(old)) = vm.modules().ready_exports(name) {
    for (_, v) in old.get().to_vec() {
      if let Value::Class(c) = v {
        c.get().reset();
      }
    }
  }
  vm.modules().hot_reload(name, chunk);
}

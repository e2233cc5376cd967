//! Field, property, and method lookup rules shared by `GETFIELD`,
//! `SETFIELD`, and `INVOKE`.

use crate::error::{Error, Result};
use crate::object::closure::Closure;
use crate::value::Value;
use crate::vm::Vm;

fn no_such_field(receiver: &Value, name: &str) -> Error {
  Error::simple(format!(
    "{} has no field '{name}'",
    receiver.type_name()
  ))
}

/// `GETFIELD`/`INVOKE`-target resolution. Builtin properties/methods on
/// List/Map/String/Fiber are tried first; everything else dispatches on
/// the receiver's own kind.
pub fn get_field(vm: &Vm, receiver: Value, name: &str) -> Result<Value> {
  if let Some(builtin) = crate::builtins::lookup(vm, receiver, name)? {
    return Ok(builtin);
  }
  match receiver {
    Value::Instance(inst) => {
      if let Some(v) = inst.get().get_field(name) {
        return Ok(v);
      }
      inst
        .get()
        .class()
        .get()
        .get_method(name)
        .ok_or_else(|| no_such_field(&receiver, name))
    }
    Value::Class(class) => class
      .get()
      .get_method(name)
      .or_else(|| class.get().get_static(name))
      .ok_or_else(|| no_such_field(&receiver, name)),
    Value::NativeObject(obj) => {
      if let Some(v) = obj.get().get_field(name) {
        return Ok(v);
      }
      let class = obj.get().class();
      if let Some(prop) = class.get().find_property(name) {
        return (prop.getter)(vm, obj.get());
      }
      if let Some(method) = class.get().find_method(name) {
        let closure = vm.heap().alloc(Closure::bind_native(
          method.function,
          method.name,
          receiver,
        ))?;
        return Ok(Value::Closure(closure));
      }
      Err(no_such_field(&receiver, name))
    }
    Value::NativeClass(class) => match class.get().find_static(name) {
      Some(m) => {
        let closure = vm.heap().alloc(Closure::new_native(m.function, m.arity, m.name))?;
        Ok(Value::Closure(closure))
      }
      None => Err(no_such_field(&receiver, name)),
    },
    Value::Map(map) => map
      .get()
      .get(&Value::String(vm.intern(name)?))
      .or_else(|| vm.get_global(name))
      .ok_or_else(|| no_such_field(&receiver, name)),
    _ => Err(no_such_field(&receiver, name)),
  }
}

/// `INVOKE`-target resolution. Differs from `get_field` only for `Class`
/// receivers, where statics are tried before methods.
pub fn get_invoke_target(vm: &Vm, receiver: Value, name: &str) -> Result<Value> {
  if let Value::Class(class) = receiver {
    return class
      .get()
      .get_static(name)
      .or_else(|| class.get().get_method(name))
      .ok_or_else(|| no_such_field(&receiver, name));
  }
  get_field(vm, receiver, name)
}

pub fn set_field(vm: &Vm, receiver: Value, name: &str, value: Value) -> Result<()> {
  match receiver {
    Value::Instance(inst) => {
      let key = vm.intern(name)?;
      inst.get().set_field(key, value);
      Ok(())
    }
    Value::Class(class) => {
      let key = vm.intern(name)?;
      class.get().set_method(key, value);
      Ok(())
    }
    Value::NativeObject(obj) => {
      let class = obj.get().class();
      if let Some(prop) = class.get().find_property(name) {
        if prop.read_only {
          return Err(Error::simple(format!("property '{name}' is read-only")));
        }
        return match prop.setter {
          Some(setter) => setter(vm, obj.get(), value),
          None => Err(Error::simple(format!("property '{name}' has no setter"))),
        };
      }
      let key = vm.intern(name)?;
      obj.get().set_field(key, value);
      Ok(())
    }
    Value::Map(map) => {
      let key = Value::String(vm.intern(name)?);
      map.get().insert(key, value)?;
      Ok(())
    }
    _ => Err(no_such_field(&receiver, name)),
  }
}

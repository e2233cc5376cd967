use std::fmt::{self, Debug, Display};
use std::rc::Rc;

use crate::gc::{Gc, Object, Tracer};
use crate::native::CFunction;
use crate::object::upvalue::UpvalueObj;
use crate::prototype::Prototype;
use crate::value::Value;

pub struct ScriptClosure {
  pub prototype: Rc<Prototype>,
  pub upvalues: Box<[Gc<UpvalueObj>]>,
}

pub struct NativeClosure {
  pub function: CFunction,
  pub arity: i32,
  pub receiver: Option<Value>,
  pub name: Box<str>,
  pub upvalues: Box<[Value]>,
}

/// Runtime binding of a prototype (or a native function) to concrete
/// upvalues. Script and native closures share one object kind because
/// every call site that dispatches on "is this callable" needs to treat
/// them uniformly; only the calling convention glue cares which variant
/// it got.
pub enum Closure {
  Script(ScriptClosure),
  Native(NativeClosure),
}

impl Closure {
  pub fn new_script(prototype: Rc<Prototype>, upvalues: Box<[Gc<UpvalueObj>]>) -> Self {
    Closure::Script(ScriptClosure {
      prototype,
      upvalues,
    })
  }

  pub fn new_native(function: CFunction, arity: i32, name: impl Into<Box<str>>) -> Self {
    Closure::Native(NativeClosure {
      function,
      arity,
      receiver: None,
      name: name.into(),
      upvalues: Box::new([]),
    })
  }

  /// Produce a bound-method copy of a native closure carrying `receiver`.
  /// Script methods don't need this: the receiver travels as `slots[0]`
  /// through the ordinary calling convention instead.
  pub fn bind_native(function: CFunction, name: impl Into<Box<str>>, receiver: Value) -> Self {
    Closure::Native(NativeClosure {
      function,
      arity: -1,
      receiver: Some(receiver),
      name: name.into(),
      upvalues: Box::new([]),
    })
  }

  pub fn is_script(&self) -> bool {
    matches!(self, Closure::Script(_))
  }

  pub fn needs_receiver(&self) -> bool {
    match self {
      Closure::Script(s) => s.prototype.needs_receiver,
      Closure::Native(n) => n.receiver.is_some(),
    }
  }

  pub fn arity(&self) -> i32 {
    match self {
      Closure::Script(s) => s.prototype.num_params as i32,
      Closure::Native(n) => n.arity,
    }
  }

  pub fn is_variadic(&self) -> bool {
    match self {
      Closure::Script(s) => s.prototype.is_vararg,
      Closure::Native(n) => n.arity < 0,
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Closure::Script(s) => &s.prototype.name,
      Closure::Native(n) => &n.name,
    }
  }
}

impl Object for Closure {}

unsafe impl crate::gc::Trace for Closure {
  fn trace(&self, tracer: &mut Tracer) {
    match self {
      Closure::Script(s) => {
        for upvalue in s.upvalues.iter() {
          tracer.mark_object(*upvalue);
        }
      }
      Closure::Native(n) => {
        if let Some(receiver) = &n.receiver {
          tracer.mark_value(receiver);
        }
        for upvalue in n.upvalues.iter() {
          tracer.mark_value(upvalue);
        }
      }
    }
  }
}

impl Debug for Closure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "<fn {}>", self.name())
  }
}

impl Display for Closure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    Debug::fmt(self, f)
  }
}

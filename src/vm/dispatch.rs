//! The instruction fetch/decode/execute loop.
//!
//! `run` drives the current fiber's topmost frame until it unwinds back
//! down to `exit_frame_count` (the frame depth the caller entered at), a
//! script error propagates, or the fiber yields. `Vm::call` and the fiber
//! scheduler's `resume` are the two entry points; both push a frame first
//! and then hand control here.

use crate::error::{Error, Result};
use crate::gc::Gc;
use crate::instruction::{decode_abc, decode_abx, decode_asbx, decode_ax, decode_op, Op};
use crate::magic::Magic;
use crate::object::class::Class;
use crate::object::closure::Closure;
use crate::object::fiber::FiberObj;
use crate::object::instance::{Instance, NativeInstance};
use crate::object::list::VList;
use crate::object::map::VMap;
use crate::prototype::Constant;
use crate::value::Value;
use crate::vm::{arith, call, fields, Vm};

pub(crate) fn run(vm: &Vm, fiber: Gc<FiberObj>, exit_frame_count: usize) -> Result<()> {
  loop {
    if fiber.get().frame_count() <= exit_frame_count {
      return Ok(());
    }
    if fiber.get().state() == crate::object::fiber::FiberState::Suspended {
      return Ok(());
    }

    let base = fiber.get().with_frame_mut(|f| f.base).expect("active frame");
    let closure = fiber.get().with_frame_mut(|f| f.closure).expect("active frame");
    let prototype = match closure.get() {
      Closure::Script(s) => s.prototype.clone(),
      Closure::Native(_) => return Err(Error::simple("corrupt call stack: native closure on frame stack")),
    };
    let pc = fiber.get().with_frame_mut(|f| f.ip).expect("active frame");
    let word = *prototype
      .code
      .get(pc)
      .ok_or_else(|| Error::simple("instruction pointer ran past the end of the prototype"))?;
    fiber.get().with_frame_mut(|f| f.ip = pc + 1);
    let op = decode_op(word).ok_or_else(|| Error::simple("invalid opcode"))?;

    match op {
      Op::Move => {
        let i = decode_abc(word);
        let v = reg(fiber, base, i.b);
        set_reg(fiber, base, i.a, v);
      }
      Op::LoadK => {
        let i = decode_abx(word);
        let v = constant_to_value(vm, &prototype.constants, i.bx as usize)?;
        set_reg(fiber, base, i.a, v);
      }
      Op::LoadBool => {
        let i = decode_abc(word);
        set_reg(fiber, base, i.a, Value::Bool(i.b != 0));
        if i.c != 0 {
          skip_next(fiber);
        }
      }
      Op::LoadNil => {
        let i = decode_abc(word);
        for off in 0..=(i.b as usize) {
          set_reg(fiber, base, i.a as usize + off, Value::Nil);
        }
      }
      Op::LoadI => {
        let i = decode_asbx(word);
        set_reg(fiber, base, i.a, Value::Int(i.sbx as i64));
      }
      Op::NewList => {
        let i = decode_abc(word);
        let handle = vm.alloc(VList::with_capacity(i.b as usize))?;
        set_reg(fiber, base, i.a, Value::List(handle));
      }
      Op::NewMap => {
        let i = decode_abc(word);
        let handle = vm.alloc(VMap::with_capacity(i.b as usize))?;
        set_reg(fiber, base, i.a, Value::Map(handle));
      }
      Op::GetIndex => {
        let i = decode_abc(word);
        let recv = reg(fiber, base, i.b);
        let key = reg(fiber, base, i.c);
        let v = get_index(vm, recv, key)?;
        set_reg(fiber, base, i.a, v);
      }
      Op::SetIndex => {
        let i = decode_abc(word);
        let recv = reg(fiber, base, i.a);
        let key = reg(fiber, base, i.b);
        let value = reg(fiber, base, i.c);
        set_index(vm, recv, key, value)?;
      }
      Op::GetField => {
        let i = decode_abc(word);
        let recv = reg(fiber, base, i.b);
        let name = constant_str(&prototype.constants, i.c as usize)?;
        let v = fields::get_field(vm, recv, name)?;
        set_reg(fiber, base, i.a, v);
      }
      Op::SetField => {
        let i = decode_abc(word);
        let recv = reg(fiber, base, i.a);
        let name = constant_str(&prototype.constants, i.c as usize)?;
        let value = reg(fiber, base, i.b);
        fields::set_field(vm, recv, name, value)?;
      }
      Op::NewClass => {
        let i = decode_abx(word);
        let name_str = constant_str(&prototype.constants, i.bx as usize)?;
        let name = vm.intern(name_str)?;
        let handle = vm.alloc(Class::new(name))?;
        set_reg(fiber, base, i.a, Value::Class(handle));
      }
      Op::NewObj => {
        let i = decode_abc(word);
        let class_val = reg(fiber, base, i.b);
        let argc = i.c as usize;
        let args: Vec<Value> = (0..argc).map(|k| reg(fiber, base, i.b as usize + 1 + k)).collect();
        let v = new_obj(vm, class_val, &args)?;
        set_reg(fiber, base, i.a, v);
      }
      Op::GetUpval => {
        let i = decode_abc(word);
        let up = current_upvalue(closure, i.b)?;
        let v = fiber.get().with_stack(|s| up.get().get(s));
        set_reg(fiber, base, i.a, v);
      }
      Op::SetUpval => {
        let i = decode_abc(word);
        let up = current_upvalue(closure, i.b)?;
        let v = reg(fiber, base, i.a);
        fiber.get().with_stack_mut(|s| up.get().set(s, v));
      }
      Op::Closure => {
        let i = decode_abx(word);
        let nested = prototype
          .protos
          .get(i.bx as usize)
          .cloned()
          .ok_or_else(|| Error::simple("invalid nested prototype index"))?;
        let mut upvalues = Vec::with_capacity(nested.upvalues.len());
        for desc in nested.upvalues.iter() {
          let up = if desc.is_local {
            let stack_index = base + desc.index as usize;
            fiber.get().capture_upvalue(stack_index, |obj| vm.alloc(obj))?
          } else {
            current_upvalue(closure, desc.index)?
          };
          upvalues.push(up);
        }
        let handle = vm.alloc(Closure::new_script(nested, upvalues.into_boxed_slice()))?;
        set_reg(fiber, base, i.a, Value::Closure(handle));
      }
      Op::CloseUpvalue => {
        let i = decode_abc(word);
        fiber.get().close_upvalues_from(base + i.a as usize);
      }

      Op::Add => {
        let i = decode_abc(word);
        let (a, b) = (reg(fiber, base, i.b), reg(fiber, base, i.c));
        let result = if let Some(r) = magic_binop(vm, Magic::Add, a, b) {
          r?
        } else if matches!(a, Value::String(_)) || matches!(b, Value::String(_)) {
          concat(vm, a, b)?
        } else {
          arith::add(a, b)?
        };
        set_reg(fiber, base, i.a, result);
      }
      Op::Sub => binop(fiber, base, word, vm, Magic::Sub, arith::sub)?,
      Op::Mul => binop(fiber, base, word, vm, Magic::Mul, arith::mul)?,
      Op::Div => binop(fiber, base, word, vm, Magic::Div, arith::div)?,
      Op::Mod => binop(fiber, base, word, vm, Magic::Mod, arith::modulo)?,
      Op::Idiv => binop(fiber, base, word, vm, Magic::Idiv, arith::idiv)?,
      Op::Unm => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.b);
        let result = match magic_unop(vm, Magic::Unm, a) {
          Some(r) => r?,
          None => arith::unm(a)?,
        };
        set_reg(fiber, base, i.a, result);
      }
      Op::Band => binop(fiber, base, word, vm, Magic::Band, arith::band)?,
      Op::Bor => binop(fiber, base, word, vm, Magic::Bor, arith::bor)?,
      Op::Bxor => binop(fiber, base, word, vm, Magic::Bxor, arith::bxor)?,
      Op::Bnot => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.b);
        let result = match magic_unop(vm, Magic::Bnot, a) {
          Some(r) => r?,
          None => arith::bnot(a)?,
        };
        set_reg(fiber, base, i.a, result);
      }
      Op::Shl => binop(fiber, base, word, vm, Magic::Shl, arith::shl)?,
      Op::Shr => binop(fiber, base, word, vm, Magic::Shr, arith::shr)?,
      Op::AddI => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.b);
        let result = arith::addi(a, i.c as i8)?;
        set_reg(fiber, base, i.a, result);
      }

      Op::Jmp => {
        let i = decode_asbx(word);
        fiber.get().with_frame_mut(|f| f.ip = (f.ip as i32 + i.sbx) as usize);
      }
      Op::Eq => {
        let i = decode_abc(word);
        let (a, b) = (reg(fiber, base, i.a), reg(fiber, base, i.b));
        let eq = match magic_binop(vm, Magic::Eq, a, b) {
          Some(r) => r?.truthy(),
          None => a == b,
        };
        if eq != (i.c != 0) {
          skip_next(fiber);
        }
      }
      Op::Lt => {
        let i = decode_abc(word);
        let (a, b) = (reg(fiber, base, i.a), reg(fiber, base, i.b));
        let lt = match magic_binop(vm, Magic::Lt, a, b) {
          Some(r) => r?.truthy(),
          None => arith::lt(a, b)?,
        };
        if lt != (i.c != 0) {
          skip_next(fiber);
        }
      }
      Op::Le => {
        let i = decode_abc(word);
        let (a, b) = (reg(fiber, base, i.a), reg(fiber, base, i.b));
        let le = match magic_binop(vm, Magic::Le, a, b) {
          Some(r) => r?.truthy(),
          None => arith::le(a, b)?,
        };
        if le != (i.c != 0) {
          skip_next(fiber);
        }
      }
      Op::EqK => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.a);
        let k = constant_to_value(vm, &prototype.constants, i.b as usize)?;
        if (a == k) != i.k {
          skip_next(fiber);
        }
      }
      Op::EqI => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.a);
        let eq = a == Value::Int(i.c as i8 as i64);
        if eq != i.k {
          skip_next(fiber);
        }
      }
      Op::LtI => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.a);
        let lt = arith::lt(a, Value::Int(i.c as i8 as i64))?;
        if lt != i.k {
          skip_next(fiber);
        }
      }
      Op::LeI => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.a);
        let le = arith::le(a, Value::Int(i.c as i8 as i64))?;
        if le != i.k {
          skip_next(fiber);
        }
      }
      Op::Test => {
        let i = decode_abc(word);
        let a = reg(fiber, base, i.a);
        if a.truthy() != (i.c != 0) {
          skip_next(fiber);
        }
      }

      Op::Call => {
        let i = decode_abc(word);
        let callee = reg(fiber, base, i.a);
        let top = fiber.get().stack_len();
        let args_base = base + i.a as usize + 1;
        let argc = if i.b == 0 { top.saturating_sub(args_base) } else { (i.b - 1) as usize };
        let expected = if i.c == 0 { -1 } else { i.c as i32 - 1 };
        let return_to = base + i.a as usize;
        if let Some(results) = call::setup_call(vm, fiber, callee, args_base, argc, return_to, expected)? {
          call::deliver_results(fiber.get(), return_to, &results, expected);
        }
      }
      Op::CallSelf => {
        let i = decode_abc(word);
        let top = fiber.get().stack_len();
        let args_base = base + i.a as usize;
        let argc = if i.b == 0 { top.saturating_sub(args_base) } else { (i.b - 1) as usize };
        let expected = if i.c == 0 { -1 } else { i.c as i32 - 1 };
        let return_to = args_base;
        if let Some(results) = call::setup_call(vm, fiber, Value::Closure(closure), args_base, argc, return_to, expected)? {
          call::deliver_results(fiber.get(), return_to, &results, expected);
        }
      }
      Op::Invoke => {
        let i = decode_abc(word);
        let ax_word = *prototype
          .code
          .get(pc + 1)
          .ok_or_else(|| Error::simple("INVOKE is missing its method-name operand word"))?;
        fiber.get().with_frame_mut(|f| f.ip = pc + 2);
        let ax = decode_ax(ax_word);
        let name = constant_str(&prototype.constants, ax.ax as usize)?;

        let receiver = reg(fiber, base, i.a);
        let target = fields::get_invoke_target(vm, receiver, name)?;
        let top = fiber.get().stack_len();
        let user_args_at = base + i.a as usize + 1;
        let user_argc = if i.b == 0 { top.saturating_sub(user_args_at) } else { (i.b - 1) as usize };
        let expected = if i.c == 0 { -1 } else { i.c as i32 - 1 };
        let return_to = base + i.a as usize;
        let wants_receiver = needs_receiver_value(target);
        let (args_base, argc) = if wants_receiver {
          (return_to, user_argc + 1)
        } else {
          (user_args_at, user_argc)
        };
        if let Some(results) = call::setup_call(vm, fiber, target, args_base, argc, return_to, expected)? {
          call::deliver_results(fiber.get(), return_to, &results, expected);
        }
      }

      Op::Return | Op::ReturnNdef => {
        let i = decode_abc(word);
        let top = fiber.get().stack_len();
        let start = base + i.a as usize;
        let count = if i.b == 0 { top.saturating_sub(start) } else { (i.b - 1) as usize };
        let values: Vec<Value> = (0..count).map(|k| reg(fiber, base, i.a as usize + k)).collect();

        let frame = fiber.get().pop_frame().expect("return with no active frame");
        if matches!(op, Op::Return) {
          let defers = fiber.get().drain_defers_to(frame.defer_base);
          for defer in defers {
            if let Err(e) = vm.call(defer, &[]) {
              vm.report_error(&e.to_string());
            }
          }
        }
        fiber.get().close_upvalues_from(frame.base);
        fiber.get().truncate(frame.base);
        call::deliver_results(fiber.get(), frame.return_to, &values, frame.expected_results);
      }

      Op::Import => {
        let i = decode_abx(word);
        let name = constant_str(&prototype.constants, i.bx as usize)?;
        let exports = vm.import(name)?;
        check_sentinel(vm, &exports)?;
        set_reg(fiber, base, i.a, exports);
      }
      Op::ImportFrom => {
        let i = decode_abc(word);
        let module_name = constant_str(&prototype.constants, i.b as usize)?;
        let symbol = constant_str(&prototype.constants, i.c as usize)?.to_string();
        let exports = vm.import(module_name)?;
        check_sentinel(vm, &exports)?;
        let value = match exports {
          Value::Map(m) => {
            let key = Value::String(vm.intern(&symbol)?);
            m.get().get(&key).ok_or_else(|| {
              Error::simple(format!("module '{module_name}' has no export '{symbol}'"))
            })?
          }
          _ => return Err(Error::simple("module exports must be a map")),
        };
        set_reg(fiber, base, i.a, value);
      }
      Op::Export => {}

      Op::Defer => {
        let i = decode_abx(word);
        let v = reg(fiber, base, i.a);
        fiber.get().push_defer(v);
      }

      Op::ForPrep => {
        let i = decode_asbx(word);
        let counter = reg(fiber, base, i.a);
        let step = reg(fiber, base, i.a as usize + 2);
        let new_counter = arith::sub(counter, step)?;
        set_reg(fiber, base, i.a, new_counter);
        fiber.get().with_frame_mut(|f| f.ip = (f.ip as i32 + i.sbx) as usize);
      }
      Op::ForLoop => {
        let i = decode_asbx(word);
        let step = reg(fiber, base, i.a as usize + 2);
        let counter = arith::add(reg(fiber, base, i.a), step)?;
        set_reg(fiber, base, i.a, counter);
        let limit = reg(fiber, base, i.a as usize + 1);
        if in_range(counter, limit, step)? {
          fiber.get().with_frame_mut(|f| f.ip = (f.ip as i32 + i.sbx) as usize);
        }
      }
      Op::TForCall => {
        let i = decode_abc(word);
        let callee = reg(fiber, base, i.a);
        let args_base = base + i.a as usize + 1;
        let return_to = base + i.a as usize + 3;
        let expected = i.c as i32;
        if let Some(results) = call::setup_call(vm, fiber, callee, args_base, 2, return_to, expected)? {
          call::deliver_results(fiber.get(), return_to, &results, expected);
        }
      }
      Op::TForLoop => {
        let i = decode_asbx(word);
        let control = reg(fiber, base, i.a as usize + 3);
        if !control.is_nil() {
          set_reg(fiber, base, i.a as usize + 2, control);
          fiber.get().with_frame_mut(|f| f.ip = (f.ip as i32 + i.sbx) as usize);
        }
      }
    }
  }
}

// -- register access -------------------------------------------------------

fn reg(fiber: Gc<FiberObj>, base: usize, i: impl Into<usize>) -> Value {
  let idx = base + i.into();
  fiber.get().ensure_len(idx + 1);
  fiber.get().get(idx)
}

fn set_reg(fiber: Gc<FiberObj>, base: usize, i: impl Into<usize>, v: Value) {
  let idx = base + i.into();
  fiber.get().ensure_len(idx + 1);
  fiber.get().set(idx, v);
}

fn skip_next(fiber: Gc<FiberObj>) {
  fiber.get().with_frame_mut(|f| f.ip += 1);
}

fn current_upvalue(closure: Gc<Closure>, idx: u8) -> Result<Gc<crate::object::upvalue::UpvalueObj>> {
  match closure.get() {
    Closure::Script(s) => s
      .upvalues
      .get(idx as usize)
      .copied()
      .ok_or_else(|| Error::simple("invalid upvalue index")),
    Closure::Native(_) => Err(Error::simple("native closure has no upvalues")),
  }
}

fn needs_receiver_value(v: Value) -> bool {
  matches!(v, Value::Closure(c) if c.get().needs_receiver())
}

// -- constants --------------------------------------------------------------

fn constant_to_value(vm: &Vm, constants: &[Constant], idx: usize) -> Result<Value> {
  match constants.get(idx) {
    Some(Constant::Nil) => Ok(Value::Nil),
    Some(Constant::Bool(b)) => Ok(Value::Bool(*b)),
    Some(Constant::Int(i)) => Ok(Value::Int(*i)),
    Some(Constant::Float(f)) => Ok(Value::Float(*f)),
    Some(Constant::String(s)) => Ok(Value::String(vm.intern(s)?)),
    None => Err(Error::simple("invalid constant index")),
  }
}

fn constant_str(constants: &[Constant], idx: usize) -> Result<&str> {
  match constants.get(idx) {
    Some(Constant::String(s)) => Ok(s),
    _ => Err(Error::simple("expected a string constant")),
  }
}

// -- binary/unary numeric dispatch with magic-method fallback ---------------

fn magic_binop(vm: &Vm, magic: Magic, a: Value, b: Value) -> Option<Result<Value>> {
  if let Value::Instance(inst) = a {
    if let Some(f) = inst.get().class().get().get_magic(magic) {
      return Some(vm.call(f, &[a, b]).map(|r| r.into_iter().next().unwrap_or(Value::Nil)));
    }
  }
  if let Value::Instance(inst) = b {
    if let Some(f) = inst.get().class().get().get_magic(magic) {
      return Some(vm.call(f, &[a, b]).map(|r| r.into_iter().next().unwrap_or(Value::Nil)));
    }
  }
  None
}

fn magic_unop(vm: &Vm, magic: Magic, a: Value) -> Option<Result<Value>> {
  if let Value::Instance(inst) = a {
    if let Some(f) = inst.get().class().get().get_magic(magic) {
      return Some(vm.call(f, &[a]).map(|r| r.into_iter().next().unwrap_or(Value::Nil)));
    }
  }
  None
}

fn binop(
  fiber: Gc<FiberObj>,
  base: usize,
  word: u32,
  vm: &Vm,
  magic: Magic,
  numeric: fn(Value, Value) -> Result<Value>,
) -> Result<()> {
  let i = decode_abc(word);
  let (a, b) = (reg(fiber, base, i.b), reg(fiber, base, i.c));
  let result = match magic_binop(vm, magic, a, b) {
    Some(r) => r?,
    None => numeric(a, b)?,
  };
  set_reg(fiber, base, i.a, result);
  Ok(())
}

fn concat(vm: &Vm, a: Value, b: Value) -> Result<Value> {
  let s = format!("{a}{b}");
  Ok(Value::String(vm.intern(&s)?))
}

// -- indexing -----------------------------------------------------------

fn as_list_index(key: Value) -> Result<i64> {
  match key {
    Value::Int(i) => Ok(i),
    _ => Err(Error::simple("list index must be an integer")),
  }
}

fn get_index(vm: &Vm, recv: Value, key: Value) -> Result<Value> {
  match recv {
    Value::List(l) => l.get().get(as_list_index(key)?),
    Value::Map(m) => Ok(m.get().get(&key).unwrap_or(Value::Nil)),
    Value::Instance(inst) => match inst.get().class().get().get_magic(Magic::GetItem) {
      Some(f) => Ok(vm.call(f, &[recv, key])?.into_iter().next().unwrap_or(Value::Nil)),
      None => Err(Error::simple(format!("{} is not indexable", recv.type_name()))),
    },
    _ => Err(Error::simple(format!("{} is not indexable", recv.type_name()))),
  }
}

fn set_index(vm: &Vm, recv: Value, key: Value, value: Value) -> Result<()> {
  match recv {
    Value::List(l) => l.get().set(as_list_index(key)?, value),
    Value::Map(m) => m.get().insert(key, value).map(|_| ()),
    Value::Instance(inst) => match inst.get().class().get().get_magic(Magic::SetItem) {
      Some(f) => {
        vm.call(f, &[recv, key, value])?;
        Ok(())
      }
      None => Err(Error::simple(format!("{} is not indexable", recv.type_name()))),
    },
    _ => Err(Error::simple(format!("{} is not indexable", recv.type_name()))),
  }
}

// -- object construction -----------------------------------------------

fn new_obj(vm: &Vm, class_val: Value, args: &[Value]) -> Result<Value> {
  match class_val {
    Value::Class(class) => {
      let handle = vm.alloc(Instance::new(class))?;
      if let Some(init) = class.get().get_magic(Magic::Init) {
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Value::Instance(handle));
        call_args.extend_from_slice(args);
        vm.call(init, &call_args)?;
      }
      Ok(Value::Instance(handle))
    }
    Value::NativeClass(class) => {
      let ctor = class
        .get()
        .constructor()
        .ok_or_else(|| Error::simple("native class has no constructor"))?;
      let data = ctor(vm, args)?;
      let handle = vm.alloc(NativeInstance::new(class, data))?;
      Ok(Value::NativeObject(handle))
    }
    _ => Err(Error::simple(format!("cannot instantiate a {} value", class_val.type_name()))),
  }
}

// -- numeric for-loop range check ----------------------------------------

fn in_range(counter: Value, limit: Value, step: Value) -> Result<bool> {
  let ascending = match step {
    Value::Int(s) => s >= 0,
    Value::Float(s) => s >= 0.0,
    _ => return Err(Error::simple("for-loop step must be numeric")),
  };
  if ascending {
    arith::le(counter, limit)
  } else {
    arith::le(limit, counter)
  }
}

// -- module sentinel check ------------------------------------------------

fn check_sentinel(vm: &Vm, exports: &Value) -> Result<()> {
  if let Value::Map(m) = exports {
    let error_key = Value::String(vm.intern("error")?);
    if matches!(m.get().get(&error_key), Some(Value::Bool(true))) {
      let message_key = Value::String(vm.intern("message")?);
      let message = m
        .get()
        .get(&message_key)
        .map(|v| v.to_string())
        .unwrap_or_else(|| "module load failed".to_string());
      return Err(Error::simple(message));
    }
  }
  Ok(())
}

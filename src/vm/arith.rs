//! Numeric operator semantics and the Int/Float promotion rule.
//!
//! All-Int operands stay Int, with two exceptions: `UNM` overflows at
//! `INT64_MIN` (its negation isn't representable as `i64`) and promotes to
//! Float, and any operation mixing Int with Float promotes the Int
//! operand to Float before computing. `ADDI`'s immediate is always
//! applied as a plain numeric add without forcing a promotion beyond what
//! the operand's own type already implies — if the operand is already a
//! Float, the result is a Float; if Int, the result stays Int.

use crate::error::{Error, Result};
use crate::value::Value;

fn type_error(op: &str, v: &Value) -> Error {
  Error::simple(format!("attempt to perform {op} on a {} value", v.type_name()))
}

pub fn add(a: Value, b: Value) -> Result<Value> {
  match (a, b) {
    (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_add(y))),
    (Value::Int(x), Value::Float(y)) => Ok(Value::Float(x as f64 + y)),
    (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x + y as f64)),
    (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x + y)),
    _ => Err(type_error("addition", if a.is_number() { &b } else { &a })),
  }
}

pub fn addi(a: Value, imm: i8) -> Result<Value> {
  match a {
    Value::Int(x) => Ok(Value::Int(x.wrapping_add(imm as i64))),
    Value::Float(x) => Ok(Value::Float(x + imm as f64)),
    _ => Err(type_error("addition", &a)),
  }
}

pub fn sub(a: Value, b: Value) -> Result<Value> {
  match (a, b) {
    (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_sub(y))),
    (Value::Int(x), Value::Float(y)) => Ok(Value::Float(x as f64 - y)),
    (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x - y as f64)),
    (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x - y)),
    _ => Err(type_error("subtraction", if a.is_number() { &b } else { &a })),
  }
}

pub fn mul(a: Value, b: Value) -> Result<Value> {
  match (a, b) {
    (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_mul(y))),
    (Value::Int(x), Value::Float(y)) => Ok(Value::Float(x as f64 * y)),
    (Value::Float(x), Value::Int(y)) => Ok(Value::Float(x * y as f64)),
    (Value::Float(x), Value::Float(y)) => Ok(Value::Float(x * y)),
    _ => Err(type_error("multiplication", if a.is_number() { &b } else { &a })),
  }
}

pub fn div(a: Value, b: Value) -> Result<Value> {
  let (x, y) = as_floats(a, b)?;
  if y == 0.0 {
    return Err(Error::simple("attempt to perform 'n/0'"));
  }
  if let (Value::Int(x), Value::Int(y)) = (a, b) {
    return Ok(Value::Int(x.wrapping_div(y)));
  }
  Ok(Value::Float(x / y))
}

pub fn modulo(a: Value, b: Value) -> Result<Value> {
  match (a, b) {
    (Value::Int(x), Value::Int(y)) => {
      if y == 0 {
        return Err(Error::simple("attempt to perform 'n%%0'"));
      }
      // x % y itself would overflow in two's complement for this one
      // pair (the corresponding division isn't representable).
      if x == i64::MIN && y == -1 {
        return Ok(Value::Int(0));
      }
      Ok(Value::Int(x % y))
    }
    _ => Err(Error::simple("modulo requires integer operands")),
  }
}

/// Floor division. Always computed in `f64` (matching `VMRun.cpp`'s
/// `OP_IDIV`, which floors the double quotient rather than truncating the
/// integer one), then kept as `Int` only if the floored result actually
/// fits an `i64` — the boundary is checked against the exact powers of two
/// `i64::MIN`/`-(i64::MIN)`, not `i64::MAX as f64` (which rounds up to
/// `2^63` and would wrongly accept `i64::MIN / -1` as representable).
pub fn idiv(a: Value, b: Value) -> Result<Value> {
  let (x, y) = as_floats(a, b)?;
  if y == 0.0 {
    return Err(Error::simple("attempt to perform 'n//0'"));
  }
  let result = (x / y).floor();
  let lower = i64::MIN as f64;
  let upper = -(i64::MIN as f64);
  if result >= lower && result < upper {
    Ok(Value::Int(result as i64))
  } else {
    Ok(Value::Float(result))
  }
}

pub fn unm(a: Value) -> Result<Value> {
  match a {
    Value::Int(i64::MIN) => Ok(Value::Float(-(i64::MIN as f64))),
    Value::Int(x) => Ok(Value::Int(-x)),
    Value::Float(x) => Ok(Value::Float(-x)),
    _ => Err(type_error("negation", &a)),
  }
}

fn as_ints(a: Value, b: Value) -> Result<(i64, i64)> {
  match (a, b) {
    (Value::Int(x), Value::Int(y)) => Ok((x, y)),
    _ => Err(type_error("bitwise operation", if matches!(a, Value::Int(_)) { &b } else { &a })),
  }
}

fn as_floats(a: Value, b: Value) -> Result<(f64, f64)> {
  let x = match a {
    Value::Int(x) => x as f64,
    Value::Float(x) => x,
    _ => return Err(type_error("arithmetic", &a)),
  };
  let y = match b {
    Value::Int(y) => y as f64,
    Value::Float(y) => y,
    _ => return Err(type_error("arithmetic", &b)),
  };
  Ok((x, y))
}

pub fn band(a: Value, b: Value) -> Result<Value> {
  let (x, y) = as_ints(a, b)?;
  Ok(Value::Int(x & y))
}

pub fn bor(a: Value, b: Value) -> Result<Value> {
  let (x, y) = as_ints(a, b)?;
  Ok(Value::Int(x | y))
}

pub fn bxor(a: Value, b: Value) -> Result<Value> {
  let (x, y) = as_ints(a, b)?;
  Ok(Value::Int(x ^ y))
}

pub fn bnot(a: Value) -> Result<Value> {
  match a {
    Value::Int(x) => Ok(Value::Int(!x)),
    _ => Err(type_error("bitwise not", &a)),
  }
}

fn shift_amount(b: Value) -> Result<u32> {
  match b {
    Value::Int(x) if (0..64).contains(&x) => Ok(x as u32),
    Value::Int(_) => Err(Error::simple("shift amount out of range [0, 64)")),
    _ => Err(type_error("shift", &b)),
  }
}

pub fn shl(a: Value, b: Value) -> Result<Value> {
  let x = match a {
    Value::Int(x) => x,
    _ => return Err(type_error("shift", &a)),
  };
  let amount = shift_amount(b)?;
  Ok(Value::Int(((x as u64) << amount) as i64))
}

pub fn shr(a: Value, b: Value) -> Result<Value> {
  let x = match a {
    Value::Int(x) => x,
    _ => return Err(type_error("shift", &a)),
  };
  let amount = shift_amount(b)?;
  Ok(Value::Int(((x as u64) >> amount) as i64))
}

pub fn lt(a: Value, b: Value) -> Result<bool> {
  Ok(numeric_cmp(a, b)? == Some(std::cmp::Ordering::Less))
}

pub fn le(a: Value, b: Value) -> Result<bool> {
  Ok(matches!(numeric_cmp(a, b)?, Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)))
}

/// `None` only for a `NaN` operand, which every IEEE-754 ordered
/// comparison treats as simply `false` — not a runtime error.
fn numeric_cmp(a: Value, b: Value) -> Result<Option<std::cmp::Ordering>> {
  match (a, b) {
    (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(&y))),
    _ => {
      let (x, y) = as_floats(a, b)?;
      Ok(x.partial_cmp(&y))
    }
  }
}

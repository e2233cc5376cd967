//! The C-style embedding ABI: stack indices (including pseudo-indices),
//! push/to/check/is_* accessors, status codes, and type tags, layered on
//! top of the `Vm`'s native-call argument window so a host that can't
//! link against `Value` directly still gets a full view of the call.
//!
//! A `CFunction` in this crate already takes `&Vm` rather than an opaque
//! state pointer (see `native::CFunction`), so [`State`] is a thin,
//! zero-cost wrapper around a `&Vm` reference rather than a distinct
//! handle type — it exists purely to carry the index-translation rules.

mod state;

pub use state::State;

/// `REGISTRY_INDEX` returns the process-wide registry map; any index at
/// or below it names the upvalue `REGISTRY_INDEX - i` of the currently
/// executing native closure.
pub const REGISTRY_INDEX: i64 = -1_000_000;

pub const fn upvalue_index(i: i64) -> i64 {
  REGISTRY_INDEX - i
}

pub const fn is_upvalue_index(index: i64) -> bool {
  index < REGISTRY_INDEX
}

pub const fn upvalue_of(index: i64) -> i64 {
  REGISTRY_INDEX - index
}

/// Outcome of a protected top-level call through the embedding ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
  Ok = 0,
  Yield = 1,
  ErrRun = 2,
  ErrSyntax = 3,
  ErrCompile = 4,
  ErrMem = 5,
  ErrErr = 6,
  ErrFile = 7,
}

/// Type tags, numerically aligned with the `Value` discriminant order
/// used elsewhere in the crate (`TNONE` marks "no value at this index").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Tag {
  None = -1,
  Nil = 0,
  Bool,
  Int,
  Float,
  String,
  List,
  Map,
  Object,
  Closure,
  Class,
  Upvalue,
  Fiber,
  CInstance,
  LightUserData,
}

impl Tag {
  pub fn of(value: crate::value::Value) -> Tag {
    use crate::value::Type;
    match value.ty() {
      Type::Nil => Tag::Nil,
      Type::Bool => Tag::Bool,
      Type::Int => Tag::Int,
      Type::Float => Tag::Float,
      Type::String => Tag::String,
      Type::List => Tag::List,
      Type::Map => Tag::Map,
      Type::Instance => Tag::Object,
      Type::Closure => Tag::Closure,
      Type::Class | Type::NativeClass => Tag::Class,
      Type::Upvalue => Tag::Upvalue,
      Type::Fiber => Tag::Fiber,
      Type::NativeObject => Tag::CInstance,
      Type::LightUserData => Tag::LightUserData,
    }
  }
}

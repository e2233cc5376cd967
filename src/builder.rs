//! Hand-assembling `Prototype`s instruction-by-instruction, for tests that
//! need concrete bytecode without going through a compiler.

use std::rc::Rc;

use crate::instruction::{encode_abc, encode_abx, encode_asbx, encode_ax, Op};
use crate::prototype::{Constant, LineInfo, Prototype, UpvalueDesc};

/// A forward-jump target reserved before its address is known. `emit_jmp`
/// records every instruction that references the label; `bind` patches
/// them all once the destination offset is known.
pub struct Label {
  referrers: Vec<usize>,
}

impl Label {
  pub fn new() -> Self {
    Label {
      referrers: Vec::new(),
    }
  }
}

impl Default for Label {
  fn default() -> Self {
    Self::new()
  }
}

pub struct PrototypeBuilder {
  name: String,
  code: Vec<u32>,
  constants: Vec<Constant>,
  protos: Vec<Rc<Prototype>>,
  upvalues: Vec<UpvalueDesc>,
  num_params: u8,
  is_vararg: bool,
  max_stack_size: u8,
  needs_receiver: bool,
  use_defer: bool,
}

impl PrototypeBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    PrototypeBuilder {
      name: name.into(),
      code: Vec::new(),
      constants: Vec::new(),
      protos: Vec::new(),
      upvalues: Vec::new(),
      num_params: 0,
      is_vararg: false,
      max_stack_size: 8,
      needs_receiver: false,
      use_defer: false,
    }
  }

  pub fn params(mut self, n: u8) -> Self {
    self.num_params = n;
    self
  }

  pub fn vararg(mut self, v: bool) -> Self {
    self.is_vararg = v;
    self
  }

  pub fn max_stack(mut self, n: u8) -> Self {
    self.max_stack_size = n;
    self
  }

  pub fn needs_receiver(mut self, v: bool) -> Self {
    self.needs_receiver = v;
    self
  }

  pub fn use_defer(mut self, v: bool) -> Self {
    self.use_defer = v;
    self
  }

  pub fn upvalue(mut self, index: u8, is_local: bool) -> Self {
    self.upvalues.push(UpvalueDesc { index, is_local });
    self
  }

  pub fn nested(mut self, proto: Rc<Prototype>) -> Self {
    self.protos.push(proto);
    self
  }

  /// Intern a constant by value, reusing an existing slot for an equal
  /// entry so repeated literals (a common case in hand-written test
  /// programs) don't bloat the pool.
  pub fn constant(&mut self, c: Constant) -> u32 {
    for (i, existing) in self.constants.iter().enumerate() {
      if constants_equal(existing, &c) {
        return i as u32;
      }
    }
    self.constants.push(c);
    (self.constants.len() - 1) as u32
  }

  pub fn kint(&mut self, v: i64) -> u32 {
    self.constant(Constant::Int(v))
  }

  pub fn kfloat(&mut self, v: f64) -> u32 {
    self.constant(Constant::Float(v))
  }

  pub fn kstring(&mut self, v: impl Into<String>) -> u32 {
    self.constant(Constant::String(v.into().into_boxed_str()))
  }

  pub fn kbool(&mut self, v: bool) -> u32 {
    self.constant(Constant::Bool(v))
  }

  pub fn knil(&mut self) -> u32 {
    self.constant(Constant::Nil)
  }

  fn pc(&self) -> usize {
    self.code.len()
  }

  pub fn emit_abc(&mut self, op: Op, a: u8, b: u8, c: u8) -> &mut Self {
    self.code.push(encode_abc(op, a, false, b, c));
    self
  }

  pub fn emit_abck(&mut self, op: Op, a: u8, k: bool, b: u8, c: u8) -> &mut Self {
    self.code.push(encode_abc(op, a, k, b, c));
    self
  }

  pub fn emit_abx(&mut self, op: Op, a: u8, bx: u32) -> &mut Self {
    self.code.push(encode_abx(op, a, bx));
    self
  }

  pub fn emit_asbx(&mut self, op: Op, a: u8, sbx: i32) -> &mut Self {
    self.code.push(encode_asbx(op, a, sbx));
    self
  }

  pub fn emit_ax(&mut self, op: Op, ax: u32) -> &mut Self {
    self.code.push(encode_ax(op, ax));
    self
  }

  /// Emit a placeholder jump (`sBx = 0`) and register it against `label`
  /// for later patching.
  pub fn emit_jmp_to(&mut self, label: &mut Label, op: Op, a: u8) -> &mut Self {
    label.referrers.push(self.pc());
    self.code.push(encode_asbx(op, a, 0));
    self
  }

  /// Patch every instruction registered against `label` so its `sBx`
  /// lands on the current instruction offset, then consume the label.
  pub fn bind(&mut self, label: Label) -> &mut Self {
    let target = self.pc() as i32;
    for referrer in label.referrers {
      let word = self.code[referrer];
      let op = crate::instruction::decode_op(word).expect("invalid opcode in patch target");
      let a = ((word >> 7) & 0xff) as u8;
      let sbx = target - referrer as i32;
      self.code[referrer] = encode_asbx(op, a, sbx);
    }
    self
  }

  pub fn build(self) -> Rc<Prototype> {
    let code_len = self.code.len();
    Rc::new(Prototype {
      name: self.name.into_boxed_str(),
      source: "<test>".into(),
      short_source: "<test>".into(),
      num_params: self.num_params,
      is_vararg: self.is_vararg,
      num_upvalues: self.upvalues.len() as u8,
      max_stack_size: self.max_stack_size,
      needs_receiver: self.needs_receiver,
      use_defer: self.use_defer,
      line_defined: 1,
      last_line_defined: 1,
      code: self.code,
      constants: self.constants,
      protos: self.protos,
      upvalues: self.upvalues,
      lines: LineInfo {
        deltas: vec![0; code_len],
        checkpoints: vec![crate::prototype::LineCheckpoint { pc: 0, line: 1 }],
      },
    })
  }
}

fn constants_equal(a: &Constant, b: &Constant) -> bool {
  match (a, b) {
    (Constant::Nil, Constant::Nil) => true,
    (Constant::Bool(x), Constant::Bool(y)) => x == y,
    (Constant::Int(x), Constant::Int(y)) => x == y,
    (Constant::Float(x), Constant::Float(y)) => x.to_bits() == y.to_bits(),
    (Constant::String(x), Constant::String(y)) => x == y,
    _ => false,
  }
}

/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

#![allow(non_snake_case)]
#![allow(non_camel_case_types)]

/// As part of this set of test cases, we define a mini IR and implement the
/// `Function` trait for it so that we can use the flowcolor public interface.
use flowcolor::{
  BlockIx, Function, InstKind, InstRegUses, RealReg, RealRegUniverse, Reg,
  RegClass, RegClassInfo, RegUsageMapper, Set, SpillSlot, TypedIxVec,
  VirtualReg, NUM_REG_CLASSES,
};
use flowcolor::MyRange;

use arbitrary::Arbitrary;
use log::{debug, info};
use smallvec::SmallVec;

use std::fmt;

//=============================================================================
// Definition of: Label, RI (reg-or-immediate operands), AM (address modes),
// and Inst (instructions).  Also the get-regs and map-regs operations for
// them.  Destinations are on the left.

#[derive(Clone)]
pub enum Label {
  Unresolved { name: String },
  Resolved { name: String, bix: BlockIx },
}
impl fmt::Debug for Label {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Label::Unresolved { name } => write!(fmt, "??:{}", &name),
      Label::Resolved { name, bix } => write!(fmt, "{:?}:{}", bix, name),
    }
  }
}
impl Label {
  pub fn newUnresolved(name: String) -> Label {
    Label::Unresolved { name }
  }
  pub fn getBlockIx(&self) -> BlockIx {
    match self {
      Label::Resolved { name: _, bix } => *bix,
      Label::Unresolved { .. } => {
        panic!("Label::getBlockIx: unresolved label!")
      }
    }
  }
  pub fn is_resolved(&self) -> bool {
    match self {
      Label::Resolved { .. } => true,
      Label::Unresolved { .. } => false,
    }
  }
  fn name(&self) -> &str {
    match self {
      Label::Unresolved { name } | Label::Resolved { name, .. } => name,
    }
  }
}

#[derive(Copy, Clone)]
pub enum RI {
  Reg { reg: Reg },
  Imm { imm: u32 },
}
pub fn RI_R(reg: Reg) -> RI {
  debug_assert!(reg.get_class() == RegClass::I32);
  RI::Reg { reg }
}
pub fn RI_I(imm: u32) -> RI {
  RI::Imm { imm }
}
impl fmt::Debug for RI {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RI::Reg { reg } => reg.fmt(fmt),
      RI::Imm { imm } => write!(fmt, "{}", imm),
    }
  }
}
impl RI {
  fn addRegReadsTo(&self, uce: &mut Set<Reg>) {
    match self {
      RI::Reg { reg } => uce.insert(*reg),
      RI::Imm { .. } => {}
    }
  }
  fn map_uses<RUM: RegUsageMapper>(&mut self, maps: &RUM) {
    match self {
      RI::Reg { ref mut reg } => map_use(reg, maps),
      RI::Imm { .. } => {}
    }
  }
  pub fn reg(&self) -> Option<Reg> {
    match self {
      RI::Reg { reg } => Some(*reg),
      RI::Imm { .. } => None,
    }
  }
}

#[derive(Copy, Clone)]
pub enum AM {
  RI { base: Reg, offset: u32 },
  RR { base: Reg, offset: Reg },
}
pub fn AM_R(base: Reg) -> AM {
  debug_assert!(base.get_class() == RegClass::I32);
  AM::RI { base, offset: 0 }
}
pub fn AM_RI(base: Reg, offset: u32) -> AM {
  debug_assert!(base.get_class() == RegClass::I32);
  AM::RI { base, offset }
}
pub fn AM_RR(base: Reg, offset: Reg) -> AM {
  debug_assert!(base.get_class() == RegClass::I32);
  debug_assert!(offset.get_class() == RegClass::I32);
  AM::RR { base, offset }
}
impl fmt::Debug for AM {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      AM::RI { base, offset } => write!(fmt, "[{:?}, {:?}]", base, offset),
      AM::RR { base, offset } => write!(fmt, "[{:?}, {:?}]", base, offset),
    }
  }
}
impl AM {
  fn addRegReadsTo(&self, uce: &mut Set<Reg>) {
    match self {
      AM::RI { base, .. } => uce.insert(*base),
      AM::RR { base, offset } => {
        uce.insert(*base);
        uce.insert(*offset);
      }
    }
  }
  fn map_uses<RUM: RegUsageMapper>(&mut self, maps: &RUM) {
    match self {
      AM::RI { ref mut base, .. } => map_use(base, maps),
      AM::RR { ref mut base, ref mut offset } => {
        map_use(base, maps);
        map_use(offset, maps);
      }
    }
  }
  pub fn regs(&self) -> Vec<Reg> {
    match self {
      AM::RI { base, .. } => vec![*base],
      AM::RR { base, offset } => vec![*base, *offset],
    }
  }
}

fn map_use<RUM: RegUsageMapper>(reg: &mut Reg, maps: &RUM) {
  if let Some(vreg) = reg.as_virtual_reg() {
    if let Some(r) = maps.get_use(vreg) {
      *reg = r;
    }
  }
}
fn map_def<RUM: RegUsageMapper>(reg: &mut Reg, maps: &RUM) {
  if let Some(vreg) = reg.as_virtual_reg() {
    if let Some(r) = maps.get_def(vreg) {
      *reg = r;
    }
  }
}
fn map_mod<RUM: RegUsageMapper>(reg: &mut Reg, maps: &RUM) {
  if let Some(vreg) = reg.as_virtual_reg() {
    if let Some(r) = maps.get_mod(vreg) {
      *reg = r;
    }
  }
}

pub fn is_float_class(rc: RegClass) -> bool {
  rc == RegClass::F32 || rc == RegClass::F64
}

#[derive(Copy, Clone, PartialEq, Eq, Arbitrary)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Mod,
  Shr,
  And,
  CmpEQ,
  CmpLT,
  CmpLE,
  CmpGE,
  CmpGT,
}
impl fmt::Debug for BinOp {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{}", self.name())
  }
}
impl fmt::Display for BinOp {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    (self as &dyn fmt::Debug).fmt(fmt)
  }
}
impl BinOp {
  const ALL: [BinOp; 11] = [
    BinOp::Add,
    BinOp::Sub,
    BinOp::Mul,
    BinOp::Mod,
    BinOp::Shr,
    BinOp::And,
    BinOp::CmpEQ,
    BinOp::CmpLT,
    BinOp::CmpLE,
    BinOp::CmpGE,
    BinOp::CmpGT,
  ];

  /// The mnemonic, as accepted by the parser.
  pub fn name(self) -> &'static str {
    match self {
      BinOp::Add => "add",
      BinOp::Sub => "sub",
      BinOp::Mul => "mul",
      BinOp::Mod => "mod",
      BinOp::Shr => "shr",
      BinOp::And => "and",
      BinOp::CmpEQ => "cmp_eq",
      BinOp::CmpLT => "cmp_lt",
      BinOp::CmpLE => "cmp_le",
      BinOp::CmpGE => "cmp_ge",
      BinOp::CmpGT => "cmp_gt",
    }
  }

  pub fn from_name(name: &str) -> Option<BinOp> {
    BinOp::ALL.iter().cloned().find(|op| op.name() == name)
  }

  pub fn calc(self, argL: u32, argR: u32) -> Result<u32, String> {
    Ok(match self {
      BinOp::Add => u32::wrapping_add(argL, argR),
      BinOp::Sub => u32::wrapping_sub(argL, argR),
      BinOp::Mul => u32::wrapping_mul(argL, argR),
      BinOp::Mod => match argL.checked_rem(argR) {
        Some(n) => n,
        None => return Err("modulo by zero".to_string()),
      },
      BinOp::Shr => argL >> (argR & 31),
      BinOp::And => argL & argR,
      BinOp::CmpEQ => (argL == argR) as u32,
      BinOp::CmpLT => (argL < argR) as u32,
      BinOp::CmpLE => (argL <= argR) as u32,
      BinOp::CmpGE => (argL >= argR) as u32,
      BinOp::CmpGT => (argL > argR) as u32,
    })
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Arbitrary)]
pub enum BinOpF {
  FAdd,
  FSub,
  FMul,
  FDiv,
}
impl fmt::Debug for BinOpF {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(
      fmt,
      "{}",
      match self {
        BinOpF::FAdd => "fadd",
        BinOpF::FSub => "fsub",
        BinOpF::FMul => "fmul",
        BinOpF::FDiv => "fdiv",
      }
    )
  }
}
impl fmt::Display for BinOpF {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    (self as &dyn fmt::Debug).fmt(fmt)
  }
}
impl BinOpF {
  pub fn calc(self, argL: f64, argR: f64) -> f64 {
    match self {
      BinOpF::FAdd => argL + argR,
      BinOpF::FSub => argL - argR,
      BinOpF::FMul => argL * argR,
      BinOpF::FDiv => argL / argR,
    }
  }
}

/// Float instructions work on both F32 and F64 registers; the class of the
/// destination decides the precision.
#[derive(Clone)]
pub enum Inst {
  Imm { dst: Reg, imm: u32 },
  ImmF { dst: Reg, imm: f64 },
  Copy { dst: Reg, src: Reg },
  BinOp { op: BinOp, dst: Reg, srcL: Reg, srcR: RI },
  BinOpM { op: BinOp, dst: Reg, srcR: RI }, // "mod" semantics for |dst|
  BinOpF { op: BinOpF, dst: Reg, srcL: Reg, srcR: Reg },
  Load { dst: Reg, addr: AM },
  LoadF { dst: Reg, addr: AM },
  Store { addr: AM, src: Reg },
  StoreF { addr: AM, src: Reg },
  Spill { dst: SpillSlot, src: Reg },
  Reload { dst: Reg, src: SpillSlot },
  Goto { target: Label },
  GotoCTF { cond: Reg, targetT: Label, targetF: Label },
  PrintS { str: String },
  PrintI { reg: Reg },
  PrintF { reg: Reg },
  // Clobbers the function's caller-saved registers.
  Call { callee: String },
  Mark { text: String },
  Finish { reg: Option<Reg> },
}

pub fn i_imm(dst: Reg, imm: u32) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::Imm { dst, imm }
}
pub fn i_immf(dst: Reg, imm: f64) -> Inst {
  debug_assert!(is_float_class(dst.get_class()));
  Inst::ImmF { dst, imm }
}
pub fn i_copy(dst: Reg, src: Reg) -> Inst {
  debug_assert!(dst.get_class() == src.get_class());
  Inst::Copy { dst, src }
}
// For BinOp variants see below

pub fn i_load(dst: Reg, addr: AM) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::Load { dst, addr }
}
pub fn i_loadf(dst: Reg, addr: AM) -> Inst {
  debug_assert!(is_float_class(dst.get_class()));
  Inst::LoadF { dst, addr }
}
pub fn i_store(addr: AM, src: Reg) -> Inst {
  debug_assert!(src.get_class() == RegClass::I32);
  Inst::Store { addr, src }
}
pub fn i_storef(addr: AM, src: Reg) -> Inst {
  debug_assert!(is_float_class(src.get_class()));
  Inst::StoreF { addr, src }
}
pub fn i_goto<'a>(target: &'a str) -> Inst {
  Inst::Goto { target: Label::newUnresolved(target.to_string()) }
}
pub fn i_goto_ctf<'a>(cond: Reg, targetT: &'a str, targetF: &'a str) -> Inst {
  debug_assert!(cond.get_class() == RegClass::I32);
  Inst::GotoCTF {
    cond,
    targetT: Label::newUnresolved(targetT.to_string()),
    targetF: Label::newUnresolved(targetF.to_string()),
  }
}
pub fn i_print_s<'a>(str: &'a str) -> Inst {
  Inst::PrintS { str: str.to_string() }
}
pub fn i_print_i(reg: Reg) -> Inst {
  debug_assert!(reg.get_class() == RegClass::I32);
  Inst::PrintI { reg }
}
pub fn i_print_f(reg: Reg) -> Inst {
  debug_assert!(is_float_class(reg.get_class()));
  Inst::PrintF { reg }
}
pub fn i_call<'a>(callee: &'a str) -> Inst {
  Inst::Call { callee: callee.to_string() }
}
pub fn i_mark<'a>(text: &'a str) -> Inst {
  Inst::Mark { text: text.to_string() }
}
pub fn i_finish(reg: Option<Reg>) -> Inst {
  Inst::Finish { reg }
}

pub fn i_binop(op: BinOp, dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  debug_assert!(srcL.get_class() == RegClass::I32);
  Inst::BinOp { op, dst, srcL, srcR }
}
pub fn i_add(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::Add, dst, srcL, srcR)
}
pub fn i_sub(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::Sub, dst, srcL, srcR)
}
pub fn i_mul(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::Mul, dst, srcL, srcR)
}
pub fn i_mod(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::Mod, dst, srcL, srcR)
}
pub fn i_shr(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::Shr, dst, srcL, srcR)
}
pub fn i_and(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::And, dst, srcL, srcR)
}
pub fn i_cmp_eq(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::CmpEQ, dst, srcL, srcR)
}
pub fn i_cmp_lt(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::CmpLT, dst, srcL, srcR)
}
pub fn i_cmp_le(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::CmpLE, dst, srcL, srcR)
}
pub fn i_cmp_ge(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::CmpGE, dst, srcL, srcR)
}
pub fn i_cmp_gt(dst: Reg, srcL: Reg, srcR: RI) -> Inst {
  i_binop(BinOp::CmpGT, dst, srcL, srcR)
}

// 2-operand versions, for experimentation
pub fn i_binopm(op: BinOp, dst: Reg, srcR: RI) -> Inst {
  debug_assert!(dst.get_class() == RegClass::I32);
  Inst::BinOpM { op, dst, srcR }
}
pub fn i_addm(dst: Reg, srcR: RI) -> Inst {
  i_binopm(BinOp::Add, dst, srcR)
}
pub fn i_subm(dst: Reg, srcR: RI) -> Inst {
  i_binopm(BinOp::Sub, dst, srcR)
}

pub fn i_binopf(op: BinOpF, dst: Reg, srcL: Reg, srcR: Reg) -> Inst {
  debug_assert!(is_float_class(dst.get_class()));
  debug_assert!(srcL.get_class() == dst.get_class());
  debug_assert!(srcR.get_class() == dst.get_class());
  Inst::BinOpF { op, dst, srcL, srcR }
}
pub fn i_fadd(dst: Reg, srcL: Reg, srcR: Reg) -> Inst {
  i_binopf(BinOpF::FAdd, dst, srcL, srcR)
}
pub fn i_fsub(dst: Reg, srcL: Reg, srcR: Reg) -> Inst {
  i_binopf(BinOpF::FSub, dst, srcL, srcR)
}
pub fn i_fmul(dst: Reg, srcL: Reg, srcR: Reg) -> Inst {
  i_binopf(BinOpF::FMul, dst, srcL, srcR)
}
pub fn i_fdiv(dst: Reg, srcL: Reg, srcR: Reg) -> Inst {
  i_binopf(BinOpF::FDiv, dst, srcL, srcR)
}

impl fmt::Debug for Inst {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Inst::Imm { dst, imm } => write!(fmt, "imm     {:?}, {:?}", dst, imm),
      Inst::ImmF { dst, imm } => write!(fmt, "immf    {:?}, {:?}", dst, imm),
      Inst::Copy { dst, src } => write!(fmt, "copy    {:?}, {:?}", dst, src),
      Inst::BinOp { op, dst, srcL, srcR } => write!(
        fmt,
        "{:<7} {:?}, {:?}, {:?}",
        op.to_string(),
        dst,
        srcL,
        srcR
      ),
      Inst::BinOpM { op, dst, srcR } => write!(
        fmt,
        "{:<7} {:?}, {:?}",
        op.to_string() + "m",
        dst,
        srcR
      ),
      Inst::BinOpF { op, dst, srcL, srcR } => write!(
        fmt,
        "{:<7} {:?}, {:?}, {:?}",
        op.to_string(),
        dst,
        srcL,
        srcR
      ),
      Inst::Load { dst, addr } => write!(fmt, "load    {:?}, {:?}", dst, addr),
      Inst::LoadF { dst, addr } => write!(fmt, "loadf   {:?}, {:?}", dst, addr),
      Inst::Store { addr, src } => write!(fmt, "store   {:?}, {:?}", addr, src),
      Inst::StoreF { addr, src } => {
        write!(fmt, "storef  {:?}, {:?}", addr, src)
      }
      Inst::Spill { dst, src } => write!(fmt, "SPILL   {:?}, {:?}", dst, src),
      Inst::Reload { dst, src } => write!(fmt, "RELOAD  {:?}, {:?}", dst, src),
      Inst::Goto { target } => write!(fmt, "goto    {:?}", target),
      Inst::GotoCTF { cond, targetT, targetF } => write!(
        fmt,
        "goto    if {:?} then {:?} else {:?}",
        cond, targetT, targetF
      ),
      Inst::PrintS { str } => {
        let mut res = "prints  '".to_string();
        for c in str.chars() {
          res += &(if c == '\n' { "\\n".to_string() } else { c.to_string() });
        }
        write!(fmt, "{}'", res)
      }
      Inst::PrintI { reg } => write!(fmt, "printi  {:?}", reg),
      Inst::PrintF { reg } => write!(fmt, "printf  {:?}", reg),
      Inst::Call { callee } => write!(fmt, "call    {}", callee),
      Inst::Mark { text } => write!(fmt, "mark    '{}'", text),
      Inst::Finish { reg } => write!(fmt, "finish  {:?}", reg),
    }
  }
}

impl Inst {
  // Returns a vector of BlockIxs, being those that this insn might jump to.
  // The labels are assumed all to be "resolved".  Non-control-flow
  // instructions jump nowhere.
  pub fn getTargets(&self) -> Vec<BlockIx> {
    match self {
      Inst::Goto { target } => vec![target.getBlockIx()],
      Inst::GotoCTF { cond: _, targetT, targetF } => {
        vec![targetT.getBlockIx(), targetF.getBlockIx()]
      }
      _ => vec![],
    }
  }

  fn labels_mut(&mut self) -> Vec<&mut Label> {
    match self {
      Inst::Goto { target } => vec![target],
      Inst::GotoCTF { cond: _, targetT, targetF } => vec![targetT, targetF],
      _ => vec![],
    }
  }

  pub fn labels(&self) -> Vec<&Label> {
    match self {
      Inst::Goto { target } => vec![target],
      Inst::GotoCTF { cond: _, targetT, targetF } => vec![targetT, targetF],
      _ => vec![],
    }
  }

  pub fn is_control_flow(&self) -> bool {
    match self {
      Inst::Goto { .. } | Inst::GotoCTF { .. } | Inst::Finish { .. } => true,
      _ => false,
    }
  }

  /// Is this something a test program may contain before allocation?
  pub fn is_user(&self) -> bool {
    match self {
      Inst::Spill { .. } | Inst::Reload { .. } => false,
      _ => true,
    }
  }

  // Returns three sets of regs, (def, mod, use), being those def'd
  // (written), those mod'd (modified) and those use'd (read) by the
  // instruction, respectively.  Note "use" is sometimes written as "uce"
  // below since "use" is a Rust reserved word, and similarly "mod" is
  // written "m0d" (that's a zero, not capital-o).
  //
  // Be careful here.  If an instruction really modifies a register -- as is
  // typical for x86 -- that register needs to be in the |mod| set, and not
  // in the |def| and |use| sets.
  //
  // Registers clobbered by a call are a property of the function, not the
  // instruction, so they don't show up here.
  pub fn get_reg_usage(&self) -> (Set<Reg>, Set<Reg>, Set<Reg>) {
    let mut def = Set::<Reg>::empty();
    let mut m0d = Set::<Reg>::empty();
    let mut uce = Set::<Reg>::empty();
    match self {
      Inst::Imm { dst, imm: _ } | Inst::ImmF { dst, imm: _ } => {
        def.insert(*dst);
      }
      Inst::Copy { dst, src } => {
        def.insert(*dst);
        uce.insert(*src);
      }
      Inst::BinOp { op: _, dst, srcL, srcR } => {
        def.insert(*dst);
        uce.insert(*srcL);
        srcR.addRegReadsTo(&mut uce);
      }
      Inst::BinOpM { op: _, dst, srcR } => {
        m0d.insert(*dst);
        srcR.addRegReadsTo(&mut uce);
      }
      Inst::BinOpF { op: _, dst, srcL, srcR } => {
        def.insert(*dst);
        uce.insert(*srcL);
        uce.insert(*srcR);
      }
      Inst::Store { addr, src } | Inst::StoreF { addr, src } => {
        addr.addRegReadsTo(&mut uce);
        uce.insert(*src);
      }
      Inst::Load { dst, addr } | Inst::LoadF { dst, addr } => {
        def.insert(*dst);
        addr.addRegReadsTo(&mut uce);
      }
      Inst::Spill { src, .. } => {
        uce.insert(*src);
      }
      Inst::Reload { dst, .. } => {
        def.insert(*dst);
      }
      Inst::Goto { .. } => {}
      Inst::GotoCTF { cond, targetT: _, targetF: _ } => {
        uce.insert(*cond);
      }
      Inst::PrintS { .. } | Inst::Call { .. } | Inst::Mark { .. } => {}
      Inst::PrintI { reg } | Inst::PrintF { reg } => {
        uce.insert(*reg);
      }
      Inst::Finish { reg } => {
        if let Some(reg) = reg {
          uce.insert(*reg);
        }
      }
    }
    // Failure of either of these is serious and should be investigated.
    debug_assert!(!def.intersects(&m0d));
    debug_assert!(!uce.intersects(&m0d));
    (def, m0d, uce)
  }

  // Apply the mappings to the instruction, thusly:
  // * For registers mentioned in a read role, apply get_use.
  // * For registers mentioned in a write role, apply get_def.
  // * For registers mentioned in a modify role, apply get_mod.
  pub fn map_regs<RUM: RegUsageMapper>(&mut self, maps: &RUM) {
    match self {
      Inst::Imm { dst, imm: _ } | Inst::ImmF { dst, imm: _ } => {
        map_def(dst, maps);
      }
      Inst::Copy { dst, src } => {
        map_def(dst, maps);
        map_use(src, maps);
      }
      Inst::BinOp { op: _, dst, srcL, srcR } => {
        map_def(dst, maps);
        map_use(srcL, maps);
        srcR.map_uses(maps);
      }
      Inst::BinOpM { op: _, dst, srcR } => {
        map_mod(dst, maps);
        srcR.map_uses(maps);
      }
      Inst::BinOpF { op: _, dst, srcL, srcR } => {
        map_def(dst, maps);
        map_use(srcL, maps);
        map_use(srcR, maps);
      }
      Inst::Store { addr, src } | Inst::StoreF { addr, src } => {
        addr.map_uses(maps);
        map_use(src, maps);
      }
      Inst::Load { dst, addr } | Inst::LoadF { dst, addr } => {
        map_def(dst, maps);
        addr.map_uses(maps);
      }
      Inst::Spill { src, .. } => map_use(src, maps),
      Inst::Reload { dst, .. } => map_def(dst, maps),
      Inst::Goto { .. } => {}
      Inst::GotoCTF { cond, targetT: _, targetF: _ } => {
        map_use(cond, maps);
      }
      Inst::PrintS { .. } | Inst::Call { .. } | Inst::Mark { .. } => {}
      Inst::PrintI { reg } | Inst::PrintF { reg } => map_use(reg, maps),
      Inst::Finish { reg } => {
        if let Some(reg) = reg {
          map_use(reg, maps);
        }
      }
    }
  }

  // Point every jump to |from| at |to| instead.  Returns how many labels
  // changed.
  fn retarget(&mut self, from: BlockIx, to: BlockIx, name: &str) -> usize {
    let mut n = 0;
    for label in self.labels_mut() {
      if label.getBlockIx() == from {
        *label = Label::Resolved { name: name.to_string(), bix: to };
        n += 1;
      }
    }
    n
  }

  fn renumber_targets(&mut self, map: &TypedIxVec<BlockIx, Option<BlockIx>>) {
    for label in self.labels_mut() {
      if let Some(bix) = map[label.getBlockIx()] {
        *label = Label::Resolved { name: label.name().to_string(), bix };
      }
    }
  }
}

//=============================================================================
// The interpreter

#[derive(Copy, Clone, PartialEq)]
pub enum Value {
  U32(u32),
  F32(f32),
  F64(f64),
}
impl Value {
  fn toU32(self) -> Result<u32, String> {
    match self {
      Value::U32(n) => Ok(n),
      _ => Err(format!("Value::toU32: {:?} is not a U32", self)),
    }
  }
  fn toF64(self) -> Result<f64, String> {
    match self {
      Value::U32(_) => Err(format!("Value::toF64: {:?} is a U32", self)),
      Value::F32(n) => Ok(n as f64),
      Value::F64(n) => Ok(n),
    }
  }
  fn float(rc: RegClass, x: f64) -> Value {
    match rc {
      RegClass::F32 => Value::F32(x as f32),
      _ => Value::F64(x),
    }
  }
}
impl fmt::Debug for Value {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Value::U32(n) => write!(fmt, "{}", n),
      Value::F32(n) => write!(fmt, "{}", n),
      Value::F64(n) => write!(fmt, "{}", n),
    }
  }
}

#[derive(PartialEq)]
pub enum RunStage {
  BeforeRegalloc,
  AfterRegalloc,
}

/// What running a function produced.
#[derive(Debug)]
pub struct RunResult {
  pub stdout: String,
  pub ret_value: Option<Value>,
  pub num_steps: usize,
  pub num_spills: usize,
  pub num_reloads: usize,
}

/// Enough for every test case; fuzzed functions use less.
pub const DEFAULT_STEP_LIMIT: usize = 10_000_000;

struct IState<'a> {
  func: &'a Func,
  reg_universe: &'a RealRegUniverse,
  bix: BlockIx, // Program counter: block
  ix: usize,    // .. and next instruction within it
  vregs: Vec<Option<Value>>, // unlimited
  rregs: Vec<Option<Value>>, // [0 .. maxRealRegs)
  mem: Vec<Option<Value>>,   // [0 .. maxMem)
  slots: Vec<Option<Value>>, // [0..] Spill slots, no upper limit
  n_insns: usize,            // Stats: number of insns executed
  n_spills: usize,           // Stats: .. of which are spills
  n_reloads: usize,          // Stats: .. of which are reloads
  run_stage: RunStage,
  ret_value: Option<Value>,
  stdout: String,
}

impl<'a> IState<'a> {
  fn new(
    func: &'a Func, entry: BlockIx, reg_universe: &'a RealRegUniverse,
    maxMem: usize, run_stage: RunStage,
  ) -> Self {
    let mut state = IState {
      func,
      reg_universe,
      bix: entry,
      ix: 0,
      vregs: Vec::new(),
      rregs: Vec::new(),
      mem: Vec::new(),
      slots: Vec::new(),
      n_insns: 0,
      n_spills: 0,
      n_reloads: 0,
      run_stage,
      ret_value: None,
      stdout: String::new(),
    };
    state.rregs.resize(reg_universe.regs.len(), None);
    state.mem.resize(maxMem, None);
    state
  }

  fn get_real_reg(&self, rreg: RealReg) -> Result<Value, String> {
    // No automatic resizing.  If the rreg doesn't exist, just fail.
    match self.rregs.get(rreg.get_index()) {
      None => Err(format!("IState::get_real_reg: invalid rreg {:?}", rreg)),
      Some(None) => Err(format!(
        "IState::get_real_reg: read of uninit rreg {} at {:?}/{}",
        self.reg_universe.name_of(rreg),
        self.bix,
        self.ix
      )),
      Some(Some(val)) => Ok(*val),
    }
  }

  // Writing a register destroys whatever its aliases held.
  fn set_real_reg(
    &mut self, rreg: RealReg, val: Option<Value>,
  ) -> Result<(), String> {
    let ix = rreg.get_index();
    if ix >= self.rregs.len() {
      return Err(format!("IState::set_real_reg: invalid rreg {:?}", rreg));
    }
    for alias in self.reg_universe.aliases[ix].iter() {
      self.rregs[*alias as usize] = None;
    }
    self.rregs[ix] = val;
    Ok(())
  }

  fn get_virtual_reg(&self, vreg: VirtualReg) -> Result<Value, String> {
    if self.run_stage == RunStage::AfterRegalloc {
      return Err(format!("read of vreg {:?} after regalloc", vreg));
    }
    // The vector might be too small.  But in that case we'd be
    // reading the vreg uninitialised anyway, so just complain.
    match self.vregs.get(vreg.get_index()) {
      None | Some(None) => Err(format!(
        "IState::get_virtual_reg: read of uninit vreg {:?}",
        vreg
      )),
      Some(Some(val)) => Ok(*val),
    }
  }

  fn set_virtual_reg(
    &mut self, vreg: VirtualReg, val: Value,
  ) -> Result<(), String> {
    if self.run_stage == RunStage::AfterRegalloc {
      return Err(format!("write of vreg {:?} after regalloc", vreg));
    }
    // Auto-resize the vector if necessary
    let ix = vreg.get_index();
    if ix >= self.vregs.len() {
      self.vregs.resize(ix + 1, None);
    }
    self.vregs[ix] = Some(val);
    Ok(())
  }

  fn get_spill_slot(&self, slot: SpillSlot) -> Result<Value, String> {
    match self.slots.get(slot.get_usize()) {
      None | Some(None) => Err(format!(
        "IState::get_spill_slot: read of uninit slot # {}",
        slot.get()
      )),
      Some(Some(val)) => Ok(*val),
    }
  }

  fn set_spill_slot(&mut self, slot: SpillSlot, val: Value) {
    // Auto-resize the vector if necessary
    let ix = slot.get_usize();
    if ix >= self.slots.len() {
      self.slots.resize(ix + 1, None);
    }
    self.slots[ix] = Some(val);
  }

  fn get_reg(&self, reg: Reg) -> Result<Value, String> {
    match reg.as_virtual_reg() {
      Some(vreg) => self.get_virtual_reg(vreg),
      None => self.get_real_reg(reg.to_real_reg()),
    }
  }

  fn set_reg(&mut self, reg: Reg, val: Value) -> Result<(), String> {
    match reg.as_virtual_reg() {
      Some(vreg) => self.set_virtual_reg(vreg, val),
      None => self.set_real_reg(reg.to_real_reg(), Some(val)),
    }
  }

  fn get_mem(&self, addr: u32) -> Result<Value, String> {
    // No auto resizing of the memory
    match self.mem.get(addr as usize) {
      None => Err(format!("IState::get_mem: invalid addr {}", addr)),
      Some(None) => {
        Err(format!("IState::get_mem: read of uninit mem at addr {}", addr))
      }
      Some(Some(val)) => Ok(*val),
    }
  }

  fn set_mem(&mut self, addr: u32, val: Value) -> Result<(), String> {
    // No auto resizing of the memory
    match self.mem.get_mut(addr as usize) {
      None => Err(format!("IState::set_mem: invalid addr {}", addr)),
      Some(valP) => {
        *valP = Some(val);
        Ok(())
      }
    }
  }

  fn get_RI(&self, ri: &RI) -> Result<u32, String> {
    match ri {
      RI::Reg { reg } => self.get_reg(*reg)?.toU32(),
      RI::Imm { imm } => Ok(*imm),
    }
  }

  fn get_AM(&self, am: &AM) -> Result<u32, String> {
    Ok(match am {
      AM::RI { base, offset } => {
        self.get_reg(*base)?.toU32()?.wrapping_add(*offset)
      }
      AM::RR { base, offset } => self
        .get_reg(*base)?
        .toU32()?
        .wrapping_add(self.get_reg(*offset)?.toU32()?),
    })
  }

  fn jump(&mut self, target: &Label) {
    self.bix = target.getBlockIx();
    self.ix = 0;
  }

  // Move the interpreter one step forward.  Returns true when the function
  // has finished.
  fn step(&mut self) -> Result<bool, String> {
    let func = self.func;
    let insn = match func.blocks[self.bix].insns.get(self.ix) {
      Some(insn) => insn,
      None => {
        return Err(format!("fell off the end of block {:?}", self.bix))
      }
    };
    self.ix += 1;
    self.n_insns += 1;

    match insn {
      Inst::Imm { dst, imm } => self.set_reg(*dst, Value::U32(*imm))?,
      Inst::ImmF { dst, imm } => {
        self.set_reg(*dst, Value::float(dst.get_class(), *imm))?
      }
      Inst::Copy { dst, src } => {
        let val = self.get_reg(*src)?;
        self.set_reg(*dst, val)?
      }
      Inst::BinOp { op, dst, srcL, srcR } => {
        let srcL_v = self.get_reg(*srcL)?.toU32()?;
        let srcR_v = self.get_RI(srcR)?;
        let dst_v = op.calc(srcL_v, srcR_v)?;
        self.set_reg(*dst, Value::U32(dst_v))?;
      }
      Inst::BinOpM { op, dst, srcR } => {
        let dst_v = self.get_reg(*dst)?.toU32()?;
        let srcR_v = self.get_RI(srcR)?;
        let dst_v = op.calc(dst_v, srcR_v)?;
        self.set_reg(*dst, Value::U32(dst_v))?;
      }
      Inst::BinOpF { op, dst, srcL, srcR } => {
        let srcL_v = self.get_reg(*srcL)?.toF64()?;
        let srcR_v = self.get_reg(*srcR)?.toF64()?;
        let dst_v = op.calc(srcL_v, srcR_v);
        self.set_reg(*dst, Value::float(dst.get_class(), dst_v))?;
      }
      Inst::Load { dst, addr } => {
        let addr_v = self.get_AM(addr)?;
        let dst_v = self.get_mem(addr_v)?.toU32()?;
        self.set_reg(*dst, Value::U32(dst_v))?;
      }
      Inst::LoadF { dst, addr } => {
        let addr_v = self.get_AM(addr)?;
        let dst_v = self.get_mem(addr_v)?.toF64()?;
        self.set_reg(*dst, Value::float(dst.get_class(), dst_v))?;
      }
      Inst::Store { addr, src } => {
        let addr_v = self.get_AM(addr)?;
        let src_v = self.get_reg(*src)?.toU32()?;
        self.set_mem(addr_v, Value::U32(src_v))?;
      }
      Inst::StoreF { addr, src } => {
        let addr_v = self.get_AM(addr)?;
        let src_v = self.get_reg(*src)?;
        src_v.toF64()?;
        self.set_mem(addr_v, src_v)?;
      }
      Inst::Spill { dst, src } => {
        let src_v = self.get_reg(*src)?;
        self.set_spill_slot(*dst, src_v);
        self.n_spills += 1;
      }
      Inst::Reload { dst, src } => {
        let src_v = self.get_spill_slot(*src)?;
        self.set_reg(*dst, src_v)?;
        self.n_reloads += 1;
      }
      Inst::Goto { target } => self.jump(target),
      Inst::GotoCTF { cond, targetT, targetF } => {
        let target =
          if self.get_reg(*cond)?.toU32()? != 0 { targetT } else { targetF };
        self.jump(target);
      }
      Inst::PrintS { str } => self.stdout.push_str(str),
      Inst::PrintI { reg } => {
        let val = self.get_reg(*reg)?.toU32()?;
        self.stdout.push_str(&format!("{:?}", val));
      }
      Inst::PrintF { reg } => {
        let val = self.get_reg(*reg)?;
        val.toF64()?;
        self.stdout.push_str(&format!("{:?}", val));
      }
      Inst::Call { .. } => {
        for rreg in func.clobbers.iter() {
          self.set_real_reg(*rreg, None)?;
        }
      }
      Inst::Mark { .. } => {}
      Inst::Finish { reg } => {
        self.ret_value = match reg {
          Some(reg) => Some(self.get_reg(*reg)?),
          None => None,
        };
        return Ok(true);
      }
    }
    Ok(false)
  }
}

/// Run |f| to completion, or until |step_limit| instructions have run.
pub fn run_func(
  f: &Func, who: &str, reg_universe: &RealRegUniverse, run_stage: RunStage,
  step_limit: usize,
) -> Result<RunResult, String> {
  info!("Running stage '{}': Func: name='{}' entry='{:?}'", who, f.name, f.entry);

  let entry = match f.entry_bix() {
    Some(entry) => entry,
    None => return Err("function has no resolved entry".to_string()),
  };
  let mut istate =
    IState::new(f, entry, reg_universe, /*maxMem=*/ 1000, run_stage);
  loop {
    if istate.n_insns >= step_limit {
      return Err(format!("step limit of {} reached", step_limit));
    }
    if istate.step()? {
      break;
    }
  }

  info!(
    "Running stage '{}': done.  {} insns, {} spills, {} reloads",
    who, istate.n_insns, istate.n_spills, istate.n_reloads
  );

  Ok(RunResult {
    stdout: istate.stdout,
    ret_value: istate.ret_value,
    num_steps: istate.n_insns,
    num_spills: istate.n_spills,
    num_reloads: istate.n_reloads,
  })
}

//=============================================================================
// Definition of Block and Func, and printing thereof.

#[derive(Clone, Debug)]
pub struct Block {
  pub name: String,
  pub insns: Vec<Inst>,
}
impl Block {
  pub fn new(name: String, insns: Vec<Inst>) -> Self {
    Self { name, insns }
  }

  fn ends_in_finish(&self) -> bool {
    match self.insns.last() {
      Some(Inst::Finish { .. }) => true,
      _ => false,
    }
  }
}

#[derive(Clone, Debug)]
pub struct Func {
  pub name: String,
  pub entry: Option<Label>,
  pub nVirtualRegs: u32,
  // Indexed by BlockIx.  The single block ending in `finish` is the exit.
  pub blocks: TypedIxVec<BlockIx, Block>,
  // Virtual registers that must live in memory.
  pub volatile: Set<VirtualReg>,
  // Real registers a `call` overwrites.
  pub clobbers: Vec<RealReg>,
}

// Find a block Ix for a block name
fn lookup(blocks: &TypedIxVec<BlockIx, Block>, name: &str) -> Option<BlockIx> {
  blocks.range().into_iter().find(|bix| blocks[*bix].name == name)
}

fn resolveLabel(
  label: &mut Label, blocks: &TypedIxVec<BlockIx, Block>,
) -> Result<(), String> {
  let resolved = match label {
    Label::Unresolved { name } => match lookup(blocks, name) {
      Some(bix) => Label::Resolved { name: name.clone(), bix },
      None => return Err(format!("can't resolve label name '{}'", name)),
    },
    Label::Resolved { .. } => return Ok(()),
  };
  *label = resolved;
  Ok(())
}

impl Func {
  pub fn new<'a>(name: &'a str) -> Self {
    Func {
      name: name.to_string(),
      entry: None,
      nVirtualRegs: 0,
      blocks: TypedIxVec::<BlockIx, Block>::new(),
      volatile: Set::empty(),
      clobbers: vec![],
    }
  }

  pub fn set_entry<'a>(&mut self, entry: &'a str) {
    self.entry = Some(Label::Unresolved { name: entry.to_string() });
  }

  pub fn entry_bix(&self) -> Option<BlockIx> {
    match &self.entry {
      Some(Label::Resolved { bix, .. }) => Some(*bix),
      _ => None,
    }
  }

  pub fn exit_bix(&self) -> Option<BlockIx> {
    self.blocks.range().into_iter().find(|bix| self.blocks[*bix].ends_in_finish())
  }

  pub fn num_insns(&self) -> usize {
    self.blocks.iter().map(|b| b.insns.len()).sum()
  }

  pub fn print(&self, who: &str) {
    println!("");
    println!("Func {}: name='{}' entry='{:?}' {{", who, self.name, self.entry);
    for bix in self.blocks.range() {
      if bix.get() > 0 {
        println!("");
      }
      println!("  {:?}:{}", bix, self.blocks[bix].name);
      for (i, insn) in self.blocks[bix].insns.iter().enumerate() {
        println!("      {:<3}   {:?}", i, insn);
      }
    }
    println!("}}");
  }

  // Get a new VirtualReg name
  pub fn new_virtual_reg(&mut self, rc: RegClass) -> Reg {
    let v = Reg::new_virtual(rc, self.nVirtualRegs);
    self.nVirtualRegs += 1;
    v
  }

  pub fn new_volatile_reg(&mut self, rc: RegClass) -> Reg {
    let v = self.new_virtual_reg(rc);
    self.volatile.insert(v.to_virtual_reg());
    v
  }

  // Add a block to the Func
  pub fn block<'a>(&mut self, name: &'a str, insns: Vec<Inst>) {
    self.blocks.push(Block::new(name.to_string(), insns));
  }

  // All blocks have been added.  Resolve labels and we're good to go.
  pub fn try_finish(&mut self) -> Result<(), String> {
    let blocks = &self.blocks;
    let mut resolved = Vec::new();
    for block in blocks.iter() {
      let mut insns = block.insns.clone();
      for insn in insns.iter_mut() {
        for label in insn.labels_mut() {
          resolveLabel(label, blocks)?;
        }
      }
      resolved.push(insns);
    }
    for (bix, insns) in self.blocks.range().into_iter().zip(resolved) {
      self.blocks[bix].insns = insns;
    }
    match &mut self.entry {
      Some(label) => resolveLabel(label, &self.blocks),
      None => Err("no entry label".to_string()),
    }
  }

  // As `try_finish`, for hand-written test cases.
  pub fn finish(&mut self) {
    if let Err(msg) = self.try_finish() {
      panic!("Func::finish: {}", msg);
    }
  }

  fn succs_of(&self, bix: BlockIx) -> Vec<BlockIx> {
    match self.blocks[bix].insns.last() {
      Some(insn) => insn.getTargets(),
      None => vec![],
    }
  }

  //---------------------------------------------------------------------------
  // CFG simplification

  /// Jump threading, same-target conditional folding, straight-line block
  /// merging and unreachable block removal, until nothing changes.  Blocks
  /// are renumbered densely.  The block ending in `finish` survives even if
  /// nothing reaches it.
  pub fn simplify_cfg(&mut self) {
    let nBlocksBefore = self.blocks.len();
    let mut rounds = 0;
    loop {
      let mut changed = self.fold_same_target_branches();
      changed |= self.thread_jumps();
      changed |= self.merge_straight_line();
      changed |= self.remove_unreachable();
      if !changed {
        break;
      }
      rounds += 1;
    }
    debug!(
      "simplify_cfg: {} -> {} blocks in {} rounds",
      nBlocksBefore,
      self.blocks.len(),
      rounds
    );
  }

  fn fold_same_target_branches(&mut self) -> bool {
    let mut changed = false;
    for block in self.blocks.iter_mut() {
      if let Some(last) = block.insns.last_mut() {
        let folded = match last {
          Inst::GotoCTF { cond: _, targetT, targetF }
            if targetT.getBlockIx() == targetF.getBlockIx() =>
          {
            Some(targetT.clone())
          }
          _ => None,
        };
        if let Some(target) = folded {
          *last = Inst::Goto { target };
          changed = true;
        }
      }
    }
    changed
  }

  // Point every reference to |from|, including the entry, at |to|.
  fn redirect_all(&mut self, from: BlockIx, to: BlockIx) -> bool {
    let name = self.blocks[to].name.clone();
    let mut n = 0;
    for block in self.blocks.iter_mut() {
      if let Some(last) = block.insns.last_mut() {
        n += last.retarget(from, to, &name);
      }
    }
    if self.entry_bix() == Some(from) {
      self.entry = Some(Label::Resolved { name, bix: to });
      n += 1;
    }
    n > 0
  }

  // Blocks that only jump elsewhere are bypassed, one per call.
  fn thread_jumps(&mut self) -> bool {
    for bix in self.blocks.range() {
      let target = match self.blocks[bix].insns.as_slice() {
        [Inst::Goto { target }] => target.getBlockIx(),
        _ => continue,
      };
      if target != bix && self.redirect_all(bix, target) {
        return true;
      }
    }
    false
  }

  fn pred_counts(&self) -> TypedIxVec<BlockIx, u32> {
    let mut counts = TypedIxVec::<BlockIx, u32>::new();
    counts.resize(self.blocks.len(), 0);
    for bix in self.blocks.range() {
      for succ in self.succs_of(bix) {
        counts[succ] += 1;
      }
    }
    if let Some(entry) = self.entry_bix() {
      counts[entry] += 1;
    }
    counts
  }

  // A block ending in a jump to a block with no other predecessor absorbs
  // it, one per call.  The absorbed block is left empty and unreachable.
  fn merge_straight_line(&mut self) -> bool {
    let preds = self.pred_counts();
    for a in self.blocks.range() {
      let b = match self.blocks[a].insns.last() {
        Some(Inst::Goto { target }) => target.getBlockIx(),
        _ => continue,
      };
      if b == a || preds[b] != 1 {
        continue;
      }
      let mut tail = std::mem::take(&mut self.blocks[b].insns);
      let insns = &mut self.blocks[a].insns;
      insns.pop();
      insns.append(&mut tail);
      return true;
    }
    false
  }

  fn remove_unreachable(&mut self) -> bool {
    let entry = match self.entry_bix() {
      Some(entry) => entry,
      None => return false,
    };
    let nBlocks = self.blocks.len();
    let mut reachable = TypedIxVec::<BlockIx, bool>::new();
    reachable.resize(nBlocks, false);
    reachable[entry] = true;
    let mut stack = vec![entry];
    while let Some(bix) = stack.pop() {
      for succ in self.succs_of(bix) {
        if !reachable[succ] {
          reachable[succ] = true;
          stack.push(succ);
        }
      }
    }
    let exit_reached = self
      .blocks
      .range()
      .into_iter()
      .any(|bix| reachable[bix] && self.blocks[bix].ends_in_finish());
    if !exit_reached {
      for bix in self.blocks.range() {
        if self.blocks[bix].ends_in_finish() {
          reachable[bix] = true;
        }
      }
    }
    if reachable.iter().all(|r| *r) {
      return false;
    }

    let mut new_ix = TypedIxVec::<BlockIx, Option<BlockIx>>::new();
    let mut kept = TypedIxVec::<BlockIx, Block>::new();
    let old = std::mem::replace(&mut self.blocks, TypedIxVec::new());
    for (i, block) in old.into_vec().into_iter().enumerate() {
      if reachable[BlockIx::new(i as u32)] {
        new_ix.push(Some(BlockIx::new(kept.len())));
        kept.push(block);
      } else {
        new_ix.push(None);
      }
    }
    self.blocks = kept;
    for block in self.blocks.iter_mut() {
      if let Some(last) = block.insns.last_mut() {
        last.renumber_targets(&new_ix);
      }
    }
    if let Some(Label::Resolved { bix, .. }) = &mut self.entry {
      if let Some(renumbered) = new_ix[*bix] {
        *bix = renumbered;
      }
    }
    true
  }
}

pub enum Stmt {
  Vanilla { insn: Inst },
  IfThenElse { cond: Reg, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt> },
  RepeatUntil { stmts: Vec<Stmt>, cond: Reg },
  WhileDo { cond: Reg, stmts: Vec<Stmt> },
}

// Various handy wrappers, mostly wrappings of i_* functions
pub fn s_if_then_else(
  cond: Reg, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt>,
) -> Stmt {
  Stmt::IfThenElse { cond, stmts_t, stmts_e }
}
pub fn s_if_then(cond: Reg, stmts_t: Vec<Stmt>) -> Stmt {
  Stmt::IfThenElse { cond, stmts_t, stmts_e: vec![] }
}
pub fn s_repeat_until(stmts: Vec<Stmt>, cond: Reg) -> Stmt {
  Stmt::RepeatUntil { stmts, cond }
}
pub fn s_while_do(cond: Reg, stmts: Vec<Stmt>) -> Stmt {
  Stmt::WhileDo { cond, stmts }
}

fn s_vanilla(insn: Inst) -> Stmt {
  Stmt::Vanilla { insn }
}

pub fn s_imm(dst: Reg, imm: u32) -> Stmt {
  s_vanilla(i_imm(dst, imm))
}
pub fn s_immf(dst: Reg, imm: f64) -> Stmt {
  s_vanilla(i_immf(dst, imm))
}
pub fn s_copy(dst: Reg, src: Reg) -> Stmt {
  s_vanilla(i_copy(dst, src))
}
pub fn s_load(dst: Reg, addr: AM) -> Stmt {
  s_vanilla(i_load(dst, addr))
}
pub fn s_loadf(dst: Reg, addr: AM) -> Stmt {
  s_vanilla(i_loadf(dst, addr))
}
pub fn s_store(addr: AM, src: Reg) -> Stmt {
  s_vanilla(i_store(addr, src))
}
pub fn s_storef(addr: AM, src: Reg) -> Stmt {
  s_vanilla(i_storef(addr, src))
}
pub fn s_print_s<'a>(str: &'a str) -> Stmt {
  s_vanilla(i_print_s(str))
}
pub fn s_print_i(reg: Reg) -> Stmt {
  s_vanilla(i_print_i(reg))
}
pub fn s_print_f(reg: Reg) -> Stmt {
  s_vanilla(i_print_f(reg))
}
pub fn s_call<'a>(callee: &'a str) -> Stmt {
  s_vanilla(i_call(callee))
}
pub fn s_mark<'a>(text: &'a str) -> Stmt {
  s_vanilla(i_mark(text))
}

pub fn s_add(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_add(dst, srcL, srcR))
}
pub fn s_sub(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_sub(dst, srcL, srcR))
}
pub fn s_mul(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_mul(dst, srcL, srcR))
}
pub fn s_mod(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_mod(dst, srcL, srcR))
}
pub fn s_shr(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_shr(dst, srcL, srcR))
}
pub fn s_and(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_and(dst, srcL, srcR))
}
pub fn s_cmp_eq(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_cmp_eq(dst, srcL, srcR))
}
pub fn s_cmp_lt(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_cmp_lt(dst, srcL, srcR))
}
pub fn s_cmp_le(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_cmp_le(dst, srcL, srcR))
}
pub fn s_cmp_ge(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_cmp_ge(dst, srcL, srcR))
}
pub fn s_cmp_gt(dst: Reg, srcL: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_cmp_gt(dst, srcL, srcR))
}

pub fn s_addm(dst: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_addm(dst, srcR))
}
pub fn s_subm(dst: Reg, srcR: RI) -> Stmt {
  s_vanilla(i_subm(dst, srcR))
}

pub fn s_fadd(dst: Reg, srcL: Reg, srcR: Reg) -> Stmt {
  s_vanilla(i_fadd(dst, srcL, srcR))
}
pub fn s_fsub(dst: Reg, srcL: Reg, srcR: Reg) -> Stmt {
  s_vanilla(i_fsub(dst, srcL, srcR))
}
pub fn s_fmul(dst: Reg, srcL: Reg, srcR: Reg) -> Stmt {
  s_vanilla(i_fmul(dst, srcL, srcR))
}
pub fn s_fdiv(dst: Reg, srcL: Reg, srcR: Reg) -> Stmt {
  s_vanilla(i_fdiv(dst, srcL, srcR))
}

//=============================================================================
// The "blockifier".  This is just to make it easier to write test cases, by
// allowing direct use of if-then-else, do-while and repeat-until.  It is
// otherwise entirely unrelated to the library proper.

pub struct Blockifier {
  name: String,
  blocks: Vec<Vec<Inst>>,
  nVirtualRegs: u32,
  volatile: Set<VirtualReg>,
}

fn makeTextLabelStr(n: usize) -> String {
  "L".to_string() + &n.to_string()
}

impl Blockifier {
  pub fn new<'a>(name: &'a str) -> Self {
    Self {
      name: name.to_string(),
      blocks: vec![],
      nVirtualRegs: 0,
      volatile: Set::empty(),
    }
  }

  // Get a new VirtualReg name
  pub fn new_virtual_reg(&mut self, rc: RegClass) -> Reg {
    let v = Reg::new_virtual(rc, self.nVirtualRegs);
    self.nVirtualRegs += 1;
    v
  }

  pub fn new_volatile_reg(&mut self, rc: RegClass) -> Reg {
    let v = self.new_virtual_reg(rc);
    self.volatile.insert(v.to_virtual_reg());
    v
  }

  // Recursive worker function, which flattens out the control flow,
  // producing a set of blocks
  fn blockify(&mut self, stmts: Vec<Stmt>) -> (usize, usize) {
    let entryBNo = self.blocks.len();
    let mut currBNo = entryBNo;
    self.blocks.push(vec![]);
    for s in stmts {
      match s {
        Stmt::Vanilla { insn } => {
          self.blocks[currBNo].push(insn);
        }
        Stmt::IfThenElse { cond, stmts_t, stmts_e } => {
          let (t_ent, t_exit) = self.blockify(stmts_t);
          let (e_ent, e_exit) = self.blockify(stmts_e);
          let cont = self.blocks.len();
          self.blocks.push(vec![]);
          self.blocks[t_exit].push(i_goto(&makeTextLabelStr(cont)));
          self.blocks[e_exit].push(i_goto(&makeTextLabelStr(cont)));
          self.blocks[currBNo].push(i_goto_ctf(
            cond,
            &makeTextLabelStr(t_ent),
            &makeTextLabelStr(e_ent),
          ));
          currBNo = cont;
        }
        Stmt::RepeatUntil { stmts, cond } => {
          let (s_ent, s_exit) = self.blockify(stmts);
          self.blocks[currBNo].push(i_goto(&makeTextLabelStr(s_ent)));
          let cont = self.blocks.len();
          self.blocks.push(vec![]);
          self.blocks[s_exit].push(i_goto_ctf(
            cond,
            &makeTextLabelStr(cont),
            &makeTextLabelStr(s_ent),
          ));
          currBNo = cont;
        }
        Stmt::WhileDo { cond, stmts } => {
          let condblock = self.blocks.len();
          self.blocks.push(vec![]);
          self.blocks[currBNo].push(i_goto(&makeTextLabelStr(condblock)));
          let (s_ent, s_exit) = self.blockify(stmts);
          self.blocks[s_exit].push(i_goto(&makeTextLabelStr(condblock)));
          let cont = self.blocks.len();
          self.blocks.push(vec![]);
          self.blocks[condblock].push(i_goto_ctf(
            cond,
            &makeTextLabelStr(s_ent),
            &makeTextLabelStr(cont),
          ));
          currBNo = cont;
        }
      }
    }
    (entryBNo, currBNo)
  }

  // The main external function.  Convert the given statements, into a Func.
  // Blocks that merely jump somewhere else are shorted out by the CFG
  // simplifier.
  pub fn finish(&mut self, stmts: Vec<Stmt>, ret: Option<Reg>) -> Func {
    let (ent_bno, exit_bno) = self.blockify(stmts);
    self.blocks[exit_bno].push(i_finish(ret));

    let mut func = Func::new(&self.name);
    func.set_entry(&makeTextLabelStr(ent_bno));
    func.nVirtualRegs = self.nVirtualRegs;
    func.volatile = self.volatile.clone();
    for (n, insns) in std::mem::take(&mut self.blocks).into_iter().enumerate() {
      func.block(&makeTextLabelStr(n), insns);
    }

    func.finish();
    func.simplify_cfg();
    func
  }
}

// --------------------------------------------------
// Implementation of `Function` trait for test cases.

impl Function for Func {
  type Inst = Inst;

  fn blocks(&self) -> MyRange<BlockIx> {
    self.blocks.range()
  }

  fn entry_block(&self) -> BlockIx {
    match self.entry_bix() {
      Some(entry) => entry,
      None => panic!("Func::entry_block: unresolved entry in {}", self.name),
    }
  }

  fn exit_block(&self) -> BlockIx {
    match self.exit_bix() {
      Some(exit) => exit,
      None => panic!("Func::exit_block: no block of {} finishes", self.name),
    }
  }

  fn block_insns(&self, block: BlockIx) -> &[Inst] {
    &self.blocks[block].insns
  }

  fn block_insns_mut(&mut self, block: BlockIx) -> &mut Vec<Inst> {
    &mut self.blocks[block].insns
  }

  /// Get CFG successors: indexed by block, provide a list of successor blocks.
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
    self.succs_of(block)
  }

  fn redirect_branch(&mut self, block: BlockIx, to: BlockIx) {
    let name = self.blocks[to].name.clone();
    let insns = &mut self.blocks[block].insns;
    insns.pop();
    insns.push(Inst::Goto { target: Label::Resolved { name, bix: to } });
  }

  fn simplify_cfg(&mut self) {
    Func::simplify_cfg(self)
  }

  fn inst_kind(&self, insn: &Inst) -> InstKind {
    match insn {
      Inst::Store { .. } | Inst::StoreF { .. } | Inst::Spill { .. } => {
        InstKind::Store
      }
      Inst::Call { .. } => InstKind::Call,
      Inst::Finish { .. } => InstKind::Return,
      Inst::Goto { .. } | Inst::GotoCTF { .. } => InstKind::Branch,
      Inst::PrintS { .. } | Inst::PrintI { .. } | Inst::PrintF { .. } => {
        InstKind::Builtin
      }
      Inst::Mark { .. } => InstKind::Marker,
      _ => InstKind::Plain,
    }
  }

  /// Allow the library to query whether this is a move.
  fn is_move(&self, insn: &Inst) -> Option<(Reg, Reg)> {
    match insn {
      &Inst::Copy { dst, src } => Some((dst, src)),
      _ => None,
    }
  }

  /// Provide the defined, used, and modified registers for an instruction.
  fn get_regs(&self, insn: &Inst) -> InstRegUses {
    let (mut d, m, u) = insn.get_reg_usage();
    if let Inst::Call { .. } = insn {
      for rreg in self.clobbers.iter() {
        d.insert(rreg.to_reg());
      }
    }
    InstRegUses { used: u, defined: d, modified: m }
  }

  fn is_volatile(&self, vreg: VirtualReg) -> bool {
    self.volatile.contains(vreg)
  }

  fn map_regs<RUM: RegUsageMapper>(insn: &mut Inst, maps: &RUM) {
    insn.map_regs(maps)
  }

  /// For our simple test ISA, every value occupies one spill slot, except
  /// doubles, which take two.
  fn get_spillslot_size(&self, regclass: RegClass, _for_vreg: VirtualReg) -> u32 {
    match regclass {
      RegClass::F64 => 2,
      _ => 1,
    }
  }

  fn gen_spill(
    &self, to_slot: SpillSlot, from_reg: Reg, _for_vreg: VirtualReg,
  ) -> Inst {
    Inst::Spill { dst: to_slot, src: from_reg }
  }

  fn gen_reload(
    &self, to_reg: Reg, from_slot: SpillSlot, _for_vreg: VirtualReg,
  ) -> Inst {
    Inst::Reload { dst: to_reg, src: from_slot }
  }
}

// Create a universe for testing, with nI32 |I32| class regs and nF32 |F32|
// class regs.  Each consecutive pair of F32 regs also forms one |F64| reg.

pub fn make_universe(nI32: usize, nF32: usize) -> RealRegUniverse {
  let nF64 = nF32 / 2;
  let total_regs = nI32 + nF32 + nF64;
  if total_regs >= 256 {
    panic!("make_universe: too many regs, cannot represent");
  }

  let mut regs = Vec::<(RealReg, String)>::new();
  let mut allocable_by_class = [None; NUM_REG_CLASSES];
  let mut index = 0u8;

  let mut add_class = |rc: RegClass, n: usize, prefix: &str| {
    if n > 0 {
      let first = index as usize;
      for i in 0..n {
        let name = format!("{}{}", prefix, i);
        let reg = Reg::new_real(rc, /*enc=*/ i as u8, index).to_real_reg();
        regs.push((reg, name));
        index += 1;
      }
      let last = index as usize - 1;
      allocable_by_class[rc.rc_to_usize()] = Some(RegClassInfo { first, last });
    }
  };
  add_class(RegClass::I32, nI32, "R");
  add_class(RegClass::F32, nF32, "F");
  add_class(RegClass::F64, nF64, "D");
  debug_assert!(regs.len() == total_regs);

  let mut aliases = vec![SmallVec::<[u8; 4]>::new(); total_regs];
  for d in 0..nF64 {
    let dIx = nI32 + nF32 + d;
    for s in [2 * d, 2 * d + 1].iter() {
      let sIx = nI32 + *s;
      aliases[dIx].push(sIx as u8);
      aliases[sIx].push(dIx as u8);
    }
  }

  let allocable = regs.len();
  let univ = RealRegUniverse {
    regs,
    // for this example, all regs are allocable
    allocable,
    allocable_by_class,
    aliases,
  };
  univ.check_is_sane();

  univ
}

/// The registers a `call` overwrites: the lower half of each of the I32 and
/// F32 classes.  Doubles lose whatever overlaps those.
pub fn caller_saved_regs(univ: &RealRegUniverse) -> Vec<RealReg> {
  let mut clobbers = vec![];
  for rc in [RegClass::I32, RegClass::F32].iter() {
    let regs = univ.allocable_regs(*rc);
    let n = regs.len() / 2;
    clobbers.extend(regs.into_iter().take(n));
  }
  clobbers
}

#[cfg(test)]
mod test {
  use super::*;

  fn diamond_with_trampoline() -> Func {
    let mut func = Func::new("diamond");
    func.set_entry("start");
    let c = func.new_virtual_reg(RegClass::I32);
    func.block("start", vec![i_imm(c, 1), i_goto_ctf(c, "t", "e")]);
    func.block("t", vec![i_goto("hop")]);
    func.block("hop", vec![i_goto("join")]);
    func.block("e", vec![i_print_i(c), i_goto("join")]);
    func.block("dead", vec![i_print_i(c), i_goto("join")]);
    func.block("join", vec![i_finish(Some(c))]);
    func.finish();
    func
  }

  #[test]
  fn simplify_threads_jumps_and_drops_dead_blocks() {
    let mut func = diamond_with_trampoline();
    func.simplify_cfg();
    let names: Vec<&str> =
      func.blocks.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["start", "e", "join"]);
    // start now branches straight to the join on the true side.
    assert_eq!(
      func.succs_of(BlockIx::new(0)),
      vec![BlockIx::new(2), BlockIx::new(1)]
    );
    assert_eq!(func.exit_bix(), Some(BlockIx::new(2)));
  }

  #[test]
  fn simplify_merges_straight_line_code() {
    let mut func = Func::new("line");
    func.set_entry("a");
    let x = func.new_virtual_reg(RegClass::I32);
    func.block("a", vec![i_imm(x, 3), i_goto("b")]);
    func.block("b", vec![i_print_i(x), i_goto("c")]);
    func.block("c", vec![i_finish(Some(x))]);
    func.finish();
    func.simplify_cfg();
    assert_eq!(func.blocks.len(), 1);
    assert_eq!(func.blocks[BlockIx::new(0)].insns.len(), 3);
    assert_eq!(func.exit_bix(), Some(BlockIx::new(0)));
  }

  #[test]
  fn simplify_folds_branches_with_one_target() {
    let mut func = Func::new("same");
    func.set_entry("a");
    let x = func.new_virtual_reg(RegClass::I32);
    func.block("a", vec![i_imm(x, 0), i_goto_ctf(x, "b", "b")]);
    func.block("b", vec![i_finish(None)]);
    func.finish();
    func.simplify_cfg();
    assert_eq!(func.blocks.len(), 1);
    let univ = make_universe(2, 0);
    let res = run_func(
      &func,
      "folded",
      &univ,
      RunStage::BeforeRegalloc,
      DEFAULT_STEP_LIMIT,
    )
    .unwrap();
    assert_eq!(res.num_steps, 2);
  }

  #[test]
  fn interpreter_reports_uninitialized_reads() {
    let mut func = Func::new("uninit");
    func.set_entry("a");
    let x = func.new_virtual_reg(RegClass::I32);
    func.block("a", vec![i_print_i(x), i_finish(None)]);
    func.finish();
    let univ = make_universe(2, 0);
    let res =
      run_func(&func, "uninit", &univ, RunStage::BeforeRegalloc, 100);
    assert!(res.unwrap_err().contains("uninit"));
  }

  #[test]
  fn interpreter_stops_at_the_step_limit() {
    let mut func = Func::new("spin");
    func.set_entry("a");
    func.block("a", vec![i_goto("a")]);
    func.block("b", vec![i_finish(None)]);
    func.finish();
    let univ = make_universe(2, 0);
    let res = run_func(&func, "spin", &univ, RunStage::BeforeRegalloc, 50);
    assert!(res.unwrap_err().contains("step limit"));
  }

  #[test]
  fn doubles_overlap_pairs_of_singles() {
    let univ = make_universe(2, 4);
    assert_eq!(univ.regs.len(), 8);
    assert_eq!(univ.num_allocable(RegClass::F64), 2);
    // F0 and F1 make D0.
    assert!(univ.overlaps(2, 6));
    assert!(univ.overlaps(3, 6));
    assert!(!univ.overlaps(4, 6));
    assert_eq!(caller_saved_regs(&univ).len(), 3);
  }

  #[test]
  fn writing_a_single_destroys_the_double() {
    let univ = make_universe(1, 2);
    let d0 = univ.regs[3].0.to_reg();
    let f1 = univ.regs[2].0.to_reg();
    let mut func = Func::new("alias");
    func.set_entry("a");
    func.block(
      "a",
      vec![i_immf(d0, 1.5), i_immf(f1, 2.0), i_print_f(d0), i_finish(None)],
    );
    func.finish();
    let res = run_func(&func, "alias", &univ, RunStage::AfterRegalloc, 100);
    assert!(res.is_err());
  }
}

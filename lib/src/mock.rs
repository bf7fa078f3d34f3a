/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! A tiny Function implementation for the library's own unit tests.

use crate::data_structures::{
  BlockIx, MyRange, RealRegUniverse, Reg, RegClass, RegClassInfo, Set,
  SpillSlot, VirtualReg,
};
use crate::interface::{Function, InstKind, InstRegUses, RegUsageMapper};

#[derive(Clone, Debug, PartialEq)]
pub enum MockInst {
  /// dst := f(srcs)
  Op { dst: Reg, srcs: Vec<Reg> },
  /// reg := f(reg)
  Bump { reg: Reg },
  Move { dst: Reg, src: Reg },
  /// Consumes its operands observably.
  Out { srcs: Vec<Reg> },
  Call,
  Spill { slot: SpillSlot, src: Reg },
  Reload { dst: Reg, slot: SpillSlot },
  /// Conditional on |cond|, or unconditional when there is none.
  Br { cond: Option<Reg>, targets: Vec<BlockIx> },
  Ret,
}

#[derive(Clone, Debug)]
pub struct MockFunc {
  pub blocks: Vec<Vec<MockInst>>,
  pub volatile: Vec<VirtualReg>,
}

pub fn v(n: u32) -> Reg {
  Reg::new_virtual(RegClass::I32, n)
}

pub fn b(n: u32) -> BlockIx {
  BlockIx::new(n)
}

/// |n| allocable I32 registers, plus one non-allocable I32 register at the
/// end.
pub fn universe(n: u8) -> RealRegUniverse {
  let mut regs = Vec::new();
  for i in 0..=n {
    let rreg = Reg::new_real(RegClass::I32, i, i).to_real_reg();
    regs.push((rreg, format!("r{}", i)));
  }
  let info = RegClassInfo { first: 0, last: n as usize - 1 };
  RealRegUniverse::new_without_aliases(
    regs,
    n as usize,
    [Some(info), None, None],
  )
}

impl MockFunc {
  pub fn new(blocks: Vec<Vec<MockInst>>) -> Self {
    Self { blocks, volatile: vec![] }
  }

  pub fn all_insts(&self) -> Vec<MockInst> {
    self.blocks.iter().flatten().cloned().collect()
  }
}

fn map_reg(reg: &mut Reg, f: impl Fn(VirtualReg) -> Option<Reg>) {
  if let Some(vreg) = reg.as_virtual_reg() {
    if let Some(r) = f(vreg) {
      *reg = r;
    }
  }
}

impl Function for MockFunc {
  type Inst = MockInst;

  fn blocks(&self) -> MyRange<BlockIx> {
    MyRange::new(b(0), self.blocks.len())
  }

  fn entry_block(&self) -> BlockIx {
    b(0)
  }

  fn exit_block(&self) -> BlockIx {
    b(self.blocks.len() as u32 - 1)
  }

  fn block_insns(&self, block: BlockIx) -> &[MockInst] {
    &self.blocks[block.get_usize()]
  }

  fn block_insns_mut(&mut self, block: BlockIx) -> &mut Vec<MockInst> {
    &mut self.blocks[block.get_usize()]
  }

  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
    match self.blocks[block.get_usize()].last() {
      Some(MockInst::Br { targets, .. }) => targets.clone(),
      _ => vec![],
    }
  }

  fn redirect_branch(&mut self, block: BlockIx, to: BlockIx) {
    let insns = &mut self.blocks[block.get_usize()];
    insns.pop();
    insns.push(MockInst::Br { cond: None, targets: vec![to] });
  }

  fn simplify_cfg(&mut self) {}

  fn inst_kind(&self, insn: &MockInst) -> InstKind {
    match insn {
      MockInst::Op { .. }
      | MockInst::Bump { .. }
      | MockInst::Move { .. }
      | MockInst::Reload { .. } => InstKind::Plain,
      MockInst::Out { .. } => InstKind::Builtin,
      MockInst::Spill { .. } => InstKind::Store,
      MockInst::Call => InstKind::Call,
      MockInst::Br { .. } => InstKind::Branch,
      MockInst::Ret => InstKind::Return,
    }
  }

  fn is_move(&self, insn: &MockInst) -> Option<(Reg, Reg)> {
    match insn {
      MockInst::Move { dst, src } => Some((*dst, *src)),
      _ => None,
    }
  }

  fn get_regs(&self, insn: &MockInst) -> InstRegUses {
    let mut used = Set::empty();
    let mut defined = Set::empty();
    let mut modified = Set::empty();
    match insn {
      MockInst::Op { dst, srcs } => {
        defined.insert(*dst);
        for r in srcs {
          used.insert(*r);
        }
      }
      MockInst::Bump { reg } => modified.insert(*reg),
      MockInst::Move { dst, src } => {
        defined.insert(*dst);
        used.insert(*src);
      }
      MockInst::Out { srcs } => {
        for r in srcs {
          used.insert(*r);
        }
      }
      MockInst::Spill { src, .. } => used.insert(*src),
      MockInst::Reload { dst, .. } => defined.insert(*dst),
      MockInst::Br { cond: Some(r), .. } => used.insert(*r),
      MockInst::Br { cond: None, .. } | MockInst::Call | MockInst::Ret => {}
    }
    InstRegUses { used, defined, modified }
  }

  fn is_volatile(&self, vreg: VirtualReg) -> bool {
    self.volatile.contains(&vreg)
  }

  fn map_regs<RUM: RegUsageMapper>(insn: &mut MockInst, maps: &RUM) {
    match insn {
      MockInst::Op { dst, srcs } => {
        map_reg(dst, |r| maps.get_def(r));
        for s in srcs.iter_mut() {
          map_reg(s, |r| maps.get_use(r));
        }
      }
      MockInst::Bump { reg } => map_reg(reg, |r| maps.get_mod(r)),
      MockInst::Move { dst, src } => {
        map_reg(dst, |r| maps.get_def(r));
        map_reg(src, |r| maps.get_use(r));
      }
      MockInst::Out { srcs } => {
        for s in srcs.iter_mut() {
          map_reg(s, |r| maps.get_use(r));
        }
      }
      MockInst::Spill { src, .. } => map_reg(src, |r| maps.get_use(r)),
      MockInst::Reload { dst, .. } => map_reg(dst, |r| maps.get_def(r)),
      MockInst::Br { cond: Some(c), .. } => map_reg(c, |r| maps.get_use(r)),
      MockInst::Br { cond: None, .. } | MockInst::Call | MockInst::Ret => {}
    }
  }

  fn get_spillslot_size(&self, _rc: RegClass, _for_vreg: VirtualReg) -> u32 {
    1
  }

  fn gen_spill(
    &self, to_slot: SpillSlot, from_reg: Reg, _for_vreg: VirtualReg,
  ) -> MockInst {
    MockInst::Spill { slot: to_slot, src: from_reg }
  }

  fn gen_reload(
    &self, to_reg: Reg, from_slot: SpillSlot, _for_vreg: VirtualReg,
  ) -> MockInst {
    MockInst::Reload { dst: to_reg, slot: from_slot }
  }
}

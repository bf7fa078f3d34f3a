/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Implements fuzzing primitives for everything.

#![allow(non_snake_case)]

use arbitrary::{Arbitrary, Result, Unstructured};
use std::collections::{HashMap, HashSet};
use std::iter::FromIterator;

use crate::test_framework::{self as ir, *};
use flowcolor::*;

pub const NUM_REAL_REGS_PER_RC: u8 = 8;

// Generated code only touches the first few memory cells, which the entry
// block initialises: integers below FLOAT_CELLS, floats from there on.
const FLOAT_CELLS: u32 = 16;
const NUM_CELLS: u32 = 2 * FLOAT_CELLS;
const CELL_MASK: u32 = 7;

/// The universe fuzzed functions are written against.
pub fn fuzzing_universe() -> RealRegUniverse {
  make_universe(
    NUM_REAL_REGS_PER_RC as usize,
    NUM_REAL_REGS_PER_RC as usize,
  )
}

struct FuzzingEnv {
  num_blocks: u8,
  num_virtual_regs: u16,
  /// Map of virtual register index to register class. None means the register hasn't been ever defined.
  vregs: HashMap<u16, RegClass>,
  /// Really a hashmap from rc to HashSet<Reg>.
  regs_by_rc: Vec<HashSet<Reg>>,
}

impl FuzzingEnv {
  fn block(&self, u: &mut Unstructured) -> Result<BlockIx> {
    Ok(BlockIx::new((u8::arbitrary(u)? % self.num_blocks) as u32))
  }

  // Mostly jump forwards, so that fewer functions spin forever.
  fn label(&self, cur: u8, u: &mut Unstructured) -> Result<Label> {
    let bix = if cur + 1 < self.num_blocks && bool::arbitrary(u)? {
      let ahead = self.num_blocks - cur - 1;
      BlockIx::new((cur + 1 + u8::arbitrary(u)? % ahead) as u32)
    } else {
      self.block(u)?
    };
    Ok(Label::Resolved { name: format!("b{}", bix.get()), bix })
  }

  fn has_reg_with_rc(&self, rc: RegClass) -> bool {
    !self.regs_by_rc[rc.rc_to_usize()].is_empty()
  }

  fn can_have_reg(&self, rc: RegClass) -> bool {
    self.has_reg_with_rc(rc)
      || self.vregs.len() != (self.num_virtual_regs as usize)
  }

  fn float_class(&self, u: &mut Unstructured) -> Result<RegClass> {
    Ok(if bool::arbitrary(u)? { RegClass::F32 } else { RegClass::F64 })
  }

  fn def_reg(&mut self, rc: RegClass, u: &mut Unstructured) -> Result<Reg> {
    let reg;
    loop {
      if bool::arbitrary(u)? {
        // virtual.
        let index = u16::arbitrary(u)? % self.num_virtual_regs;
        let ret = Reg::new_virtual(rc, index as u32);
        if self.vregs.contains_key(&index) && self.vregs[&index] != rc {
          continue;
        }
        self.vregs.insert(index, rc);
        reg = ret;
      } else {
        // real: R0..R7, then F0..F7, then the four doubles.
        let n = NUM_REAL_REGS_PER_RC;
        let (first, count) = match rc {
          RegClass::I32 => (0, n),
          RegClass::F32 => (n, n),
          RegClass::F64 => (2 * n, n / 2),
        };
        let offset = u8::arbitrary(u)? % count;
        reg = Reg::new_real(rc, offset, first + offset);
      }
      break;
    }
    self.regs_by_rc[rc.rc_to_usize()].insert(reg);
    Ok(reg)
  }

  fn mod_reg(&mut self, rc: RegClass, u: &mut Unstructured) -> Result<Reg> {
    let reg = self.get_reg(rc, u)?;
    if reg.is_virtual() {
      self.vregs.insert(reg.get_index() as u16, rc);
    }
    self.regs_by_rc[rc.rc_to_usize()].insert(reg);
    Ok(reg)
  }

  fn get_reg(&self, rc: RegClass, u: &mut Unstructured) -> Result<Reg> {
    debug_assert!(self.has_reg_with_rc(rc));
    let mut regs = Vec::from_iter(self.regs_by_rc[rc.rc_to_usize()].iter());
    // Sets iterate in no particular order.
    regs.sort();
    let reg = *regs[usize::arbitrary(u)? % regs.len()];
    Ok(reg)
  }

  fn get_ri(&self, u: &mut Unstructured) -> Result<RI> {
    Ok(if self.has_reg_with_rc(RegClass::I32) && bool::arbitrary(u)? {
      RI::Reg { reg: self.get_reg(RegClass::I32, u)? }
    } else {
      RI::Imm { imm: u32::arbitrary(u)? }
    })
  }

  fn get_ri_except(&self, except: Reg, u: &mut Unstructured) -> Result<RI> {
    Ok(match self.get_ri(u)? {
      RI::Reg { reg } if reg == except => RI::Imm { imm: u32::arbitrary(u)? },
      ri => ri,
    })
  }

  // Masks a register into the cell range first, so the access stays in
  // memory the entry block has written.
  fn get_am(
    &mut self, float: bool, u: &mut Unstructured, insns: &mut Vec<Inst>,
  ) -> Result<AM> {
    debug_assert!(self.has_reg_with_rc(RegClass::I32));
    let base = self.get_reg(RegClass::I32, u)?;
    let masked = self.def_reg(RegClass::I32, u)?;
    insns.push(Inst::BinOp {
      op: ir::BinOp::And,
      dst: masked,
      srcL: base,
      srcR: RI::Imm { imm: CELL_MASK },
    });
    let first = if float { FLOAT_CELLS } else { 0 };
    let spread = (FLOAT_CELLS - CELL_MASK) as u8;
    let offset = first + (u8::arbitrary(u)? % spread) as u32;
    Ok(AM::RI { base: masked, offset })
  }

  fn inst(
    &mut self, u: &mut Unstructured, insns: &mut Vec<Inst>,
  ) -> Result<()> {
    use Inst::*;
    use RegClass::*;

    const NUM_VARIANTS: u8 = 15;

    let inst;
    loop {
      // Out of input: stop retrying.
      if u.is_empty() {
        insns.push(Mark { text: "eof".to_string() });
        return Ok(());
      }
      inst = match u8::arbitrary(u)? % NUM_VARIANTS {
        0 => {
          if !self.can_have_reg(I32) {
            continue;
          }
          Imm { dst: self.def_reg(I32, u)?, imm: u32::arbitrary(u)? }
        }
        1 => {
          let rc = self.float_class(u)?;
          if !self.can_have_reg(rc) {
            continue;
          }
          ImmF { dst: self.def_reg(rc, u)?, imm: f64::arbitrary(u)? }
        }
        2 => {
          let rc = if bool::arbitrary(u)? { I32 } else { self.float_class(u)? };
          if !self.has_reg_with_rc(rc) {
            continue;
          }
          let src = self.get_reg(rc, u)?;
          Copy { dst: self.def_reg(rc, u)?, src }
        }
        3 => {
          if !self.has_reg_with_rc(I32) {
            continue;
          }
          let srcL = self.get_reg(I32, u)?;
          let srcR = self.get_ri(u)?;
          BinOp { op: ir::BinOp::arbitrary(u)?, dst: self.def_reg(I32, u)?, srcL, srcR }
        }
        4 => {
          if !self.has_reg_with_rc(I32) {
            continue;
          }
          let op = ir::BinOp::arbitrary(u)?;
          let dst = self.mod_reg(I32, u)?;
          BinOpM { op, dst, srcR: self.get_ri_except(dst, u)? }
        }
        5 => {
          let rc = self.float_class(u)?;
          if !self.has_reg_with_rc(rc) {
            continue;
          }
          let srcL = self.get_reg(rc, u)?;
          let srcR = self.get_reg(rc, u)?;
          BinOpF { op: ir::BinOpF::arbitrary(u)?, dst: self.def_reg(rc, u)?, srcL, srcR }
        }
        6 => {
          if !self.has_reg_with_rc(I32) {
            continue;
          }
          let addr = self.get_am(false, u, insns)?;
          Load { dst: self.def_reg(I32, u)?, addr }
        }
        7 => {
          if !self.has_reg_with_rc(I32) {
            continue;
          }
          let rc = self.float_class(u)?;
          let addr = self.get_am(true, u, insns)?;
          LoadF { dst: self.def_reg(rc, u)?, addr }
        }
        8 => {
          if !self.has_reg_with_rc(I32) {
            continue;
          }
          let addr = self.get_am(false, u, insns)?;
          Store { addr, src: self.get_reg(I32, u)? }
        }
        9 => {
          let rc = self.float_class(u)?;
          if !self.has_reg_with_rc(rc) || !self.has_reg_with_rc(I32) {
            continue;
          }
          let addr = self.get_am(true, u, insns)?;
          StoreF { addr, src: self.get_reg(rc, u)? }
        }
        10 => {
          if !self.has_reg_with_rc(I32) {
            continue;
          }
          PrintI { reg: self.get_reg(I32, u)? }
        }
        11 => {
          let rc = self.float_class(u)?;
          if !self.has_reg_with_rc(rc) {
            continue;
          }
          PrintF { reg: self.get_reg(rc, u)? }
        }
        12 => PrintS { str: format!("s{}", u8::arbitrary(u)?) },
        13 => Call { callee: format!("f{}", u8::arbitrary(u)?) },
        14 => Mark { text: format!("m{}", u8::arbitrary(u)?) },
        x => {
          debug_assert!(x < NUM_VARIANTS, "update NUM_VARIANTS above");
          unreachable!()
        }
      };
      break;
    }
    insns.push(inst);
    Ok(())
  }

  // Only the last block finishes, so there is always exactly one exit.
  fn inst_branch(&self, cur: u8, u: &mut Unstructured) -> Result<Inst> {
    Ok(if self.has_reg_with_rc(RegClass::I32) && bool::arbitrary(u)? {
      Inst::GotoCTF {
        cond: self.get_reg(RegClass::I32, u)?,
        targetT: self.label(cur, u)?,
        targetF: self.label(cur, u)?,
      }
    } else {
      Inst::Goto { target: self.label(cur, u)? }
    })
  }

  // Gives every register a value and every cell in use a value of the
  // right kind, so generated code mostly avoids uninitialised reads.
  fn prologue(&self, u: &mut Unstructured) -> Result<Vec<Inst>> {
    let mut insns = vec![];
    for rc in RegClass::all().iter() {
      let mut regs = Vec::from_iter(self.regs_by_rc[rc.rc_to_usize()].iter());
      regs.sort();
      for reg in regs {
        insns.push(match rc {
          RegClass::I32 => Inst::Imm { dst: *reg, imm: u32::arbitrary(u)? },
          _ => Inst::ImmF { dst: *reg, imm: u8::arbitrary(u)? as f64 },
        });
      }
    }
    let zero = Reg::new_virtual(RegClass::I32, self.num_virtual_regs as u32);
    let zero_f =
      Reg::new_virtual(RegClass::F64, self.num_virtual_regs as u32 + 1);
    insns.push(Inst::Imm { dst: zero, imm: 0 });
    insns.push(Inst::ImmF { dst: zero_f, imm: 0.0 });
    for cell in 0..NUM_CELLS {
      let addr = AM::RI { base: zero, offset: cell };
      insns.push(if cell < FLOAT_CELLS {
        Inst::Store { addr, src: zero }
      } else {
        Inst::StoreF { addr, src: zero_f }
      });
    }
    Ok(insns)
  }

  fn inst_finish(&self, u: &mut Unstructured) -> Result<Inst> {
    let mut candidates = vec![];
    for rc in RegClass::all().iter() {
      if self.has_reg_with_rc(*rc) {
        candidates.push(*rc);
      }
    }
    let reg = if !candidates.is_empty() && bool::arbitrary(u)? {
      let rc = candidates[usize::arbitrary(u)? % candidates.len()];
      Some(self.get_reg(rc, u)?)
    } else {
      None
    };
    Ok(Inst::Finish { reg })
  }
}

impl<'a> Arbitrary<'a> for Func {
  fn arbitrary(u: &mut Unstructured<'a>) -> arbitrary::Result<Func> {
    let num_virtual_regs = 1 + (u8::arbitrary(u)? as u16 % 128);
    let mut num_blocks = 1 + (u8::arbitrary(u)? % 64);

    let mut env = FuzzingEnv {
      num_blocks,
      num_virtual_regs,
      vregs: HashMap::new(),
      regs_by_rc: vec![HashSet::new(); NUM_REG_CLASSES],
    };

    let entry =
      Some(Label::Resolved { name: "b0".to_string(), bix: BlockIx::new(0) });

    let mut blocks = TypedIxVec::<BlockIx, Block>::new();

    let mut cur_block = 0;

    while num_blocks > 0 {
      let is_last = num_blocks == 1;
      let mut insns = vec![];

      let num_body_insts = u8::arbitrary(u)? % 64;
      for _ in 0..num_body_insts {
        env.inst(u, &mut insns)?;
      }
      insns.push(if is_last {
        env.inst_finish(u)?
      } else {
        env.inst_branch(cur_block, u)?
      });

      blocks.push(Block::new(format!("b{}", cur_block), insns));

      cur_block += 1;
      num_blocks -= 1;
    }

    let mut prologue = env.prologue(u)?;
    let entry_block: &mut Block = &mut blocks[BlockIx::new(0)];
    prologue.append(&mut entry_block.insns);
    entry_block.insns = prologue;

    let mut volatile = Set::empty();
    let mut ints: Vec<u16> = env
      .vregs
      .iter()
      .filter(|(_, rc)| **rc == RegClass::I32)
      .map(|(index, _)| *index)
      .collect();
    ints.sort();
    for index in ints {
      if u8::arbitrary(u)? % 8 == 0 {
        volatile.insert(Reg::new_virtual(RegClass::I32, index as u32).to_virtual_reg());
      }
    }

    Ok(Func {
      name: "funk".to_string(),
      entry,
      // Two more for the prologue's zeroes.
      nVirtualRegs: num_virtual_regs as u32 + 2,
      blocks,
      volatile,
      clobbers: caller_saved_regs(&fuzzing_universe()),
    })
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::validator::validate;

  fn noise(mut seed: u64, len: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(len);
    for _ in 0..len {
      seed ^= seed << 13;
      seed ^= seed >> 7;
      seed ^= seed << 17;
      bytes.push((seed >> 24) as u8);
    }
    bytes
  }

  #[test]
  fn generated_funcs_are_well_formed_and_runnable() {
    let univ = fuzzing_universe();
    let mut generated = 0;
    let mut ran = 0;
    for seed in 1..=200u64 {
      let data = noise(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15), 4096);
      let mut u = Unstructured::new(&data);
      let mut func = match Func::arbitrary(&mut u) {
        Ok(func) => func,
        Err(_) => continue,
      };
      generated += 1;

      for block in func.blocks.iter() {
        for insn in block.insns.iter() {
          if let Inst::BinOpM { dst, srcR: RI::Reg { reg }, .. } = insn {
            assert_ne!(dst, reg, "{:?} reads what it modifies", insn);
          }
          if let Inst::Load { addr, .. }
          | Inst::LoadF { addr, .. }
          | Inst::Store { addr, .. }
          | Inst::StoreF { addr, .. } = insn
          {
            if let AM::RI { offset, .. } = addr {
              assert!(*offset < NUM_CELLS);
            }
          }
          // Checks operand roles in debug builds.
          insn.get_reg_usage();
        }
      }
      assert_eq!(validate(&func, &univ), Ok(()));

      func.simplify_cfg();
      if run_func(&func, "generated", &univ, RunStage::BeforeRegalloc, 10_000)
        .is_ok()
      {
        ran += 1;
      }
    }
    assert!(generated > 100);
    assert!(ran > 0);
  }
}

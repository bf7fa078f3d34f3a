/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checks that a test function is well formed before it is handed to the
//! library, which assumes as much.

#![allow(non_snake_case)]

use crate::test_framework::*;
use flowcolor::{Map, RealRegUniverse, Reg, RegClass};

pub struct Context<'rru> {
  pub num_vregs: usize,
  pub num_blocks: u32,
  real_reg_universe: &'rru RealRegUniverse,
  vreg_types: Map<usize, RegClass>,
}

impl<'rru> Context<'rru> {
  fn new(func: &Func, real_reg_universe: &'rru RealRegUniverse) -> Self {
    Self {
      num_vregs: func.nVirtualRegs as usize,
      real_reg_universe,
      num_blocks: func.blocks.len(),
      vreg_types: Map::default(),
    }
  }

  pub fn check_reg(&mut self, reg: Reg) -> bool {
    let rc = reg.get_class();
    let index = reg.get_index();

    if reg.is_virtual() {
      // A vreg must be in range and keep its class across mentions.
      if let Some(prev_rc) = self.vreg_types.insert(index, rc) {
        if prev_rc != rc {
          return false;
        }
      }
      index < self.num_vregs
    } else {
      // If it's real, it must:
      // - exist in the array of real registers, with the same encoding,
      // - be in the range of its register class.
      let rreg = reg.to_real_reg();
      if !self.real_reg_universe.contains(rreg) {
        return false;
      }
      match self.real_reg_universe.allocable_by_class[rc.rc_to_usize()] {
        Some(ref reg_info) => index >= reg_info.first && index <= reg_info.last,
        None => false,
      }
    }
  }

  fn check_label(&self, label: &Label) -> bool {
    match label {
      Label::Resolved { bix, .. } => bix.get() < self.num_blocks,
      Label::Unresolved { .. } => false,
    }
  }
}

fn is_int(reg: Reg) -> bool {
  reg.get_class() == RegClass::I32
}

fn is_float(reg: Reg) -> bool {
  is_float_class(reg.get_class())
}

fn ri_is_int(ri: &RI) -> bool {
  ri.reg().map_or(true, is_int)
}

fn am_is_int(am: &AM) -> bool {
  am.regs().into_iter().all(is_int)
}

// Operand classes as each instruction expects them.
fn classes_agree(insn: &Inst) -> bool {
  match insn {
    Inst::Imm { dst, .. } => is_int(*dst),
    Inst::ImmF { dst, .. } => is_float(*dst),
    Inst::Copy { dst, src } => dst.get_class() == src.get_class(),
    Inst::BinOp { dst, srcL, srcR, .. } => {
      is_int(*dst) && is_int(*srcL) && ri_is_int(srcR)
    }
    Inst::BinOpM { dst, srcR, .. } => is_int(*dst) && ri_is_int(srcR),
    Inst::BinOpF { dst, srcL, srcR, .. } => {
      is_float(*dst)
        && srcL.get_class() == dst.get_class()
        && srcR.get_class() == dst.get_class()
    }
    Inst::Load { dst, addr } | Inst::Store { addr, src: dst } => {
      is_int(*dst) && am_is_int(addr)
    }
    Inst::LoadF { dst, addr } | Inst::StoreF { addr, src: dst } => {
      is_float(*dst) && am_is_int(addr)
    }
    Inst::GotoCTF { cond, .. } => is_int(*cond),
    Inst::PrintI { reg } => is_int(*reg),
    Inst::PrintF { reg } => is_float(*reg),
    Inst::Spill { .. }
    | Inst::Reload { .. }
    | Inst::Goto { .. }
    | Inst::PrintS { .. }
    | Inst::Call { .. }
    | Inst::Mark { .. }
    | Inst::Finish { .. } => true,
  }
}

fn type_checks(insn: &Inst, cx: &mut Context) -> bool {
  if !classes_agree(insn) {
    return false;
  }
  if !insn.labels().into_iter().all(|label| cx.check_label(label)) {
    return false;
  }
  let (def, m0d, uce) = insn.get_reg_usage();
  def.iter().chain(m0d.iter()).chain(uce.iter()).all(|reg| cx.check_reg(*reg))
}

pub fn validate(
  func: &Func, real_reg_universe: &RealRegUniverse,
) -> Result<(), String> {
  let mut cx = Context::new(func, real_reg_universe);

  // Function entry must exist and point to a valid block.
  match &func.entry {
    None => {
      return Err("missing entry label".into());
    }
    Some(label) => {
      if !cx.check_label(label) {
        return Err("invalid or unresolved entry label".into());
      }
    }
  };

  for vreg in func.volatile.iter() {
    if vreg.get_index() >= cx.num_vregs {
      return Err(format!("volatile {:?} out of range", vreg));
    }
  }

  let mut exits = 0;
  for bix in func.blocks.range() {
    let b = &func.blocks[bix];

    // Blocks must not be empty.
    let (last, body) = match b.insns.split_last() {
      Some(split) => split,
      None => return Err(format!("block {} is empty", b.name)),
    };

    for inst in b.insns.iter() {
      if !inst.is_user() {
        return Err(format!(
          "unexpected regalloc inst {:?} in block {}",
          inst, b.name
        ));
      }
      if !type_checks(inst, &mut cx) {
        return Err(format!(
          "inst {:?} in block {} does not type check",
          inst, b.name
        ));
      }
    }

    // No control flow instructions in the middle, but it must be one at the end.
    if let Some(inst) = body.iter().find(|inst| inst.is_control_flow()) {
      return Err(format!(
        "control flow inst {:?} in the middle of block {}",
        inst, b.name
      ));
    }
    match last {
      Inst::Finish { .. } => exits += 1,
      inst if inst.is_control_flow() => {}
      inst => {
        return Err(format!(
          "final inst {:?} of block {} must be a control flow inst",
          inst, b.name
        ))
      }
    }
  }

  // Exactly one way out.
  if exits != 1 {
    return Err(format!("{} blocks finish, expected exactly one", exits));
  }

  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;

  fn two_exits() -> Func {
    let mut func = Func::new("two_exits");
    func.set_entry("a");
    let c = func.new_virtual_reg(RegClass::I32);
    func.block("a", vec![i_imm(c, 1), i_goto_ctf(c, "b", "c")]);
    func.block("b", vec![i_finish(None)]);
    func.block("c", vec![i_finish(None)]);
    func.finish();
    func
  }

  #[test]
  fn rejects_multiple_exits() {
    let univ = make_universe(2, 0);
    let err = validate(&two_exits(), &univ).unwrap_err();
    assert!(err.contains("exactly one"), "{}", err);
  }

  #[test]
  fn rejects_mixed_classes_and_foreign_regs() {
    let univ = make_universe(2, 2);
    let mut func = Func::new("mixed");
    func.set_entry("a");
    let i = func.new_virtual_reg(RegClass::I32);
    let f = func.new_virtual_reg(RegClass::F32);
    func.block("a", vec![Inst::Copy { dst: i, src: f }, i_finish(None)]);
    func.finish();
    assert!(validate(&func, &univ).is_err());

    let mut func = Func::new("foreign");
    func.set_entry("a");
    let r9 = Reg::new_real(RegClass::I32, 0, 9);
    func.block("a", vec![i_imm(r9, 1), i_finish(None)]);
    func.finish();
    assert!(validate(&func, &univ).is_err());
  }

  #[test]
  fn accepts_a_diamond() {
    let univ = make_universe(2, 0);
    let mut func = Func::new("diamond");
    func.set_entry("a");
    let c = func.new_virtual_reg(RegClass::I32);
    func.block("a", vec![i_imm(c, 1), i_goto_ctf(c, "b", "c")]);
    func.block("b", vec![i_print_i(c), i_goto("d")]);
    func.block("c", vec![i_call("f"), i_goto("d")]);
    func.block("d", vec![i_finish(Some(c))]);
    func.finish();
    assert_eq!(validate(&func, &univ), Ok(()));
  }
}

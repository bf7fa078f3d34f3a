/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checker: verifies that a colouring keeps the dataflow of the original,
//! vreg-based code.
//!
//! The basic idea is that we track symbolic values as they flow through
//! real registers.  A symbol is the name of a register in the function as
//! presented to the colourer (after spill code has been inserted): any
//! instruction that writes a virtual or real register generates that
//! register's symbol into the real register it is coloured to.
//!
//! The dataflow analysis state at each program point is a map `R` of: real
//! reg -> lattice value, where a value is a set of symbols all known to be in
//! that register.  `Unknown` is top; the empty set (`Conflicted`) is bottom.
//!
//! The transfer functions are:
//!
//!   - move [ V_i := V_j ], coloured [ R_i := R_j ]
//!
//!       R[R_i] := R[R_j] + { V_i }
//!
//!     A copy holds the old value under a new name, so a move whose two
//!     sides share a register leaves both symbols readable.
//!
//!   - any other statement [ V_i := op V_j, V_k, ... ]
//!
//!       R[R_i] := { V_i }
//!
//! In both cases the defined symbol is first removed from every other
//! register, and every register overlapping R_i becomes `Conflicted`.
//!
//! The initial state is all `Unknown`.  At control-flow join points values
//! meet by set intersection.
//!
//! To check correctness, we first find the dataflow fixpoint.  Then at each
//! instruction we check that the register each operand is coloured to holds
//! that operand's symbol (or is `Unknown`).  Spill slots are not tracked:
//! spill code is ordinary code to the checker.

#![allow(non_snake_case)]

use log::{debug, info};

use crate::analysis_control_flow::InstLayout;
use crate::data_structures::{
  BlockIx, InstIx, Map, Queue, RealReg, RealRegUniverse, Reg, TypedIxVec,
  VirtualReg,
};
use crate::interface::Function;

/// Abstract state for a real register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckerValue {
  /// "top" value: this register has no known value.
  Unknown,
  /// "bottom" value: this register has a conflicted value.
  Conflicted,
  /// The register holds the value of each of these symbols, sorted.
  Holds(Vec<Reg>),
}

impl CheckerValue {
  /// Meet function of the abstract-interpretation value lattice.
  pub fn meet(&self, other: &CheckerValue) -> CheckerValue {
    match (self, other) {
      (CheckerValue::Unknown, _) => other.clone(),
      (_, CheckerValue::Unknown) => self.clone(),
      (CheckerValue::Conflicted, _) | (_, CheckerValue::Conflicted) => {
        CheckerValue::Conflicted
      }
      (CheckerValue::Holds(a), CheckerValue::Holds(b)) => {
        let both: Vec<Reg> = a.iter().filter(|r| b.contains(r)).cloned().collect();
        if both.is_empty() {
          CheckerValue::Conflicted
        } else {
          CheckerValue::Holds(both)
        }
      }
    }
  }

  fn holds(&self, sym: Reg) -> bool {
    match self {
      CheckerValue::Unknown => true,
      CheckerValue::Conflicted => false,
      CheckerValue::Holds(syms) => syms.contains(&sym),
    }
  }
}

/// A use that finds the wrong value in its register.
#[derive(Clone, Debug)]
pub struct CheckerError {
  pub inst: InstIx,
  /// The operand, as written before colouring.
  pub operand: Reg,
  /// The register it was coloured to.
  pub rreg: RealReg,
  pub found: CheckerValue,
}

#[derive(Clone, Debug)]
pub struct CheckerErrors {
  pub errors: Vec<CheckerError>,
}

// Absent registers are Unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct CheckerState {
  regs: Map<usize, CheckerValue>,
}

struct CheckerContext<'a> {
  colors: &'a Map<VirtualReg, RealReg>,
  reg_universe: &'a RealRegUniverse,
}

impl<'a> CheckerContext<'a> {
  // The real register an operand lives in, and its symbol.
  fn locate(&self, reg: Reg) -> Option<(RealReg, Reg)> {
    match reg.as_virtual_reg() {
      Some(vreg) => self.colors.get(&vreg).map(|rreg| (*rreg, reg)),
      None => Some((reg.to_real_reg(), reg)),
    }
  }
}

impl CheckerState {
  fn get(&self, ix: usize) -> CheckerValue {
    self.regs.get(&ix).cloned().unwrap_or(CheckerValue::Unknown)
  }

  /// Merge this checker state with another at a CFG join-point.
  fn meet_with(&mut self, other: &CheckerState) {
    for (ix, val) in other.regs.iter() {
      let merged = match self.regs.get(ix) {
        Some(mine) => mine.meet(val),
        None => val.clone(),
      };
      self.regs.insert(*ix, merged);
    }
  }

  fn kill(&mut self, sym: Reg) {
    for val in self.regs.values_mut() {
      if let CheckerValue::Holds(syms) = val {
        syms.retain(|s| *s != sym);
        if syms.is_empty() {
          *val = CheckerValue::Conflicted;
        }
      }
    }
  }

  fn write(&mut self, ctx: &CheckerContext, rreg: RealReg, mut syms: Vec<Reg>) {
    let ix = rreg.get_index();
    for alias in ctx.reg_universe.aliases[ix].iter() {
      self.regs.insert(*alias as usize, CheckerValue::Conflicted);
    }
    syms.sort();
    syms.dedup();
    self.regs.insert(ix, CheckerValue::Holds(syms));
  }

  fn step<F: Function>(
    &mut self, ctx: &CheckerContext, func: &F, iix: InstIx, insn: &F::Inst,
    errors: &mut Vec<CheckerError>,
  ) {
    let iru = func.get_regs(insn);
    for reg in iru.used.iter().chain(iru.modified.iter()) {
      if let Some((rreg, sym)) = ctx.locate(*reg) {
        let found = self.get(rreg.get_index());
        if !found.holds(sym) {
          errors.push(CheckerError { inst: iix, operand: sym, rreg, found });
        }
      }
    }

    if let Some((dst, src)) = func.is_move(insn) {
      if let (Some((d_rreg, d_sym)), Some((s_rreg, _))) =
        (ctx.locate(dst), ctx.locate(src))
      {
        let mut syms = match self.get(s_rreg.get_index()) {
          CheckerValue::Holds(syms) => syms,
          _ => vec![],
        };
        self.kill(d_sym);
        syms.retain(|s| *s != d_sym);
        syms.push(d_sym);
        self.write(ctx, d_rreg, syms);
        return;
      }
    }

    for reg in iru.defined.iter().chain(iru.modified.iter()) {
      if let Some((rreg, sym)) = ctx.locate(*reg) {
        self.kill(sym);
        self.write(ctx, rreg, vec![sym]);
      }
    }
  }
}

/// Check that colouring |func| with |colors| preserves its dataflow.
/// Virtual registers without a colour are not checked.
#[inline(never)]
pub(crate) fn check<F: Function>(
  func: &F, colors: &Map<VirtualReg, RealReg>, reg_universe: &RealRegUniverse,
) -> Result<(), CheckerErrors> {
  info!("checker: begin");
  let ctx = CheckerContext { colors, reg_universe };
  let layout = InstLayout::new(func);
  let nBlocks = func.blocks().len() as u32;

  let mut in_states = TypedIxVec::<BlockIx, Option<CheckerState>>::new();
  in_states.resize(nBlocks, None);
  let mut queued = TypedIxVec::<BlockIx, bool>::new();
  queued.resize(nBlocks, false);

  let entry = func.entry_block();
  in_states[entry] = Some(CheckerState::default());
  queued[entry] = true;
  let mut workQ = Queue::<BlockIx>::new();
  workQ.push_back(entry);

  // Errors found before the fixpoint are not final.
  let mut scratch = Vec::new();
  let mut nEvals = 0;
  while let Some(bix) = workQ.pop_front() {
    queued[bix] = false;
    nEvals += 1;
    let mut state = match &in_states[bix] {
      Some(state) => state.clone(),
      None => continue,
    };
    for (iix, insn) in layout.range(bix).into_iter().zip(func.block_insns(bix))
    {
      state.step(&ctx, func, iix, insn, &mut scratch);
    }
    scratch.clear();

    for succ in func.block_succs(bix) {
      let changed = match &mut in_states[succ] {
        None => {
          in_states[succ] = Some(state.clone());
          true
        }
        Some(old) => {
          let before = old.clone();
          old.meet_with(&state);
          *old != before
        }
      };
      if changed && !queued[succ] {
        queued[succ] = true;
        workQ.push_back(succ);
      }
    }
  }
  debug!("checker: fixpoint after {} block evaluations", nEvals);

  let mut errors = Vec::new();
  for bix in func.blocks() {
    if let Some(state) = &in_states[bix] {
      let mut state = state.clone();
      for (iix, insn) in
        layout.range(bix).into_iter().zip(func.block_insns(bix))
      {
        state.step(&ctx, func, iix, insn, &mut errors);
      }
    }
  }

  info!("checker: end, {} errors", errors.len());
  if errors.is_empty() {
    Ok(())
  } else {
    Err(CheckerErrors { errors })
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::mock::{b, universe, v, MockFunc, MockInst::*};

  fn colors(pairs: &[(Reg, usize)], univ: &RealRegUniverse) -> Map<VirtualReg, RealReg> {
    let mut map = Map::default();
    for (vreg, ix) in pairs {
      map.insert(vreg.to_virtual_reg(), univ.regs[*ix].0);
    }
    map
  }

  fn straight_line() -> MockFunc {
    MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: v(1), srcs: vec![] },
      Out { srcs: vec![v(0), v(1)] },
      Ret,
    ]])
  }

  #[test]
  fn shared_register_for_live_values_is_caught() {
    let univ = universe(2);
    let func = straight_line();
    let errs = check(&func, &colors(&[(v(0), 0), (v(1), 0)], &univ), &univ)
      .unwrap_err();
    assert_eq!(errs.errors.len(), 1);
    assert_eq!(errs.errors[0].inst, InstIx::new(2));
    assert_eq!(errs.errors[0].operand, v(0));
    assert_eq!(errs.errors[0].found, CheckerValue::Holds(vec![v(1)]));
  }

  #[test]
  fn distinct_registers_pass() {
    let univ = universe(2);
    let func = straight_line();
    assert!(check(&func, &colors(&[(v(0), 0), (v(1), 1)], &univ), &univ).is_ok());
  }

  #[test]
  fn copies_may_share_a_register() {
    let univ = universe(2);
    let func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Move { dst: v(1), src: v(0) },
      Out { srcs: vec![v(0), v(1)] },
      Ret,
    ]]);
    assert!(check(&func, &colors(&[(v(0), 0), (v(1), 0)], &univ), &univ).is_ok());
  }

  #[test]
  fn values_meet_at_joins() {
    let univ = universe(2);
    let func = MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(2)] },
      ],
      vec![
        Op { dst: v(2), srcs: vec![] },
        Out { srcs: vec![v(2)] },
        Br { cond: None, targets: vec![b(3)] },
      ],
      vec![Br { cond: None, targets: vec![b(3)] }],
      vec![Out { srcs: vec![v(0)] }, Ret],
    ]);
    let errs = check(&func, &colors(&[(v(0), 0), (v(2), 0)], &univ), &univ)
      .unwrap_err();
    assert_eq!(errs.errors.len(), 1);
    assert_eq!(errs.errors[0].found, CheckerValue::Conflicted);
    assert!(check(&func, &colors(&[(v(0), 0), (v(2), 1)], &univ), &univ).is_ok());
  }
}

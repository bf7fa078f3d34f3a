/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Dead and useless code elimination, after Morgan: mark the instructions
//! with visible effects, then everything they depend on, through data
//! (reaching definitions) and control (reverse dominance frontiers).  The
//! rest goes.

#![allow(non_snake_case)]

use log::{debug, info, trace};

use crate::analysis_control_flow::{AnalysisError, CfgInfo, InstLayout};
use crate::analysis_data_flow::{
  DefUseAnalyzer, OperandCatalog, ReachingDefs, RegDefUse,
};
use crate::analysis_dominance::DominanceInfo;
use crate::data_structures::{
  BlockIx, InstIx, Queue, RealRegUniverse, TypedIxVec,
};
use crate::interface::{Function, InstKind};
use crate::nat_set::NatSet;

/// What dead code elimination did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DceResult {
  /// Instructions deleted.
  pub deleted: u32,
  /// Block-ending branches replaced by a jump.
  pub redirected: u32,
}

// What to do with each block, decided while the analyses are still alive.
struct Plan {
  keep: TypedIxVec<BlockIx, Vec<bool>>,
  redirect: TypedIxVec<BlockIx, Option<BlockIx>>,
}

// An instruction that must survive no matter what uses its results.
fn is_basic_necessity<F: Function>(
  func: &F, insn: &F::Inst, reg_universe: &RealRegUniverse,
) -> bool {
  match func.inst_kind(insn) {
    InstKind::Store
    | InstKind::Call
    | InstKind::Return
    | InstKind::Builtin
    | InstKind::Marker => true,
    InstKind::Plain | InstKind::Branch => {
      let iru = func.get_regs(insn);
      iru.defined.iter().chain(iru.modified.iter()).any(|reg| {
        match reg.as_virtual_reg() {
          Some(vreg) => func.is_volatile(vreg),
          None => !reg_universe.is_allocable(reg.to_real_reg()),
        }
      })
    }
  }
}

fn insn_at<'f, F: Function>(
  func: &'f F, layout: &InstLayout, iix: InstIx,
) -> &'f F::Inst {
  let (bix, pos) = layout.locate(iix);
  &func.block_insns(bix)[pos]
}

#[inline(never)]
fn make_plan<F: Function>(
  func: &F, reg_universe: &RealRegUniverse,
) -> Result<Plan, AnalysisError> {
  let cfg = CfgInfo::create(func)?;
  let mut dom = DominanceInfo::new(&cfg)?;
  dom.find_postdominators();
  dom.find_reverse_dom_frontier();
  let layout = InstLayout::new(func);
  let catalog = OperandCatalog::for_function(func, reg_universe)?;
  let analyzer = RegDefUse::new(&catalog);
  let rd = ReachingDefs::compute(func, &cfg, &layout, &analyzer);

  // === BEGIN find basic necessities ===
  //
  // While scanning, note the definition points each instruction's uses may
  // come from.
  let mut necessary = TypedIxVec::<InstIx, bool>::new();
  necessary.resize(layout.num_insts(), false);
  let mut depends_on = TypedIxVec::<InstIx, NatSet>::new();
  let mut workQ = Queue::<InstIx>::new();

  for bix in func.blocks() {
    let mut reaching = rd.in_set(bix).clone();
    for (iix, insn) in layout.range(bix).into_iter().zip(func.block_insns(bix))
    {
      let du = analyzer.def_use(func, insn);
      let mut deps = NatSet::empty();
      for slot in du.uses.iter() {
        let mut from = reaching.clone();
        from *= rd.def_points_for(slot);
        deps += &from;
      }
      depends_on.push(deps);

      if is_basic_necessity(func, insn, reg_universe) {
        necessary[iix] = true;
        workQ.push_back(iix);
      }
      rd.apply_inst(iix, &mut reaching);
    }
  }
  debug!("dead_code: {} basic necessities", workQ.len());
  //
  // === END find basic necessities ===

  // === BEGIN process the worklist ===
  //
  while let Some(iix) = workQ.pop_front() {
    trace!("dead_code: necessary {:?}", iix);
    let bix = layout.block_of(iix);

    // Control dependence: the branches deciding whether |bix| runs.
    for ctrl in dom.reverse_dominance_frontier(bix) {
      if let Some(last) = layout.last(ctrl) {
        let is_branch =
          func.inst_kind(insn_at(func, &layout, last)) == InstKind::Branch;
        if is_branch && !necessary[last] {
          necessary[last] = true;
          workQ.push_back(last);
        }
      }
    }

    // Data dependence.
    for point in depends_on[iix].iter() {
      let producer = rd.map().lookup(point);
      if !necessary[producer] {
        necessary[producer] = true;
        workQ.push_back(producer);
      }
    }
  }
  //
  // === END process the worklist ===

  // === BEGIN decide what to discard ===
  //
  let exit = func.exit_block();
  let mut plan = Plan { keep: TypedIxVec::new(), redirect: TypedIxVec::new() };
  for bix in func.blocks() {
    let insns = func.block_insns(bix);
    let mut keep = Vec::with_capacity(insns.len());
    let mut redirect = None;
    for (pos, iix) in layout.range(bix).into_iter().enumerate() {
      let kind = func.inst_kind(&insns[pos]);
      let is_last = pos + 1 == insns.len();
      if necessary[iix] || kind == InstKind::Marker {
        keep.push(true);
      } else if is_last && kind == InstKind::Branch {
        // Structurally required: retarget it instead.
        keep.push(true);
        let succs = cfg.succ_map[bix].clone();
        let target = match dom.immediate_postdominator(bix) {
          Some(ipdom) if ipdom != exit => Some(ipdom),
          _ => succs.first().cloned(),
        };
        if let Some(to) = target {
          if succs != vec![to] {
            redirect = Some(to);
          }
        }
      } else {
        keep.push(false);
      }
    }
    plan.keep.push(keep);
    plan.redirect.push(redirect);
  }
  //
  // === END decide what to discard ===

  Ok(plan)
}

/// Run dead code elimination on |func|.  Unreachable blocks are removed
/// first by the client's CFG simplification, which also runs at the end.
#[inline(never)]
pub fn run<F: Function>(
  func: &mut F, reg_universe: &RealRegUniverse,
) -> Result<DceResult, AnalysisError> {
  info!("dead_code: begin");
  func.simplify_cfg();

  let plan = make_plan(&*func, reg_universe)?;

  let mut res = DceResult::default();
  for bix in func.blocks() {
    let keep = &plan.keep[bix];
    let insns = func.block_insns_mut(bix);
    let before = insns.len();
    let mut pos = 0;
    insns.retain(|_| {
      pos += 1;
      keep[pos - 1]
    });
    res.deleted += (before - insns.len()) as u32;

    if let Some(to) = plan.redirect[bix] {
      debug!("dead_code: redirecting {:?} to {:?}", bix, to);
      func.redirect_branch(bix, to);
      res.redirected += 1;
    }
  }

  func.simplify_cfg();
  info!(
    "dead_code: end, {} insns deleted, {} branches redirected",
    res.deleted, res.redirected
  );
  Ok(res)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::mock::{b, universe, v, MockFunc, MockInst::*};

  #[test]
  fn unused_pure_code_is_deleted() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: v(1), srcs: vec![v(0)] },
      Out { srcs: vec![v(0)] },
      Ret,
    ]]);
    let res = run(&mut func, &univ).unwrap();
    assert_eq!(res, DceResult { deleted: 1, redirected: 0 });
    assert_eq!(
      func.blocks[0],
      vec![Op { dst: v(0), srcs: vec![] }, Out { srcs: vec![v(0)] }, Ret]
    );
  }

  #[test]
  fn useless_branch_goes_to_first_successor_when_ipdom_is_exit() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(2)] },
      ],
      vec![Op { dst: v(1), srcs: vec![] }, Br { cond: None, targets: vec![b(3)] }],
      vec![Op { dst: v(2), srcs: vec![] }, Br { cond: None, targets: vec![b(3)] }],
      vec![Ret],
    ]);
    let res = run(&mut func, &univ).unwrap();
    assert_eq!(res, DceResult { deleted: 3, redirected: 1 });
    assert_eq!(func.blocks[0], vec![Br { cond: None, targets: vec![b(1)] }]);
    assert_eq!(func.blocks[1], vec![Br { cond: None, targets: vec![b(3)] }]);
  }

  #[test]
  fn useless_branch_goes_to_ipdom() {
    // 0 -> {1, 2} -> 3 -> 4 (exit), with 3 observable.
    let univ = universe(2);
    let mut func = MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(2)] },
      ],
      vec![Br { cond: None, targets: vec![b(3)] }],
      vec![Br { cond: None, targets: vec![b(3)] }],
      vec![Call, Br { cond: None, targets: vec![b(4)] }],
      vec![Ret],
    ]);
    let res = run(&mut func, &univ).unwrap();
    assert_eq!(res.redirected, 1);
    assert_eq!(func.blocks[0], vec![Br { cond: None, targets: vec![b(3)] }]);
    assert_eq!(func.blocks[3][0], Call);
  }

  #[test]
  fn control_dependence_keeps_the_deciding_branch() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(2)] },
      ],
      vec![
        Op { dst: v(1), srcs: vec![] },
        Out { srcs: vec![v(1)] },
        Br { cond: None, targets: vec![b(3)] },
      ],
      vec![Br { cond: None, targets: vec![b(3)] }],
      vec![Ret],
    ]);
    let before = func.clone();
    let res = run(&mut func, &univ).unwrap();
    assert_eq!(res, DceResult::default());
    assert_eq!(func.all_insts(), before.all_insts());
  }

  #[test]
  fn effects_on_volatile_and_reserved_registers_survive() {
    let univ = universe(2);
    let r0 = univ.regs[0].0.to_reg();
    let r2 = univ.regs[2].0.to_reg();
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Op { dst: r0, srcs: vec![] },
      Op { dst: r2, srcs: vec![] },
      Ret,
    ]]);
    func.volatile.push(v(0).to_virtual_reg());
    let res = run(&mut func, &univ).unwrap();
    assert_eq!(res.deleted, 1);
    assert_eq!(
      func.blocks[0],
      vec![Op { dst: v(0), srcs: vec![] }, Op { dst: r2, srcs: vec![] }, Ret]
    );
  }

  #[test]
  fn modification_chains_are_followed() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![vec![
      Op { dst: v(0), srcs: vec![] },
      Bump { reg: v(0) },
      Op { dst: v(1), srcs: vec![v(0)] },
      Bump { reg: v(1) },
      Out { srcs: vec![v(0)] },
      Ret,
    ]]);
    let res = run(&mut func, &univ).unwrap();
    assert_eq!(res.deleted, 2);
    assert_eq!(
      func.blocks[0],
      vec![
        Op { dst: v(0), srcs: vec![] },
        Bump { reg: v(0) },
        Out { srcs: vec![v(0)] },
        Ret
      ]
    );
  }

  // Every block ends in exactly one terminator, targets are in range, and
  // only the exit returns.
  fn assert_well_formed(func: &MockFunc) {
    let n = func.blocks.len();
    let mut rets = 0;
    for (i, insns) in func.blocks.iter().enumerate() {
      let (last, body) = match insns.split_last() {
        Some(split) => split,
        None => panic!("block {} is empty", i),
      };
      match last {
        Ret => {
          assert_eq!(i, n - 1, "block {} returns but isn't the exit", i);
          rets += 1;
        }
        Br { targets, .. } => {
          assert!(!targets.is_empty(), "block {} branches nowhere", i);
          assert!(targets.iter().all(|t| t.get_usize() < n));
        }
        other => panic!("block {} ends in {:?}", i, other),
      }
      assert!(
        body.iter().all(|insn| !matches!(insn, Br { .. } | Ret)),
        "terminator inside block {}",
        i
      );
    }
    assert_eq!(rets, 1);
    assert!(CfgInfo::create(func).is_ok());
  }

  #[test]
  fn loops_keep_their_shape_and_a_second_run_is_a_no_op() {
    // 0 -> {1, 4}; 1 -> {2, 3}; 2 -> 1; 3 -> {1, 5}; 4 -> 5; exit 5
    let univ = universe(2);
    let mut func = MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Op { dst: v(5), srcs: vec![] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(4)] },
      ],
      vec![
        Bump { reg: v(0) },
        Op { dst: v(3), srcs: vec![v(0)] },
        Br { cond: Some(v(0)), targets: vec![b(2), b(3)] },
      ],
      vec![
        Op { dst: v(4), srcs: vec![v(0)] },
        Br { cond: None, targets: vec![b(1)] },
      ],
      vec![
        Out { srcs: vec![v(0)] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(5)] },
      ],
      vec![Op { dst: v(6), srcs: vec![] }, Br { cond: None, targets: vec![b(5)] }],
      vec![Ret],
    ]);
    assert_well_formed(&func);

    let res = run(&mut func, &univ).unwrap();
    assert_eq!(res, DceResult { deleted: 4, redirected: 0 });
    assert_well_formed(&func);
    // The loop's branches decide whether the output happens.
    assert_eq!(
      func.blocks[1],
      vec![
        Bump { reg: v(0) },
        Br { cond: Some(v(0)), targets: vec![b(2), b(3)] }
      ]
    );
    assert_eq!(func.blocks[2], vec![Br { cond: None, targets: vec![b(1)] }]);

    let after = func.all_insts();
    let again = run(&mut func, &univ).unwrap();
    assert_eq!(again, DceResult::default());
    assert_eq!(func.all_insts(), after);
  }

  #[test]
  fn redirected_branches_leave_a_well_formed_cfg() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![
      vec![
        Op { dst: v(0), srcs: vec![] },
        Br { cond: Some(v(0)), targets: vec![b(1), b(2)] },
      ],
      vec![Op { dst: v(1), srcs: vec![] }, Br { cond: None, targets: vec![b(3)] }],
      vec![Br { cond: None, targets: vec![b(3)] }],
      vec![Call, Br { cond: Some(v(0)), targets: vec![b(0), b(4)] }],
      vec![Ret],
    ]);
    let res = run(&mut func, &univ).unwrap();
    assert!(res.redirected > 0);
    assert_well_formed(&func);
  }

  #[test]
  fn unreachable_blocks_are_an_error_without_simplification() {
    let univ = universe(2);
    let mut func = MockFunc::new(vec![
      vec![Br { cond: None, targets: vec![b(2)] }],
      vec![Br { cond: None, targets: vec![b(2)] }],
      vec![Ret],
    ]);
    match run(&mut func, &univ) {
      Err(AnalysisError::UnreachableBlocks) => {}
      other => panic!("unexpected {:?}", other),
    }
  }
}

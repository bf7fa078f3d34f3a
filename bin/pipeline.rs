/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Putting a test function through the library, and checking that what
//! comes out behaves like what went in.

use flowcolor::{
  allocate_registers, eliminate_dead_code, DceResult, Options,
  RealRegUniverse, RegAllocResult,
};
use log::info;

use crate::test_framework::{
  caller_saved_regs, run_func, Func, RunResult, RunStage, DEFAULT_STEP_LIMIT,
};
use crate::validator;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Pass {
  Dce,
  Regalloc,
  Both,
}

impl Pass {
  pub fn from_name(name: &str) -> Option<Pass> {
    match name {
      "dce" => Some(Pass::Dce),
      "regalloc" => Some(Pass::Regalloc),
      "both" => Some(Pass::Both),
      _ => None,
    }
  }

  fn runs_dce(self) -> bool {
    self != Pass::Regalloc
  }

  fn runs_regalloc(self) -> bool {
    self != Pass::Dce
  }

  pub fn run_stage(self) -> RunStage {
    if self.runs_regalloc() {
      RunStage::AfterRegalloc
    } else {
      RunStage::BeforeRegalloc
    }
  }
}

/// What the passes reported.
#[derive(Default)]
pub struct PassResults {
  pub dce: Option<DceResult>,
  pub regalloc: Option<RegAllocResult>,
}

/// Bind |func| to the universe's calling convention, tidy its CFG and check
/// that it is well formed.
pub fn prepare(
  func: &mut Func, reg_universe: &RealRegUniverse,
) -> Result<(), String> {
  func.clobbers = caller_saved_regs(reg_universe);
  validator::validate(func, reg_universe)?;
  func.simplify_cfg();
  Ok(())
}

pub fn run_passes(
  func: &mut Func, reg_universe: &RealRegUniverse, pass: Pass, opts: &Options,
) -> Result<PassResults, String> {
  let mut results = PassResults::default();
  if pass.runs_dce() {
    let res = eliminate_dead_code(func, reg_universe)
      .map_err(|err| format!("dead code elimination failed: {}", err))?;
    info!(
      "dce: {} insns deleted, {} branches redirected",
      res.deleted, res.redirected
    );
    results.dce = Some(res);
  }
  if pass.runs_regalloc() {
    let res = allocate_registers(func, reg_universe, opts)
      .map_err(|err| format!("allocation failed: {}", err))?;
    info!(
      "regalloc: {} rounds, {} slots, {} reloads, {} spills, {} moves coalesced",
      res.rounds,
      res.num_spill_slots,
      res.spill_loads,
      res.spill_stores,
      res.coalesced_moves
    );
    results.regalloc = Some(res);
  }
  Ok(results)
}

/// Run |func| before and after |pass| and compare.  Returns both runs.
pub fn run_and_compare(
  func: &mut Func, reg_universe: &RealRegUniverse, pass: Pass, opts: &Options,
) -> Result<(PassResults, RunResult, RunResult), String> {
  prepare(func, reg_universe)?;
  let before = run_func(
    func,
    "Before",
    reg_universe,
    RunStage::BeforeRegalloc,
    DEFAULT_STEP_LIMIT,
  )?;
  let results = run_passes(func, reg_universe, pass, opts)?;
  let after =
    run_func(func, "After", reg_universe, pass.run_stage(), DEFAULT_STEP_LIMIT)
      .map_err(|err| format!("code after {:?} failed: {}", pass, err))?;
  check_results(&before, &after, pass, &results);
  Ok((results, before, after))
}

pub fn check_results(
  before: &RunResult, after: &RunResult, pass: Pass, results: &PassResults,
) {
  // Allocation adds spill code and may delete moves.  Every other
  // instruction runs exactly as often as it did before.
  let user_steps = after.num_steps - after.num_spills - after.num_reloads;
  let moves_deleted =
    results.regalloc.as_ref().map_or(0, |res| res.coalesced_moves);
  match pass {
    Pass::Regalloc => {
      if moves_deleted == 0 {
        assert_eq!(user_steps, before.num_steps, "inconsistent trace");
      } else {
        assert!(user_steps <= before.num_steps, "inconsistent trace");
      }
    }
    Pass::Dce => assert!(
      after.num_steps <= before.num_steps,
      "dead code elimination made the program longer"
    ),
    Pass::Both => assert!(
      user_steps <= before.num_steps,
      "the passes made the program longer"
    ),
  }

  // NaN never equals itself, so compare what gets printed.
  assert!(
    format!("{:?}", before.ret_value) == format!("{:?}", after.ret_value),
    "Incorrect interpreter result: expected {:?}, observed {:?}",
    before.ret_value,
    after.ret_value
  );

  assert_eq!(
    before.stdout, after.stdout,
    r#"Different stdout values before/after {:?}:
- before:
{}
-after:
{}
        "#,
    pass, before.stdout, after.stdout
  );
}

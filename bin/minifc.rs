/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

use flowcolor::Options;
use minifc::pipeline::{check_results, prepare, run_passes, Pass};
use minifc::test_cases::find_func;
use minifc::test_framework::{
  make_universe, run_func, RunStage, DEFAULT_STEP_LIMIT,
};

use clap;
use log::{error, info};
use pretty_env_logger;
use std::process;

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = clap::App::new("minifc")
    .about("a simple program to exercise flowcolor's passes on test functions")
    .arg(
      clap::Arg::new("iregs")
        .short('i')
        .takes_value(true)
        .help("number of integer registers available (0 if not set)"),
    )
    .arg(
      clap::Arg::new("fregs")
        .short('f')
        .takes_value(true)
        .help("number of single precision registers available (0 if not set)"),
    )
    .arg(
      clap::Arg::new("test")
        .short('t')
        .takes_value(true)
        .required(true)
        .help("test case name"),
    )
    .arg(
      clap::Arg::new("pass")
        .short('p')
        .takes_value(true)
        .default_value("both")
        .possible_values(vec!["dce", "regalloc", "both"])
        .help("which passes to run"),
    )
    .arg(
      clap::Arg::new("no-coalescing")
        .long("no-coalescing")
        .help("keep every move"),
    )
    .arg(
      clap::Arg::new("checker")
        .long("checker")
        .help("run the allocation checker"),
    );
  let matches = app.get_matches();

  let func_name = matches.value_of("test").unwrap();

  let (num_regs_i32, num_regs_f32) = match (
    matches.value_of("iregs").unwrap_or("0").parse::<usize>(),
    matches.value_of("fregs").unwrap_or("0").parse::<usize>(),
  ) {
    (Ok(num_i32), Ok(num_f32)) => (num_i32, num_f32),
    _other => {
      println!("invalid iregs/fregs values");
      process::exit(1);
    }
  };

  // Unwrap is fine because of the default and possible values above.
  let pass = Pass::from_name(matches.value_of("pass").unwrap()).unwrap();
  info!("Running {:?}", pass);

  let opts = Options {
    run_checker: matches.is_present("checker"),
    coalescing: !matches.is_present("no-coalescing"),
    ..Options::default()
  };

  if let Err(err) = run(func_name, num_regs_i32, num_regs_f32, pass, &opts) {
    error!("{}", err);
    println!("{}", err);
    process::exit(1);
  }
}

fn run(
  func_name: &str, num_regs_i32: usize, num_regs_f32: usize, pass: Pass,
  opts: &Options,
) -> Result<(), String> {
  let mut func = match find_func(func_name) {
    Ok(func) => func,
    Err(available_func_names) => {
      println!("available func names are:");
      for name in available_func_names {
        println!("     {}", name);
      }
      return Err(format!("can't find Func with name '{}'", func_name));
    }
  };

  let reg_universe = make_universe(num_regs_i32, num_regs_f32);

  prepare(&mut func, &reg_universe)
    .map_err(|err| format!("invalid test function: {}", err))?;

  func.print("before");

  // Just so we can run it later.
  let original_func = func.clone();

  let results = run_passes(&mut func, &reg_universe, pass, opts)?;

  func.print("after");

  let before = run_func(
    &original_func,
    "Before",
    &reg_universe,
    RunStage::BeforeRegalloc,
    DEFAULT_STEP_LIMIT,
  );

  let after =
    run_func(&func, "After", &reg_universe, pass.run_stage(), DEFAULT_STEP_LIMIT);

  println!("");

  match before {
    Ok(before) => {
      let after = after
        .map_err(|err| format!("code after {:?} failed: {}", pass, err))?;
      check_results(&before, &after, pass, &results);
    }
    Err(err) => {
      assert_eq!(Err(err), after.map(|_| ()), "different errors before/after");
    }
  }
  Ok(())
}

#[cfg(test)]
mod test_utils {
  use super::*;
  use flowcolor::RegAllocError;
  use minifc::pipeline::{run_and_compare, PassResults};
  use minifc::test_framework::RunResult;

  pub fn run_case(
    func_name: &str, num_gpr: usize, num_fpu: usize, pass: Pass, opts: &Options,
  ) -> Result<(PassResults, RunResult, RunResult), String> {
    let _ = pretty_env_logger::try_init();
    let mut func = find_func(func_name).unwrap();
    let reg_universe = make_universe(num_gpr, num_fpu);
    run_and_compare(&mut func, &reg_universe, pass, opts)
  }

  pub fn check(
    func_name: &str, num_gpr: usize, num_fpu: usize, pass: Pass, opts: &Options,
  ) -> (PassResults, RunResult, RunResult) {
    match run_case(func_name, num_gpr, num_fpu, pass, opts) {
      Ok(res) => res,
      Err(err) => panic!("{} with {}/{} regs: {}", func_name, num_gpr, num_fpu, err),
    }
  }

  pub fn check_dce(func_name: &str) -> (PassResults, RunResult, RunResult) {
    check(func_name, 8, 8, Pass::Dce, &Options::default())
  }

  pub fn check_alloc(func_name: &str, num_gpr: usize, num_fpu: usize) {
    let checked = Options { run_checker: true, ..Options::default() };
    check(func_name, num_gpr, num_fpu, Pass::Regalloc, &checked);
    let plain = Options {
      run_checker: true,
      coalescing: false,
      biased_coloring: false,
    };
    check(func_name, num_gpr, num_fpu, Pass::Regalloc, &plain);
  }

  pub fn check_both(func_name: &str, num_gpr: usize, num_fpu: usize) {
    let opts = Options { run_checker: true, ..Options::default() };
    check(func_name, num_gpr, num_fpu, Pass::Both, &opts);
  }

  pub fn count_insns(
    func_name: &str, pred: impl Fn(&minifc::test_framework::Inst) -> bool,
  ) -> (usize, usize) {
    let _ = pretty_env_logger::try_init();
    let count = |func: &minifc::test_framework::Func| {
      func
        .blocks
        .iter()
        .map(|b| b.insns.iter().filter(|insn| pred(*insn)).count())
        .sum::<usize>()
    };
    let mut func = find_func(func_name).unwrap();
    let reg_universe = make_universe(8, 8);
    prepare(&mut func, &reg_universe).unwrap();
    let before = count(&func);
    run_passes(&mut func, &reg_universe, Pass::Dce, &Options::default())
      .unwrap();
    (before, count(&func))
  }

  pub fn alloc_error(
    func_name: &str, num_gpr: usize, num_fpu: usize,
  ) -> RegAllocError {
    let _ = pretty_env_logger::try_init();
    let mut func = find_func(func_name).unwrap();
    let reg_universe = make_universe(num_gpr, num_fpu);
    prepare(&mut func, &reg_universe).unwrap();
    flowcolor::allocate_registers(&mut func, &reg_universe, &Options::default())
      .unwrap_err()
  }
}

#[test]
fn dce_keeps_behaviour_everywhere() {
  for name in &[
    "fib",
    "nested_sums",
    "pressure",
    "copies",
    "calls",
    "volatile",
    "doubles",
    "fp",
    "bubble",
    "gcd",
    "mixed",
  ] {
    test_utils::check_dce(name);
  }
}

#[test]
fn dce_removes_dead_arithmetic() {
  let (results, before, after) = test_utils::check_dce("dead_code");
  let dce = results.dce.unwrap();
  assert!(dce.deleted > 0);
  assert!(after.num_steps < before.num_steps);
}

#[test]
fn dce_keeps_marks_and_calls() {
  use minifc::test_framework::Inst;
  let (before, after) = test_utils::count_insns("dead_around_effects", |insn| {
    matches!(insn, Inst::Mark { .. } | Inst::Call { .. })
  });
  assert!(before > 0);
  assert_eq!(before, after);
  test_utils::check_dce("dead_around_effects");
}

#[test]
fn regalloc_fib() {
  for num_gpr in 3..6 {
    test_utils::check_alloc("fib", num_gpr, 0);
  }
}

#[test]
fn regalloc_nested_sums() {
  test_utils::check_alloc("nested_sums", 4, 0);
  test_utils::check_alloc("nested_sums", 8, 0);
}

#[test]
fn regalloc_pressure() {
  for num_gpr in 3..9 {
    test_utils::check_alloc("pressure", num_gpr, 0);
  }
}

#[test]
fn regalloc_pressure_spills_when_short() {
  let opts = Options::default();
  let (results, _, after) =
    test_utils::check("pressure", 3, 0, Pass::Regalloc, &opts);
  let ra = results.regalloc.unwrap();
  assert!(ra.num_spill_slots > 0);
  assert!(after.num_reloads > 0);
}

#[test]
fn regalloc_copies() {
  test_utils::check_alloc("copies", 4, 0);
  // Deleted moves make the allocated code shorter than the original.
  for num_gpr in &[2, 3, 4, 6, 8] {
    let opts = Options { run_checker: true, ..Options::default() };
    let (results, before, after) =
      test_utils::check("copies", *num_gpr, 0, Pass::Regalloc, &opts);
    let moves = results.regalloc.unwrap().coalesced_moves as usize;
    assert!(moves > 0);
    assert!(
      after.num_steps - after.num_spills - after.num_reloads
        <= before.num_steps - moves
    );
  }
}

#[test]
fn regalloc_calls() {
  for num_gpr in 4..9 {
    test_utils::check_alloc("calls", num_gpr, 0);
  }
}

#[test]
fn regalloc_volatile() {
  let (_, _, after) = test_utils::check(
    "volatile",
    8,
    0,
    Pass::Regalloc,
    &Options::default(),
  );
  assert!(after.num_spills > 0);
  test_utils::check_alloc("volatile", 4, 0);
}

#[test]
fn regalloc_doubles() {
  test_utils::check_alloc("doubles", 4, 8);
  test_utils::check_alloc("doubles", 4, 6);
}

#[test]
fn regalloc_fp() {
  test_utils::check_alloc("fp", 4, 4);
  test_utils::check_alloc("fp", 4, 8);
}

#[test]
fn regalloc_bubble() {
  test_utils::check_alloc("bubble", 4, 0);
  test_utils::check_alloc("bubble", 8, 0);
}

#[test]
fn regalloc_parsed_files() {
  test_utils::check_alloc("gcd", 4, 0);
  test_utils::check_alloc("mixed", 4, 4);
  test_utils::check_alloc("mixed", 8, 8);
}

#[test]
fn regalloc_reports_missing_classes() {
  use flowcolor::{RegAllocError, RegClass};
  match test_utils::alloc_error("fp", 4, 0) {
    RegAllocError::UnsatisfiableClass(RegClass::F32)
    | RegAllocError::UnsatisfiableClass(RegClass::F64) => {}
    err => panic!("unexpected error {}", err),
  }
}

#[test]
fn both_passes() {
  for name in &[
    "fib",
    "nested_sums",
    "copies",
    "calls",
    "volatile",
    "bubble",
    "dead_code",
    "dead_around_effects",
    "gcd",
  ] {
    test_utils::check_both(name, 4, 0);
  }
  for name in &["doubles", "fp", "mixed"] {
    test_utils::check_both(name, 4, 8);
  }
}

#[test]
fn driver_reports_failures() {
  let opts = Options::default();
  assert!(run("no_such_test", 4, 4, Pass::Both, &opts).is_err());
  let err = run("fp", 4, 0, Pass::Regalloc, &opts).unwrap_err();
  assert!(err.contains("allocation failed"), "{}", err);
  assert_eq!(run("gcd", 4, 0, Pass::Both, &opts), Ok(()));
}

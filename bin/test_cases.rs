/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

// Test cases.  The list of them is right at the bottom, function |find_func|.
// Add new ones there.
use flowcolor::{Reg, RegClass};

use crate::parser;
use crate::test_framework::*;

use std::path::{Path, PathBuf};

/// Iterative Fibonacci, written block by block.  The two copies in the loop
/// body are coalescing candidates.
fn test_fib() -> Func {
  let mut func = Func::new("fib");
  func.set_entry("start");

  let n = func.new_virtual_reg(RegClass::I32);
  let a = func.new_virtual_reg(RegClass::I32);
  let b = func.new_virtual_reg(RegClass::I32);
  let t = func.new_virtual_reg(RegClass::I32);
  let c = func.new_virtual_reg(RegClass::I32);

  func.block(
    "start",
    vec![i_imm(n, 12), i_imm(a, 0), i_imm(b, 1), i_goto("loop")],
  );
  func.block(
    "loop",
    vec![i_cmp_eq(c, n, RI_I(0)), i_goto_ctf(c, "done", "body")],
  );
  func.block(
    "body",
    vec![
      i_print_i(a),
      i_print_s(" "),
      i_add(t, a, RI_R(b)),
      i_copy(a, b),
      i_copy(b, t),
      i_subm(n, RI_I(1)),
      i_goto("loop"),
    ],
  );
  func.block("done", vec![i_print_s("\n"), i_finish(Some(a))]);

  func.finish();
  func
}

/// Two nested counting loops accumulating products.
fn test_nested_sums() -> Func {
  let mut bif = Blockifier::new("nested_sums");
  let v_i = bif.new_virtual_reg(RegClass::I32);
  let v_j = bif.new_virtual_reg(RegClass::I32);
  let v_sum = bif.new_virtual_reg(RegClass::I32);
  let v_tmp = bif.new_virtual_reg(RegClass::I32);
  let stmts = vec![
    s_imm(v_sum, 0),
    s_imm(v_i, 0),
    s_repeat_until(
      vec![
        s_imm(v_j, 0),
        s_repeat_until(
          vec![
            s_mul(v_tmp, v_i, RI_R(v_j)),
            s_add(v_sum, v_sum, RI_R(v_tmp)),
            s_add(v_j, v_j, RI_I(1)),
            s_cmp_gt(v_tmp, v_j, RI_I(5)),
          ],
          v_tmp,
        ),
        s_add(v_sum, v_sum, RI_R(v_i)),
        s_add(v_i, v_i, RI_I(1)),
        s_cmp_gt(v_tmp, v_i, RI_I(5)),
      ],
      v_tmp,
    ),
    s_print_s("Result is "),
    s_print_i(v_sum),
    s_print_s("\n"),
  ];
  bif.finish(stmts, Some(v_sum))
}

/// Ten values live at once, then summed.  Spills with few registers.
fn test_pressure() -> Func {
  let mut bif = Blockifier::new("pressure");
  let vals: Vec<Reg> =
    (0..10).map(|_| bif.new_virtual_reg(RegClass::I32)).collect();
  let sum = bif.new_virtual_reg(RegClass::I32);

  let mut stmts = vec![];
  for (k, v) in vals.iter().enumerate() {
    stmts.push(s_imm(*v, 3 * k as u32 + 1));
  }
  stmts.push(s_imm(sum, 0));
  for v in vals.iter().rev() {
    stmts.push(s_add(sum, sum, RI_R(*v)));
    stmts.push(s_print_i(sum));
    stmts.push(s_print_s(" "));
  }
  stmts.push(s_print_s("\n"));
  bif.finish(stmts, Some(sum))
}

/// A copy chain around a loop.  With coalescing on, all of a, b, c, d end
/// up in one register.
fn test_copies() -> Func {
  let mut bif = Blockifier::new("copies");
  let a = bif.new_virtual_reg(RegClass::I32);
  let b = bif.new_virtual_reg(RegClass::I32);
  let c = bif.new_virtual_reg(RegClass::I32);
  let d = bif.new_virtual_reg(RegClass::I32);
  let e = bif.new_virtual_reg(RegClass::I32);
  let i = bif.new_virtual_reg(RegClass::I32);
  let t = bif.new_virtual_reg(RegClass::I32);
  let stmts = vec![
    s_imm(a, 3),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_copy(b, a),
        s_add(c, b, RI_I(1)),
        s_copy(d, c),
        s_copy(a, d),
        s_addm(i, RI_I(1)),
        s_cmp_ge(t, i, RI_I(10)),
      ],
      t,
    ),
    s_copy(e, a),
    s_print_i(e),
    s_print_s("\n"),
  ];
  bif.finish(stmts, Some(e))
}

/// Values live across calls need registers the callee leaves alone, or
/// spilling.
fn test_calls() -> Func {
  let mut bif = Blockifier::new("calls");
  let x = bif.new_virtual_reg(RegClass::I32);
  let y = bif.new_virtual_reg(RegClass::I32);
  let z = bif.new_virtual_reg(RegClass::I32);
  let i = bif.new_virtual_reg(RegClass::I32);
  let c = bif.new_virtual_reg(RegClass::I32);
  let stmts = vec![
    s_imm(x, 7),
    s_imm(y, 11),
    s_imm(z, 0),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_call("work"),
        s_add(z, z, RI_R(x)),
        s_call("log"),
        s_add(z, z, RI_R(y)),
        s_addm(i, RI_I(1)),
        s_cmp_ge(c, i, RI_I(4)),
      ],
      c,
    ),
    s_print_i(z),
    s_print_s("\n"),
  ];
  bif.finish(stmts, Some(z))
}

/// A volatile accumulator lives in memory throughout.
fn test_volatile() -> Func {
  let mut bif = Blockifier::new("volatile");
  let counter = bif.new_volatile_reg(RegClass::I32);
  let i = bif.new_virtual_reg(RegClass::I32);
  let c = bif.new_virtual_reg(RegClass::I32);
  let stmts = vec![
    s_imm(counter, 0),
    s_imm(i, 10),
    s_cmp_gt(c, i, RI_I(0)),
    s_while_do(
      c,
      vec![
        s_addm(counter, RI_R(i)),
        s_subm(i, RI_I(1)),
        s_cmp_gt(c, i, RI_I(0)),
      ],
    ),
    s_print_i(counter),
    s_print_s("\n"),
  ];
  bif.finish(stmts, Some(counter))
}

/// Doubles and singles competing for the same float register file.
fn test_doubles() -> Func {
  let mut bif = Blockifier::new("doubles");
  let zero = bif.new_virtual_reg(RegClass::I32);
  let i = bif.new_virtual_reg(RegClass::I32);
  let c = bif.new_virtual_reg(RegClass::I32);
  let d0 = bif.new_virtual_reg(RegClass::F64);
  let d1 = bif.new_virtual_reg(RegClass::F64);
  let d2 = bif.new_virtual_reg(RegClass::F64);
  let s0 = bif.new_virtual_reg(RegClass::F32);
  let s1 = bif.new_virtual_reg(RegClass::F32);
  let stmts = vec![
    s_immf(d0, 1.5),
    s_immf(d1, 0.25),
    s_immf(s0, 2.0),
    s_immf(s1, 0.5),
    s_imm(zero, 0),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_fadd(d2, d0, d1),
        s_fmul(s0, s0, s1),
        s_fadd(d0, d2, d1),
        s_fsub(s1, s1, s0),
        s_addm(i, RI_I(1)),
        s_cmp_ge(c, i, RI_I(6)),
      ],
      c,
    ),
    s_storef(AM_RI(zero, 10), d0),
    s_loadf(d2, AM_RI(zero, 10)),
    s_print_f(d2),
    s_print_s(" "),
    s_print_f(s0),
    s_print_s(" "),
    s_print_f(s1),
    s_print_s("\n"),
  ];
  bif.finish(stmts, Some(d2))
}

/// Single-precision arithmetic through memory.
fn test_fp() -> Func {
  let mut bif = Blockifier::new("fp");
  let zz = bif.new_virtual_reg(RegClass::I32);
  let f0 = bif.new_virtual_reg(RegClass::F32);
  let f1 = bif.new_virtual_reg(RegClass::F32);
  let f2 = bif.new_virtual_reg(RegClass::F32);
  let stmts = vec![
    s_immf(f0, 0.125),
    s_immf(f1, 0.5),
    s_fadd(f0, f0, f1),
    s_fmul(f0, f0, f1),
    s_fsub(f0, f0, f1),
    s_fdiv(f0, f0, f1),
    s_imm(zz, 0),
    s_storef(AM_RI(zz, 0), f0),
    s_loadf(f2, AM_RI(zz, 0)),
    s_print_f(f2),
    s_print_s("\n"),
  ];
  bif.finish(stmts, Some(f2))
}

/// Fill memory with pseudo-random numbers, bubble sort them, print them.
fn test_bubble() -> Func {
  let mut bif = Blockifier::new("bubble");
  let zero = bif.new_virtual_reg(RegClass::I32);
  let seed = bif.new_virtual_reg(RegClass::I32);
  let i = bif.new_virtual_reg(RegClass::I32);
  let j = bif.new_virtual_reg(RegClass::I32);
  let t = bif.new_virtual_reg(RegClass::I32);
  let a = bif.new_virtual_reg(RegClass::I32);
  let b = bif.new_virtual_reg(RegClass::I32);
  let c = bif.new_virtual_reg(RegClass::I32);
  let stmts = vec![
    s_imm(zero, 0),
    s_imm(seed, 7),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_mul(seed, seed, RI_I(13)),
        s_add(seed, seed, RI_I(5)),
        s_mod(seed, seed, RI_I(101)),
        s_store(AM_RR(zero, i), seed),
        s_addm(i, RI_I(1)),
        s_cmp_ge(c, i, RI_I(12)),
      ],
      c,
    ),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_imm(j, 0),
        s_repeat_until(
          vec![
            s_load(a, AM_RR(zero, j)),
            s_add(t, j, RI_I(1)),
            s_load(b, AM_RR(zero, t)),
            s_cmp_gt(c, a, RI_R(b)),
            s_if_then(
              c,
              vec![s_store(AM_RR(zero, j), b), s_store(AM_RR(zero, t), a)],
            ),
            s_addm(j, RI_I(1)),
            s_cmp_ge(c, j, RI_I(11)),
          ],
          c,
        ),
        s_addm(i, RI_I(1)),
        s_cmp_ge(c, i, RI_I(11)),
      ],
      c,
    ),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_load(a, AM_RR(zero, i)),
        s_print_i(a),
        s_print_s(" "),
        s_addm(i, RI_I(1)),
        s_cmp_ge(c, i, RI_I(12)),
      ],
      c,
    ),
    s_print_s("\n"),
  ];
  bif.finish(stmts, None)
}

/// Mostly useless work: a loop and a diamond whose results nobody reads.
/// Dead code elimination should leave little more than the prints.
fn test_dead_code() -> Func {
  let mut bif = Blockifier::new("dead_code");
  let live = bif.new_virtual_reg(RegClass::I32);
  let dead1 = bif.new_virtual_reg(RegClass::I32);
  let dead2 = bif.new_virtual_reg(RegClass::I32);
  let junk = bif.new_virtual_reg(RegClass::I32);
  let i = bif.new_virtual_reg(RegClass::I32);
  let c = bif.new_virtual_reg(RegClass::I32);
  let stmts = vec![
    s_imm(live, 5),
    s_imm(dead1, 100),
    s_mul(dead2, dead1, RI_I(3)),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_add(dead2, dead2, RI_R(i)),
        s_addm(i, RI_I(1)),
        s_cmp_ge(c, i, RI_I(20)),
      ],
      c,
    ),
    s_if_then_else(live, vec![s_imm(junk, 1)], vec![s_imm(junk, 2)]),
    s_add(live, live, RI_I(1)),
    s_print_i(live),
    s_print_s("\n"),
  ];
  bif.finish(stmts, Some(live))
}

/// Dead arithmetic around markers and calls, which must all survive.
fn test_dead_around_effects() -> Func {
  let mut bif = Blockifier::new("dead_around_effects");
  let x = bif.new_virtual_reg(RegClass::I32);
  let y = bif.new_virtual_reg(RegClass::I32);
  let i = bif.new_virtual_reg(RegClass::I32);
  let c = bif.new_virtual_reg(RegClass::I32);
  let stmts = vec![
    s_mark("prologue"),
    s_imm(x, 1),
    s_imm(i, 0),
    s_repeat_until(
      vec![
        s_add(y, x, RI_R(i)),
        s_call("tick"),
        s_addm(i, RI_I(1)),
        s_cmp_ge(c, i, RI_I(3)),
      ],
      c,
    ),
    s_while_do(c, vec![s_imm(c, 0), s_mark("once")]),
    s_print_s("done\n"),
    s_mark("epilogue"),
  ];
  bif.finish(stmts, None)
}

// This is the list of available tests.  This function returns either the
// requested Func, or if not found, a list of the available ones.
pub fn find_func(name: &str) -> Result<Func, Vec<String>> {
  // This is really stupid.  Fortunately it's not performance critical :)
  let all_funcs = vec![
    test_fib(),
    test_nested_sums(),
    test_pressure(), // more live values than registers
    test_copies(),
    test_calls(),
    test_volatile(),
    test_doubles(), // F64 overlapping F32
    test_fp(),
    test_bubble(), // loads and stores
    test_dead_code(),
    test_dead_around_effects(),
  ];

  let mut all_names = Vec::new();
  for cand in &all_funcs {
    all_names.push(cand.name.clone());
  }

  for cand in all_funcs {
    if cand.name == *name {
      return Ok(cand);
    }
  }

  fn ends_in_tilde(path: &PathBuf) -> bool {
    path.to_str().map_or(false, |s| s.ends_with('~'))
  }

  let test_dir = Path::new("tests");
  match test_dir.read_dir() {
    Err(err) => {
      println!("can't read test directory: {}", err);
    }
    Ok(entries) => {
      for entry in entries.flatten() {
        let path = entry.path();
        // Skip editor backup files, which would otherwise shadow the real
        // ones.
        if ends_in_tilde(&path) {
          continue;
        }
        let basename = match path.file_stem().and_then(|s| s.to_str()) {
          Some(basename) => basename.to_string(),
          None => continue,
        };
        if basename == name {
          match parser::parse_file(path) {
            Ok(func) => return Ok(func),
            Err(err) => {
              println!("can't parse test file {}: {}", basename, err);
              break;
            }
          }
        } else {
          all_names.push(basename)
        }
      }
    }
  }

  all_names.sort();
  Err(all_names)
}

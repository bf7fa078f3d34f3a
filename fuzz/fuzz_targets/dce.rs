#![no_main]
use libfuzzer_sys::fuzz_target;

use flowcolor;
use minifc::{fuzzing, pipeline, test_framework as ir};

const STEP_LIMIT: usize = 10_000;

fuzz_target!(|func: ir::Func| {
    let mut func = func;
    let reg_universe = fuzzing::fuzzing_universe();

    if pipeline::prepare(&mut func, &reg_universe).is_err() {
        return;
    }

    let expected = match ir::run_func(
        &func,
        "Before dce",
        &reg_universe,
        ir::RunStage::BeforeRegalloc,
        STEP_LIMIT,
    ) {
        Ok(expected) => expected,
        Err(_) => return,
    };

    let result = flowcolor::eliminate_dead_code(&mut func, &reg_universe)
        .expect("dce on a tidied CFG can't fail");
    println!("dce: {} deleted, {} redirected", result.deleted, result.redirected);

    let observed = ir::run_func(
        &func,
        "After dce",
        &reg_universe,
        ir::RunStage::BeforeRegalloc,
        STEP_LIMIT,
    )
    .expect("dce'd code should run whenever the original did");

    let results = pipeline::PassResults { dce: Some(result), regalloc: None };
    pipeline::check_results(&expected, &observed, pipeline::Pass::Dce, &results);
});

#![no_main]
use libfuzzer_sys::fuzz_target;

use flowcolor;
use minifc::{fuzzing, pipeline, test_framework as ir};

// Fuzzed functions loop freely; give up on the ones that run for long.
const STEP_LIMIT: usize = 10_000;

fuzz_target!(|func: ir::Func| {
    let mut func = func;
    let reg_universe = fuzzing::fuzzing_universe();

    if let Err(err) = pipeline::prepare(&mut func, &reg_universe) {
        println!("invalid func: {}", err);
        return;
    }

    let expected = ir::run_func(
        &func,
        "Before allocation",
        &reg_universe,
        ir::RunStage::BeforeRegalloc,
        STEP_LIMIT,
    );

    let opts = flowcolor::Options {
        run_checker: true,
        ..Default::default()
    };
    let result = match flowcolor::allocate_registers(&mut func, &reg_universe, &opts) {
        Ok(result) => result,
        Err(err) => {
            if let flowcolor::RegAllocError::RegChecker(_) = &err {
                panic!("fuzz coloring: checker error: {}", err);
            }
            println!("allocation error: {}", err);
            return;
        }
    };
    println!("allocation result: {:?}", result);

    func.print("after allocation");

    let expected = match expected {
        Ok(expected) => expected,
        Err(_) => return,
    };
    let observed = ir::run_func(
        &func,
        "After allocation",
        &reg_universe,
        ir::RunStage::AfterRegalloc,
        ir::DEFAULT_STEP_LIMIT,
    )
    .expect("allocated code should run whenever the original did");

    let results = pipeline::PassResults { dce: None, regalloc: Some(result) };
    pipeline::check_results(&expected, &observed, pipeline::Pass::Regalloc, &results);
});

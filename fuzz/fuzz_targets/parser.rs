#![no_main]
use libfuzzer_sys::fuzz_target;

use minifc::{fuzzing, parser, validator};

// Whatever the input, the parser reports errors instead of panicking, and
// what it accepts is safe to validate.
fuzz_target!(|data: &[u8]| {
    let content = match std::str::from_utf8(data) {
        Ok(content) => content,
        Err(_) => return,
    };
    match parser::parse_content("funk", content) {
        Ok(func) => {
            let _ = validator::validate(&func, &fuzzing::fuzzing_universe());
        }
        Err(err) => println!("parse error: {}", err),
    }
});

#![no_main]

use arbitrary::Arbitrary;
use facebridge_rules::Expr;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    source: String,
    bindings: Vec<(String, f64)>,
}

fuzz_target!(|input: Input| {
    let Ok(expr) = Expr::parse(&input.source) else {
        return;
    };
    let lookup = |name: &str| {
        input
            .bindings
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| *v)
    };
    if let Ok(value) = expr.eval(lookup) {
        assert!(value.is_finite());
    }
});

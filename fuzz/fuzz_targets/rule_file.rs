#![no_main]

use facebridge_core::{TrackingFrame, Vec3};
use facebridge_rules::{evaluate, RuleSet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(rules) = RuleSet::parse(text) else {
        return;
    };

    let frame = TrackingFrame::new(0)
        .with_head_rotation(Vec3::new(10.0, -20.0, 5.0))
        .with_blend_shape("JawOpen", 0.5);
    let result = evaluate(&frame, &rules, 5);

    assert_eq!(result.outputs.len(), rules.len());
    for output in &result.outputs {
        let Some(rule) = rules.get(&output.id) else {
            panic!("output for unknown rule {}", output.id);
        };
        assert!(output.value >= rule.min && output.value <= rule.max);
    }
});

//! Rule and frame fixtures

use std::path::{Path, PathBuf};
use std::time::Duration;

use facebridge_client::{BackoffPolicy, DiscoveryMode};
use facebridge_core::{TrackingFrame, Vec3, BLEND_SHAPE_IDENTIFIERS};
use facebridge_runtime::{BridgeConfig, RecoveryConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Typical face rig rules, including one dependent rule and one eased rule
pub const SAMPLE_RULES: &str = r#"[
    {"name": "FaceAngleX", "func": "-HeadRotY", "min": -30, "max": 30, "defaultValue": 0},
    {"name": "FaceAngleY", "func": "HeadRotX", "min": -30, "max": 30, "defaultValue": 0},
    {"name": "FaceAngleZ", "func": "HeadRotZ", "min": -30, "max": 30, "defaultValue": 0},
    {"name": "BodyAngleX", "func": "FaceAngleX * 0.4", "min": -10, "max": 10, "defaultValue": 0},
    {"name": "EyeOpenLeft", "func": "clamp(1 - EyeBlinkLeft * 1.2, 0, 1)", "min": 0, "max": 1, "defaultValue": 1,
     "interpolation": {"type": "Bezier", "controlPoints": [0.42, 0.0, 0.58, 1.0]}},
    {"name": "EyeOpenRight", "func": "clamp(1 - EyeBlinkRight * 1.2, 0, 1)", "min": 0, "max": 1, "defaultValue": 1,
     "interpolation": {"type": "Bezier", "controlPoints": [0.42, 0.0, 0.58, 1.0]}},
    {"name": "MouthOpen", "func": "JawOpen", "min": 0, "max": 1, "defaultValue": 0},
    {"name": "MouthSmile", "func": "(MouthSmileLeft + MouthSmileRight) / 2", "min": 0, "max": 1, "defaultValue": 0},
    {"name": "BrowLift", "func": "max(BrowInnerUp, (BrowOuterUpLeft + BrowOuterUpRight) / 2)", "min": 0, "max": 1, "defaultValue": 0},
    {"name": "Blink", "func": "EyeOpenLeft < 0.2 && EyeOpenRight < 0.2 ? 1 : 0", "min": 0, "max": 1, "defaultValue": 0}
]"#;

/// Rule names in `SAMPLE_RULES`, declaration order
pub const SAMPLE_RULE_NAMES: &[&str] = &[
    "FaceAngleX",
    "FaceAngleY",
    "FaceAngleZ",
    "BodyAngleX",
    "EyeOpenLeft",
    "EyeOpenRight",
    "MouthOpen",
    "MouthSmile",
    "BrowLift",
    "Blink",
];

/// Write a rule file into `dir`
pub fn write_rules(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("rules.json");
    if let Err(e) = std::fs::write(&path, json) {
        tracing::warn!(error = %e, "cannot write fixture rules");
    }
    path
}

/// Deterministic head-turn sequence with blinks and random blend shapes
pub fn frame_sequence(seed: u64, count: usize) -> Vec<TrackingFrame> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let t = i as f64 / 60.0;
            let mut frame = TrackingFrame::new(i as u64 * 16)
                .with_face_found(rng.gen_bool(0.95))
                .with_head_rotation(Vec3::new(
                    20.0 * (t * 1.3).sin(),
                    45.0 * (t * 0.7).sin(),
                    10.0 * (t * 2.1).cos(),
                ))
                .with_head_position(Vec3::new(rng.gen_range(-0.1..0.1), 0.0, 0.5));
            for name in BLEND_SHAPE_IDENTIFIERS.iter().step_by(3) {
                frame = frame.with_blend_shape(*name, rng.gen_range(0.0..1.0));
            }
            let blink = if i % 40 < 3 { 1.0 } else { 0.05 };
            frame
                .with_blend_shape("EyeBlinkLeft", blink)
                .with_blend_shape("EyeBlinkRight", blink)
        })
        .collect()
}

/// Bridge configuration with short timings for loopback tests
pub fn fast_config(port: u16, dir: &Path) -> BridgeConfig {
    BridgeConfig {
        port,
        discovery: DiscoveryMode::Disabled,
        request_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(3),
        token_path: dir.join("token.txt"),
        rule_path: dir.join("rules.json"),
        watch_rules: false,
        backoff: BackoffPolicy::fixed(Duration::from_millis(50)),
        recovery: RecoveryConfig {
            interval: Duration::from_millis(20),
            engine_cooldown: Duration::from_millis(100),
            client_cooldown: Duration::from_millis(60),
        },
        ..BridgeConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use facebridge_rules::RuleSet;

    use super::*;

    #[test]
    fn test_sample_rules_all_valid() {
        let set = RuleSet::parse(SAMPLE_RULES).unwrap();
        assert!(set.rejected().is_empty(), "{:?}", set.rejected());
        let names: Vec<&str> = set.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, SAMPLE_RULE_NAMES);
    }

    #[test]
    fn test_frame_sequence_is_deterministic() {
        assert_eq!(frame_sequence(7, 20), frame_sequence(7, 20));
        assert_ne!(frame_sequence(7, 20), frame_sequence(8, 20));
    }

    #[test]
    fn test_fast_config_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        fast_config(8001, dir.path()).validate().unwrap();
    }
}

//! Tracking frames
//!
//! A frame is one discrete sample from the mobile tracker: head pose, eye
//! pose, a face-detected flag, and blend-shape intensities. Frames are
//! produced by the external receiver and never mutated afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{BridgeError, BridgeResult};

/// Pose identifiers every frame exposes to rule expressions.
pub const POSE_IDENTIFIERS: &[&str] = &[
    "HeadRotX",
    "HeadRotY",
    "HeadRotZ",
    "HeadPosX",
    "HeadPosY",
    "HeadPosZ",
    "EyeLeftX",
    "EyeLeftY",
    "EyeLeftZ",
    "EyeRightX",
    "EyeRightY",
    "EyeRightZ",
];

/// The 52 ARKit blend shapes reported by the iOS tracker.
pub const BLEND_SHAPE_IDENTIFIERS: &[&str] = &[
    "EyeBlinkLeft",
    "EyeLookDownLeft",
    "EyeLookInLeft",
    "EyeLookOutLeft",
    "EyeLookUpLeft",
    "EyeSquintLeft",
    "EyeWideLeft",
    "EyeBlinkRight",
    "EyeLookDownRight",
    "EyeLookInRight",
    "EyeLookOutRight",
    "EyeLookUpRight",
    "EyeSquintRight",
    "EyeWideRight",
    "JawForward",
    "JawLeft",
    "JawRight",
    "JawOpen",
    "MouthClose",
    "MouthFunnel",
    "MouthPucker",
    "MouthLeft",
    "MouthRight",
    "MouthSmileLeft",
    "MouthSmileRight",
    "MouthFrownLeft",
    "MouthFrownRight",
    "MouthDimpleLeft",
    "MouthDimpleRight",
    "MouthStretchLeft",
    "MouthStretchRight",
    "MouthRollLower",
    "MouthRollUpper",
    "MouthShrugLower",
    "MouthShrugUpper",
    "MouthPressLeft",
    "MouthPressRight",
    "MouthLowerDownLeft",
    "MouthLowerDownRight",
    "MouthUpperUpLeft",
    "MouthUpperUpRight",
    "BrowDownLeft",
    "BrowDownRight",
    "BrowInnerUp",
    "BrowOuterUpLeft",
    "BrowOuterUpRight",
    "CheekPuff",
    "CheekSquintLeft",
    "CheekSquintRight",
    "NoseSneerLeft",
    "NoseSneerRight",
    "TongueOut",
];

/// Returns true when `name` is an identifier a frame can supply.
pub fn is_frame_identifier(name: &str) -> bool {
    POSE_IDENTIFIERS.contains(&name) || BLEND_SHAPE_IDENTIFIERS.contains(&name)
}

/// Three-component vector as sent by the tracker
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vec3 { x, y, z }
    }
}

/// One tracking sample
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackingFrame {
    /// Tracker timestamp in milliseconds
    pub timestamp: u64,
    /// Whether the tracker currently sees a face
    pub face_found: bool,
    /// Head rotation in degrees
    pub head_rotation: Vec3,
    /// Head position
    pub head_position: Vec3,
    pub eye_left: Vec3,
    pub eye_right: Vec3,
    /// Blend-shape name -> intensity in [0, 1]
    pub blend_shapes: BTreeMap<String, f64>,
}

impl TrackingFrame {
    pub fn new(timestamp: u64) -> Self {
        TrackingFrame {
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_face_found(mut self, found: bool) -> Self {
        self.face_found = found;
        self
    }

    pub fn with_head_rotation(mut self, rotation: Vec3) -> Self {
        self.head_rotation = rotation;
        self
    }

    pub fn with_head_position(mut self, position: Vec3) -> Self {
        self.head_position = position;
        self
    }

    pub fn with_eyes(mut self, left: Vec3, right: Vec3) -> Self {
        self.eye_left = left;
        self.eye_right = right;
        self
    }

    /// Add a blend shape; intensity is clamped into [0, 1]
    pub fn with_blend_shape(mut self, name: impl Into<String>, value: f64) -> Self {
        self.blend_shapes.insert(name.into(), value.clamp(0.0, 1.0));
        self
    }

    /// Parse the tracker's JSON payload
    pub fn from_json(input: &str) -> BridgeResult<Self> {
        let raw: RawFrame =
            serde_json::from_str(input).map_err(|e| BridgeError::InvalidFrame(e.to_string()))?;
        Ok(raw.into())
    }

    /// Serialize to the tracker's JSON payload
    pub fn to_json(&self) -> String {
        serde_json::to_string(&RawFrame::from(self)).unwrap_or_default()
    }

    /// Value of a frame identifier, if this frame supplies it.
    ///
    /// Known blend shapes that are absent from the frame read as 0.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        let pose = match name {
            "HeadRotX" => Some(self.head_rotation.x),
            "HeadRotY" => Some(self.head_rotation.y),
            "HeadRotZ" => Some(self.head_rotation.z),
            "HeadPosX" => Some(self.head_position.x),
            "HeadPosY" => Some(self.head_position.y),
            "HeadPosZ" => Some(self.head_position.z),
            "EyeLeftX" => Some(self.eye_left.x),
            "EyeLeftY" => Some(self.eye_left.y),
            "EyeLeftZ" => Some(self.eye_left.z),
            "EyeRightX" => Some(self.eye_right.x),
            "EyeRightY" => Some(self.eye_right.y),
            "EyeRightZ" => Some(self.eye_right.z),
            _ => None,
        };
        if pose.is_some() {
            return pose;
        }
        if let Some(v) = self.blend_shapes.get(name) {
            return Some(*v);
        }
        BLEND_SHAPE_IDENTIFIERS.contains(&name).then_some(0.0)
    }

    /// Every identifier this frame can bind, with its value.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let fixed = POSE_IDENTIFIERS
            .iter()
            .chain(BLEND_SHAPE_IDENTIFIERS.iter())
            .map(move |name| (*name, self.value_of(name).unwrap_or(0.0)));
        let extra = self
            .blend_shapes
            .iter()
            .filter(|(k, _)| !is_frame_identifier(k))
            .map(|(k, v)| (k.as_str(), *v));
        fixed.chain(extra)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFrame {
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    face_found: bool,
    #[serde(default)]
    rotation: Vec3,
    #[serde(default)]
    position: Vec3,
    #[serde(default)]
    eye_left: Vec3,
    #[serde(default)]
    eye_right: Vec3,
    #[serde(default)]
    blend_shapes: Vec<RawBlendShape>,
}

#[derive(Serialize, Deserialize)]
struct RawBlendShape {
    k: String,
    v: f64,
}

impl From<RawFrame> for TrackingFrame {
    fn from(raw: RawFrame) -> Self {
        TrackingFrame {
            timestamp: raw.timestamp,
            face_found: raw.face_found,
            head_rotation: raw.rotation,
            head_position: raw.position,
            eye_left: raw.eye_left,
            eye_right: raw.eye_right,
            blend_shapes: raw
                .blend_shapes
                .into_iter()
                .filter(|b| b.v.is_finite())
                .map(|b| (b.k, b.v.clamp(0.0, 1.0)))
                .collect(),
        }
    }
}

impl From<&TrackingFrame> for RawFrame {
    fn from(frame: &TrackingFrame) -> Self {
        RawFrame {
            timestamp: frame.timestamp,
            face_found: frame.face_found,
            rotation: frame.head_rotation,
            position: frame.head_position,
            eye_left: frame.eye_left,
            eye_right: frame.eye_right,
            blend_shapes: frame
                .blend_shapes
                .iter()
                .map(|(k, v)| RawBlendShape { k: k.clone(), v: *v })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_tables() {
        assert_eq!(POSE_IDENTIFIERS.len(), 12);
        assert_eq!(BLEND_SHAPE_IDENTIFIERS.len(), 52);
        assert!(is_frame_identifier("HeadRotX"));
        assert!(is_frame_identifier("JawOpen"));
        assert!(!is_frame_identifier("Smile"));
    }

    #[test]
    fn test_value_of_pose_and_blend_shapes() {
        let frame = TrackingFrame::new(1)
            .with_head_rotation(Vec3::new(5.0, -3.0, 1.5))
            .with_blend_shape("JawOpen", 0.4);

        assert_eq!(frame.value_of("HeadRotX"), Some(5.0));
        assert_eq!(frame.value_of("HeadRotY"), Some(-3.0));
        assert_eq!(frame.value_of("JawOpen"), Some(0.4));
        // Known but absent blend shape reads as zero
        assert_eq!(frame.value_of("TongueOut"), Some(0.0));
        assert_eq!(frame.value_of("NotAField"), None);
    }

    #[test]
    fn test_blend_shape_clamped() {
        let frame = TrackingFrame::new(0).with_blend_shape("CheekPuff", 1.7);
        assert_eq!(frame.value_of("CheekPuff"), Some(1.0));
    }

    #[test]
    fn test_parse_tracker_json() {
        let json = r#"{
            "Timestamp": 1700000000,
            "Hotkey": -1,
            "FaceFound": true,
            "Rotation": {"x": 10.0, "y": -2.5, "z": 0.0},
            "Position": {"x": 0.1, "y": 0.2, "z": 0.3},
            "EyeLeft": {"x": 1.0, "y": 2.0, "z": 3.0},
            "EyeRight": {"x": 4.0, "y": 5.0, "z": 6.0},
            "BlendShapes": [{"k": "EyeBlinkLeft", "v": 0.25}, {"k": "JawOpen", "v": 0.5}]
        }"#;

        let frame = TrackingFrame::from_json(json).unwrap();
        assert!(frame.face_found);
        assert_eq!(frame.timestamp, 1_700_000_000);
        assert_eq!(frame.value_of("HeadRotX"), Some(10.0));
        assert_eq!(frame.value_of("EyeRightZ"), Some(6.0));
        assert_eq!(frame.value_of("EyeBlinkLeft"), Some(0.25));

        let again = TrackingFrame::from_json(&frame.to_json()).unwrap();
        assert_eq!(again, frame);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = TrackingFrame::from_json("not json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn test_bindings_cover_all_fixed_identifiers() {
        let frame = TrackingFrame::new(0).with_blend_shape("CustomShape", 0.3);
        let names: Vec<&str> = frame.bindings().map(|(k, _)| k).collect();
        assert_eq!(names.len(), 12 + 52 + 1);
        assert!(names.contains(&"CustomShape"));
    }
}

//! Serde adapter for `Duration` as whole milliseconds
//!
//! Use with `#[serde(with = "facebridge_core::duration_ms")]`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "crate::duration_ms")]
        wait: Duration,
    }

    #[test]
    fn test_millis_roundtrip() {
        let json = serde_json::to_string(&Holder { wait: Duration::from_millis(1500) }).unwrap();
        assert_eq!(json, r#"{"wait":1500}"#);
        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.wait, Duration::from_millis(1500));
    }
}

//! Output parameters produced by the transformation engine

use serde::{Deserialize, Serialize};

/// One evaluated parameter for the current frame.
///
/// `id` is the unprefixed internal name; any wire prefix is applied by the
/// protocol client when the parameter is sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputParameter {
    pub id: String,
    /// Post-clamp, post-interpolation value
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl OutputParameter {
    pub fn new(id: impl Into<String>, value: f64) -> Self {
        OutputParameter {
            id: id.into(),
            value,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight.clamp(0.0, 1.0));
        self
    }
}

/// Parameter declaration sent to the peer during synchronization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterDeclaration {
    pub id: String,
    pub min: f64,
    pub max: f64,
    pub default_value: f64,
}

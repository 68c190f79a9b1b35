//! Interpolation strategies applied after clamping
//!
//! The strategy is picked once when a rule is loaded. `interpolate` maps a
//! normalized input `t` in [0, 1] to a normalized output in [0, 1]; the
//! engine scales it back into the rule's bounds.

use serde::{Deserialize, Serialize};

use crate::RuleError;

/// Bisection steps used to invert the x-curve
const BISECTION_STEPS: usize = 32;
const BISECTION_EPSILON: f64 = 1e-9;

/// Interpolation strategy for one rule
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Interpolation {
    /// Identity mapping
    #[default]
    Linear,
    Bezier(BezierCurve),
}

impl Interpolation {
    /// Map normalized `t` to normalized output
    #[inline]
    pub fn interpolate(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Interpolation::Linear => t,
            Interpolation::Bezier(curve) => curve.ease(t),
        }
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Interpolation::Linear)
    }

    /// Build from the rule file's interpolation block
    pub fn from_spec(spec: &InterpolationSpec) -> Result<Self, RuleError> {
        match spec {
            InterpolationSpec::Linear => Ok(Interpolation::Linear),
            InterpolationSpec::Bezier { control_points } => {
                BezierCurve::from_flat(control_points).map(Interpolation::Bezier)
            }
        }
    }

    /// Inverse of `from_spec`
    pub fn to_spec(&self) -> InterpolationSpec {
        match self {
            Interpolation::Linear => InterpolationSpec::Linear,
            Interpolation::Bezier(curve) => InterpolationSpec::Bezier {
                control_points: curve.to_flat(),
            },
        }
    }
}

/// Serialized interpolation block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InterpolationSpec {
    Linear,
    Bezier {
        #[serde(rename = "controlPoints", default)]
        control_points: Vec<f64>,
    },
}

/// Bezier easing curve anchored at (0, 0) and (1, 1).
///
/// Control points use the compact `[x1, y1, x2, y2, ...]` form of CSS
/// `cubic-bezier()`. Two inner points make the usual cubic curve; more
/// raise the degree.
#[derive(Clone, Debug, PartialEq)]
pub struct BezierCurve {
    /// Full point list including both anchors
    points: Vec<(f64, f64)>,
}

impl BezierCurve {
    pub fn from_flat(flat: &[f64]) -> Result<Self, RuleError> {
        if flat.is_empty() {
            return Err(RuleError::Interpolation(
                "Bezier needs at least one control point".to_string(),
            ));
        }
        if flat.len() % 2 != 0 {
            return Err(RuleError::Interpolation(format!(
                "control point list has odd length {}",
                flat.len()
            )));
        }
        if flat.iter().any(|v| !v.is_finite()) {
            return Err(RuleError::Interpolation(
                "control points must be finite".to_string(),
            ));
        }

        let mut points = Vec::with_capacity(flat.len() / 2 + 2);
        points.push((0.0, 0.0));
        for pair in flat.chunks_exact(2) {
            let (x, y) = (pair[0], pair[1]);
            if !(0.0..=1.0).contains(&x) {
                return Err(RuleError::Interpolation(format!(
                    "control point x {} outside [0, 1]",
                    x
                )));
            }
            points.push((x, y));
        }
        points.push((1.0, 1.0));

        Ok(BezierCurve { points })
    }

    /// Inner control points in flat form
    pub fn to_flat(&self) -> Vec<f64> {
        self.points[1..self.points.len() - 1]
            .iter()
            .flat_map(|(x, y)| [*x, *y])
            .collect()
    }

    /// Evaluate the curve at parameter `u` by De Casteljau subdivision
    pub fn point_at(&self, u: f64) -> (f64, f64) {
        de_casteljau(&self.points, u)
    }

    /// Eased output for input `t`: find `u` with x(u) = t, return y(u)
    pub fn ease(&self, t: f64) -> f64 {
        if self.is_identity() {
            return t;
        }

        let mut lo = 0.0;
        let mut hi = 1.0;
        let mut u = t;
        for _ in 0..BISECTION_STEPS {
            let (x, _) = self.point_at(u);
            if (x - t).abs() < BISECTION_EPSILON {
                break;
            }
            if x < t {
                lo = u;
            } else {
                hi = u;
            }
            u = 0.5 * (lo + hi);
        }
        self.point_at(u).1
    }

    /// Control points lying on the diagonal produce a straight line
    fn is_identity(&self) -> bool {
        self.points.iter().all(|(x, y)| x == y)
    }
}

/// De Casteljau evaluation of a Bezier curve of any degree
pub fn de_casteljau(points: &[(f64, f64)], u: f64) -> (f64, f64) {
    match points.len() {
        0 => (0.0, 0.0),
        1 => points[0],
        _ => {
            let mut work = points.to_vec();
            let n = work.len();
            for level in 1..n {
                for i in 0..n - level {
                    work[i].0 += (work[i + 1].0 - work[i].0) * u;
                    work[i].1 += (work[i + 1].1 - work[i].1) * u;
                }
            }
            work[0]
        }
    }
}

//! Rule definitions, validation and rule sets
//!
//! The rule file is a JSON array of
//! `{name, func, min, max, defaultValue, interpolation?}` objects. Each entry
//! is validated on its own; a broken entry is reported and skipped, never
//! fatal for the rest of the file.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use facebridge_core::{is_frame_identifier, ParameterDeclaration};
use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::{Interpolation, InterpolationSpec, RuleError};

/// One entry of the rule file, as serialized
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub name: String,
    pub func: String,
    pub min: f64,
    pub max: f64,
    pub default_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpolation: Option<InterpolationSpec>,
}

/// A validated rule, expression parsed and interpolation selected
#[derive(Clone, Debug, PartialEq)]
pub struct RuleDefinition {
    pub name: String,
    pub expression: Expr,
    pub min: f64,
    pub max: f64,
    pub default_value: f64,
    pub interpolation: Interpolation,
}

impl RuleDefinition {
    /// Validate everything that can be checked without the other rules
    pub fn from_spec(spec: &RuleSpec) -> Result<Self, RuleError> {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(RuleError::EmptyName);
        }
        if !is_valid_name(name) {
            return Err(RuleError::InvalidName(name.to_string()));
        }
        if is_frame_identifier(name) {
            return Err(RuleError::ShadowsFrameField(name.to_string()));
        }
        if !spec.min.is_finite() || !spec.max.is_finite() {
            return Err(RuleError::NonFiniteBounds);
        }
        if spec.min > spec.max {
            return Err(RuleError::InvertedBounds {
                min: spec.min,
                max: spec.max,
            });
        }
        if !spec.default_value.is_finite() {
            return Err(RuleError::NonFiniteDefault);
        }

        let expression = Expr::parse(&spec.func)?;
        let interpolation = match &spec.interpolation {
            Some(i) => Interpolation::from_spec(i)?,
            None => Interpolation::Linear,
        };

        Ok(RuleDefinition {
            name: name.to_string(),
            expression,
            min: spec.min,
            max: spec.max,
            default_value: spec.default_value,
            interpolation,
        })
    }

    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            name: self.name.clone(),
            func: self.expression.source().to_string(),
            min: self.min,
            max: self.max,
            default_value: self.default_value,
            interpolation: (!self.interpolation.is_linear()).then(|| self.interpolation.to_spec()),
        }
    }

    /// Clamp into bounds, then apply the interpolation strategy
    pub fn shape(&self, raw: f64) -> f64 {
        let clamped = raw.clamp(self.min, self.max);
        let span = self.max - self.min;
        if self.interpolation.is_linear() || span <= 0.0 {
            return clamped;
        }
        let t = (clamped - self.min) / span;
        (self.min + self.interpolation.interpolate(t) * span).clamp(self.min, self.max)
    }

    pub fn declaration(&self) -> ParameterDeclaration {
        ParameterDeclaration {
            id: self.name.clone(),
            min: self.min,
            max: self.max,
            default_value: self.default_value,
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// A definition that failed validation
#[derive(Clone, Debug, PartialEq)]
pub struct RejectedRule {
    /// Name if one could be read, otherwise `#<index>`
    pub name: String,
    pub reason: RuleError,
}

/// Outcome tag of a load attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleSetStatus {
    /// Freshly loaded with at least one valid rule
    Loaded,
    /// File parsed but no definition was valid and nothing was cached
    NoValidRules,
    /// Load failed; serving the last known good rules
    ConfigErrorCached,
    /// Load failed and nothing was cached
    ConfigMissing,
}

impl RuleSetStatus {
    /// Whether the engine can produce meaningful output under this status
    pub fn is_serving(self) -> bool {
        matches!(self, RuleSetStatus::Loaded | RuleSetStatus::ConfigErrorCached)
    }
}

/// An immutable, ordered collection of validated rules
#[derive(Clone, Debug)]
pub struct RuleSet {
    rules: Arc<[RuleDefinition]>,
    rejected: Vec<RejectedRule>,
    status: RuleSetStatus,
    /// Human readable reason for a non-`Loaded` status
    error: Option<String>,
    source: Option<PathBuf>,
    generation: u64,
}

impl RuleSet {
    pub fn empty(status: RuleSetStatus) -> Self {
        RuleSet {
            rules: Arc::from(Vec::new()),
            rejected: Vec::new(),
            status,
            error: None,
            source: None,
            generation: 0,
        }
    }

    /// Parse and validate a rule file's contents.
    ///
    /// Only fails when the text is not a JSON array at all; individual bad
    /// entries end up in `rejected`.
    pub fn parse(json: &str) -> Result<RuleSet, String> {
        let entries: Vec<serde_json::Value> =
            serde_json::from_str(json).map_err(|e| e.to_string())?;

        let mut candidates: Vec<RuleDefinition> = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();
        let mut seen = HashSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let label = entry
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|n| !n.trim().is_empty())
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| format!("#{}", index));

            let spec: RuleSpec = match serde_json::from_value(entry) {
                Ok(spec) => spec,
                Err(e) => {
                    rejected.push(RejectedRule {
                        name: label,
                        reason: RuleError::Malformed(e.to_string()),
                    });
                    continue;
                }
            };

            match RuleDefinition::from_spec(&spec) {
                Ok(def) => {
                    if !seen.insert(def.name.clone()) {
                        rejected.push(RejectedRule {
                            name: label,
                            reason: RuleError::DuplicateName(def.name),
                        });
                        continue;
                    }
                    candidates.push(def);
                }
                Err(reason) => rejected.push(RejectedRule {
                    name: label,
                    reason,
                }),
            }
        }

        let rules = prune_references(candidates, &mut rejected);

        let status = if rules.is_empty() {
            RuleSetStatus::NoValidRules
        } else {
            RuleSetStatus::Loaded
        };

        Ok(RuleSet {
            rules: Arc::from(rules),
            rejected,
            status,
            error: None,
            source: None,
            generation: 0,
        })
    }

    /// Serialize the valid rules back to the rule file format
    pub fn to_json(&self) -> String {
        let specs: Vec<RuleSpec> = self.rules.iter().map(RuleDefinition::to_spec).collect();
        serde_json::to_string_pretty(&specs).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn rules(&self) -> &[RuleDefinition] {
        &self.rules
    }

    pub fn rejected(&self) -> &[RejectedRule] {
        &self.rejected
    }

    pub fn status(&self) -> RuleSetStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn source(&self) -> Option<&std::path::Path> {
        self.source.as_deref()
    }

    /// Monotonic counter assigned by the repository on publish
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RuleDefinition> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Parameter declarations in rule order
    pub fn declarations(&self) -> Vec<ParameterDeclaration> {
        self.rules.iter().map(RuleDefinition::declaration).collect()
    }

    pub(crate) fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }

    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Same rules under a different status; the rule storage is shared
    pub(crate) fn retag(&self, status: RuleSetStatus, error: impl Into<String>) -> Self {
        RuleSet {
            rules: Arc::clone(&self.rules),
            rejected: self.rejected.clone(),
            status,
            error: Some(error.into()),
            source: self.source.clone(),
            generation: self.generation,
        }
    }

    pub(crate) fn with_rejected(mut self, rejected: Vec<RejectedRule>) -> Self {
        self.rejected = rejected;
        self
    }
}

/// Drop rules that depend on rejected rules, repeating until stable so that
/// whole dependency chains go together.
///
/// Identifiers that are neither rule names nor known frame fields are taken
/// as custom blend shapes. They bind at runtime when a frame carries them;
/// otherwise the rule falls back to its default for that frame.
fn prune_references(
    mut candidates: Vec<RuleDefinition>,
    rejected: &mut Vec<RejectedRule>,
) -> Vec<RuleDefinition> {
    let mut removed: HashSet<String> = rejected
        .iter()
        .filter(|r| !r.name.starts_with('#'))
        .map(|r| r.name.clone())
        .collect();

    loop {
        let names: HashSet<&str> = candidates.iter().map(|r| r.name.as_str()).collect();

        let bad = candidates.iter().enumerate().find_map(|(i, rule)| {
            rule.expression
                .identifiers()
                .iter()
                .find(|ident| !names.contains(ident.as_str()) && removed.contains(*ident))
                .map(|ident| (i, RuleError::RejectedDependency(ident.clone())))
        });

        match bad {
            Some((i, reason)) => {
                let rule = candidates.remove(i);
                removed.insert(rule.name.clone());
                rejected.push(RejectedRule {
                    name: rule.name,
                    reason,
                });
            }
            None => break,
        }
    }

    for rule in &candidates {
        for ident in rule.expression.identifiers() {
            if !is_frame_identifier(ident) && !candidates.iter().any(|r| &r.name == ident) {
                tracing::debug!(rule = %rule.name, shape = %ident, "rule reads custom blend shape");
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"[
        {"name": "FaceAngleX", "func": "HeadRotY", "min": -30, "max": 30, "defaultValue": 0},
        {"name": "MouthOpen", "func": "JawOpen - MouthClose", "min": 0, "max": 1, "defaultValue": 0,
         "interpolation": {"type": "Bezier", "controlPoints": [0.42, 0.0, 0.58, 1.0]}},
        {"name": "Combined", "func": "FaceAngleX * 0.5", "min": -15, "max": 15, "defaultValue": 0,
         "interpolation": {"type": "Linear"}}
    ]"#;

    #[test]
    fn test_parse_valid_file() {
        let set = RuleSet::parse(GOOD).unwrap();
        assert_eq!(set.status(), RuleSetStatus::Loaded);
        assert_eq!(set.len(), 3);
        assert!(set.rejected().is_empty());
        assert_eq!(set.rules()[0].name, "FaceAngleX");
        assert!(set.get("MouthOpen").unwrap().interpolation != Interpolation::Linear);
    }

    #[test]
    fn test_invalid_entries_are_reported_not_fatal() {
        let json = r#"[
            {"name": "Good", "func": "HeadRotX", "min": -1, "max": 1, "defaultValue": 0},
            {"name": "Inverted", "func": "HeadRotX", "min": 5, "max": 1, "defaultValue": 0},
            {"name": "BadExpr", "func": "HeadRotX +", "min": 0, "max": 1, "defaultValue": 0},
            {"name": "", "func": "1", "min": 0, "max": 1, "defaultValue": 0},
            {"name": "Good", "func": "2", "min": 0, "max": 1, "defaultValue": 0},
            {"name": "HeadRotX", "func": "1", "min": 0, "max": 1, "defaultValue": 0},
            {"name": "NoBounds", "func": "1"},
            {"name": "BadCurve", "func": "1", "min": 0, "max": 1, "defaultValue": 0,
             "interpolation": {"type": "Bezier", "controlPoints": [0.1]}}
        ]"#;

        let set = RuleSet::parse(json).unwrap();
        assert_eq!(set.status(), RuleSetStatus::Loaded);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rejected().len(), 7);

        let reason = |name: &str| {
            set.rejected()
                .iter()
                .find(|r| r.name == name)
                .map(|r| r.reason.clone())
                .unwrap()
        };
        assert!(matches!(reason("Inverted"), RuleError::InvertedBounds { .. }));
        assert!(matches!(reason("BadExpr"), RuleError::Expression(_)));
        assert_eq!(reason("#3"), RuleError::EmptyName);
        assert_eq!(reason("HeadRotX"), RuleError::ShadowsFrameField("HeadRotX".into()));
        assert!(matches!(reason("NoBounds"), RuleError::Malformed(_)));
        assert!(matches!(reason("BadCurve"), RuleError::Interpolation(_)));
        assert!(set
            .rejected()
            .iter()
            .any(|r| r.reason == RuleError::DuplicateName("Good".into())));
    }

    #[test]
    fn test_dependency_on_rejected_rule_is_rejected() {
        let json = r#"[
            {"name": "Broken", "func": "1 +", "min": 0, "max": 1, "defaultValue": 0},
            {"name": "UsesBroken", "func": "Broken * 2", "min": 0, "max": 1, "defaultValue": 0},
            {"name": "UsesUser", "func": "UsesBroken", "min": 0, "max": 1, "defaultValue": 0}
        ]"#;
        let set = RuleSet::parse(json).unwrap();
        assert_eq!(set.status(), RuleSetStatus::NoValidRules);
        assert!(set.is_empty());
        assert!(set.rejected().iter().any(|r| r.name == "UsesBroken"
            && r.reason == RuleError::RejectedDependency("Broken".into())));
        assert!(set.rejected().iter().any(|r| r.name == "UsesUser"
            && r.reason == RuleError::RejectedDependency("UsesBroken".into())));
    }

    #[test]
    fn test_custom_blend_shape_accepted() {
        let json = r#"[
            {"name": "Custom", "func": "CustomShape * 2", "min": 0, "max": 1, "defaultValue": 0},
            {"name": "Follows", "func": "Custom / 2", "min": 0, "max": 1, "defaultValue": 0}
        ]"#;
        let set = RuleSet::parse(json).unwrap();
        assert_eq!(set.status(), RuleSetStatus::Loaded);
        assert_eq!(set.len(), 2);
        assert!(set.rejected().is_empty());
    }

    #[test]
    fn test_long_expression_rejected_not_fatal() {
        let chain = vec!["1"; 100_000].join("+");
        let json = serde_json::json!([
            {"name": "Huge", "func": chain, "min": 0, "max": 1, "defaultValue": 0},
            {"name": "Small", "func": "JawOpen", "min": 0, "max": 1, "defaultValue": 0}
        ])
        .to_string();

        let set = RuleSet::parse(&json).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.rules()[0].name, "Small");
        assert!(matches!(
            set.rejected()[0].reason,
            RuleError::Expression(crate::ExprError::TooLong(_))
        ));
    }

    #[test]
    fn test_not_an_array_fails() {
        assert!(RuleSet::parse("{\"name\": 1}").is_err());
        assert!(RuleSet::parse("not json").is_err());
    }

    #[test]
    fn test_roundtrip_through_json() {
        let set = RuleSet::parse(GOOD).unwrap();
        let again = RuleSet::parse(&set.to_json()).unwrap();

        assert_eq!(again.len(), set.len());
        for (a, b) in set.rules().iter().zip(again.rules()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.min, b.min);
            assert_eq!(a.max, b.max);
            assert_eq!(a.default_value, b.default_value);
            assert_eq!(a.expression.source(), b.expression.source());
            assert_eq!(a.interpolation, b.interpolation);
        }
    }

    #[test]
    fn test_shape_clamps_exactly() {
        let spec = RuleSpec {
            name: "Angle".into(),
            func: "HeadRotX".into(),
            min: -30.0,
            max: 30.0,
            default_value: 0.0,
            interpolation: None,
        };
        let rule = RuleDefinition::from_spec(&spec).unwrap();
        assert_eq!(rule.shape(45.0), 30.0);
        assert_eq!(rule.shape(-45.0), -30.0);
        assert_eq!(rule.shape(12.5), 12.5);
    }

    #[test]
    fn test_shape_applies_bezier_inside_bounds() {
        let spec = RuleSpec {
            name: "Eased".into(),
            func: "JawOpen".into(),
            min: 0.0,
            max: 10.0,
            default_value: 0.0,
            interpolation: Some(InterpolationSpec::Bezier {
                control_points: vec![0.42, 0.0, 0.58, 1.0],
            }),
        };
        let rule = RuleDefinition::from_spec(&spec).unwrap();
        assert!((rule.shape(5.0) - 5.0).abs() < 1e-6);
        assert!(rule.shape(1.0) < 1.0);
        assert!((rule.shape(20.0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_declarations_follow_rule_order() {
        let set = RuleSet::parse(GOOD).unwrap();
        let ids: Vec<String> = set.declarations().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["FaceAngleX", "MouthOpen", "Combined"]);
    }
}

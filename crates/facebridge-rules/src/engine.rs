//! Transformation engine - multi-pass rule evaluation
//!
//! Pass 1 evaluates every rule against frame bindings only. Each following
//! pass adds the values resolved by the previous pass and retries the rules
//! that hit an unresolved identifier. Iteration stops when everything is
//! resolved, when a pass resolves nothing new (fixed point: covers cycles and
//! false dependency chains alike), or at the pass cap.
//!
//! Rules left over fall back to their default and are reported as abandoned.
//! A single rule's failure never aborts the frame.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use facebridge_core::{ErrorKind, HealthSnapshot, HealthSource, OutputParameter, TrackingFrame};
use parking_lot::{Mutex, RwLock};

use crate::expr::EvalError;
use crate::{RuleRepository, RuleSet, RuleSetStatus};

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Upper bound on evaluation passes per frame
    pub max_passes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { max_passes: 5 }
    }
}

/// Why a rule was served from its default value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbandonReason {
    /// Still referenced an unresolved rule when iteration stopped
    UnresolvedDependency,
    /// Evaluated to NaN or infinity
    NonFiniteResult,
}

/// A rule that could not be evaluated this frame
#[derive(Clone, Debug, PartialEq)]
pub struct AbandonedRule {
    pub name: String,
    pub reason: AbandonReason,
    /// Identifier that blocked resolution, when known
    pub blocked_on: Option<String>,
}

/// Result of transforming one frame
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transformation {
    /// One entry per rule, in declaration order
    pub outputs: Vec<OutputParameter>,
    pub abandoned: Vec<AbandonedRule>,
    /// Passes actually run
    pub passes: usize,
}

/// Running counters
#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    pub frames: u64,
    pub abandoned_total: u64,
    pub last_passes: usize,
    pub last_abandoned: usize,
}

/// Multi-pass transformation engine
pub struct TransformationEngine {
    repository: Arc<RuleRepository>,
    rule_path: Option<PathBuf>,
    config: EngineConfig,
    stats: Mutex<EngineStats>,
    health: RwLock<HealthSnapshot>,
}

impl TransformationEngine {
    pub fn new(repository: Arc<RuleRepository>) -> Self {
        Self::with_config(repository, EngineConfig::default())
    }

    pub fn with_config(repository: Arc<RuleRepository>, config: EngineConfig) -> Self {
        let engine = TransformationEngine {
            repository,
            rule_path: None,
            config,
            stats: Mutex::new(EngineStats::default()),
            health: RwLock::new(HealthSnapshot::healthy()),
        };
        engine.refresh_health();
        engine
    }

    /// Rule file used by `reinitialize`
    pub fn with_rule_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rule_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<RuleRepository> {
        &self.repository
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.lock().clone()
    }

    /// Transform against the repository's current snapshot
    pub fn transform_current(&self, frame: &TrackingFrame) -> (Arc<RuleSet>, Transformation) {
        let rules = self.repository.current();
        let result = self.transform(frame, &rules);
        (rules, result)
    }

    /// Transform one frame against a rule set.
    ///
    /// Output depends only on `frame` and `rules`.
    pub fn transform(&self, frame: &TrackingFrame, rules: &RuleSet) -> Transformation {
        let result = evaluate(frame, rules, self.config.max_passes);

        {
            let mut stats = self.stats.lock();
            stats.frames += 1;
            stats.abandoned_total += result.abandoned.len() as u64;
            stats.last_passes = result.passes;
            stats.last_abandoned = result.abandoned.len();
        }
        if !result.abandoned.is_empty() {
            tracing::trace!(
                abandoned = result.abandoned.len(),
                passes = result.passes,
                "rules abandoned this frame"
            );
        }

        result
    }

    /// Reload the rule file and recompute health
    pub fn reinitialize(&self) -> HealthSnapshot {
        match &self.rule_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "reinitializing transformation engine");
                self.repository.load(path);
            }
            None => tracing::debug!("no rule path configured; health refresh only"),
        }
        self.refresh_health()
    }

    /// Recompute the health snapshot from the active rule set
    pub fn refresh_health(&self) -> HealthSnapshot {
        let rules = self.repository.current();
        let mut health = self.health.write();
        let next = match rules.status() {
            RuleSetStatus::Loaded => HealthSnapshot::healthy(),
            RuleSetStatus::ConfigErrorCached => {
                // Still serving; remember why the last load failed
                let mut snap = HealthSnapshot::healthy();
                snap.last_error_kind = Some(ErrorKind::ConfigIo);
                snap.last_error_message = rules.error().map(str::to_string);
                snap
            }
            RuleSetStatus::NoValidRules => HealthSnapshot::unhealthy(
                ErrorKind::Validation,
                rules.error().unwrap_or("no valid rules"),
            ),
            RuleSetStatus::ConfigMissing => HealthSnapshot::unhealthy(
                ErrorKind::ConfigIo,
                rules.error().unwrap_or("rule configuration missing"),
            ),
        };
        *health = next.clone();
        next
    }
}

impl HealthSource for TransformationEngine {
    fn component(&self) -> &'static str {
        "engine"
    }

    fn health(&self) -> HealthSnapshot {
        self.refresh_health()
    }
}

enum Outcome {
    Pending(Option<String>),
    Resolved(f64),
    Failed,
}

/// Pure multi-pass evaluation
pub fn evaluate(frame: &TrackingFrame, rules: &RuleSet, max_passes: usize) -> Transformation {
    let defs = rules.rules();
    let mut bindings: HashMap<&str, f64> = frame.bindings().collect();
    let mut outcomes: Vec<Outcome> = defs.iter().map(|_| Outcome::Pending(None)).collect();
    let mut pending: Vec<usize> = (0..defs.len()).collect();
    let mut passes = 0;

    while !pending.is_empty() && passes < max_passes {
        passes += 1;

        let mut resolved_now = Vec::new();
        let mut still_pending = Vec::with_capacity(pending.len());

        for idx in pending {
            let rule = &defs[idx];
            match rule.expression.eval(|name| bindings.get(name).copied()) {
                Ok(raw) => resolved_now.push((idx, rule.shape(raw))),
                Err(EvalError::Unresolved(name)) => {
                    outcomes[idx] = Outcome::Pending(Some(name));
                    still_pending.push(idx);
                }
                Err(EvalError::NonFinite) => outcomes[idx] = Outcome::Failed,
            }
        }

        pending = still_pending;
        if resolved_now.is_empty() {
            break;
        }

        // Values become visible to the next pass only
        for (idx, value) in resolved_now {
            bindings.insert(defs[idx].name.as_str(), value);
            outcomes[idx] = Outcome::Resolved(value);
        }
    }

    let mut outputs = Vec::with_capacity(defs.len());
    let mut abandoned = Vec::new();

    for (rule, outcome) in defs.iter().zip(outcomes) {
        let value = match outcome {
            Outcome::Resolved(v) => v,
            Outcome::Pending(blocked_on) => {
                abandoned.push(AbandonedRule {
                    name: rule.name.clone(),
                    reason: AbandonReason::UnresolvedDependency,
                    blocked_on,
                });
                rule.shape(rule.default_value)
            }
            Outcome::Failed => {
                abandoned.push(AbandonedRule {
                    name: rule.name.clone(),
                    reason: AbandonReason::NonFiniteResult,
                    blocked_on: None,
                });
                rule.shape(rule.default_value)
            }
        };
        outputs.push(OutputParameter::new(rule.name.clone(), value));
    }

    Transformation {
        outputs,
        abandoned,
        passes,
    }
}

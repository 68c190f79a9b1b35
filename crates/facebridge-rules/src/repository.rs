//! Rule repository - last-known-good cache with atomic publish
//!
//! Every load builds a complete `RuleSet` before it becomes visible. Readers
//! take an `Arc` snapshot through `current()` and keep evaluating against it
//! even if a reload publishes a new set mid-frame.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{RuleSet, RuleSetStatus};

/// Owner of the active rule set
pub struct RuleRepository {
    active: ArcSwap<RuleSet>,
    /// Last set that loaded with at least one valid rule. The lock also
    /// serializes concurrent loads.
    last_good: Mutex<Option<Arc<RuleSet>>>,
    generation: AtomicU64,
}

impl RuleRepository {
    /// Empty repository; nothing loaded yet
    pub fn new() -> Self {
        RuleRepository {
            active: ArcSwap::from_pointee(RuleSet::empty(RuleSetStatus::ConfigMissing)),
            last_good: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Snapshot of the active rule set
    #[inline]
    pub fn current(&self) -> Arc<RuleSet> {
        self.active.load_full()
    }

    /// Load the rule file at `path`.
    ///
    /// Never fails: problems are reported through the returned set's status.
    pub fn load(&self, path: &Path) -> Arc<RuleSet> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            format!("cannot read rule file {}: {}", path.display(), e)
        });
        self.apply(text, Some(path))
    }

    /// Reload after a change notification; same validation path as `load`
    pub fn reload(&self, path: &Path) -> Arc<RuleSet> {
        tracing::debug!(path = %path.display(), "reloading rules");
        self.load(path)
    }

    /// Load from in-memory JSON
    pub fn load_str(&self, json: &str) -> Arc<RuleSet> {
        self.apply(Ok(json.to_string()), None)
    }

    fn apply(&self, text: Result<String, String>, path: Option<&Path>) -> Arc<RuleSet> {
        let mut last_good = self.last_good.lock();

        let parsed = text.and_then(|t| {
            RuleSet::parse(&t).map_err(|e| match path {
                Some(p) => format!("cannot parse rule file {}: {}", p.display(), e),
                None => format!("cannot parse rules: {}", e),
            })
        });

        let next = match parsed {
            Ok(set) if set.status() == RuleSetStatus::Loaded => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                let mut set = set.with_generation(generation);
                if let Some(p) = path {
                    set = set.with_source(p.to_path_buf());
                }
                for rejected in set.rejected() {
                    tracing::warn!(rule = %rejected.name, reason = %rejected.reason, "rule rejected");
                }
                tracing::info!(
                    rules = set.len(),
                    rejected = set.rejected().len(),
                    generation,
                    "rules loaded"
                );
                let set = Arc::new(set);
                *last_good = Some(Arc::clone(&set));
                set
            }
            Ok(set) => {
                for rejected in set.rejected() {
                    tracing::warn!(rule = %rejected.name, reason = %rejected.reason, "rule rejected");
                }
                let message = format!(
                    "no valid rules ({} rejected)",
                    set.rejected().len()
                );
                match last_good.as_ref() {
                    Some(cached) => {
                        tracing::warn!(%message, "keeping last known good rules");
                        Arc::new(
                            cached
                                .retag(RuleSetStatus::ConfigErrorCached, message)
                                .with_rejected(set.rejected().to_vec()),
                        )
                    }
                    None => {
                        tracing::warn!(%message, "no rules available");
                        Arc::new(set.retag(RuleSetStatus::NoValidRules, message))
                    }
                }
            }
            Err(message) => match last_good.as_ref() {
                Some(cached) => {
                    tracing::warn!(%message, "keeping last known good rules");
                    Arc::new(cached.retag(RuleSetStatus::ConfigErrorCached, message))
                }
                None => {
                    tracing::error!(%message, "rule configuration missing");
                    Arc::new(RuleSet::empty(RuleSetStatus::ConfigMissing).retag(
                        RuleSetStatus::ConfigMissing,
                        message,
                    ))
                }
            },
        };

        self.active.store(Arc::clone(&next));
        next
    }
}

impl Default for RuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const RULES: &str = r#"[
        {"name": "FaceAngleX", "func": "HeadRotY", "min": -30, "max": 30, "defaultValue": 0},
        {"name": "EyeOpen", "func": "1 - EyeBlinkLeft", "min": 0, "max": 1, "defaultValue": 1}
    ]"#;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_initial_state_is_missing() {
        let repo = RuleRepository::new();
        assert_eq!(repo.current().status(), RuleSetStatus::ConfigMissing);
        assert!(repo.current().is_empty());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rules.json", RULES);

        let repo = RuleRepository::new();
        let set = repo.load(&path);
        assert_eq!(set.status(), RuleSetStatus::Loaded);
        assert_eq!(set.len(), 2);
        assert_eq!(set.generation(), 1);
        assert_eq!(set.source(), Some(path.as_path()));
        assert!(Arc::ptr_eq(&set, &repo.current()));
    }

    #[test]
    fn test_missing_file_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let repo = RuleRepository::new();
        let set = repo.load(&dir.path().join("absent.json"));
        assert_eq!(set.status(), RuleSetStatus::ConfigMissing);
        assert!(set.error().unwrap().contains("cannot read"));
    }

    #[test]
    fn test_missing_file_with_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rules.json", RULES);
        let repo = RuleRepository::new();
        repo.load(&path);

        std::fs::remove_file(&path).unwrap();
        let set = repo.reload(&path);
        assert_eq!(set.status(), RuleSetStatus::ConfigErrorCached);
        assert_eq!(set.len(), 2);
        assert_eq!(set.generation(), 1);
    }

    #[test]
    fn test_unparsable_reload_keeps_prior_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rules.json", RULES);
        let repo = RuleRepository::new();
        let first = repo.load(&path);

        write_file(&dir, "rules.json", "[{ this is not json");
        let second = repo.reload(&path);

        assert_eq!(second.status(), RuleSetStatus::ConfigErrorCached);
        assert_eq!(second.len(), first.len());
        for (a, b) in first.rules().iter().zip(second.rules()) {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_no_valid_rules_without_cache() {
        let repo = RuleRepository::new();
        let set = repo.load_str(r#"[{"name": "X", "func": "1 +", "min": 0, "max": 1, "defaultValue": 0}]"#);
        assert_eq!(set.status(), RuleSetStatus::NoValidRules);
        assert!(set.is_empty());
        assert_eq!(set.rejected().len(), 1);
    }

    #[test]
    fn test_no_valid_rules_with_cache_serves_cache() {
        let repo = RuleRepository::new();
        repo.load_str(RULES);
        let set = repo.load_str(r#"[{"name": "X", "func": "1 +", "min": 0, "max": 1, "defaultValue": 0}]"#);
        assert_eq!(set.status(), RuleSetStatus::ConfigErrorCached);
        assert_eq!(set.len(), 2);
        assert_eq!(set.rejected().len(), 1);
    }

    #[test]
    fn test_successful_reload_bumps_generation() {
        let repo = RuleRepository::new();
        assert_eq!(repo.load_str(RULES).generation(), 1);
        let next = repo.load_str(
            r#"[{"name": "Only", "func": "HeadRotZ", "min": -1, "max": 1, "defaultValue": 0}]"#,
        );
        assert_eq!(next.generation(), 2);
        assert_eq!(repo.current().len(), 1);
    }

    #[test]
    fn test_snapshot_survives_swap() {
        let repo = RuleRepository::new();
        repo.load_str(RULES);
        let held = repo.current();
        repo.load_str(r#"[{"name": "Only", "func": "1", "min": 0, "max": 1, "defaultValue": 0}]"#);

        // The old snapshot is untouched by the swap
        assert_eq!(held.len(), 2);
        assert_eq!(repo.current().len(), 1);
    }
}

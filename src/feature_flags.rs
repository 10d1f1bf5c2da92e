//! Feature flags with per-user rollout (§6, §9).
//!
//! `is_enabled` is pure and side-effect free: it never performs I/O and
//! never mutates state, only `FeatureFlags::load`/`save` touch the
//! filesystem. The table itself is read-mostly process-wide state (§5);
//! updates publish a fresh `im::HashMap`-style snapshot by replacing the
//! whole table under a lock rather than mutating entries in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::FeatureFlagConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RolloutStrategy {
    All,
    Percentage,
    Whitelist,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub enabled: bool,
    pub strategy: RolloutStrategy,
    pub rollout_percentage: u8,
    pub whitelist: Vec<String>,
}

impl From<FeatureFlagConfig> for FlagDefinition {
    fn from(c: FeatureFlagConfig) -> Self {
        let strategy = match c.strategy.to_uppercase().as_str() {
            "PERCENTAGE" => RolloutStrategy::Percentage,
            "WHITELIST" => RolloutStrategy::Whitelist,
            _ => RolloutStrategy::All,
        };
        Self { enabled: c.enabled, strategy, rollout_percentage: c.rollout_percentage, whitelist: c.whitelist }
    }
}

/// Pure decision: given a flag definition and a user id, is the flag on?
/// Percentage rollout is deterministic per user (stable hash bucket), not
/// randomized, so repeated calls with the same inputs agree.
pub fn is_enabled(flag: &FlagDefinition, user_id: Option<&str>) -> bool {
    if !flag.enabled {
        return false;
    }
    match flag.strategy {
        RolloutStrategy::All => true,
        RolloutStrategy::Whitelist => user_id.map(|u| flag.whitelist.iter().any(|w| w == u)).unwrap_or(false),
        RolloutStrategy::Percentage => {
            let Some(user_id) = user_id else { return false };
            let bucket = (bucket_hash(user_id) % 100) as u8;
            bucket < flag.rollout_percentage
        }
    }
}

fn bucket_hash(s: &str) -> u32 {
    // FNV-1a, deterministic across processes.
    let mut hash: u32 = 0x811c9dc5;
    for b in s.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

pub struct FeatureFlags {
    path: PathBuf,
    table: RwLock<HashMap<String, FlagDefinition>>,
}

impl FeatureFlags {
    pub fn new(path: impl AsRef<Path>, initial: HashMap<String, FlagDefinition>) -> Self {
        Self { path: path.as_ref().to_path_buf(), table: RwLock::new(initial) }
    }

    pub async fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| AppError::internal(e))?;
            serde_json::from_str(&raw).map_err(|e| AppError::internal(e))?
        } else {
            HashMap::new()
        };
        Ok(Self { path, table: RwLock::new(table) })
    }

    pub async fn is_enabled(&self, flag_name: &str, user_id: Option<&str>) -> bool {
        let table = self.table.read().await;
        match table.get(flag_name) {
            Some(def) => is_enabled(def, user_id),
            None => false,
        }
    }

    pub async fn set(&self, flag_name: impl Into<String>, def: FlagDefinition) -> AppResult<()> {
        {
            let mut table = self.table.write().await;
            table.insert(flag_name.into(), def);
        }
        self.persist().await
    }

    /// Atomic replace: write to a sibling temp file then rename, so a crash
    /// mid-write never leaves a half-written flags file (§6 persisted state
    /// layout).
    async fn persist(&self) -> AppResult<()> {
        let table = self.table.read().await;
        let json = serde_json::to_string_pretty(&*table).map_err(|e| AppError::internal(e))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| AppError::internal(e))?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(|e| AppError::internal(e))?;
        tokio::fs::rename(&tmp_path, &self.path).await.map_err(|e| AppError::internal(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(strategy: RolloutStrategy, pct: u8, whitelist: Vec<&str>) -> FlagDefinition {
        FlagDefinition {
            enabled: true,
            strategy,
            rollout_percentage: pct,
            whitelist: whitelist.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn disabled_flag_is_never_enabled() {
        let mut d = def(RolloutStrategy::All, 100, vec![]);
        d.enabled = false;
        assert!(!is_enabled(&d, Some("u1")));
    }

    #[test]
    fn all_strategy_enables_everyone() {
        let d = def(RolloutStrategy::All, 0, vec![]);
        assert!(is_enabled(&d, None));
        assert!(is_enabled(&d, Some("anyone")));
    }

    #[test]
    fn whitelist_strategy_checks_membership() {
        let d = def(RolloutStrategy::Whitelist, 0, vec!["alice"]);
        assert!(is_enabled(&d, Some("alice")));
        assert!(!is_enabled(&d, Some("bob")));
        assert!(!is_enabled(&d, None));
    }

    #[test]
    fn percentage_strategy_is_deterministic() {
        let d = def(RolloutStrategy::Percentage, 50, vec![]);
        let first = is_enabled(&d, Some("user-42"));
        let second = is_enabled(&d, Some("user-42"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn persist_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.json");
        let flags = FeatureFlags::new(&path, HashMap::new());
        flags.set("ensemble", def(RolloutStrategy::All, 0, vec![])).await.unwrap();

        let reloaded = FeatureFlags::load(&path).await.unwrap();
        assert!(reloaded.is_enabled("ensemble", None).await);
    }
}

//! `MemoryStore` contract (§6): `append`, `recent`, `search`, `consolidate`.
//!
//! `JsonlMemoryStore` is the reference implementation: an append-only JSONL
//! file under `memory.persist_dir` plus an in-memory index, grounded on the
//! teacher's file-backed `VectorMemory`/`EpisodicMemory` stores
//! (`src/memory/vector.rs`, `src/memory/episodic.rs`) minus the
//! vector-embedding machinery, which is out of this spec's scope (the core
//! only needs recency and a text filter, not semantic search).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub user_id: Option<String>,
    pub query_text: String,
    pub answer_text: String,
    pub strategy_used: String,
    /// The resolved routing `Strategy` tag (`"conservative"` / `"exploratory"`
    /// / `"balanced"` / `"adaptive"`), distinct from `strategy_used` (which
    /// names the workflow the query was dispatched through). ADAPTIVE
    /// resolution groups prior episodes by this field, not `strategy_used`.
    #[serde(default)]
    pub routing_strategy: String,
    pub quality: f64,
    pub latency_ms: u64,
    pub status: EpisodeStatus,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub session_id: Option<String>,
    pub strategy_used: Option<String>,
    pub min_quality: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsolidateResult {
    pub promoted: u64,
    pub expired: u64,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn append(&self, episode: Episode) -> AppResult<()>;
    async fn recent(&self, session_id: Option<&str>, n: usize) -> AppResult<Vec<Episode>>;
    async fn search(&self, query_text: &str, filters: SearchFilters) -> AppResult<Vec<Episode>>;
    async fn consolidate(&self) -> AppResult<ConsolidateResult>;
}

struct Inner {
    episodes: Vec<Episode>,
    /// Watermark: episodes with `timestamp <= consolidated_up_to` have
    /// already been classified by a previous `consolidate()` call.
    consolidated_up_to: Option<DateTime<Utc>>,
}

pub struct JsonlMemoryStore {
    path: PathBuf,
    stm_ttl: chrono::Duration,
    ltm_promotion_threshold: f64,
    inner: RwLock<Inner>,
}

impl JsonlMemoryStore {
    pub async fn open(path: impl AsRef<Path>, stm_ttl_hours: u64, ltm_promotion_threshold: f64) -> AppResult<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let episodes = if path.exists() {
            let raw = tokio::fs::read_to_string(&path).await.map_err(|e| AppError::internal(e))?;
            raw.lines()
                .filter(|l| !l.trim().is_empty())
                .map(|l| serde_json::from_str::<Episode>(l).map_err(|e| AppError::internal(e)))
                .collect::<AppResult<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Arc::new(Self {
            path,
            stm_ttl: chrono::Duration::hours(stm_ttl_hours as i64),
            ltm_promotion_threshold,
            inner: RwLock::new(Inner { episodes, consolidated_up_to: None }),
        }))
    }

    async fn append_line(&self, episode: &Episode) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| AppError::internal(e))?;
        }
        let mut line = serde_json::to_string(episode).map_err(|e| AppError::internal(e))?;
        line.push('\n');
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::internal(e))?;
        file.write_all(line.as_bytes()).await.map_err(|e| AppError::internal(e))?;
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for JsonlMemoryStore {
    async fn append(&self, episode: Episode) -> AppResult<()> {
        self.append_line(&episode).await?;
        self.inner.write().await.episodes.push(episode);
        Ok(())
    }

    async fn recent(&self, session_id: Option<&str>, n: usize) -> AppResult<Vec<Episode>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<&Episode> = inner
            .episodes
            .iter()
            .filter(|e| session_id.map(|sid| e.session_id == sid).unwrap_or(true))
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matching.into_iter().take(n).cloned().collect())
    }

    async fn search(&self, query_text: &str, filters: SearchFilters) -> AppResult<Vec<Episode>> {
        let needle = query_text.to_lowercase();
        let inner = self.inner.read().await;
        let matching = inner
            .episodes
            .iter()
            .filter(|e| needle.is_empty() || e.query_text.to_lowercase().contains(&needle))
            .filter(|e| filters.session_id.as_ref().map(|s| &e.session_id == s).unwrap_or(true))
            .filter(|e| filters.strategy_used.as_ref().map(|s| &e.strategy_used == s).unwrap_or(true))
            .filter(|e| filters.min_quality.map(|q| e.quality >= q).unwrap_or(true))
            .cloned()
            .collect();
        Ok(matching)
    }

    async fn consolidate(&self) -> AppResult<ConsolidateResult> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let cutoff = now - self.stm_ttl;
        let watermark = inner.consolidated_up_to;

        let mut promoted = 0u64;
        let mut expired = 0u64;
        let mut new_watermark = watermark;

        for episode in &inner.episodes {
            if episode.timestamp > cutoff {
                continue; // still within short-term window
            }
            if let Some(w) = watermark {
                if episode.timestamp <= w {
                    continue; // already classified by a previous call
                }
            }
            if episode.quality >= self.ltm_promotion_threshold {
                promoted += 1;
            } else {
                expired += 1;
            }
            new_watermark = Some(new_watermark.map_or(episode.timestamp, |w| w.max(episode.timestamp)));
        }

        inner.consolidated_up_to = new_watermark;
        Ok(ConsolidateResult { promoted, expired })
    }
}

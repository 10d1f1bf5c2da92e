//! `Query` and its `options`, as defined in §3. Lives at the crate root
//! because it is consumed by `meta`, `orchestrator`, and `gateway` alike —
//! none of those modules should own it.

use serde::{Deserialize, Serialize};

use crate::registry::new_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    pub strategy_hint: Option<String>,
    #[serde(default)]
    pub allow_ensemble: bool,
    #[serde(default)]
    pub consensus_required: bool,
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_max_iterations() -> u32 {
    3
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            max_iterations: default_max_iterations(),
            strategy_hint: None,
            allow_ensemble: false,
            consensus_required: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    pub modality: Modality,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub options: QueryOptions,
}

impl Query {
    pub fn new(text: impl Into<String>, modality: Modality) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            modality,
            attachments: Vec::new(),
            user_id: None,
            session_id: None,
            options: QueryOptions::default(),
        }
    }
}

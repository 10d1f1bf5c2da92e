//! Capability tags (§6, §9 redesign hint): the core never dispatches tool
//! calls by a free-form string the way the teacher's `Router::llm_route`
//! does (it parses whatever name an LLM hands back). Instead it holds a
//! small tagged enum of well-known capabilities and a capability→tool-name
//! map loaded at startup from configuration; a name outside the map is
//! `NOT_FOUND`, not silently invoked.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ConversationalResponder,
    Retriever,
    ImageAnalyzer,
    AudioTranscriber,
    Classifier,
    Synthesize,
    /// Any capability named by configuration that isn't one of the
    /// well-known ones above. Still resolvable through `CapabilityMap`.
    Other(String),
}

impl Capability {
    pub fn as_tag(&self) -> &str {
        match self {
            Capability::ConversationalResponder => "conversational_responder",
            Capability::Retriever => "retriever",
            Capability::ImageAnalyzer => "image_analyzer",
            Capability::AudioTranscriber => "audio_transcriber",
            Capability::Classifier => "classifier",
            Capability::Synthesize => "synthesize",
            Capability::Other(s) => s.as_str(),
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "conversational_responder" => Capability::ConversationalResponder,
            "retriever" => Capability::Retriever,
            "image_analyzer" => Capability::ImageAnalyzer,
            "audio_transcriber" => Capability::AudioTranscriber,
            "classifier" => Capability::Classifier,
            "synthesize" => Capability::Synthesize,
            other => Capability::Other(other.to_string()),
        }
    }
}

/// Capability tag -> concrete tool name, loaded once at startup (§6).
#[derive(Debug, Clone, Default)]
pub struct CapabilityMap {
    tools: HashMap<String, String>,
}

impl CapabilityMap {
    pub fn new(tools: HashMap<String, String>) -> Self {
        Self { tools }
    }

    /// A reasonable default mapping, matching the capability tags named in
    /// §6's tool server contract 1:1 onto identically-named tools.
    pub fn default_mapping() -> Self {
        let pairs = [
            Capability::ConversationalResponder,
            Capability::Retriever,
            Capability::ImageAnalyzer,
            Capability::AudioTranscriber,
            Capability::Classifier,
            Capability::Synthesize,
        ];
        let tools = pairs.into_iter().map(|c| (c.as_tag().to_string(), c.as_tag().to_string())).collect();
        Self { tools }
    }

    pub fn resolve(&self, capability: &Capability) -> AppResult<&str> {
        self.tools
            .get(capability.as_tag())
            .map(|s| s.as_str())
            .ok_or_else(|| AppError::not_found(format!("no tool mapped for capability '{}'", capability.as_tag())))
    }

    /// The full resolved capability→tool map, for `GET /v1/capabilities` (§6).
    pub fn all(&self) -> HashMap<String, String> {
        self.tools.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_well_known_tags() {
        for cap in [
            Capability::ConversationalResponder,
            Capability::Retriever,
            Capability::ImageAnalyzer,
            Capability::AudioTranscriber,
            Capability::Classifier,
            Capability::Synthesize,
        ] {
            let tag = cap.as_tag().to_string();
            assert_eq!(Capability::from_tag(&tag).as_tag(), tag);
        }
    }

    #[test]
    fn unknown_capability_is_not_found() {
        let map = CapabilityMap::default_mapping();
        let err = map.resolve(&Capability::Other("quantum_oracle".into())).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotFound);
    }
}

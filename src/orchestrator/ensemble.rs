//! Ensemble combination (§4.4): merge two candidate answers into one.

use crate::backends::ToolServer;
use crate::meta::MetaCognition;
use crate::query::Query;

#[derive(Debug, Clone)]
pub struct Candidate {
    pub answer: String,
    pub quality: f64,
    pub source: String,
}

/// If the two candidates differ in quality by at least 0.1, the higher one
/// wins outright. Otherwise a `synthesize` tool call merges them and the
/// merged answer is re-evaluated; if it still falls short of
/// `quality_threshold` the higher of the two originals is kept instead.
pub async fn combine(tool_server: &dyn ToolServer, meta: &MetaCognition, query: &Query, a: Candidate, b: Candidate) -> Candidate {
    if (a.quality - b.quality).abs() >= 0.1 {
        return if a.quality >= b.quality { a } else { b };
    }

    let params = serde_json::json!({
        "candidates": [
            { "source": a.source, "answer": a.answer, "quality": a.quality },
            { "source": b.source, "answer": b.answer, "quality": b.quality },
        ]
    });

    let higher = if a.quality >= b.quality { a.clone() } else { b.clone() };

    match tool_server.call_tool("synthesize", params).await {
        Ok(result) if result.success => {
            let synthesized = result
                .result
                .as_ref()
                .and_then(|v| v.get("answer"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            match synthesized {
                Some(text) => {
                    let quality = meta.evaluate(query, &text);
                    if quality >= query.options.quality_threshold || quality > higher.quality {
                        Candidate { answer: text, quality, source: "ensemble_synthesis".to_string() }
                    } else {
                        higher
                    }
                }
                None => higher,
            }
        }
        _ => higher,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryToolServer;
    use crate::meta::Strategy;
    use crate::query::Modality;

    #[tokio::test]
    async fn large_quality_gap_picks_higher_without_synthesizing() {
        let server = InMemoryToolServer::new(&["synthesize"]);
        let meta = MetaCognition::new(Strategy::Balanced);
        let query = Query::new("hello", Modality::Text);
        let a = Candidate { answer: "short".into(), quality: 0.9, source: "tool_server".into() };
        let b = Candidate { answer: "bad".into(), quality: 0.3, source: "local_reasoner".into() };
        let winner = combine(&server, &meta, &query, a.clone(), b).await;
        assert_eq!(winner.source, a.source);
    }

    #[tokio::test]
    async fn close_quality_synthesizes_via_tool_server() {
        let server = InMemoryToolServer::new(&["synthesize"]);
        server.queue_response(
            "synthesize",
            crate::backends::ToolCallResult {
                success: true,
                result: Some(serde_json::json!({ "answer": "merged thorough explanation with useful detail and context" })),
                error: None,
                latency_ms: 1,
            },
        );
        let meta = MetaCognition::new(Strategy::Balanced);
        let query = Query::new("explain merged thorough detail context", Modality::Text);
        let a = Candidate { answer: "a".into(), quality: 0.5, source: "tool_server".into() };
        let b = Candidate { answer: "b".into(), quality: 0.52, source: "local_reasoner".into() };
        let winner = combine(&server, &meta, &query, a, b).await;
        assert_eq!(winner.source, "ensemble_synthesis");
    }
}

//! Pre-tool contract lookup (spec §4.5): only fires for `Write`, searches
//! memory for `"contract <filename>"`, and on a hit prepends a block the
//! agent sees before its own tool result. Non-blocking: any error yields an
//! empty string.

use conduit_tools::MemoryStore;
use serde_json::Value;
use std::sync::Arc;

pub async fn pre_tool_contract_lookup(tool_name: &str, input: &Value, memory: &Arc<dyn MemoryStore>) -> String {
    if tool_name != "Write" {
        return String::new();
    }
    let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
        return String::new();
    };
    let file_name = path.rsplit('/').next().unwrap_or(path);

    let hits = match memory.search(&format!("contract {file_name}"), 3).await {
        Ok(hits) => hits,
        Err(e) => {
            tracing::warn!(error = %e, "pre-tool contract lookup failed, continuing without it");
            return String::new();
        }
    };

    let relevant: Vec<_> = hits.iter().filter(|h| h.topic.starts_with("contract_")).collect();
    if relevant.is_empty() {
        return String::new();
    }

    let mut block = String::from("[prior contracts on this file]\n");
    for hit in relevant {
        block.push_str(&format!(
            "- {} :: {} (confidence {:.2})\n",
            hit.topic, hit.decision, hit.confidence
        ));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_tools::MemoryHit;

    struct FakeMemory(Vec<MemoryHit>);

    #[async_trait]
    impl MemoryStore for FakeMemory {
        async fn search(&self, _query: &str, limit: usize) -> Result<Vec<MemoryHit>, String> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
        async fn save(&self, _: &str, _: &str, _: f32) -> Result<(), String> {
            Ok(())
        }
        async fn update(&self, _: &str, _: &str, _: f32) -> Result<(), String> {
            Ok(())
        }
        async fn load_checkpoint(&self, _: &str) -> Result<Option<String>, String> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn only_fires_for_write() {
        let memory: Arc<dyn MemoryStore> = Arc::new(FakeMemory(vec![]));
        let out = pre_tool_contract_lookup("Read", &serde_json::json!({"path": "a.rs"}), &memory).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn surfaces_contract_hits() {
        let memory: Arc<dyn MemoryStore> = Arc::new(FakeMemory(vec![MemoryHit {
            topic: "contract_endpoint_/users".into(),
            decision: "GET /users".into(),
            confidence: 0.8,
        }]));
        let out = pre_tool_contract_lookup("Write", &serde_json::json!({"path": "src/routes.rs"}), &memory).await;
        assert!(out.contains("GET /users"));
    }

    #[tokio::test]
    async fn ignores_non_contract_hits() {
        let memory: Arc<dyn MemoryStore> = Arc::new(FakeMemory(vec![MemoryHit {
            topic: "preference_tabs".into(),
            decision: "uses tabs".into(),
            confidence: 0.9,
        }]));
        let out = pre_tool_contract_lookup("Write", &serde_json::json!({"path": "a.rs"}), &memory).await;
        assert!(out.is_empty());
    }
}

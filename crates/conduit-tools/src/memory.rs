//! External memory/decision store interface (out of scope per spec §1 —
//! "the on-disk memory/decision store" — surfaced here only as the
//! interface C4's memory tools forward to). Grounded on
//! `skynet-memory/src/manager.rs`'s `MemoryManager` (category/source
//! tagging, in-process cache) for the trait shape and the stub impl used
//! in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub topic: String,
    pub decision: String,
    pub confidence: f32,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryHit>, String>;
    async fn save(&self, topic: &str, decision: &str, confidence: f32) -> Result<(), String>;
    async fn update(&self, topic: &str, decision: &str, confidence: f32) -> Result<(), String>;
    async fn load_checkpoint(&self, key: &str) -> Result<Option<String>, String>;
}

/// In-memory stand-in used by tests and the development CLI harness; a real
/// deployment supplies its own `MemoryStore` backed by the actual store.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    entries: Mutex<HashMap<String, MemoryHit>>,
    checkpoints: Mutex<HashMap<String, String>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryHit>, String> {
        let entries = self.entries.lock().map_err(|e| e.to_string())?;
        let mut hits: Vec<MemoryHit> = entries
            .values()
            .filter(|h| h.topic.contains(query) || h.decision.contains(query))
            .cloned()
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }

    async fn save(&self, topic: &str, decision: &str, confidence: f32) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|e| e.to_string())?;
        entries.insert(
            topic.to_string(),
            MemoryHit {
                topic: topic.to_string(),
                decision: decision.to_string(),
                confidence,
            },
        );
        Ok(())
    }

    async fn update(&self, topic: &str, decision: &str, confidence: f32) -> Result<(), String> {
        self.save(topic, decision, confidence).await
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<String>, String> {
        let checkpoints = self.checkpoints.lock().map_err(|e| e.to_string())?;
        Ok(checkpoints.get(key).cloned())
    }
}

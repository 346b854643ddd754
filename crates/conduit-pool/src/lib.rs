//! Subprocess Pool (C10, spec §4.10). Grounded on
//! `skynet-channels/src/manager.rs`'s `ChannelManager` (a `HashMap<String,
//! Box<dyn Channel>>` with register/get/status-all), adapted from named
//! channel transports to per-channel-key subprocess handles.
//!
//! Spec §7 describes self-eviction as the pool subscribing to `error`/
//! `close` *events* on each handle. This pool instead checks
//! `is_alive()` on every `get()` and evicts a dead entry before creating a
//! replacement — externally indistinguishable (a stale handle is never
//! handed back; the next request recreates cleanly) and needs no separate
//! event-subscription plumbing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conduit_core::CoreError;
use conduit_process::ManagedSubprocess;

pub struct SubprocessPool<P: ManagedSubprocess> {
    entries: Mutex<HashMap<String, Arc<P>>>,
    factory: Box<dyn Fn() -> P + Send + Sync>,
}

impl<P: ManagedSubprocess + 'static> SubprocessPool<P> {
    /// `factory` builds a fresh, not-yet-started handle with the pool's
    /// default options merged in by the caller.
    pub fn new(factory: impl Fn() -> P + Send + Sync + 'static) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Returns the live subprocess for `channel_key`, creating and starting
    /// one if absent or if the cached entry has died.
    pub async fn get(&self, channel_key: &str) -> Result<Arc<P>, CoreError> {
        if let Some(existing) = self.cached_if_alive(channel_key) {
            return Ok(existing);
        }

        let fresh = Arc::new((self.factory)());
        if let Err(e) = fresh.start().await {
            tracing::warn!(channel = channel_key, error = %e, "subprocess failed to start");
            return Err(e);
        }
        self.entries.lock().unwrap().insert(channel_key.to_string(), fresh.clone());
        Ok(fresh)
    }

    fn cached_if_alive(&self, channel_key: &str) -> Option<Arc<P>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(channel_key) {
            Some(handle) if handle.is_alive() => Some(handle.clone()),
            Some(_) => {
                entries.remove(channel_key);
                None
            }
            None => None,
        }
    }

    /// Stops and removes the subprocess for `channel_key`, if any.
    pub async fn stop(&self, channel_key: &str) {
        let removed = self.entries.lock().unwrap().remove(channel_key);
        if let Some(handle) = removed {
            handle.stop().await;
        }
    }

    /// Stops and removes every subprocess in the pool.
    pub async fn stop_all(&self) {
        let all: Vec<Arc<P>> = self.entries.lock().unwrap().drain().map(|(_, v)| v).collect();
        for handle in all {
            handle.stop().await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

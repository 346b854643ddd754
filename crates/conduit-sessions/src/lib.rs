//! Session Pool (C6). Grounded on `skynet-sessions/src/manager.rs`
//! (mutex-guarded map, `get_or_create` shape) restructured into a transient
//! in-memory TTL/LRU pool — closer in spirit to `skynet-memory`'s in-process
//! `cache: Mutex<HashMap<...>>` with `CACHE_TTL_SECS`-style eviction than to
//! a persisted sqlite-backed session store.

use std::collections::HashMap;
use std::time::Instant;

use conduit_core::ChannelKey;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub last_active: Instant,
    pub message_count: u32,
    pub created_at: Instant,
    pub in_use: bool,
    pub total_input_tokens: u64,
    /// `true` for compound `"{channel}:temp:{uuid}"` entries, which are
    /// never the primary and never updated by `release_session`.
    pub is_temp: bool,
}

impl Session {
    fn fresh(in_use: bool, is_temp: bool) -> Self {
        let now = Instant::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            last_active: now,
            message_count: 0,
            created_at: now,
            in_use,
            total_input_tokens: 0,
            is_temp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    pub session_timeout_ms: u64,
    pub max_sessions: usize,
    pub context_threshold_tokens: u64,
    pub context_warning_fraction: f64,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 30 * 60 * 1000,
            max_sessions: 100,
            context_threshold_tokens: 160_000,
            context_warning_fraction: 0.90,
        }
    }
}

struct Inner {
    entries: HashMap<String, Session>,
}

pub struct SessionPool {
    config: SessionPoolConfig,
    inner: Mutex<Inner>,
}

impl SessionPool {
    pub fn new(config: SessionPoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
            }),
        }
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.duration_since(session.last_active).as_millis() as u64 > self.config.session_timeout_ms
    }

    /// `get_session(channel_key)` (spec §4.6).
    pub async fn get_session(&self, channel_key: &ChannelKey) -> (String, bool) {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let key = channel_key.as_str().to_string();

        if let Some(existing) = guard.entries.get(&key).cloned() {
            if !self.is_expired(&existing, now) {
                if existing.total_input_tokens >= self.config.context_threshold_tokens {
                    tracing::info!(channel = %channel_key, "context full, fresh session");
                    guard.entries.remove(&key);
                } else if existing.in_use {
                    let temp_key = channel_key.temp_key(&uuid::Uuid::new_v4().to_string());
                    let temp_session = Session::fresh(true, true);
                    let id = temp_session.session_id.clone();
                    guard.entries.insert(temp_key, temp_session);
                    return (id, true);
                } else {
                    let mut updated = existing;
                    updated.last_active = now;
                    updated.message_count += 1;
                    updated.in_use = true;
                    let id = updated.session_id.clone();
                    guard.entries.insert(key, updated);
                    return (id, false);
                }
            } else {
                guard.entries.remove(&key);
            }
        }

        if guard.entries.len() >= self.config.max_sessions {
            evict_lru(&mut guard.entries);
        }

        let session = Session::fresh(true, false);
        let id = session.session_id.clone();
        guard.entries.insert(key, session);
        (id, true)
    }

    /// `update_tokens(channel_key, input_tokens)`: stores `max(current,
    /// reported)` (spec §4.6, §9 open question #2). Returns whether the
    /// session is now within the warning fraction of the threshold.
    pub async fn update_tokens(&self, channel_key: &ChannelKey, input_tokens: u64) -> bool {
        let mut guard = self.inner.lock().await;
        let key = channel_key.as_str().to_string();
        let Some(session) = guard.entries.get_mut(&key) else {
            return false;
        };
        session.total_input_tokens = session.total_input_tokens.max(input_tokens);
        (session.total_input_tokens as f64)
            >= (self.config.context_threshold_tokens as f64) * self.config.context_warning_fraction
    }

    /// Clears `in_use` on the primary entry only; never touches temp
    /// entries (spec §4.6).
    pub async fn release_session(&self, channel_key: &ChannelKey) {
        let mut guard = self.inner.lock().await;
        let key = channel_key.as_str().to_string();
        if let Some(session) = guard.entries.get_mut(&key) {
            if !session.is_temp {
                session.in_use = false;
            }
        }
    }

    /// Drops the entry and creates a fresh one.
    pub async fn reset_session(&self, channel_key: &ChannelKey) -> String {
        let mut guard = self.inner.lock().await;
        let key = channel_key.as_str().to_string();
        guard.entries.remove(&key);
        let session = Session::fresh(true, false);
        let id = session.session_id.clone();
        guard.entries.insert(key, session);
        id
    }

    /// Periodic cleanup: removes entries whose `last_active` is older than
    /// `session_timeout_ms`. Intended to be driven by a `tokio::time::interval`
    /// loop at `cleanup_interval_ms` (the loop itself lives in the daemon,
    /// mirroring `skynet-scheduler`'s `run(shutdown)` ticking pattern).
    pub async fn cleanup_expired(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let before = guard.entries.len();
        guard.entries.retain(|_, session| {
            now.duration_since(session.last_active).as_millis() as u64 <= self.config.session_timeout_ms
        });
        before - guard.entries.len()
    }

    /// Number of non-temp (primary) entries for a given channel key — used
    /// by tests to assert the "at most one primary per channel" invariant.
    pub async fn primary_count(&self, channel_key: &ChannelKey) -> usize {
        let guard = self.inner.lock().await;
        let key = channel_key.as_str();
        guard
            .entries
            .iter()
            .filter(|(k, v)| k.as_str() == key && !v.is_temp)
            .count()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}

fn evict_lru(entries: &mut HashMap<String, Session>) {
    if let Some(oldest_key) = entries
        .iter()
        .min_by_key(|(_, s)| s.last_active)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&oldest_key);
    }
}

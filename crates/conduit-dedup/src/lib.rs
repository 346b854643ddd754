//! Content Deduplicator (C1, spec §4.1).
//!
//! Maintains a mapping from a 16-hex-character SHA-256 prefix of content to
//! an entry, collapsing two views of the same file (symlink, duplicate
//! discovery path) into one instance while preferring the semantically
//! closest (`distance`) one. Grounded stylistically on
//! `skynet-memory`'s cache-eviction-by-key discipline, generalized from
//! "evict oldest" to "keep smallest distance".

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub path: String,
    pub real_path: String,
    pub content: String,
    pub distance: i64,
    pub hash: String,
}

#[derive(Debug, Default)]
pub struct ContentDeduplicator {
    entries: HashMap<String, DedupEntry>,
}

/// 16-hex-character SHA-256 prefix of `content`.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Resolve the real path of `path_str`, following symlinks; on failure
/// (file doesn't exist, permission error, etc.) fall back to the input.
fn resolve_real_path(path_str: &str) -> String {
    let path = Path::new(path_str);
    match std::fs::canonicalize(path) {
        Ok(resolved) => resolved.to_string_lossy().into_owned(),
        Err(_) => PathBuf::from(path_str).to_string_lossy().into_owned(),
    }
}

impl ContentDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate fragment. Returns `true` if it introduces a new
    /// distinct file identity, `false` if it collapsed into an existing one
    /// (spec §4.1).
    pub fn add(&mut self, path: &str, content: &str, distance: i64) -> bool {
        let hash = content_hash(content);
        let real_path = resolve_real_path(path);

        if let Some(existing) = self.entries.get(&hash) {
            if distance < existing.distance {
                self.entries.insert(
                    hash.clone(),
                    DedupEntry {
                        path: path.to_string(),
                        real_path,
                        content: content.to_string(),
                        distance,
                        hash,
                    },
                );
            }
            return false;
        }

        let colliding_hash = self.entries.iter().find_map(|(h, e)| {
            if e.real_path == real_path && e.distance > distance {
                Some(h.clone())
            } else {
                None
            }
        });

        if let Some(h) = colliding_hash {
            self.entries.remove(&h);
            self.entries.insert(
                hash.clone(),
                DedupEntry {
                    path: path.to_string(),
                    real_path,
                    content: content.to_string(),
                    distance,
                    hash,
                },
            );
            return false;
        }

        self.entries.insert(
            hash.clone(),
            DedupEntry {
                path: path.to_string(),
                real_path,
                content: content.to_string(),
                distance,
                hash,
            },
        );
        true
    }

    /// Entries sorted by ascending distance.
    pub fn get_entries(&self) -> Vec<DedupEntry> {
        let mut entries: Vec<DedupEntry> = self.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.distance);
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_twice_is_new_then_not_new() {
        let mut d = ContentDeduplicator::new();
        assert!(d.add("/tmp/nonexistent-a.txt", "hello world", 1));
        assert!(!d.add("/tmp/nonexistent-a.txt", "hello world", 1));
    }

    #[test]
    fn smaller_distance_replaces_same_hash_entry() {
        let mut d = ContentDeduplicator::new();
        assert!(d.add("/tmp/nonexistent-b.txt", "same content", 5));
        assert!(!d.add("/tmp/nonexistent-b.txt", "same content", 2));
        let entries = d.get_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].distance, 2);
    }

    #[test]
    fn larger_distance_does_not_replace_same_hash_entry() {
        let mut d = ContentDeduplicator::new();
        assert!(d.add("/tmp/nonexistent-c.txt", "same content", 2));
        assert!(!d.add("/tmp/nonexistent-c.txt", "same content", 9));
        let entries = d.get_entries();
        assert_eq!(entries[0].distance, 2);
    }

    #[test]
    fn entries_sorted_by_ascending_distance() {
        let mut d = ContentDeduplicator::new();
        d.add("/tmp/nonexistent-1.txt", "aaa", 3);
        d.add("/tmp/nonexistent-2.txt", "bbb", 1);
        d.add("/tmp/nonexistent-3.txt", "ccc", 2);
        let distances: Vec<i64> = d.get_entries().iter().map(|e| e.distance).collect();
        assert_eq!(distances, vec![1, 2, 3]);
    }

    #[test]
    fn real_path_collision_with_different_content_prefers_smaller_distance() {
        // Two different fragments that resolve to the same real_path (here,
        // both fall back to their literal path since the file doesn't
        // exist, so we use the identical literal path to simulate the
        // symlink-collapse case) collapse to one entry, keeping the
        // smaller distance, and the call that wins never reports "new".
        let mut d = ContentDeduplicator::new();
        assert!(d.add("/tmp/nonexistent-same.txt", "content-a", 5));
        assert!(!d.add("/tmp/nonexistent-same.txt", "content-b", 1));
        let entries = d.get_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].distance, 1);
    }
}

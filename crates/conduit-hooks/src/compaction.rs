//! Pre-compaction handler (spec §4.5): when a session's running
//! input-token total crosses 90% of the context-window threshold, inject a
//! fixed 7-section compaction-summary user message once per loop.

use regex::Regex;

/// Tracks whether the compaction prompt has already been injected during
/// the current agent-loop invocation (spec: "once per loop").
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactionState {
    injected: bool,
}

impl CompactionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once, the first time `current_tokens` crosses
    /// `threshold * warning_fraction`.
    pub fn should_inject(&mut self, current_tokens: u64, threshold: u64, warning_fraction: f64) -> bool {
        if self.injected {
            return false;
        }
        if (current_tokens as f64) >= (threshold as f64) * warning_fraction {
            self.injected = true;
            return true;
        }
        false
    }
}

/// Regex-extracted candidate "unsaved decision" statements — heuristic,
/// not a contract (spec §9 calls this class of heuristic a default).
fn decision_patterns() -> Vec<Regex> {
    vec![
        Regex::new(r"(?im)^.*\b(we(?:'ll| will)?\s+(?:use|go with|decide[d]? on))\s+([^.\n]+)").unwrap(),
        Regex::new(r"(?im)^.*\bdecided?:\s*([^.\n]+)").unwrap(),
    ]
}

/// Scan `transcript` for decision-shaped statements not already present in
/// `existing`, capped at `cap`.
pub fn detect_unsaved_decisions(transcript: &str, existing: &[String], cap: usize) -> Vec<String> {
    let mut found = Vec::new();
    for pattern in decision_patterns() {
        for caps in pattern.captures_iter(transcript) {
            let statement = caps
                .get(caps.len() - 1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            if statement.is_empty() {
                continue;
            }
            if existing.iter().any(|e| e == &statement) || found.contains(&statement) {
                continue;
            }
            found.push(statement);
            if found.len() >= cap {
                return found;
            }
        }
    }
    found
}

/// Fixed 7-section compaction-summary prompt (spec §4.5).
pub fn compaction_prompt(unsaved_decisions: &[String]) -> String {
    let mut out = String::from(
        "This conversation is approaching its context limit. Before continuing, \
         summarize the following so nothing is lost:\n\n\
         1. User requests — what has the user asked for so far?\n\
         2. Final goal — what does \"done\" look like?\n\
         3. Work completed — what has already been accomplished?\n\
         4. Remaining tasks — what is still outstanding?\n\
         5. Active working context — files, sessions, or state currently in play.\n\
         6. Explicit constraints — anything the user asked you to avoid or preserve.\n\
         7. Verification state — what has been tested or confirmed, and what hasn't.\n",
    );

    if !unsaved_decisions.is_empty() {
        out.push_str("\nPossible unsaved decisions worth recording to memory:\n");
        for decision in unsaved_decisions {
            out.push_str(&format!("- {decision}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_loop_at_ninety_percent() {
        let mut state = CompactionState::new();
        assert!(!state.should_inject(100_000, 160_000, 0.9));
        assert!(state.should_inject(144_000, 160_000, 0.9));
        assert!(!state.should_inject(150_000, 160_000, 0.9));
    }

    #[test]
    fn extracts_decision_statements() {
        let transcript = "We'll use postgres for storage. Some other text. Decided: retry at most 3 times.";
        let decisions = detect_unsaved_decisions(transcript, &[], 10);
        assert!(decisions.iter().any(|d| d.contains("postgres")));
        assert!(decisions.iter().any(|d| d.contains("retry at most 3 times")));
    }

    #[test]
    fn skips_already_known_decisions() {
        let transcript = "We'll use postgres for storage.";
        let decisions = detect_unsaved_decisions(transcript, &["postgres for storage".to_string()], 10);
        assert!(decisions.is_empty());
    }

    #[test]
    fn prompt_has_seven_sections() {
        let prompt = compaction_prompt(&[]);
        for marker in ["1.", "2.", "3.", "4.", "5.", "6.", "7."] {
            assert!(prompt.contains(marker));
        }
    }
}

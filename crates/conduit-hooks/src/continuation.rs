//! Stop-continuation detection (spec §4.5, §9 open question #4).

use regex::Regex;

pub const COMPLETION_MARKERS: &[&str] = &["DONE", "TASK_COMPLETE", "완료"];
const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '"', '\'', ')'];

#[derive(Debug, Clone, Default)]
pub struct ChannelContinuationState {
    pub consecutive_count: u32,
    pub manual_stop: bool,
}

impl ChannelContinuationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset at pre-loop (spec §4.11 step 3).
    pub fn reset(&mut self) {
        self.consecutive_count = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationDecision {
    Stop,
    Continue { message: String },
}

fn incomplete_patterns() -> Vec<Regex> {
    vec![Regex::new(r"(?i)\bi'?ll continue\b|\bi will continue\b|\blet me continue\b").unwrap()]
}

fn ends_in_terminal_punctuation(text: &str) -> bool {
    text.trim_end().chars().last().map(|c| TERMINAL_PUNCTUATION.contains(&c)).unwrap_or(false)
}

fn last_lines(text: &str, n: usize) -> String {
    text.lines().rev().take(n).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n")
}

fn has_completion_marker(text: &str) -> bool {
    let tail = last_lines(text, 5);
    COMPLETION_MARKERS.iter().any(|m| tail.contains(m))
}

/// Decide whether to loop again after an `end_turn` stop reason (spec
/// §4.5). `max_retries` caps consecutive continuations per channel.
pub fn decide_continuation(
    text: &str,
    state: &mut ChannelContinuationState,
    max_retries: u32,
    min_chars: usize,
) -> ContinuationDecision {
    if state.manual_stop {
        return ContinuationDecision::Stop;
    }
    if has_completion_marker(text) {
        state.consecutive_count = 0;
        return ContinuationDecision::Stop;
    }

    let looks_incomplete = incomplete_patterns().iter().any(|p| p.is_match(text));
    let too_long_without_closure = text.chars().count() >= min_chars && !ends_in_terminal_punctuation(text);

    if !looks_incomplete && !too_long_without_closure {
        state.consecutive_count = 0;
        return ContinuationDecision::Stop;
    }

    if state.consecutive_count >= max_retries {
        state.consecutive_count = 0;
        return ContinuationDecision::Stop;
    }

    state.consecutive_count += 1;
    ContinuationDecision::Continue {
        message: "Continue from where you left off. When genuinely finished, end your reply with DONE (or 완료)."
            .to_string(),
    }
}

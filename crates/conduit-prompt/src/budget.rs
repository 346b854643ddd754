//! Prompt Size Monitor (C3, spec §4.3). Grounded on
//! `skynet-agent/src/prompt.rs`'s `truncate_content` (head/tail split with a
//! marker, respecting word/line boundaries), generalized from "one string"
//! to "N prioritized layers".

use conduit_core::PromptLayer;

pub const WARN_CHARS: usize = 15_000;
pub const TRUNCATE_CHARS: usize = 25_000;
pub const HARD_CHARS: usize = 40_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningLevel {
    Ok,
    Warn,
    Truncate,
    Hard,
}

#[derive(Debug, Clone)]
pub struct BudgetReport {
    pub total_chars: usize,
    pub estimated_tokens: u64,
    pub level: WarningLevel,
}

/// Token estimate: `ceil(chars / 4)`.
pub fn estimate_tokens(chars: usize) -> u64 {
    ((chars as u64) + 3) / 4
}

/// `check(layers)`: totals and warning level against the three thresholds.
/// Boundary behaviour is strict: exactly `WARN_CHARS` is `Ok`, one char over
/// is `Warn`, and so on (spec §8).
pub fn check(layers: &[PromptLayer]) -> BudgetReport {
    let total_chars: usize = layers.iter().map(|l| l.len_chars()).sum();
    let level = if total_chars > HARD_CHARS {
        WarningLevel::Hard
    } else if total_chars > TRUNCATE_CHARS {
        WarningLevel::Truncate
    } else if total_chars > WARN_CHARS {
        WarningLevel::Warn
    } else {
        WarningLevel::Ok
    };
    BudgetReport {
        total_chars,
        estimated_tokens: estimate_tokens(total_chars),
        level,
    }
}

/// Result of `enforce`: the (possibly shrunk) layers, their new total, and
/// the names of layers that were touched.
#[derive(Debug, Clone)]
pub struct EnforceResult {
    pub layers: Vec<PromptLayer>,
    pub report: BudgetReport,
    pub touched: Vec<String>,
}

/// `enforce(layers, limit)` (spec §4.3). Priority-1 layers are never
/// shortened; truncation is deterministic for a given input; order of
/// remaining layers is preserved.
pub fn enforce(layers: &[PromptLayer], limit: usize) -> EnforceResult {
    let initial_total: usize = layers.iter().map(|l| l.len_chars()).sum();
    if initial_total <= limit {
        return EnforceResult {
            layers: layers.to_vec(),
            report: check(layers),
            touched: Vec::new(),
        };
    }

    let mut excess = initial_total - limit;
    let mut working: Vec<PromptLayer> = layers.to_vec();
    let mut touched = Vec::new();

    let mut candidate_indices: Vec<usize> = working
        .iter()
        .enumerate()
        .filter(|(_, l)| l.priority > 1)
        .map(|(i, _)| i)
        .collect();
    candidate_indices.sort_by(|&a, &b| {
        let la = &working[a];
        let lb = &working[b];
        lb.priority
            .cmp(&la.priority)
            .then_with(|| lb.len_chars().cmp(&la.len_chars()))
    });

    for idx in candidate_indices {
        if excess == 0 {
            break;
        }
        let layer_len = working[idx].len_chars();
        if layer_len == 0 {
            continue;
        }
        touched.push(working[idx].name.clone());

        if layer_len <= excess {
            excess -= layer_len;
            working[idx].content.clear();
        } else {
            let marker = format!("\n[... {} truncated: {} chars removed ...]", working[idx].name, excess);
            let keep = layer_len.saturating_sub(excess + marker.chars().count());
            let truncated: String = working[idx].content.chars().take(keep).collect();
            working[idx].content = format!("{truncated}{marker}");
            excess = 0;
            break;
        }
    }

    working.retain(|l| !l.content.is_empty());

    EnforceResult {
        report: check(&working),
        layers: working,
        touched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, len: usize, priority: u8) -> PromptLayer {
        PromptLayer::new(name, "x".repeat(len), priority)
    }

    #[test]
    fn boundary_exactly_at_warn_threshold_is_ok() {
        let layers = vec![layer("a", WARN_CHARS, 1)];
        assert_eq!(check(&layers).level, WarningLevel::Ok);
    }

    #[test]
    fn boundary_one_over_warn_threshold_warns() {
        let layers = vec![layer("a", WARN_CHARS + 1, 1)];
        assert_eq!(check(&layers).level, WarningLevel::Warn);
    }

    #[test]
    fn boundary_truncate_and_hard_thresholds() {
        assert_eq!(check(&[layer("a", TRUNCATE_CHARS, 1)]).level, WarningLevel::Warn);
        assert_eq!(check(&[layer("a", TRUNCATE_CHARS + 1, 1)]).level, WarningLevel::Truncate);
        assert_eq!(check(&[layer("a", HARD_CHARS, 1)]).level, WarningLevel::Truncate);
        assert_eq!(check(&[layer("a", HARD_CHARS + 1, 1)]).level, WarningLevel::Hard);
    }

    #[test]
    fn enforce_noop_when_under_limit() {
        let layers = vec![layer("a", 100, 1)];
        let result = enforce(&layers, 25_000);
        assert!(result.touched.is_empty());
        assert_eq!(result.layers[0].content, layers[0].content);
    }

    #[test]
    fn enforce_never_shortens_priority_one_layers() {
        let layers = vec![layer("base", 30_000, 1), layer("skills", 5_000, 3)];
        let result = enforce(&layers, 25_000);
        let base = result.layers.iter().find(|l| l.name == "base").unwrap();
        assert_eq!(base.content.len(), 30_000);
        assert!(!result.touched.contains(&"base".to_string()));
    }

    #[test]
    fn enforce_prefers_highest_priority_then_longest() {
        let layers = vec![
            layer("base", 10_000, 1),
            layer("persona", 5_000, 2),
            layer("skills", 20_000, 3),
            layer("context", 3_000, 3),
        ];
        // total 38000, limit 25000 => excess 13000.
        let result = enforce(&layers, 25_000);
        assert_eq!(result.touched[0], "skills");
        assert!(result.report.total_chars <= 25_000);
    }

    #[test]
    fn enforce_removes_zeroed_layers() {
        let layers = vec![layer("base", 1_000, 1), layer("extra", 500, 4)];
        let result = enforce(&layers, 1_000);
        assert!(result.layers.iter().all(|l| l.name != "extra"));
    }

    #[test]
    fn enforce_is_deterministic() {
        let layers = vec![layer("base", 10_000, 1), layer("skills", 20_000, 3)];
        let r1 = enforce(&layers, 25_000);
        let r2 = enforce(&layers, 25_000);
        assert_eq!(r1.layers[1].content, r2.layers[1].content);
    }
}

//! Keyword detector half of C12 (spec §4.12, §9 open question #3).
//!
//! Scans the outgoing user text only, after stripping fenced code blocks,
//! never tool-result text. Matches are OR'd across detectors; each detector
//! contributes at most one fragment regardless of how many times its
//! pattern matches.

use regex::Regex;

pub struct Detector {
    pub name: &'static str,
    pattern: Regex,
    pub fragment: &'static str,
}

impl Detector {
    pub fn new(name: &'static str, pattern: &str, fragment: &'static str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("detector pattern is a valid regex"),
            fragment,
        }
    }
}

pub struct KeywordDetector {
    detectors: Vec<Detector>,
}

impl KeywordDetector {
    pub fn new(detectors: Vec<Detector>) -> Self {
        Self { detectors }
    }

    /// Default multilingual detector set: a "deep thinking" trigger
    /// (English/Korean) and a "code-act" trigger.
    pub fn default_detectors() -> Self {
        Self::new(vec![
            Detector::new(
                "deep_think",
                r"(?i)\b(think (hard|deeply)|심사숙고|깊이\s*생각)\b",
                "[[mode: extended reasoning requested — take extra turns to verify before answering]]",
            ),
            Detector::new(
                "code_act",
                r"(?i)\b(run this code|execute this script|코드\s*실행)\b",
                "[[mode: code-act — prefer a fenced js block over prose when a tool is needed]]",
            ),
        ])
    }

    pub fn matched_names(&self, text: &str) -> Vec<&'static str> {
        let stripped = strip_code_fences(text);
        self.detectors
            .iter()
            .filter(|d| d.pattern.is_match(&stripped))
            .map(|d| d.name)
            .collect()
    }

    /// Bounded mode-instruction fragments to append to the upcoming turn's
    /// user content, one per matching detector.
    pub fn detect_fragments(&self, text: &str) -> Vec<&'static str> {
        let stripped = strip_code_fences(text);
        self.detectors
            .iter()
            .filter(|d| d.pattern.is_match(&stripped))
            .map(|d| d.fragment)
            .collect()
    }
}

/// Strip ``` fenced code blocks before keyword scanning.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::new();
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_english_and_korean_variants() {
        let det = KeywordDetector::default_detectors();
        assert_eq!(det.matched_names("please think hard about this"), vec!["deep_think"]);
        assert_eq!(det.matched_names("깊이 생각 해줘"), vec!["deep_think"]);
        assert!(det.matched_names("just say hi").is_empty());
    }

    #[test]
    fn ignores_text_inside_code_fences() {
        let det = KeywordDetector::default_detectors();
        let text = "```\nthink hard\n```\nno trigger here";
        assert!(det.matched_names(text).is_empty());
    }

    #[test]
    fn one_fragment_per_detector_even_with_repeated_matches() {
        let det = KeywordDetector::default_detectors();
        let fragments = det.detect_fragments("think hard, and also think deeply please");
        assert_eq!(fragments.len(), 1);
    }
}

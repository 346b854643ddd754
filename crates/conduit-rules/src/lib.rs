//! Frontmatter/Rules Filter (C2, spec §4.2).
//!
//! Parses an optional `---`-delimited header at the start of a text
//! fragment and matches its `applies_to` selector against a runtime
//! `AgentContext`. Grounded stylistically on the line-boundary scanning in
//! `skynet-agent/src/prompt.rs`'s `truncate_content`.

use conduit_core::AgentContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliesTo {
    pub agent_id: Option<Vec<String>>,
    pub tier: Option<Vec<String>>,
    pub channel: Option<Vec<String>>,
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
    pub applies_to: Option<AppliesTo>,
}

fn parse_list_value(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    inner
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse the `---`-delimited header, if present. Returns `(frontmatter,
/// body)`. A malformed header (opening delimiter with no matching closing
/// delimiter, or an unparseable line inside it) is treated as "no header":
/// the full original text is returned as the body and `None` as the
/// frontmatter, with a logged warning (spec §4.2: "treat as universal").
pub fn parse_frontmatter(content: &str) -> (Option<Frontmatter>, String) {
    let Some(after_open) = content.strip_prefix("---\n").or_else(|| content.strip_prefix("---\r\n")) else {
        return (None, content.to_string());
    };

    let Some(close_pos) = find_closing_delimiter(after_open) else {
        tracing::warn!("frontmatter: no closing delimiter, treating fragment as headerless");
        return (None, content.to_string());
    };

    let (header_block, rest) = after_open.split_at(close_pos);
    // rest starts at the "---" closing line; skip past it and one newline.
    let body = rest
        .splitn(2, '\n')
        .nth(1)
        .unwrap_or("")
        .to_string();

    match parse_header_lines(header_block) {
        Some(fm) => (Some(fm), body),
        None => {
            tracing::warn!("frontmatter: unparseable header, treating fragment as headerless");
            (None, content.to_string())
        }
    }
}

fn find_closing_delimiter(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let bare = line.trim_end_matches(['\n', '\r']);
        if bare == "---" {
            return Some(offset);
        }
        offset += line.len();
    }
    if text.trim_end_matches(['\n', '\r']) == "---" {
        return Some(0);
    }
    None
}

fn parse_header_lines(header: &str) -> Option<Frontmatter> {
    let mut applies_to = AppliesTo::default();
    let mut in_applies_to = false;
    let mut saw_any = false;

    for raw_line in header.lines() {
        if raw_line.trim().is_empty() {
            continue;
        }
        if !raw_line.starts_with(' ') && !raw_line.starts_with('\t') {
            let line = raw_line.trim();
            if line == "applies_to:" {
                in_applies_to = true;
                saw_any = true;
                continue;
            }
            in_applies_to = false;
            continue;
        }

        if !in_applies_to {
            continue;
        }

        let line = raw_line.trim();
        let Some((key, value)) = line.split_once(':') else {
            return None;
        };
        let values = parse_list_value(value);
        match key.trim() {
            "agent_id" => applies_to.agent_id = Some(values),
            "tier" => applies_to.tier = Some(values),
            "channel" => applies_to.channel = Some(values),
            "keywords" => applies_to.keywords = Some(values),
            _ => return None,
        }
    }

    if !saw_any {
        return Some(Frontmatter { applies_to: None });
    }
    Some(Frontmatter {
        applies_to: Some(applies_to),
    })
}

fn field_matches(field: &Option<Vec<String>>, ctx_values: &[String]) -> bool {
    match field {
        None => true,
        Some(vals) => vals.iter().any(|v| ctx_values.iter().any(|c| c == v)),
    }
}

/// `matches_context` (spec §4.2): absent `applies_to` always matches;
/// otherwise every present field must OR-match against the context, and
/// fields combine with AND.
pub fn matches_context(applies_to: Option<&AppliesTo>, ctx: &AgentContext) -> bool {
    let Some(a) = applies_to else {
        return true;
    };

    let agent_ids: Vec<String> = ctx.agent_id.iter().cloned().collect();
    let tiers: Vec<String> = ctx.tier.iter().cloned().collect();
    let channels: Vec<String> = ctx.channel.iter().cloned().collect();

    field_matches(&a.agent_id, &agent_ids)
        && field_matches(&a.tier, &tiers)
        && field_matches(&a.channel, &channels)
        && field_matches(&a.keywords, &ctx.keywords)
}

//! Post-tool contract extraction (spec §4.5). Regex-based detectors for
//! API endpoints, function signatures, type definitions, and SQL/GraphQL
//! schemas; low-priority paths (tests, docs, config, lock files) are
//! skipped, and the result is capped at `contract_save_limit`.

use conduit_core::ExtractedContract;
use conduit_tools::MemoryStore;
use regex::Regex;
use std::sync::Arc;

fn is_low_priority_path(file: &str) -> bool {
    let lower = file.to_lowercase();
    const LOW_PRIORITY_MARKERS: &[&str] = &[
        "/test", "test_", "_test.", ".test.", "/docs/", ".md", "/config/", ".lock", "lockfile",
    ];
    LOW_PRIORITY_MARKERS.iter().any(|m| lower.contains(m))
}

struct Detector {
    pattern: Regex,
    build: fn(&regex::Captures, &str) -> ExtractedContract,
}

fn detectors() -> Vec<Detector> {
    vec![
        Detector {
            pattern: Regex::new(r#"(?i)\b(get|post|put|delete|patch)\s*\(\s*["'`]([^"'`]+)["'`]"#).unwrap(),
            build: |caps, file| ExtractedContract::ApiEndpoint {
                method: caps[1].to_uppercase(),
                path: caps[2].to_string(),
                file: file.to_string(),
                confidence: 0.7,
            },
        },
        Detector {
            pattern: Regex::new(r"(?m)^\s*(?:pub\s+)?(?:async\s+)?fn\s+(\w+)\s*\(([^)]*)\)").unwrap(),
            build: |caps, file| ExtractedContract::FunctionSignature {
                signature: format!("fn {}({})", &caps[1], &caps[2]),
                file: file.to_string(),
                confidence: 0.6,
            },
        },
        Detector {
            pattern: Regex::new(r"(?m)^\s*(?:pub\s+)?(?:struct|enum|trait)\s+(\w+)").unwrap(),
            build: |caps, file| ExtractedContract::TypeDefinition {
                name: caps[1].to_string(),
                definition: caps[0].trim().to_string(),
                file: file.to_string(),
                confidence: 0.65,
            },
        },
        Detector {
            pattern: Regex::new(r"(?is)CREATE TABLE\s+(\w+)\s*\(([^;]*)\)").unwrap(),
            build: |caps, file| ExtractedContract::SqlSchema {
                table: caps[1].to_string(),
                definition: caps[2].trim().to_string(),
                file: file.to_string(),
                confidence: 0.85,
            },
        },
        Detector {
            pattern: Regex::new(r"(?s)\btype\s+(\w+)\s*\{([^}]*)\}").unwrap(),
            build: |caps, file| ExtractedContract::GraphqlSchema {
                type_name: caps[1].to_string(),
                definition: caps[2].trim().to_string(),
                file: file.to_string(),
                confidence: 0.55,
            },
        },
    ]
}

/// Run all detectors over `content`, capped at `limit` total matches.
/// Returns an empty vec for low-priority paths.
pub fn extract_contracts(file: &str, content: &str, limit: usize) -> Vec<ExtractedContract> {
    if is_low_priority_path(file) {
        return Vec::new();
    }

    let mut found = Vec::new();
    'detectors: for detector in detectors() {
        for caps in detector.pattern.captures_iter(content) {
            found.push((detector.build)(&caps, file));
            if found.len() >= limit {
                break 'detectors;
            }
        }
    }
    found
}

fn topic_and_decision(contract: &ExtractedContract) -> (String, String) {
    match contract {
        ExtractedContract::ApiEndpoint { method, path, .. } => {
            (format!("contract_endpoint_{path}"), format!("{method} {path}"))
        }
        ExtractedContract::FunctionSignature { signature, .. } => {
            (format!("contract_fn_{signature}"), signature.clone())
        }
        ExtractedContract::TypeDefinition { name, definition, .. } => {
            (format!("contract_type_{name}"), definition.clone())
        }
        ExtractedContract::SqlSchema { table, definition, .. } => {
            (format!("contract_sql_{table}"), definition.clone())
        }
        ExtractedContract::GraphqlSchema {
            type_name,
            definition,
            ..
        } => (format!("contract_gql_{type_name}"), definition.clone()),
    }
}

/// Deduplicate against existing memory (by topic+decision) and persist new
/// contracts. Intended to be invoked as a fire-and-forget background task
/// by the caller (spec §4.5: "fires asynchronously, must not await");
/// failures are swallowed, only logged.
pub async fn persist_new_contracts(memory: Arc<dyn MemoryStore>, contracts: Vec<ExtractedContract>) {
    for contract in contracts {
        let (topic, decision) = topic_and_decision(&contract);
        match memory.search(&topic, 1).await {
            Ok(hits) if hits.iter().any(|h| h.topic == topic && h.decision == decision) => {
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "post-tool contract extraction: memory search failed, skipping dedup");
            }
            _ => {}
        }
        if let Err(e) = memory.save(&topic, &decision, contract.confidence()).await {
            tracing::warn!(error = %e, file = contract.file(), "post-tool contract extraction: save failed");
        }
    }
}

/// Post-tool contract extraction entry point (spec §4.5): only fires for
/// edit tools. Caller wraps this in `tokio::spawn` to keep it
/// fire-and-forget.
pub async fn post_tool_contract_extraction(
    tool_name: &str,
    file: &str,
    content: &str,
    memory: Arc<dyn MemoryStore>,
    contract_save_limit: usize,
) {
    const EDIT_TOOLS: &[&str] = &["Write", "Edit", "apply_patch"];
    if !EDIT_TOOLS.contains(&tool_name) {
        return;
    }
    let contracts = extract_contracts(file, content, contract_save_limit);
    if contracts.is_empty() {
        return;
    }
    persist_new_contracts(memory, contracts).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_low_priority_paths() {
        assert!(extract_contracts("src/foo_test.rs", "fn bar() {}", 10).is_empty());
        assert!(extract_contracts("docs/README.md", "fn bar() {}", 10).is_empty());
        assert!(extract_contracts("Cargo.lock", "fn bar() {}", 10).is_empty());
    }

    #[test]
    fn detects_function_signature() {
        let contracts = extract_contracts("src/lib.rs", "pub async fn handler(req: Request) -> Response {}", 10);
        assert!(contracts
            .iter()
            .any(|c| matches!(c, ExtractedContract::FunctionSignature { signature, .. } if signature.contains("handler"))));
    }

    #[test]
    fn detects_sql_schema() {
        let contracts = extract_contracts(
            "migrations/001.sql",
            "CREATE TABLE users (id INT, name TEXT);",
            10,
        );
        assert!(contracts
            .iter()
            .any(|c| matches!(c, ExtractedContract::SqlSchema { table, .. } if table == "users")));
    }

    #[test]
    fn caps_at_limit() {
        let content = "fn a(){} fn b(){} fn c(){} fn d(){}";
        let contracts = extract_contracts("src/lib.rs", content, 2);
        assert_eq!(contracts.len(), 2);
    }
}

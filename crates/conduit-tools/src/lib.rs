//! Tool Executor (C4, spec §4.4, §6). Grounded on
//! `skynet-agent/src/tools/{mod.rs,read_file.rs,write_file.rs,
//! execute_command.rs}` (the `Tool` async-trait, `ToolResult` success/error
//! constructors) and `skynet-terminal/src/manager.rs`'s `exec()` for the
//! `Bash` handler's timeout/output-cap discipline.

pub mod bash;
pub mod executor;
pub mod facades;
pub mod memory;

pub use executor::{ToolExecError, ToolExecutor, VALID_TOOLS};
pub use facades::{BrowserFacade, GatewayFacade};
pub use memory::{InMemoryMemoryStore, MemoryHit, MemoryStore};

use serde::Serialize;
use serde_json::Value;

/// Structured result returned by every tool handler (spec §4.4: "never
/// throw across the boundary").
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(flatten)]
    pub data: Value,
}

impl ToolResult {
    pub fn success(data: Value) -> Self {
        let mut data = data;
        if !data.is_object() {
            data = serde_json::json!({ "output": data });
        }
        Self {
            success: true,
            data,
        }
    }

    pub fn success_text(text: impl Into<String>) -> Self {
        Self::success(serde_json::json!({ "output": text.into() }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::json!({ "error": message.into() }),
        }
    }

    pub fn to_content_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"success\":false}".to_string())
    }
}

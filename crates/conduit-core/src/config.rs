//! Layered configuration, grounded on `skynet_core::config::SkynetConfig`:
//! a TOML file merged with `CONDUIT_`-prefixed environment overrides.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const PROTOCOL_VERSION: u32 = 1;

fn default_session_timeout_ms() -> u64 {
    30 * 60 * 1000
}
fn default_max_sessions() -> usize {
    100
}
fn default_cleanup_interval_ms() -> u64 {
    5 * 60 * 1000
}
fn default_context_threshold_tokens() -> u64 {
    160_000
}
fn default_context_warning_fraction() -> f64 {
    0.90
}
fn default_default_class_concurrency() -> usize {
    8
}
fn default_cron_class_concurrency() -> usize {
    2
}
fn default_request_timeout_ms() -> u64 {
    120_000
}
fn default_mcp_init_timeout_ms() -> u64 {
    60_000
}
fn default_mcp_tool_call_timeout_ms() -> u64 {
    15 * 60 * 1000
}
fn default_max_turns() -> u32 {
    20
}
fn default_max_consecutive_same_tool() -> u32 {
    15
}
fn default_max_bash_output_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_bash_timeout_secs() -> u64 {
    60
}
fn default_stop_continuation_max_retries() -> u32 {
    3
}
fn default_continuation_min_chars() -> usize {
    1800
}
fn default_warn_chars() -> usize {
    15_000
}
fn default_truncate_chars() -> usize {
    25_000
}
fn default_hard_chars() -> usize {
    40_000
}
fn default_agent_home() -> String {
    "~/.conduit".to_string()
}
fn default_contract_save_limit() -> usize {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPoolConfig {
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_context_threshold_tokens")]
    pub context_threshold_tokens: u64,
    #[serde(default = "default_context_warning_fraction")]
    pub context_warning_fraction: f64,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
            max_sessions: default_max_sessions(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            context_threshold_tokens: default_context_threshold_tokens(),
            context_warning_fraction: default_context_warning_fraction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    #[serde(default = "default_default_class_concurrency")]
    pub default_class_concurrency: usize,
    #[serde(default = "default_cron_class_concurrency")]
    pub cron_class_concurrency: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            default_class_concurrency: default_default_class_concurrency(),
            cron_class_concurrency: default_cron_class_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubprocessConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_mcp_init_timeout_ms")]
    pub mcp_init_timeout_ms: u64,
    #[serde(default = "default_mcp_tool_call_timeout_ms")]
    pub mcp_tool_call_timeout_ms: u64,
    /// Override for locating the CLI binary; falls back to searching PATH
    /// then known install paths when unset.
    pub command_override: Option<String>,
    #[serde(default)]
    pub dangerously_skip_permissions: bool,
    pub model_override: Option<String>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            mcp_init_timeout_ms: default_mcp_init_timeout_ms(),
            mcp_tool_call_timeout_ms: default_mcp_tool_call_timeout_ms(),
            command_override: None,
            dangerously_skip_permissions: false,
            model_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    #[serde(default = "default_max_consecutive_same_tool")]
    pub max_consecutive_same_tool: u32,
    #[serde(default = "default_stop_continuation_max_retries")]
    pub stop_continuation_max_retries: u32,
    #[serde(default = "default_continuation_min_chars")]
    pub continuation_min_chars: usize,
    #[serde(default = "default_true")]
    pub lanes_enabled: bool,
    #[serde(default = "default_true")]
    pub pre_compact_enabled: bool,
    #[serde(default = "default_true")]
    pub stop_continuation_enabled: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_consecutive_same_tool: default_max_consecutive_same_tool(),
            stop_continuation_max_retries: default_stop_continuation_max_retries(),
            continuation_min_chars: default_continuation_min_chars(),
            lanes_enabled: true,
            pre_compact_enabled: true,
            stop_continuation_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBudgetConfig {
    #[serde(default = "default_warn_chars")]
    pub warn_chars: usize,
    #[serde(default = "default_truncate_chars")]
    pub truncate_chars: usize,
    #[serde(default = "default_hard_chars")]
    pub hard_chars: usize,
}

impl Default for PromptBudgetConfig {
    fn default() -> Self {
        Self {
            warn_chars: default_warn_chars(),
            truncate_chars: default_truncate_chars(),
            hard_chars: default_hard_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_agent_home")]
    pub agent_home: String,
    #[serde(default = "default_max_bash_output_bytes")]
    pub max_bash_output_bytes: usize,
    #[serde(default = "default_bash_timeout_secs")]
    pub bash_timeout_secs: u64,
    #[serde(default = "default_contract_save_limit")]
    pub contract_save_limit: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            agent_home: default_agent_home(),
            max_bash_output_bytes: default_max_bash_output_bytes(),
            bash_timeout_secs: default_bash_timeout_secs(),
            contract_save_limit: default_contract_save_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConduitConfig {
    #[serde(default)]
    pub sessions: SessionPoolConfig,
    #[serde(default)]
    pub lanes: LaneConfig,
    #[serde(default)]
    pub subprocess: SubprocessConfig,
    #[serde(default, rename = "loop")]
    pub loop_: LoopConfig,
    #[serde(default)]
    pub prompt_budget: PromptBudgetConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_config_path() -> String {
    std::env::var("CONDUIT_CONFIG").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.conduit/conduit.toml")
    })
}

impl ConduitConfig {
    /// Load from an explicit path, else `CONDUIT_CONFIG`, else
    /// `~/.conduit/conduit.toml`, merged with `CONDUIT_`-prefixed env vars.
    /// A missing file is not an error — `Figment` simply yields defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(str::to_string)
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONDUIT_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = ConduitConfig::default();
        assert_eq!(cfg.sessions.context_threshold_tokens, 160_000);
        assert_eq!(cfg.prompt_budget.warn_chars, 15_000);
        assert_eq!(cfg.prompt_budget.truncate_chars, 25_000);
        assert_eq!(cfg.prompt_budget.hard_chars, 40_000);
        assert_eq!(cfg.loop_.max_turns, 20);
        assert_eq!(cfg.loop_.max_consecutive_same_tool, 15);
        assert_eq!(cfg.subprocess.request_timeout_ms, 120_000);
        assert_eq!(cfg.subprocess.mcp_init_timeout_ms, 60_000);
    }
}

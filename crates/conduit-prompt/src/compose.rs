//! Prompt Composer (C12, spec §4.12). Grounded on
//! `skynet-agent/src/prompt.rs`'s `SystemPrompt`/`WorkspaceLoader`
//! (`KNOWN_FILES`, `MAX_FILE_CHARS`, bootstrap-marker-file gating),
//! generalized from a fixed 3-tier prompt to spec's 7-layer composition.

use std::path::Path;

use conduit_core::PromptLayer;

/// Known persona-fragment file names, loaded in this order if present —
/// mirrors `WorkspaceLoader::KNOWN_FILES`.
pub const PERSONA_FILES: &[&str] = &["SOUL.md", "IDENTITY.md", "AGENTS.md", "USER.md"];
pub const MAX_PERSONA_FILE_CHARS: usize = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolMode {
    /// Tool calls are parsed from fenced `tool_call` text blocks; the tool
    /// reference is injected as a full layer at priority 2.
    GatewayTools,
    /// Code-act variant: fenced `js`/`javascript` blocks are the tool call;
    /// only a compact type-definition summary is appended.
    CodeAct,
    /// Native protocol tool_use blocks (C9/MCP); no textual reference needed.
    Omitted,
}

pub struct ComposeInputs<'a> {
    pub base_identity: &'a str,
    pub persona_dir: Option<&'a Path>,
    pub agent_context_summary: &'a str,
    pub skills_catalog: &'a str,
    pub backend_agents_file: Option<&'a str>,
    pub tool_mode: ToolMode,
    pub tool_reference_text: &'a str,
    pub tool_reference_compact: &'a str,
    pub onboarding_text: Option<&'a str>,
}

pub struct PromptComposer;

impl PromptComposer {
    /// Load persona fragments from `PERSONA_FILES` under `dir`, in order,
    /// each capped at `MAX_PERSONA_FILE_CHARS`, concatenated with
    /// `## <name>` headers. Missing files are skipped silently.
    pub fn load_persona(dir: &Path) -> String {
        let mut sections = Vec::new();
        for name in PERSONA_FILES {
            let path = dir.join(name);
            if let Ok(contents) = std::fs::read_to_string(&path) {
                let truncated: String = contents.chars().take(MAX_PERSONA_FILE_CHARS).collect();
                sections.push(format!("## {name}\n\n{truncated}"));
            }
        }
        sections.join("\n\n")
    }

    /// Onboarding content is included only if a `.first-run` marker exists
    /// next to `dir`.
    pub fn onboarding_enabled(dir: &Path) -> bool {
        dir.join(".first-run").exists()
    }

    /// Compose the seven layers of spec §4.12. Empty-content layers are
    /// dropped before returning.
    pub fn compose(inputs: &ComposeInputs<'_>) -> Vec<PromptLayer> {
        let persona = inputs
            .persona_dir
            .map(Self::load_persona)
            .unwrap_or_default();

        let tool_layer = match inputs.tool_mode {
            ToolMode::GatewayTools => Some(PromptLayer::new(
                "tool_reference",
                inputs.tool_reference_text,
                2,
            )),
            ToolMode::CodeAct => Some(PromptLayer::new(
                "tool_reference_compact",
                inputs.tool_reference_compact,
                2,
            )),
            ToolMode::Omitted => None,
        };

        let mut layers = vec![
            PromptLayer::new("base_identity", inputs.base_identity, 1),
            PromptLayer::new("persona", persona, 2),
            PromptLayer::new("role_context", inputs.agent_context_summary, 3),
            PromptLayer::new("skills_catalog", inputs.skills_catalog, 3),
            PromptLayer::new(
                "backend_agents_file",
                inputs.backend_agents_file.unwrap_or_default(),
                2,
            ),
        ];
        if let Some(tool_layer) = tool_layer {
            layers.push(tool_layer);
        }
        layers.push(PromptLayer::new(
            "onboarding",
            inputs.onboarding_text.unwrap_or_default(),
            4,
        ));

        layers.retain(|l| !l.content.is_empty());
        layers
    }

    /// Concatenate composed layers into the flat system-prompt text sent
    /// to the subprocess (after `conduit_prompt::enforce` has run).
    pub fn to_plain_text(layers: &[PromptLayer]) -> String {
        layers
            .iter()
            .map(|l| l.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_layers_are_dropped() {
        let inputs = ComposeInputs {
            base_identity: "You are Conduit.",
            persona_dir: None,
            agent_context_summary: "",
            skills_catalog: "",
            backend_agents_file: None,
            tool_mode: ToolMode::Omitted,
            tool_reference_text: "",
            tool_reference_compact: "",
            onboarding_text: None,
        };
        let layers = PromptComposer::compose(&inputs);
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].name, "base_identity");
    }

    #[test]
    fn gateway_tools_mode_includes_full_reference() {
        let inputs = ComposeInputs {
            base_identity: "base",
            persona_dir: None,
            agent_context_summary: "ctx",
            skills_catalog: "skills",
            backend_agents_file: None,
            tool_mode: ToolMode::GatewayTools,
            tool_reference_text: "full tool docs",
            tool_reference_compact: "compact",
            onboarding_text: None,
        };
        let layers = PromptComposer::compose(&inputs);
        let tool = layers.iter().find(|l| l.name == "tool_reference").unwrap();
        assert_eq!(tool.content, "full tool docs");
        assert_eq!(tool.priority, 2);
    }

    #[test]
    fn code_act_mode_includes_compact_reference_only() {
        let inputs = ComposeInputs {
            base_identity: "base",
            persona_dir: None,
            agent_context_summary: "",
            skills_catalog: "",
            backend_agents_file: None,
            tool_mode: ToolMode::CodeAct,
            tool_reference_text: "full tool docs",
            tool_reference_compact: "compact",
            onboarding_text: None,
        };
        let layers = PromptComposer::compose(&inputs);
        assert!(layers.iter().any(|l| l.name == "tool_reference_compact" && l.content == "compact"));
        assert!(!layers.iter().any(|l| l.name == "tool_reference"));
    }
}

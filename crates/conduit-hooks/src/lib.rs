//! Cross-cutting Handlers (C5, spec §4.5). Grounded on
//! `skynet-hooks/src/{engine.rs,types.rs}`'s `HookEngine`/`HookTiming`
//! (`Before` blocking vs `After` fire-and-forget) generalized to the four
//! spec-specific hook points, and on `skynet-agent/src/pipeline/compact.rs`
//! for the "spawn a fire-and-forget background task, swallow errors" shape.

pub mod compaction;
pub mod contract;
pub mod continuation;
pub mod pre_tool_lookup;

pub use compaction::{compaction_prompt, CompactionState};
pub use continuation::{decide_continuation, ChannelContinuationState, ContinuationDecision};
pub use pre_tool_lookup::pre_tool_contract_lookup;

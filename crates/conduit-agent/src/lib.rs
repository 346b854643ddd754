//! Agent Loop (C11, spec §4.11). Composes the session pool (C6), lane
//! scheduler (C7), subprocess drivers (C8/C9 via `conduit-process`'s
//! `TurnDriver`), tool executor (C4), and cross-cutting hooks (C5) into the
//! turn-by-turn driver for one request.

pub mod loop_;
pub mod response;

pub use loop_::{AgentLoop, LoopOutcome, ResponseMode, RunOptions};
pub use response::{extract_gateway_tool_calls, render_outgoing_text};

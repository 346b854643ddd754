//! Wire framing for the two persistent-subprocess flavours (spec §6).

pub mod mcp;
pub mod stream_json;

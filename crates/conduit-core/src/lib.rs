pub mod config;
pub mod error;
pub mod types;

pub use config::ConduitConfig;
pub use error::{CoreError, ErrorCode};
pub use types::*;

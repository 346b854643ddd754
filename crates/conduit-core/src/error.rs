//! Exit-visible error codes (spec §6) and the top-level core error type.

/// Error codes surfaced by the agent loop (spec §6, exhaustive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ApiError,
    CliError,
    AuthError,
    RateLimit,
    MaxTokens,
    MaxTurns,
    EmergencyMaxTurns,
    InfiniteLoopDetected,
    NetworkError,
    ToolError,
    UnknownTool,
    InvalidResponse,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ApiError => "API_ERROR",
            ErrorCode::CliError => "CLI_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::RateLimit => "RATE_LIMIT",
            ErrorCode::MaxTokens => "MAX_TOKENS",
            ErrorCode::MaxTurns => "MAX_TURNS",
            ErrorCode::EmergencyMaxTurns => "EMERGENCY_MAX_TURNS",
            ErrorCode::InfiniteLoopDetected => "INFINITE_LOOP_DETECTED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ToolError => "TOOL_ERROR",
            ErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ErrorCode::InvalidResponse => "INVALID_RESPONSE",
        }
    }

    /// Whether a caller may retry the same request unchanged (spec §6/§7).
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ApiError | ErrorCode::CliError | ErrorCode::RateLimit | ErrorCode::NetworkError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{code}: {message}")]
    Classified { code: ErrorCode, message: String },
}

impl CoreError {
    pub fn classified(code: ErrorCode, message: impl Into<String>) -> Self {
        CoreError::Classified {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::Classified { code, .. } => code.as_str(),
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            CoreError::Config(_) => false,
            CoreError::Classified { code, .. } => code.retryable(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

// src/summary/types.rs
// Generation errors

/// Text generation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Authentication failed")]
    AuthenticationError,

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Empty response from generation service")]
    EmptyResponse,

    #[error("Invalid response from generation service: {0}")]
    InvalidResponse(String),
}

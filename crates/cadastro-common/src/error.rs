//! Error types shared by the cadastro crates

use thiserror::Error;

/// Result type alias for cadastro operations
pub type Result<T> = std::result::Result<T, CadastroError>;

/// Main error type for cadastro
#[derive(Error, Debug)]
pub enum CadastroError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl CadastroError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

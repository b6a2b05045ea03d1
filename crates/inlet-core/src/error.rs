use thiserror::Error;

#[derive(Debug, Error)]
pub enum InletError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl InletError {
    /// Short error code string used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            InletError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, InletError>;

use inlet_ingest::IngestError;

/// Errors produced by the Telegram boundary.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    /// The webhook body is not a Telegram update.
    #[error("malformed update: {0}")]
    Malformed(String),

    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("no bot token configured")]
    NoToken,
}

impl From<TelegramError> for IngestError {
    fn from(e: TelegramError) -> Self {
        IngestError::MalformedEnvelope(e.to_string())
    }
}

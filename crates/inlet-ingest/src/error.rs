use thiserror::Error;

/// Errors raised while turning an inbound request into an envelope.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The body could not be decoded or lacks a required field.
    /// Never enters buffering; the transport answers 400.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::MalformedEnvelope(_) => "MALFORMED_ENVELOPE",
        }
    }
}

/// Failure reported by a [`Dispatcher`](crate::Dispatcher).
///
/// Any dispatch failure leaves the affected update ids uncommitted so the
/// platform may deliver them again.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch failed: {0}")]
    Failed(String),

    #[error("dispatch timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("downstream rejected the message with status {status}")]
    Rejected { status: u16 },
}

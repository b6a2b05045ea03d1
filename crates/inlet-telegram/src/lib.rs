//! Telegram boundary: webhook wire format, normalization into
//! [`TransportEnvelope`](inlet_ingest::TransportEnvelope), and the
//! best-effort overflow notice sent back to senders.

pub mod error;
pub mod normalize;
pub mod notify;
pub mod update;

pub use error::TelegramError;
pub use normalize::{normalize, normalize_body, Normalized};
pub use notify::{OverflowNotice, OverflowNotifier};
pub use update::Update;

pub mod config;
pub mod error;
pub mod types;

pub use config::InletConfig;
pub use error::{InletError, Result};
pub use types::{ConversationId, SenderId, UpdateId};

//! Tells a sender how many of their messages were dropped from a full burst.
//!
//! Notices are best-effort: a failure or timeout is logged and never affects
//! the dispatch outcome of the unit that triggered it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::requests::Request;
use tracing::{debug, warn};

use inlet_core::config::TelegramConfig;
use inlet_ingest::{CombinedMessage, DispatchError, Dispatcher};

use crate::error::TelegramError;

const NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends overflow notices through the Bot API.
#[derive(Clone)]
pub struct OverflowNotifier {
    bot: Bot,
    timeout: Duration,
}

impl OverflowNotifier {
    pub fn new(token: &str) -> Result<Self, TelegramError> {
        if token.trim().is_empty() {
            return Err(TelegramError::NoToken);
        }
        Ok(Self {
            bot: Bot::new(token),
            timeout: NOTICE_TIMEOUT,
        })
    }

    /// `None` when notices are switched off.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<Self>, TelegramError> {
        if !config.notify_overflow {
            return Ok(None);
        }
        Self::new(&config.bot_token).map(Some)
    }

    /// Text of the notice for `dropped` skipped messages.
    pub fn notice_text(dropped: usize) -> String {
        if dropped == 1 {
            "1 message arrived while I was still collecting your previous ones and was skipped. \
             Please send it again if it matters."
                .to_string()
        } else {
            format!(
                "{dropped} messages arrived while I was still collecting your previous ones and \
                 were skipped. Please send them again if they matter."
            )
        }
    }

    pub async fn send(&self, message: &CombinedMessage) -> Result<(), TelegramError> {
        let chat_id = ChatId(message.conversation_id.0);
        let request = self
            .bot
            .send_message(chat_id, Self::notice_text(message.overflow_count))
            .send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map(|_| ()).map_err(TelegramError::from),
            Err(_) => Err(TelegramError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

/// Dispatcher wrapper that sends an overflow notice after every successful
/// dispatch of a unit with dropped messages.
pub struct OverflowNotice {
    inner: Arc<dyn Dispatcher>,
    notifier: OverflowNotifier,
}

impl OverflowNotice {
    pub fn new(inner: Arc<dyn Dispatcher>, notifier: OverflowNotifier) -> Self {
        Self { inner, notifier }
    }
}

#[async_trait]
impl Dispatcher for OverflowNotice {
    async fn dispatch(&self, message: &CombinedMessage) -> Result<(), DispatchError> {
        self.inner.dispatch(message).await?;

        if message.overflow_count > 0 {
            let notifier = self.notifier.clone();
            let message = message.clone();
            tokio::spawn(async move {
                match notifier.send(&message).await {
                    Ok(()) => debug!(
                        conversation = %message.conversation_id,
                        overflow = message.overflow_count,
                        "overflow notice sent"
                    ),
                    Err(e) => warn!(
                        conversation = %message.conversation_id,
                        error = %e,
                        "overflow notice failed"
                    ),
                }
            });
        }
        Ok(())
    }
}

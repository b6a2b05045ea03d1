//! Production dispatchers: forward each unit over HTTP, or just log it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use inlet_core::InletConfig;
use inlet_ingest::{CombinedMessage, DispatchError, Dispatcher};
use inlet_telegram::{OverflowNotice, OverflowNotifier};

/// POSTs every [`CombinedMessage`] as JSON to a downstream service.
pub struct ForwardDispatcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ForwardDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl Dispatcher for ForwardDispatcher {
    async fn dispatch(&self, message: &CombinedMessage) -> Result<(), DispatchError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout {
                        ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    DispatchError::Failed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Records a one-line summary of each unit. Used when no downstream is set.
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, message: &CombinedMessage) -> Result<(), DispatchError> {
        info!(
            unit = %message.id,
            conversation = %message.conversation_id,
            sender = %message.sender_id,
            messages = message.len(),
            command = ?message.command,
            overflow = message.overflow_count,
            chars = message.text.chars().count(),
            "unit ready"
        );
        Ok(())
    }
}

/// Pick the dispatcher for this config, wrapped with overflow notices when a
/// Telegram bot token is available.
pub fn build_dispatcher(config: &InletConfig) -> anyhow::Result<Arc<dyn Dispatcher>> {
    let base: Arc<dyn Dispatcher> = match &config.dispatch.forward_url {
        Some(url) => {
            info!(url = %url, "forwarding units over HTTP");
            Arc::new(ForwardDispatcher::new(
                url.clone(),
                Duration::from_secs(config.dispatch.timeout_secs),
            )?)
        }
        None => {
            info!("no forward_url configured; units are logged only");
            Arc::new(LogDispatcher)
        }
    };

    let Some(telegram) = &config.telegram else {
        return Ok(base);
    };
    match OverflowNotifier::from_config(telegram) {
        Ok(Some(notifier)) => Ok(Arc::new(OverflowNotice::new(base, notifier))),
        Ok(None) => Ok(base),
        Err(e) => {
            warn!(error = %e, "overflow notices disabled");
            Ok(base)
        }
    }
}

//! Seams to downstream handling, and the delivery step that ties a
//! dispatch outcome back to deduplication and admission.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use inlet_core::types::{ConversationId, UpdateId};

use crate::admission::AdmissionPermit;
use crate::combined::CombinedMessage;
use crate::dedup::UpdateDeduplicator;
use crate::error::DispatchError;

/// Consumer of finished units.
///
/// Implementations report failure through the returned error; they should not
/// panic for control flow. A panic is still contained and treated as a failed
/// dispatch.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(&self, message: &CombinedMessage) -> Result<(), DispatchError>;
}

/// Optional lookup used to fill in the text of a replied-to message that the
/// platform did not include. Called under a timeout during flush.
#[async_trait]
pub trait ReplyLookup: Send + Sync + 'static {
    async fn reply_text(
        &self,
        conversation_id: ConversationId,
        message_id: i64,
    ) -> Result<Option<String>, DispatchError>;
}

/// What a unit holds on to until its dispatch completes.
#[derive(Debug, Default)]
pub(crate) struct DeliveryTicket {
    /// Ids to commit once the outcome is known, overflowed ones included.
    pub update_ids: Vec<UpdateId>,
    /// Admission slots released when the ticket is dropped.
    pub permits: Vec<AdmissionPermit>,
}

/// Run `dispatcher` on `message` in its own task, then commit every id on the
/// ticket according to the outcome and release the admission slots.
///
/// Returns whether the dispatch succeeded.
pub(crate) async fn deliver(
    dispatcher: &Arc<dyn Dispatcher>,
    dedup: &UpdateDeduplicator,
    message: CombinedMessage,
    ticket: DeliveryTicket,
) -> bool {
    let unit_id = message.id;
    let dispatcher = Arc::clone(dispatcher);
    let outcome = tokio::spawn(async move { dispatcher.dispatch(&message).await }).await;

    let success = match outcome {
        Ok(Ok(())) => {
            debug!(unit = %unit_id, updates = ticket.update_ids.len(), "dispatch completed");
            true
        }
        Ok(Err(e)) => {
            warn!(
                unit = %unit_id,
                update_ids = ?ticket.update_ids,
                error = %e,
                "dispatch failed; updates left eligible for retry"
            );
            false
        }
        Err(join_err) => {
            error!(
                unit = %unit_id,
                update_ids = ?ticket.update_ids,
                error = %join_err,
                "dispatcher panicked; updates left eligible for retry"
            );
            false
        }
    };

    for id in &ticket.update_ids {
        dedup.commit(*id, success);
    }
    drop(ticket);
    success
}

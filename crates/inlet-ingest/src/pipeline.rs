//! The owned pipeline object: admission → rate limit → dedup → buffer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use inlet_core::InletConfig;

use crate::admission::AdmissionGate;
use crate::buffer::{BufferSettings, MessageBuffer, Submission};
use crate::dedup::{Admission, UpdateDeduplicator};
use crate::dispatch::{Dispatcher, ReplyLookup};
use crate::envelope::TransportEnvelope;
use crate::ratelimit::UserRateLimiter;

/// How [`Pipeline::ingest`] disposed of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Buffered or dispatched; the pipeline now owns it.
    Accepted,
    /// Admission gate saturated. Nothing was recorded.
    Busy,
    RateLimited,
    Duplicate,
    InProgress,
}

impl IngestOutcome {
    /// Short note for the transport response, if the update was short-circuited.
    pub fn note(self) -> Option<&'static str> {
        match self {
            Self::Accepted | Self::Busy => None,
            Self::RateLimited => Some("rate_limited"),
            Self::Duplicate => Some("duplicate"),
            Self::InProgress => Some("in_progress"),
        }
    }
}

/// Point-in-time counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub capacity: usize,
    pub in_flight: usize,
    pub buffered_conversations: usize,
    pub tracked_updates: usize,
    pub pending_updates: usize,
    pub tracked_senders: usize,
}

/// All ingestion state for one process. Share it behind an `Arc`.
pub struct Pipeline {
    gate: AdmissionGate,
    rate_limiter: UserRateLimiter,
    dedup: Arc<UpdateDeduplicator>,
    buffer: MessageBuffer,
}

impl Pipeline {
    pub fn new(
        gate: AdmissionGate,
        rate_limiter: UserRateLimiter,
        dedup: Arc<UpdateDeduplicator>,
        buffer: MessageBuffer,
    ) -> Self {
        Self {
            gate,
            rate_limiter,
            dedup,
            buffer,
        }
    }

    pub fn from_config(
        config: &InletConfig,
        dispatcher: Arc<dyn Dispatcher>,
        reply_lookup: Option<Arc<dyn ReplyLookup>>,
    ) -> Self {
        let dedup = Arc::new(UpdateDeduplicator::from_config(&config.dedup));
        let buffer = MessageBuffer::new(
            BufferSettings::from_config(&config.buffer),
            dispatcher,
            Arc::clone(&dedup),
            reply_lookup,
        );
        Self::new(
            AdmissionGate::new(config.admission.max_concurrent),
            UserRateLimiter::from_config(&config.rate_limit),
            dedup,
            buffer,
        )
    }

    /// Run one normalized envelope through every stage.
    ///
    /// Never blocks: a saturated gate answers `Busy` instead of queueing.
    /// Must be called from within a tokio runtime.
    pub fn ingest(&self, envelope: TransportEnvelope) -> IngestOutcome {
        let update_id = envelope.update_id;

        let Some(permit) = self.gate.try_enter() else {
            warn!(
                update_id = %update_id,
                capacity = self.gate.capacity(),
                "admission gate saturated"
            );
            return IngestOutcome::Busy;
        };

        if !self.rate_limiter.allow(envelope.sender_id) {
            info!(update_id = %update_id, sender = %envelope.sender_id, "sender rate limited");
            return IngestOutcome::RateLimited;
        }

        match self.dedup.admit(update_id) {
            Admission::New => {}
            Admission::Duplicate => {
                debug!(update_id = %update_id, "duplicate update");
                return IngestOutcome::Duplicate;
            }
            Admission::InProgress => {
                debug!(update_id = %update_id, "update already in progress");
                return IngestOutcome::InProgress;
            }
        }

        match self.buffer.submit(envelope, permit) {
            Submission::NotBuffered(envelope, permit) => {
                self.buffer.dispatch_unbuffered(envelope, permit);
            }
            Submission::Overflow => {
                debug!(update_id = %update_id, "accepted into overflow count");
            }
            Submission::Buffered | Submission::Flushing => {}
        }
        IngestOutcome::Accepted
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            capacity: self.gate.capacity(),
            in_flight: self.gate.in_flight(),
            buffered_conversations: self.buffer.len(),
            tracked_updates: self.dedup.tracked(),
            pending_updates: self.dedup.in_flight(),
            tracked_senders: self.rate_limiter.tracked(),
        }
    }

    /// Flush bursts whose debounce timer was lost. Run periodically so a
    /// stream that never writes again still gets dispatched.
    pub fn sweep(&self) -> usize {
        self.buffer.recover_orphans()
    }

    /// Flush every buffered burst and wait up to `grace` for in-flight
    /// dispatches, the flushed ones included. Returns `true` if everything
    /// finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let flushed = self.buffer.flush_all();
        info!(flushed, "flushed buffered conversations");

        let drained = self.gate.drain(grace).await;
        if drained {
            info!("all dispatches finished");
        } else {
            warn!(
                in_flight = self.gate.in_flight(),
                grace_secs = grace.as_secs(),
                "shutdown grace elapsed with dispatches still running"
            );
        }
        drained
    }
}

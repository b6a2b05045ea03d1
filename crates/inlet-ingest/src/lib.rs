//! Admission, deduplication, rate limiting and burst buffering for inbound
//! chat webhook events.
//!
//! The [`Pipeline`] owns every stage. A transport layer normalizes its wire
//! format into a [`TransportEnvelope`] and hands it to [`Pipeline::ingest`];
//! finished bursts reach the [`Dispatcher`] as a [`CombinedMessage`].

pub mod admission;
pub mod buffer;
pub mod combined;
pub mod dedup;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod pairing;
pub mod pipeline;
pub mod ratelimit;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use buffer::{BufferKey, MessageBuffer, Submission};
pub use combined::CombinedMessage;
pub use dedup::{Admission, UpdateDeduplicator};
pub use dispatch::{Dispatcher, ReplyLookup};
pub use envelope::{EnvelopeKind, Payload, ReplyTarget, TransportEnvelope};
pub use error::{DispatchError, IngestError};
pub use pairing::LinkCommentPair;
pub use pipeline::{IngestOutcome, Pipeline, PipelineStats};
pub use ratelimit::UserRateLimiter;

//! Per-conversation debounce buffer.
//!
//! Each (conversation, sender) stream has at most one live [`BufferEntry`].
//! Every arrival resets the idle timer; a burst is flushed after
//! `debounce` of silence, or immediately once it holds `max_messages`
//! envelopes or `max_wait` has passed since its first envelope.
//!
//! Flushing is a single atomic removal from the live map. Whoever removes the
//! entry (a timer, a forced flush, shutdown) owns it and dispatches it; every
//! other caller finds the key gone and does nothing. Timers carry the
//! generation they were armed for, so a superseded timer can never remove a
//! newer burst.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use inlet_core::config::BufferConfig;
use inlet_core::types::{ConversationId, SenderId, UpdateId};

use crate::admission::AdmissionPermit;
use crate::combined::CombinedMessage;
use crate::dedup::UpdateDeduplicator;
use crate::dispatch::{self, DeliveryTicket, Dispatcher, ReplyLookup};
use crate::envelope::{normalize_command, TransportEnvelope};

/// Identity of one accumulation stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferKey {
    pub conversation_id: ConversationId,
    pub sender_id: SenderId,
}

impl BufferKey {
    pub fn of(envelope: &TransportEnvelope) -> Self {
        Self {
            conversation_id: envelope.conversation_id,
            sender_id: envelope.sender_id,
        }
    }
}

impl fmt::Display for BufferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.conversation_id, self.sender_id)
    }
}

/// What [`MessageBuffer::submit`] did with an envelope.
#[derive(Debug)]
pub enum Submission {
    /// Appended; the debounce timer was (re)armed.
    Buffered,
    /// Appended; the burst hit a hard limit and its flush is already scheduled.
    Flushing,
    /// The burst was full. The envelope was dropped and counted.
    Overflow,
    /// A bypass command. The caller dispatches it on its own.
    NotBuffered(TransportEnvelope, AdmissionPermit),
}

/// Tunables for [`MessageBuffer`].
#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub debounce: Duration,
    pub max_messages: usize,
    pub max_wait: Duration,
    pub reply_lookup_timeout: Duration,
    pub bypass_commands: HashSet<String>,
    pub priority_commands: HashSet<String>,
}

impl BufferSettings {
    pub fn from_config(config: &BufferConfig) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            max_messages: config.max_messages.max(1),
            max_wait: Duration::from_millis(config.max_wait_ms),
            reply_lookup_timeout: Duration::from_millis(config.reply_lookup_timeout_ms),
            bypass_commands: config.bypass_commands.iter().map(|c| normalize_command(c)).collect(),
            priority_commands: config
                .priority_commands
                .iter()
                .map(|c| normalize_command(c))
                .collect(),
        }
    }
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self::from_config(&BufferConfig::default())
    }
}

struct Pending {
    seq: u64,
    envelope: TransportEnvelope,
    permit: AdmissionPermit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Accumulating,
    /// A zero-delay flush is scheduled; arrivals can no longer postpone it.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushOrigin {
    /// The entry's own timer task; it must not abort itself.
    Timer,
    Forced,
}

struct BufferEntry {
    /// Priority command waiting for follow-up context.
    head: Option<Pending>,
    pending: Vec<Pending>,
    first_message_at: Instant,
    state: EntryState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    media_group_ids: Vec<String>,
    overflow: Vec<UpdateId>,
}

impl BufferEntry {
    fn new(now: Instant) -> Self {
        Self {
            head: None,
            pending: Vec::new(),
            first_message_at: now,
            state: EntryState::Accumulating,
            generation: 0,
            timer: None,
            media_group_ids: Vec::new(),
            overflow: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.pending.len() + usize::from(self.head.is_some())
    }

    fn push(&mut self, item: Pending, at_head: bool) {
        if let Some(group) = &item.envelope.payload.media_group_id {
            if !self.media_group_ids.contains(group) {
                self.media_group_ids.push(group.clone());
            }
        }
        if at_head && self.head.is_none() {
            self.head = Some(item);
        } else {
            self.pending.push(item);
        }
    }

    /// The timer finished without removing the entry (it panicked or was
    /// cancelled), so nothing will ever flush it on its own.
    fn is_orphaned(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| t.is_finished())
    }
}

struct BufferInner {
    entries: DashMap<BufferKey, BufferEntry>,
    settings: BufferSettings,
    dispatcher: Arc<dyn Dispatcher>,
    dedup: Arc<UpdateDeduplicator>,
    reply_lookup: Option<Arc<dyn ReplyLookup>>,
    next_seq: AtomicU64,
    next_generation: AtomicU64,
}

/// Debounce/accumulate/flush engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MessageBuffer {
    inner: Arc<BufferInner>,
}

impl MessageBuffer {
    pub fn new(
        settings: BufferSettings,
        dispatcher: Arc<dyn Dispatcher>,
        dedup: Arc<UpdateDeduplicator>,
        reply_lookup: Option<Arc<dyn ReplyLookup>>,
    ) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                entries: DashMap::new(),
                settings,
                dispatcher,
                dedup,
                reply_lookup,
                next_seq: AtomicU64::new(0),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Add an envelope to its stream's burst.
    ///
    /// Must be called from within a tokio runtime: timers are spawned tasks.
    pub fn submit(&self, envelope: TransportEnvelope, permit: AdmissionPermit) -> Submission {
        let settings = &self.inner.settings;
        let command = envelope.command_name();
        if command
            .as_ref()
            .is_some_and(|name| settings.bypass_commands.contains(name))
        {
            return Submission::NotBuffered(envelope, permit);
        }
        let priority = command
            .as_ref()
            .is_some_and(|name| settings.priority_commands.contains(name));

        let key = BufferKey::of(&envelope);
        let item = Pending {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            envelope,
            permit,
        };
        let now = Instant::now();
        let mut displaced = None;

        let submission = match self.inner.entries.entry(key) {
            Entry::Vacant(slot) => {
                let mut entry = BufferEntry::new(now);
                entry.push(item, priority);
                let submission = self.inner.arm(key, &mut entry, now);
                slot.insert(entry);
                submission
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                if entry.is_orphaned() {
                    warn!(key = %key, "buffer entry lost its timer; flushing it now");
                    entry.state = EntryState::Closing;
                    self.inner.reschedule(key, entry, Duration::ZERO);
                }

                if priority && entry.head.is_some() {
                    // A second priority command starts a burst of its own.
                    let mut fresh = BufferEntry::new(now);
                    fresh.push(item, true);
                    let submission = self.inner.arm(key, &mut fresh, now);
                    displaced = Some(std::mem::replace(entry, fresh));
                    submission
                } else if entry.len() >= settings.max_messages {
                    entry.overflow.push(item.envelope.update_id);
                    debug!(
                        key = %key,
                        update_id = %item.envelope.update_id,
                        overflow = entry.overflow.len(),
                        "buffer full; message dropped"
                    );
                    Submission::Overflow
                } else {
                    entry.push(item, priority);
                    self.inner.arm(key, entry, now)
                }
            }
        };

        if let Some(old) = displaced {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.process(key, old, FlushOrigin::Forced).await });
        }

        submission
    }

    /// Flush `key` now. Returns `false` if there was nothing to flush, which
    /// includes losing the race to a concurrent flush of the same key.
    pub async fn flush(&self, key: BufferKey) -> bool {
        match self.inner.entries.remove(&key) {
            Some((_, entry)) => {
                self.inner.process(key, entry, FlushOrigin::Forced).await;
                true
            }
            None => false,
        }
    }

    /// Remove every live entry and start its dispatch in the background.
    /// Returns how many were taken by this call.
    ///
    /// Does not wait for the dispatches: their admission permits stay held
    /// until each one finishes, so `AdmissionGate::drain` is the place to wait.
    pub fn flush_all(&self) -> usize {
        let keys: Vec<BufferKey> = self.inner.entries.iter().map(|e| *e.key()).collect();
        let mut flushed = 0;
        for key in keys {
            if let Some((_, entry)) = self.inner.entries.remove(&key) {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.process(key, entry, FlushOrigin::Forced).await });
                flushed += 1;
            }
        }
        flushed
    }

    /// Schedule an immediate flush for every entry whose timer task ended
    /// without flushing it. Returns how many were found.
    pub fn recover_orphans(&self) -> usize {
        let mut recovered = 0;
        for mut slot in self.inner.entries.iter_mut() {
            let key = *slot.key();
            let entry = slot.value_mut();
            if entry.is_orphaned() {
                warn!(key = %key, "buffer entry lost its timer; flushing it now");
                entry.state = EntryState::Closing;
                self.inner.reschedule(key, entry, Duration::ZERO);
                recovered += 1;
            }
        }
        recovered
    }

    /// Dispatch a single envelope that skipped buffering, in the background.
    pub fn dispatch_unbuffered(&self, envelope: TransportEnvelope, permit: AdmissionPermit) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let ticket = DeliveryTicket {
                update_ids: vec![envelope.update_id],
                permits: vec![permit],
            };
            let message = CombinedMessage::single(envelope);
            info!(
                unit = %message.id,
                conversation = %message.conversation_id,
                command = ?message.command,
                "dispatching unbuffered command"
            );
            dispatch::deliver(&inner.dispatcher, &inner.dedup, message, ticket).await;
        });
    }

    /// Number of streams with a live burst.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl BufferInner {
    /// Decide when `entry` flushes after an arrival, and arm its timer.
    fn arm(self: &Arc<Self>, key: BufferKey, entry: &mut BufferEntry, now: Instant) -> Submission {
        if entry.state == EntryState::Closing {
            return Submission::Flushing;
        }

        let elapsed = now.saturating_duration_since(entry.first_message_at);
        if entry.len() >= self.settings.max_messages || elapsed >= self.settings.max_wait {
            debug!(key = %key, size = entry.len(), "buffer hit a hard limit; flushing");
            entry.state = EntryState::Closing;
            self.reschedule(key, entry, Duration::ZERO);
            return Submission::Flushing;
        }

        let delay = self.settings.debounce.min(self.settings.max_wait - elapsed);
        self.reschedule(key, entry, delay);
        Submission::Buffered
    }

    /// Cancel the entry's timer and arm a new one under a fresh generation.
    fn reschedule(self: &Arc<Self>, key: BufferKey, entry: &mut BufferEntry, delay: Duration) {
        if let Some(previous) = entry.timer.take() {
            previous.abort();
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entry.generation = generation;

        let inner = Arc::clone(self);
        entry.timer = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let removed = inner
                .entries
                .remove_if(&key, |_, e| e.generation == generation);
            match removed {
                Some((_, entry)) => inner.process(key, entry, FlushOrigin::Timer).await,
                None => debug!(key = %key, generation, "timer superseded; nothing to flush"),
            }
        }));
    }

    /// Turn a removed entry into a [`CombinedMessage`] and deliver it.
    async fn process(self: &Arc<Self>, key: BufferKey, mut entry: BufferEntry, origin: FlushOrigin) {
        if let Some(timer) = entry.timer.take() {
            if origin != FlushOrigin::Timer {
                timer.abort();
            }
        }

        let BufferEntry {
            head,
            mut pending,
            media_group_ids,
            overflow,
            ..
        } = entry;
        pending.sort_by_key(|p| p.seq);

        let mut ticket = DeliveryTicket::default();
        let mut envelopes = Vec::with_capacity(pending.len() + 1);
        for item in head.into_iter().chain(pending) {
            ticket.update_ids.push(item.envelope.update_id);
            ticket.permits.push(item.permit);
            envelopes.push(item.envelope);
        }
        let overflow_count = overflow.len();
        ticket.update_ids.extend(overflow);

        let mut message = CombinedMessage::assemble(envelopes, media_group_ids, overflow_count);
        self.enrich_reply(&mut message).await;

        info!(
            unit = %message.id,
            key = %key,
            messages = message.len(),
            overflow = overflow_count,
            "flushing buffered burst"
        );
        dispatch::deliver(&self.dispatcher, &self.dedup, message, ticket).await;
    }

    /// Fill in missing reply text from the lookup, within its time budget.
    /// Any failure leaves the message as it was.
    async fn enrich_reply(&self, message: &mut CombinedMessage) {
        let Some(lookup) = &self.reply_lookup else {
            return;
        };
        let Some(reply) = message.reply.as_mut() else {
            return;
        };
        if reply.text.is_some() {
            return;
        }

        let lookup = Arc::clone(lookup);
        let conversation_id = message.conversation_id;
        let message_id = reply.message_id;
        let mut task =
            tokio::spawn(async move { lookup.reply_text(conversation_id, message_id).await });

        let budget = self.settings.reply_lookup_timeout;
        match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(Ok(text))) => reply.text = text,
            Ok(Ok(Err(e))) => {
                warn!(message_id, error = %e, "reply lookup failed; continuing without it")
            }
            Ok(Err(join_err)) => {
                warn!(message_id, error = %join_err, "reply lookup panicked; continuing without it")
            }
            Err(_) => {
                task.abort();
                warn!(
                    message_id,
                    timeout_ms = budget.as_millis() as u64,
                    "reply lookup timed out; continuing without it"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::admission::AdmissionGate;
    use crate::dedup::Admission;
    use crate::envelope::{EnvelopeKind, ReplyTarget};
    use crate::error::DispatchError;

    #[derive(Default)]
    struct Recorder {
        units: Mutex<Vec<CombinedMessage>>,
        dispatched_at: Mutex<Vec<Instant>>,
        fail: bool,
    }

    #[async_trait]
    impl Dispatcher for Recorder {
        async fn dispatch(&self, message: &CombinedMessage) -> Result<(), DispatchError> {
            self.units.lock().unwrap().push(message.clone());
            self.dispatched_at.lock().unwrap().push(Instant::now());
            if self.fail {
                Err(DispatchError::Failed("downstream unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    impl Recorder {
        fn units(&self) -> Vec<CombinedMessage> {
            self.units.lock().unwrap().clone()
        }

        fn dispatched_at(&self) -> Vec<Instant> {
            self.dispatched_at.lock().unwrap().clone()
        }
    }

    struct Harness {
        buffer: MessageBuffer,
        recorder: Arc<Recorder>,
        dedup: Arc<UpdateDeduplicator>,
        gate: AdmissionGate,
    }

    impl Harness {
        fn submit(&self, envelope: TransportEnvelope) -> Submission {
            self.dedup.admit(envelope.update_id);
            let permit = self.gate.try_enter().expect("gate has room");
            self.buffer.submit(envelope, permit)
        }
    }

    fn settings(max_messages: usize) -> BufferSettings {
        BufferSettings {
            debounce: Duration::from_millis(500),
            max_messages,
            max_wait: Duration::from_secs(3),
            reply_lookup_timeout: Duration::from_millis(100),
            bypass_commands: ["help".to_string()].into_iter().collect(),
            priority_commands: ["ask".to_string()].into_iter().collect(),
        }
    }

    fn harness_with(
        settings: BufferSettings,
        recorder: Recorder,
        lookup: Option<Arc<dyn ReplyLookup>>,
    ) -> Harness {
        let recorder = Arc::new(recorder);
        let dedup = Arc::new(UpdateDeduplicator::new(1000, Duration::from_secs(3600)));
        let buffer = MessageBuffer::new(
            settings,
            Arc::clone(&recorder) as Arc<dyn Dispatcher>,
            Arc::clone(&dedup),
            lookup,
        );
        Harness {
            buffer,
            recorder,
            dedup,
            gate: AdmissionGate::new(100),
        }
    }

    fn harness(max_messages: usize) -> Harness {
        harness_with(settings(max_messages), Recorder::default(), None)
    }

    fn text(id: i64, body: &str) -> TransportEnvelope {
        TransportEnvelope::text(id, 7, 70, body)
    }

    fn key() -> BufferKey {
        BufferKey {
            conversation_id: ConversationId(70),
            sender_id: SenderId(7),
        }
    }

    /// Timer deadlines land on millisecond ticks.
    fn within(actual: Duration, expected: Duration) -> bool {
        actual >= expected && actual < expected + Duration::from_millis(5)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_debounce_becomes_one_unit() {
        let h = harness(10);
        for i in 1..=5 {
            assert!(matches!(h.submit(text(i, &format!("m{i}"))), Submission::Buffered));
        }
        settle(1000).await;

        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "m1\nm2\nm3\nm4\nm5");
        assert_eq!(units[0].len(), 5);
        assert!(h.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn every_arrival_resets_the_idle_clock() {
        let h = harness(10);
        h.submit(text(1, "a"));
        settle(400).await;
        h.submit(text(2, "b"));
        settle(400).await;
        assert!(h.recorder.units().is_empty());

        settle(200).await;
        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "a\nb");
    }

    #[tokio::test(start_paused = true)]
    async fn max_wait_forces_flush_under_steady_traffic() {
        let h = harness(100);
        let start = Instant::now();
        // One arrival every 400ms never lets the 500ms debounce go idle.
        for i in 1..=10 {
            h.submit(text(i, &format!("m{i}")));
            settle(400).await;
        }
        settle(1000).await;

        let units = h.recorder.units();
        let at = h.recorder.dispatched_at();
        assert_eq!(units.len(), 2, "steady traffic must not starve the flush");
        // Arrivals at 0ms..2800ms belong to the first burst, which closes at
        // the 3s ceiling while messages are still coming in.
        assert_eq!(units[0].len(), 8);
        assert!(within(at[0] - start, Duration::from_secs(3)), "flushed at {:?}", at[0] - start);
        assert_eq!(units[1].update_ids, vec![UpdateId(9), UpdateId(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn last_arrival_before_max_wait_is_not_held_past_it() {
        let mut settings = settings(10);
        settings.debounce = Duration::from_secs(2);
        let h = harness_with(settings, Recorder::default(), None);
        let start = Instant::now();

        h.submit(text(1, "a"));
        settle(1500).await;
        // A full debounce from here would end at 3.5s; the 3s ceiling wins.
        h.submit(text(2, "b"));

        settle(1400).await;
        assert!(h.recorder.units().is_empty());
        settle(200).await;

        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "a\nb");
        let elapsed = h.recorder.dispatched_at()[0] - start;
        assert!(within(elapsed, Duration::from_secs(3)), "flushed at {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_is_counted_not_dispatched() {
        let h = harness(5);
        let outcomes: Vec<Submission> = (1..=8).map(|i| h.submit(text(i, "x"))).collect();
        assert!(matches!(outcomes[4], Submission::Flushing));
        assert!(outcomes[5..].iter().all(|s| matches!(s, Submission::Overflow)));

        settle(10).await;
        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].len(), 5);
        assert_eq!(units[0].overflow_count, 3);

        // Overflowed updates are committed with the unit they were counted in.
        assert_eq!(h.dedup.admit(UpdateId(8)), Admission::Duplicate);
        assert_eq!(h.gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_is_exactly_once() {
        let h = harness(10);
        h.submit(text(1, "only"));

        let (a, b) = tokio::join!(h.buffer.flush(key()), h.buffer.flush(key()));
        assert!(a ^ b, "exactly one flush must win");

        settle(1000).await;
        assert_eq!(h.recorder.units().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bypass_commands_are_not_buffered() {
        let h = harness(10);
        match h.submit(text(1, "/help")) {
            Submission::NotBuffered(envelope, permit) => {
                h.buffer.dispatch_unbuffered(envelope, permit);
            }
            other => panic!("expected NotBuffered, got {other:?}"),
        }
        assert!(h.buffer.is_empty());

        settle(1).await;
        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].command.as_deref(), Some("help"));
    }

    #[tokio::test(start_paused = true)]
    async fn priority_command_absorbs_follow_up_text() {
        let h = harness(10);
        h.submit(text(1, "/ask"));
        h.submit(text(2, "what does Pin guarantee"));
        h.submit(text(3, "in async code"));
        settle(1000).await;

        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].command.as_deref(), Some("ask"));
        assert_eq!(units[0].text, "/ask\nwhat does Pin guarantee\nin async code");
    }

    #[tokio::test(start_paused = true)]
    async fn priority_command_takes_the_head_of_an_existing_burst() {
        let h = harness(10);
        h.submit(text(1, "context first"));
        h.submit(text(2, "/ask"));
        h.submit(text(3, "and a detail"));
        settle(1000).await;

        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].command.as_deref(), Some("ask"));
        assert_eq!(
            units[0].update_ids,
            vec![UpdateId(2), UpdateId(1), UpdateId(3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_priority_command_starts_a_new_burst() {
        let h = harness(10);
        h.submit(text(1, "/ask"));
        h.submit(text(2, "first question"));
        h.submit(text(3, "/ask"));
        h.submit(text(4, "second question"));
        settle(1000).await;

        let mut texts: Vec<String> = h.recorder.units().into_iter().map(|u| u.text).collect();
        texts.sort();
        assert_eq!(texts, vec!["/ask\nfirst question", "/ask\nsecond question"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_dispatch_leaves_updates_retryable() {
        let h = harness_with(
            settings(10),
            Recorder {
                fail: true,
                ..Recorder::default()
            },
            None,
        );
        h.submit(text(1, "a"));
        h.submit(text(2, "b"));
        settle(1000).await;

        assert_eq!(h.recorder.units().len(), 1);
        assert_eq!(h.dedup.admit(UpdateId(1)), Admission::New);
        assert_eq!(h.dedup.admit(UpdateId(2)), Admission::New);
        assert_eq!(h.gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permits_are_held_until_dispatch_completes() {
        let h = harness(10);
        h.submit(text(1, "a"));
        h.submit(text(2, "b"));
        assert_eq!(h.gate.in_flight(), 2);

        settle(1000).await;
        assert_eq!(h.gate.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streams_are_buffered_independently() {
        let h = harness(10);
        h.submit(TransportEnvelope::text(1, 7, 70, "from seven"));
        h.submit(TransportEnvelope::text(2, 8, 70, "from eight"));
        h.submit(TransportEnvelope::text(3, 7, 71, "elsewhere"));
        assert_eq!(h.buffer.len(), 3);

        settle(1000).await;
        assert_eq!(h.recorder.units().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn media_groups_are_collected() {
        let h = harness(10);
        for i in 1..=3 {
            let mut photo = text(i, "");
            photo.kind = EnvelopeKind::Photo;
            photo.payload.text = None;
            photo.payload.media_group_id = Some("album-1".into());
            h.submit(photo);
        }
        settle(1000).await;

        let units = h.recorder.units();
        assert_eq!(units[0].images.len(), 3);
        assert_eq!(units[0].media_group_ids, vec!["album-1".to_string()]);
    }

    struct SlowLookup;

    #[async_trait]
    impl ReplyLookup for SlowLookup {
        async fn reply_text(
            &self,
            _conversation_id: ConversationId,
            _message_id: i64,
        ) -> Result<Option<String>, DispatchError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Some("too late".into()))
        }
    }

    struct QuickLookup;

    #[async_trait]
    impl ReplyLookup for QuickLookup {
        async fn reply_text(
            &self,
            _conversation_id: ConversationId,
            message_id: i64,
        ) -> Result<Option<String>, DispatchError> {
            Ok(Some(format!("stored text of {message_id}")))
        }
    }

    fn replying(id: i64) -> TransportEnvelope {
        let mut env = text(id, "replying");
        env.payload.reply_to = Some(ReplyTarget {
            message_id: 555,
            text: None,
            kind: None,
            from_bot: false,
        });
        env
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reply_lookup_does_not_stall_the_flush() {
        let h = harness_with(settings(10), Recorder::default(), Some(Arc::new(SlowLookup)));
        h.submit(replying(1));
        settle(1000).await;

        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].reply.as_ref().unwrap().text, None);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_lookup_fills_missing_text() {
        let h = harness_with(settings(10), Recorder::default(), Some(Arc::new(QuickLookup)));
        h.submit(replying(1));
        settle(1000).await;

        let units = h.recorder.units();
        assert_eq!(
            units[0].reply.as_ref().unwrap().text.as_deref(),
            Some("stored text of 555")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn orphaned_entry_is_flushed_on_next_arrival() {
        let h = harness(10);
        h.submit(text(1, "a"));
        if let Some(entry) = h.buffer.inner.entries.get(&key()) {
            entry.timer.as_ref().unwrap().abort();
        }
        settle(1000).await;
        assert!(h.recorder.units().is_empty(), "aborted timer must not flush");

        assert!(matches!(h.submit(text(2, "b")), Submission::Flushing));
        settle(10).await;
        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "a\nb");
    }

    #[tokio::test(start_paused = true)]
    async fn flush_all_drains_every_stream() {
        let h = harness(10);
        h.submit(TransportEnvelope::text(1, 7, 70, "one"));
        h.submit(TransportEnvelope::text(2, 8, 80, "two"));

        assert_eq!(h.buffer.flush_all(), 2);
        assert!(h.buffer.is_empty());

        settle(1).await;
        assert_eq!(h.recorder.units().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_flushes_orphans_without_a_new_arrival() {
        let h = harness(10);
        h.submit(text(1, "a"));
        h.submit(TransportEnvelope::text(2, 8, 80, "healthy"));
        if let Some(entry) = h.buffer.inner.entries.get(&key()) {
            entry.timer.as_ref().unwrap().abort();
        }
        settle(1).await;

        assert_eq!(h.buffer.recover_orphans(), 1);
        settle(1).await;
        let units = h.recorder.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "a");
        assert_eq!(h.dedup.admit(UpdateId(1)), Admission::Duplicate);

        // The healthy stream keeps its own debounce.
        assert_eq!(h.buffer.len(), 1);
        settle(1000).await;
        assert_eq!(h.recorder.units().len(), 2);
    }
}

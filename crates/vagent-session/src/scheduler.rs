//! Speech scheduling (§4.5): every utterance, whether from `session.say()`
//! or a generation pipeline reply, is wrapped in a [`SpeechHandle`] and
//! queued on the [`SpeechScheduler`] by priority, FIFO within a priority.
//! A single driver loop (in `session.rs`) pops handles one at a time and
//! runs them to completion or interruption.
//!
//! Grounded in `vagent-concurrency::mailbox` for the bounded-queue shape,
//! generalized here to a priority queue since speech ordering isn't FIFO
//! across priorities the way a mailbox's is.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use vagent_events::SpeechSource;

/// Priority values from the data model glossary: low=0, normal=5, high=10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpeechPriority(pub u8);

impl SpeechPriority {
    pub const LOW: SpeechPriority = SpeechPriority(0);
    pub const NORMAL: SpeechPriority = SpeechPriority(5);
    pub const HIGH: SpeechPriority = SpeechPriority(10);
}

impl Default for SpeechPriority {
    fn default() -> Self {
        SpeechPriority::NORMAL
    }
}

/// `SpeechHandle`'s lifecycle (data model): authorize -> playing ->
/// done/interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechHandleState {
    Queued,
    Playing,
    Done,
    Interrupted,
}

/// What a [`SpeechHandle`] actually does once it's authorized to play
/// (§4.5/§4.6): speak fixed text verbatim, or run the full generation
/// pipeline for a fresh reply.
pub enum SpeechJob {
    Say(String),
    GenerateReply,
}

/// A single scheduled utterance: its priority, source, job, cancellation
/// token, and a `Notify` any caller can await via `wait_for_playout`.
pub struct SpeechHandle {
    pub id: String,
    pub priority: SpeechPriority,
    pub source: SpeechSource,
    pub job: SpeechJob,
    /// Data model `SpeechHandle.allowInterruptions`: `interrupt()` is a
    /// no-op unless this is `true` (spec §4.5, testable property 7).
    pub allow_interruptions: bool,
    seq: u64,
    cancel: CancellationToken,
    state: Mutex<SpeechHandleState>,
    done: Notify,
    interrupted: AtomicBool,
}

impl SpeechHandle {
    pub fn new(
        id: impl Into<String>,
        priority: SpeechPriority,
        source: SpeechSource,
        job: SpeechJob,
        seq: u64,
        allow_interruptions: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            priority,
            source,
            job,
            allow_interruptions,
            seq,
            cancel: CancellationToken::new(),
            state: Mutex::new(SpeechHandleState::Queued),
            done: Notify::new(),
            interrupted: AtomicBool::new(false),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn state(&self) -> SpeechHandleState {
        *self.state.lock().await
    }

    pub(crate) async fn mark_playing(&self) {
        *self.state.lock().await = SpeechHandleState::Playing;
    }

    /// Mark this handle interrupted and cancel its generation pipeline
    /// (§4.5 `session.interrupt()`). A no-op if `allow_interruptions` is
    /// `false` — interruption is "permitted iff allowInterruptions and not
    /// done" (data model), and this is the single place that rule is
    /// enforced so every caller (user-turn detection, `session.interrupt()`,
    /// a handle holder interrupting directly) gets it for free.
    pub fn interrupt(&self) {
        if !self.allow_interruptions {
            return;
        }
        self.interrupted.store(true, AtomicOrdering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(AtomicOrdering::SeqCst)
    }

    /// Mark the handle finished, waking anyone blocked in
    /// `wait_for_playout`. Idempotent.
    pub(crate) async fn finish(&self) {
        let mut state = self.state.lock().await;
        if *state != SpeechHandleState::Interrupted {
            *state = if self.is_interrupted() {
                SpeechHandleState::Interrupted
            } else {
                SpeechHandleState::Done
            };
        }
        drop(state);
        self.done.notify_waiters();
    }

    /// Block until this handle reaches `Done` or `Interrupted`.
    pub async fn wait_for_playout(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if matches!(*state, SpeechHandleState::Done | SpeechHandleState::Interrupted) {
                    return;
                }
            }
            self.done.notified().await;
        }
    }
}

struct QueueEntry(Arc<SpeechHandle>);

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.seq == other.0.seq
    }
}
impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    /// Higher priority first; lower sequence (earlier enqueue) first
    /// within the same priority (FIFO tie-break).
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Priority queue of pending [`SpeechHandle`]s plus the one currently
/// playing, if any (§4.5).
pub struct SpeechScheduler {
    queue: Mutex<BinaryHeap<QueueEntry>>,
    current: Mutex<Option<Arc<SpeechHandle>>>,
    next_seq: AtomicU64,
    notify: Notify,
    closed: AtomicBool,
}

impl Default for SpeechScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechScheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            current: Mutex::new(None),
            next_seq: AtomicU64::new(0),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Allocate the next enqueue sequence number, used for FIFO
    /// tie-breaking.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub fn enqueue(&self, handle: Arc<SpeechHandle>) {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return;
        }
        // A blocking_lock would deadlock inside async contexts; queue
        // access here is a plain try_lock since enqueue never contends
        // with the driver loop's own pop under the same task.
        let mut queue = self.queue.try_lock().expect("scheduler queue uncontended on enqueue");
        queue.push(QueueEntry(handle));
        drop(queue);
        self.notify.notify_one();
    }

    /// Pop the highest-priority pending handle, awaiting if the queue is
    /// empty. Returns `None` once the scheduler is closed and drained.
    pub async fn next(&self) -> Option<Arc<SpeechHandle>> {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(entry) = queue.pop() {
                    drop(queue);
                    *self.current.lock().await = Some(entry.0.clone());
                    return Some(entry.0);
                }
                if self.closed.load(AtomicOrdering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Clear the currently-playing handle once its pipeline finishes.
    pub async fn finish_current(&self) {
        if let Some(handle) = self.current.lock().await.take() {
            handle.finish().await;
        }
    }

    /// Interrupt whichever handle is currently playing (§4.5
    /// `session.interrupt()` with no explicit handle).
    pub async fn interrupt_current(&self) {
        if let Some(handle) = self.current.lock().await.as_ref() {
            handle.interrupt();
        }
    }

    pub async fn current(&self) -> Option<Arc<SpeechHandle>> {
        self.current.lock().await.clone()
    }

    /// Whether the currently-playing handle (if any) permits interruption.
    /// No handle playing counts as interruptible — there's nothing an
    /// uninterruptible reply could be protecting.
    pub async fn current_allows_interruptions(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(handle) => handle.allow_interruptions,
            None => true,
        }
    }

    /// Stop accepting new handles and wake any waiter in `next()`.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
        self.notify.notify_waiters();
    }
}

//! A readable sequence whose upstream is attached later (spec §4.8): reads
//! suspend until a source is attached, then proxy it; the source can be
//! detached while still alive and reattached elsewhere.
//!
//! Grounded in the teacher's `AudioListenerHandle` restart idiom
//! (`audio_listener.rs`): stopping the listener hands the
//! `AudioBusReceiver` back to shared storage so a fresh listener can pick
//! it up later without losing in-flight state. `DeferredStream`
//! generalizes that "receiver parked in shared storage, reattachable"
//! pattern from "audio bus receiver" to any `T`.

use tokio::sync::{mpsc, Mutex, Notify};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeferredError {
    #[error("source already set")]
    SourceAlreadySet,
}

enum Source<T> {
    /// No upstream attached yet; readers wait on `notify`.
    Empty,
    /// An attached receiver, actively proxied.
    Attached(mpsc::Receiver<T>),
    /// The output stream was permanently closed (no more sources will come).
    Detached,
}

/// A stream that is readable immediately but proxies a source attached
/// later via [`DeferredStream::set_source`].
pub struct DeferredStream<T> {
    inner: Mutex<Source<T>>,
    notify: Notify,
}

impl<T: Send + 'static> DeferredStream<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Source::Empty),
            notify: Notify::new(),
        }
    }

    /// Attach a source. Callable exactly once; a second call fails with
    /// `SourceAlreadySet` (spec §4.8: "subsequent calls fail").
    pub async fn set_source(&self, receiver: mpsc::Receiver<T>) -> Result<(), DeferredError> {
        let mut guard = self.inner.lock().await;
        match &*guard {
            Source::Empty => {
                *guard = Source::Attached(receiver);
                drop(guard);
                self.notify.notify_waiters();
                Ok(())
            }
            _ => Err(DeferredError::SourceAlreadySet),
        }
    }

    /// Release the current source's reader *without* terminating the
    /// output stream: pending/future reads complete as `done` until a new
    /// source is attached via a fresh `DeferredStream`. Returns the
    /// detached receiver so the caller can hand it to another consumer
    /// (spec §4.8: "the original source may be attached to a new deferred
    /// stream").
    pub async fn detach_source(&self) -> Option<mpsc::Receiver<T>> {
        let mut guard = self.inner.lock().await;
        match std::mem::replace(&mut *guard, Source::Detached) {
            Source::Attached(receiver) => Some(receiver),
            other => {
                *guard = other;
                None
            }
        }
    }

    /// Read the next item. Blocks until a source is attached if none is
    /// yet; once attached, proxies reads from it; returns `None` ("done")
    /// once the source ends or is detached.
    pub async fn read(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            // Fast path: try an already-attached source without sleeping.
            {
                let mut guard = self.inner.lock().await;
                match &mut *guard {
                    Source::Attached(receiver) => {
                        // Hold the guard across the await: only one reader
                        // is ever expected (reader-owns-the-stream rule),
                        // and `tokio::sync::Mutex`'s guard is `Send`, so
                        // this stays safe to spawn. This keeps
                        // `set_source`/`detach_source` from racing a recv.
                        return receiver.recv().await;
                    }
                    Source::Detached => return None,
                    Source::Empty => {}
                }
            }
            notified.await;
        }
    }
}

impl<T: Send + 'static> Default for DeferredStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

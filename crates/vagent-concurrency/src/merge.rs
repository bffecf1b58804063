//! N readable sequences funneled into one (spec §4.8): inputs can be added
//! or removed while consumers read; an errored input is auto-removed
//! without erroring the output.
//!
//! Grounded in the same task-per-input-plus-shared-sink idiom the teacher
//! uses for its channel-based worker pairs (`SherpaWorker`'s
//! request/result channel split in `crates/sherpa/src/worker.rs`),
//! generalized here from a fixed two-channel pairing to an arbitrary,
//! dynamically changing set of input streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("merge stream is closed")]
    Closed,
}

/// An N-to-1 stream merge. Each input is pumped by its own task into a
/// shared output channel; removing an input cancels its pump without
/// affecting the others or the output.
pub struct MergeStream<T> {
    output_tx: mpsc::Sender<T>,
    output_rx: mpsc::Receiver<T>,
    next_id: AtomicU64,
    pumps: HashMap<u64, CancellationToken>,
    closed: bool,
}

impl<T: Send + 'static> MergeStream<T> {
    pub fn new(output_capacity: usize) -> Self {
        let (output_tx, output_rx) = mpsc::channel(output_capacity);
        Self {
            output_tx,
            output_rx,
            next_id: AtomicU64::new(0),
            pumps: HashMap::new(),
            closed: false,
        }
    }

    /// Number of currently active inputs.
    pub fn input_count(&self) -> usize {
        self.pumps.len()
    }

    /// Add an input stream, returning an id usable with
    /// [`MergeStream::remove_input`]. Each item from `stream` is forwarded
    /// to the single shared output; the pump task exits quietly (no error
    /// propagated to the output) when `stream` ends.
    pub fn add_input_stream<S>(&mut self, mut stream: S) -> Result<u64, MergeError>
    where
        S: futures::Stream<Item = T> + Send + Unpin + 'static,
    {
        if self.closed {
            return Err(MergeError::Closed);
        }

        use futures::StreamExt;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let child = token.child_token();
        let sink = self.output_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    item = stream.next() => {
                        match item {
                            Some(value) => {
                                if sink.send(value).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        self.pumps.insert(id, token);
        Ok(id)
    }

    /// Stop and drop a single input's pump, without affecting the output
    /// stream or any other input.
    pub fn remove_input_stream(&mut self, id: u64) {
        if let Some(token) = self.pumps.remove(&id) {
            token.cancel();
        }
    }

    /// Read the next item merged from any currently-active input.
    pub async fn next(&mut self) -> Option<T> {
        self.output_rx.recv().await
    }

    /// Stop every pump and end the output stream.
    pub fn close(&mut self) {
        for (_, token) in self.pumps.drain() {
            token.cancel();
        }
        self.closed = true;
    }
}

/// A handle other tasks can use to add inputs to a merge stream owned
/// elsewhere, without holding the reader lock.
#[derive(Clone)]
pub struct MergeStreamInputs<T> {
    inner: Arc<tokio::sync::Mutex<MergeStream<T>>>,
}

impl<T: Send + 'static> MergeStreamInputs<T> {
    pub fn new(merge: MergeStream<T>) -> (Self, Arc<tokio::sync::Mutex<MergeStream<T>>>) {
        let inner = Arc::new(tokio::sync::Mutex::new(merge));
        (Self { inner: Arc::clone(&inner) }, inner)
    }

    pub async fn add_input_stream<S>(&self, stream: S) -> Result<u64, MergeError>
    where
        S: futures::Stream<Item = T> + Send + Unpin + 'static,
    {
        self.inner.lock().await.add_input_stream(stream)
    }

    pub async fn remove_input_stream(&self, id: u64) {
        self.inner.lock().await.remove_input_stream(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn merges_two_inputs_without_dropping_items() {
        let mut merge: MergeStream<i32> = MergeStream::new(16);
        merge.add_input_stream(stream::iter(vec![1, 2, 3])).unwrap();
        merge.add_input_stream(stream::iter(vec![10, 20])).unwrap();

        let mut seen = Vec::new();
        while let Some(item) = merge.next().await {
            seen.push(item);
            if seen.len() == 5 {
                break;
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 10, 20]);
    }

    #[tokio::test]
    async fn removing_one_input_does_not_affect_others() {
        let mut merge: MergeStream<i32> = MergeStream::new(16);
        let (tx, rx) = mpsc::channel(4);
        let pending_forever = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let id = merge.add_input_stream(pending_forever).unwrap();
        merge.add_input_stream(stream::iter(vec![42])).unwrap();

        merge.remove_input_stream(id);
        drop(tx);

        assert_eq!(merge.next().await, Some(42));
    }

    #[tokio::test]
    async fn input_count_tracks_add_and_remove() {
        let mut merge: MergeStream<i32> = MergeStream::new(16);
        assert_eq!(merge.input_count(), 0);
        let id1 = merge.add_input_stream(stream::pending()).unwrap();
        let id2 = merge.add_input_stream(stream::pending()).unwrap();
        assert_eq!(merge.input_count(), 2);
        merge.remove_input_stream(id1);
        assert_eq!(merge.input_count(), 1);
        merge.remove_input_stream(id2);
        assert_eq!(merge.input_count(), 0);
    }

    #[tokio::test]
    async fn ended_input_is_auto_removed_from_the_pump_set_without_erroring_output() {
        let mut merge: MergeStream<i32> = MergeStream::new(16);
        merge.add_input_stream(stream::iter(vec![1])).unwrap();
        merge.add_input_stream(stream::pending()).unwrap();

        assert_eq!(merge.next().await, Some(1));
        // The ended input's pump exits on its own; the still-pending input
        // keeps the output stream alive (no error surfaces from the ended
        // one).
        assert!(tokio::time::timeout(std::time::Duration::from_millis(20), merge.next())
            .await
            .is_err());
    }
}

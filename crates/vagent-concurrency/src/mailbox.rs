//! Bounded mailbox with an explicit non-blocking drop-on-full policy and a
//! blocking one, generalizing `vagent_bus::AudioBusSender`/`AudioBusReceiver`
//! (mpsc wrapper that drops the oldest-pending send under backpressure)
//! from "audio frame" to any `T`.

use tokio::sync::{mpsc, watch};

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox is full")]
    Full,
    #[error("mailbox is closed")]
    Closed,
}

pub struct Mailbox<T> {
    tx: mpsc::Sender<T>,
    closed: watch::Sender<bool>,
}

pub struct MailboxReceiver<T> {
    rx: mpsc::Receiver<T>,
    closed: watch::Receiver<bool>,
}

impl<T> Mailbox<T> {
    pub fn bounded(capacity: usize) -> (Self, MailboxReceiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (closed_tx, closed_rx) = watch::channel(false);
        (Self { tx, closed: closed_tx }, MailboxReceiver { rx, closed: closed_rx })
    }

    /// Non-blocking put. Returns `Err(MailboxError::Full)` rather than
    /// waiting for room, mirroring `AudioBusSender::send`'s drop policy.
    pub fn try_put(&self, value: T) -> Result<(), MailboxError> {
        if *self.closed.borrow() {
            return Err(MailboxError::Closed);
        }
        self.tx.try_send(value).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Blocking put: waits for room instead of dropping.
    pub async fn put(&self, value: T) -> Result<(), MailboxError> {
        if *self.closed.borrow() {
            return Err(MailboxError::Closed);
        }
        self.tx.send(value).await.map_err(|_| MailboxError::Closed)
    }

    /// Broadcast close to every clone of this mailbox and to the
    /// receiver: items already enqueued are still delivered, but no new
    /// `put`/`try_put` succeeds and a `get()` blocked on an empty queue
    /// wakes with `None` (spec §4.8: "close is broadcast"). Idempotent.
    pub fn close(&self) {
        let _ = self.closed.send(true);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || *self.closed.borrow()
    }
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), closed: self.closed.clone() }
    }
}

impl<T> MailboxReceiver<T> {
    pub async fn get(&mut self) -> Option<T> {
        loop {
            // Drain anything already buffered before honoring a close,
            // so items enqueued before close() are still delivered.
            if let Ok(value) = self.rx.try_recv() {
                return Some(value);
            }
            if *self.closed.borrow() {
                return self.rx.try_recv().ok();
            }
            tokio::select! {
                biased;
                value = self.rx.recv() => return value,
                _ = self.closed.changed() => continue,
            }
        }
    }

    pub fn try_get(&mut self) -> Result<T, MailboxError> {
        self.rx.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => MailboxError::Full,
            mpsc::error::TryRecvError::Disconnected => MailboxError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let (mailbox, mut rx) = Mailbox::bounded(4);
        mailbox.put(42).await.unwrap();
        assert_eq!(rx.get().await, Some(42));
    }

    #[test]
    fn try_put_reports_full_without_blocking() {
        let (mailbox, _rx) = Mailbox::bounded(1);
        mailbox.try_put(1).unwrap();
        let err = mailbox.try_put(2).unwrap_err();
        assert!(matches!(err, MailboxError::Full));
    }

    #[tokio::test]
    async fn closed_mailbox_rejects_put() {
        let (mailbox, rx) = Mailbox::bounded(1);
        drop(rx);
        let err = mailbox.put(1).await.unwrap_err();
        assert!(matches!(err, MailboxError::Closed));
    }

    #[tokio::test]
    async fn close_wakes_a_blocked_get_with_none() {
        let (mailbox, mut rx) = Mailbox::bounded(4);

        let waiter = tokio::spawn(async move { rx.get().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        mailbox.close();
        assert_eq!(tokio::time::timeout(std::time::Duration::from_secs(1), waiter).await.unwrap().unwrap(), None);

        // Idempotent: closing again doesn't panic or change behavior.
        mailbox.close();
        assert!(mailbox.is_closed());
    }

    #[tokio::test]
    async fn close_still_delivers_items_enqueued_before_it() {
        let (mailbox, mut rx) = Mailbox::bounded(4);
        mailbox.put(1).await.unwrap();
        mailbox.close();

        assert_eq!(rx.get().await, Some(1));
        assert_eq!(rx.get().await, None);
    }
}

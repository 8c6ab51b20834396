use crate::core::errors::ExchangeError;
use crate::core::types::Operation;
use futures_util::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};

/// One mutation as seen by consumers: the operation, the row before it (if
/// any) and the row after it. For deletes `data` is the removed row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange<R> {
    pub operation: Operation,
    pub source: Option<R>,
    pub data: R,
}

impl<R> StoreChange<R> {
    pub fn new(operation: Operation, source: Option<R>, data: R) -> Self {
        Self {
            operation,
            source,
            data,
        }
    }
}

/// Multicast change notifications.
///
/// Every watcher owns an unbounded queue, so a slow consumer never causes
/// another to miss changes. Waiters only observe a generation counter.
#[derive(Debug)]
pub struct ChangeStream<R> {
    watchers: Mutex<Vec<mpsc::UnboundedSender<StoreChange<R>>>>,
    generation: watch::Sender<u64>,
}

impl<R: Clone + Send + 'static> Default for ChangeStream<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone + Send + 'static> ChangeStream<R> {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            watchers: Mutex::new(Vec::new()),
            generation,
        }
    }

    /// Fan `changes` out to every live watcher and wake waiters
    pub fn publish(&self, changes: &[StoreChange<R>]) {
        if changes.is_empty() {
            return;
        }
        self.watchers
            .lock()
            .retain(|tx| changes.iter().all(|change| tx.send(change.clone()).is_ok()));
        self.generation.send_modify(|generation| *generation += 1);
    }

    /// Receive every change published from now on
    pub fn watch(&self) -> ChangeWatcher<R> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers.lock().push(tx);
        ChangeWatcher { rx }
    }

    pub fn waiter(&self) -> Waiter {
        Waiter {
            rx: self.generation.subscribe(),
        }
    }

    pub fn watcher_count(&self) -> usize {
        let mut watchers = self.watchers.lock();
        watchers.retain(|tx| !tx.is_closed());
        watchers.len()
    }
}

/// Independent change subscription; dropping it detaches the subscriber
#[derive(Debug)]
pub struct ChangeWatcher<R> {
    rx: mpsc::UnboundedReceiver<StoreChange<R>>,
}

impl<R> ChangeWatcher<R> {
    /// `None` once the producing stream is gone
    pub async fn next(&mut self) -> Option<StoreChange<R>> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<StoreChange<R>> {
        self.rx.try_recv().ok()
    }

    /// Discard everything queued so far
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while self.rx.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

impl<R> Stream for ChangeWatcher<R> {
    type Item = StoreChange<R>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Level-triggered wake-up handle: `wait` resolves as soon as at least one
/// publish happened since this handle last returned.
#[derive(Debug, Clone)]
pub struct Waiter {
    rx: watch::Receiver<u64>,
}

impl Waiter {
    pub async fn wait(&mut self) -> Result<(), ExchangeError> {
        self.rx
            .changed()
            .await
            .map_err(|_| ExchangeError::StoreClosed("change stream dropped".to_string()))
    }

    pub fn has_pending(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn change(value: i64) -> StoreChange<i64> {
        StoreChange::new(Operation::Insert, None, value)
    }

    #[tokio::test]
    async fn test_watchers_receive_every_change_in_order() {
        let stream = ChangeStream::new();
        let mut first = stream.watch();
        let mut second = stream.watch();

        stream.publish(&[change(1), change(2)]);
        stream.publish(&[change(3)]);

        for watcher in [&mut first, &mut second] {
            let seen: Vec<i64> = vec![
                watcher.next().await.unwrap().data,
                watcher.next().await.unwrap().data,
                watcher.next().await.unwrap().data,
            ];
            assert_eq!(seen, vec![1, 2, 3]);
            assert!(watcher.try_next().is_none());
        }
    }

    #[tokio::test]
    async fn test_watcher_starts_at_subscription() {
        let stream = ChangeStream::new();
        stream.publish(&[change(1)]);
        let mut watcher = stream.watch();
        stream.publish(&[change(2)]);
        assert_eq!(watcher.next().await.unwrap().data, 2);
    }

    #[tokio::test]
    async fn test_dropped_watcher_is_pruned() {
        let stream = ChangeStream::new();
        let kept = stream.watch();
        let dropped = stream.watch();
        drop(dropped);

        stream.publish(&[change(1)]);
        assert_eq!(stream.watcher_count(), 1);

        let mut kept = kept;
        assert_eq!(kept.next().await.unwrap().data, 1);
    }

    #[tokio::test]
    async fn test_waiter_is_level_triggered() {
        let stream: ChangeStream<i64> = ChangeStream::new();
        let mut waiter = stream.waiter();
        assert!(!waiter.has_pending());

        stream.publish(&[change(1)]);
        stream.publish(&[change(2)]);
        assert!(waiter.has_pending());
        tokio::time::timeout(Duration::from_millis(100), waiter.wait())
            .await
            .expect("publish before wait must not be lost")
            .unwrap();

        // both publishes were consumed by the single wake-up
        let pending = tokio::time::timeout(Duration::from_millis(50), waiter.wait()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_watcher_as_stream() {
        let stream = ChangeStream::new();
        let watcher = stream.watch();
        stream.publish(&[change(7), change(8)]);
        drop(stream);

        let values: Vec<i64> = watcher.map(|c| c.data).collect().await;
        assert_eq!(values, vec![7, 8]);
    }
}

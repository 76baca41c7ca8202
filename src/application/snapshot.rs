use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cached value of a store together with its load state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: T,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Snapshot<T> {
    pub fn ready(value: T) -> Self {
        Self {
            value,
            loading: false,
            error: None,
        }
    }
}

/// Publishing side of a snapshot sequence.
#[derive(Debug)]
pub struct SnapshotSource<T> {
    sender: watch::Sender<Snapshot<T>>,
}

impl<T> SnapshotSource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(Snapshot::ready(initial));
        Self { sender }
    }

    pub fn current(&self) -> Snapshot<T> {
        self.sender.borrow().clone()
    }

    /// Applies `update` and notifies every live subscription.
    pub fn publish(&self, update: impl FnOnce(&mut Snapshot<T>)) {
        self.sender.send_modify(update);
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: Some(self.sender.subscribe()),
            primed: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Lazy sequence of snapshots: the current one first, then each later change.
///
/// Intermediate snapshots published between two `next` calls are coalesced into
/// the latest one.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: Option<watch::Receiver<Snapshot<T>>>,
    primed: bool,
}

impl<T> Subscription<T>
where
    T: Clone,
{
    pub async fn next(&mut self) -> Option<Snapshot<T>> {
        let receiver = self.receiver.as_mut()?;
        if !self.primed {
            self.primed = true;
            return Some(receiver.borrow_and_update().clone());
        }
        match receiver.changed().await {
            Ok(()) => Some(receiver.borrow_and_update().clone()),
            Err(_) => {
                self.receiver = None;
                None
            }
        }
    }

    pub fn current(&self) -> Option<Snapshot<T>> {
        self.receiver.as_ref().map(|receiver| receiver.borrow().clone())
    }

    /// The next call to [`Subscription::next`] yields the current snapshot again.
    pub fn restart(&mut self) {
        self.primed = false;
    }

    pub fn unsubscribe(&mut self) {
        self.receiver = None;
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }
}

/// Runs `tick` every `period` on the tokio runtime until stopped or dropped.
#[derive(Debug)]
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn subscription_yields_current_snapshot_first() {
        let source = SnapshotSource::new(vec![1]);
        let mut subscription = source.subscribe();

        assert_eq!(subscription.next().await.map(|s| s.value), Some(vec![1]));

        source.publish(|snapshot| snapshot.value.push(2));
        assert_eq!(subscription.next().await.map(|s| s.value), Some(vec![1, 2]));
    }

    #[tokio::test]
    async fn restart_replays_current_snapshot() {
        let source = SnapshotSource::new(0u32);
        let mut subscription = source.subscribe();
        subscription.next().await.expect("first");
        source.publish(|snapshot| snapshot.value = 7);
        subscription.next().await.expect("second");

        subscription.restart();
        assert_eq!(subscription.next().await.map(|s| s.value), Some(7));
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_sequence() {
        let source = SnapshotSource::new("a".to_string());
        let mut subscription = source.subscribe();
        assert_eq!(source.subscriber_count(), 1);

        subscription.unsubscribe();

        assert!(!subscription.is_active());
        assert!(subscription.next().await.is_none());
        assert_eq!(source.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropped_source_ends_the_sequence() {
        let source = SnapshotSource::new(1u8);
        let mut subscription = source.subscribe();
        subscription.next().await.expect("first");
        drop(source);
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn poller_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let poller = Poller::spawn(Duration::from_millis(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..200 {
            if ticks.load(Ordering::SeqCst) >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert!(poller.is_running());

        poller.stop();
        tokio::task::yield_now().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }
}

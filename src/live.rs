//! Live queries: a query re-run on every relevant bus event, with each full
//! result set pushed to the subscriber until it unsubscribes.

use std::future::Future;

use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;

use crate::bus::{Event, EventBus};

/// One full result set, or the error the query failed with.
pub type Snapshot<T> = anyhow::Result<Vec<T>>;

/// Handle to a running live query. Dropping it (or calling
/// [`LiveQuery::unsubscribe`]) stops the background task.
pub struct LiveQuery<T> {
    rx: mpsc::Receiver<Snapshot<T>>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> LiveQuery<T> {
    /// Run `query` once immediately and again after every event accepted by
    /// `filter`. A lagged bus receiver also triggers a re-run, since each
    /// snapshot is complete on its own.
    pub fn spawn<F, Q, Fut>(bus: &EventBus, filter: F, query: Q) -> Self
    where
        F: Fn(&Event) -> bool + Send + 'static,
        Q: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Snapshot<T>> + Send + 'static,
    {
        // Subscribe before the first query so no write slips in between.
        let mut events = bus.subscribe();
        let (tx, rx) = mpsc::channel(16);

        let task = tokio::spawn(async move {
            if tx.send(query().await).await.is_err() {
                return;
            }

            loop {
                match events.recv().await {
                    Ok(event) if !filter(&event) => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }

                if tx.send(query().await).await.is_err() {
                    break;
                }
            }
        });

        Self { rx, task }
    }
}

impl<T> LiveQuery<T> {
    /// Wait for the next snapshot. `None` once the query has stopped.
    pub async fn next(&mut self) -> Option<Snapshot<T>> {
        self.rx.recv().await
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Notification;
    use crate::chat::ConversationKey;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_query(
        bus: &EventBus,
        runs: Arc<AtomicUsize>,
    ) -> LiveQuery<usize> {
        LiveQuery::spawn(
            bus,
            |event| matches!(event, Event::ChatSummaryChanged(_)),
            move || {
                let runs = runs.clone();
                async move { Ok(vec![runs.fetch_add(1, Ordering::SeqCst) + 1]) }
            },
        )
    }

    #[tokio::test]
    async fn test_initial_snapshot_then_updates() {
        let bus = EventBus::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut live = counting_query(&bus, runs.clone());

        assert_eq!(live.next().await.unwrap().unwrap(), vec![1]);

        bus.publish(Event::ChatSummaryChanged(ConversationKey::between("a", "b")));
        assert_eq!(live.next().await.unwrap().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_unrelated_events_are_ignored() {
        let bus = EventBus::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut live = counting_query(&bus, runs.clone());
        live.next().await.unwrap().unwrap();

        bus.publish(Event::SystemNotification {
            notification: Notification::success("t", "d"),
            target: None,
        });
        bus.publish(Event::ChatSummaryChanged(ConversationKey::between("a", "b")));

        assert_eq!(live.next().await.unwrap().unwrap(), vec![2]);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_queries() {
        let bus = EventBus::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut live = counting_query(&bus, runs.clone());
        live.next().await.unwrap().unwrap();

        live.unsubscribe();
        tokio::task::yield_now().await;
        bus.publish(Event::ChatSummaryChanged(ConversationKey::between("a", "b")));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}

//! De-duplication of concurrent identical lookups.
//!
//! A flight is only joined by callers that observed the same invalidation
//! epoch as the caller that started it, and it is forgotten as soon as its
//! last waiter completes or is dropped.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

struct Flight<T> {
    id: u64,
    epoch: u64,
    waiters: usize,
    future: Shared<BoxFuture<'static, T>>,
}

/// Concurrent callers with the same key share one in-flight future.
pub(crate) struct FlightGroup<K, T: Clone> {
    flights: Mutex<HashMap<K, Flight<T>>>,
    next_id: AtomicU64,
}

impl<K, T> FlightGroup<K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Joins the flight for `key` started at `epoch`, or starts one with `start`.
    ///
    /// A flight from an earlier epoch is replaced, not joined; its own waiters
    /// still receive its result.
    pub(crate) async fn run<F>(&self, key: K, epoch: u64, start: F) -> T
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let mut waiter = {
            let mut flights = self.flights.lock();
            let joinable = flights.get_mut(&key).filter(|f| f.epoch == epoch).map(|flight| {
                flight.waiters += 1;
                (flight.id, flight.future.clone())
            });
            match joinable {
                Some((id, future)) => {
                    debug!(key = ?key, "Joining in-flight lookup");
                    Waiter::new(self, key, id, future)
                }
                None => {
                    if flights.contains_key(&key) {
                        debug!(key = ?key, epoch = epoch, "In-flight lookup predates an invalidation; starting anew");
                    }
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = start().shared();
                    flights.insert(
                        key.clone(),
                        Flight {
                            id,
                            epoch,
                            waiters: 1,
                            future: future.clone(),
                        },
                    );
                    Waiter::new(self, key, id, future)
                }
            }
        };

        let output = (&mut waiter.future).await;
        waiter.finished = true;
        output
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Called once per waiter, on completion or when the waiter is dropped.
    fn leave(&self, key: &K, id: u64, finished: bool) {
        let mut flights = self.flights.lock();
        let Some(flight) = flights.get_mut(key).filter(|f| f.id == id) else {
            return;
        };
        flight.waiters = flight.waiters.saturating_sub(1);
        if finished || flight.waiters == 0 {
            if !finished {
                debug!(key = ?key, "Last waiter dropped; abandoning in-flight lookup");
            }
            flights.remove(key);
        }
    }
}

/// One caller's share of a flight.
struct Waiter<'a, K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    group: &'a FlightGroup<K, T>,
    key: K,
    id: u64,
    future: Shared<BoxFuture<'static, T>>,
    finished: bool,
}

impl<'a, K, T> Waiter<'a, K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    fn new(group: &'a FlightGroup<K, T>, key: K, id: u64, future: Shared<BoxFuture<'static, T>>) -> Self {
        Self {
            group,
            key,
            id,
            future,
            finished: false,
        }
    }
}

impl<K, T> Drop for Waiter<'_, K, T>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.group.leave(&self.key, self.id, self.finished);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn counted(started: &Arc<AtomicUsize>, value: u32, delay: Duration) -> impl FnOnce() -> BoxFuture<'static, u32> {
        let started = Arc::clone(started);
        move || {
            started.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                value
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_flight() {
        let group: FlightGroup<&'static str, u32> = FlightGroup::new();
        let started = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(20);

        let (a, b) = tokio::join!(
            group.run("k", 0, counted(&started, 7, delay)),
            group.run("k", 0, counted(&started, 8, delay))
        );
        assert_eq!((a, b), (7, 7));
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_callers_start_new_flights() {
        let group: FlightGroup<&'static str, u32> = FlightGroup::new();
        assert_eq!(group.run("k", 0, || async { 1 }.boxed()).await, 1);
        assert_eq!(group.run("k", 0, || async { 2 }.boxed()).await, 2);
    }

    #[tokio::test]
    async fn test_later_epoch_does_not_join_earlier_flight() {
        let group: FlightGroup<&'static str, u32> = FlightGroup::new();
        let started = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(20);

        let (before, after) = tokio::join!(
            group.run("k", 0, counted(&started, 1, delay)),
            group.run("k", 1, counted(&started, 2, delay))
        );
        assert_eq!((before, after), (1, 2));
        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_abandons_flight() {
        let group: FlightGroup<&'static str, u32> = FlightGroup::new();
        let started = Arc::new(AtomicUsize::new(0));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            group.run("k", 0, counted(&started, 1, Duration::from_secs(3600))),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(group.in_flight(), 0);

        let value = group.run("k", 0, counted(&started, 2, Duration::ZERO)).await;
        assert_eq!(value, 2);
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flight_survives_while_a_waiter_remains() {
        let group: FlightGroup<&'static str, u32> = FlightGroup::new();
        let started = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(40);

        let (dropped, kept) = tokio::join!(
            tokio::time::timeout(Duration::from_millis(5), group.run("k", 0, counted(&started, 1, delay))),
            async {
                let value = group.run("k", 0, counted(&started, 2, delay)).await;
                (value, started.load(Ordering::SeqCst))
            }
        );
        assert!(dropped.is_err());
        assert_eq!(kept, (1, 1));
        assert_eq!(group.in_flight(), 0);
    }
}

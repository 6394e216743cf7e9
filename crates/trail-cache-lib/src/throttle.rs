//! Bounded-concurrency FIFO throttle with cooperative cancellation
//!
//! [`FetchThrottler::schedule`] takes its place in line when it is called, not when the
//! returned future is first polled, so FIFO order follows call order. A finishing operation
//! hands its slot straight to the next live waiter; waiters whose token was cancelled are
//! skipped and never hold a slot.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Outcome of a throttled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttled<T> {
    Completed(T),
    /// The token fired before or while the operation ran
    Cancelled,
}

/// Cloneable handle to a shared throttle
#[derive(Debug, Clone)]
pub struct FetchThrottler {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    limit: usize,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    active: usize,
    queue: VecDeque<Waiter>,
    next_id: u64,
}

#[derive(Debug)]
struct Waiter {
    id: u64,
    token: CancellationToken,
    wake: oneshot::Sender<()>,
}

/// A held concurrency slot, handed on or released when dropped
struct Slot {
    shared: Arc<Shared>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.token.is_cancelled() {
                continue;
            }
            if waiter.wake.send(()).is_ok() {
                return;
            }
        }
        state.active -= 1;
    }
}

/// A place in the queue
struct Ticket {
    shared: Arc<Shared>,
    id: u64,
    wake: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let handed = {
            let mut state = self.shared.state.lock();
            match state.queue.iter().position(|waiter| waiter.id == self.id) {
                Some(position) => {
                    state.queue.remove(position);
                    false
                }
                // Already popped: we own a slot only if one was sent
                None => self.wake.try_recv().is_ok(),
            }
        };
        if handed {
            drop(Slot {
                shared: self.shared.clone(),
            });
        }
    }
}

enum Admission {
    Running(Slot),
    Queued(Ticket),
}

impl FetchThrottler {
    /// Create a throttle allowing `limit` concurrent operations (at least 1)
    pub fn new(limit: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                limit: limit.max(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    /// Operations currently holding a slot
    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Operations waiting for a slot
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    fn admit(&self, token: &CancellationToken) -> Admission {
        let mut state = self.shared.state.lock();
        if state.active < self.shared.limit {
            state.active += 1;
            return Admission::Running(Slot {
                shared: self.shared.clone(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        let (wake, receiver) = oneshot::channel();
        state.queue.push_back(Waiter {
            id,
            token: token.clone(),
            wake,
        });
        Admission::Queued(Ticket {
            shared: self.shared.clone(),
            id,
            wake: receiver,
            settled: false,
        })
    }

    /// Run `operation` once a slot is free, unless `token` fires first
    ///
    /// The queue position is taken immediately. Dropping the returned future gives up the
    /// position or the slot.
    pub fn schedule<F, T>(
        &self,
        token: CancellationToken,
        operation: F,
    ) -> impl Future<Output = Throttled<T>> + Send + 'static
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let admission = self.admit(&token);
        let shared = self.shared.clone();

        async move {
            let _slot = match admission {
                Admission::Running(slot) => slot,
                Admission::Queued(mut ticket) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Throttled::Cancelled,
                        woken = &mut ticket.wake => {
                            ticket.settled = true;
                            match woken {
                                Ok(()) => Slot { shared },
                                Err(_) => return Throttled::Cancelled,
                            }
                        }
                    }
                }
            };

            if token.is_cancelled() {
                return Throttled::Cancelled;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => Throttled::Cancelled,
                value = operation => Throttled::Completed(value),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn yield_many() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_runs_immediately_below_limit() {
        let throttler = FetchThrottler::new(2);
        let result = throttler
            .schedule(CancellationToken::new(), async { 7 })
            .await;
        assert_eq!(result, Throttled::Completed(7));
        assert_eq!(throttler.active(), 0);
    }

    #[tokio::test]
    async fn test_limit_and_queue() {
        let throttler = FetchThrottler::new(2);
        let mut gates = Vec::new();
        let mut handles = Vec::new();
        for i in 0..5 {
            let (release, gate) = oneshot::channel::<()>();
            gates.push(release);
            handles.push(tokio::spawn(throttler.schedule(
                CancellationToken::new(),
                async move {
                    let _ = gate.await;
                    i
                },
            )));
        }
        yield_many().await;
        assert_eq!(throttler.active(), 2);
        assert_eq!(throttler.queued(), 3);

        // Finishing one admits exactly one more
        gates.remove(0).send(()).unwrap();
        yield_many().await;
        assert_eq!(throttler.active(), 2);
        assert_eq!(throttler.queued(), 2);

        for gate in gates {
            let _ = gate.send(());
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(
            results,
            (0..5).map(Throttled::Completed).collect::<Vec<_>>()
        );
        assert_eq!(throttler.active(), 0);
    }

    #[tokio::test]
    async fn test_fifo_skips_cancelled_waiter() {
        let throttler = FetchThrottler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let (release, gate) = oneshot::channel::<()>();
        let blocker = tokio::spawn(throttler.schedule(CancellationToken::new(), async move {
            let _ = gate.await;
        }));

        let mut handles = Vec::new();
        let mut tokens = Vec::new();
        for i in 1..=5 {
            let token = CancellationToken::new();
            tokens.push(token.clone());
            let order = order.clone();
            handles.push(tokio::spawn(throttler.schedule(token, async move {
                order.lock().push(i);
            })));
        }
        yield_many().await;
        tokens[2].cancel();
        yield_many().await;
        assert_eq!(throttler.queued(), 4);

        release.send(()).unwrap();
        blocker.await.unwrap();
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }

        assert_eq!(*order.lock(), vec![1, 2, 4, 5]);
        assert_eq!(results[2], Throttled::Cancelled);
        assert_eq!(throttler.active(), 0);
        assert_eq!(throttler.queued(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_poll_never_runs() {
        let throttler = FetchThrottler::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        let (release, gate) = oneshot::channel::<()>();
        let blocker = tokio::spawn(throttler.schedule(CancellationToken::new(), async move {
            let _ = gate.await;
        }));
        yield_many().await;

        let token = CancellationToken::new();
        let counter = ran.clone();
        let queued = throttler.schedule(token.clone(), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        token.cancel();

        // Freed slot is skipped past the cancelled waiter
        release.send(()).unwrap();
        blocker.await.unwrap();
        assert_eq!(throttler.active(), 0);

        assert_eq!(queued.await, Throttled::Cancelled);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(throttler.active(), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight_releases_slot() {
        let throttler = FetchThrottler::new(1);
        let token = CancellationToken::new();
        let handle = tokio::spawn(
            throttler.schedule(token.clone(), std::future::pending::<()>()),
        );
        yield_many().await;
        assert_eq!(throttler.active(), 1);

        token.cancel();
        assert_eq!(handle.await.unwrap(), Throttled::Cancelled);
        assert_eq!(throttler.active(), 0);
    }

    #[tokio::test]
    async fn test_dropped_future_gives_up_slot() {
        let throttler = FetchThrottler::new(1);
        let held = throttler.schedule(CancellationToken::new(), async {});
        assert_eq!(throttler.active(), 1);
        let queued = throttler.schedule(CancellationToken::new(), async {});
        assert_eq!(throttler.queued(), 1);

        drop(queued);
        assert_eq!(throttler.queued(), 0);
        drop(held);
        assert_eq!(throttler.active(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let throttler = FetchThrottler::new(4);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(throttler.schedule(
                CancellationToken::new(),
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    yield_many().await;
                    current.fetch_sub(1, Ordering::SeqCst);
                },
            )));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Throttled::Completed(()));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert_eq!(throttler.active(), 0);
    }
}

//! Mailbox queues with one-shot arrival waiters.
//!
//! A [`MessageQueue`] is a FIFO with two consumption styles: synchronous
//! `pop`/`peek` against the backlog, and an asynchronous [`MessageQueue::recv`]
//! that parks until the *next* push. A waiter registered while the queue is
//! non-empty is served by the next push, not from the backlog, so mixing the
//! two styles is allowed but keeps that documented ordering.
//!
//! The queue holds a single mutex and never runs user callbacks while it is
//! locked.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

use parking_lot::Mutex;

type WaiterFn<T> = Box<dyn FnOnce(T) + Send>;

struct QueueInner<T> {
    items: VecDeque<T>,
    waiters: Vec<WaiterFn<T>>,
}

/// A FIFO mailbox shared between producers and consumers.
pub struct MessageQueue<T> {
    inner: Mutex<QueueInner<T>>,
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        MessageQueue {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                waiters: Vec::new(),
            }),
        }
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MessageQueue")
            .field("items", &inner.items.len())
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

impl<T: Send + 'static> MessageQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message, or hands it straight to the oldest waiter.
    ///
    /// When at least one waiter is registered the message bypasses the
    /// backlog: the first waiter receives it and the remaining waiters stay
    /// registered for later pushes.
    pub fn push(&self, msg: T) {
        let first = {
            let mut inner = self.inner.lock();
            if inner.waiters.is_empty() {
                inner.items.push_back(msg);
                return;
            }
            inner.waiters.remove(0)
        };
        // Deliver with the lock released so the waiter may push again.
        first(msg);
    }

    /// Removes and returns the front of the backlog, if any.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    /// Number of queued (not yet consumed) messages.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Whether the backlog is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Registers a one-shot callback for the next pushed message.
    pub fn on_next(&self, waiter: impl FnOnce(T) + Send + 'static) {
        self.inner.lock().waiters.push(Box::new(waiter));
    }

    /// Suspends until the next push and returns that message.
    pub fn recv(&self) -> QueueRecv<'_, T> {
        QueueRecv {
            queue: self,
            state: Arc::new(Mutex::new(RecvState {
                value: None,
                waker: None,
            })),
            armed: false,
        }
    }
}

impl<T: Clone + Send + 'static> MessageQueue<T> {
    /// Returns a copy of the front of the backlog without consuming it.
    pub fn peek(&self) -> Option<T> {
        self.inner.lock().items.front().cloned()
    }
}

struct RecvState<T> {
    value: Option<T>,
    waker: Option<Waker>,
}

/// Future returned by [`MessageQueue::recv`].
pub struct QueueRecv<'a, T> {
    queue: &'a MessageQueue<T>,
    state: Arc<Mutex<RecvState<T>>>,
    armed: bool,
}

impl<T: Send + 'static> Future for QueueRecv<'_, T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();

        if !this.armed {
            // First poll drains the backlog before parking.
            if let Some(msg) = this.queue.pop() {
                return Poll::Ready(msg);
            }
            this.armed = true;
            this.state.lock().waker = Some(cx.waker().clone());
            let state = Arc::clone(&this.state);
            this.queue.on_next(move |msg| {
                let waker = {
                    let mut guard = state.lock();
                    guard.value = Some(msg);
                    guard.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            return Poll::Pending;
        }

        let mut guard = this.state.lock();
        match guard.value.take() {
            Some(msg) => Poll::Ready(msg),
            None => {
                guard.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for QueueRecv<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRecv").field("armed", &self.armed).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn fifo_order() {
        let queue = MessageQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.peek(), Some(1));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn waiter_bypasses_backlog() {
        let queue = MessageQueue::new();
        queue.push("backlog");

        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        queue.on_next(move |msg| *sink.lock() = Some(msg));

        // The waiter is fed by the next push, not the queued message.
        queue.push("fresh");
        assert_eq!(*got.lock(), Some("fresh"));
        assert_eq!(queue.pop(), Some("backlog"));
    }

    #[test]
    fn only_first_waiter_gets_the_push() {
        let queue = MessageQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            queue.on_next(move |_msg: u32| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        queue.push(7);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        queue.push(8);
        queue.push(9);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn waiter_may_push_reentrantly() {
        let queue: Arc<MessageQueue<u32>> = Arc::new(MessageQueue::new());
        let clone = Arc::clone(&queue);
        queue.on_next(move |msg| clone.push(msg + 1));
        queue.push(1);
        assert_eq!(queue.pop(), Some(2));
    }
}

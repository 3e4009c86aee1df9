//! Cooperative task handles and the poll scheduler that drives them.
//!
//! Every suspendable computation in a world (process bodies, device boot
//! sequences, test drivers) runs as a plain `async` block owned by a
//! [`Scheduler`]. The scheduler is not a reactor: nothing here blocks or
//! spins. Wakers enqueue task ids on a ready list, and the world step calls
//! [`Scheduler::run_until_idle`] to poll exactly the tasks that were woken.
//!
//! [`Task<T>`] is the spawn handle. An *eager* spawn polls the computation to
//! its first suspension immediately; a *lazy* spawn holds the future until the
//! handle itself is first awaited, and runs nothing at all if the handle is
//! dropped unawaited. Awaiting a handle consumes it, so a task cannot be
//! awaited twice by construction.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Weak;
use std::task::Context;
use std::task::Poll;
use std::task::Wake;
use std::task::Waker;

use parking_lot::Mutex;

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identifier of a spawned computation inside its scheduler.
pub type TaskId = u64;

struct SchedulerInner {
    /// Suspended computations, keyed by id. A task being polled is
    /// temporarily absent from this map.
    tasks: Mutex<HashMap<TaskId, BoxedFuture>>,
    ready: Mutex<VecDeque<TaskId>>,
    next_id: Mutex<TaskId>,
}

/// The single-threaded cooperative executor of a world.
///
/// Cheap to clone; clones share the same task table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                tasks: Mutex::new(HashMap::new()),
                ready: Mutex::new(VecDeque::new()),
                next_id: Mutex::new(0),
            }),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.inner.tasks.lock().len())
            .field("ready", &self.inner.ready.lock().len())
            .finish()
    }
}

struct TaskWaker {
    id: TaskId,
    sched: Weak<SchedulerInner>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        if let Some(sched) = self.sched.upgrade() {
            sched.ready.lock().push_back(self.id);
        }
    }
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` eagerly: it is polled to its first suspension before
    /// this call returns.
    pub fn spawn<T, F>(&self, future: F) -> Task<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let shared = TaskShared::new_slot();
        let id = self.insert(Self::completion_wrapper(future, Arc::clone(&shared)));
        self.poll_task(id);
        Task {
            shared,
            pending: None,
        }
    }

    /// Spawns `future` lazily: nothing runs until the returned handle is
    /// awaited (or detached). Dropping the handle unawaited discards the
    /// future without executing it.
    pub fn spawn_lazy<T, F>(&self, future: F) -> Task<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let shared = TaskShared::new_slot();
        let wrapped = Self::completion_wrapper(future, Arc::clone(&shared));
        Task {
            shared,
            pending: Some((self.clone(), wrapped)),
        }
    }

    /// Polls every woken task until the ready list drains.
    ///
    /// Tasks woken while this runs (including by each other) are processed in
    /// the same call, so an idle scheduler really has nothing left to do.
    pub fn run_until_idle(&self) {
        loop {
            let id = match self.inner.ready.lock().pop_front() {
                Some(id) => id,
                None => return,
            };
            self.poll_task(id);
        }
    }

    /// Number of live (suspended or ready) tasks.
    pub fn live_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    fn completion_wrapper<T: Send + 'static>(
        future: impl Future<Output = T> + Send + 'static,
        shared: Arc<Mutex<TaskShared<T>>>,
    ) -> BoxedFuture {
        Box::pin(async move {
            let value = future.await;
            let waker = {
                let mut slot = shared.lock();
                slot.value = Some(value);
                slot.finished = true;
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        })
    }

    fn insert(&self, future: BoxedFuture) -> TaskId {
        let id = {
            let mut next = self.inner.next_id.lock();
            *next += 1;
            *next
        };
        self.inner.tasks.lock().insert(id, future);
        id
    }

    fn poll_task(&self, id: TaskId) {
        // Take the future out so its own poll may spawn or wake freely.
        let Some(mut future) = self.inner.tasks.lock().remove(&id) else {
            return; // Stale wake for a finished task.
        };
        let waker = Waker::from(Arc::new(TaskWaker {
            id,
            sched: Arc::downgrade(&self.inner),
        }));
        let mut cx = Context::from_waker(&waker);
        if future.as_mut().poll(&mut cx).is_pending() {
            self.inner.tasks.lock().insert(id, future);
        }
    }
}

struct TaskShared<T> {
    value: Option<T>,
    waker: Option<Waker>,
    finished: bool,
}

impl<T> TaskShared<T> {
    fn new_slot() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(TaskShared {
            value: None,
            waker: None,
            finished: false,
        }))
    }
}

/// Handle to a spawned computation producing a `T`.
///
/// Await the handle to obtain the value, or call [`Task::detach`] to let the
/// computation finish unobserved. Awaiting moves the handle, which is what
/// makes a second await unrepresentable.
pub struct Task<T> {
    shared: Arc<Mutex<TaskShared<T>>>,
    /// Present only on a lazy handle that has not started yet.
    pending: Option<(Scheduler, BoxedFuture)>,
}

impl<T: Send + 'static> Task<T> {
    /// Whether the computation has produced its value.
    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    /// Extracts the value without awaiting. Returns `None` while the
    /// computation is still running (or was never started).
    pub fn try_take(&mut self) -> Option<T> {
        self.shared.lock().value.take()
    }

    /// Starts a lazy task (no-op on an eager one) and drops the handle,
    /// letting the computation run to completion unobserved.
    pub fn detach(mut self) {
        self.start_if_pending();
    }

    fn start_if_pending(&mut self) {
        if let Some((sched, future)) = self.pending.take() {
            let id = sched.insert(future);
            sched.poll_task(id);
        }
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        this.start_if_pending();

        let mut slot = this.shared.lock();
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("finished", &self.shared.lock().finished)
            .field("lazy_pending", &self.pending.is_some())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn eager_task_runs_at_spawn() {
        let sched = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&hits);
        let mut task = sched.spawn(async move {
            probe.fetch_add(1, Ordering::SeqCst);
            42
        });
        // Completed synchronously: no await needed to observe the effect.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
        assert_eq!(task.try_take(), Some(42));
    }

    #[test]
    fn lazy_task_dropped_unawaited_never_runs() {
        let sched = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&hits);
        let task = sched.spawn_lazy(async move {
            probe.fetch_add(1, Ordering::SeqCst);
        });
        drop(task);
        sched.run_until_idle();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn awaiting_a_task_resumes_the_waiter() {
        let sched = Scheduler::new();
        let inner = sched.spawn_lazy(async { 7 });
        let mut outer = sched.spawn(async move { inner.await + 1 });
        sched.run_until_idle();
        assert_eq!(outer.try_take(), Some(8));
    }

    #[test]
    fn try_take_before_completion_is_none() {
        let sched = Scheduler::new();
        // A future that never resolves on its own.
        let mut task = sched.spawn(std::future::pending::<u32>());
        assert!(!task.is_finished());
        assert_eq!(task.try_take(), None);
    }

    #[test]
    fn detach_starts_a_lazy_task() {
        let sched = Scheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&hits);
        sched
            .spawn_lazy(async move {
                probe.fetch_add(1, Ordering::SeqCst);
            })
            .detach();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finished_tasks_leave_the_table() {
        let sched = Scheduler::new();
        sched.spawn(async {}).detach();
        sched.run_until_idle();
        assert_eq!(sched.live_tasks(), 0);
    }
}

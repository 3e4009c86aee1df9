//! The world's timer table: one-shot and looping callbacks on simulated time.
//!
//! Timers live in a dense slot array with a free-index set, so handles stay
//! small and allocation settles once the world warms up. Slots are reused;
//! each carries a generation counter so a handle kept across a reuse goes
//! quietly stale instead of cancelling the new tenant.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

use parking_lot::Mutex;

/// Callback invoked when a timer expires. Looping timers call it once per
/// period.
pub type TimerCallback = Box<dyn FnMut() + Send>;

/// Handle to a scheduled timer. Stale handles (cancelled, expired, or from a
/// reused slot) are no-ops for every operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    index: usize,
    generation: u32,
}

struct TimerSlot {
    length: f32,
    remaining: f32,
    callback: Option<Arc<Mutex<TimerCallback>>>,
    generation: u32,
    alive: bool,
    paused: bool,
    looping: bool,
}

struct TimerTable {
    slots: Vec<TimerSlot>,
    free: BTreeSet<usize>,
}

/// The timer manager of a world. Cheap to clone; clones share one table.
#[derive(Clone)]
pub struct TimerManager {
    inner: Arc<Mutex<TimerTable>>,
}

impl Default for TimerManager {
    fn default() -> Self {
        TimerManager {
            inner: Arc::new(Mutex::new(TimerTable {
                slots: Vec::new(),
                free: BTreeSet::new(),
            })),
        }
    }
}

impl std::fmt::Debug for TimerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.inner.lock();
        f.debug_struct("TimerManager")
            .field("slots", &table.slots.len())
            .field("free", &table.free.len())
            .finish()
    }
}

impl TimerManager {
    /// Creates an empty timer table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `callback` to fire after `seconds` of stepped time.
    ///
    /// A looping timer rearms itself each period until cancelled.
    pub fn set(
        &self,
        seconds: f32,
        callback: impl FnMut() + Send + 'static,
        looping: bool,
    ) -> TimerHandle {
        let mut table = self.inner.lock();
        let callback = Arc::new(Mutex::new(Box::new(callback) as TimerCallback));

        if let Some(index) = table.free.pop_first() {
            let slot = &mut table.slots[index];
            slot.length = seconds;
            slot.remaining = seconds;
            slot.callback = Some(callback);
            slot.generation = slot.generation.wrapping_add(1);
            slot.alive = true;
            slot.paused = false;
            slot.looping = looping;
            return TimerHandle {
                index,
                generation: slot.generation,
            };
        }

        table.slots.push(TimerSlot {
            length: seconds,
            remaining: seconds,
            callback: Some(callback),
            generation: 0,
            alive: true,
            paused: false,
            looping,
        });
        TimerHandle {
            index: table.slots.len() - 1,
            generation: 0,
        }
    }

    /// Pauses a timer without cancelling it. Stale handles are ignored.
    pub fn pause(&self, handle: TimerHandle) {
        let mut table = self.inner.lock();
        if let Some(slot) = live_slot(&mut table, handle) {
            slot.paused = true;
        }
    }

    /// Resumes a paused timer. Stale handles are ignored.
    pub fn resume(&self, handle: TimerHandle) {
        let mut table = self.inner.lock();
        if let Some(slot) = live_slot(&mut table, handle) {
            slot.paused = false;
        }
    }

    /// Cancels a timer; its callback will not fire. Stale handles are ignored.
    pub fn cancel(&self, handle: TimerHandle) {
        let mut table = self.inner.lock();
        if live_slot(&mut table, handle).is_none() {
            return;
        }
        let slot = &mut table.slots[handle.index];
        slot.alive = false;
        slot.callback = None;
        table.free.insert(handle.index);
    }

    /// Whether the handle still refers to a scheduled timer.
    pub fn is_live(&self, handle: TimerHandle) -> bool {
        let mut table = self.inner.lock();
        live_slot(&mut table, handle).is_some()
    }

    /// Advances every running timer by `dt` seconds and fires the ones that
    /// cross zero. Callbacks run outside the table lock, in slot order.
    pub fn step(&self, dt: f32) {
        let due = {
            let mut table = self.inner.lock();
            let mut due = Vec::new();
            for index in 0..table.slots.len() {
                let slot = &mut table.slots[index];
                if !slot.alive || slot.paused {
                    continue;
                }
                slot.remaining -= dt;
                if slot.remaining > 0.0 {
                    continue;
                }
                if slot.looping {
                    slot.remaining = slot.length;
                    if let Some(callback) = &slot.callback {
                        due.push((Some((index, slot.generation)), Arc::clone(callback)));
                    }
                } else {
                    slot.alive = false;
                    if let Some(callback) = slot.callback.take() {
                        due.push((None, callback));
                    }
                    table.free.insert(index);
                }
            }
            due
        };

        for (recheck, callback) in due {
            // A callback fired earlier in this sweep may have cancelled a
            // looping sibling; skip it if so. Expired one-shots already left
            // their slot and always fire.
            let still_wanted = match recheck {
                None => true,
                Some((index, generation)) => {
                    let table = self.inner.lock();
                    let slot = &table.slots[index];
                    slot.alive && slot.generation == generation
                }
            };
            if still_wanted {
                (*callback.lock())();
            }
        }
    }

    /// Suspends the calling task for `seconds` of stepped time.
    pub fn wait(&self, seconds: f32) -> TimerWait {
        TimerWait {
            timers: self.clone(),
            seconds,
            state: Arc::new(Mutex::new(WaitState {
                fired: false,
                waker: None,
            })),
            armed: false,
        }
    }
}

fn live_slot(table: &mut TimerTable, handle: TimerHandle) -> Option<&mut TimerSlot> {
    let slot = table.slots.get_mut(handle.index)?;
    (slot.alive && slot.generation == handle.generation).then_some(slot)
}

struct WaitState {
    fired: bool,
    waker: Option<Waker>,
}

/// Future returned by [`TimerManager::wait`].
pub struct TimerWait {
    timers: TimerManager,
    seconds: f32,
    state: Arc<Mutex<WaitState>>,
    armed: bool,
}

impl Future for TimerWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();

        if !this.armed {
            if this.seconds <= 0.0 {
                return Poll::Ready(());
            }
            this.armed = true;
            this.state.lock().waker = Some(cx.waker().clone());
            let state = Arc::clone(&this.state);
            this.timers.set(
                this.seconds,
                move || {
                    let waker = {
                        let mut guard = state.lock();
                        guard.fired = true;
                        guard.waker.take()
                    };
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                },
                false,
            );
            return Poll::Pending;
        }

        let mut guard = this.state.lock();
        if guard.fired {
            Poll::Ready(())
        } else {
            guard.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl std::fmt::Debug for TimerWait {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerWait")
            .field("seconds", &self.seconds)
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&hits);
        (hits, move || {
            probe.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn one_shot_fires_exactly_once() {
        let timers = TimerManager::new();
        let (hits, callback) = counter();
        timers.set(1.0, callback, false);

        timers.step(0.5);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        timers.step(0.5);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        timers.step(10.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn looping_fires_once_per_period() {
        let timers = TimerManager::new();
        let (hits, callback) = counter();
        let handle = timers.set(1.0, callback, true);

        for _ in 0..4 {
            timers.step(1.0);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        timers.cancel(handle);
        timers.step(5.0);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn cancel_prevents_the_callback() {
        let timers = TimerManager::new();
        let (hits, callback) = counter();
        let handle = timers.set(1.0, callback, false);
        timers.cancel(handle);
        timers.step(2.0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pause_holds_the_countdown() {
        let timers = TimerManager::new();
        let (hits, callback) = counter();
        let handle = timers.set(1.0, callback, false);

        timers.pause(handle);
        timers.step(5.0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        timers.resume(handle);
        timers.step(1.0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_handle_is_a_no_op_after_slot_reuse() {
        let timers = TimerManager::new();
        let (first_hits, first_callback) = counter();
        let stale = timers.set(1.0, first_callback, false);
        timers.step(1.0);
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);

        // The freed slot is recycled for a new timer.
        let (second_hits, second_callback) = counter();
        let fresh = timers.set(1.0, second_callback, false);
        assert!(!timers.is_live(stale));
        assert!(timers.is_live(fresh));

        // Cancelling through the stale handle must not touch the new tenant.
        timers.cancel(stale);
        timers.step(1.0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_future_resumes_after_enough_steps() {
        let sched = crate::task::Scheduler::new();
        let timers = TimerManager::new();
        let wait = timers.wait(1.0);
        let mut task = sched.spawn(async move {
            wait.await;
            99
        });

        timers.step(0.6);
        sched.run_until_idle();
        assert!(!task.is_finished());

        timers.step(0.6);
        sched.run_until_idle();
        assert_eq!(task.try_take(), Some(99));
    }
}

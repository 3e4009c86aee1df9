//! The world: the fixed-step driver everything else hangs off.
//!
//! One world owns its hosts, the timer table, the socket registry, the task
//! scheduler and an update queue of one-shot closures. A step drains at most
//! one queued closure, advances the timers, pumps every socket forwarder
//! once, and then polls whatever tasks those wakeups made ready. The update
//! queue is the only structure other threads may touch; all remaining state
//! belongs to the driving thread.
//!
//! [`World::launch`] moves the world onto a background thread that steps it
//! against wall-clock time; the returned handle exposes the update queue and
//! stops the loop on drop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use log::info;

use crate::addr::Address;
use crate::host::Host;
use crate::host::HostParams;
use crate::queue::MessageQueue;
use crate::sock::IpManager;
use crate::task::Scheduler;
use crate::timer::TimerManager;

/// A one-shot closure marshalled onto the world thread.
pub type UpdateFn = Box<dyn FnOnce() + Send>;

/// Queue of pending cross-thread updates.
pub type UpdateQueue = Arc<MessageQueue<UpdateFn>>;

/// The shared services of a world: scheduler, timers, socket registry and
/// the update queue. Cheap to clone and handed to every host and OS.
#[derive(Clone, Debug)]
pub struct WorldCtx {
    /// The cooperative task scheduler.
    pub scheduler: Scheduler,
    /// The timer table.
    pub timers: TimerManager,
    /// The socket binding registry.
    pub ip: IpManager,
    /// The cross-thread update queue.
    pub queue: UpdateQueue,
}

impl WorldCtx {
    /// Fresh services for a new world.
    pub fn new() -> Self {
        WorldCtx {
            scheduler: Scheduler::new(),
            timers: TimerManager::new(),
            ip: IpManager::new(),
            queue: Arc::new(MessageQueue::new()),
        }
    }
}

impl Default for WorldCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// The simulation aggregate: hosts plus the services driving them.
#[derive(Debug)]
pub struct World {
    ctx: WorldCtx,
    hosts: Vec<Host>,
    links: HashMap<String, Address>,
}

impl Default for World {
    fn default() -> Self {
        World {
            ctx: WorldCtx::new(),
            hosts: Vec::new(),
            links: HashMap::new(),
        }
    }
}

impl World {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// The world's shared services.
    pub fn ctx(&self) -> &WorldCtx {
        &self.ctx
    }

    /// Creates a host with the standard device fit (disk, CPU, NIC) and a
    /// basic OS, registers its address under its hostname, and returns its
    /// index.
    pub fn create_host(&mut self, hostname: impl Into<String>, params: HostParams) -> usize {
        let hostname = hostname.into();
        let mut host = Host::new(self.ctx.clone(), hostname.clone(), params);
        host.install_basic_os();
        if let Some(addr) = host.address() {
            self.links.insert(hostname, addr);
        }
        self.hosts.push(host);
        self.hosts.len() - 1
    }

    /// Adopts an externally built host.
    pub fn add_host(&mut self, host: Host) -> usize {
        if let Some(addr) = host.address() {
            self.links.insert(host.hostname().to_string(), addr);
        }
        self.hosts.push(host);
        self.hosts.len() - 1
    }

    /// The host at `index`.
    pub fn host(&self, index: usize) -> Option<&Host> {
        self.hosts.get(index)
    }

    /// Mutable access to the host at `index` (to start or reconfigure it).
    pub fn host_mut(&mut self, index: usize) -> Option<&mut Host> {
        self.hosts.get_mut(index)
    }

    /// All hosts.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Resolves a hostname registered in this world to its address.
    pub fn lookup_host(&self, hostname: &str) -> Option<Address> {
        self.links.get(hostname).copied()
    }

    /// Advances the world by `dt` seconds of simulated time.
    ///
    /// Order within the step: one queued update closure, then timer expiry,
    /// then one pump of every socket forwarder, then the task scheduler runs
    /// until no woken task remains. Work scheduled by callbacks lands no
    /// earlier than the next step.
    pub fn step(&mut self, dt: f32) {
        if let Some(update) = self.ctx.queue.pop() {
            update();
        }
        self.ctx.timers.step(dt);
        self.ctx.ip.step();
        self.ctx.scheduler.run_until_idle();
    }

    /// Steps `count` times with a fixed `dt`. Handy for tests and scripted
    /// scenarios.
    pub fn step_many(&mut self, count: usize, dt: f32) {
        for _ in 0..count {
            self.step(dt);
        }
    }

    /// Moves the world onto a background thread that steps it against
    /// wall-clock time, sleeping ~1ms between ticks.
    pub fn launch(mut self) -> WorldHandle {
        let queue = Arc::clone(&self.ctx.queue);
        let running = Arc::new(AtomicBool::new(true));
        let stop_flag = Arc::clone(&running);

        let thread = std::thread::spawn(move || {
            info!("world loop starting");
            let mut last = Instant::now();
            while stop_flag.load(Ordering::Relaxed) {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;
                self.step(dt);
                std::thread::sleep(Duration::from_millis(1));
            }
            info!("world loop stopped");
        });

        WorldHandle {
            queue,
            running,
            thread: Some(thread),
        }
    }
}

/// Handle to a launched world. The update queue is the only cross-thread
/// entry point into the running simulation.
#[derive(Debug)]
pub struct WorldHandle {
    queue: UpdateQueue,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorldHandle {
    /// Enqueues a closure to run on the world thread (one per step).
    pub fn push_update(&self, update: impl FnOnce() + Send + 'static) {
        self.queue.push(Box::new(update));
    }

    /// Stops the loop and joins the world thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WorldHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn step_runs_one_update_closure() {
        let mut world = World::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            world.ctx().queue.push(Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        world.step(0.01);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        world.step(0.01);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn step_order_updates_then_timers() {
        let mut world = World::new();
        let order: Arc<parking_lot::Mutex<Vec<&'static str>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        let timer_order = Arc::clone(&order);
        world.ctx().timers.set(
            0.01,
            move || timer_order.lock().push("timer"),
            false,
        );
        let update_order = Arc::clone(&order);
        world
            .ctx()
            .queue
            .push(Box::new(move || update_order.lock().push("update")));

        world.step(0.02);
        assert_eq!(order.lock().as_slice(), ["update", "timer"]);
    }

    #[test]
    fn launch_and_stop() {
        let world = World::new();
        let mut handle = world.launch();
        let hits = Arc::new(AtomicUsize::new(0));
        let probe = Arc::clone(&hits);
        handle.push_update(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        });
        // Give the loop a few ticks to drain the update.
        for _ in 0..200 {
            if hits.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        handle.stop();
    }

    #[test]
    fn host_links_resolve_by_name() {
        let mut world = World::new();
        world.create_host("alpha", HostParams::default());
        assert!(world.lookup_host("alpha").is_some());
        assert!(world.lookup_host("beta").is_none());
    }
}

//! Typed virtual sockets and the world-level binding registry.
//!
//! A [`Socket<Rx, Tx>`] is one end of a bidirectional message channel: `Tx`
//! values go out through its transmit queue, `Rx` values arrive on its
//! receive queue. The [`IpManager`] maps `(address, port)` pairs to bound
//! sockets and owns the per-connection forwarders installed by
//! [`IpManager::connect`]. A forwarder moves at most one message in each
//! direction per world step, and unregisters itself once either endpoint has
//! been dropped. Both endpoints are held weakly, so an OS closing a socket
//! tears the stream down on the following step.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Weak;

use log::debug;
use log::info;
use parking_lot::Mutex;

use crate::addr::AddrPair;
use crate::addr::Address;
use crate::queue::MessageQueue;
use crate::queue::QueueRecv;

/// One endpoint of a typed bidirectional channel.
///
/// The two type parameters are from this endpoint's point of view: `Rx` is
/// what it receives, `Tx` is what it sends. The peer endpoint of a connected
/// stream therefore has the mirrored type `Socket<Tx, Rx>`.
#[derive(Debug)]
pub struct Socket<Rx, Tx> {
    rx: MessageQueue<Rx>,
    tx: MessageQueue<Tx>,
}

impl<Rx, Tx> Default for Socket<Rx, Tx>
where
    Rx: Send + 'static,
    Tx: Send + 'static,
{
    fn default() -> Self {
        Socket {
            rx: MessageQueue::new(),
            tx: MessageQueue::new(),
        }
    }
}

impl<Rx, Tx> Socket<Rx, Tx>
where
    Rx: Send + 'static,
    Tx: Send + 'static,
{
    /// Creates a disconnected socket.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues an outgoing message. Before a stream exists the message simply
    /// waits in the transmit queue; it is delivered on the first step after a
    /// connect.
    pub fn send(&self, msg: Tx) {
        self.tx.push(msg);
    }

    /// Takes the next received message, if any.
    pub fn try_recv(&self) -> Option<Rx> {
        self.rx.pop()
    }

    /// Suspends until a message arrives.
    pub fn recv(&self) -> QueueRecv<'_, Rx> {
        self.rx.recv()
    }

    /// Number of undelivered incoming messages.
    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    /// Number of unsent outgoing messages.
    pub fn pending_tx(&self) -> usize {
        self.tx.len()
    }

    /// Injects a message into the receive side, as a forwarder (or a test
    /// standing in for one) would.
    pub fn deliver(&self, msg: Rx) {
        self.rx.push(msg);
    }

    /// Drains one outgoing message, as a forwarder would.
    pub fn take_outgoing(&self) -> Option<Tx> {
        self.tx.pop()
    }
}

/// A per-connection pump: returns `false` once it should be removed.
type Forwarder = Box<dyn FnMut() -> bool + Send>;

struct IpState {
    bindings: HashMap<AddrPair, Weak<dyn Any + Send + Sync>>,
    streams: Vec<Forwarder>,
}

/// The world-level registry of socket bindings and active streams.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct IpManager {
    inner: Arc<Mutex<IpState>>,
}

impl Default for IpManager {
    fn default() -> Self {
        IpManager {
            inner: Arc::new(Mutex::new(IpState {
                bindings: HashMap::new(),
                streams: Vec::new(),
            })),
        }
    }
}

impl std::fmt::Debug for IpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("IpManager")
            .field("bindings", &state.bindings.len())
            .field("streams", &state.streams.len())
            .finish()
    }
}

impl IpManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `sock` to `(addr, port)`. Fails if the pair is already bound to
    /// a live socket.
    pub fn bind<Rx, Tx>(&self, sock: &Arc<Socket<Rx, Tx>>, addr: Address, port: u16) -> bool
    where
        Rx: Send + Sync + 'static,
        Tx: Send + Sync + 'static,
    {
        let key = AddrPair::new(addr, port);
        let mut state = self.inner.lock();
        if let Some(existing) = state.bindings.get(&key) {
            if existing.strong_count() > 0 {
                return false;
            }
        }
        info!("binding socket to {key}");
        let any: Arc<dyn Any + Send + Sync> = Arc::clone(sock) as Arc<dyn Any + Send + Sync>;
        state.bindings.insert(key, Arc::downgrade(&any));
        true
    }

    /// Drops the binding for `(addr, port)`, if any.
    pub fn unbind(&self, addr: Address, port: u16) -> bool {
        self.inner
            .lock()
            .bindings
            .remove(&AddrPair::new(addr, port))
            .is_some()
    }

    /// Looks up the socket bound to `(addr, port)`. Entries whose socket has
    /// been dropped resolve to `None` and are pruned.
    pub fn resolve(&self, addr: Address, port: u16) -> Option<Arc<dyn Any + Send + Sync>> {
        let key = AddrPair::new(addr, port);
        let mut state = self.inner.lock();
        match state.bindings.get(&key).and_then(Weak::upgrade) {
            Some(any) => Some(any),
            None => {
                state.bindings.remove(&key);
                None
            }
        }
    }

    /// Looks up and downcasts the socket bound to `(addr, port)`.
    pub fn resolve_as<Rx, Tx>(&self, addr: Address, port: u16) -> Option<Arc<Socket<Rx, Tx>>>
    where
        Rx: Send + Sync + 'static,
        Tx: Send + Sync + 'static,
    {
        self.resolve(addr, port)?.downcast::<Socket<Rx, Tx>>().ok()
    }

    /// Connects `local` to whatever is bound at `(addr, port)`.
    ///
    /// The remote must be the exact mirror type `Socket<Tx, Rx>`; anything
    /// else is a connection failure. On success a forwarder is installed that
    /// moves one message each way per step.
    pub fn connect<Rx, Tx>(&self, local: &Arc<Socket<Rx, Tx>>, addr: Address, port: u16) -> bool
    where
        Rx: Send + Sync + 'static,
        Tx: Send + Sync + 'static,
    {
        let Some(remote) = self.resolve_as::<Tx, Rx>(addr, port) else {
            debug!("connect to {} failed: no compatible peer", AddrPair::new(addr, port));
            return false;
        };
        info!("connecting socket to {}", AddrPair::new(addr, port));

        let local = Arc::downgrade(local);
        let remote = Arc::downgrade(&remote);
        let forwarder: Forwarder = Box::new(move || {
            let (Some(local), Some(remote)) = (local.upgrade(), remote.upgrade()) else {
                return false;
            };
            if let Some(msg) = remote.take_outgoing() {
                local.deliver(msg);
            }
            if let Some(msg) = local.take_outgoing() {
                remote.deliver(msg);
            }
            true
        });
        self.inner.lock().streams.push(forwarder);
        true
    }

    /// Number of live forwarders.
    pub fn stream_count(&self) -> usize {
        self.inner.lock().streams.len()
    }

    /// Whether any live socket is bound at `addr`, on any port.
    pub fn has_bindings_for(&self, addr: Address) -> bool {
        self.inner
            .lock()
            .bindings
            .iter()
            .any(|(key, sock)| key.addr == addr && sock.strong_count() > 0)
    }

    /// Pumps every forwarder once and drops the ones whose endpoints died.
    ///
    /// Forwarders run outside the registry lock, so a message arrival may
    /// bind or connect further sockets; streams created during the sweep
    /// start pumping on the next step.
    pub fn step(&self) {
        let mut streams = std::mem::take(&mut self.inner.lock().streams);
        streams.retain_mut(|forward| forward());
        let mut state = self.inner.lock();
        // Streams opened by callbacks during the sweep keep their arrival
        // order, after the survivors.
        let opened = std::mem::take(&mut state.streams);
        streams.extend(opened);
        state.streams = streams;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bind_resolve_unbind() {
        let ip = IpManager::new();
        let addr = Address::from_halves(0, 1);
        let sock: Arc<Socket<String, String>> = Socket::new();

        assert!(ip.resolve(addr, 22).is_none());
        assert!(ip.bind(&sock, addr, 22));
        assert!(ip.resolve_as::<String, String>(addr, 22).is_some());

        // Double bind of the same pair fails.
        let other: Arc<Socket<String, String>> = Socket::new();
        assert!(!ip.bind(&other, addr, 22));

        assert!(ip.unbind(addr, 22));
        assert!(ip.resolve(addr, 22).is_none());
    }

    #[test]
    fn dropped_socket_unbinds() {
        let ip = IpManager::new();
        let addr = Address::from_halves(0, 2);
        let sock: Arc<Socket<u32, u32>> = Socket::new();
        assert!(ip.bind(&sock, addr, 7));
        drop(sock);
        assert!(ip.resolve(addr, 7).is_none());
        // The stale entry no longer blocks a new bind.
        let fresh: Arc<Socket<u32, u32>> = Socket::new();
        assert!(ip.bind(&fresh, addr, 7));
    }

    #[test]
    fn forwarder_moves_one_message_each_way_per_step() {
        let ip = IpManager::new();
        let addr = Address::from_halves(0, 3);
        let server: Arc<Socket<String, u32>> = Socket::new();
        let client: Arc<Socket<u32, String>> = Socket::new();

        assert!(ip.bind(&server, addr, 22));
        assert!(ip.connect(&client, addr, 22));

        client.send("one".to_string());
        client.send("two".to_string());
        server.send(11);

        ip.step();
        assert_eq!(server.try_recv(), Some("one".to_string()));
        assert_eq!(server.try_recv(), None);
        assert_eq!(client.try_recv(), Some(11));

        ip.step();
        assert_eq!(server.try_recv(), Some("two".to_string()));
    }

    #[test]
    fn type_mismatch_refuses_to_connect() {
        let ip = IpManager::new();
        let addr = Address::from_halves(0, 4);
        let server: Arc<Socket<String, u32>> = Socket::new();
        let wrong: Arc<Socket<String, String>> = Socket::new();

        assert!(ip.bind(&server, addr, 80));
        assert!(!ip.connect(&wrong, addr, 80));
        assert_eq!(ip.stream_count(), 0);
    }

    #[test]
    fn stream_dies_with_its_endpoint() {
        let ip = IpManager::new();
        let addr = Address::from_halves(0, 5);
        let server: Arc<Socket<u32, u32>> = Socket::new();
        let client: Arc<Socket<u32, u32>> = Socket::new();

        assert!(ip.bind(&server, addr, 9));
        assert!(ip.connect(&client, addr, 9));
        assert_eq!(ip.stream_count(), 1);

        drop(server);
        ip.step();
        assert_eq!(ip.stream_count(), 0);
    }

    #[test]
    fn send_before_connect_is_delivered_after() {
        let ip = IpManager::new();
        let addr = Address::from_halves(0, 6);
        let server: Arc<Socket<u32, u32>> = Socket::new();
        let client: Arc<Socket<u32, u32>> = Socket::new();

        client.send(41);
        assert!(ip.bind(&server, addr, 1));
        assert!(ip.connect(&client, addr, 1));
        ip.step();
        assert_eq!(server.try_recv(), Some(41));
        assert_eq!(client.pending_tx(), 0);
    }
}

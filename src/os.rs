//! The per-host operating system: device index, process table, socket
//! table, user and session stores, and the glue that runs programs.
//!
//! An OS is composed, not subclassed: it takes its default shell as a
//! construction parameter, and the standard filesystem layout is seeded
//! separately (see [`crate::programs::install_base_system`]). The OS borrows
//! its devices from the owning host and reaches world services through the
//! shared [`WorldCtx`].

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use log::warn;
use parking_lot::Mutex;

use crate::addr::Address;
use crate::device::Device;
use crate::device::DeviceState;
use crate::fs::Access;
use crate::fs::FilePath;
use crate::fs::FsHandle;
use crate::proc::ExitCode;
use crate::proc::Proc;
use crate::proc::ProgramFn;
use crate::proc::ReplyWriter;
use crate::proc::TextWriter;
use crate::session::SessionManager;
use crate::sock::Socket;
use crate::task::Task;
use crate::timer::TimerWait;
use crate::users::UsersManager;
use crate::wire::CommandQuery;
use crate::wire::CommandReply;
use crate::world::WorldCtx;

/// Construction parameters for an OS.
pub struct OsParams {
    /// The program started by [`Os::shell`] (and as a login shell).
    pub default_shell: ProgramFn,
}

impl std::fmt::Debug for OsParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsParams").finish_non_exhaustive()
    }
}

/// Parameters for creating a process.
#[derive(Default)]
pub struct CreateProcessParams {
    /// Pid of the session leader to parent this process under.
    pub leader: Option<i32>,
    /// Effective user id.
    pub uid: i32,
    /// Effective group id.
    pub gid: i32,
    /// Text writer to attach, if any.
    pub text_writer: Option<TextWriter>,
    /// Framed-reply writer to attach, if any.
    pub reply_writer: Option<ReplyWriter>,
}

impl std::fmt::Debug for CreateProcessParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateProcessParams")
            .field("leader", &self.leader)
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .finish_non_exhaustive()
    }
}

pub(crate) struct OsInner {
    hostname: String,
    ctx: WorldCtx,
    state: Mutex<DeviceState>,
    devices: Mutex<BTreeMap<u32, Device>>,
    host_devices: Mutex<Vec<Device>>,
    procs: Mutex<HashMap<i32, Proc>>,
    sockets: Mutex<HashMap<i32, Arc<dyn Any + Send + Sync>>>,
    pid_counter: Mutex<i32>,
    fd_counter: Mutex<i32>,
    users: Mutex<UsersManager>,
    sessions: Mutex<SessionManager>,
    default_shell: ProgramFn,
}

/// Handle to a host's OS. Clones share the same kernel state.
#[derive(Clone)]
pub struct Os {
    pub(crate) inner: Arc<OsInner>,
}

impl std::fmt::Debug for Os {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Os")
            .field("hostname", &self.inner.hostname)
            .field("state", &self.state())
            .field("processes", &self.inner.procs.lock().len())
            .finish()
    }
}

impl Os {
    /// Builds an OS over the host's devices and snapshots them into the
    /// device index.
    pub fn new(hostname: impl Into<String>, ctx: WorldCtx, devices: &[Device], params: OsParams) -> Self {
        let os = Os {
            inner: Arc::new(OsInner {
                hostname: hostname.into(),
                ctx,
                state: Mutex::new(DeviceState::PoweredOff),
                devices: Mutex::new(BTreeMap::new()),
                host_devices: Mutex::new(devices.to_vec()),
                procs: Mutex::new(HashMap::new()),
                sockets: Mutex::new(HashMap::new()),
                pid_counter: Mutex::new(0),
                fd_counter: Mutex::new(0),
                users: Mutex::new(UsersManager::new()),
                sessions: Mutex::new(SessionManager::new()),
                default_shell: params.default_shell,
            }),
        };
        os.register_devices();
        os
    }

    pub(crate) fn from_inner(inner: Arc<OsInner>) -> Self {
        Os { inner }
    }

    /// The owning host's name.
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// The world services this OS schedules against.
    pub fn ctx(&self) -> &WorldCtx {
        &self.inner.ctx
    }

    /// The OS lifecycle state.
    pub fn state(&self) -> DeviceState {
        *self.inner.state.lock()
    }

    /// Moves the OS lifecycle state, logging the transition.
    pub fn set_state(&self, new_state: DeviceState) {
        let mut state = self.inner.state.lock();
        info!(
            "{}: OS changing state from {} to {}",
            self.inner.hostname,
            state.name(),
            new_state.name()
        );
        *state = new_state;
    }

    // --- devices ---

    /// Re-snapshots the host's devices into the uuid index. Returns the
    /// number registered.
    pub fn register_devices(&self) -> usize {
        let host_devices = self.inner.host_devices.lock();
        let mut devices = self.inner.devices.lock();
        devices.clear();
        for (uuid, device) in (1u32..).zip(host_devices.iter()) {
            devices.insert(uuid, device.clone());
        }

        // The users store projects from the first disk's filesystem.
        if let Some(fs) = host_devices.iter().find_map(Device::fs) {
            self.inner.users.lock().set_backing(fs);
        }
        devices.len()
    }

    /// Visits every registered device in uuid order.
    pub fn devices(&self, mut visitor: impl FnMut(u32, &Device)) {
        let devices = self.inner.devices.lock().clone();
        for (uuid, device) in &devices {
            visitor(*uuid, device);
        }
    }

    /// The first registered device with the given driver id.
    pub fn device_by_driver(&self, driver: &str) -> Option<Device> {
        self.inner
            .devices
            .lock()
            .values()
            .find(|device| device.driver_id() == driver)
            .cloned()
    }

    /// The first disk's filesystem, if the host has one.
    pub fn filesystem(&self) -> Option<FsHandle> {
        self.device_by_driver("disk").and_then(|disk| disk.fs())
    }

    /// The NIC's address, unspecified when the host has no NIC.
    pub fn global_addr(&self) -> Address {
        self.device_by_driver("net")
            .and_then(|nic| nic.addr())
            .unwrap_or(Address::UNSPECIFIED)
    }

    // --- users and sessions ---

    /// Runs `body` against the user/group store.
    pub fn with_users<R>(&self, body: impl FnOnce(&mut UsersManager) -> R) -> R {
        body(&mut self.inner.users.lock())
    }

    /// Opens a session and returns its id.
    pub fn create_session(&self, uid: i32, gid: i32) -> i32 {
        self.inner.sessions.lock().create_session(uid, gid)
    }

    /// Runs `body` against the session table.
    pub fn with_sessions<R>(&self, body: impl FnOnce(&mut SessionManager) -> R) -> R {
        body(&mut self.inner.sessions.lock())
    }

    // --- processes ---

    /// Creates a process entry (the computation is dispatched separately).
    pub fn create_process(&self, params: CreateProcessParams) -> Proc {
        let pid = {
            let mut counter = self.inner.pid_counter.lock();
            *counter += 1;
            *counter
        };

        let parent = params.leader.and_then(|leader_pid| {
            self.inner
                .procs
                .lock()
                .get(&leader_pid)
                .map(|leader| Arc::downgrade(&leader.inner))
        });

        let proc = Proc::new(
            pid,
            self.inner.ctx.clone(),
            Arc::downgrade(&self.inner),
            parent,
        );
        proc.set_uid(params.uid);
        proc.set_gid(params.gid);
        if let Some(writer) = params.text_writer {
            proc.set_text_writer(writer);
        }
        if let Some(writer) = params.reply_writer {
            proc.set_reply_writer(writer);
        }
        match params.leader {
            Some(leader) => {
                proc.set_leader(leader);
                info!(
                    "{}: created process {pid} (uid {}, gid {}) under {leader}",
                    self.inner.hostname,
                    proc.uid(),
                    proc.gid()
                );
            }
            None => info!(
                "{}: created process {pid} (uid {}, gid {})",
                self.inner.hostname,
                proc.uid(),
                proc.gid()
            ),
        }

        self.inner.procs.lock().insert(pid, proc.clone());
        proc
    }

    /// Creates, dispatches and supervises a process running `program`.
    /// The table entry is erased (by pid) when the computation returns.
    pub fn run_process(
        &self,
        program: ProgramFn,
        args: Vec<String>,
        params: CreateProcessParams,
    ) -> Task<ExitCode> {
        let proc = self.create_process(params);
        let pid = proc.pid();
        let os = self.clone();
        self.inner.ctx.scheduler.spawn(async move {
            let ret = proc.dispatch_awaited(&program, args).await;
            os.inner.procs.lock().remove(&pid);
            ret
        })
    }

    /// Visits every live process.
    pub fn processes(&self, mut visitor: impl FnMut(&Proc)) {
        let procs: Vec<Proc> = self.inner.procs.lock().values().cloned().collect();
        for proc in &procs {
            visitor(proc);
        }
    }

    /// The live process with the given pid.
    pub fn process(&self, pid: i32) -> Option<Proc> {
        self.inner.procs.lock().get(&pid).cloned()
    }

    // --- sockets ---

    /// Allocates a socket in the descriptor table. The table keeps the
    /// socket alive; [`Os::close_socket`] drops it, which unbinds it and
    /// tears down its streams on the next world step.
    pub fn create_socket<Rx, Tx>(&self) -> (i32, Arc<Socket<Rx, Tx>>)
    where
        Rx: Send + Sync + 'static,
        Tx: Send + Sync + 'static,
    {
        let fd = {
            let mut counter = self.inner.fd_counter.lock();
            *counter += 1;
            *counter
        };
        let sock = Socket::<Rx, Tx>::new();
        self.inner
            .sockets
            .lock()
            .insert(fd, Arc::clone(&sock) as Arc<dyn Any + Send + Sync>);
        (fd, sock)
    }

    /// Drops the socket at `fd` from the descriptor table.
    pub fn close_socket(&self, fd: i32) -> bool {
        self.inner.sockets.lock().remove(&fd).is_some()
    }

    /// Binds `sock` to this host's address at `port`.
    pub fn bind_socket<Rx, Tx>(&self, sock: &Arc<Socket<Rx, Tx>>, port: u16) -> bool
    where
        Rx: Send + Sync + 'static,
        Tx: Send + Sync + 'static,
    {
        self.inner.ctx.ip.bind(sock, self.global_addr(), port)
    }

    /// Connects `sock` to whatever is bound at `(addr, port)`.
    pub fn connect_socket<Rx, Tx>(&self, sock: &Arc<Socket<Rx, Tx>>, addr: Address, port: u16) -> bool
    where
        Rx: Send + Sync + 'static,
        Tx: Send + Sync + 'static,
    {
        self.inner.ctx.ip.connect(sock, addr, port)
    }

    // --- scheduling ---

    /// Suspends the calling task for `seconds` of world time.
    pub fn wait(&self, seconds: f32) -> TimerWait {
        self.inner.ctx.timers.wait(seconds)
    }

    /// Schedules `callback` to run once after `seconds` of world time.
    pub fn schedule(&self, seconds: f32, callback: impl FnMut() + Send + 'static) {
        self.inner.ctx.timers.set(seconds, callback, false);
    }

    // --- program execution ---

    /// Runs one command line as a root process, searching `/sbin`, `/bin`
    /// and `/usr/bin` for the program (absolute paths are taken as-is).
    /// Used by host boot scripts; returns whether a program was dispatched.
    pub fn exec_line(&self, line: &str) -> bool {
        let args = lex(line);
        let Some(name) = args.first() else {
            return false;
        };
        let Some(fs) = self.filesystem() else {
            return false;
        };

        let candidates: Vec<FilePath> = if name.starts_with('/') {
            vec![FilePath::new(name)]
        } else {
            ["/sbin", "/bin", "/usr/bin"]
                .iter()
                .map(|dir| FilePath::new(format!("{dir}/{name}")))
                .collect()
        };

        for path in candidates {
            let program = {
                let fs = fs.lock();
                fs.open(&path, Access::EXEC)
                    .ok()
                    .and_then(|(_, file)| file.lock().program())
            };
            if let Some(program) = program {
                self.run_process(program, args, CreateProcessParams::default())
                    .detach();
                return true;
            }
        }
        warn!("{}: exec '{name}': no such program", self.inner.hostname);
        false
    }

    /// Bootstraps a process running the default shell, wired to a fresh
    /// query/reply socket. Returns the process and the shell side of the
    /// socket; push [`CommandQuery`] frames in, read [`CommandReply`] frames
    /// out.
    pub fn shell(&self) -> (Proc, Arc<Socket<CommandQuery, CommandReply>>) {
        let (_fd, sock) = self.create_socket::<CommandQuery, CommandReply>();
        let proc = self.create_process(CreateProcessParams::default());
        proc.set_data(Arc::clone(&sock));

        let text_end = Arc::downgrade(&sock);
        proc.set_text_writer(Box::new(move |text| {
            if let Some(sock) = text_end.upgrade() {
                sock.send(CommandReply::output(text));
            }
        }));
        let reply_end = Arc::downgrade(&sock);
        proc.set_reply_writer(Box::new(move |reply| {
            if let Some(sock) = reply_end.upgrade() {
                sock.send(reply.clone());
            }
        }));
        let query_end = Arc::downgrade(&sock);
        proc.set_query_reader(Box::new(move || {
            query_end.upgrade().and_then(|sock| sock.try_recv())
        }));

        let shell = Arc::clone(&self.inner.default_shell);
        proc.dispatch(&shell, vec!["shell".to_string()]);
        (proc, sock)
    }

    /// Shuts this OS down by powering off its devices and itself.
    pub fn shutdown(&self) {
        let devices = self.inner.devices.lock().clone();
        for device in devices.values() {
            device.shutdown();
        }
        self.set_state(DeviceState::PoweredOff);
    }
}

/// Splits a command line into arguments, honouring double quotes.
pub fn lex(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in input.chars() {
        match ch {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lex_honours_quotes() {
        assert_eq!(lex("echo hello world"), ["echo", "hello", "world"]);
        assert_eq!(lex(r#"echo "hello world""#), ["echo", "hello world"]);
        assert_eq!(lex("   "), Vec::<String>::new());
        assert_eq!(lex(r#"touch "a b" c"#), ["touch", "a b", "c"]);
    }
}

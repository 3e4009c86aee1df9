//! The cooperative process: argv, environment, identity, and the typed
//! writer/reader channels commands talk through.
//!
//! A [`Proc`] is a cheap handle to shared process state; the OS keeps the
//! owning entry in its table and hands clones to the running computation.
//! Processes reference their OS weakly (the OS owns the process, never the
//! other way around) and may hold a reference-style link to a parent
//! process, which environment lookups and writer chains fall through to.
//!
//! Output has three stages: a registered text/reply writer, then the parent's
//! writers, then the process's configured stdout sink. The writer set is a
//! fixed set of channel variants (text lines, framed replies, framed
//! queries) rather than an open-ended typed map, since those are the only
//! message shapes the system carries.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Weak;

use log::debug;
use parking_lot::Mutex;

use crate::session::Session;
use crate::task::Task;
use crate::wire::CommandQuery;
use crate::wire::CommandReply;
use crate::world::WorldCtx;

/// Exit code of a process computation.
pub type ExitCode = i32;

/// A boxed, running process body.
pub type ProgramFuture = Pin<Box<dyn Future<Output = ExitCode> + Send + 'static>>;

/// An executable entry point: given the process and its argv, produces the
/// suspendable body. Stored on filesystem nodes and dispatched by the OS.
pub type ProgramFn = Arc<dyn Fn(Proc, Vec<String>) -> ProgramFuture + Send + Sync>;

/// Wraps a plain `async fn(Proc, Vec<String>) -> ExitCode` as a [`ProgramFn`].
pub fn program<F, Fut>(body: F) -> ProgramFn
where
    F: Fn(Proc, Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExitCode> + Send + 'static,
{
    Arc::new(move |proc, args| Box::pin(body(proc, args)))
}

/// How environment lookups treat the parent process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EnvAccess {
    /// Only this process's map.
    Local,
    /// Fall through to the parent on a miss (and mirror writes up).
    #[default]
    Inherit,
}

/// Writer for plain text output.
pub type TextWriter = Box<dyn Fn(&str) + Send + Sync>;
/// Writer for framed replies.
pub type ReplyWriter = Box<dyn Fn(&CommandReply) + Send + Sync>;
/// Reader producing framed queries, when input is attached.
pub type QueryReader = Box<dyn FnMut() -> Option<CommandQuery> + Send>;

const WARN_PREFIX: &str = "(\u{1b}[33m!\u{1b}[0m) ";
const ERR_PREFIX: &str = "(\u{1b}[31m!\u{1b}[0m) ";

struct ProcState {
    session: Session,
    leader: Option<i32>,
    args: Vec<String>,
    env: HashMap<String, String>,
    text_writer: Option<TextWriter>,
    reply_writer: Option<ReplyWriter>,
    query_reader: Option<QueryReader>,
    task: Option<Task<ExitCode>>,
    data: Option<Box<dyn Any + Send>>,
    stdout: Option<Box<dyn Write + Send>>,
}

pub(crate) struct ProcInner {
    pid: i32,
    ctx: WorldCtx,
    os: Weak<crate::os::OsInner>,
    parent: Option<Weak<ProcInner>>,
    state: Mutex<ProcState>,
}

/// Handle to a process. Clones share the same process state.
#[derive(Clone)]
pub struct Proc {
    pub(crate) inner: Arc<ProcInner>,
}

impl std::fmt::Debug for Proc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proc")
            .field("pid", &self.inner.pid)
            .field("name", &self.name())
            .finish()
    }
}

impl Proc {
    pub(crate) fn new(
        pid: i32,
        ctx: WorldCtx,
        os: Weak<crate::os::OsInner>,
        parent: Option<Weak<ProcInner>>,
    ) -> Self {
        Proc {
            inner: Arc::new(ProcInner {
                pid,
                ctx,
                os,
                parent,
                state: Mutex::new(ProcState {
                    session: Session::default(),
                    leader: None,
                    args: Vec::new(),
                    env: HashMap::new(),
                    text_writer: None,
                    reply_writer: None,
                    query_reader: None,
                    task: None,
                    data: None,
                    stdout: Some(Box::new(std::io::stdout())),
                }),
            }),
        }
    }

    /// The process id.
    pub fn pid(&self) -> i32 {
        self.inner.pid
    }

    /// The program name (argv\[0\]), `?` before dispatch.
    pub fn name(&self) -> String {
        let state = self.inner.state.lock();
        state.args.first().cloned().unwrap_or_else(|| "?".to_string())
    }

    /// A snapshot of the argument vector.
    pub fn args(&self) -> Vec<String> {
        self.inner.state.lock().args.clone()
    }

    /// The owning OS, if it is still alive.
    pub fn os(&self) -> Option<crate::os::Os> {
        self.inner.os.upgrade().map(crate::os::Os::from_inner)
    }

    /// The world services this process schedules against.
    pub fn ctx(&self) -> &WorldCtx {
        &self.inner.ctx
    }

    fn parent(&self) -> Option<Proc> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Proc { inner })
    }

    /// The pid of the session leader, when one was recorded.
    pub fn leader(&self) -> Option<i32> {
        self.inner.state.lock().leader
    }

    pub(crate) fn set_leader(&self, pid: i32) {
        self.inner.state.lock().leader = Some(pid);
    }

    // --- session identity ---

    /// A copy of the session identity.
    pub fn session(&self) -> Session {
        self.inner.state.lock().session.clone()
    }

    /// The effective user id.
    pub fn uid(&self) -> i32 {
        self.inner.state.lock().session.uid
    }

    /// The effective group id.
    pub fn gid(&self) -> i32 {
        self.inner.state.lock().session.gid
    }

    /// Makes this process a session leader, allocating a fresh session id.
    pub fn set_sid(&self) -> i32 {
        let sid = match self.os() {
            Some(os) => {
                let (uid, gid) = {
                    let state = self.inner.state.lock();
                    (state.session.uid, state.session.gid)
                };
                os.create_session(uid, gid)
            }
            None => 0,
        };
        self.inner.state.lock().session.sid = sid;
        sid
    }

    /// Changes the effective user id.
    pub fn set_uid(&self, uid: i32) {
        self.inner.state.lock().session.uid = uid;
    }

    /// Changes the effective group id.
    pub fn set_gid(&self, gid: i32) {
        self.inner.state.lock().session.gid = gid;
    }

    /// Adds supplementary groups to the session identity.
    pub fn add_groups(&self, groups: impl IntoIterator<Item = i32>) {
        self.inner.state.lock().session.groups.extend(groups);
    }

    // --- environment ---

    /// Sets an environment variable. With [`EnvAccess::Inherit`] the write is
    /// mirrored up the parent chain, which is how `PWD` and `RET_VAL` set by
    /// a subshell stay visible to the shell.
    pub fn set_var(&self, key: impl Into<String>, value: impl ToString, mode: EnvAccess) {
        let key = key.into();
        let value = value.to_string();
        self.inner.state.lock().env.insert(key.clone(), value.clone());
        if mode == EnvAccess::Inherit {
            if let Some(parent) = self.parent() {
                parent.set_var(key, value, mode);
            }
        }
    }

    /// Reads an environment variable.
    pub fn var(&self, key: &str, mode: EnvAccess) -> Option<String> {
        if let Some(value) = self.inner.state.lock().env.get(key) {
            return Some(value.clone());
        }
        if mode == EnvAccess::Inherit {
            if let Some(parent) = self.parent() {
                return parent.var(key, mode);
            }
        }
        None
    }

    /// Reads an environment variable with a fallback.
    pub fn var_or(&self, key: &str, fallback: &str) -> String {
        self.var(key, EnvAccess::Inherit)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Reads and parses an environment variable.
    pub fn var_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.var(key, EnvAccess::Inherit)?.parse().ok()
    }

    // --- writers and readers ---

    /// Attaches the text writer.
    pub fn set_text_writer(&self, writer: TextWriter) {
        self.inner.state.lock().text_writer = Some(writer);
    }

    /// Attaches the framed-reply writer.
    pub fn set_reply_writer(&self, writer: ReplyWriter) {
        self.inner.state.lock().reply_writer = Some(writer);
    }

    /// Attaches the framed-query reader.
    pub fn set_query_reader(&self, reader: QueryReader) {
        self.inner.state.lock().query_reader = Some(reader);
    }

    /// Routes text through the writer chain: own writer, then parent.
    /// Returns whether anything accepted it.
    pub fn write_text(&self, text: &str) -> bool {
        {
            let state = self.inner.state.lock();
            if let Some(writer) = &state.text_writer {
                writer(text);
                return true;
            }
        }
        self.parent().is_some_and(|parent| parent.write_text(text))
    }

    /// Routes a framed reply through the writer chain.
    pub fn write_reply(&self, reply: &CommandReply) -> bool {
        {
            let state = self.inner.state.lock();
            if let Some(writer) = &state.reply_writer {
                writer(reply);
                return true;
            }
        }
        self.parent().is_some_and(|parent| parent.write_reply(reply))
    }

    /// Pulls a framed query from the reader chain, if input is attached.
    pub fn read_query(&self) -> Option<CommandQuery> {
        {
            let mut state = self.inner.state.lock();
            if let Some(reader) = &mut state.query_reader {
                return reader();
            }
        }
        self.parent().and_then(|parent| parent.read_query())
    }

    /// Replaces the stdout sink text falls back to when no writer takes it.
    pub fn set_stdout(&self, sink: Option<Box<dyn Write + Send>>) {
        self.inner.state.lock().stdout = sink;
    }

    /// Writes to the process standard output.
    pub fn put(&self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if self.write_text(text) {
            return;
        }
        let mut state = self.inner.state.lock();
        match &mut state.stdout {
            Some(sink) => {
                let _ = sink.write_all(text.as_bytes());
                let _ = sink.flush();
            }
            None => debug!("pid {} dropped output: {text}", self.inner.pid),
        }
    }

    /// Writes a line to the process standard output.
    pub fn putln(&self, text: impl AsRef<str>) {
        self.put(format!("{}\n", text.as_ref()));
    }

    /// Writes with the warning marker.
    pub fn warn(&self, text: impl AsRef<str>) {
        self.put(format!("{WARN_PREFIX}{}", text.as_ref()));
    }

    /// Writes a line with the warning marker.
    pub fn warnln(&self, text: impl AsRef<str>) {
        self.putln(format!("{WARN_PREFIX}{}", text.as_ref()));
    }

    /// Writes with the error marker.
    pub fn err(&self, text: impl AsRef<str>) {
        self.put(format!("{ERR_PREFIX}{}", text.as_ref()));
    }

    /// Writes a line with the error marker.
    pub fn errln(&self, text: impl AsRef<str>) {
        self.putln(format!("{ERR_PREFIX}{}", text.as_ref()));
    }

    // --- the opaque data slot ---

    /// Stores an opaque value on the process.
    pub fn set_data<T: Any + Send>(&self, value: T) {
        self.inner.state.lock().data = Some(Box::new(value));
    }

    /// A clone of the stored value, when the type matches.
    pub fn data<T: Any + Clone + Send>(&self) -> Option<T> {
        self.inner
            .state
            .lock()
            .data
            .as_ref()
            .and_then(|slot| slot.downcast_ref::<T>())
            .cloned()
    }

    // --- dispatch ---

    /// Starts `body` running as this process's computation. The argv snapshot
    /// is stored first, so the body observes it from the start.
    pub fn dispatch(&self, body: &ProgramFn, args: Vec<String>) {
        self.inner.state.lock().args = args.clone();
        let future = body(self.clone(), args);
        // Spawned eagerly: the body runs to its first suspension here.
        let task = self.inner.ctx.scheduler.spawn(future);
        self.inner.state.lock().task = Some(task);
    }

    /// Dispatches and awaits the computation, yielding its exit code.
    pub async fn dispatch_awaited(&self, body: &ProgramFn, args: Vec<String>) -> ExitCode {
        self.dispatch(body, args);
        let task = self.inner.state.lock().task.take();
        match task {
            Some(task) => task.await,
            None => 1,
        }
    }

    /// Whether the computation has finished (true when none was dispatched).
    pub fn is_finished(&self) -> bool {
        let state = self.inner.state.lock();
        state.task.as_ref().is_none_or(Task::is_finished)
    }

    /// An [`std::io::Write`] adapter over this process's standard output, for
    /// code that wants a generic stream. Bytes funnel through the writer
    /// chain line-buffered; `flush` pushes out any partial line.
    pub fn stdout_stream(&self) -> ProcStream {
        ProcStream {
            proc: self.clone(),
            error: false,
            buffer: Vec::new(),
        }
    }

    /// Like [`Proc::stdout_stream`], but lines carry the error marker.
    pub fn stderr_stream(&self) -> ProcStream {
        ProcStream {
            proc: self.clone(),
            error: true,
            buffer: Vec::new(),
        }
    }
}

/// A line-buffered [`std::io::Write`] over a process's output chain.
pub struct ProcStream {
    proc: Proc,
    error: bool,
    buffer: Vec<u8>,
}

impl ProcStream {
    fn emit(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        if self.error {
            self.proc.err(text);
        } else {
            self.proc.put(text);
        }
    }
}

impl Write for ProcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if let Some(pos) = self.buffer.iter().rposition(|&b| b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            self.emit();
            self.buffer = rest;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.emit();
        Ok(())
    }
}

impl Drop for ProcStream {
    fn drop(&mut self) {
        self.emit();
    }
}

impl std::fmt::Debug for ProcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcStream")
            .field("pid", &self.proc.pid())
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::world::WorldCtx;

    fn bare_proc(ctx: &WorldCtx) -> Proc {
        Proc::new(1, ctx.clone(), Weak::new(), None)
    }

    fn child_of(ctx: &WorldCtx, parent: &Proc, pid: i32) -> Proc {
        Proc::new(pid, ctx.clone(), Weak::new(), Some(Arc::downgrade(&parent.inner)))
    }

    #[test]
    fn env_inheritance() {
        let ctx = WorldCtx::new();
        let parent = bare_proc(&ctx);
        let child = child_of(&ctx, &parent, 2);

        parent.set_var("PATH", "/bin", EnvAccess::Local);
        assert_eq!(child.var("PATH", EnvAccess::Inherit), Some("/bin".to_string()));
        assert_eq!(child.var("PATH", EnvAccess::Local), None);

        // Inherit-mode writes mirror up to the parent.
        child.set_var("RET_VAL", 7, EnvAccess::Inherit);
        assert_eq!(parent.var("RET_VAL", EnvAccess::Local), Some("7".to_string()));

        // Local writes stay local.
        child.set_var("TMP", "x", EnvAccess::Local);
        assert_eq!(parent.var("TMP", EnvAccess::Local), None);

        assert_eq!(child.var_or("MISSING", "fallback"), "fallback");
        assert_eq!(child.var_parsed::<i32>("RET_VAL"), Some(7));
    }

    #[test]
    fn writer_chain_falls_through_to_parent() {
        let ctx = WorldCtx::new();
        let parent = bare_proc(&ctx);
        let child = child_of(&ctx, &parent, 2);

        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        parent.set_text_writer(Box::new(move |text| sink.lock().push(text.to_string())));

        assert!(child.write_text("hello"));
        child.putln("world");
        assert_eq!(lines.lock().as_slice(), ["hello", "world\n"]);
    }

    #[test]
    fn warn_and_err_carry_markers() {
        let ctx = WorldCtx::new();
        let proc = bare_proc(&ctx);
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        proc.set_text_writer(Box::new(move |text| sink.lock().push(text.to_string())));

        proc.warnln("careful");
        proc.errln("broken");
        let lines = lines.lock();
        assert!(lines[0].contains('!') && lines[0].contains("careful"));
        assert!(lines[1].contains('!') && lines[1].contains("broken"));
    }

    #[test]
    fn dispatch_runs_and_records_argv() {
        let ctx = WorldCtx::new();
        let proc = bare_proc(&ctx);
        let body = program(|proc: Proc, args: Vec<String>| async move {
            assert_eq!(proc.name(), "prog");
            args.len() as ExitCode
        });

        proc.dispatch(&body, vec!["prog".to_string(), "arg".to_string()]);
        ctx.scheduler.run_until_idle();
        assert!(proc.is_finished());
        assert_eq!(proc.args(), vec!["prog".to_string(), "arg".to_string()]);
    }

    #[test]
    fn stream_adapter_funnels_into_the_writer_chain() {
        let ctx = WorldCtx::new();
        let proc = bare_proc(&ctx);
        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        proc.set_text_writer(Box::new(move |text| sink.lock().push(text.to_string())));

        let mut out = proc.stdout_stream();
        out.write_all(b"partial ").unwrap();
        out.write_all(b"line\nnext").unwrap();
        out.flush().unwrap();
        assert_eq!(lines.lock().as_slice(), ["partial line\n", "next"]);
    }

    #[test]
    fn query_reader_falls_through_to_parent() {
        let ctx = WorldCtx::new();
        let parent = bare_proc(&ctx);
        let child = child_of(&ctx, &parent, 2);

        assert!(child.read_query().is_none());
        let mut queries = vec![CommandQuery::input(b"ls\r".as_slice())];
        parent.set_query_reader(Box::new(move || queries.pop()));
        assert_eq!(child.read_query(), Some(CommandQuery::input(b"ls\r".as_slice())));
        assert_eq!(child.read_query(), None);
    }

    #[test]
    fn data_slot_round_trip() {
        let ctx = WorldCtx::new();
        let proc = bare_proc(&ctx);
        proc.set_data(42u32);
        assert_eq!(proc.data::<u32>(), Some(42));
        assert_eq!(proc.data::<String>(), None);
    }
}

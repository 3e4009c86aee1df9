//! A simulated networked computer inside one host program.
//!
//! A [`World`] drives everything on a fixed step: hosts boot, their operating
//! systems spawn cooperative processes, processes read and write over typed
//! virtual sockets, and an in-memory filesystem with classic UNIX permissions
//! sits underneath. Nothing here touches the real machine: the point is a
//! deterministic, fully observable model that steps under test control and
//! runs wall-clock in the background when launched.
//!
//! The moving parts, bottom up: [`Task`]/[`Scheduler`] (cooperative
//! computations), [`TimerManager`] (simulated time), [`MessageQueue`]
//! (mailboxes), [`Socket`]/[`IpManager`] (the virtual network),
//! [`FileSystem`] (files and permissions), [`UsersManager`]
//! (passwd/shadow/group projections), [`Proc`] and [`Os`] (execution), and
//! [`Host`]/[`World`] (the physical model and the driver).

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod addr;
pub mod device;
pub mod fs;
pub mod host;
pub mod os;
pub mod proc;
pub mod programs;
pub mod queue;
pub mod session;
pub mod sock;
pub mod task;
pub mod timer;
pub mod users;
pub mod wire;
pub mod world;

pub use crate::addr::AddrPair;
pub use crate::addr::AddrParseError;
pub use crate::addr::Address;
pub use crate::device::Device;
pub use crate::device::DeviceKind;
pub use crate::device::DeviceState;
pub use crate::fs::Access;
pub use crate::fs::CreateFileParams;
pub use crate::fs::FileMeta;
pub use crate::fs::FilePath;
pub use crate::fs::FileSystem;
pub use crate::fs::FsError;
pub use crate::fs::Perm;
pub use crate::host::Host;
pub use crate::host::HostParams;
pub use crate::os::CreateProcessParams;
pub use crate::os::Os;
pub use crate::os::OsParams;
pub use crate::proc::ExitCode;
pub use crate::proc::Proc;
pub use crate::proc::ProgramFn;
pub use crate::queue::MessageQueue;
pub use crate::session::Session;
pub use crate::sock::IpManager;
pub use crate::sock::Socket;
pub use crate::task::Scheduler;
pub use crate::task::Task;
pub use crate::timer::TimerManager;
pub use crate::users::UsersManager;
pub use crate::wire::CommandQuery;
pub use crate::wire::CommandReply;
pub use crate::world::World;
pub use crate::world::WorldCtx;
pub use crate::world::WorldHandle;

//! Permission triads, access modes and extra mode bits.

use bitflags::bitflags;

bitflags! {
    /// One permission triad (owner, group, or others).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Perm: u8 {
        /// Read bit.
        const READ = 1 << 0;
        /// Write bit.
        const WRITE = 1 << 1;
        /// Execute bit (or directory traversal).
        const EXEC = 1 << 2;
    }
}

impl Perm {
    /// Read, write and execute together.
    pub const RWX: Perm = Perm::READ.union(Perm::WRITE).union(Perm::EXEC);
    /// Read and write.
    pub const RW: Perm = Perm::READ.union(Perm::WRITE);
    /// Read and execute, the usual mode for shared directories.
    pub const RX: Perm = Perm::READ.union(Perm::EXEC);
}

bitflags! {
    /// The access requested when opening or querying a file.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Access: u8 {
        /// Read the content.
        const READ = 1 << 0;
        /// Modify the content.
        const WRITE = 1 << 1;
        /// Execute the file or traverse the directory.
        const EXEC = 1 << 2;
        /// Create the file if it does not exist (checked open only).
        const CREATE = 1 << 3;
    }
}

bitflags! {
    /// Mode bits outside the triads.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ExtraMode: u8 {
        /// Run executables as the file owner.
        const SETUID = 1 << 0;
        /// Run executables with the file group.
        const SETGID = 1 << 1;
        /// Restrict deletion in shared directories.
        const STICKY = 1 << 2;
    }
}

/// Which triad a permission check lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermCategory {
    /// The session uid matches the file owner.
    Owner,
    /// The file group is among the session's groups.
    Group,
    /// Everyone else.
    Others,
}

/// Renders triads in the familiar `rwxr-x---` long-listing form, with a
/// leading `d` for directories.
pub fn mode_string(is_directory: bool, owner: Perm, group: Perm, others: Perm) -> String {
    let mut out = String::with_capacity(10);
    out.push(if is_directory { 'd' } else { '-' });
    for triad in [owner, group, others] {
        out.push(if triad.contains(Perm::READ) { 'r' } else { '-' });
        out.push(if triad.contains(Perm::WRITE) { 'w' } else { '-' });
        out.push(if triad.contains(Perm::EXEC) { 'x' } else { '-' });
    }
    out
}

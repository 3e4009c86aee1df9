//! Session-checked filesystem front doors.
//!
//! Commands never touch the raw tree directly: they resolve user-supplied
//! paths against the process environment (`PWD`, `HOME`) and go through
//! these permission-checked query/open/remove helpers, which fold the
//! session identity into every operation.

use super::Access;
use super::CreateFileParams;
use super::Fid;
use super::FileMeta;
use super::FilePath;
use super::FileRef;
use super::FsError;
use super::FsResult;
use super::NO_FILE;
use super::Perm;
use super::RemoveDecider;
use crate::proc::EnvAccess;
use crate::proc::Proc;

/// Expands `~`, `.` and `..` and anchors relative paths at the process's
/// working directory.
pub fn resolve(proc: &Proc, raw: &str) -> FilePath {
    let pwd = FilePath::new(proc.var_or("PWD", "/"));
    let home = proc.var("HOME", EnvAccess::Inherit).unwrap_or_default();

    let mut text = raw.to_string();
    if !home.is_empty() {
        text = text.replace('~', &home);
    }
    text = text.replace("..", pwd.parent_view());
    // A lone or leading `.` means the working directory itself.
    if text == "." {
        text = pwd.as_str().to_string();
    } else if let Some(rest) = text.strip_prefix("./") {
        text = format!("{}/{}", pwd.as_str(), rest);
    }

    let mut path = FilePath::new(text);
    path.make_absolute(&pwd);
    path
}

/// Looks a path up and checks the session may access it as `access` asks.
/// Returns the fid on success.
pub fn query(proc: &Proc, path: &FilePath, access: Access) -> FsResult<Fid> {
    let Some(os) = proc.os() else {
        return Err(FsError::Io);
    };
    let Some(fs) = os.filesystem() else {
        return Err(FsError::Io);
    };
    let session = proc.session();
    let fs = fs.lock();

    let fid = fs.fid(path);
    if fid != NO_FILE {
        if !fs.check_permission(&session, fid, access) {
            return Err(FsError::InsufficientPermissions);
        }
        return Ok(fid);
    }
    if access.contains(Access::CREATE) {
        return Err(FsError::InvalidFlags);
    }
    Err(FsError::FileNotFound)
}

/// Permission-checked open. With [`Access::CREATE`] a missing file is
/// created owned by the session, mode `rw-/r--/---`.
pub fn open(proc: &Proc, path: &FilePath, access: Access) -> FsResult<(Fid, FileRef)> {
    let Some(os) = proc.os() else {
        return Err(FsError::Io);
    };
    let Some(fs) = os.filesystem() else {
        return Err(FsError::Io);
    };
    let session = proc.session();
    let mut fs = fs.lock();

    let fid = fs.fid(path);
    if fid != NO_FILE {
        if !fs.check_permission(&session, fid, access) {
            return Err(FsError::InsufficientPermissions);
        }
        return fs.open_fid(fid, access);
    }
    if access.contains(Access::CREATE) {
        let params = CreateFileParams {
            recurse: false,
            meta: FileMeta {
                owner_uid: session.uid,
                owner_gid: session.gid,
                perm_owner: Perm::RW,
                perm_group: Perm::READ,
                perm_others: Perm::empty(),
                ..FileMeta::default()
            },
            program: None,
        };
        return fs.create_file(path, &params);
    }
    Err(FsError::FileNotFound)
}

/// Permission-checked removal.
pub fn remove(proc: &Proc, path: &FilePath, recurse: bool) -> FsResult<()> {
    let Some(os) = proc.os() else {
        return Err(FsError::Io);
    };
    let Some(fs) = os.filesystem() else {
        return Err(FsError::Io);
    };
    let session = proc.session();
    let mut fs = fs.lock();

    let fid = fs.fid(path);
    if fid == NO_FILE {
        return Err(FsError::FileNotFound);
    }
    if !fs.check_permission(&session, fid, Access::READ | Access::EXEC) {
        return Err(FsError::InsufficientPermissions);
    }
    fs.remove_fid(fid, recurse)
}

/// Permission-checked removal with a decision callback.
pub fn remove_with(proc: &Proc, path: &FilePath, decide: &mut RemoveDecider<'_>) -> bool {
    let Some(os) = proc.os() else {
        return false;
    };
    let Some(fs) = os.filesystem() else {
        return false;
    };
    let session = proc.session();
    let mut fs = fs.lock();

    let fid = fs.fid(path);
    if fid == NO_FILE {
        decide(&fs, path, Err(FsError::FileNotFound));
        return false;
    }
    if !fs.check_permission(&session, fid, Access::WRITE | Access::EXEC) {
        decide(&fs, path, Err(FsError::InsufficientPermissions));
        return false;
    }
    fs.remove_with(path, decide)
}

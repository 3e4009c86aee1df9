//! File utilities: ls, mkdir, touch, cat, rm.

use clap::Arg;
use clap::ArgAction;
use clap::Command;

use crate::fs::Access;
use crate::fs::CreateFileParams;
use crate::fs::FileMeta;
use crate::fs::FsError;
use crate::fs::Perm;
use crate::fs::access;
use crate::proc::ExitCode;
use crate::proc::Proc;
use crate::proc::ProgramFn;
use crate::proc::program;

/// `ls`: long-lists a directory.
pub fn ls() -> ProgramFn {
    program(|proc: Proc, args: Vec<String>| async move {
        let Some(os) = proc.os() else {
            return 1;
        };
        let Some(fs) = os.filesystem() else {
            return 1;
        };

        let target = args.get(1).map(String::as_str).unwrap_or(".");
        let path = access::resolve(&proc, target);
        let fid = match access::query(&proc, &path, Access::READ | Access::EXEC) {
            Ok(fid) => fid,
            Err(err) => {
                proc.warnln(format!("ls '{path}': {err}."));
                return 1;
            }
        };

        let fs = fs.lock();
        let entries = if fs.is_dir(fid) {
            fs.children(fid)
        } else {
            vec![fid]
        };
        for entry in entries {
            let (uid, gid) = fs.owner_strings(entry);
            proc.putln(format!(
                "{} {:>3} {:>5} {:>5} {:>8} {}",
                fs.mode_string(entry),
                fs.links(entry),
                uid,
                gid,
                fs.size_bytes(entry),
                fs.filename(entry)
            ));
        }
        0
    })
}

/// `mkdir`: creates a directory owned by the caller.
pub fn mkdir() -> ProgramFn {
    program(|proc: Proc, args: Vec<String>| async move {
        let Some(os) = proc.os() else {
            return 1;
        };
        let Some(fs) = os.filesystem() else {
            return 1;
        };
        let Some(target) = args.get(1) else {
            proc.putln("Usage: mkdir [path]");
            return 1;
        };

        let path = access::resolve(&proc, target);
        // Creating an entry is a write into the parent directory.
        if let Err(err) = access::query(&proc, &path.parent(), Access::WRITE | Access::EXEC) {
            proc.warnln(format!("mkdir '{path}': {err}."));
            return 1;
        }

        let session = proc.session();
        let result = fs.lock().create_directory(
            &path,
            &CreateFileParams {
                recurse: false,
                meta: FileMeta {
                    is_directory: true,
                    owner_uid: session.uid,
                    owner_gid: session.gid,
                    perm_owner: Perm::RWX,
                    perm_group: Perm::RX,
                    perm_others: Perm::RX,
                    ..FileMeta::default()
                },
                program: None,
            },
        );
        match result {
            Ok(_) => 0,
            Err(err) => {
                proc.warnln(format!("mkdir '{path}': {err}."));
                1
            }
        }
    })
}

/// `touch`: creates an empty file (or just stamps an existing one).
pub fn touch() -> ProgramFn {
    program(|proc: Proc, args: Vec<String>| async move {
        let Some(os) = proc.os() else {
            return 1;
        };
        let Some(fs) = os.filesystem() else {
            return 1;
        };
        let Some(target) = args.get(1) else {
            proc.putln("Usage: touch [path]");
            return 1;
        };

        let path = access::resolve(&proc, target);
        match access::open(&proc, &path, Access::WRITE | Access::CREATE) {
            Ok((fid, _)) => {
                fs.lock().touch_modified(fid);
                0
            }
            Err(err) => {
                proc.warnln(format!("touch '{path}': {err}."));
                1
            }
        }
    })
}

/// `cat`: prints a file's content.
pub fn cat() -> ProgramFn {
    program(|proc: Proc, args: Vec<String>| async move {
        let Some(target) = args.get(1) else {
            proc.putln("Usage: cat [path]");
            return 1;
        };
        let path = access::resolve(&proc, target);
        match access::open(&proc, &path, Access::READ) {
            Ok((_, file)) => {
                let content = file.lock().view().to_string();
                proc.put(content);
                0
            }
            Err(err) => {
                proc.warnln(format!("cat '{path}': {err}."));
                1
            }
        }
    })
}

/// `rm`: removes files; `-r` recurses into directories.
pub fn rm() -> ProgramFn {
    program(cmd_rm)
}

async fn cmd_rm(proc: Proc, args: Vec<String>) -> ExitCode {
    let matches = Command::new("rm")
        .about("Remove files or directories")
        .arg(
            Arg::new("recursive")
                .short('r')
                .action(ArgAction::SetTrue)
                .help("Remove directories and their contents recursively"),
        )
        .arg(
            Arg::new("paths")
                .action(ArgAction::Append)
                .required(true)
                .help("Paths to remove"),
        )
        .try_get_matches_from(&args);
    let matches = match matches {
        Ok(matches) => matches,
        Err(err) => {
            proc.putln(err.to_string());
            return 1;
        }
    };

    let recursive = matches.get_flag("recursive");
    let mut ret = 0;
    for target in matches.get_many::<String>("paths").into_iter().flatten() {
        let path = access::resolve(&proc, target);

        let mut abort_reason: Option<FsError> = None;
        let done = access::remove_with(&proc, &path, &mut |_, _, code| match code {
            Ok(()) => true,
            Err(FsError::FolderNotEmpty) if recursive => true,
            Err(err) => {
                abort_reason = Some(err);
                false
            }
        });

        if !done {
            let reason = abort_reason.unwrap_or(FsError::Other);
            proc.errln(format!("rm '{path}': {reason}."));
            ret = 1;
        }
    }
    ret
}

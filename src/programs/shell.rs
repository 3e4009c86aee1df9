//! The interactive shell: prompt, line input, PATH search, dispatch.

use std::sync::Arc;

use crate::fs::Access;
use crate::fs::FilePath;
use crate::fs::access;
use crate::os::CreateProcessParams;
use crate::os::lex;
use crate::proc::EnvAccess;
use crate::proc::ExitCode;
use crate::proc::Proc;
use crate::proc::ProgramFn;
use crate::proc::program;
use crate::sock::Socket;
use crate::wire::CommandQuery;
use crate::wire::CommandReply;

use super::input::LineReader;

const CSI_USER: &str = "\u{1b}[95m";
const CSI_PATH: &str = "\u{1b}[94m";
const CSI_OK: &str = "\u{1b}[32m";
const CSI_FAIL: &str = "\u{1b}[31m";
const CSI_RESET: &str = "\u{1b}[0m";

/// The stock login shell.
pub fn shell() -> ProgramFn {
    program(cmd_shell)
}

type ShellSocket = Arc<Socket<CommandQuery, CommandReply>>;

async fn cmd_shell(proc: Proc, _args: Vec<String>) -> ExitCode {
    let Some(os) = proc.os() else {
        return 1;
    };
    if os.filesystem().is_none() {
        proc.errln("No file system!");
        return 1;
    }
    let Some(sock) = proc.data::<ShellSocket>() else {
        proc.errln("No terminal attached!");
        return 1;
    };

    proc.set_var("PWD", "/", EnvAccess::Local);
    proc.set_var("PATH", "/bin;/usr/bin;/sbin", EnvAccess::Local);
    let mut reader = LineReader::new();

    loop {
        // Fall back to the root if the working directory went away or became
        // unreadable (deleted underneath us, permissions dropped).
        let mut pwd = FilePath::new(proc.var_or("PWD", "/"));
        if access::query(&proc, &pwd, Access::READ | Access::EXEC).is_err() {
            pwd = FilePath::root();
            proc.set_var("PWD", "/", EnvAccess::Local);
        }

        let home = proc.var("HOME", EnvAccess::Inherit).unwrap_or_default();
        let mut display = pwd.clone();
        display.substitute(&home, "~");

        let username = os
            .with_users(|users| users.username_for_uid(proc.uid()).map(str::to_string))
            .unwrap_or_else(|| "-".to_string());
        proc.put(format!(
            "{CSI_USER}{}@{}{CSI_RESET}:{CSI_PATH}{}{CSI_RESET}$ ",
            username,
            os.hostname(),
            display
        ));

        let line = loop {
            if let Some(line) = reader.pop_line() {
                break line;
            }
            let query = sock.recv().await;
            if let Some(screen) = query.screen {
                proc.set_var("TERM_W", screen.size_x, EnvAccess::Local);
                proc.set_var("TERM_H", screen.size_y, EnvAccess::Local);
            }
            reader.feed(&query.command);
        };

        let args = lex(&line);
        let command = args.first().cloned();
        let ret = match command.as_deref() {
            None => 1,
            Some("cd") => builtin_cd(&proc, &args),
            Some("exit") => break,
            Some(_) => exec_program(&proc, args).await,
        };

        let marker = if ret == 0 {
            format!("{CSI_OK}\u{2713}{CSI_RESET}")
        } else {
            format!("{CSI_FAIL}\u{2715}{CSI_RESET}")
        };
        proc.put(format!("\n{marker} "));
        proc.set_var("RET_VAL", ret, EnvAccess::Local);
    }

    0
}

fn builtin_cd(proc: &Proc, args: &[String]) -> ExitCode {
    let Some(target) = args.get(1) else {
        proc.putln("Usage: cd [path]");
        return 1;
    };
    let path = access::resolve(proc, target);
    match access::query(proc, &path, Access::EXEC) {
        Ok(fid) => {
            let canonical = proc
                .os()
                .and_then(|os| os.filesystem())
                .and_then(|fs| fs.lock().path(fid))
                .unwrap_or(path);
            proc.set_var("PWD", canonical, EnvAccess::Inherit);
            0
        }
        Err(err) => {
            proc.warnln(format!("cd '{path}': {err}."));
            1
        }
    }
}

/// Looks `args[0]` up along `PATH` (absolute names directly), honours the
/// setuid/setgid bits on the program file, and runs it as a child process.
/// A trailing `&` dispatches in the background.
pub(crate) async fn exec_program(proc: &Proc, mut args: Vec<String>) -> ExitCode {
    let Some(os) = proc.os() else {
        return 1;
    };

    let background = args.last().is_some_and(|arg| arg == "&");
    if background {
        args.pop();
    }
    let Some(name) = args.first().cloned() else {
        return 1;
    };

    let candidates: Vec<FilePath> = if name.starts_with('/') {
        vec![FilePath::new(&name)]
    } else {
        proc.var_or("PATH", "/bin")
            .split(';')
            .map(|dir| FilePath::new(format!("{dir}/{name}")))
            .collect()
    };

    for path in candidates {
        // Anything short of an executable hit keeps the PATH walk going.
        let (fid, file) = match access::open(proc, &path, Access::EXEC) {
            Ok(found) => found,
            Err(_) => continue,
        };
        let Some(body) = file.lock().program() else {
            proc.errln("No program entry point detected!");
            return 1;
        };

        // Setuid/setgid programs run as the file owner.
        let (uid, gid) = os
            .filesystem()
            .and_then(|fs| fs.lock().meta(fid))
            .map(|meta| {
                let uid = if meta.extra.contains(crate::fs::ExtraMode::SETUID) {
                    meta.owner_uid
                } else {
                    proc.uid()
                };
                let gid = if meta.extra.contains(crate::fs::ExtraMode::SETGID) {
                    meta.owner_gid
                } else {
                    proc.gid()
                };
                (uid, gid)
            })
            .unwrap_or((proc.uid(), proc.gid()));

        let params = CreateProcessParams {
            leader: Some(proc.pid()),
            uid,
            gid,
            ..CreateProcessParams::default()
        };

        let task = os.run_process(body, args, params);
        if background {
            task.detach();
            return 0;
        }
        return task.await;
    }

    proc.warnln(format!("'{name}': No such file or directory."));
    1
}

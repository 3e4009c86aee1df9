//! User-management programs: useradd, groupadd, login, sudo.

use clap::Arg;
use clap::ArgAction;
use clap::Command;

use crate::fs::Access;
use crate::fs::FilePath;
use crate::proc::EnvAccess;
use crate::proc::ExitCode;
use crate::proc::Proc;
use crate::proc::ProgramFn;
use crate::proc::program;
use crate::users::CreateGroupParams;
use crate::users::CreateUserParams;
use crate::users::Gecos;

/// `useradd`: creates a user account.
pub fn useradd() -> ProgramFn {
    program(cmd_useradd)
}

async fn cmd_useradd(proc: Proc, args: Vec<String>) -> ExitCode {
    let matches = Command::new("useradd")
        .about("Create a new user account")
        .arg(Arg::new("uid").short('u').long("uid").value_parser(clap::value_parser!(i32)))
        .arg(Arg::new("gid").short('g').long("gid").value_parser(clap::value_parser!(i32)))
        .arg(Arg::new("home").short('d').long("home"))
        .arg(Arg::new("shell").short('s').long("shell"))
        .arg(Arg::new("groups").short('G').long("groups").help("Comma-separated supplementary groups"))
        .arg(Arg::new("comment").short('c').long("comment").help("The GECOS full-name field"))
        .arg(
            Arg::new("no-home")
                .short('M')
                .action(ArgAction::SetTrue)
                .help("Do not create the home directory"),
        )
        .arg(Arg::new("name").required(true))
        .arg(Arg::new("password").required(true))
        .try_get_matches_from(&args);
    let matches = match matches {
        Ok(matches) => matches,
        Err(err) => {
            proc.putln(err.to_string());
            return 1;
        }
    };

    let Some(os) = proc.os() else {
        return 1;
    };
    if proc.uid() != 0 {
        proc.errln("useradd: only root may add users.");
        return 1;
    }

    let name = matches.get_one::<String>("name").cloned().unwrap_or_default();
    let password = matches.get_one::<String>("password").cloned().unwrap_or_default();
    let params = CreateUserParams {
        uid: matches.get_one::<i32>("uid").copied().unwrap_or(-1),
        gid: matches.get_one::<i32>("gid").copied().unwrap_or(-1),
        home_path: matches.get_one::<String>("home").cloned().unwrap_or_default(),
        shell_path: matches
            .get_one::<String>("shell")
            .cloned()
            .unwrap_or_else(|| "/bin/shell".to_string()),
        groups: matches
            .get_one::<String>("groups")
            .map(|list| list.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
        gecos: Gecos {
            full_name: matches.get_one::<String>("comment").cloned().unwrap_or_default(),
            ..Gecos::default()
        },
        create_home: !matches.get_flag("no-home"),
        ..CreateUserParams::default()
    };

    let added = os.with_users(|users| {
        users.prepare();
        users.add_user(&name, &password, params)
    });
    if added {
        proc.putln(format!("Added user '{name}'."));
        0
    } else {
        proc.errln(format!("useradd: user '{name}' already exists."));
        1
    }
}

/// `groupadd`: creates a group.
pub fn groupadd() -> ProgramFn {
    program(|proc: Proc, args: Vec<String>| async move {
        let Some(os) = proc.os() else {
            return 1;
        };
        if proc.uid() != 0 {
            proc.errln("groupadd: only root may add groups.");
            return 1;
        }
        let Some(name) = args.get(1) else {
            proc.putln("Usage: groupadd [name] (gid)");
            return 1;
        };
        let gid = args.get(2).and_then(|arg| arg.parse().ok()).unwrap_or(-1);

        let added = os.with_users(|users| {
            users.prepare();
            users.add_group(name, CreateGroupParams { gid, members: Vec::new(), auto_commit: true })
        });
        if added {
            0
        } else {
            proc.errln(format!("groupadd: group '{name}' already exists."));
            1
        }
    })
}

/// `login`: authenticates and assumes a user identity.
pub fn login() -> ProgramFn {
    program(cmd_login)
}

async fn cmd_login(proc: Proc, args: Vec<String>) -> ExitCode {
    let Some(os) = proc.os() else {
        return 1;
    };
    let (Some(name), Some(password)) = (args.get(1), args.get(2)) else {
        proc.putln("Usage: login [user] [password]");
        return 1;
    };

    let record = os.with_users(|users| {
        users.prepare();
        users.authenticate(name, password)
    });
    let Some(record) = record else {
        // Deliberately vague, as tradition demands.
        proc.errln("Login incorrect.");
        return 1;
    };

    // The identity lands on the *leader* (shell) process, so it outlives
    // this login process.
    let target = proc
        .leader()
        .and_then(|pid| os.process(pid))
        .unwrap_or_else(|| proc.clone());
    target.set_uid(record.uid);
    target.set_gid(record.gid);
    let supplementary = os.with_users(|users| users.supplementary_gids(name));
    target.add_groups(supplementary);
    target.set_sid();
    target.set_var("USER", &record.username, EnvAccess::Local);
    target.set_var("HOME", &record.home_path, EnvAccess::Local);
    target.set_var("SHELL", &record.shell_path, EnvAccess::Local);
    target.set_var("PWD", &record.home_path, EnvAccess::Local);

    proc.putln(format!("Welcome, {}.", record.username));
    0
}

/// `sudo`: runs a command as root, for users listed in `/etc/sudoers`.
pub fn sudo() -> ProgramFn {
    program(cmd_sudo)
}

async fn cmd_sudo(proc: Proc, args: Vec<String>) -> ExitCode {
    let Some(os) = proc.os() else {
        return 1;
    };
    if args.len() < 2 {
        proc.putln("Usage: sudo [command...]");
        return 1;
    }

    // The invoking user is the leader's identity; this process already runs
    // setuid-root.
    let invoking_uid = proc
        .leader()
        .and_then(|pid| os.process(pid))
        .map(|leader| leader.uid())
        .unwrap_or_else(|| proc.uid());
    let username = os.with_users(|users| {
        users.prepare();
        users.username_for_uid(invoking_uid).map(str::to_string)
    });

    let allowed = invoking_uid == 0
        || match &username {
            Some(name) => os
                .filesystem()
                .and_then(|fs| {
                    let fs = fs.lock();
                    let (_, file) = fs.open(&FilePath::new("/etc/sudoers"), Access::READ).ok()?;
                    let listed = file.lock().view().lines().any(|line| line.trim() == name);
                    Some(listed)
                })
                .unwrap_or(false),
            None => false,
        };

    if !allowed {
        proc.errln(format!(
            "sudo: {} is not in the sudoers file.",
            username.as_deref().unwrap_or("this user")
        ));
        return 1;
    }

    // Re-dispatch the rest of the argv as root.
    proc.set_uid(0);
    proc.set_gid(0);
    super::shell::exec_program(&proc, args[1..].to_vec()).await
}

//! Built-in programs: thin exercisers of the process/socket/filesystem/user
//! interfaces, plus the base-system seed that installs them.
//!
//! Every program here is an `async fn (Proc, argv) -> ExitCode` wrapped as a
//! [`ProgramFn`] and stored on an executable filesystem node, so the shell
//! finds them by PATH search exactly like anything else a user might drop
//! into `/usr/bin`.

mod fileprog;
mod input;
mod shell;
mod sysprog;
mod userprog;

pub use self::fileprog::cat;
pub use self::fileprog::ls;
pub use self::fileprog::mkdir;
pub use self::fileprog::rm;
pub use self::fileprog::touch;
pub use self::input::LineReader;
pub use self::shell::shell;
pub use self::sysprog::boot;
pub use self::sysprog::driver_init;
pub use self::sysprog::echo;
pub use self::sysprog::ping;
pub use self::sysprog::shutdown;
pub use self::sysprog::wait_cmd;
pub use self::userprog::groupadd;
pub use self::userprog::login;
pub use self::userprog::sudo;
pub use self::userprog::useradd;

use crate::fs::CreateFileParams;
use crate::fs::ExtraMode;
use crate::fs::FileMeta;
use crate::fs::FilePath;
use crate::fs::Perm;
use crate::os::Os;
use crate::proc::ProgramFn;
use crate::users::CreateUserParams;

fn dir_meta(owner: Perm, group: Perm, others: Perm) -> CreateFileParams {
    CreateFileParams {
        recurse: true,
        meta: FileMeta {
            is_directory: true,
            perm_owner: owner,
            perm_group: group,
            perm_others: others,
            ..FileMeta::default()
        },
        program: None,
    }
}

/// Seeds the standard filesystem layout, `/etc` files, built-in programs and
/// boot script onto the OS's disk. Does nothing on a diskless host.
pub fn install_base_system(os: &Os) {
    let Some(fs) = os.filesystem() else {
        return;
    };

    {
        let mut fs = fs.lock();

        let layout: &[(&str, CreateFileParams)] = &[
            ("/dev", dir_meta(Perm::RWX, Perm::RX, Perm::RX)),
            ("/bin", dir_meta(Perm::RX, Perm::RX, Perm::RX)),
            ("/etc", dir_meta(Perm::RWX, Perm::RX, Perm::RX)),
            ("/home", dir_meta(Perm::RWX, Perm::RX, Perm::RX)),
            ("/lib", dir_meta(Perm::RX, Perm::RX, Perm::RX)),
            ("/sbin", dir_meta(Perm::RX, Perm::RX, Perm::RX)),
            ("/tmp", dir_meta(Perm::RWX, Perm::RWX, Perm::RWX)),
            ("/usr/bin", dir_meta(Perm::RX, Perm::RX, Perm::RX)),
            ("/usr/lib", dir_meta(Perm::RX, Perm::RX, Perm::RX)),
            ("/usr/local", dir_meta(Perm::RWX, Perm::RX, Perm::RX)),
            ("/usr/share", dir_meta(Perm::RWX, Perm::RX, Perm::RX)),
            ("/var/log", dir_meta(Perm::RWX, Perm::RX, Perm::RX)),
            ("/var/lock", dir_meta(Perm::RWX, Perm::RWX, Perm::RWX)),
            ("/var/tmp", dir_meta(Perm::RWX, Perm::RWX, Perm::RWX)),
        ];
        for (path, params) in layout {
            let _ = fs.create_directory(&FilePath::new(path), params);
        }

        let programs: &[(&str, ProgramFn)] = &[
            ("/sbin/shutdown", shutdown()),
            ("/sbin/boot", boot()),
            ("/sbin/login", login()),
            ("/sbin/useradd", useradd()),
            ("/sbin/groupadd", groupadd()),
            ("/bin/shell", shell()),
            ("/bin/ls", ls()),
            ("/bin/mkdir", mkdir()),
            ("/bin/touch", touch()),
            ("/bin/echo", echo()),
            ("/bin/rm", rm()),
            ("/bin/cat", cat()),
            ("/bin/ping", ping()),
            ("/bin/wait", wait_cmd()),
            ("/lib/modules/kernel/drivers/cpu", driver_init("cpu")),
            ("/lib/modules/kernel/drivers/net", driver_init("net")),
            ("/lib/modules/kernel/drivers/disk", driver_init("disk")),
        ];
        for (path, program) in programs {
            let _ = fs.create_file(
                &FilePath::new(path),
                &CreateFileParams {
                    recurse: true,
                    meta: FileMeta {
                        perm_owner: Perm::RWX,
                        perm_group: Perm::RX,
                        perm_others: Perm::RX,
                        ..FileMeta::default()
                    },
                    program: Some(program.clone()),
                },
            );
        }

        // sudo is execute-only and runs as the file owner.
        let _ = fs.create_file(
            &FilePath::new("/bin/sudo"),
            &CreateFileParams {
                recurse: true,
                meta: FileMeta {
                    perm_owner: Perm::EXEC,
                    perm_group: Perm::EXEC,
                    perm_others: Perm::EXEC,
                    extra: ExtraMode::SETUID,
                    ..FileMeta::default()
                },
                program: Some(sudo()),
            },
        );

        // passwd and group are world-readable; shadow and sudoers are not.
        let etc_files: &[(&str, Perm, Perm, Perm, &str)] = &[
            ("/etc/passwd", Perm::RW, Perm::READ, Perm::READ, ""),
            ("/etc/shadow", Perm::RW, Perm::empty(), Perm::empty(), ""),
            ("/etc/group", Perm::RW, Perm::READ, Perm::READ, ""),
            ("/etc/sudoers", Perm::RW, Perm::empty(), Perm::empty(), "root\n"),
            ("/boot.os", Perm::RW, Perm::READ, Perm::empty(), "boot\n"),
        ];
        for (path, owner, group, others, content) in etc_files {
            if let Ok((_, file)) = fs.create_file(
                &FilePath::new(path),
                &CreateFileParams {
                    recurse: true,
                    meta: FileMeta {
                        perm_owner: *owner,
                        perm_group: *group,
                        perm_others: *others,
                        ..FileMeta::default()
                    },
                    program: None,
                },
            ) {
                file.lock().write(*content);
            }
        }
    }

    // The superuser, with a home under /root.
    os.with_users(|users| {
        users.add_user(
            "root",
            "root",
            CreateUserParams {
                uid: 0,
                gid: 0,
                home_path: "/root".to_string(),
                shell_path: "/bin/shell".to_string(),
                ..CreateUserParams::default()
            },
        );
    });
}

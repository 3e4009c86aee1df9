//! The user and group store: in-memory projections of `/etc/passwd`,
//! `/etc/shadow` and `/etc/group`.
//!
//! Each map is loaded from its colon-separated backing file and written back
//! in full on [`UsersManager::commit`]. [`UsersManager::prepare`] reloads any
//! map whose backing file changed since it was last read, so edits made
//! through the filesystem (an editor, another host's tooling) become visible
//! without restarting anything. Malformed lines are skipped, never fatal.
//!
//! Passwords are stored as hex-encoded digests of a pluggable one-way
//! transform; the default is SHA-256.

use std::collections::BTreeMap;

use log::debug;
use log::warn;
use sha2::Digest;
use sha2::Sha256;

use crate::fs::Access;
use crate::fs::CreateFileParams;
use crate::fs::FileMeta;
use crate::fs::FilePath;
use crate::fs::FsHandle;
use crate::fs::Perm;

const PASSWD_PATH: &str = "/etc/passwd";
const SHADOW_PATH: &str = "/etc/shadow";
const GROUP_PATH: &str = "/etc/group";

/// First uid/gid handed out to ordinary users.
const FIRST_USER_ID: i32 = 1000;

/// The one-way password transform: plaintext in, printable hash out.
pub type PasswordHasher = fn(&str) -> String;

/// The default transform: hex-encoded SHA-256.
pub fn sha256_hex(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// The GECOS comment field, five comma-separated slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Gecos {
    /// Full user name.
    pub full_name: String,
    /// Room number.
    pub room: String,
    /// Work phone.
    pub work_phone: String,
    /// Home phone.
    pub home_phone: String,
    /// Anything else.
    pub other: String,
}

impl Gecos {
    fn parse(field: &str) -> Gecos {
        let mut parts = field.split(',');
        let mut next = || parts.next().unwrap_or_default().to_string();
        Gecos {
            full_name: next(),
            room: next(),
            work_phone: next(),
            home_phone: next(),
            other: next(),
        }
    }

    fn render(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.full_name, self.room, self.work_phone, self.home_phone, self.other
        )
    }
}

/// One `/etc/passwd` row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PasswdRecord {
    /// User id.
    pub uid: i32,
    /// Primary group id.
    pub gid: i32,
    /// Login name.
    pub username: String,
    /// Password field; `x` defers to the shadow record.
    pub password: String,
    /// Home directory.
    pub home_path: String,
    /// Login shell.
    pub shell_path: String,
    /// The comment field.
    pub gecos: Gecos,
}

/// One `/etc/shadow` row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShadowRecord {
    /// Login name.
    pub username: String,
    /// The password hash.
    pub password: String,
    /// Days since epoch of the last change.
    pub last_pass_change: u64,
    /// Minimum password age.
    pub min_pass_age: i32,
    /// Maximum password age.
    pub max_pass_age: i32,
    /// Warning period before expiry.
    pub warning_period: i32,
    /// Inactivity period after expiry.
    pub inactivity_period: i32,
    /// Account expiration date.
    pub expiration_date: u64,
}

/// One `/etc/group` row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupRecord {
    /// Group id.
    pub gid: i32,
    /// Group name.
    pub group_name: String,
    /// Group password field, conventionally `x`.
    pub password: String,
    /// Member login names.
    pub members: Vec<String>,
}

/// Parameters for [`UsersManager::add_user`].
#[derive(Clone, Debug)]
pub struct CreateUserParams {
    /// Create the home directory.
    pub create_home: bool,
    /// Explicit uid, `-1` to allocate.
    pub uid: i32,
    /// Explicit gid, `-1` to allocate.
    pub gid: i32,
    /// Warning period for the shadow record.
    pub warning_period: i32,
    /// Inactivity period for the shadow record.
    pub inactivity_period: i32,
    /// Expiration date for the shadow record.
    pub expiration_date: u64,
    /// Login shell.
    pub shell_path: String,
    /// Home directory; empty means `/home/<name>`.
    pub home_path: String,
    /// The comment field.
    pub gecos: Gecos,
    /// Supplementary groups to join (existing groups only).
    pub groups: Vec<String>,
    /// Persist all maps after the add.
    pub auto_commit: bool,
}

impl Default for CreateUserParams {
    fn default() -> Self {
        CreateUserParams {
            create_home: true,
            uid: -1,
            gid: -1,
            warning_period: 0,
            inactivity_period: 0,
            expiration_date: 0,
            shell_path: "/bin/shell".to_string(),
            home_path: String::new(),
            gecos: Gecos::default(),
            groups: Vec::new(),
            auto_commit: true,
        }
    }
}

/// Parameters for [`UsersManager::add_group`].
#[derive(Clone, Debug, Default)]
pub struct CreateGroupParams {
    /// Explicit gid, `-1` to allocate.
    pub gid: i32,
    /// Initial members.
    pub members: Vec<String>,
    /// Persist the group map after the add.
    pub auto_commit: bool,
}

/// The user/group store of one OS.
pub struct UsersManager {
    fs: Option<FsHandle>,
    hasher: PasswordHasher,
    uid_counter: i32,
    gid_counter: i32,
    passwd_mod: u64,
    shadow_mod: u64,
    group_mod: u64,
    passwd: BTreeMap<String, PasswdRecord>,
    shadow: BTreeMap<String, ShadowRecord>,
    groups: BTreeMap<String, GroupRecord>,
}

impl std::fmt::Debug for UsersManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsersManager")
            .field("users", &self.passwd.len())
            .field("groups", &self.groups.len())
            .finish()
    }
}

impl Default for UsersManager {
    fn default() -> Self {
        UsersManager {
            fs: None,
            hasher: sha256_hex,
            uid_counter: FIRST_USER_ID,
            gid_counter: FIRST_USER_ID,
            passwd_mod: 0,
            shadow_mod: 0,
            group_mod: 0,
            passwd: BTreeMap::new(),
            shadow: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }
}

impl UsersManager {
    /// Creates a store with no backing filesystem yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the backing filesystem (the first disk's, normally).
    pub fn set_backing(&mut self, fs: FsHandle) {
        self.fs = Some(fs);
    }

    /// Replaces the password transform.
    pub fn set_hasher(&mut self, hasher: PasswordHasher) {
        self.hasher = hasher;
    }

    /// Reloads any map whose backing file changed since it was last read.
    pub fn prepare(&mut self) {
        let Some(fs) = self.fs.clone() else {
            return;
        };
        let stamps = {
            let fs = fs.lock();
            [PASSWD_PATH, SHADOW_PATH, GROUP_PATH]
                .map(|path| fs.modified(fs.fid(&FilePath::new(path))))
        };

        if stamps[0] != self.passwd_mod {
            self.load_passwd();
            self.passwd_mod = stamps[0];
        }
        if stamps[1] != self.shadow_mod {
            self.load_shadow();
            self.shadow_mod = stamps[1];
        }
        if stamps[2] != self.group_mod {
            self.load_groups();
            self.group_mod = stamps[2];
        }
    }

    /// Rewrites all three backing files from the in-memory maps.
    pub fn commit(&mut self) {
        self.write_passwd();
        self.write_shadow();
        self.write_groups();
    }

    /// The effective password hash for `user`: the shadow one when the
    /// passwd field is `x`, the inline one otherwise.
    pub fn password_hash(&self, user: &str) -> Option<&str> {
        let record = self.passwd.get(user)?;
        if record.password != "x" {
            return Some(&record.password);
        }
        self.shadow.get(user).map(|s| s.password.as_str())
    }

    /// Returns the passwd record iff `password` hashes to the stored hash.
    pub fn authenticate(&self, user: &str, password: &str) -> Option<PasswdRecord> {
        let stored = self.password_hash(user)?;
        let presented = (self.hasher)(password);
        (stored == presented).then(|| self.passwd[user].clone())
    }

    /// The passwd record for `user`.
    pub fn user(&self, user: &str) -> Option<&PasswdRecord> {
        self.passwd.get(user)
    }

    /// The login name for `uid`.
    pub fn username_for_uid(&self, uid: i32) -> Option<&str> {
        self.passwd
            .values()
            .find(|record| record.uid == uid)
            .map(|record| record.username.as_str())
    }

    /// The group record for `name`.
    pub fn group(&self, name: &str) -> Option<&GroupRecord> {
        self.groups.get(name)
    }

    /// The gids of every group `user` belongs to (beyond the primary).
    pub fn supplementary_gids(&self, user: &str) -> Vec<i32> {
        self.groups
            .values()
            .filter(|group| group.members.iter().any(|m| m == user))
            .map(|group| group.gid)
            .collect()
    }

    /// Adds a user. Fails if the name is taken. Allocates uid/gid when `-1`,
    /// stores the hash in the shadow map, joins supplementary groups,
    /// optionally creates the home directory, and optionally commits.
    pub fn add_user(&mut self, username: &str, password: &str, params: CreateUserParams) -> bool {
        if self.passwd.contains_key(username) {
            return false;
        }

        let uid = if params.uid == -1 {
            self.uid_counter += 1;
            self.uid_counter
        } else {
            params.uid
        };
        let gid = if params.gid == -1 {
            self.gid_counter += 1;
            self.gid_counter
        } else {
            params.gid
        };

        let home_path = if params.home_path.is_empty() {
            format!("/home/{username}")
        } else {
            params.home_path.clone()
        };

        self.passwd.insert(
            username.to_string(),
            PasswdRecord {
                uid,
                gid,
                username: username.to_string(),
                password: "x".to_string(),
                home_path: home_path.clone(),
                shell_path: params.shell_path.clone(),
                gecos: params.gecos.clone(),
            },
        );

        self.shadow.insert(
            username.to_string(),
            ShadowRecord {
                username: username.to_string(),
                password: (self.hasher)(password),
                last_pass_change: 0,
                min_pass_age: 0,
                max_pass_age: 0,
                warning_period: params.warning_period,
                inactivity_period: params.inactivity_period,
                expiration_date: params.expiration_date,
            },
        );

        for group in &params.groups {
            if let Some(record) = self.groups.get_mut(group) {
                record.members.push(username.to_string());
            } else {
                warn!("user {username}: no such group '{group}', skipping");
            }
        }

        if params.create_home {
            if let Some(fs) = self.fs.clone() {
                let result = fs.lock().create_directory(
                    &FilePath::new(&home_path),
                    &CreateFileParams {
                        recurse: true,
                        meta: FileMeta {
                            is_directory: true,
                            owner_uid: uid,
                            owner_gid: gid,
                            perm_owner: Perm::RWX,
                            perm_group: Perm::empty(),
                            perm_others: Perm::empty(),
                            ..FileMeta::default()
                        },
                        program: None,
                    },
                );
                if let Err(err) = result {
                    warn!("user {username}: creating {home_path} failed: {err}");
                }
            }
        }

        if params.auto_commit {
            self.commit();
        }
        true
    }

    /// Adds a group. Fails if the name is taken.
    pub fn add_group(&mut self, group_name: &str, params: CreateGroupParams) -> bool {
        if self.groups.contains_key(group_name) {
            return false;
        }
        let gid = if params.gid == -1 {
            self.gid_counter += 1;
            self.gid_counter
        } else {
            params.gid
        };
        self.groups.insert(
            group_name.to_string(),
            GroupRecord {
                gid,
                group_name: group_name.to_string(),
                password: "x".to_string(),
                members: params.members,
            },
        );
        if params.auto_commit {
            self.write_groups();
        }
        true
    }

    // --- file projections ---

    fn read_file(&self, path: &str) -> Option<String> {
        let fs = self.fs.as_ref()?;
        let fs = fs.lock();
        let (_, file) = fs.open(&FilePath::new(path), Access::READ).ok()?;
        let content = file.lock().view().to_string();
        Some(content)
    }

    fn write_file(&self, path: &str, content: String) {
        let Some(fs) = &self.fs else {
            return;
        };
        let mut fs = fs.lock();
        let file_path = FilePath::new(path);
        match fs.open(&file_path, Access::WRITE) {
            Ok((fid, file)) => {
                file.lock().write(content);
                fs.touch_modified(fid);
            }
            Err(err) => warn!("rewriting {path} failed: {err}"),
        }
    }

    fn load_passwd(&mut self) {
        self.passwd.clear();
        let Some(content) = self.read_file(PASSWD_PATH) else {
            return;
        };
        for line in content.lines() {
            match parse_passwd_row(line) {
                Some(record) => {
                    self.passwd.insert(record.username.clone(), record);
                }
                None if !line.is_empty() => debug!("skipping malformed passwd row"),
                None => {}
            }
        }
    }

    fn load_shadow(&mut self) {
        self.shadow.clear();
        let Some(content) = self.read_file(SHADOW_PATH) else {
            return;
        };
        for line in content.lines() {
            match parse_shadow_row(line) {
                Some(record) => {
                    self.shadow.insert(record.username.clone(), record);
                }
                None if !line.is_empty() => debug!("skipping malformed shadow row"),
                None => {}
            }
        }
    }

    fn load_groups(&mut self) {
        self.groups.clear();
        let Some(content) = self.read_file(GROUP_PATH) else {
            return;
        };
        for line in content.lines() {
            match parse_group_row(line) {
                Some(record) => {
                    self.groups.insert(record.group_name.clone(), record);
                }
                None if !line.is_empty() => debug!("skipping malformed group row"),
                None => {}
            }
        }
    }

    fn write_passwd(&mut self) {
        let mut out = String::new();
        for (username, record) in &self.passwd {
            out.push_str(&format!(
                "{}:x:{}:{}:{}:{}:{}\n",
                username,
                record.uid,
                record.gid,
                record.gecos.render(),
                record.home_path,
                record.shell_path
            ));
        }
        self.write_file(PASSWD_PATH, out);
    }

    fn write_shadow(&mut self) {
        let mut out = String::new();
        for (username, record) in &self.shadow {
            out.push_str(&format!(
                "{}:{}:{}:{}:{}:{}:{}:{}:\n",
                username,
                record.password,
                record.last_pass_change,
                record.min_pass_age,
                record.max_pass_age,
                record.warning_period,
                record.inactivity_period,
                record.expiration_date
            ));
        }
        self.write_file(SHADOW_PATH, out);
    }

    fn write_groups(&mut self) {
        let mut out = String::new();
        for (name, record) in &self.groups {
            out.push_str(&format!(
                "{}:{}:{}:{}\n",
                name,
                record.password,
                record.gid,
                record.members.join(",")
            ));
        }
        self.write_file(GROUP_PATH, out);
    }
}

fn parse_passwd_row(row: &str) -> Option<PasswdRecord> {
    let fields: Vec<&str> = row.split(':').collect();
    if fields.len() != 7 {
        return None;
    }
    Some(PasswdRecord {
        username: fields[0].to_string(),
        password: fields[1].to_string(),
        uid: fields[2].parse().unwrap_or(-1),
        gid: fields[3].parse().unwrap_or(-1),
        gecos: Gecos::parse(fields[4]),
        home_path: fields[5].to_string(),
        shell_path: fields[6].to_string(),
    })
}

fn parse_shadow_row(row: &str) -> Option<ShadowRecord> {
    let fields: Vec<&str> = row.split(':').collect();
    // Eight fields plus the conventional trailing colon.
    if fields.len() != 9 {
        return None;
    }
    Some(ShadowRecord {
        username: fields[0].to_string(),
        password: fields[1].to_string(),
        last_pass_change: fields[2].parse().unwrap_or(0),
        min_pass_age: fields[3].parse().unwrap_or(0),
        max_pass_age: fields[4].parse().unwrap_or(0),
        warning_period: fields[5].parse().unwrap_or(0),
        inactivity_period: fields[6].parse().unwrap_or(0),
        expiration_date: fields[7].parse().unwrap_or(0),
    })
}

fn parse_group_row(row: &str) -> Option<GroupRecord> {
    let fields: Vec<&str> = row.split(':').collect();
    if fields.len() != 4 {
        return None;
    }
    Some(GroupRecord {
        group_name: fields[0].to_string(),
        password: fields[1].to_string(),
        gid: fields[2].parse().unwrap_or(-1),
        members: fields[3]
            .split(',')
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fs::FileSystem;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn etc_backed_store() -> UsersManager {
        let mut fs = FileSystem::new();
        for path in [PASSWD_PATH, SHADOW_PATH, GROUP_PATH] {
            fs.create_file(
                &FilePath::new(path),
                &CreateFileParams {
                    recurse: true,
                    meta: FileMeta {
                        perm_owner: Perm::RW,
                        perm_group: Perm::READ,
                        ..FileMeta::default()
                    },
                    program: None,
                },
            )
            .unwrap();
        }
        let mut users = UsersManager::new();
        users.set_backing(Arc::new(Mutex::new(fs)));
        users
    }

    #[test]
    fn add_user_then_authenticate() {
        let mut users = etc_backed_store();
        assert!(users.add_user(
            "alice",
            "secret",
            CreateUserParams {
                uid: 1000,
                gid: 1000,
                ..CreateUserParams::default()
            },
        ));
        // Duplicate names are refused.
        assert!(!users.add_user("alice", "other", CreateUserParams::default()));

        let record = users.authenticate("alice", "secret").unwrap();
        assert_eq!((record.uid, record.gid), (1000, 1000));
        assert!(users.authenticate("alice", "wrong").is_none());
        assert!(users.authenticate("bob", "secret").is_none());

        // The passwd field defers to shadow.
        assert_eq!(users.user("alice").unwrap().password, "x");
        assert_eq!(users.password_hash("alice"), Some(sha256_hex("secret").as_str()));
    }

    #[test]
    fn commit_and_reload_round_trip() {
        let mut users = etc_backed_store();
        users.add_group(
            "wheel",
            CreateGroupParams {
                gid: 10,
                members: vec![],
                auto_commit: false,
            },
        );
        users.add_user(
            "alice",
            "secret",
            CreateUserParams {
                uid: 1000,
                gid: 1000,
                groups: vec!["wheel".to_string()],
                gecos: Gecos {
                    full_name: "Alice Smith".to_string(),
                    ..Gecos::default()
                },
                ..CreateUserParams::default()
            },
        );
        users.commit();

        // A second store on the same filesystem sees the committed data.
        let fs = users.fs.clone().unwrap();
        let mut fresh = UsersManager::new();
        fresh.set_backing(fs);
        fresh.prepare();

        let record = fresh.authenticate("alice", "secret").unwrap();
        assert_eq!(record.uid, 1000);
        assert_eq!(record.gecos.full_name, "Alice Smith");
        assert_eq!(record.home_path, "/home/alice");
        assert_eq!(
            fresh.group("wheel").unwrap().members,
            vec!["alice".to_string()]
        );
        assert_eq!(fresh.supplementary_gids("alice"), vec![10]);
        assert_eq!(fresh.username_for_uid(1000), Some("alice"));
    }

    #[test]
    fn uid_allocation_starts_above_reserved_range() {
        let mut users = etc_backed_store();
        users.add_user("a", "pw", CreateUserParams { auto_commit: false, ..Default::default() });
        users.add_user("b", "pw", CreateUserParams { auto_commit: false, ..Default::default() });
        assert_eq!(users.user("a").unwrap().uid, 1001);
        assert_eq!(users.user("b").unwrap().uid, 1002);
    }

    #[test]
    fn home_directory_is_created_with_owner_permissions() {
        let mut users = etc_backed_store();
        users.add_user(
            "carol",
            "pw",
            CreateUserParams {
                uid: 1234,
                gid: 1234,
                ..CreateUserParams::default()
            },
        );
        let fs = users.fs.clone().unwrap();
        let fs = fs.lock();
        let fid = fs.fid(&FilePath::new("/home/carol"));
        assert_ne!(fid, crate::fs::NO_FILE);
        let meta = fs.meta(fid).unwrap();
        assert!(meta.is_directory);
        assert_eq!((meta.owner_uid, meta.owner_gid), (1234, 1234));
        assert_eq!(meta.perm_owner, Perm::RWX);
        assert_eq!(meta.perm_others, Perm::empty());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let mut users = etc_backed_store();
        {
            let fs = users.fs.clone().unwrap();
            let mut fs = fs.lock();
            let (fid, file) = fs.open(&FilePath::new(PASSWD_PATH), Access::WRITE).unwrap();
            file.lock().write(
                "good:x:1:1:,,,,:/home/good:/bin/shell\n\
                 broken row without colons\n\
                 short:x:2\n",
            );
            fs.touch_modified(fid);
        }
        users.prepare();
        assert!(users.user("good").is_some());
        assert_eq!(users.passwd.len(), 1);
    }

    #[test]
    fn inline_password_hash_bypasses_shadow() {
        let mut users = etc_backed_store();
        {
            let fs = users.fs.clone().unwrap();
            let mut fs = fs.lock();
            let (fid, file) = fs.open(&FilePath::new(PASSWD_PATH), Access::WRITE).unwrap();
            file.lock().write(format!(
                "dave:{}:7:7:,,,,:/home/dave:/bin/shell\n",
                sha256_hex("hunter2")
            ));
            fs.touch_modified(fid);
        }
        users.prepare();
        assert!(users.authenticate("dave", "hunter2").is_some());
    }
}

//! The in-memory filesystem: a path-addressable tree of files with
//! UNIX-style ownership and permissions.
//!
//! Every node has an opaque [`Fid`]. The tree is stored as a set of maps
//! (fid to file, fid to path and back, fid to parent, parent to children)
//! kept in lockstep by the create/remove operations. The root directory has
//! the fixed id [`ROOT_FID`] and exists from construction; it has metadata
//! but no content node, so it can be traversed and permission-checked but
//! not opened.
//!
//! Dynamic ids are allocated above a reserved range, and fid `0` always
//! means "no such file".

pub mod access;
mod path;
mod perm;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use parking_lot::Mutex;
use smallvec::SmallVec;
use thiserror::Error;

pub use self::path::FilePath;
pub use self::perm::Access;
pub use self::perm::ExtraMode;
pub use self::perm::Perm;
pub use self::perm::PermCategory;
pub use self::perm::mode_string;
use crate::proc::ProgramFn;
use crate::session::Session;

/// Opaque identifier of a filesystem node. `0` is "none".
pub type Fid = u64;

/// The id meaning "no such file".
pub const NO_FILE: Fid = 0;

/// The fixed id of the root directory.
pub const ROOT_FID: Fid = 1;

/// Dynamic ids are allocated strictly above this reserved range.
const RESERVED_FIDS: Fid = 1024;

/// How a filesystem operation failed.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FsError {
    /// No node at the given path or id.
    #[error("File not found")]
    FileNotFound,
    /// Creation target already exists.
    #[error("The file already exists")]
    FileExists,
    /// The session may not access the node this way.
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    /// The requested access does not fit the node (e.g. writing a directory).
    #[error("Invalid file flags")]
    InvalidFlags,
    /// Non-recursive removal of a directory with children.
    #[error("Folder not empty")]
    FolderNotEmpty,
    /// Internal bookkeeping failure.
    #[error("I/O error")]
    Io,
    /// The operation would touch the root directory.
    #[error("The operation can't be performed on the root directory")]
    PreserveRoot,
    /// Anything else.
    #[error("Unknown error")]
    Other,
}

/// Result alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Shared handle to a file's content.
pub type FileRef = Arc<Mutex<File>>;

/// Shared handle to a whole filesystem (as a disk exposes it).
pub type FsHandle = Arc<Mutex<FileSystem>>;

/// Decision callback for [`FileSystem::remove_with`]. Receives the
/// filesystem, the path being visited and the condition met (`Ok(())` on the
/// final successful cleanup); returning `false` aborts the operation.
pub type RemoveDecider<'a> = dyn FnMut(&FileSystem, &FilePath, FsResult<()>) -> bool + 'a;

/// A file's content: text bytes and, optionally, an executable entry point.
#[derive(Default)]
pub struct File {
    content: String,
    program: Option<ProgramFn>,
}

impl File {
    /// Replaces the content.
    pub fn write(&mut self, content: impl Into<String>) {
        self.content = content.into();
    }

    /// Appends to the content.
    pub fn append(&mut self, content: impl AsRef<str>) {
        self.content.push_str(content.as_ref());
    }

    /// The content as text.
    pub fn view(&self) -> &str {
        &self.content
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Whether there is no content.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Installs an executable entry point. Binary nodes carry a placeholder
    /// marker as content.
    pub fn set_program(&mut self, program: ProgramFn) {
        self.program = Some(program);
        if self.content.is_empty() {
            self.content = "BIN64::".to_string();
        }
    }

    /// The executable entry point, if any.
    pub fn program(&self) -> Option<ProgramFn> {
        self.program.clone()
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("bytes", &self.content.len())
            .field("executable", &self.program.is_some())
            .finish()
    }
}

/// Per-file metadata: kind, ownership, permissions, modification stamp.
#[derive(Clone, Copy, Debug)]
pub struct FileMeta {
    /// Whether the node is a directory.
    pub is_directory: bool,
    /// Owning user id.
    pub owner_uid: i32,
    /// Owning group id.
    pub owner_gid: i32,
    /// The owner triad.
    pub perm_owner: Perm,
    /// The group triad.
    pub perm_group: Perm,
    /// The others triad.
    pub perm_others: Perm,
    /// Setuid/setgid/sticky bits.
    pub extra: ExtraMode,
    /// Modification stamp, seconds since the epoch.
    pub modified: u64,
}

impl Default for FileMeta {
    fn default() -> Self {
        FileMeta {
            is_directory: false,
            owner_uid: 0,
            owner_gid: 0,
            perm_owner: Perm::RWX,
            perm_group: Perm::empty(),
            perm_others: Perm::empty(),
            extra: ExtraMode::empty(),
            modified: 0,
        }
    }
}

/// Parameters for creating a file or directory.
#[derive(Clone, Default)]
pub struct CreateFileParams {
    /// Create missing intermediate directories (with this metadata template).
    pub recurse: bool,
    /// Metadata for the new node (and any created intermediates).
    pub meta: FileMeta,
    /// Executable entry point to install on the new node.
    pub program: Option<ProgramFn>,
}

impl std::fmt::Debug for CreateFileParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateFileParams")
            .field("recurse", &self.recurse)
            .field("meta", &self.meta)
            .field("program", &self.program.is_some())
            .finish()
    }
}

/// The filesystem state: all node maps plus the id allocator.
#[derive(Debug)]
pub struct FileSystem {
    files: HashMap<Fid, FileRef>,
    fid_to_path: HashMap<Fid, FilePath>,
    path_to_fid: HashMap<FilePath, Fid>,
    parents: HashMap<Fid, Fid>,
    children: HashMap<Fid, Vec<Fid>>,
    meta: HashMap<Fid, FileMeta>,
    fid_counter: Fid,
    stamp_counter: u64,
}

impl Default for FileSystem {
    fn default() -> Self {
        let mut meta = HashMap::new();
        meta.insert(
            ROOT_FID,
            FileMeta {
                is_directory: true,
                perm_owner: Perm::RWX,
                perm_group: Perm::RX,
                perm_others: Perm::RX,
                ..FileMeta::default()
            },
        );
        FileSystem {
            files: HashMap::new(),
            fid_to_path: HashMap::new(),
            path_to_fid: HashMap::new(),
            parents: HashMap::new(),
            children: HashMap::new(),
            meta,
            fid_counter: RESERVED_FIDS,
            stamp_counter: 0,
        }
    }
}

impl FileSystem {
    /// Creates a filesystem containing only the root directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `fid` names a node. Directories are files too.
    pub fn is_file(&self, fid: Fid) -> bool {
        fid == ROOT_FID || self.files.contains_key(&fid)
    }

    /// Whether `fid` names a directory.
    pub fn is_dir(&self, fid: Fid) -> bool {
        fid == ROOT_FID || self.meta.get(&fid).is_some_and(|m| m.is_directory)
    }

    /// Whether `fid` has no children (non-directories are trivially empty).
    pub fn is_empty_dir(&self, fid: Fid) -> bool {
        !self.is_dir(fid) || self.children.get(&fid).is_none_or(|c| c.is_empty())
    }

    /// The id at `path`, [`NO_FILE`] if absent. Empty and `/` give the root.
    pub fn fid(&self, path: &FilePath) -> Fid {
        if path.is_root() {
            return ROOT_FID;
        }
        self.path_to_fid.get(path).copied().unwrap_or(NO_FILE)
    }

    /// The path of `fid`, if it names a node.
    pub fn path(&self, fid: Fid) -> Option<FilePath> {
        if fid == ROOT_FID {
            return Some(FilePath::root());
        }
        self.fid_to_path.get(&fid).cloned()
    }

    /// The final path segment of `fid`, empty if unknown.
    pub fn filename(&self, fid: Fid) -> String {
        self.fid_to_path
            .get(&fid)
            .map(|p| p.name().to_string())
            .unwrap_or_default()
    }

    /// The direct children of `fid` (empty for non-directories).
    pub fn children(&self, fid: Fid) -> Vec<Fid> {
        self.children.get(&fid).cloned().unwrap_or_default()
    }

    /// All nodes under `fid`, depth-first, children before grandchildren.
    pub fn files_under(&self, fid: Fid, recurse: bool) -> Vec<Fid> {
        let mut out = self.children(fid);
        if recurse {
            let mut nested = Vec::new();
            for child in &out {
                nested.extend(self.files_under(*child, true));
            }
            out.extend(nested);
        }
        out
    }

    /// The parent of `fid` (the root is its own parent).
    pub fn parent(&self, fid: Fid) -> Fid {
        self.parents.get(&fid).copied().unwrap_or(fid)
    }

    /// The chain of ids from `fid` up to the root, inclusive.
    pub fn parent_chain(&self, fid: Fid) -> SmallVec<[Fid; 8]> {
        let mut chain = SmallVec::new();
        if !self.is_file(fid) {
            return chain;
        }
        chain.push(fid);
        let mut current = fid;
        loop {
            let parent = self.parent(current);
            if parent == current {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Number of direct children.
    pub fn links(&self, fid: Fid) -> usize {
        self.children.get(&fid).map_or(0, Vec::len)
    }

    /// Content size in bytes.
    pub fn size_bytes(&self, fid: Fid) -> usize {
        self.files.get(&fid).map_or(0, |f| f.lock().len())
    }

    /// A copy of the node's metadata.
    pub fn meta(&self, fid: Fid) -> Option<FileMeta> {
        self.meta.get(&fid).copied()
    }

    /// The `drwxr-xr-x` rendering of the node's mode.
    pub fn mode_string(&self, fid: Fid) -> String {
        match self.meta.get(&fid) {
            Some(m) => mode_string(m.is_directory, m.perm_owner, m.perm_group, m.perm_others),
            None => "-".repeat(10),
        }
    }

    /// The node's `(uid, gid)` as strings for listings.
    pub fn owner_strings(&self, fid: Fid) -> (String, String) {
        match self.meta.get(&fid) {
            Some(m) => (m.owner_uid.to_string(), m.owner_gid.to_string()),
            None => ("-".to_string(), "-".to_string()),
        }
    }

    /// The modification stamp, seconds since the epoch.
    pub fn modified(&self, fid: Fid) -> u64 {
        self.meta.get(&fid).map_or(0, |m| m.modified)
    }

    /// Stamps the node as modified now. The stamp is strictly monotonic even
    /// within one wall-clock second, so change detection never misses a
    /// same-second rewrite.
    pub fn touch_modified(&mut self, fid: Fid) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let stamp = now.max(self.stamp_counter + 1);
        self.stamp_counter = stamp;
        match self.meta.get_mut(&fid) {
            Some(meta) => {
                meta.modified = stamp;
                true
            }
            None => false,
        }
    }

    /// Creates a file at `path`.
    ///
    /// Fails with [`FsError::FileExists`] if the path is taken, and with
    /// [`FsError::FileNotFound`] if the parent is missing and
    /// `params.recurse` is off.
    pub fn create_file(&mut self, path: &FilePath, params: &CreateFileParams) -> FsResult<(Fid, FileRef)> {
        if self.fid(path) != NO_FILE {
            return Err(FsError::FileExists);
        }
        if params.recurse {
            self.ensure_path(path, params)?;
        }
        self.add_node(path, params)
    }

    /// Creates a directory at `path` (a file with the directory flag set).
    pub fn create_directory(&mut self, path: &FilePath, params: &CreateFileParams) -> FsResult<(Fid, FileRef)> {
        let (fid, file) = self.create_file(path, params)?;
        self.set_directory_flag(fid, true);
        Ok((fid, file))
    }

    /// Walks `path` and creates every missing intermediate directory with
    /// the parameter template. Returns the id of the final parent.
    pub fn ensure_path(&mut self, path: &FilePath, params: &CreateFileParams) -> FsResult<Fid> {
        let parent = path.parent();
        let parent_fid = self.fid(&parent);
        if parent_fid != NO_FILE {
            return Ok(parent_fid);
        }
        let dir_params = CreateFileParams {
            recurse: true,
            meta: FileMeta {
                is_directory: true,
                ..params.meta
            },
            program: None,
        };
        let (fid, _) = self.create_directory(&parent, &dir_params)?;
        Ok(fid)
    }

    fn add_node(&mut self, path: &FilePath, params: &CreateFileParams) -> FsResult<(Fid, FileRef)> {
        let parent_fid = self.fid(&path.parent());
        if parent_fid == NO_FILE {
            return Err(FsError::FileNotFound);
        }

        self.fid_counter += 1;
        let fid = self.fid_counter;

        let mut file = File::default();
        if let Some(program) = &params.program {
            file.set_program(program.clone());
        }
        let file = Arc::new(Mutex::new(file));

        self.files.insert(fid, Arc::clone(&file));
        self.fid_to_path.insert(fid, path.clone());
        self.path_to_fid.insert(path.clone(), fid);
        self.parents.insert(fid, parent_fid);
        self.children.entry(parent_fid).or_default().push(fid);
        self.meta.insert(fid, params.meta);
        self.touch_modified(fid);

        Ok((fid, file))
    }

    /// Opens the node at `path`. Write access to a directory is refused with
    /// [`FsError::InvalidFlags`].
    pub fn open(&self, path: &FilePath, access: Access) -> FsResult<(Fid, FileRef)> {
        let fid = self.fid(path);
        if fid == NO_FILE {
            return Err(FsError::FileNotFound);
        }
        self.open_fid(fid, access)
    }

    /// Opens a node by id.
    pub fn open_fid(&self, fid: Fid, access: Access) -> FsResult<(Fid, FileRef)> {
        if self.is_dir(fid) && access.contains(Access::WRITE) {
            return Err(FsError::InvalidFlags);
        }
        match self.files.get(&fid) {
            Some(file) => Ok((fid, Arc::clone(file))),
            None => Err(FsError::FileNotFound),
        }
    }

    /// Removes the node at `path`. A directory with children is only removed
    /// when `recurse` is set (depth-first).
    pub fn remove(&mut self, path: &FilePath, recurse: bool) -> FsResult<()> {
        if path.is_root() {
            return Err(FsError::PreserveRoot);
        }
        self.remove_fid(self.fid(path), recurse)
    }

    /// Removes a node by id, like [`FileSystem::remove`].
    pub fn remove_fid(&mut self, fid: Fid, recurse: bool) -> FsResult<()> {
        if fid == ROOT_FID {
            return Err(FsError::PreserveRoot);
        }
        if !self.is_file(fid) {
            return Err(FsError::FileNotFound);
        }
        if self.is_empty_dir(fid) {
            self.unlink(fid);
            return Ok(());
        }
        if !recurse {
            return Err(FsError::FolderNotEmpty);
        }
        for child in self.children(fid) {
            self.remove_fid(child, true)?;
        }
        self.remove_fid(fid, false)
    }

    /// Removal driven by a decision callback.
    ///
    /// For each condition met ([`FsError::PreserveRoot`] at `/`,
    /// [`FsError::FileNotFound`], [`FsError::FolderNotEmpty`] before
    /// recursing, and the final `Ok(())` once a node is gone) the callback
    /// decides whether to carry on. Returns whether the whole removal
    /// completed.
    pub fn remove_with(&mut self, path: &FilePath, decide: &mut RemoveDecider<'_>) -> bool {
        let fid = self.fid(path);

        if path.is_root() && !decide(self, path, Err(FsError::PreserveRoot)) {
            return false;
        }
        if !self.is_file(fid) {
            decide(self, path, Err(FsError::FileNotFound));
            return false;
        }
        if !(self.is_empty_dir(fid) || decide(self, path, Err(FsError::FolderNotEmpty))) {
            return false;
        }

        // The callback gave the green light for recursion.
        for child in self.children(fid) {
            let Some(child_path) = self.path(child) else {
                continue;
            };
            if !self.remove_with(&child_path, decide) {
                return false;
            }
        }

        // Even with a permissive callback, a directory that somehow still has
        // children cannot be unlinked.
        if !self.is_empty_dir(fid) {
            decide(self, path, Err(FsError::FolderNotEmpty));
            return false;
        }

        if fid != ROOT_FID {
            self.unlink(fid);
        }
        decide(self, path, Ok(()))
    }

    fn unlink(&mut self, fid: Fid) {
        if let Some(parent) = self.parents.remove(&fid) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|&child| child != fid);
            }
        }
        if let Some(path) = self.fid_to_path.remove(&fid) {
            self.path_to_fid.remove(&path);
        }
        self.children.remove(&fid);
        self.meta.remove(&fid);
        self.files.remove(&fid);
    }

    /// Checks whether `session` may access `fid` in every way `access` asks
    /// for, under classic UNIX semantics: the session falls in exactly one
    /// category (owner, else group, else others) and that category's triad
    /// must contain every requested bit.
    pub fn check_permission(&self, session: &Session, fid: Fid, access: Access) -> bool {
        let Some(meta) = self.meta.get(&fid) else {
            return false;
        };

        let category = if session.uid == meta.owner_uid {
            PermCategory::Owner
        } else if session.gid == meta.owner_gid || session.groups.contains(&meta.owner_gid) {
            PermCategory::Group
        } else {
            PermCategory::Others
        };
        let triad = match category {
            PermCategory::Owner => meta.perm_owner,
            PermCategory::Group => meta.perm_group,
            PermCategory::Others => meta.perm_others,
        };

        let mut needed = Perm::empty();
        if access.contains(Access::READ) {
            needed |= Perm::READ;
        }
        if access.contains(Access::WRITE) {
            needed |= Perm::WRITE;
        }
        if access.contains(Access::EXEC) {
            needed |= Perm::EXEC;
        }
        triad.contains(needed)
    }

    /// Adds permission bits to one of the node's triads.
    pub fn set_perm(&mut self, fid: Fid, category: PermCategory, bits: Perm) -> bool {
        match self.meta.get_mut(&fid) {
            Some(meta) => {
                *triad_mut(meta, category) |= bits;
                true
            }
            None => false,
        }
    }

    /// Clears permission bits from one of the node's triads.
    pub fn clear_perm(&mut self, fid: Fid, category: PermCategory, bits: Perm) -> bool {
        match self.meta.get_mut(&fid) {
            Some(meta) => {
                *triad_mut(meta, category) &= !bits;
                true
            }
            None => false,
        }
    }

    /// Replaces all three triads at once.
    pub fn set_permissions(&mut self, fid: Fid, owner: Perm, group: Perm, others: Perm) -> bool {
        match self.meta.get_mut(&fid) {
            Some(meta) => {
                meta.perm_owner = owner;
                meta.perm_group = group;
                meta.perm_others = others;
                true
            }
            None => false,
        }
    }

    /// Sets the node's owning uid/gid.
    pub fn set_owner(&mut self, fid: Fid, uid: i32, gid: i32) -> bool {
        match self.meta.get_mut(&fid) {
            Some(meta) => {
                meta.owner_uid = uid;
                meta.owner_gid = gid;
                true
            }
            None => false,
        }
    }

    /// Sets or clears the extra mode bits.
    pub fn set_extra(&mut self, fid: Fid, extra: ExtraMode) -> bool {
        match self.meta.get_mut(&fid) {
            Some(meta) => {
                meta.extra = extra;
                true
            }
            None => false,
        }
    }

    /// Marks the node as a directory (or not).
    pub fn set_directory_flag(&mut self, fid: Fid, is_directory: bool) -> bool {
        match self.meta.get_mut(&fid) {
            Some(meta) => {
                meta.is_directory = is_directory;
                true
            }
            None => false,
        }
    }
}

fn triad_mut(meta: &mut FileMeta, category: PermCategory) -> &mut Perm {
    match category {
        PermCategory::Owner => &mut meta.perm_owner,
        PermCategory::Group => &mut meta.perm_group,
        PermCategory::Others => &mut meta.perm_others,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn dir_params() -> CreateFileParams {
        CreateFileParams {
            recurse: true,
            meta: FileMeta {
                is_directory: true,
                perm_owner: Perm::RWX,
                perm_group: Perm::RX,
                perm_others: Perm::RX,
                ..FileMeta::default()
            },
            program: None,
        }
    }

    #[test]
    fn create_and_lookup() {
        let mut fs = FileSystem::new();
        let path = FilePath::new("/etc/passwd");
        let (fid, _) = fs
            .create_file(&path, &CreateFileParams { recurse: true, ..Default::default() })
            .unwrap();

        assert_eq!(fs.fid(&path), fid);
        assert_eq!(fs.path(fid), Some(path.clone()));
        assert!(fid > RESERVED_FIDS);
        assert_eq!(fs.fid(&FilePath::new("/missing")), NO_FILE);
        assert_eq!(fs.fid(&FilePath::new("")), ROOT_FID);
        assert_eq!(fs.fid(&FilePath::new("/")), ROOT_FID);

        // The parent chain is a tree rooted at the sentinel.
        let chain = fs.parent_chain(fid);
        assert_eq!(chain.last(), Some(&ROOT_FID));
        assert!(fs.is_dir(fs.parent(fid)));
    }

    #[test]
    fn create_existing_fails() {
        let mut fs = FileSystem::new();
        let path = FilePath::new("/tmp");
        fs.create_directory(&path, &dir_params()).unwrap();
        assert!(matches!(
            fs.create_file(&path, &CreateFileParams::default()),
            Err(FsError::FileExists)
        ));
    }

    #[test]
    fn missing_parent_needs_recurse() {
        let mut fs = FileSystem::new();
        let path = FilePath::new("/deep/nested/file");
        assert!(matches!(
            fs.create_file(&path, &CreateFileParams::default()),
            Err(FsError::FileNotFound)
        ));
        let (fid, _) = fs
            .create_file(&path, &CreateFileParams { recurse: true, ..Default::default() })
            .unwrap();
        assert!(fs.is_file(fid));
        assert!(fs.is_dir(fs.fid(&FilePath::new("/deep"))));
        assert!(fs.is_dir(fs.fid(&FilePath::new("/deep/nested"))));
    }

    #[test]
    fn create_then_remove_restores_absence() {
        let mut fs = FileSystem::new();
        let path = FilePath::new("/notes");
        fs.create_file(&path, &CreateFileParams::default()).unwrap();
        fs.remove(&path, false).unwrap();
        assert_eq!(fs.fid(&path), NO_FILE);
    }

    #[test]
    fn non_empty_directory_needs_recurse() {
        let mut fs = FileSystem::new();
        fs.create_file(
            &FilePath::new("/a/b/c"),
            &CreateFileParams { recurse: true, ..Default::default() },
        )
        .unwrap();

        assert_eq!(
            fs.remove(&FilePath::new("/a"), false),
            Err(FsError::FolderNotEmpty)
        );
        fs.remove(&FilePath::new("/a"), true).unwrap();
        assert_eq!(fs.fid(&FilePath::new("/a")), NO_FILE);
        assert_eq!(fs.fid(&FilePath::new("/a/b")), NO_FILE);
        assert_eq!(fs.fid(&FilePath::new("/a/b/c")), NO_FILE);
    }

    #[test]
    fn remove_root_is_guarded() {
        let mut fs = FileSystem::new();
        assert_eq!(fs.remove(&FilePath::root(), true), Err(FsError::PreserveRoot));

        // The default decider refuses at the root.
        let refused = fs.remove_with(&FilePath::root(), &mut |_, _, code| code.is_ok());
        assert!(!refused);

        // An accept-all decider proceeds and empties the tree.
        fs.create_file(
            &FilePath::new("/x/y"),
            &CreateFileParams { recurse: true, ..Default::default() },
        )
        .unwrap();
        let done = fs.remove_with(&FilePath::root(), &mut |_, _, _| true);
        assert!(done);
        assert_eq!(fs.fid(&FilePath::new("/x")), NO_FILE);
        // The root itself survives.
        assert!(fs.is_dir(ROOT_FID));
    }

    #[test]
    fn remove_with_reports_conditions_in_order() {
        let mut fs = FileSystem::new();
        fs.create_file(
            &FilePath::new("/a/b/c"),
            &CreateFileParams { recurse: true, ..Default::default() },
        )
        .unwrap();

        let mut seen = Vec::new();
        let done = fs.remove_with(&FilePath::new("/a"), &mut |_, path, code| {
            seen.push((path.as_str().to_string(), code));
            true
        });
        assert!(done);
        assert_eq!(fs.fid(&FilePath::new("/a")), NO_FILE);
        assert_eq!(fs.fid(&FilePath::new("/a/b")), NO_FILE);

        assert_eq!(
            seen,
            vec![
                ("/a".to_string(), Err(FsError::FolderNotEmpty)),
                ("/a/b".to_string(), Err(FsError::FolderNotEmpty)),
                ("/a/b/c".to_string(), Ok(())),
                ("/a/b".to_string(), Ok(())),
                ("/a".to_string(), Ok(())),
            ]
        );
    }

    #[test]
    fn remove_with_missing_file_reports_and_fails() {
        let mut fs = FileSystem::new();
        let mut seen = Vec::new();
        let done = fs.remove_with(&FilePath::new("/ghost"), &mut |_, _, code| {
            seen.push(code);
            true
        });
        assert!(!done);
        assert_eq!(seen, vec![Err(FsError::FileNotFound)]);
    }

    #[test]
    fn open_rules() {
        let mut fs = FileSystem::new();
        let dir = FilePath::new("/srv");
        let file = FilePath::new("/srv/data");
        fs.create_directory(&dir, &dir_params()).unwrap();
        fs.create_file(&file, &CreateFileParams::default()).unwrap();

        assert!(fs.open(&file, Access::READ | Access::WRITE).is_ok());
        assert!(matches!(fs.open(&dir, Access::WRITE), Err(FsError::InvalidFlags)));
        assert!(matches!(
            fs.open(&FilePath::new("/nope"), Access::READ),
            Err(FsError::FileNotFound)
        ));
    }

    #[test]
    fn permission_categories() {
        let mut fs = FileSystem::new();
        let path = FilePath::new("/home/alice/notes");
        let (fid, _) = fs
            .create_file(
                &path,
                &CreateFileParams {
                    recurse: true,
                    meta: FileMeta {
                        owner_uid: 1000,
                        owner_gid: 1000,
                        perm_owner: Perm::RW,
                        perm_group: Perm::empty(),
                        perm_others: Perm::empty(),
                        ..FileMeta::default()
                    },
                    program: None,
                },
            )
            .unwrap();

        let owner = Session::new(1, 1000, 1000);
        let stranger = Session::new(2, 1001, 1001);
        assert!(fs.check_permission(&owner, fid, Access::READ));
        assert!(fs.check_permission(&owner, fid, Access::READ | Access::WRITE));
        assert!(!fs.check_permission(&owner, fid, Access::EXEC));
        assert!(!fs.check_permission(&stranger, fid, Access::READ));

        // Supplementary group membership selects the group triad.
        fs.set_perm(fid, PermCategory::Group, Perm::READ);
        let mut member = Session::new(3, 1001, 1001);
        member.groups.insert(1000);
        assert!(fs.check_permission(&member, fid, Access::READ));
        assert!(!fs.check_permission(&member, fid, Access::WRITE));
    }

    #[test]
    fn permission_is_monotone_over_subsets() {
        let mut fs = FileSystem::new();
        let (fid, _) = fs
            .create_file(
                &FilePath::new("/blob"),
                &CreateFileParams {
                    meta: FileMeta {
                        owner_uid: 5,
                        perm_owner: Perm::RWX,
                        ..FileMeta::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        let session = Session::new(1, 5, 5);
        let full = Access::READ | Access::WRITE | Access::EXEC;
        assert!(fs.check_permission(&session, fid, full));
        for sub in [
            Access::READ,
            Access::WRITE,
            Access::EXEC,
            Access::READ | Access::WRITE,
            Access::READ | Access::EXEC,
        ] {
            assert!(fs.check_permission(&session, fid, sub));
        }
    }

    #[test]
    fn owner_category_is_exclusive() {
        // An owner with no owner bits is denied even when others may read.
        let mut fs = FileSystem::new();
        let (fid, _) = fs
            .create_file(
                &FilePath::new("/locked"),
                &CreateFileParams {
                    meta: FileMeta {
                        owner_uid: 7,
                        perm_owner: Perm::empty(),
                        perm_others: Perm::READ,
                        ..FileMeta::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!fs.check_permission(&Session::new(1, 7, 7), fid, Access::READ));
        assert!(fs.check_permission(&Session::new(1, 8, 8), fid, Access::READ));
    }

    #[test]
    fn mode_string_render() {
        let mut fs = FileSystem::new();
        let (fid, _) = fs
            .create_file(
                &FilePath::new("/script"),
                &CreateFileParams {
                    meta: FileMeta {
                        perm_owner: Perm::RWX,
                        perm_group: Perm::RX,
                        perm_others: Perm::RX,
                        ..FileMeta::default()
                    },
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(fs.mode_string(fid), "-rwxr-xr-x");
        assert_eq!(fs.mode_string(ROOT_FID), "drwxr-xr-x");
    }

    #[test]
    fn touch_modified_is_strictly_monotonic() {
        let mut fs = FileSystem::new();
        let (fid, _) = fs
            .create_file(&FilePath::new("/f"), &CreateFileParams::default())
            .unwrap();
        let first = fs.modified(fid);
        fs.touch_modified(fid);
        let second = fs.modified(fid);
        assert!(second > first);
    }
}

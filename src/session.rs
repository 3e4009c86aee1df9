//! Session identity: the (uid, gid, groups) triple permission checks run
//! against, and the per-OS table of live sessions.

use std::collections::HashMap;
use std::collections::HashSet;

/// The identity a process presents to permission checks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    /// Session id.
    pub sid: i32,
    /// Effective user id.
    pub uid: i32,
    /// Effective group id.
    pub gid: i32,
    /// Supplementary group ids.
    pub groups: HashSet<i32>,
}

impl Session {
    /// Builds a session with no supplementary groups.
    pub fn new(sid: i32, uid: i32, gid: i32) -> Self {
        Session {
            sid,
            uid,
            gid,
            groups: HashSet::new(),
        }
    }
}

/// The per-OS session table.
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<i32, Session>,
    sid_counter: i32,
}

impl SessionManager {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session for `uid`/`gid` and returns its id.
    pub fn create_session(&mut self, uid: i32, gid: i32) -> i32 {
        self.sid_counter += 1;
        let sid = self.sid_counter;
        self.sessions.insert(sid, Session::new(sid, uid, gid));
        sid
    }

    /// Closes a session.
    pub fn end_session(&mut self, sid: i32) -> bool {
        self.sessions.remove(&sid).is_some()
    }

    /// A copy of the session record.
    pub fn session(&self, sid: i32) -> Option<Session> {
        self.sessions.get(&sid).cloned()
    }

    /// Changes the session's user id.
    pub fn set_uid(&mut self, sid: i32, uid: i32) -> bool {
        match self.sessions.get_mut(&sid) {
            Some(session) => {
                session.uid = uid;
                true
            }
            None => false,
        }
    }

    /// Changes the session's group id.
    pub fn set_gid(&mut self, sid: i32, gid: i32) -> bool {
        match self.sessions.get_mut(&sid) {
            Some(session) => {
                session.gid = gid;
                true
            }
            None => false,
        }
    }

    /// Adds supplementary groups to the session.
    pub fn add_groups(&mut self, sid: i32, groups: impl IntoIterator<Item = i32>) -> bool {
        match self.sessions.get_mut(&sid) {
            Some(session) => {
                session.groups.extend(groups);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn session_lifecycle() {
        let mut mgr = SessionManager::new();
        let sid = mgr.create_session(1000, 1000);
        assert_eq!(mgr.session(sid).unwrap().uid, 1000);

        assert!(mgr.set_uid(sid, 0));
        assert!(mgr.add_groups(sid, [4, 27]));
        let session = mgr.session(sid).unwrap();
        assert_eq!(session.uid, 0);
        assert!(session.groups.contains(&27));

        assert!(mgr.end_session(sid));
        assert!(!mgr.end_session(sid));
        assert!(mgr.session(sid).is_none());
    }
}

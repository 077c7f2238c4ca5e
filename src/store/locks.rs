//! Advisory write locks.
//!
//! A lock is rooted at one node and, when deep, governs the whole subtree.
//! Liveness is a property of the data (`refreshed_at + timeout > now`):
//! expired rows are ignored by every query and never swept.
use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::tree::{PathNode, ResolvedNode, DESCENDANTS_CTE};
use super::new_id;
use crate::errors::DavError;
use crate::DavResult;

const TOKEN_PREFIX: &str = "urn:uuid:";
const TOKEN_SUFFIX: &str = "?=lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Exclusive => "exclusive",
            LockScope::Shared => "shared",
        }
    }

    fn from_column(s: &str) -> LockScope {
        match s {
            "shared" => LockScope::Shared,
            _ => LockScope::Exclusive,
        }
    }

    /// Can a lock of this scope be granted next to `other`.
    pub fn compatible_with(&self, other: LockScope) -> bool {
        matches!((self, other), (LockScope::Shared, LockScope::Shared))
    }
}

/// The client-facing form of a lock id: `urn:uuid:<id>?=lock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub(crate) fn from_id(id: &str) -> LockToken {
        LockToken(id.to_string())
    }

    /// Parse a token. Anything but the exact wrapper around a uuid fails.
    pub fn parse(s: &str) -> Option<LockToken> {
        let s = s.trim();
        let s = s.strip_prefix('<').and_then(|s| s.strip_suffix('>')).unwrap_or(s);
        if s.len() < TOKEN_PREFIX.len() || !s.is_char_boundary(TOKEN_PREFIX.len()) {
            return None;
        }
        let (prefix, rest) = s.split_at(TOKEN_PREFIX.len());
        if !prefix.eq_ignore_ascii_case(TOKEN_PREFIX) {
            return None;
        }
        let id = rest.strip_suffix(TOKEN_SUFFIX)?;
        let id = Uuid::parse_str(id).ok()?;
        Some(LockToken(id.hyphenated().to_string()))
    }

    /// The internal lock id.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TOKEN_PREFIX}{}{TOKEN_SUFFIX}", self.0)
    }
}

/// What a resolved node needs to know about a live lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockBrief {
    pub id: String,
    /// node the lock is rooted at.
    pub path_id: String,
    pub deep: bool,
    pub scope: LockScope,
}

impl LockBrief {
    pub fn token(&self) -> LockToken {
        LockToken::from_id(&self.id)
    }
}

/// Live locks rooted at a node, and the locks that govern it.
///
/// The closest lock wins: a node's own locks apply to it; only when it
/// has none do the deep locks governing its parent apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockSet {
    pub direct: Vec<LockBrief>,
    pub applicable: Vec<LockBrief>,
}

impl LockSet {
    pub(crate) fn new(direct: Vec<LockBrief>, inherited: Vec<LockBrief>) -> LockSet {
        let applicable = if direct.is_empty() {
            inherited
        } else {
            direct.clone()
        };
        LockSet { direct, applicable }
    }

    /// Tokens of the applicable (or only the direct) locks.
    pub fn tokens(&self, direct: bool) -> Vec<LockToken> {
        let set = if direct { &self.direct } else { &self.applicable };
        set.iter().map(|l| l.token()).collect()
    }
}

/// Everything about one live lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockView {
    pub token: LockToken,
    pub path_id: String,
    pub scope: LockScope,
    pub deep: bool,
    /// xml fragment supplied by the client.
    pub owner: Option<String>,
    pub timeout: i64,
    pub refreshed_at: i64,
    pub created_at: i64,
}

impl LockView {
    /// Seconds until the lock expires.
    pub fn remaining(&self, now: i64) -> i64 {
        (self.refreshed_at + self.timeout - now).max(0)
    }
}

/// Live locks rooted at `path_id`.
pub(crate) fn live_locks_at(conn: &Connection, path_id: &str, now: i64) -> DavResult<Vec<LockBrief>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, path_id, deep, scope FROM locks
         WHERE path_id = ?1 AND refreshed_at + timeout > ?2
         ORDER BY created_at, id",
    )?;
    let rows = stmt.query_map(params![path_id, now], |row| {
        Ok(LockBrief {
            id: row.get(0)?,
            path_id: row.get(1)?,
            deep: row.get(2)?,
            scope: LockScope::from_column(&row.get::<_, String>(3)?),
        })
    })?;
    let mut locks = Vec::new();
    for row in rows {
        locks.push(row?);
    }
    Ok(locks)
}

pub struct Locks<'c> {
    conn: &'c Connection,
    now: i64,
}

impl<'c> Locks<'c> {
    pub fn new(conn: &'c Connection, now: i64) -> Locks<'c> {
        Locks { conn, now }
    }

    /// Grant a new write lock rooted at `node`.
    ///
    /// Conflicts are checked against the locks governing `node` and, for a
    /// deep request, every live lock rooted below it. An exclusive request
    /// conflicts with any of them, a shared one only with exclusive locks.
    pub fn grant(
        &self,
        node: &ResolvedNode,
        deep: bool,
        scope: LockScope,
        owner: Option<&str>,
        timeout: i64,
    ) -> DavResult<LockToken> {
        let mut range = node.locks.applicable.clone();
        if deep {
            range.extend(self.live_locks_below(&node.node)?);
        }
        if let Some(conflict) = range.iter().find(|l| !scope.compatible_with(l.scope)) {
            debug!(
                "locks: {} lock on {:?} conflicts with {}",
                scope.as_str(),
                node.full_path,
                conflict.token()
            );
            return Err(DavError::Locked);
        }

        let id = new_id();
        self.conn.execute(
            "INSERT INTO locks
                (id, path_id, scope, lock_type, deep, owner, timeout, refreshed_at, created_at)
             VALUES (?1, ?2, ?3, 'write', ?4, ?5, ?6, ?7, ?7)",
            params![id, node.id, scope.as_str(), deep, owner, timeout, self.now],
        )?;
        trace!("locks: granted {id} on {:?}", node.full_path);
        Ok(LockToken::from_id(&id))
    }

    /// Extend a live lock. Returns false when it is gone or expired.
    pub fn refresh(&self, token: &LockToken, timeout: i64) -> DavResult<bool> {
        let n = self.conn.execute(
            "UPDATE locks SET refreshed_at = ?2, timeout = ?3
             WHERE id = ?1 AND refreshed_at + timeout > ?2",
            params![token.id(), self.now, timeout],
        )?;
        Ok(n > 0)
    }

    /// Remove a lock. Returns false when there was nothing to remove.
    pub fn release(&self, token: &LockToken) -> DavResult<bool> {
        let n = self
            .conn
            .execute("DELETE FROM locks WHERE id = ?1", params![token.id()])?;
        trace!("locks: released {token} ({n})");
        Ok(n > 0)
    }

    /// A live lock by token.
    pub fn info(&self, token: &LockToken) -> DavResult<Option<LockView>> {
        let view = self
            .conn
            .query_row(
                "SELECT id, path_id, scope, deep, owner, timeout, refreshed_at, created_at
                 FROM locks WHERE id = ?1 AND refreshed_at + timeout > ?2",
                params![token.id(), self.now],
                |row| {
                    Ok(LockView {
                        token: LockToken::from_id(&row.get::<_, String>(0)?),
                        path_id: row.get(1)?,
                        scope: LockScope::from_column(&row.get::<_, String>(2)?),
                        deep: row.get(3)?,
                        owner: row.get(4)?,
                        timeout: row.get(5)?,
                        refreshed_at: row.get(6)?,
                        created_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(view)
    }

    /// Live locks rooted strictly below `node`.
    pub fn live_locks_below(&self, node: &PathNode) -> DavResult<Vec<LockBrief>> {
        let sql = format!(
            "{DESCENDANTS_CTE}
             SELECT l.id, l.path_id, l.deep, l.scope
             FROM descendants d INNER JOIN locks l ON (l.path_id = d.id)
             WHERE d.depth > 0 AND l.refreshed_at + l.timeout > ?5
             ORDER BY d.depth, l.created_at"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![node.id, node.full_path, node.kind.as_str(), i64::MAX, self.now],
            |row| {
                Ok(LockBrief {
                    id: row.get(0)?,
                    path_id: row.get(1)?,
                    deep: row.get(2)?,
                    scope: LockScope::from_column(&row.get::<_, String>(3)?),
                })
            },
        )?;
        let mut locks = Vec::new();
        for row in rows {
            locks.push(row?);
        }
        Ok(locks)
    }

    /// Drop every lock, live or not, rooted in the subtree of `node`.
    pub fn release_within(&self, node: &PathNode) -> DavResult<()> {
        let sql = format!(
            "{DESCENDANTS_CTE}
             DELETE FROM locks WHERE path_id IN (SELECT id FROM descendants)"
        );
        let n = self.conn.execute(
            &sql,
            params![node.id, node.full_path, node.kind.as_str(), i64::MAX],
        )?;
        trace!("locks: dropped {n} locks below {:?}", node.full_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, Tree};
    use crate::util::unix_now;

    #[test]
    fn token_round_trip() {
        let id = new_id();
        let token = LockToken::from_id(&id);
        let s = token.to_string();
        assert!(s.starts_with("urn:uuid:"));
        assert!(s.ends_with("?=lock"));
        assert_eq!(LockToken::parse(&s), Some(token.clone()));
        assert_eq!(LockToken::parse(&format!("<{s}>")), Some(token));
    }

    #[test]
    fn malformed_tokens_do_not_parse() {
        assert!(LockToken::parse("").is_none());
        assert!(LockToken::parse("urn:uuid:not-a-uuid?=lock").is_none());
        assert!(LockToken::parse("opaquelocktoken:1234").is_none());
        let id = new_id();
        assert!(LockToken::parse(&format!("urn:uuid:{id}")).is_none());
        assert!(LockToken::parse(&format!("urn:uuid:{id}?=lockx")).is_none());
    }

    #[test]
    fn exclusive_conflicts_with_everything() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let locks = Locks::new(&conn, now);
        let root = tree.resolve("").unwrap().unwrap();
        tree.insert(&root.id, "a", None).unwrap();

        let a = tree.resolve("/a").unwrap().unwrap();
        locks
            .grant(&a, false, LockScope::Exclusive, None, 60)
            .unwrap();
        let a = tree.resolve("/a").unwrap().unwrap();
        assert!(matches!(
            locks.grant(&a, false, LockScope::Exclusive, None, 60),
            Err(DavError::Locked)
        ));
        assert!(matches!(
            locks.grant(&a, false, LockScope::Shared, None, 60),
            Err(DavError::Locked)
        ));
    }

    #[test]
    fn shared_locks_stack() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let locks = Locks::new(&conn, now);
        let root = tree.resolve("").unwrap().unwrap();
        tree.insert(&root.id, "a", None).unwrap();

        let a = tree.resolve("/a").unwrap().unwrap();
        locks.grant(&a, false, LockScope::Shared, None, 60).unwrap();
        let a = tree.resolve("/a").unwrap().unwrap();
        locks.grant(&a, false, LockScope::Shared, None, 60).unwrap();
        let a = tree.resolve("/a").unwrap().unwrap();
        assert_eq!(a.locks.direct.len(), 2);
        assert!(locks
            .grant(&a, false, LockScope::Exclusive, None, 60)
            .is_err());
    }

    #[test]
    fn deep_request_sees_locks_below() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let locks = Locks::new(&conn, now);
        let root = tree.resolve("").unwrap().unwrap();
        let a = tree.insert(&root.id, "a", Some("collection")).unwrap();
        tree.insert(&a, "b", None).unwrap();

        let b = tree.resolve("/a/b").unwrap().unwrap();
        locks
            .grant(&b, false, LockScope::Exclusive, None, 60)
            .unwrap();
        let a = tree.resolve("/a").unwrap().unwrap();
        assert_eq!(locks.live_locks_below(&a).unwrap().len(), 1);
        assert!(locks.grant(&a, true, LockScope::Shared, None, 60).is_err());
        assert!(locks.grant(&a, false, LockScope::Exclusive, None, 60).is_ok());
    }

    #[test]
    fn expired_locks_are_ignored() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let root = tree.resolve("").unwrap().unwrap();
        tree.insert(&root.id, "a", None).unwrap();

        let a = tree.resolve("/a").unwrap().unwrap();
        let old = Locks::new(&conn, now - 100);
        let token = old.grant(&a, false, LockScope::Exclusive, None, 10).unwrap();

        let locks = Locks::new(&conn, now);
        assert!(locks.info(&token).unwrap().is_none());
        assert!(!locks.refresh(&token, 60).unwrap());
        let a = tree.resolve("/a").unwrap().unwrap();
        assert!(a.locks.direct.is_empty());
        assert!(locks.grant(&a, false, LockScope::Exclusive, None, 60).is_ok());
    }

    #[test]
    fn refresh_release_and_info() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let locks = Locks::new(&conn, now);
        let a = tree.resolve("").unwrap().unwrap();

        let token = locks
            .grant(&a, true, LockScope::Shared, Some("<D:href>me</D:href>"), 30)
            .unwrap();
        assert!(locks.refresh(&token, 300).unwrap());
        let view = locks.info(&token).unwrap().unwrap();
        assert_eq!(view.timeout, 300);
        assert_eq!(view.remaining(now), 300);
        assert_eq!(view.owner.as_deref(), Some("<D:href>me</D:href>"));
        assert!(view.deep);

        assert!(locks.release(&token).unwrap());
        assert!(!locks.release(&token).unwrap());
        assert!(locks.info(&token).unwrap().is_none());
    }

    #[test]
    fn release_within_drops_subtree_locks() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let locks = Locks::new(&conn, now);
        let root = tree.resolve("").unwrap().unwrap();
        let a = tree.insert(&root.id, "a", Some("collection")).unwrap();
        tree.insert(&a, "b", None).unwrap();
        tree.insert(&root.id, "x", None).unwrap();

        let b = tree.resolve("/a/b").unwrap().unwrap();
        locks.grant(&b, false, LockScope::Shared, None, 60).unwrap();
        let x = tree.resolve("/x").unwrap().unwrap();
        let kept = locks.grant(&x, false, LockScope::Shared, None, 60).unwrap();

        let a = tree.resolve("/a").unwrap().unwrap();
        locks.release_within(&a).unwrap();
        assert!(locks.live_locks_below(&a).unwrap().is_empty());
        assert!(locks.info(&kept).unwrap().is_some());
    }
}

//! The path tree.
//!
//! Nodes only know their parent and their own name. Full paths, depth,
//! the inherited node kind and the inherited lock set are derived when a
//! path is resolved (an ancestor walk) or when a subtree is enumerated
//! (a recursive query).
use std::collections::HashMap;

use http::StatusCode;
use rusqlite::{params, Connection, OptionalExtension};

use super::locks::{live_locks_at, LockBrief, LockSet};
use super::props::{Owner, Props};
use super::resources::Resources;
use super::new_id;
use crate::errors::DavError;
use crate::DavResult;

/// Depth-bounded subtree of `?1`, seeded with its full path `?2`,
/// kind `?3`, and bounded by `?4` levels.
pub(crate) const DESCENDANTS_CTE: &str = "
    WITH RECURSIVE descendants (id, parent_id, name, node_type, kind, full_path, depth) AS (
        SELECT p.id, p.parent_id, p.name, p.node_type, ?3, ?2, 0
        FROM paths p WHERE p.id = ?1
        UNION ALL
        SELECT p.id, p.parent_id, p.name, p.node_type,
               coalesce(p.node_type, d.kind),
               d.full_path || '/' || p.name,
               d.depth + 1
        FROM paths p
        INNER JOIN descendants d ON (p.parent_id = d.id)
        WHERE d.depth < ?4
    )
";

/// The closed set of node kinds. Selects the method handlers for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Collection,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Collection => "collection",
        }
    }

    pub fn from_type(s: &str) -> NodeKind {
        match s {
            "root" => NodeKind::Root,
            "collection" => NodeKind::Collection,
            other => {
                warn!("tree: unknown node type {other:?}, treating it as a collection");
                NodeKind::Collection
            }
        }
    }
}

/// A node of the tree, with its derived path information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathNode {
    pub id: String,
    pub parent_id: Option<String>,
    /// single url-escaped segment, empty for the root.
    pub name: String,
    /// declared type. `None` means a plain resource container.
    pub node_type: Option<String>,
    /// declared or inherited kind.
    pub kind: NodeKind,
    pub full_path: String,
    /// number of segments in `full_path`.
    pub depth: u32,
}

impl PathNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Collections (and the root) declare a type, resources don't.
    pub fn is_collection(&self) -> bool {
        self.node_type.is_some()
    }
}

/// A resolved node together with the locks that govern it.
#[derive(Debug, Clone)]
pub struct ResolvedNode {
    pub node: PathNode,
    pub locks: LockSet,
}

impl std::ops::Deref for ResolvedNode {
    type Target = PathNode;

    fn deref(&self) -> &PathNode {
        &self.node
    }
}

/// Tree store operations on one connection (or transaction).
pub struct Tree<'c> {
    conn: &'c Connection,
    now: i64,
}

impl<'c> Tree<'c> {
    pub fn new(conn: &'c Connection, now: i64) -> Tree<'c> {
        Tree { conn, now }
    }

    /// Walk from the root to `full_path`.
    ///
    /// `""` and `"/"` are the root. Returns `None` when any segment is
    /// missing; deciding what that means is up to the caller.
    pub fn resolve(&self, full_path: &str) -> DavResult<Option<ResolvedNode>> {
        let root = self
            .conn
            .query_row(
                "SELECT id, node_type FROM paths WHERE parent_id IS NULL",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()?;
        let Some((root_id, root_type)) = root else {
            return Ok(None);
        };

        let direct = live_locks_at(self.conn, &root_id, self.now)?;
        let mut current = ResolvedNode {
            node: PathNode {
                id: root_id,
                parent_id: None,
                name: String::new(),
                kind: root_type
                    .as_deref()
                    .map(NodeKind::from_type)
                    .unwrap_or(NodeKind::Root),
                node_type: root_type,
                full_path: String::new(),
                depth: 0,
            },
            locks: LockSet::new(direct, Vec::new()),
        };

        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, node_type FROM paths WHERE parent_id = ?1 AND name = ?2")?;
        for seg in full_path.split('/').filter(|s| !s.is_empty()) {
            let row = stmt
                .query_row(params![current.node.id, seg], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
                })
                .optional()?;
            let Some((id, node_type)) = row else {
                trace!("tree: resolve {full_path:?} stops before {seg:?}");
                return Ok(None);
            };

            // closest lock wins: only deep locks that apply to the parent
            // reach the child, and only when the child has none of its own.
            let inherited: Vec<LockBrief> = current
                .locks
                .applicable
                .iter()
                .filter(|l| l.deep)
                .cloned()
                .collect();
            let direct = live_locks_at(self.conn, &id, self.now)?;

            let kind = node_type
                .as_deref()
                .map(NodeKind::from_type)
                .unwrap_or(current.node.kind);
            let full_path = format!("{}/{}", current.node.full_path, seg);
            current = ResolvedNode {
                node: PathNode {
                    parent_id: Some(current.node.id.clone()),
                    id,
                    name: seg.to_string(),
                    node_type,
                    kind,
                    full_path,
                    depth: current.node.depth + 1,
                },
                locks: LockSet::new(direct, inherited),
            };
        }
        Ok(Some(current))
    }

    /// Full path of a node by id, by walking up to the root.
    pub fn path_of(&self, id: &str) -> DavResult<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "WITH RECURSIVE up (id, parent_id, name, height) AS (
                 SELECT id, parent_id, name, 0 FROM paths WHERE id = ?1
                 UNION ALL
                 SELECT p.id, p.parent_id, p.name, u.height + 1
                 FROM paths p INNER JOIN up u ON (p.id = u.parent_id)
             )
             SELECT parent_id IS NULL, name FROM up ORDER BY height DESC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, bool>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut full_path = String::new();
        let mut found = false;
        for row in rows {
            let (is_root, name) = row?;
            found = true;
            if !is_root {
                full_path.push('/');
                full_path.push_str(&name);
            }
        }
        Ok(found.then_some(full_path))
    }

    /// Create a node below `parent_id`.
    pub fn insert(&self, parent_id: &str, name: &str, node_type: Option<&str>) -> DavResult<String> {
        let id = new_id();
        trace!("tree: insert {name:?} below {parent_id} as {id}");
        self.conn.execute(
            "INSERT INTO paths (id, parent_id, name, node_type) VALUES (?1, ?2, ?3, ?4)",
            params![id, parent_id, name, node_type],
        )?;
        Ok(id)
    }

    /// Remove a node. Descendants, content, properties and locks go with it.
    pub fn delete(&self, id: &str) -> DavResult<()> {
        trace!("tree: delete {id}");
        self.conn
            .execute("DELETE FROM paths WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Re-parent and rename a subtree root, giving it a fresh id.
    ///
    /// Only the root row changes. Its children, content and properties
    /// follow the new id through the foreign keys; the rest of the subtree
    /// is untouched. Returns the new id.
    pub fn move_node(&self, id: &str, dest_parent_id: &str, dest_name: &str) -> DavResult<String> {
        let new_id = new_id();
        trace!("tree: move {id} to {dest_parent_id}/{dest_name} as {new_id}");
        let n = self.conn.execute(
            "UPDATE paths SET id = ?2, parent_id = ?3, name = ?4 WHERE id = ?1",
            params![id, new_id, dest_parent_id, dest_name],
        )?;
        if n == 0 {
            return Err(DavError::NotFound);
        }
        Ok(new_id)
    }

    /// Deep copy the subtree at `src` (up to `max_depth` levels) below
    /// `dest_parent_id`, naming its new root `dest_name`.
    ///
    /// Every copied node gets a fresh id, as do copied resources; locks are
    /// not copied. Must run inside the caller's transaction.
    pub fn clone_tree(
        &self,
        src: &PathNode,
        dest_parent_id: &str,
        dest_name: &str,
        max_depth: Option<u32>,
    ) -> DavResult<String> {
        let nodes = self.descendants(src, max_depth)?;
        let resources = Resources::new(self.conn, self.now);
        let props = Props::new(self.conn);

        let mut ids: HashMap<&str, String> = HashMap::with_capacity(nodes.len());
        let mut new_root = None;
        let mut insert = self.conn.prepare_cached(
            "INSERT INTO paths (id, parent_id, name, node_type) VALUES (?1, ?2, ?3, ?4)",
        )?;

        // descendants come parents-first, so every parent is mapped already.
        for node in &nodes {
            let new_id = new_id();
            let (parent, name) = if node.id == src.id {
                (dest_parent_id.to_string(), dest_name)
            } else {
                let parent = node
                    .parent_id
                    .as_deref()
                    .and_then(|p| ids.get(p))
                    .ok_or(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
                (parent.clone(), node.name.as_str())
            };
            insert.execute(params![new_id, parent, name, node.node_type])?;

            props.copy_owned(
                &Owner::Path(node.id.clone()),
                &Owner::Path(new_id.clone()),
            )?;
            resources.clone_onto(&node.id, &new_id)?;

            if node.id == src.id {
                new_root = Some(new_id.clone());
            }
            ids.insert(node.id.as_str(), new_id);
        }
        trace!("tree: cloned {} nodes from {}", nodes.len(), src.id);
        new_root.ok_or(DavError::NotFound)
    }

    /// The subtree of `root`, parents before children, bounded to
    /// `max_depth` levels below it (`None` is unbounded). Includes `root`.
    pub fn descendants(&self, root: &PathNode, max_depth: Option<u32>) -> DavResult<Vec<PathNode>> {
        let sql = format!(
            "{DESCENDANTS_CTE}
             SELECT id, parent_id, name, node_type, kind, full_path, depth
             FROM descendants ORDER BY depth, full_path"
        );
        let max_depth = max_depth.map(i64::from).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![root.id, root.full_path, root.kind.as_str(), max_depth],
            |row| {
                Ok(PathNode {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    name: row.get(2)?,
                    node_type: row.get(3)?,
                    kind: NodeKind::from_type(&row.get::<_, String>(4)?),
                    full_path: row.get(5)?,
                    depth: root.depth + row.get::<_, u32>(6)?,
                })
            },
        )?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?);
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Locks, LockScope, Store};
    use crate::util::unix_now;

    fn mkdirs(tree: &Tree, path: &str) {
        let mut parent = tree.resolve("").unwrap().unwrap().node.id.clone();
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            parent = tree.insert(&parent, seg, Some("collection")).unwrap();
        }
    }

    #[test]
    fn resolve_walks_and_inherits_kind() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());

        let root = tree.resolve("").unwrap().unwrap();
        assert!(root.is_root());
        assert_eq!(root.kind, NodeKind::Root);
        assert_eq!(tree.resolve("/").unwrap().unwrap().id, root.id);

        mkdirs(&tree, "/a/b");
        let b = tree.resolve("/a/b").unwrap().unwrap();
        let file = tree.insert(&b.id, "c.txt", None).unwrap();

        let c = tree.resolve("/a/b/c.txt").unwrap().unwrap();
        assert_eq!(c.id, file);
        assert_eq!(c.full_path, "/a/b/c.txt");
        assert_eq!(c.depth, 3);
        assert_eq!(c.kind, NodeKind::Collection);
        assert!(!c.is_collection());

        assert!(tree.resolve("/a/x/c.txt").unwrap().is_none());
    }

    #[test]
    fn sibling_names_are_unique() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        let root = tree.resolve("").unwrap().unwrap();
        tree.insert(&root.id, "a", Some("collection")).unwrap();
        assert!(tree.insert(&root.id, "a", None).is_err());
    }

    #[test]
    fn delete_cascades() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        mkdirs(&tree, "/a/b/c");
        let a = tree.resolve("/a").unwrap().unwrap();
        tree.delete(&a.id).unwrap();
        assert!(tree.resolve("/a/b/c").unwrap().is_none());
        let left: i64 = conn
            .query_row("SELECT count(*) FROM paths", [], |r| r.get(0))
            .unwrap();
        assert_eq!(left, 1);
    }

    #[test]
    fn move_keeps_the_subtree() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        mkdirs(&tree, "/a/b/c");
        mkdirs(&tree, "/x");
        let a = tree.resolve("/a").unwrap().unwrap();
        let x = tree.resolve("/x").unwrap().unwrap();
        let c = tree.resolve("/a/b/c").unwrap().unwrap();

        let b = tree.resolve("/a/b").unwrap().unwrap();

        let moved = tree.move_node(&a.id, &x.id, "moved").unwrap();
        assert_ne!(moved, a.id);
        assert!(tree.resolve("/a").unwrap().is_none());
        let moved_b = tree.resolve("/x/moved/b").unwrap().unwrap();
        assert_eq!(moved_b.id, b.id);
        assert_eq!(moved_b.parent_id.as_deref(), Some(moved.as_str()));
        let moved_c = tree.resolve("/x/moved/b/c").unwrap().unwrap();
        assert_eq!(moved_c.id, c.id);
    }

    #[test]
    fn clone_remaps_every_id() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        mkdirs(&tree, "/a/b/c");
        let a = tree.resolve("/a").unwrap().unwrap();
        let root = tree.resolve("").unwrap().unwrap();

        let new_root = tree.clone_tree(&a, &root.id, "copy", None).unwrap();
        assert_ne!(new_root, a.id);

        let copy_c = tree.resolve("/copy/b/c").unwrap().unwrap();
        let orig_c = tree.resolve("/a/b/c").unwrap().unwrap();
        assert_ne!(copy_c.id, orig_c.id);
        let copy_b = tree.resolve("/copy/b").unwrap().unwrap();
        assert_eq!(copy_c.parent_id.as_deref(), Some(copy_b.id.as_str()));
        assert_eq!(tree.path_of(&copy_c.id).unwrap().as_deref(), Some("/copy/b/c"));
        assert_eq!(tree.path_of(&root.id).unwrap().as_deref(), Some(""));
        assert!(tree.path_of("nope").unwrap().is_none());
    }

    #[test]
    fn clone_respects_depth() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        mkdirs(&tree, "/a/b");
        let a = tree.resolve("/a").unwrap().unwrap();
        let root = tree.resolve("").unwrap().unwrap();
        tree.clone_tree(&a, &root.id, "shallow", Some(0)).unwrap();
        assert!(tree.resolve("/shallow").unwrap().is_some());
        assert!(tree.resolve("/shallow/b").unwrap().is_none());
    }

    #[test]
    fn descendants_are_depth_bounded() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        mkdirs(&tree, "/a/b/c");
        let a = tree.resolve("/a").unwrap().unwrap();

        let one = tree.descendants(&a, Some(1)).unwrap();
        let paths: Vec<_> = one.iter().map(|n| n.full_path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/a/b"]);
        assert_eq!(one[1].depth, 2);

        let all = tree.descendants(&a, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].full_path, "/a/b/c");
    }

    #[test]
    fn closest_lock_wins() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let locks = Locks::new(&conn, now);
        mkdirs(&tree, "/a/b/c");

        let a = tree.resolve("/a").unwrap().unwrap();
        let deep = locks
            .grant(&a, true, LockScope::Exclusive, None, 60)
            .unwrap();
        let c = tree.resolve("/a/b/c").unwrap().unwrap();
        assert!(c.locks.direct.is_empty());
        assert_eq!(c.locks.applicable.len(), 1);
        assert_eq!(c.locks.applicable[0].token(), deep);

        // a depth-0 lock on b shadows the deep lock on a for b's subtree.
        conn.execute("DELETE FROM locks", []).unwrap();
        let a = tree.resolve("/a").unwrap().unwrap();
        locks
            .grant(&a, true, LockScope::Shared, None, 60)
            .unwrap();
        let b = tree.resolve("/a/b").unwrap().unwrap();
        let shallow = locks
            .grant(&b, false, LockScope::Shared, None, 60)
            .unwrap();
        let b = tree.resolve("/a/b").unwrap().unwrap();
        assert_eq!(b.locks.applicable.len(), 1);
        assert_eq!(b.locks.applicable[0].token(), shallow);
        let c = tree.resolve("/a/b/c").unwrap().unwrap();
        assert!(c.locks.applicable.is_empty());
    }
}

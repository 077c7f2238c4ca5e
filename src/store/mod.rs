//! Relational backing store.
//!
//! Four tables hold the whole namespace:
//!
//! - `paths`: the tree. One row per node, children point at their parent.
//! - `resources`: content blobs, at most one per node.
//! - `properties`: dead properties, owned by exactly one node or resource.
//! - `locks`: advisory write locks rooted at a node.
//!
//! Everything derived (full paths, inherited node types, inherited locks)
//! is computed on read, see [`tree`].
use std::path::Path;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

pub mod locks;
pub mod props;
pub mod resources;
pub mod tree;

pub use self::locks::{LockBrief, LockScope, LockToken, LockView, Locks};
pub use self::props::{NewProperty, Owner, PropName, Property, Props};
pub use self::resources::Resources;
pub use self::tree::{NodeKind, ResolvedNode, Tree};

use crate::util::{unix_now, unix_to_rfc3339};

pub(crate) const DAV_NS: &str = "DAV:";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS paths (
        id         TEXT NOT NULL PRIMARY KEY,
        parent_id  TEXT NULL REFERENCES paths(id) ON DELETE CASCADE ON UPDATE CASCADE,
        name       TEXT NOT NULL,   -- single url-escaped segment
        node_type  TEXT NULL,       -- NULL inherits from the parent
        CHECK (parent_id IS NOT NULL OR name = '')
    );

    CREATE        INDEX IF NOT EXISTS paths_parent_idx      ON paths(parent_id);
    CREATE UNIQUE INDEX IF NOT EXISTS paths_parent_name_idx ON paths(parent_id, name);
    CREATE UNIQUE INDEX IF NOT EXISTS paths_root_idx        ON paths(name) WHERE parent_id IS NULL;

    CREATE TABLE IF NOT EXISTS resources (
        id               TEXT NOT NULL PRIMARY KEY,
        path_id          TEXT NOT NULL REFERENCES paths(id) ON DELETE CASCADE ON UPDATE CASCADE,
        media_type       TEXT,
        content_language TEXT,
        length           INTEGER NOT NULL,
        content          BLOB NOT NULL,
        etag             TEXT NOT NULL,
        created_at       INTEGER NOT NULL,
        updated_at       INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS resources_path_idx ON resources(path_id);

    CREATE TABLE IF NOT EXISTS properties (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        path_id     TEXT NULL REFERENCES paths(id) ON DELETE CASCADE ON UPDATE CASCADE,
        resource_id TEXT NULL REFERENCES resources(id) ON DELETE CASCADE,
        is_user     INTEGER NOT NULL DEFAULT 1,
        namespace   TEXT NOT NULL,  -- '' for no namespace
        local_name  TEXT NOT NULL,
        attributes  TEXT NOT NULL,  -- json array of [name, value] pairs
        content     TEXT NOT NULL,  -- xml fragment
        CHECK ((path_id IS NULL AND resource_id IS NOT NULL)
            OR (path_id IS NOT NULL AND resource_id IS NULL))
    );

    CREATE        INDEX IF NOT EXISTS properties_path_idx         ON properties(path_id);
    CREATE UNIQUE INDEX IF NOT EXISTS properties_path_name_idx    ON properties(path_id, namespace, local_name);
    CREATE        INDEX IF NOT EXISTS properties_resource_idx     ON properties(resource_id);
    CREATE UNIQUE INDEX IF NOT EXISTS properties_resource_name_idx ON properties(resource_id, namespace, local_name);

    CREATE TABLE IF NOT EXISTS locks (
        id           TEXT NOT NULL PRIMARY KEY,
        path_id      TEXT NOT NULL REFERENCES paths(id) ON DELETE CASCADE ON UPDATE CASCADE,
        scope        TEXT NOT NULL,  -- exclusive / shared
        lock_type    TEXT NOT NULL,  -- write
        deep         INTEGER NOT NULL DEFAULT 0,
        owner        TEXT,
        timeout      INTEGER NOT NULL,
        refreshed_at INTEGER NOT NULL,
        created_at   INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS locks_path_idx    ON locks(path_id);
    CREATE INDEX IF NOT EXISTS locks_expires_idx ON locks(refreshed_at + timeout);
";

/// Handle to the backing database.
///
/// One connection, handed out to one request at a time. The request keeps
/// it checked out until its transaction is committed or rolled back.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Store> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn)
    }

    /// An ephemeral in-memory database.
    pub fn memory() -> rusqlite::Result<Store> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> rusqlite::Result<Store> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA)?;
        ensure_root(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
        })
    }

    /// How long a request waits for a concurrent writer before the store
    /// counts as busy (default 5s).
    pub fn set_busy_timeout(&self, timeout: Duration) -> rusqlite::Result<()> {
        self.conn.lock().busy_timeout(timeout)
    }

    /// Check out the connection for the duration of one request.
    pub(crate) fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

// the root node carries the same system properties as any collection.
fn ensure_root(conn: &Connection) -> rusqlite::Result<()> {
    let root = conn
        .query_row("SELECT id FROM paths WHERE parent_id IS NULL", [], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    if root.is_some() {
        return Ok(());
    }

    let id = new_id();
    debug!("store: creating root node {id}");
    conn.execute(
        "INSERT INTO paths (id, parent_id, name, node_type) VALUES (?1, NULL, '', ?2)",
        params![id, NodeKind::Root.as_str()],
    )?;
    let props = collection_props("", unix_now());
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO properties
            (path_id, resource_id, is_user, namespace, local_name, attributes, content)
         VALUES (?1, NULL, 0, ?2, ?3, '[]', ?4)",
    )?;
    for p in props {
        stmt.execute(params![id, p.name.namespace, p.name.local_name, p.content])?;
    }
    Ok(())
}

/// A fresh opaque id for nodes, resources and locks.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// System properties of a collection node.
pub(crate) fn collection_props(display: &str, now: i64) -> Vec<NewProperty> {
    vec![
        NewProperty::dav(
            "resourcetype",
            format!("<D:collection xmlns:D=\"{DAV_NS}\"/>"),
        ),
        NewProperty::dav_text("displayname", display),
        NewProperty::dav_text("creationdate", &unix_to_rfc3339(now)),
    ]
}

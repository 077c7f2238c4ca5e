//! Resource content, one blob per node.
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::props::{NewProperty, Owner, PropName, Props};
use super::new_id;
use crate::util::{unix_to_httpdate, unix_to_rfc3339};
use crate::DavResult;

/// Metadata of the content attached to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceContent {
    pub id: String,
    pub path_id: String,
    pub media_type: Option<String>,
    pub content_language: Option<String>,
    pub length: u64,
    /// md5 of the content, hex, unquoted.
    pub etag: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ResourceContent {
    fn from_row(row: &Row) -> rusqlite::Result<ResourceContent> {
        Ok(ResourceContent {
            id: row.get(0)?,
            path_id: row.get(1)?,
            media_type: row.get(2)?,
            content_language: row.get(3)?,
            length: row.get::<_, i64>(4)?.max(0) as u64,
            etag: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    /// The ETag header value.
    pub fn quoted_etag(&self) -> String {
        format!("\"{}\"", self.etag)
    }
}

/// Result of [`Resources::put`].
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// no content was attached to the node before.
    pub created: bool,
    pub resource_id: String,
    pub etag: String,
}

const COLUMNS: &str =
    "id, path_id, media_type, content_language, length, etag, created_at, updated_at";

pub(crate) fn content_etag(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}

pub struct Resources<'c> {
    conn: &'c Connection,
    now: i64,
}

impl<'c> Resources<'c> {
    pub fn new(conn: &'c Connection, now: i64) -> Resources<'c> {
        Resources { conn, now }
    }

    /// Metadata of the content at `path_id`, if any.
    pub fn get(&self, path_id: &str) -> DavResult<Option<ResourceContent>> {
        let sql = format!("SELECT {COLUMNS} FROM resources WHERE path_id = ?1");
        let res = self
            .conn
            .query_row(&sql, params![path_id], ResourceContent::from_row)
            .optional()?;
        Ok(res)
    }

    /// Metadata and bytes of the content at `path_id`.
    pub fn read(&self, path_id: &str) -> DavResult<Option<(ResourceContent, Vec<u8>)>> {
        let sql = format!("SELECT {COLUMNS}, content FROM resources WHERE path_id = ?1");
        let res = self
            .conn
            .query_row(&sql, params![path_id], |row| {
                Ok((ResourceContent::from_row(row)?, row.get::<_, Vec<u8>>(8)?))
            })
            .optional()?;
        Ok(res)
    }

    /// Attach `content` to a node, replacing what was there, and bring the
    /// system properties of the resource up to date.
    pub fn put(
        &self,
        path_id: &str,
        display: &str,
        media_type: Option<&str>,
        content_language: Option<&str>,
        content: &[u8],
    ) -> DavResult<PutOutcome> {
        let etag = content_etag(content);
        let length = content.len() as i64;

        let existing = self.get(path_id)?;
        let created = existing.is_none();
        let id = match existing {
            Some(res) => {
                self.conn.execute(
                    "UPDATE resources
                     SET media_type = ?2, content_language = ?3, length = ?4,
                         content = ?5, etag = ?6, updated_at = ?7
                     WHERE id = ?1",
                    params![res.id, media_type, content_language, length, content, etag, self.now],
                )?;
                res.id
            }
            None => {
                let id = new_id();
                self.conn.execute(
                    "INSERT INTO resources
                        (id, path_id, media_type, content_language, length, content, etag,
                         created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                    params![id, path_id, media_type, content_language, length, content, etag, self.now],
                )?;
                id
            }
        };
        trace!("resources: put {length} bytes at {path_id} (created: {created})");

        let mut system = vec![
            NewProperty::dav("resourcetype", String::new()),
            NewProperty::dav_text("displayname", display),
            NewProperty::dav_text("getcontentlength", &length.to_string()),
            NewProperty::dav_text(
                "getcontenttype",
                media_type.unwrap_or("application/octet-stream"),
            ),
            NewProperty::dav_text("getetag", &format!("\"{etag}\"")),
            NewProperty::dav_text("getlastmodified", &unix_to_httpdate(self.now)),
        ];
        if created {
            system.push(NewProperty::dav_text(
                "creationdate",
                &unix_to_rfc3339(self.now),
            ));
        }
        let owner = Owner::Resource(id.clone());
        let props = Props::new(self.conn);
        match content_language {
            Some(lang) => system.push(NewProperty::dav_text("getcontentlanguage", lang)),
            None => props.remove_many(&owner, false, &[PropName::dav("getcontentlanguage")])?,
        }
        props.set_many(&owner, false, &system)?;

        Ok(PutOutcome {
            created,
            resource_id: id,
            etag,
        })
    }

    /// Copy the content at `src_path_id` (if any) onto `dst_path_id` as a new
    /// resource, properties included.
    pub fn clone_onto(&self, src_path_id: &str, dst_path_id: &str) -> DavResult<()> {
        let Some(src) = self.get(src_path_id)? else {
            return Ok(());
        };
        let id = new_id();
        self.conn.execute(
            "INSERT INTO resources
                (id, path_id, media_type, content_language, length, content, etag,
                 created_at, updated_at)
             SELECT ?2, ?3, media_type, content_language, length, content, etag, ?4, ?4
             FROM resources WHERE id = ?1",
            params![src.id, id, dst_path_id, self.now],
        )?;
        Props::new(self.conn).copy_owned(&Owner::Resource(src.id), &Owner::Resource(id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, Tree};
    use crate::util::unix_now;

    #[test]
    fn etag_is_md5_of_content() {
        assert_eq!(content_etag(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn put_then_replace() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let resources = Resources::new(&conn, now);
        let props = Props::new(&conn);

        let root = tree.resolve("").unwrap().unwrap();
        let f = tree.insert(&root.id, "b.txt", None).unwrap();

        let first = resources
            .put(&f, "b.txt", Some("text/plain"), Some("en"), b"hello")
            .unwrap();
        assert!(first.created);
        let second = resources.put(&f, "b.txt", None, None, b"bye").unwrap();
        assert!(!second.created);
        assert_eq!(first.resource_id, second.resource_id);

        let (meta, bytes) = resources.read(&f).unwrap().unwrap();
        assert_eq!(bytes, b"bye");
        assert_eq!(meta.length, 3);
        assert_eq!(meta.quoted_etag(), format!("\"{}\"", content_etag(b"bye")));

        let owner = Owner::Resource(meta.id.clone());
        let len = props
            .get(&owner, &PropName::dav("getcontentlength"))
            .unwrap()
            .unwrap();
        assert_eq!(len.content, "3");
        assert!(props
            .get(&owner, &PropName::dav("getcontentlanguage"))
            .unwrap()
            .is_none());
        assert!(props
            .get(&owner, &PropName::dav("creationdate"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn clone_is_independent() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let resources = Resources::new(&conn, now);

        let root = tree.resolve("").unwrap().unwrap();
        let a = tree.insert(&root.id, "a", None).unwrap();
        let c = tree.insert(&root.id, "c", None).unwrap();
        resources.put(&a, "a", None, None, b"one").unwrap();
        resources.clone_onto(&a, &c).unwrap();
        resources.put(&a, "a", None, None, b"two").unwrap();

        let (_, bytes) = resources.read(&c).unwrap().unwrap();
        assert_eq!(bytes, b"one");
        assert_ne!(
            resources.get(&a).unwrap().unwrap().id,
            resources.get(&c).unwrap().unwrap().id
        );
    }
}

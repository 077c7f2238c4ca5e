//! Dead properties.
//!
//! A property belongs to exactly one path node or one resource. System
//! properties (`is_user = 0`) are written by the resource and tree stores,
//! user properties only by PROPPATCH.
use std::collections::{BTreeMap, HashSet};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::tree::{PathNode, DESCENDANTS_CTE};
use super::DAV_NS;
use crate::DavResult;

/// The entity a property is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Path(String),
    Resource(String),
}

impl Owner {
    fn column(&self) -> &'static str {
        match self {
            Owner::Path(_) => "path_id",
            Owner::Resource(_) => "resource_id",
        }
    }

    fn id(&self) -> &str {
        match self {
            Owner::Path(id) | Owner::Resource(id) => id,
        }
    }

    // (path_id, resource_id) column values.
    fn columns(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Owner::Path(id) => (Some(id), None),
            Owner::Resource(id) => (None, Some(id)),
        }
    }
}

/// Namespace plus local name. The namespace is `""` for none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropName {
    pub namespace: String,
    pub local_name: String,
}

impl PropName {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> PropName {
        PropName {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    pub fn dav(local_name: &str) -> PropName {
        PropName::new(DAV_NS, local_name)
    }
}

/// A stored property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: PropName,
    pub is_user: bool,
    pub attributes: Vec<(String, String)>,
    /// serialized xml children of the property element.
    pub content: String,
}

/// A property about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProperty {
    pub name: PropName,
    pub attributes: Vec<(String, String)>,
    pub content: String,
}

impl NewProperty {
    /// DAV: property with an xml fragment as its value.
    pub fn dav(local_name: &str, fragment: String) -> NewProperty {
        NewProperty {
            name: PropName::dav(local_name),
            attributes: Vec::new(),
            content: fragment,
        }
    }

    /// DAV: property with a text value.
    pub fn dav_text(local_name: &str, text: &str) -> NewProperty {
        NewProperty::dav(local_name, htmlescape::encode_minimal(text))
    }
}

type RawRow = (String, Option<i64>, Option<bool>, Option<String>, Option<String>, Option<String>, Option<String>);

fn decode(
    name: PropName,
    is_user: bool,
    attributes: &str,
    content: String,
) -> DavResult<Property> {
    let attributes: Vec<(String, String)> = serde_json::from_str(attributes)?;
    Ok(Property {
        name,
        is_user,
        attributes,
        content,
    })
}

pub struct Props<'c> {
    conn: &'c Connection,
}

impl<'c> Props<'c> {
    pub fn new(conn: &'c Connection) -> Props<'c> {
        Props { conn }
    }

    /// Look up one property of one owner.
    pub fn get(&self, owner: &Owner, name: &PropName) -> DavResult<Option<Property>> {
        let sql = format!(
            "SELECT is_user, attributes, content FROM properties
             WHERE {} = ?1 AND namespace = ?2 AND local_name = ?3",
            owner.column()
        );
        let row = self
            .conn
            .query_row(
                &sql,
                params![owner.id(), name.namespace, name.local_name],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        match row {
            Some((is_user, attributes, content)) => {
                Ok(Some(decode(name.clone(), is_user, &attributes, content)?))
            }
            None => Ok(None),
        }
    }

    /// Properties of every node in the subtree of `root`, at most
    /// `max_depth` levels deep, keyed by full path.
    ///
    /// Both the properties of a node and those of the resource attached to
    /// it are returned; when both define a name, the node's wins. With
    /// `filters`, only the named properties are returned. Every node of the
    /// subtree is a key in the result, even when it has no properties.
    pub fn query(
        &self,
        root: &PathNode,
        max_depth: Option<u32>,
        filters: Option<&[PropName]>,
    ) -> DavResult<BTreeMap<String, Vec<Property>>> {
        let mut values = vec![
            Value::Text(root.id.clone()),
            Value::Text(root.full_path.clone()),
            Value::Text(root.kind.as_str().to_string()),
            Value::Integer(max_depth.map(i64::from).unwrap_or(i64::MAX)),
        ];

        let filter = match filters {
            None => String::new(),
            Some([]) => " AND 0".to_string(),
            Some(names) => {
                let mut clauses = Vec::with_capacity(names.len());
                for name in names {
                    let n = values.len();
                    clauses.push(format!(
                        "(p.namespace = ?{} AND p.local_name = ?{})",
                        n + 1,
                        n + 2
                    ));
                    values.push(Value::Text(name.namespace.clone()));
                    values.push(Value::Text(name.local_name.clone()));
                }
                format!(" AND ({})", clauses.join(" OR "))
            }
        };

        let sql = format!(
            "{DESCENDANTS_CTE}
             SELECT d.full_path, p.src, p.is_user, p.namespace, p.local_name, p.attributes, p.content
             FROM descendants d
             LEFT JOIN (
                 SELECT 0 AS src, path_id AS node_id, is_user, namespace, local_name, attributes, content
                 FROM properties WHERE path_id IS NOT NULL
                 UNION ALL
                 SELECT 1 AS src, r.path_id AS node_id, pr.is_user, pr.namespace, pr.local_name,
                        pr.attributes, pr.content
                 FROM properties pr INNER JOIN resources r ON (pr.resource_id = r.id)
             ) p ON (p.node_id = d.id{filter})
             ORDER BY d.depth, d.full_path, p.src, p.namespace, p.local_name"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| -> rusqlite::Result<RawRow> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })?;

        let mut result: BTreeMap<String, Vec<Property>> = BTreeMap::new();
        let mut seen: HashSet<(String, PropName)> = HashSet::new();
        for row in rows {
            let (full_path, src, is_user, ns, local, attributes, content) = row?;
            let entry = result.entry(full_path.clone()).or_default();
            let (Some(_), Some(is_user), Some(ns), Some(local), Some(attributes), Some(content)) =
                (src, is_user, ns, local, attributes, content)
            else {
                // no matching properties for this node.
                continue;
            };
            let name = PropName::new(ns, local);
            if !seen.insert((full_path, name.clone())) {
                continue;
            }
            entry.push(decode(name, is_user, &attributes, content)?);
        }
        trace!(
            "props: query below {:?} returned {} paths",
            root.full_path,
            result.len()
        );
        Ok(result)
    }

    /// Insert or replace properties of `owner`.
    pub fn set_many(&self, owner: &Owner, is_user: bool, props: &[NewProperty]) -> DavResult<()> {
        let (path_id, resource_id) = owner.columns();
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO properties
                (path_id, resource_id, is_user, namespace, local_name, attributes, content)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for p in props {
            let attributes = serde_json::to_string(&p.attributes)?;
            stmt.execute(params![
                path_id,
                resource_id,
                is_user,
                p.name.namespace,
                p.name.local_name,
                attributes,
                p.content,
            ])?;
        }
        Ok(())
    }

    /// Remove the named properties of `owner` that have the given origin.
    /// Names that are not present are ignored.
    pub fn remove_many(&self, owner: &Owner, is_user: bool, filters: &[PropName]) -> DavResult<()> {
        let sql = format!(
            "DELETE FROM properties
             WHERE {} = ?1 AND is_user = ?2 AND namespace = ?3 AND local_name = ?4",
            owner.column()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        for name in filters {
            stmt.execute(params![owner.id(), is_user, name.namespace, name.local_name])?;
        }
        Ok(())
    }

    /// Rewrite the system `displayname` of a node and of its resource.
    pub fn refresh_displayname(&self, path_id: &str, display: &str) -> DavResult<()> {
        self.conn.execute(
            "UPDATE properties SET content = ?2
             WHERE is_user = 0 AND namespace = ?3 AND local_name = 'displayname'
               AND (path_id = ?1
                    OR resource_id IN (SELECT id FROM resources WHERE path_id = ?1))",
            params![path_id, htmlescape::encode_minimal(display), DAV_NS],
        )?;
        Ok(())
    }

    /// Copy every property of `from` onto `to`.
    pub fn copy_owned(&self, from: &Owner, to: &Owner) -> DavResult<()> {
        let (path_id, resource_id) = to.columns();
        let sql = format!(
            "INSERT INTO properties
                (path_id, resource_id, is_user, namespace, local_name, attributes, content)
             SELECT ?2, ?3, is_user, namespace, local_name, attributes, content
             FROM properties WHERE {} = ?1",
            from.column()
        );
        self.conn
            .execute(&sql, params![from.id(), path_id, resource_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Resources, Store, Tree};
    use crate::util::unix_now;

    fn user_prop(ns: &str, name: &str, content: &str) -> NewProperty {
        NewProperty {
            name: PropName::new(ns, name),
            attributes: vec![("lang".to_string(), "en".to_string())],
            content: content.to_string(),
        }
    }

    #[test]
    fn set_is_last_write_wins() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        let props = Props::new(&conn);
        let root = tree.resolve("").unwrap().unwrap();
        let owner = Owner::Path(root.id.clone());

        props
            .set_many(&owner, true, &[user_prop("urn:x", "color", "red")])
            .unwrap();
        props
            .set_many(&owner, true, &[user_prop("urn:x", "color", "blue")])
            .unwrap();
        let p = props
            .get(&owner, &PropName::new("urn:x", "color"))
            .unwrap()
            .unwrap();
        assert_eq!(p.content, "blue");
        assert!(p.is_user);
        assert_eq!(p.attributes, vec![("lang".to_string(), "en".to_string())]);

        props
            .remove_many(&owner, true, &[PropName::new("urn:x", "color")])
            .unwrap();
        assert!(props
            .get(&owner, &PropName::new("urn:x", "color"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn remove_keeps_system_properties() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let tree = Tree::new(&conn, unix_now());
        let props = Props::new(&conn);
        let root = tree.resolve("").unwrap().unwrap();
        let owner = Owner::Path(root.id.clone());

        props
            .remove_many(&owner, true, &[PropName::dav("resourcetype")])
            .unwrap();
        assert!(props
            .get(&owner, &PropName::dav("resourcetype"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn query_lists_every_path() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let props = Props::new(&conn);
        let resources = Resources::new(&conn, now);

        let root = tree.resolve("").unwrap().unwrap();
        let a = tree.insert(&root.id, "a", Some("collection")).unwrap();
        let f = tree.insert(&a, "f.txt", None).unwrap();
        resources
            .put(&f, "f.txt", Some("text/plain"), None, b"hi")
            .unwrap();
        props
            .set_many(&Owner::Path(f.clone()), true, &[user_prop("urn:x", "color", "red")])
            .unwrap();

        let a = tree.resolve("/a").unwrap().unwrap();
        let wanted = [PropName::new("urn:x", "color"), PropName::dav("getetag")];
        let found = props.query(&a, Some(1), Some(&wanted)).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found["/a"].is_empty());
        let names: Vec<_> = found["/a/f.txt"]
            .iter()
            .map(|p| p.name.local_name.as_str())
            .collect();
        assert_eq!(names, vec!["color", "getetag"]);

        let none = props.query(&a, Some(1), Some(&[])).unwrap();
        assert!(none.values().all(|v| v.is_empty()));
    }

    #[test]
    fn path_properties_shadow_resource_properties() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let props = Props::new(&conn);
        let resources = Resources::new(&conn, now);

        let root = tree.resolve("").unwrap().unwrap();
        let f = tree.insert(&root.id, "f.txt", None).unwrap();
        resources.put(&f, "f.txt", None, None, b"x").unwrap();
        props
            .set_many(
                &Owner::Path(f.clone()),
                true,
                &[NewProperty::dav_text("displayname", "Custom")],
            )
            .unwrap();

        let node = tree.resolve("/f.txt").unwrap().unwrap();
        let found = props
            .query(&node, Some(0), Some(&[PropName::dav("displayname")]))
            .unwrap();
        assert_eq!(found["/f.txt"].len(), 1);
        assert_eq!(found["/f.txt"][0].content, "Custom");
    }

    #[test]
    fn displayname_follows_renames() {
        let store = Store::memory().unwrap();
        let conn = store.connection();
        let now = unix_now();
        let tree = Tree::new(&conn, now);
        let props = Props::new(&conn);
        let resources = Resources::new(&conn, now);

        let root = tree.resolve("").unwrap().unwrap();
        let f = tree.insert(&root.id, "f.txt", None).unwrap();
        let out = resources.put(&f, "f.txt", None, None, b"x").unwrap();
        props.refresh_displayname(&f, "g & h.txt").unwrap();

        let p = props
            .get(&Owner::Resource(out.resource_id), &PropName::dav("displayname"))
            .unwrap()
            .unwrap();
        assert_eq!(p.content, "g &amp; h.txt");
    }
}

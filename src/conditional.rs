//! The `If:` header and lock validation.
//!
//! ```text
//! header        := (tagged-list | untagged-list)*
//! tagged-list   := "<" uri ">" untagged-list+
//! untagged-list := "(" condition* ")"
//! condition     := "Not"? (state-token | entity-tag)
//! state-token   := "<" token ">"
//! entity-tag    := "[" text "]"
//! ```
//!
//! The header matches when any list matches; a list matches when all of its
//! conditions hold for the list's resource (the tagged uri, or the resource
//! under operation). An empty list always matches, and so does a header
//! without lists.
use std::fmt;

use headers::HeaderMapExt;
use http::HeaderMap;

use crate::davheaders::{self, LockTokenHeader};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::store::{LockBrief, LockToken, ResolvedNode, Resources, Tree};
use crate::DavResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IfItem {
    StateToken(String),
    /// normalized: no weak marker, no quotes.
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfCondition {
    pub not: bool,
    pub item: IfItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfList {
    pub resource: Option<String>,
    pub conditions: Vec<IfCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IfHeader {
    src: String,
    lists: Vec<IfList>,
}

/// What the conditions of a list are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ResourceState {
    /// unquoted etag of the content, if the resource has content.
    pub etag: Option<String>,
    pub lock_tokens: Vec<LockToken>,
}

fn normalize_etag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn error(&self, what: &str) -> String {
        format!("{what} at offset {}", self.pos)
    }

    // text up to `close`, which is consumed. `"` quotes `close` when `quoted`.
    fn until(&mut self, close: char, quoted: bool) -> Result<&'a str, String> {
        let start = self.pos;
        let mut in_quote = false;
        for (i, c) in self.src[start..].char_indices() {
            if quoted && c == '"' {
                in_quote = !in_quote;
            } else if c == close && !in_quote {
                self.pos = start + i + c.len_utf8();
                return Ok(&self.src[start..start + i]);
            }
        }
        Err(self.error(&format!("missing '{close}'")))
    }

    fn keyword_not(&mut self) -> bool {
        let rest = &self.src[self.pos..];
        if rest.len() >= 3 && rest.is_char_boundary(3) && rest[..3].eq_ignore_ascii_case("not") {
            let next = rest[3..].chars().next();
            if matches!(next, Some(c) if c.is_whitespace() || c == '<' || c == '[') {
                self.pos += 3;
                return true;
            }
        }
        false
    }

    fn conditions(&mut self) -> Result<Vec<IfCondition>, String> {
        let mut conditions = Vec::new();
        loop {
            self.skip_ws();
            let not = self.keyword_not();
            self.skip_ws();
            match self.peek() {
                Some(')') if !not => {
                    self.bump();
                    break;
                }
                Some('<') => {
                    self.bump();
                    let token = self.until('>', false)?.trim();
                    conditions.push(IfCondition {
                        not,
                        item: IfItem::StateToken(token.to_string()),
                    });
                }
                Some('[') => {
                    self.bump();
                    let raw = self.until(']', true)?;
                    // be liberal: `[Not <"tag">]` is read as `Not ["tag"]`.
                    let mut inner = Parser { src: raw, pos: 0 };
                    inner.skip_ws();
                    let inner_not = inner.keyword_not();
                    let tag = inner.src[inner.pos..].trim();
                    let tag = tag
                        .strip_prefix('<')
                        .and_then(|t| t.strip_suffix('>'))
                        .unwrap_or(tag);
                    conditions.push(IfCondition {
                        not: not ^ inner_not,
                        item: IfItem::ETag(normalize_etag(tag).to_string()),
                    });
                }
                _ => return Err(self.error("expected a condition")),
            }
        }
        Ok(conditions)
    }
}

impl IfHeader {
    pub(crate) fn parse(src: &str) -> Result<IfHeader, String> {
        let mut p = Parser { src, pos: 0 };
        let mut lists = Vec::new();
        let mut resource: Option<String> = None;
        loop {
            p.skip_ws();
            match p.peek() {
                None => break,
                Some('<') => {
                    p.bump();
                    resource = Some(p.until('>', false)?.trim().to_string());
                    p.skip_ws();
                    if p.peek() != Some('(') {
                        return Err(p.error("expected '(' after resource tag"));
                    }
                }
                Some('(') => {
                    p.bump();
                    let conditions = p.conditions()?;
                    lists.push(IfList {
                        resource: resource.clone(),
                        conditions,
                    });
                }
                Some(_) => return Err(p.error("expected '(' or '<'")),
            }
        }
        Ok(IfHeader {
            src: src.trim().to_string(),
            lists,
        })
    }

    #[cfg(test)]
    pub(crate) fn lists(&self) -> &[IfList] {
        &self.lists
    }

    /// Every state token mentioned anywhere in the header.
    pub(crate) fn state_tokens(&self) -> impl Iterator<Item = &str> {
        self.lists
            .iter()
            .flat_map(|l| l.conditions.iter())
            .filter_map(|c| match c.item {
                IfItem::StateToken(ref t) => Some(t.as_str()),
                IfItem::ETag(_) => None,
            })
    }

    /// Evaluate against the state returned by `state_of` for each list's
    /// resource (`None` for the resource under operation).
    pub(crate) fn matches<F>(&self, mut state_of: F) -> DavResult<bool>
    where
        F: FnMut(Option<&str>) -> DavResult<ResourceState>,
    {
        if self.lists.is_empty() {
            return Ok(true);
        }
        for list in &self.lists {
            let state = state_of(list.resource.as_deref())?;
            if list.conditions.iter().all(|c| c.holds(&state)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl fmt::Display for IfHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.src)
    }
}

impl IfCondition {
    fn holds(&self, state: &ResourceState) -> bool {
        let matched = match self.item {
            IfItem::StateToken(ref t) => match LockToken::parse(t) {
                Some(token) => state.lock_tokens.contains(&token),
                None => false,
            },
            IfItem::ETag(ref tag) => match state.etag {
                Some(ref etag) => normalize_etag(etag) == tag,
                None => false,
            },
        };
        matched != self.not
    }
}

/// Per request: the `If:` header, the lock tokens the client holds, and
/// what is needed to resolve tagged uris.
pub(crate) struct Conditions {
    if_header: Option<IfHeader>,
    submitted: Vec<LockToken>,
    host: Option<String>,
    prefix: String,
}

impl Conditions {
    pub(crate) fn from_headers(headers: &HeaderMap, prefix: &str) -> DavResult<Conditions> {
        let if_header = headers
            .typed_try_get::<davheaders::If>()
            .map_err(|_| DavError::malformed("bad If header"))?
            .map(|h| h.0);

        let mut submitted = Vec::new();
        if let Some(ref h) = if_header {
            submitted.extend(h.state_tokens().filter_map(LockToken::parse));
        }
        if let Ok(Some(LockTokenHeader(t))) = headers.typed_try_get::<LockTokenHeader>() {
            submitted.extend(LockToken::parse(&t));
        }

        let host = headers
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(|h| h.to_string());

        Ok(Conditions {
            if_header,
            submitted,
            host,
            prefix: prefix.to_string(),
        })
    }

    /// Lock tokens presented by the client.
    pub(crate) fn submitted(&self) -> &[LockToken] {
        &self.submitted
    }

    fn state(resources: &Resources, node: Option<&ResolvedNode>) -> DavResult<ResourceState> {
        let Some(node) = node else {
            return Ok(ResourceState::default());
        };
        let etag = resources.get(&node.id)?.map(|r| r.etag);
        let mut lock_tokens = node.locks.tokens(false);
        for t in node.locks.tokens(true) {
            if !lock_tokens.contains(&t) {
                lock_tokens.push(t);
            }
        }
        Ok(ResourceState { etag, lock_tokens })
    }

    /// Does the `If:` header (if any) match, with `node` as the resource
    /// under operation.
    pub(crate) fn if_matches(
        &self,
        tree: &Tree,
        resources: &Resources,
        node: Option<&ResolvedNode>,
    ) -> DavResult<bool> {
        let Some(ref header) = self.if_header else {
            return Ok(true);
        };
        header.matches(|resource| match resource {
            None => Self::state(resources, node),
            Some(uri) => {
                let tagged = match DavPath::from_url(uri, self.host.as_deref(), &self.prefix) {
                    Ok(path) => tree.resolve(&path.full_path())?,
                    Err(_) => None,
                };
                Self::state(resources, tagged.as_ref())
            }
        })
    }

    /// Do the submitted tokens include one of `locks`.
    pub(crate) fn covers(&self, locks: &[LockBrief]) -> bool {
        locks
            .iter()
            .any(|l| self.submitted.iter().any(|t| t.id() == l.id))
    }

    /// For every node holding some of `locks`, do the submitted tokens
    /// include one of that node's locks.
    pub(crate) fn covers_each_node(&self, locks: &[LockBrief]) -> bool {
        locks.iter().all(|l| {
            let same_node: Vec<LockBrief> = locks
                .iter()
                .filter(|o| o.path_id == l.path_id)
                .cloned()
                .collect();
            self.covers(&same_node)
        })
    }

    /// 412 unless the `If:` header matches; 423 unless the node is not
    /// locked or the client holds one of the locks (only those rooted at
    /// the node when `direct`).
    pub(crate) fn validate_lock(
        &self,
        tree: &Tree,
        resources: &Resources,
        node: &ResolvedNode,
        direct: bool,
    ) -> DavResult<()> {
        if !self.if_matches(tree, resources, Some(node))? {
            debug!("If: header does not match {:?}", node.full_path);
            return Err(DavError::PreconditionFailed);
        }
        let locks = if direct {
            &node.locks.direct
        } else {
            &node.locks.applicable
        };
        if locks.is_empty() || self.covers(locks) {
            Ok(())
        } else {
            debug!("{:?} is locked", node.full_path);
            Err(DavError::Locked)
        }
    }
}

use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use xml::writer::XmlEvent;
use xmltree::Element;

use super::{Ctx, Target};
use crate::body::Body;
use crate::davheaders::{DavTimeout, Depth, LockTokenHeader, Timeout};
use crate::errors::DavError;
use crate::store::{LockScope, LockToken, LockView, ResolvedNode, DAV_NS};
use crate::util::MemBuffer;
use crate::xmltree_ext::{
    dav_text_elem, emitter, end, fragment_of, parse_xml, start_dav, write_fragment, ElementExt,
};
use crate::DavResult;

// the parts of a <lockinfo> we act on.
#[derive(Debug)]
struct LockInfo {
    scope: LockScope,
    owner: Option<String>,
}

// the one child element of `elem`, which must be DAV:something.
fn dav_choice<'a>(elem: &'a Element) -> Option<&'a str> {
    elem.child_elems_iter()
        .find(|e| e.namespace.as_deref() == Some(DAV_NS))
        .map(|e| e.name.as_str())
}

fn parse_lockinfo(body: &[u8]) -> DavResult<LockInfo> {
    let root = parse_xml(body)?;
    if !root.is_dav("lockinfo") {
        return Err(DavError::malformed("expected DAV:lockinfo"));
    }
    let scope = match root.dav_child("lockscope").and_then(dav_choice) {
        Some("exclusive") => LockScope::Exclusive,
        Some("shared") => LockScope::Shared,
        _ => return Err(DavError::malformed("lockscope must be exclusive or shared")),
    };
    match root.dav_child("locktype").and_then(dav_choice) {
        Some("write") => {}
        _ => return Err(DavError::malformed("locktype must be write")),
    }
    let owner = root
        .dav_child("owner")
        .map(|o| fragment_of(&o.children))
        .transpose()?;
    Ok(LockInfo { scope, owner })
}

impl crate::DavHandler {
    // Timeout: header, defaulted. Every offered value is capped and the
    // shortest one wins.
    fn lock_timeout(&self, req: &Request<()>) -> DavResult<i64> {
        let requested = req
            .headers()
            .typed_try_get::<Timeout>()
            .map_err(|_| DavError::malformed("bad Timeout header"))?;
        let secs = requested
            .and_then(|t| {
                t.0.iter()
                    .map(|t| match *t {
                        DavTimeout::Seconds(n) => n.clamp(1, self.max_lock_timeout),
                        DavTimeout::Infinite => self.max_lock_timeout,
                    })
                    .min()
            })
            .unwrap_or(self.lock_timeout);
        Ok(i64::from(secs))
    }

    // <D:prop><D:lockdiscovery> for one lock, as the LOCK response body.
    fn lock_discovery(&self, ctx: &Ctx<'_>, lock: &LockView) -> DavResult<Response<Body>> {
        let root = ctx
            .tree()
            .path_of(&lock.path_id)?
            .ok_or(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;

        let mut emitter = emitter(MemBuffer::new())?;
        emitter.write(XmlEvent::start_element("D:prop").ns("D", DAV_NS))?;
        start_dav(&mut emitter, "lockdiscovery")?;
        start_dav(&mut emitter, "activelock")?;

        start_dav(&mut emitter, "locktype")?;
        dav_text_elem(&mut emitter, "write", "")?;
        end(&mut emitter)?;
        start_dav(&mut emitter, "lockscope")?;
        dav_text_elem(&mut emitter, lock.scope.as_str(), "")?;
        end(&mut emitter)?;
        dav_text_elem(
            &mut emitter,
            "depth",
            if lock.deep { "infinity" } else { "0" },
        )?;
        if let Some(ref owner) = lock.owner {
            start_dav(&mut emitter, "owner")?;
            write_fragment(&mut emitter, owner)?;
            end(&mut emitter)?;
        }
        let timeout = format!("Second-{}", lock.remaining(ctx.now));
        dav_text_elem(&mut emitter, "timeout", &timeout)?;
        start_dav(&mut emitter, "locktoken")?;
        dav_text_elem(&mut emitter, "href", &lock.token.to_string())?;
        end(&mut emitter)?;
        start_dav(&mut emitter, "lockroot")?;
        dav_text_elem(&mut emitter, "href", &self.href(&root))?;
        end(&mut emitter)?;

        end(&mut emitter)?;
        end(&mut emitter)?;
        end(&mut emitter)?;

        let mut res = Response::new(Body::from(emitter.into_inner().take()));
        let h = res.headers_mut();
        h.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        h.typed_insert(LockTokenHeader(lock.token.to_string()));
        Ok(res)
    }

    pub(crate) fn handle_lock(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        if ctx.body.is_empty() {
            self.lock_refresh(ctx, target)
        } else {
            self.lock_grant(ctx, target)
        }
    }

    fn lock_grant(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let info = parse_lockinfo(ctx.body)?;
        let deep = match ctx.req.headers().typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => true,
            Ok(Some(Depth::Zero)) => false,
            _ => return Err(DavError::malformed("LOCK depth must be 0 or infinity")),
        };
        let timeout = self.lock_timeout(ctx.req)?;

        let tree = ctx.tree();
        let (node, created): (ResolvedNode, bool) = match target {
            Target::Found(node) => {
                if !ctx.cond.if_matches(&tree, &ctx.resources(), Some(&node))? {
                    return Err(DavError::PreconditionFailed);
                }
                (node, false)
            }
            Target::Missing(parent) => {
                if !parent.is_collection() {
                    return Err(DavError::Conflict("parent is not a collection"));
                }
                if !ctx.cond.if_matches(&tree, &ctx.resources(), None)? {
                    return Err(DavError::PreconditionFailed);
                }
                // an empty node, until a PUT gives it content.
                tree.insert(&parent.id, ctx.path.file_name(), None)?;
                let node = tree
                    .resolve(&ctx.path.full_path())?
                    .ok_or(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
                (node, true)
            }
        };

        let token = ctx
            .locks()
            .grant(&node, deep, info.scope, info.owner.as_deref(), timeout)?;
        debug!(
            "lock {}: granted {} {} for {}s",
            ctx.path,
            info.scope.as_str(),
            token,
            timeout
        );
        let view = ctx
            .locks()
            .info(&token)?
            .ok_or(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;

        let mut res = self.lock_discovery(ctx, &view)?;
        if created {
            *res.status_mut() = StatusCode::CREATED;
        }
        Ok(res)
    }

    fn lock_refresh(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let node = target.found()?;
        if node.locks.applicable.is_empty() {
            return Err(DavError::PreconditionFailed);
        }
        if !ctx
            .cond
            .if_matches(&ctx.tree(), &ctx.resources(), Some(&node))?
        {
            return Err(DavError::PreconditionFailed);
        }
        let lock = node
            .locks
            .applicable
            .iter()
            .find(|l| ctx.cond.submitted().iter().any(|t| t.id() == l.id))
            .ok_or(DavError::PreconditionFailed)?;

        let timeout = self.lock_timeout(ctx.req)?;
        let token = lock.token();
        if !ctx.locks().refresh(&token, timeout)? {
            return Err(DavError::PreconditionFailed);
        }
        debug!("lock {}: refreshed {} for {}s", ctx.path, token, timeout);
        let view = ctx
            .locks()
            .info(&token)?
            .ok_or(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
        self.lock_discovery(ctx, &view)
    }

    pub(crate) fn handle_unlock(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let node = target.found()?;
        let token = match ctx.req.headers().typed_try_get::<LockTokenHeader>() {
            Ok(Some(LockTokenHeader(t))) => LockToken::parse(&t),
            _ => None,
        }
        .ok_or_else(|| DavError::malformed("missing or bad Lock-Token header"))?;

        ctx.validate_lock(&node, true)?;
        if !node.locks.applicable.iter().any(|l| l.id == token.id()) {
            return Err(DavError::Conflict("lock token does not apply to this resource"));
        }
        ctx.locks().release(&token)?;
        debug!("unlock {}: released {}", ctx.path, token);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

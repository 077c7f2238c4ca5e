//! Method handlers per node kind.
//!
//! A node's kind is its own declared type, or the nearest declared type
//! above it, so plain resources are served by the kind of the collection
//! they live in.
use http::{Response, StatusCode};

use super::{Ctx, DavHandler, Target};
use crate::body::Body;
use crate::errors::DavError;
use crate::store::NodeKind;
use crate::util::DavMethod;
use crate::DavResult;

pub(crate) type HandlerFn = fn(&DavHandler, &Ctx<'_>, Target) -> DavResult<Response<Body>>;

impl NodeKind {
    /// The handler for `method` on nodes of this kind, if it has one.
    pub(crate) fn handler(self, method: DavMethod) -> Option<HandlerFn> {
        let table = match self {
            NodeKind::Root => root_table(),
            NodeKind::Collection => collection_table(),
        };
        table
            .into_iter()
            .find(|(m, _)| m.contains(method))
            .map(|(_, h)| h)
    }
}

fn collection_table() -> Vec<(DavMethod, HandlerFn)> {
    vec![
        (DavMethod::OPTIONS, DavHandler::handle_options as HandlerFn),
        (DavMethod::GET | DavMethod::HEAD, DavHandler::handle_get as HandlerFn),
        (DavMethod::PUT, DavHandler::handle_put as HandlerFn),
        (DavMethod::DELETE, DavHandler::handle_delete as HandlerFn),
        (DavMethod::MKCOL, DavHandler::handle_mkcol as HandlerFn),
        (DavMethod::COPY | DavMethod::MOVE, DavHandler::handle_copymove as HandlerFn),
        (DavMethod::PROPFIND, DavHandler::handle_propfind as HandlerFn),
        (DavMethod::PROPPATCH, DavHandler::handle_proppatch as HandlerFn),
        (DavMethod::LOCK, DavHandler::handle_lock as HandlerFn),
        (DavMethod::UNLOCK, DavHandler::handle_unlock as HandlerFn),
    ]
}

// the root node itself has no content and cannot be replaced, moved,
// locked or annotated. Everything below it is an ordinary collection.
fn root_table() -> Vec<(DavMethod, HandlerFn)> {
    let read = DavMethod::GET | DavMethod::HEAD;
    let refused = DavMethod::DELETE
        | DavMethod::MOVE
        | DavMethod::PUT
        | DavMethod::LOCK
        | DavMethod::UNLOCK
        | DavMethod::PROPPATCH;
    vec![
        (read, root_get as HandlerFn),
        (refused, root_refuse as HandlerFn),
        (DavMethod::all().difference(read | refused), as_collection as HandlerFn),
    ]
}

fn is_root_itself(target: &Target) -> bool {
    matches!(target, Target::Found(node) if node.is_root())
}

fn as_collection(h: &DavHandler, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
    let handler = NodeKind::Collection
        .handler(ctx.method)
        .ok_or(DavError::MethodNotAllowed)?;
    handler(h, ctx, target)
}

fn root_get(h: &DavHandler, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
    if !is_root_itself(&target) {
        return as_collection(h, ctx, target);
    }
    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::NO_CONTENT;
    Ok(res)
}

fn root_refuse(h: &DavHandler, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
    if !is_root_itself(&target) {
        return as_collection(h, ctx, target);
    }
    debug!("refusing {:?} on the root", ctx.method);
    Err(DavError::MethodNotAllowed)
}

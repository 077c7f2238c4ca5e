use http::{Response, StatusCode};

use super::{Ctx, Target};
use crate::body::Body;
use crate::errors::DavError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) fn handle_delete(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let node = target.found()?;
        ctx.validate_lock(&node, false)?;

        // every locked node below must be unlocked by the client too.
        let below = ctx.locks().live_locks_below(&node)?;
        if !ctx.cond.covers_each_node(&below) {
            debug!("delete {}: locked below", ctx.path);
            return Err(DavError::Locked);
        }

        ctx.tree().delete(&node.id)?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}

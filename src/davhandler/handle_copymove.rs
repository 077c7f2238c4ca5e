use headers::HeaderMapExt;
use http::{Response, StatusCode};

use super::{Ctx, Target};
use crate::body::Body;
use crate::davheaders::{Depth, Destination, Overwrite};
use crate::davpath::{decode_segment, DavPath};
use crate::errors::DavError;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) fn handle_copymove(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let source = target.found()?;
        let headers = ctx.req.headers();
        let is_move = ctx.method == DavMethod::MOVE;

        // Destination: must be an url on this server, below our prefix.
        let dest = match headers.typed_try_get::<Destination>() {
            Ok(Some(Destination(d))) => d,
            _ => return Err(DavError::malformed("missing or bad Destination header")),
        };
        let host = headers
            .get(http::header::HOST)
            .and_then(|h| h.to_str().ok());
        let dest = DavPath::from_url(&dest, host, &self.prefix)
            .map_err(|_| DavError::malformed("Destination is not on this server"))?;

        if dest.is_within(ctx.path) || ctx.path.is_within(&dest) {
            return Err(DavError::Forbidden("source and destination overlap"));
        }

        // COPY may be shallow, MOVE always takes the whole subtree.
        let max_depth = match headers.typed_try_get::<Depth>() {
            Ok(None) | Ok(Some(Depth::Infinity)) => None,
            Ok(Some(Depth::Zero)) if !is_move => Some(0),
            _ => return Err(DavError::malformed("bad Depth header")),
        };
        let overwrite = headers
            .typed_try_get::<Overwrite>()
            .map_err(|_| DavError::malformed("bad Overwrite header"))?
            .map(|o| o.0)
            .unwrap_or(false);

        let tree = ctx.tree();
        let dest_parent = tree
            .resolve(&dest.parent().full_path())?
            .ok_or(DavError::Conflict("destination parent does not exist"))?;
        if !dest_parent.is_collection() {
            return Err(DavError::Conflict("destination parent is not a collection"));
        }

        let existing = tree.resolve(&dest.full_path())?;
        let replaced = existing.is_some();
        if let Some(existing) = existing {
            if !overwrite {
                return Err(DavError::PreconditionFailed);
            }
            ctx.validate_lock(&existing, false)?;
            let below = ctx.locks().live_locks_below(&existing)?;
            if !ctx.cond.covers_each_node(&below) {
                return Err(DavError::Locked);
            }
            tree.delete(&existing.id)?;
        }
        ctx.validate_lock(&dest_parent, false)?;

        let new_id = if is_move {
            ctx.validate_lock(&source, false)?;
            let below = ctx.locks().live_locks_below(&source)?;
            if !ctx.cond.covers_each_node(&below) {
                return Err(DavError::Locked);
            }
            // locks stay behind.
            ctx.locks().release_within(&source)?;
            tree.move_node(&source.id, &dest_parent.id, dest.file_name())?
        } else {
            tree.clone_tree(&source, &dest_parent.id, dest.file_name(), max_depth)?
        };
        ctx.props()
            .refresh_displayname(&new_id, &decode_segment(dest.file_name()))?;
        debug!(
            "{} {} to {} (replaced: {})",
            if is_move { "move" } else { "copy" },
            ctx.path,
            dest,
            replaced
        );

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if replaced {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(res)
    }
}

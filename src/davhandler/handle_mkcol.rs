use http::{Response, StatusCode};

use super::{Ctx, Target};
use crate::body::Body;
use crate::davpath::decode_segment;
use crate::errors::DavError;
use crate::store::{collection_props, Owner};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) fn handle_mkcol(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        // no request bodies, not even empty typed ones.
        if !ctx.body.is_empty() || ctx.req.headers().contains_key(http::header::CONTENT_TYPE) {
            return Err(DavError::UnsupportedMediaType);
        }

        let parent = match target {
            Target::Found(_) => return Err(DavError::MethodNotAllowed),
            Target::Missing(parent) => parent,
        };
        if !parent.is_collection() {
            return Err(DavError::Conflict("parent is not a collection"));
        }
        ctx.validate_lock(&parent, false)?;

        let id = ctx
            .tree()
            .insert(&parent.id, ctx.path.file_name(), Some("collection"))?;
        let display = decode_segment(ctx.path.file_name());
        ctx.props().set_many(
            &Owner::Path(id),
            false,
            &collection_props(&display, ctx.now),
        )?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}

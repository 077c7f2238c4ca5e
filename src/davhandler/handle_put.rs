use headers::HeaderMapExt;
use http::{Response, StatusCode};

use super::{Ctx, Target};
use crate::body::Body;
use crate::davpath::decode_segment;
use crate::errors::DavError;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) fn handle_put(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let node_id = match target {
            Target::Found(node) => {
                if node.is_collection() {
                    return Err(DavError::MethodNotAllowed);
                }
                ctx.validate_lock(&node, false)?;
                node.node.id
            }
            Target::Missing(parent) => {
                if !parent.is_collection() {
                    return Err(DavError::Conflict("parent is not a collection"));
                }
                ctx.validate_lock(&parent, false)?;
                ctx.tree().insert(&parent.id, ctx.path.file_name(), None)?
            }
        };

        let display = decode_segment(ctx.path.file_name());
        let headers = ctx.req.headers();
        let media_type = match headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(ct) => ct.to_string(),
            None => mime_guess::from_path(&display)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string(),
        };
        let language = headers
            .get(http::header::CONTENT_LANGUAGE)
            .and_then(|v| v.to_str().ok());

        let outcome = ctx.resources().put(
            &node_id,
            &display,
            Some(&media_type),
            language,
            ctx.body,
        )?;
        debug!(
            "put {} bytes on {} (resource {}, etag {})",
            ctx.body.len(),
            ctx.path,
            outcome.resource_id,
            outcome.etag
        );

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if outcome.created {
            StatusCode::CREATED
        } else {
            StatusCode::NO_CONTENT
        };
        if let Ok(etag) = format!("\"{}\"", outcome.etag).parse::<headers::ETag>() {
            res.headers_mut().typed_insert(etag);
        }
        Ok(res)
    }
}

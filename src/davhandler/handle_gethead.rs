use bytes::Bytes;
use headers::HeaderMapExt;
use http::{HeaderValue, Response, StatusCode};

use super::{Ctx, Target};
use crate::body::Body;
use crate::util::{unix_to_systemtime, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) fn handle_get(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let node = target.found()?;
        let head = ctx.method == DavMethod::HEAD;

        let mut res = Response::new(Body::empty());

        // collections, and nodes that were only ever locked, have no content.
        let content = if node.is_collection() {
            None
        } else {
            ctx.resources().read(&node.id)?
        };
        let Some((meta, content)) = content else {
            *res.status_mut() = StatusCode::NO_CONTENT;
            return Ok(res);
        };

        let h = res.headers_mut();
        let media_type = meta
            .media_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        if let Ok(v) = HeaderValue::from_str(media_type) {
            h.insert(http::header::CONTENT_TYPE, v);
        }
        if let Some(lang) = meta.content_language.as_deref() {
            if let Ok(v) = HeaderValue::from_str(lang) {
                h.insert(http::header::CONTENT_LANGUAGE, v);
            }
        }
        h.typed_insert(headers::ContentLength(meta.length));
        h.typed_insert(headers::LastModified::from(unix_to_systemtime(meta.updated_at)));
        if let Ok(etag) = meta.quoted_etag().parse::<headers::ETag>() {
            h.typed_insert(etag);
        }

        if !head {
            *res.body_mut() = Body::from(Bytes::from(content));
        }
        Ok(res)
    }
}

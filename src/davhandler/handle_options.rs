use headers::HeaderMapExt;
use http::{HeaderValue, Response, StatusCode};

use super::{Ctx, Target};
use crate::body::Body;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) fn handle_options(&self, _ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;

        let h = res.headers_mut();
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        // Helper to add method to array if method is in fact allowed.
        let mm = |v: &mut Vec<&str>, m: &'static str, y: DavMethod| {
            if self.allow.contains(y) {
                v.push(m);
            }
        };

        let mut v = Vec::new();
        match target {
            Target::Missing(_) => {
                mm(&mut v, "OPTIONS", DavMethod::OPTIONS);
                mm(&mut v, "MKCOL", DavMethod::MKCOL);
                mm(&mut v, "PUT", DavMethod::PUT);
                mm(&mut v, "LOCK", DavMethod::LOCK);
            }
            Target::Found(node) => {
                mm(&mut v, "OPTIONS", DavMethod::OPTIONS);
                mm(&mut v, "HEAD", DavMethod::HEAD);
                mm(&mut v, "GET", DavMethod::GET);
                if !node.is_collection() {
                    mm(&mut v, "PUT", DavMethod::PUT);
                }
                mm(&mut v, "PROPFIND", DavMethod::PROPFIND);
                mm(&mut v, "COPY", DavMethod::COPY);
                if !node.is_root() {
                    mm(&mut v, "PROPPATCH", DavMethod::PROPPATCH);
                    mm(&mut v, "MOVE", DavMethod::MOVE);
                    mm(&mut v, "DELETE", DavMethod::DELETE);
                    mm(&mut v, "LOCK", DavMethod::LOCK);
                    mm(&mut v, "UNLOCK", DavMethod::UNLOCK);
                }
            }
        }

        let allow = v.join(", ");
        if let Ok(a) = HeaderValue::from_str(&allow) {
            h.insert(http::header::ALLOW, a);
        }

        Ok(res)
    }
}

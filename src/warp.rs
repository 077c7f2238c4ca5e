//! Adapter for the `warp` HTTP server framework.
//!
//! The filters in this module will always succeed and never
//! return an error. For example, if a path is not found, the
//! filter will return a 404 reply, and not an internal
//! rejection.
//!
use std::convert::Infallible;
use std::path::Path;

use crate::{DavHandler, Store};
use warp::{filters::BoxedFilter, Filter, Reply};

/// Reply-filter that runs a DavHandler.
///
/// Just pass in a pre-configured DavHandler. If a prefix was not
/// configured, it will be the request path up to this point.
pub fn dav_handler(handler: DavHandler) -> BoxedFilter<(impl Reply,)> {
    use http::header::HeaderMap;
    use http::uri::Uri;
    use http::Response;
    use warp::path::{FullPath, Tail};

    warp::method()
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and_then(
            move |method, path_full: FullPath, path_tail: Tail, headers: HeaderMap, body| {
                let handler = handler.clone();

                async move {
                    // rebuild an http::Request struct.
                    let path_str = path_full.as_str();
                    let mut builder = http::Request::builder().method(method);
                    if let Ok(uri) = path_str.parse::<Uri>() {
                        builder = builder.uri(uri);
                    }
                    for (k, v) in headers.iter() {
                        builder = builder.header(k, v);
                    }

                    let path_len = path_str.len();
                    let tail_len = path_tail.as_str().len();
                    let prefix = path_str[..path_len - tail_len].to_string();
                    let response = match builder.body(body) {
                        Ok(request) => handler.handle_stream_with(request, Some(prefix)).await,
                        Err(_) => {
                            let mut resp = Response::new(crate::body::Body::empty());
                            *resp.status_mut() = http::StatusCode::BAD_REQUEST;
                            resp
                        }
                    };

                    // Need to remap the http_body::Body to a hyper::Body.
                    let (parts, body) = response.into_parts();
                    let response = Response::from_parts(parts, hyper::Body::wrap_stream(body));
                    Ok::<_, Infallible>(response)
                }
            },
        )
        .boxed()
}

/// Creates a Filter that serves the namespace kept in the SQLite
/// database at `path`, creating it when needed.
pub fn dav_database(path: impl AsRef<Path>) -> rusqlite::Result<BoxedFilter<(impl Reply,)>> {
    let store = Store::open(path)?;
    Ok(dav_handler(DavHandler::builder(store).build()))
}

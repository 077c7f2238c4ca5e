//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::path::Path;

use dav_store::{DavHandler, Store};
use http::{HeaderMap, Request, StatusCode};

/// Everything a test looks at in a response.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The lock token from the `Lock-Token:` header, without brackets.
    pub fn lock_token(&self) -> String {
        let h = self.header("lock-token").expect("no Lock-Token header");
        h.trim_start_matches('<').trim_end_matches('>').to_string()
    }
}

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn handler() -> DavHandler {
    init_log();
    DavHandler::builder(Store::memory().unwrap()).build()
}

pub fn file_handler(path: &Path) -> DavHandler {
    init_log();
    DavHandler::builder(Store::open(path).unwrap()).build()
}

pub async fn send(
    handler: &DavHandler,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> Reply {
    let mut builder = Request::builder().method(method).uri(path);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let req = builder.body(hyper::Body::from(body.to_string())).unwrap();
    let (parts, body) = handler.handle(req).await.into_parts();
    let bytes = hyper::body::to_bytes(body).await.unwrap();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

pub async fn put(handler: &DavHandler, path: &str, body: &str) -> Reply {
    send(handler, "PUT", path, &[], body).await
}

pub async fn mkcol(handler: &DavHandler, path: &str) -> Reply {
    send(handler, "MKCOL", path, &[], "").await
}

pub async fn get(handler: &DavHandler, path: &str) -> Reply {
    send(handler, "GET", path, &[], "").await
}

pub fn lockinfo(scope: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:{scope}/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner><D:href>mailto:tester@example.com</D:href></D:owner>
</D:lockinfo>"#
    )
}

pub async fn lock(handler: &DavHandler, path: &str, scope: &str, headers: &[(&str, &str)]) -> Reply {
    send(handler, "LOCK", path, headers, &lockinfo(scope)).await
}

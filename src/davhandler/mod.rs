//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::Buf;
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use rusqlite::{Connection, TransactionBehavior};

use crate::body::{Body, StreamBody};
use crate::conditional::Conditions;
use crate::davheaders;
use crate::davpath::{href_for, DavPath};
use crate::errors::DavError;
use crate::store::{Locks, Props, ResolvedNode, Resources, Store, Tree};
use crate::util::{dav_method, unix_now, DavMethod, DavMethodSet};
use crate::DavResult;

pub(crate) mod handle_copymove;
pub(crate) mod handle_delete;
pub(crate) mod handle_gethead;
pub(crate) mod handle_lock;
pub(crate) mod handle_mkcol;
pub(crate) mod handle_options;
pub(crate) mod handle_props;
pub(crate) mod handle_put;
pub(crate) mod kind;

// request bodies other than PUT content are small xml documents.
const MAX_XML_BODY: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Backing store.
    store: Arc<Store>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Largest PUT body accepted, in bytes.
    max_body_size: usize,
    /// Lock timeout when the client does not ask for one, in seconds.
    lock_timeout: u32,
    /// Upper bound for lock timeouts, in seconds.
    max_lock_timeout: u32,
    /// How deep a `Depth: infinity` PROPFIND may go. `None` refuses it.
    propfind_infinity: Option<u32>,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(store: impl Into<Arc<Store>>) -> DavBuilder {
        Self {
            prefix: String::new(),
            store: store.into(),
            allow: DavMethodSet::all(),
            max_body_size: 16 * 1024 * 1024,
            lock_timeout: 3600,
            max_lock_timeout: 86400,
            propfind_infinity: None,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a path in the store.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Largest request body accepted for PUT (default 16 MiB).
    pub fn max_body_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_body_size = size;
        this
    }

    /// Lock timeout used when the client sends no `Timeout:` header.
    pub fn lock_timeout(self, secs: u32) -> Self {
        let mut this = self;
        this.lock_timeout = secs;
        this
    }

    /// Upper bound for the timeout a client may ask for.
    pub fn max_lock_timeout(self, secs: u32) -> Self {
        let mut this = self;
        this.max_lock_timeout = secs;
        this
    }

    /// Answer `Depth: infinity` PROPFIND requests, up to `max_depth`
    /// levels. By default they are refused with `409 Conflict`.
    pub fn propfind_infinity(self, max_depth: Option<u32>) -> Self {
        let mut this = self;
        this.propfind_infinity = max_depth;
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) store: Arc<Store>,
    pub(crate) allow: DavMethodSet,
    pub(crate) max_body_size: usize,
    pub(crate) lock_timeout: u32,
    pub(crate) max_lock_timeout: u32,
    pub(crate) propfind_infinity: Option<u32>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            store: cfg.store,
            allow: cfg.allow,
            max_body_size: cfg.max_body_size,
            lock_timeout: cfg.lock_timeout,
            max_lock_timeout: cfg.max_lock_timeout.max(cfg.lock_timeout),
            propfind_infinity: cfg.propfind_infinity,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(store: impl Into<Arc<Store>>) -> DavBuilder {
        DavBuilder::new(store)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, with an extra prefix appended to the
    /// configured one.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    #[doc(hidden)]
    pub async fn handle_stream_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(prefix);
        }
        this.handle_inner(req).await
    }
}

/// What a request path resolved to.
pub(crate) enum Target {
    /// the node itself.
    Found(ResolvedNode),
    /// the node does not exist, but its parent does.
    Missing(ResolvedNode),
}

impl Target {
    /// The existing node, or 404.
    pub(crate) fn found(self) -> DavResult<ResolvedNode> {
        match self {
            Target::Found(node) => Ok(node),
            Target::Missing(_) => Err(DavError::NotFound),
        }
    }
}

/// Everything a method handler gets to see of one request.
pub(crate) struct Ctx<'a> {
    pub(crate) conn: &'a Connection,
    pub(crate) now: i64,
    pub(crate) method: DavMethod,
    pub(crate) req: &'a Request<()>,
    pub(crate) path: &'a DavPath,
    pub(crate) body: &'a [u8],
    pub(crate) cond: Conditions,
}

impl<'a> Ctx<'a> {
    pub(crate) fn tree(&self) -> Tree<'a> {
        Tree::new(self.conn, self.now)
    }

    pub(crate) fn resources(&self) -> Resources<'a> {
        Resources::new(self.conn, self.now)
    }

    pub(crate) fn props(&self) -> Props<'a> {
        Props::new(self.conn)
    }

    pub(crate) fn locks(&self) -> Locks<'a> {
        Locks::new(self.conn, self.now)
    }

    /// See [`Conditions::validate_lock`].
    pub(crate) fn validate_lock(&self, node: &ResolvedNode, direct: bool) -> DavResult<()> {
        self.cond
            .validate_lock(&self.tree(), &self.resources(), node, direct)
    }
}

impl DavHandler {
    // client-facing href for a stored full path.
    pub(crate) fn href(&self, full_path: &str) -> String {
        href_for(&self.prefix, full_path)
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(DavError::PayloadTooLarge);
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let is_head = req.method() == http::Method::HEAD;

        // Turn any DavError results into a HTTP error response.
        let mut resp = match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let reason = if is_head { None } else { err.reason() };
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = err.statuscode();
                match reason {
                    Some(reason) => {
                        let reason = format!("{reason}\n");
                        resp.headers_mut()
                            .typed_insert(headers::ContentLength(reason.len() as u64));
                        resp.headers_mut()
                            .typed_insert(headers::ContentType::text_utf8());
                        *resp.body_mut() = Body::from(reason);
                    }
                    None => {
                        resp.headers_mut().typed_insert(headers::ContentLength(0));
                    }
                }
                if err.must_close() {
                    resp.headers_mut().insert(
                        http::header::CONNECTION,
                        http::HeaderValue::from_static("close"),
                    );
                }
                resp
            }
        };
        resp.headers_mut().insert(
            davheaders::DAV.clone(),
            http::HeaderValue::from_static("1,2"),
        );
        resp
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        let max_size = if method == DavMethod::PUT {
            self.max_body_size
        } else {
            MAX_XML_BODY
        };
        let body = self.read_request(body, max_size).await?;

        // Not all methods accept a body.
        if !DavMethod::WEBDAV_BODY.contains(method) && !body.is_empty() {
            return Err(DavError::UnsupportedMediaType);
        }

        debug!("== START REQUEST {:?} {}", method, path);

        // the store is synchronous. run the request on the blocking pool,
        // it keeps the connection checked out until it is done.
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.dispatch_retry(&req, method, &path, &body))
            .await
        {
            Ok(res) => res,
            Err(e) => {
                error!("request task failed: {e}");
                Err(StatusCode::INTERNAL_SERVER_ERROR.into())
            }
        }
    }

    // a concurrent writer is retried once.
    fn dispatch_retry(
        &self,
        req: &Request<()>,
        method: DavMethod,
        path: &DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        match self.dispatch(req, method, path, body) {
            Err(e) if e.is_busy() => {
                warn!("store busy on {:?} {}, retrying once", method, path);
                self.dispatch(req, method, path, body)
            }
            res => res,
        }
    }

    // run one request against the store, in one transaction if it writes.
    fn dispatch(
        &self,
        req: &Request<()>,
        method: DavMethod,
        path: &DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let cond = Conditions::from_headers(req.headers(), &self.prefix)?;
        let mut conn = self.store.connection();
        let now = unix_now();

        if DavMethod::MUTATING.contains(method) {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let resp = {
                let ctx = Ctx {
                    conn: &tx,
                    now,
                    method,
                    req,
                    path,
                    body,
                    cond,
                };
                self.route(&ctx)?
            };
            tx.commit()?;
            Ok(resp)
        } else {
            let ctx = Ctx {
                conn: &conn,
                now,
                method,
                req,
                path,
                body,
                cond,
            };
            self.route(&ctx)
        }
    }

    // resolve the request path and hand over to the node kind.
    fn route(&self, ctx: &Ctx) -> DavResult<Response<Body>> {
        let tree = ctx.tree();
        let target = match tree.resolve(&ctx.path.full_path())? {
            Some(node) => Target::Found(node),
            None => match tree.resolve(&ctx.path.parent().full_path())? {
                Some(parent) => Target::Missing(parent),
                None => return Err(DavError::Conflict("missing intermediate collection")),
            },
        };
        let kind = match target {
            Target::Found(ref node) | Target::Missing(ref node) => node.kind,
        };
        trace!("route {:?} {} to {:?}", ctx.method, ctx.path, kind);
        let handler = kind.handler(ctx.method).ok_or(DavError::MethodNotAllowed)?;
        handler(self, ctx, target)
    }
}

//! ## Async WebDAV handler on a relational namespace store
//!
//! [`Webdav`] (RFC4918) is defined as
//! HTTP (GET/HEAD/PUT/DELETE) plus a bunch of extension methods (PROPFIND, etc).
//! These extension methods are used to manage collections (like unix directories),
//! get information on collections (like unix `ls` or `readdir`), rename and
//! copy items, lock/unlock items, etc.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes it in some
//! way, and then generates a `http::Response`. This library is a `handler` that maps
//! the HTTP/Webdav protocol onto a [`Store`]: a single SQLite database holding the
//! namespace tree, the content of every resource, dead and live properties, and
//! write locks.
//!
//! The handler in this library works with the standard http types
//! from the `http` and `http_body` crates. That means that you can use it
//! straight away with http libraries / frameworks that also work with
//! those types, like hyper. A compatibility module for [warp][warp-compat]
//! is also provided.
//!
//! ## What is stored.
//!
//! - paths: one row per node. Nodes know their parent and their own name;
//!   full paths and inherited node kinds are derived on lookup.
//! - resources: the content attached to a node, with its media type and etag.
//! - properties: owned by exactly one node or one resource.
//! - locks: rooted at a node, optionally covering the subtree below it.
//!
//! Every request runs inside one storage transaction, so a failed request
//! leaves nothing behind, and a MOVE of a large subtree only touches its
//! root.
//!
//! ## Implemented standards.
//!
//! The [RFC4918] class 1 and 2 methods: OPTIONS, GET, HEAD, PUT, DELETE,
//! MKCOL, COPY, MOVE, PROPFIND, PROPPATCH, LOCK and UNLOCK, with the `If:`
//! header grammar for state tokens and entity tags.
//!
//! Not implemented: ranges, the HTTP conditional headers other than `If:`,
//! and RFC3744 ACLs.
//!
//! ## Example.
//!
//! Example server using [hyper] that keeps its namespace in `dav.sqlite`.
//!
//! ```no_run
//! use std::convert::Infallible;
//! use dav_store::{DavHandler, Store};
//!
//! #[tokio::main]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!     let store = Store::open("dav.sqlite").expect("cannot open database");
//!
//!     let dav_server = DavHandler::builder(store).build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move {
//!                     Ok::<_, Infallible>(dav_server.handle(req).await)
//!                 }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     println!("Serving on {}", addr);
//!     let _ = hyper::Server::bind(&addr)
//!         .serve(make_service)
//!         .await
//!         .map_err(|e| eprintln!("server error: {}", e));
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [RFC4918]: https://tools.ietf.org/html/rfc4918
//! [hyper]: https://hyper.rs/
//! [warp-compat]: https://docs.rs/dav-store/latest/dav_store/warp/index.html

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod conditional;
mod davhandler;
mod davheaders;
mod davpath;
mod errors;
mod store;
mod util;
mod xmltree_ext;

pub mod body;

#[cfg(any(docsrs, feature = "warp-compat"))]
#[cfg_attr(docsrs, doc(cfg(feature = "warp-compat")))]
pub mod warp;

pub(crate) use crate::errors::DavResult;

pub use crate::davhandler::{DavBuilder, DavHandler};
pub use crate::store::{NodeKind, Store};
pub use crate::util::{DavMethod, DavMethodSet};

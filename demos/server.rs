//
//  Sample application.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Connect to http://localhost:4918/
//

use std::error::Error;
use std::net::SocketAddr;
use std::str::FromStr;

use clap::Parser;
use futures_util::future::TryFutureExt;

use dav_store::{DavHandler, Store};

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// SQLite database holding the namespace. In memory when absent.
    #[arg(short, long)]
    database: Option<String>,
    /// url prefix to serve below
    #[arg(long, default_value = "")]
    prefix: String,
    /// answer Depth: infinity PROPFIND requests up to this many levels
    #[arg(long)]
    propfind_depth: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let Cli {
        port,
        database,
        prefix,
        propfind_depth,
    } = Cli::parse();

    let (store, name) = match database.as_deref() {
        Some(path) => (Store::open(path)?, path.to_string()),
        None => (Store::memory()?, "in-memory database".to_string()),
    };
    let dav_server = DavHandler::builder(store)
        .strip_prefix(prefix)
        .propfind_infinity(propfind_depth)
        .build();

    let make_service = hyper::service::make_service_fn(|_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { Ok::<_, hyper::Error>(dav_server.handle(req).await) }
            };
            Ok::<_, hyper::Error>(hyper::service::service_fn(func))
        }
    });

    let addr = format!("0.0.0.0:{}", port);
    let addr = SocketAddr::from_str(&addr)?;

    let server = hyper::Server::try_bind(&addr)?
        .serve(make_service)
        .map_err(|e| eprintln!("server error: {}", e));

    println!("Serving {} on {}", name, port);
    let _ = server.await;
    Ok(())
}

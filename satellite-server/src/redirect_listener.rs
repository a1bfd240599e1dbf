//! Plaintext upgrade listener (spec §6: `redirect_http`). A bare HTTP
//! request on the insecure port is answered with a 307 to the same
//! host/path/query over HTTPS; it never reaches the dispatcher.

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use log::{info, warn};
use tokio::net::TcpListener;

pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr} (http -> https redirect)");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(upgrade);
            if let Err(e) = ConnBuilder::new(TokioExecutor::new()).serve_connection(io, service).await {
                warn!("redirect connection from {peer} ended with error: {e}");
            }
        });
    }
}

async fn upgrade(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let location = format!("https://{host}{path_and_query}");

    Ok(Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(hyper::header::LOCATION, location)
        .body(Full::new(Bytes::new()))
        .expect("static redirect response is always valid"))
}

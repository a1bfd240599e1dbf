//! The TLS-terminating accept loop (C7/C8). Every connection is peeked for
//! its JA3 fingerprint before the handshake, then handed to `hyper` for
//! HTTP/1.1 framing. Each connection runs on its own task so a slow or
//! stalled client never blocks others (spec §5).

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use log::{error, info, warn};
use satellite_core::RequestContext;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::dispatcher::Dispatcher;
use crate::tls;

/// Binds `addr` and serves TLS-wrapped HTTP/1.1 until the process exits.
pub async fn serve(
    addr: SocketAddr,
    tls_config: Arc<rustls::ServerConfig>,
    dispatcher: Arc<Dispatcher>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let acceptor = TlsAcceptor::from(tls_config);
    info!("listening on {addr} (tls)");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, acceptor, dispatcher).await {
                warn!("connection from {peer} ended with error: {e}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    dispatcher: Arc<Dispatcher>,
) -> std::io::Result<()> {
    let ja3 = tls::peek_ja3(&stream).await.unwrap_or(None);
    let tls_stream = tls::accept_tls(&acceptor, stream).await?;
    let io = TokioIo::new(tls_stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let dispatcher = dispatcher.clone();
        let ja3 = ja3.clone();
        let peer = peer;
        async move { handle_request(req, peer, ja3, dispatcher).await }
    });

    ConnBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

async fn handle_request(
    req: Request<Incoming>,
    peer: SocketAddr,
    ja3: Option<satellite_core::Ja3Hash>,
    dispatcher: Arc<Dispatcher>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let ctx = match build_request_context(req, peer, ja3).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("failed to read request body: {e}");
            return Ok(Response::builder()
                .status(hyper::StatusCode::BAD_REQUEST)
                .body(Full::new(Bytes::new()))
                .expect("static response is always valid"));
        }
    };
    Ok(dispatcher.dispatch(ctx).await)
}

async fn build_request_context(
    req: Request<Incoming>,
    peer: SocketAddr,
    ja3: Option<satellite_core::Ja3Hash>,
) -> Result<RequestContext, hyper::Error> {
    let method = req.method().to_string();
    let uri = req.uri().path().to_string();
    let user_agent = req
        .headers()
        .get(hyper::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();

    let request_line = format!("{method} {uri} HTTP/1.1\r\n");
    let mut dump = request_line.into_bytes();
    for (name, value) in req.headers() {
        dump.extend_from_slice(name.as_str().as_bytes());
        dump.extend_from_slice(b": ");
        dump.extend_from_slice(value.as_bytes());
        dump.extend_from_slice(b"\r\n");
    }
    dump.extend_from_slice(b"\r\n");

    let body = req.collect().await?.to_bytes();
    dump.extend_from_slice(&body);

    Ok(RequestContext {
        method,
        uri,
        user_agent,
        headers,
        remote_addr: peer.to_string(),
        client_ip: satellite_core::ip::client_ip(&peer.to_string()),
        ja3,
        dump,
        body: body.to_vec(),
    })
}

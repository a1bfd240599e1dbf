//! The per-request state machine (spec §4.7): rewrite the index route,
//! attach the server header, match against the live route table, evaluate
//! conditions, and serve, redirect, render, or 404.

use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use log::{debug, warn};
use satellite_core::config::Config;
use satellite_core::geo::GeoOracle;
use satellite_core::route::{Artifact, Disposition, OnFailure};
use satellite_core::{ClientLedger, HitCounter, RequestContext, RouteTable};

use crate::serve;

pub struct Dispatcher {
    pub table: Arc<RouteTable>,
    pub ledger: Arc<ClientLedger>,
    pub counter: Arc<HitCounter>,
    pub geo: Arc<dyn GeoOracle>,
    pub config: Config,
}

impl Dispatcher {
    /// Handles one request end to end. Never panics on attacker-controlled
    /// input; every failure mode resolves to a concrete HTTP response.
    pub async fn dispatch(&self, mut req: RequestContext) -> Response<Full<Bytes>> {
        if req.uri == "/" {
            if let Some(index) = &self.config.index {
                req.uri = index.clone();
            }
        }

        let snapshot = self.table.current();
        let matched = snapshot.match_uri(&req.uri, self.table.root());

        let route = match matched {
            Some(route) => route,
            None => return self.not_found_response(),
        };

        let authorized = route.conditions.evaluate(&req, &self.ledger, &self.counter, &self.geo);
        if !authorized {
            return self.on_failure_response(&route.on_failure);
        }

        // Commit side effects only now that the verdict is true (I2: the
        // evaluator itself never mutates ledger/counter state).
        self.ledger.hit(req.client_ip, &req.uri);
        if let Err(e) = self.counter.increment(&req.uri) {
            warn!("failed to increment hit counter for {:?}: {e}", req.uri);
        }

        let response = match &route.artifact {
            Some(Artifact::File(path)) => {
                self.serve_file(path, route.content_type.as_deref(), route.disposition.as_ref())
            }
            Some(Artifact::Proxy(url)) => self.serve_proxy(url, &req).await,
            Some(Artifact::CredentialSink(path)) => self.serve_credential_sink(path, &req),
            None => self.not_found_response(),
        };
        self.with_server_header(response)
    }

    /// Attaches `Server: {value}` to every response this dispatcher returns
    /// (spec §4.7 step 2), not just the file-serve branch.
    fn with_server_header(&self, mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
        if let Some(header) = &self.config.server_header {
            if let Ok(value) = hyper::header::HeaderValue::from_str(header) {
                response.headers_mut().insert(hyper::header::SERVER, value);
            }
        }
        response
    }

    fn serve_file(
        &self,
        path: &str,
        content_type: Option<&str>,
        disposition: Option<&Disposition>,
    ) -> Response<Full<Bytes>> {
        match serve::read_file(self.table.root(), path) {
            Ok(bytes) => {
                let mut builder = Response::builder().status(StatusCode::OK);
                if let Some(ct) = content_type {
                    builder = builder.header(hyper::header::CONTENT_TYPE, ct);
                }
                if let Some(d) = disposition {
                    builder = builder.header(hyper::header::CONTENT_DISPOSITION, d.header_value());
                }
                builder.body(Full::new(Bytes::from(bytes))).unwrap_or_else(|_| self.internal_error())
            }
            Err(e) => {
                warn!("failed to serve file {path:?}: {e}");
                self.not_found_response()
            }
        }
    }

    async fn serve_proxy(&self, url: &str, req: &RequestContext) -> Response<Full<Bytes>> {
        match serve::proxy_forward(url, &req.method, &req.headers, req.body.clone()).await {
            Ok(upstream) => {
                let mut builder = Response::builder().status(upstream.status);
                for (name, value) in upstream.headers.iter() {
                    builder = builder.header(name, value);
                }
                builder
                    .body(Full::new(Bytes::from(upstream.body)))
                    .unwrap_or_else(|_| self.internal_error())
            }
            Err(e) => {
                warn!("proxy forward to {url:?} failed: {e}");
                self.internal_error()
            }
        }
    }

    fn serve_credential_sink(&self, path: &str, req: &RequestContext) -> Response<Full<Bytes>> {
        let sink_path = self.table.root().join(path.trim_start_matches('/'));
        if let Err(e) = serve::append_credential_sink(&sink_path, &req.dump) {
            warn!("failed to write credential sink {path:?}: {e}");
            return self.internal_error();
        }
        debug!("captured credentials for {:?} into {:?}", req.uri, sink_path);
        Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| self.internal_error())
    }

    fn on_failure_response(&self, on_failure: &OnFailure) -> Response<Full<Bytes>> {
        let response = match on_failure {
            OnFailure::Redirect(target) => Response::builder()
                .status(StatusCode::MOVED_PERMANENTLY)
                .header(hyper::header::LOCATION, target.as_str())
                .body(Full::new(Bytes::new()))
                .unwrap_or_else(|_| self.internal_error()),
            OnFailure::Render(pattern) => self.render_decoy(pattern),
            OnFailure::None => self.not_found_response(),
        };
        self.with_server_header(response)
    }

    /// Serves another route's backing artifact directly, bypassing its own
    /// conditions (spec §4.7: decoys are unconditionally reachable once
    /// selected as a render target).
    fn render_decoy(&self, pattern: &str) -> Response<Full<Bytes>> {
        let snapshot = self.table.current();
        match snapshot.by_pattern(pattern) {
            Some(route) => match &route.artifact {
                Some(Artifact::File(path)) => {
                    self.serve_file(path, route.content_type.as_deref(), route.disposition.as_ref())
                }
                _ => self.not_found_response(),
            },
            None => self.not_found_response(),
        }
    }

    fn not_found_response(&self) -> Response<Full<Bytes>> {
        let response = if let Some(redirect) = &self.config.not_found.redirect {
            Response::builder()
                .status(StatusCode::MOVED_PERMANENTLY)
                .header(hyper::header::LOCATION, redirect.as_str())
                .body(Full::new(Bytes::new()))
                .unwrap_or_else(|_| self.internal_error())
        } else if let Some(pattern) = &self.config.not_found.render {
            return self.with_server_header(self.render_decoy(pattern));
        } else {
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from_static(b"404\n")))
                .unwrap_or_else(|_| self.internal_error())
        };
        self.with_server_header(response)
    }

    fn internal_error(&self) -> Response<Full<Bytes>> {
        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::new()))
            .expect("static response is always valid")
    }
}

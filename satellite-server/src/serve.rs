//! Reads or forwards a [`Route`]'s backing artifact once the dispatcher has
//! decided the request is authorized to see it.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Uri;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use satellite_core::error::ServeError;
use satellite_core::route::Artifact;

pub enum Served {
    Body(Vec<u8>),
    NoContent,
}

/// Reads a hosted file relative to `root`.
pub fn read_file(root: &Path, relative: &str) -> Result<Vec<u8>, ServeError> {
    let path = root.join(relative.trim_start_matches('/'));
    std::fs::read(&path).map_err(|source| ServeError::FileRead { path, source })
}

/// Appends raw request bytes to a credential-capture sink, creating it with
/// `0644` permissions if it doesn't already exist -- mirrors the teacher's
/// `tls_tools` pattern of explicit mode-setting on written artifacts.
pub fn append_credential_sink(path: &Path, dump: &[u8]) -> Result<(), ServeError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o644)
        .open(path)
        .map_err(|source| ServeError::SinkOpen {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(dump)
        .and_then(|_| file.write_all(b"\n"))
        .map_err(|source| ServeError::SinkOpen {
            path: path.to_path_buf(),
            source,
        })
}

/// A forwarded response: upstream status, headers, and body, passed through
/// to the client unchanged (spec §4.5: proxy artifacts forward "through
/// unchanged", mirroring `httputil.ReverseProxy` in the originating tool).
pub struct ProxiedResponse {
    pub status: hyper::StatusCode,
    pub headers: hyper::HeaderMap,
    pub body: Vec<u8>,
}

/// Forwards the request (method, headers, body) to an upstream URL and
/// returns its response unchanged. TLS verification toward the upstream is
/// intentionally disabled -- payload hosts routinely proxy to infrastructure
/// with self-signed or mismatched certificates, and spec'd behavior (§4.5)
/// is to forward regardless.
pub async fn proxy_forward(
    url: &str,
    method: &str,
    headers: &std::collections::HashMap<String, String>,
    body: Vec<u8>,
) -> Result<ProxiedResponse, ServeError> {
    let uri: Uri = url.parse().map_err(|source| ServeError::InvalidProxyUrl {
        url: url.to_string(),
        source,
    })?;

    let client: Client<_, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build(insecure_https_connector());

    let method = hyper::Method::from_bytes(method.as_bytes()).unwrap_or(hyper::Method::GET);
    let mut builder = hyper::Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let request = builder
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| ServeError::ProxyRequest(e.to_string()))?;

    let response = client
        .request(request)
        .await
        .map_err(|e| ServeError::ProxyRequest(e.to_string()))?;

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .map_err(|e| ServeError::ProxyRequest(e.to_string()))?
        .to_bytes();
    Ok(ProxiedResponse {
        status,
        headers,
        body: bytes.to_vec(),
    })
}

/// A `ServerCertVerifier` that accepts any certificate chain. Proxy upstreams
/// used as payload forwarders routinely sit behind self-signed or expired
/// certs; the dispatcher's job is to forward, not to audit the upstream.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}

fn insecure_https_connector() -> hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector> {
    let mut tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(std::sync::Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http()
        .enable_http1()
        .build()
}

pub fn artifact_path<'a>(artifact: &'a Artifact) -> Option<&'a str> {
    match artifact {
        Artifact::File(p) => Some(p),
        Artifact::Proxy(p) => Some(p),
        Artifact::CredentialSink(p) => Some(p),
    }
}

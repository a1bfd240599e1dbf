//! TLS front end and request dispatcher (C7/C8) for the satellite payload
//! host. Built on `hyper` + `tokio-rustls` rather than the teacher's
//! `pingora`-based gateway because JA3 fingerprinting needs the raw
//! pre-handshake `ClientHello` bytes, which `pingora`'s session abstraction
//! does not expose.

pub mod dispatcher;
pub mod http_server;
pub mod redirect_listener;
pub mod serve;
pub mod tls;

pub use dispatcher::Dispatcher;

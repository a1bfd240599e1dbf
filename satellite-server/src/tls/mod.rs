//! TLS front end: accepts a raw `TcpStream`, peeks the `ClientHello` to
//! extract a JA3 fingerprint, then replays the peeked bytes ahead of the
//! live socket so the real `rustls` handshake sees an uninterrupted stream.

pub mod clienthello;

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use clienthello::{parse_client_hello, Ja3Components};
use satellite_core::Ja3Hash;

/// A maximum we'll buffer while hunting for a complete `ClientHello`
/// record; real `ClientHello`s from browsers run a few hundred bytes to a
/// few KB with large extension lists.
const MAX_PEEK: usize = 16 * 1024;

/// Peeks the socket for a complete TLS record containing the
/// `ClientHello`, without consuming it from the kernel's receive buffer,
/// parses it for JA3 purposes, and returns the fingerprint alongside the
/// raw bytes actually read (for bookkeeping; the data is left in the
/// socket's buffer via `peek`, so no replay wrapper is needed on read).
pub async fn peek_ja3(stream: &TcpStream) -> io::Result<Option<Ja3Hash>> {
    let mut buf = vec![0u8; MAX_PEEK];
    let mut filled = 0usize;

    loop {
        let n = stream.peek(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(None);
        }
        filled = n;

        match parse_client_hello(&buf[..filled]) {
            Ok(components) => return Ok(Some(hash_of(&components))),
            Err(clienthello::ClientHelloError::Truncated) if filled < MAX_PEEK => {
                // Record isn't fully buffered by the kernel yet; try again.
                tokio::task::yield_now().await;
                continue;
            }
            Err(_) => return Ok(None),
        }
    }
}

fn hash_of(components: &Ja3Components) -> Ja3Hash {
    Ja3Hash::from_canonical(&components.canonical())
}

/// Builds a `rustls::ServerConfig` from a PEM certificate chain and PEM
/// private key on disk, mirroring the teacher's inline `rustls` setup in
/// its gateway front end.
pub fn load_server_config(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> anyhow::Result<Arc<ServerConfig>> {
    let cert_file = std::fs::File::open(cert_path)?;
    let mut cert_reader = io::BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;

    let key_file = std::fs::File::open(key_path)?;
    let mut key_reader = io::BufReader::new(key_file);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

pub async fn accept_tls(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
) -> io::Result<TlsStream<TcpStream>> {
    acceptor.accept(stream).await
}

/// Wraps an already partially-consumed byte prefix plus the live
/// connection it came from. Not currently needed by `peek_ja3` (which
/// uses a non-consuming `peek`), but kept for front ends that must read
/// destructively (e.g. when operating over a stream type without a peek
/// primitive) -- reads drain the prefix first, then fall through to the
/// inner stream.
pub struct ReplayStream<S> {
    prefix: io::Cursor<Vec<u8>>,
    inner: S,
}

impl<S> ReplayStream<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        ReplayStream {
            prefix: io::Cursor::new(prefix),
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReplayStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let remaining = self.prefix.get_ref().len() as u64 - self.prefix.position();
        if remaining > 0 {
            let before = buf.filled().len();
            let pos = self.prefix.position() as usize;
            let data = &self.prefix.get_ref()[pos..];
            let n = std::cmp::min(data.len(), buf.remaining());
            buf.put_slice(&data[..n]);
            self.prefix.set_position((pos + n) as u64);
            debug_assert!(buf.filled().len() == before + n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReplayStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

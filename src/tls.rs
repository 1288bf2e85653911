//! TLS via rustls.
//!
//! The client config is built once per [`Session`][crate::Session] on first
//! https connection and shared by all of its pools.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;

use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned, ALL_VERSIONS};
use rustls_pki_types::ServerName;

use crate::stream::Stream;
use crate::Error;

pub(crate) fn build_config() -> Arc<ClientConfig> {
    // Not requiring the user to install a process level CryptoProvider
    // improves the chances of this crate working out-of-the-box.
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(ALL_VERSIONS)
        .expect("all TLS versions")
        .with_root_certificates(root_store)
        .with_no_client_auth();

    debug!("Built TLS client config");

    Arc::new(config)
}

/// Wrap an open TCP socket in TLS, driving the handshake to completion so
/// verification failures surface on connect rather than on first use.
pub(crate) fn wrap(
    mut sock: TcpStream,
    host: &str,
    config: &Arc<ClientConfig>,
) -> Result<Stream, Error> {
    let name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::BadUrl(format!("{} is not a valid tls name", host)))?;

    let mut conn = ClientConnection::new(config.clone(), name)?;

    while conn.is_handshaking() {
        conn.complete_io(&mut sock).map_err(split_io_tls)?;
    }

    trace!("TLS handshake complete for {}", host);

    Ok(Stream::Https(Box::new(StreamOwned::new(conn, sock))))
}

/// rustls reports protocol errors during complete_io as io errors wrapping
/// the real `rustls::Error`. Unwrap those so verification failures come out
/// as [`Error::Tls`].
fn split_io_tls(e: io::Error) -> Error {
    if e.get_ref().map(|i| i.is::<rustls::Error>()).unwrap_or(false) {
        let inner = e.into_inner().expect("io error with inner");
        let tls = inner.downcast::<rustls::Error>().expect("rustls error");
        Error::Tls(*tls)
    } else {
        Error::Io(e)
    }
}

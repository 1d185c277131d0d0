//! TLS termination for the webhook listener. Certificate and key are read
//! once at startup from the paths mounted into the pod; rotation means a
//! restart.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnectionBuilder;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("could not read TLS certificate `{path}`: {source}")]
    ReadCertificate { path: PathBuf, source: std::io::Error },
    #[error("could not read TLS private key `{path}`: {source}")]
    ReadPrivateKey { path: PathBuf, source: std::io::Error },
    #[error("no certificates found in `{0}`")]
    NoCertificates(PathBuf),
    #[error("no private key found in `{0}`")]
    NoPrivateKey(PathBuf),
    #[error("TLS configuration rejected: {0}")]
    Config(#[from] rustls::Error),
}

pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let cert_file = File::open(cert_path)
        .map_err(|source| TlsError::ReadCertificate { path: cert_path.to_path_buf(), source })?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|source| TlsError::ReadCertificate { path: cert_path.to_path_buf(), source })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key_file = File::open(key_path)
        .map_err(|source| TlsError::ReadPrivateKey { path: key_path.to_path_buf(), source })?;
    let private_key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|source| TlsError::ReadPrivateKey { path: key_path.to_path_buf(), source })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let config =
        rustls::ServerConfig::builder().with_no_client_auth().with_single_cert(certs, private_key)?;

    Ok(Arc::new(config))
}

/// Accept loop: one spawned task per connection, nothing shared between them
/// beyond the immutable router and acceptor.
pub async fn serve(
    listener: TcpListener,
    tls_config: Arc<rustls::ServerConfig>,
    app: Router,
) -> std::io::Result<()> {
    let acceptor = TlsAcceptor::from(tls_config);

    loop {
        let (stream, peer_address) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(handshake_error) => {
                    warn!(
                        peer_address = %peer_address,
                        error = %handshake_error,
                        "TLS handshake failed"
                    );
                    return;
                }
            };

            if let Err(connection_error) = ConnectionBuilder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(
                    peer_address = %peer_address,
                    error = %connection_error,
                    "connection closed with error"
                );
            }
        });
    }
}

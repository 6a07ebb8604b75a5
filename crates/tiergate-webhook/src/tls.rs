//! TLS listener for the admission gateway.
//!
//! The API server only calls webhooks over HTTPS. Each accepted
//! connection is handshaken with rustls and served by hyper on its own
//! task; the accept loop stops on the shutdown signal.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::error::ServeError;

/// Build a rustls server config from PEM certificate and key files.
pub fn load_server_config(cert_file: &Path, key_file: &Path) -> Result<Arc<ServerConfig>, ServeError> {
    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;

    let mut config = ServerConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

fn open(path: &Path) -> Result<BufReader<File>, ServeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ServeError::ReadPem {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServeError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ServeError::ReadPem {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ServeError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServeError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ServeError::ReadPem {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ServeError::NoPrivateKey(path.to_path_buf()))
}

/// Serve `router` over TLS on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServeError> {
    let acceptor = TlsAcceptor::from(config);
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "admission gateway listening (TLS)");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let router = router.clone();
                tokio::spawn(async move {
                    serve_connection(acceptor, stream, peer_addr, router).await;
                });
            }
            _ = shutdown.changed() => {
                info!("admission gateway shutting down");
                break;
            }
        }
    }
    Ok(())
}

async fn serve_connection(
    acceptor: TlsAcceptor,
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    router: Router,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(e) => {
            debug!(%peer_addr, error = %e, "TLS handshake failed");
            return;
        }
    };

    let io = TokioIo::new(tls_stream);
    let service = TowerToHyperService::new(router);
    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
        debug!(%peer_addr, error = %e, "connection error");
    }
}

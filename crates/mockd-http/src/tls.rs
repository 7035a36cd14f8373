//! HTTPS serving: rustls with certificates loaded from disk, optional mTLS
//!
//! Certificate generation is out of scope; the listener refuses to start
//! without a cert/key pair on disk. When a client CA is configured, client
//! certificates are required and their subject fields (CN, SAN DNS/IP/URI)
//! are surfaced into the request snapshot for matchers and templates.

use axum::Router;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use mockd_core::config::TlsConfig;
use mockd_core::{ClientCertInfo, Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Build the rustls server config from PEM files on disk
pub fn load_server_config(tls: &TlsConfig) -> Result<Arc<rustls::ServerConfig>> {
    let certs = read_certs(&tls.cert_path)?;
    let key = read_key(&tls.key_path)?;

    let builder = rustls::ServerConfig::builder();
    let config = match &tls.client_ca_path {
        Some(ca_path) => {
            let mut roots = RootCertStore::empty();
            for cert in read_certs(ca_path)? {
                roots
                    .add(cert)
                    .map_err(|e| Error::config(format!("invalid client CA cert: {e}")))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| Error::config(format!("client verifier: {e}")))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    }
    .with_single_cert(certs, key)
    .map_err(|e| Error::config(format!("invalid TLS material: {e}")))?;
    Ok(Arc::new(config))
}

fn read_certs(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::config(format!("cannot read cert {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::config(format!("bad PEM in {}: {e}", path.display())))
}

fn read_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::config(format!("cannot read key {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::config(format!("bad key PEM in {}: {e}", path.display())))?
        .ok_or_else(|| Error::config(format!("no private key in {}", path.display())))
}

/// Subject fields from the leaf client certificate
pub fn cert_info_from_der(der: &[u8]) -> Option<ClientCertInfo> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let mut info = ClientCertInfo {
        common_name: cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string),
        ..Default::default()
    };
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(dns) => info.san_dns.push((*dns).to_string()),
                GeneralName::URI(uri) => info.san_uri.push((*uri).to_string()),
                GeneralName::IPAddress(bytes) => {
                    let formatted = match bytes.len() {
                        4 => Some(
                            std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
                                .to_string(),
                        ),
                        16 => <[u8; 16]>::try_from(*bytes)
                            .ok()
                            .map(|b| std::net::Ipv6Addr::from(b).to_string()),
                        _ => None,
                    };
                    if let Some(ip) = formatted {
                        info.san_ip.push(ip);
                    }
                }
                _ => {}
            }
        }
    }
    Some(info)
}

/// Accept loop for the HTTPS listener. Bind errors surface to the caller.
pub async fn serve_https(
    port: u16,
    router: Router,
    tls: Arc<rustls::ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::listener(format!("https bind {addr}: {e}")))?;
    let acceptor = TlsAcceptor::from(tls);
    info!(%addr, "https listener up");

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, peer)) = accepted else {
                        continue;
                    };
                    let acceptor = acceptor.clone();
                    let router = router.clone();
                    tokio::spawn(async move {
                        let tls_stream = match acceptor.accept(stream).await {
                            Ok(tls_stream) => tls_stream,
                            Err(e) => {
                                debug!(%peer, error = %e, "tls handshake failed");
                                return;
                            }
                        };
                        let cert_info = tls_stream
                            .get_ref()
                            .1
                            .peer_certificates()
                            .and_then(|certs| certs.first())
                            .and_then(|leaf| cert_info_from_der(leaf.as_ref()));

                        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let router = router.clone();
                            let cert_info = cert_info.clone();
                            async move {
                                let mut req = req.map(axum::body::Body::new);
                                if let Some(cert_info) = cert_info {
                                    req.extensions_mut().insert(cert_info);
                                }
                                router.oneshot(req).await
                            }
                        });
                        let builder = auto::Builder::new(TokioExecutor::new());
                        if let Err(e) = builder
                            .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                            .await
                        {
                            debug!(error = %e, "https connection ended");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!(port, "https listener stopping");
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_files_fail_config() {
        let tls = TlsConfig {
            cert_path: "/nonexistent/cert.pem".into(),
            key_path: "/nonexistent/key.pem".into(),
            client_ca_path: None,
        };
        let err = load_server_config(&tls).expect_err("missing files");
        assert_eq!(err.kind(), "internal_error");
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a pem").expect("write");
        std::fs::write(&key, "not a pem").expect("write");
        let tls = TlsConfig {
            cert_path: cert,
            key_path: key,
            client_ca_path: None,
        };
        assert!(load_server_config(&tls).is_err());
    }
}

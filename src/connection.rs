//! Internal module for opening TLS transports to mail endpoints.
//!
//! The TCP leg is either direct or tunnelled through SOCKS5; TLS always runs end to end.

use crate::error::{Error, Result};
use crate::known_servers::Endpoint;
use crate::proxy::Socks5Proxy;
use rustls::ClientConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};
use webpki_roots::TLS_SERVER_ROOTS;

/// Transport under every IMAP session.
pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Opens a TLS connection to `endpoint` within `timeout`, optionally through SOCKS5.
#[instrument(
    name = "connection::open_tls",
    skip_all,
    fields(endpoint = %endpoint, proxy_enabled = proxy.is_some())
)]
pub(crate) async fn open_tls(
    connector: &TlsConnector,
    endpoint: &Endpoint,
    proxy: Option<&Socks5Proxy>,
    timeout: Duration,
) -> Result<TlsStream> {
    let target = endpoint.address();

    tokio::time::timeout(timeout, handshake(connector, endpoint, &target, proxy))
        .await
        .map_err(|_| Error::ConnectTimeout { target, timeout })?
}

async fn handshake(
    connector: &TlsConnector,
    endpoint: &Endpoint,
    target: &str,
    proxy: Option<&Socks5Proxy>,
) -> Result<TlsStream> {
    let server_name = parse_server_name(&endpoint.host)?;
    let tcp_stream = match proxy {
        Some(proxy) => connect_via_socks5(target, proxy).await?,
        None => connect_direct(target).await?,
    };

    debug!("Performing TLS handshake");

    connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target.to_string(),
            source,
        })
}

/// Creates a TLS connector trusting the bundled web PKI roots.
///
/// Built once per connector and shared by every login and reconnection.
pub(crate) fn tls_connector() -> TlsConnector {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}

/// SNI name for the endpoint host.
fn parse_server_name(host: &str) -> Result<rustls::ServerName> {
    rustls::ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

async fn connect_direct(target: &str) -> Result<TcpStream> {
    debug!(target = %target, "Establishing direct TCP connection");

    TcpStream::connect(target)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target.to_string(),
            source,
        })
}

#[instrument(
    name = "connection::connect_via_socks5",
    skip_all,
    fields(proxy_host = %proxy.host, target = %target, has_auth = proxy.auth.is_some())
)]
async fn connect_via_socks5(target: &str, proxy: &Socks5Proxy) -> Result<TcpStream> {
    debug!(proxy = %proxy, "Connecting via SOCKS5 proxy");

    let proxy_addr = (proxy.host.as_str(), proxy.port);

    let stream = match &proxy.auth {
        Some(auth) => {
            Socks5Stream::connect_with_password(proxy_addr, target, &auth.username, auth.password())
                .await
        }
        None => Socks5Stream::connect(proxy_addr, target).await,
    };

    stream
        .map(Socks5Stream::into_inner)
        .map_err(|source| Error::Socks5Connect {
            proxy_host: proxy.host.clone(),
            target: target.to_string(),
            source,
        })
}

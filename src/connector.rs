//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! TLS assembly & dial: given cached `InstanceData`, select an IP, open a
//! TCP socket, and upgrade it to TLS pinned to the instance's server CA.

use crate::error::{ConnectError, ConnectErrorKind};
use crate::instance_data::InstanceData;
use crate::ip_type::IpType;
use rustls_pki_types::ServerName;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Default TCP connect timeout, per the documented `connect()` contract.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A connected, TLS-upgraded byte stream handed back to the caller (a
/// driver). Implements `AsyncRead`/`AsyncWrite` via the wrapped
/// `TlsStream`.
pub struct ConnectedSocket {
    pub stream: TlsStream<TcpStream>,
    pub server_ip: String,
}

/// Caller-supplied dial parameters threaded down from `connect()`.
#[derive(Debug, Clone)]
pub struct DialOptions {
    pub connect_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        DialOptions {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Selects the first IP matching `ip_preferences`, opens a TCP connection,
/// and performs the TLS handshake using `data.tls_config`.
pub async fn dial(
    data: &InstanceData,
    ip_preferences: &[IpType],
    opts: &DialOptions,
) -> Result<ConnectedSocket, ConnectError> {
    let ip = select_ip(data, ip_preferences)?;
    debug!("dialing {ip}:3307");

    let tcp = tokio::time::timeout(opts.connect_timeout, TcpStream::connect((ip.as_str(), 3307)))
        .await
        .map_err(|_| ConnectError::new(ConnectErrorKind::DialFailed, format!("connect to {ip} timed out")))?
        .map_err(ConnectError::from)?;

    let connector = TlsConnector::from(data.tls_config.clone());
    // SNI carries the instance identity, not the dialed IP: the cert's
    // SAN names the instance, never the address, and the actual identity
    // check is the custom verifier baked into tls_config, not webpki's
    // hostname match. Colons (illegal in a DNS hostname) are substituted
    // so the SNI extension is syntactically valid; the substituted form
    // isn't used for anything but that.
    let sni = sni_safe(&data.instance_identity);
    let server_name = ServerName::try_from(sni.clone())
        .map_err(|e| ConnectError::new(ConnectErrorKind::HandshakeFailed, format!("invalid server name \"{sni}\": {e}")))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(classify_tls_error)?;

    Ok(ConnectedSocket { stream, server_ip: ip })
}

fn sni_safe(instance_identity: &str) -> String {
    instance_identity.replace(':', ".")
}

/// Distinguishes a subject/SAN mismatch (`ServerIdentityMismatch`, never
/// retried) from any other handshake failure (`HandshakeFailed`, retried
/// once via `Registry::connect`'s forceRefresh-and-retry policy).
fn classify_tls_error(e: std::io::Error) -> ConnectError {
    if let Some(inner) = e.get_ref() {
        let inner: &(dyn std::error::Error + 'static) = inner;
        if let Some(rustls::Error::General(msg)) = inner.downcast_ref::<rustls::Error>() {
            if let Some(detail) = msg.strip_prefix(crate::tls::IDENTITY_MISMATCH_PREFIX) {
                return ConnectError::new(ConnectErrorKind::ServerIdentityMismatch, detail.to_string());
            }
        }
    }
    ConnectError::new(ConnectErrorKind::HandshakeFailed, format!("TLS handshake failed: {e}"))
}

fn select_ip(data: &InstanceData, ip_preferences: &[IpType]) -> Result<String, ConnectError> {
    for pref in ip_preferences {
        if let Some(ip) = data.metadata.ip_addrs.get(pref) {
            return Ok(ip.clone());
        }
    }
    Err(ConnectError::new(
        ConnectErrorKind::DialFailed,
        format!(
            "no matching IP type: instance exposes {:?}, caller prefers {:?}",
            data.metadata.ip_addrs.keys().collect::<Vec<_>>(),
            ip_preferences
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance_data::{ClientCertificate, InstanceMetadata};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn data_with(ips: HashMap<IpType, String>) -> InstanceData {
        InstanceData {
            metadata: InstanceMetadata {
                ip_addrs: ips,
                server_ca_cert_pem: String::new(),
                database_version: "POSTGRES_14".into(),
            },
            client_cert: ClientCertificate {
                cert_pem: String::new(),
                not_after: SystemTime::now(),
            },
            tls_config: Arc::new(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoopVerifier))
                    .with_no_client_auth(),
            ),
            expiration: SystemTime::now(),
            instance_identity: "p:i".to_string(),
        }
    }

    #[derive(Debug)]
    struct NoopVerifier;
    impl rustls::client::danger::ServerCertVerifier for NoopVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &rustls_pki_types::CertificateDer<'_>,
            _intermediates: &[rustls_pki_types::CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: rustls_pki_types::UnixTime,
        ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        }
        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &rustls_pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }
        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &rustls_pki_types::CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }
        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            vec![rustls::SignatureScheme::RSA_PSS_SHA256]
        }
    }

    #[test]
    fn selects_first_available_preference() {
        let mut ips = HashMap::new();
        ips.insert(IpType::Private, "10.0.0.1".to_string());
        ips.insert(IpType::Primary, "34.1.2.3".to_string());
        let data = data_with(ips);
        let ip = select_ip(&data, &[IpType::Primary, IpType::Private]).unwrap();
        assert_eq!(ip, "34.1.2.3");
    }

    #[test]
    fn falls_back_to_next_preference_when_first_unavailable() {
        let mut ips = HashMap::new();
        ips.insert(IpType::Private, "10.0.0.1".to_string());
        let data = data_with(ips);
        let ip = select_ip(&data, &[IpType::Primary, IpType::Private]).unwrap();
        assert_eq!(ip, "10.0.0.1");
    }

    #[test]
    fn empty_ip_map_yields_dial_failed() {
        let data = data_with(HashMap::new());
        let err = select_ip(&data, &[IpType::Primary]).unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::DialFailed);
        assert!(err.message().contains("no matching IP type"));
    }

    #[test]
    fn sni_substitutes_colons() {
        assert_eq!(sni_safe("my-project:my-instance"), "my-project.my-instance");
    }

    #[test]
    fn classifies_identity_mismatch_distinctly_from_other_handshake_errors() {
        let rustls_err = rustls::Error::General(format!(
            "{}server certificate does not present expected identity \"p:i\"",
            crate::tls::IDENTITY_MISMATCH_PREFIX
        ));
        let io_err = std::io::Error::new(std::io::ErrorKind::InvalidData, rustls_err);
        let err = classify_tls_error(io_err);
        assert_eq!(err.kind(), ConnectErrorKind::ServerIdentityMismatch);

        let other = std::io::Error::new(std::io::ErrorKind::InvalidData, rustls::Error::General("boom".into()));
        let err = classify_tls_error(other);
        assert_eq!(err.kind(), ConnectErrorKind::HandshakeFailed);
    }
}

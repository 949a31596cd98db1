//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Assembles the per-instance TLS configuration: server CA pinned as the
//! sole trust anchor, client cert + key presented for mTLS, restricted to
//! TLS 1.2+, and a custom verifier that checks the server-presented
//! identity against the expected instance rather than the dialed IP.
//!
//! The socket is dialed by IP, not by a DNS name the server's certificate
//! could ever name, so standard webpki hostname matching does not apply
//! here (see `connector::dial`, which sets SNI to the instance identity
//! precisely so this verifier — not rustls's built-in name check — is
//! the thing that decides whether the peer is who we expect).

use crate::error::{conn_error, ConnectError, ConnectErrorKind};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{verify_server_cert_signed_by_trust_anchor, ParsedCertificate};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::io::{BufReader, Cursor};
use std::sync::Arc;
use tracing::trace;

/// Builds the `rustls::ClientConfig` an [`crate::instance_entry::InstanceEntry`]
/// publishes as part of `InstanceData`.
///
/// `server_ca_cert_pem` becomes the trust store's *only* root. `client_cert_pem`
/// and `client_key_pem` are presented as the client's identity. `expected_identity`
/// is checked against the server certificate's subject/SAN on every handshake.
pub fn build_client_config(
    server_ca_cert_pem: &str,
    client_cert_pem: &str,
    client_key_pem: &str,
    expected_identity: &str,
) -> Result<ClientConfig, ConnectError> {
    let ca_der = parse_single_cert(server_ca_cert_pem)?;
    let mut roots = RootCertStore::empty();
    roots
        .add(ca_der)
        .map_err(|e| conn_error!(ConnectErrorKind::HandshakeFailed, "invalid server CA certificate: {e}"))?;

    let verifier = InstanceIdentityVerifier {
        roots,
        expected_identity: expected_identity.to_string(),
        provider: Arc::new(rustls::crypto::ring::default_provider()),
    };

    let client_cert = parse_single_cert(client_cert_pem)?;
    let client_key = parse_private_key(client_key_pem)?;

    let mut config = ClientConfig::builder()
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| conn_error!(ConnectErrorKind::HandshakeFailed, "unsupported TLS protocol versions: {e}"))?
        .dangerous() // pinned custom verifier is the whole point: single-CA trust, instance-identity check
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(vec![client_cert], client_key)
        .map_err(|e| conn_error!(ConnectErrorKind::HandshakeFailed, "invalid client certificate/key pair: {e}"))?;
    config.resumption = rustls::client::Resumption::disabled();
    Ok(config)
}

fn parse_single_cert(pem: &str) -> Result<CertificateDer<'static>, ConnectError> {
    let mut reader = BufReader::new(Cursor::new(pem.as_bytes()));
    let item = rustls_pemfile::read_one(&mut reader)
        .map_err(|e| conn_error!(ConnectErrorKind::HandshakeFailed, "malformed PEM certificate: {e}"))?
        .ok_or_else(|| conn_error!(ConnectErrorKind::HandshakeFailed, "no certificate found in PEM"))?;
    match item {
        rustls_pemfile::Item::X509Certificate(der) => Ok(der),
        _ => conn_err_handshake("expected an X.509 certificate in PEM"),
    }
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, ConnectError> {
    let mut reader = BufReader::new(Cursor::new(pem.as_bytes()));
    let item = rustls_pemfile::read_one(&mut reader)
        .map_err(|e| conn_error!(ConnectErrorKind::HandshakeFailed, "malformed PEM private key: {e}"))?
        .ok_or_else(|| conn_error!(ConnectErrorKind::HandshakeFailed, "no private key found in PEM"))?;
    match item {
        rustls_pemfile::Item::Pkcs1Key(k) => Ok(PrivateKeyDer::Pkcs1(k)),
        rustls_pemfile::Item::Pkcs8Key(k) => Ok(PrivateKeyDer::Pkcs8(k)),
        rustls_pemfile::Item::Sec1Key(k) => Ok(PrivateKeyDer::Sec1(k)),
        _ => conn_err_handshake("expected a private key in PEM"),
    }
}

fn conn_err_handshake<T>(msg: &str) -> Result<T, ConnectError> {
    Err(conn_error!(ConnectErrorKind::HandshakeFailed, "{msg}"))
}

/// Verifies the leaf is signed by the pinned server CA and that its chain
/// is valid for `now`, exactly like `WebPkiServerVerifier` — but does not
/// compare the cert against the `ServerName` used for the connection; we
/// dial by IP, and Cloud SQL server certs never name the IP. Instead this
/// requires the leaf certificate's subject or SAN to name
/// `expected_identity` — the `project:instance` form or the
/// engine-documented SAN equivalent — which is the actual identity check
/// this connector relies on.
struct InstanceIdentityVerifier {
    roots: RootCertStore,
    expected_identity: String,
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl std::fmt::Debug for InstanceIdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceIdentityVerifier")
            .field("expected_identity", &self.expected_identity)
            .finish()
    }
}

/// Message prefix on the `rustls::Error::General` raised for a subject/SAN
/// mismatch, so `connector::dial` can classify the resulting handshake
/// error as `ServerIdentityMismatch` instead of a generic `HandshakeFailed`.
pub(crate) const IDENTITY_MISMATCH_PREFIX: &str = "cloud-sql-connect-core: identity mismatch: ";

impl ServerCertVerifier for InstanceIdentityVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let cert = ParsedCertificate::try_from(end_entity)?;
        verify_server_cert_signed_by_trust_anchor(&cert, &self.roots, intermediates, now)?;

        if !certificate_names_identity(end_entity, &self.expected_identity) {
            trace!("server certificate does not present expected identity {}", self.expected_identity);
            return Err(rustls::Error::General(format!(
                "{}server certificate does not present expected identity \"{}\"",
                IDENTITY_MISMATCH_PREFIX, self.expected_identity
            )));
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

fn certificate_names_identity(der: &CertificateDer<'_>, expected: &str) -> bool {
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(der) else {
        return false;
    };
    if let Some(Ok(cn)) = cert.subject().iter_common_name().next().map(|a| a.as_str()) {
        if cn == expected {
            return true;
        }
    }
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let x509_parser::extensions::GeneralName::DNSName(dns) = name {
                if *dns == expected {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_pem() {
        let err = parse_single_cert("not a cert").unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::HandshakeFailed);
    }
}

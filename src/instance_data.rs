//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::ip_type::IpType;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{BufReader, Cursor};
use std::sync::Arc;
use std::time::SystemTime;

/// Connection settings fetched from the control plane: the instance's
/// reachable addresses, its server CA certificate (PEM), and its engine
/// version string (e.g. `POSTGRES_14`).
#[derive(Debug, Clone)]
pub struct InstanceMetadata {
    pub ip_addrs: HashMap<IpType, String>,
    pub server_ca_cert_pem: String,
    pub database_version: String,
}

impl InstanceMetadata {
    /// True when `database_version` names an engine without IAM database
    /// auth support (the SQL Server family).
    pub fn iam_auth_supported(&self) -> bool {
        !self.database_version.to_ascii_uppercase().starts_with("SQLSERVER")
    }
}

/// A short-lived client certificate signed by the instance's CA, binding
/// the shared public key (and, for IAM auth, a DB-user principal) to one
/// instance connection.
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    pub cert_pem: String,
    pub not_after: SystemTime,
}

impl ClientCertificate {
    /// Base64-encoded SHA-256 digest of the DER-encoded certificate, used
    /// only to make "a new cert was issued" observable in logs without
    /// printing the cert itself (scenario: proactive refresh swaps in a
    /// cert with a different identity than the one it replaces). Falls
    /// back to a fixed placeholder if `cert_pem` does not parse, since this
    /// is a diagnostic aid, not something correctness depends on.
    pub fn fingerprint_sha256(&self) -> String {
        let mut reader = BufReader::new(Cursor::new(self.cert_pem.as_bytes()));
        let der = match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::X509Certificate(der))) => der,
            _ => return "unparseable".to_string(),
        };
        let digest = Sha256::digest(der.as_ref());
        base64::engine::general_purpose::STANDARD.encode(digest)
    }
}

/// The artifact an `InstanceEntry` caches: fetched metadata, the matching
/// ephemeral client cert, a ready-to-dial TLS configuration, and the
/// instant this whole bundle stops being valid.
#[derive(Clone)]
pub struct InstanceData {
    pub metadata: InstanceMetadata,
    pub client_cert: ClientCertificate,
    pub tls_config: Arc<rustls::ClientConfig>,
    pub expiration: SystemTime,
    /// The `project:instance` identity this data was fetched for. Used by
    /// the connector as the TLS SNI value — dialing happens by IP, so this
    /// (not a DNS name the cert could ever carry) is what the handshake
    /// presents, with the actual identity check done by the custom
    /// verifier baked into `tls_config`.
    pub instance_identity: String,
}

impl InstanceData {
    /// `expiration` is the earlier of the client cert's `notAfter` and, for
    /// IAM auth, the DB-user access token's expiry.
    pub fn compute_expiration(
        cert_not_after: SystemTime,
        db_token_expires_at: Option<SystemTime>,
    ) -> SystemTime {
        match db_token_expires_at {
            Some(t) if t < cert_not_after => t,
            _ => cert_not_after,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expiration <= now
    }
}

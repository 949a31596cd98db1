//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{conn_error, ConnectError, ConnectErrorKind};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use tokio::sync::OnceCell;

const KEY_BITS: usize = 2048;

/// An RSA key pair used as the subject of every client certificate this
/// process requests. One pair is generated per process and reused for
/// every instance, since the control plane binds a certificate to a public
/// key, not to an instance.
#[derive(Clone)]
pub struct KeyPair {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl KeyPair {
    fn generate() -> Result<KeyPair, ConnectError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| conn_error!(ConnectErrorKind::InvalidInstanceName, "failed to generate RSA key pair: {e}"))?;
        let public_key_pem = rsa::RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| conn_error!(ConnectErrorKind::InvalidInstanceName, "failed to encode public key: {e}"))?;
        Ok(KeyPair {
            private_key,
            public_key_pem,
        })
    }

    /// PEM-encoded public key, submitted as the `publicKey` field of the
    /// `generateEphemeralCert` request.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// PKCS#1 PEM-encoded private key, paired with the certificate issued
    /// against `public_key_pem()` when assembling a client TLS identity.
    pub fn private_key_pem(&self) -> Result<String, ConnectError> {
        self.private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map(|p| p.to_string())
            .map_err(|e| conn_error!(ConnectErrorKind::InvalidInstanceName, "failed to encode private key: {e}"))
    }
}

/// Supplies the process-wide RSA key pair, generating it lazily off the
/// calling task so that key generation never blocks a caller's `connect()`.
#[derive(Clone, Default)]
pub struct KeyPairSource {
    cell: std::sync::Arc<OnceCell<KeyPair>>,
}

impl KeyPairSource {
    pub fn new() -> KeyPairSource {
        KeyPairSource {
            cell: std::sync::Arc::new(OnceCell::new()),
        }
    }

    /// Returns the shared key pair, generating it on first call. Concurrent
    /// callers before the first generation completes all await the same
    /// generation; none triggers a second one.
    pub async fn get(&self) -> Result<KeyPair, ConnectError> {
        self.cell
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(KeyPair::generate)
                    .await
                    .map_err(|e| conn_error!(ConnectErrorKind::InvalidInstanceName, "key generation task panicked: {e}"))?
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_a_usable_key_pair() {
        let source = KeyPairSource::new();
        let pair = source.get().await.unwrap();
        assert!(pair.public_key_pem().contains("PUBLIC KEY"));
        assert!(pair.private_key_pem().unwrap().contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn repeated_calls_return_the_same_key() {
        let source = KeyPairSource::new();
        let a = source.get().await.unwrap();
        let b = source.get().await.unwrap();
        assert_eq!(a.public_key_pem(), b.public_key_pem());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_generation() {
        let source = KeyPairSource::new();
        let (a, b) = tokio::join!(source.get(), source.get());
        assert_eq!(a.unwrap().public_key_pem(), b.unwrap().public_key_pem());
    }
}

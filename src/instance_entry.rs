//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Per-instance cache and refresh state machine. See module-level
//! invariants: at most one refresh in flight, a failed refresh never
//! displaces a still-valid cached result, and a proactive refresh is
//! always scheduled before the cached cert expires.

use crate::admin_api::AdminApiFetcher;
use crate::credentials::CredentialSource;
use crate::error::{ConnectError, ConnectErrorKind};
use crate::instance_data::InstanceData;
use crate::instance_name::InstanceName;
use crate::ip_type::AuthType;
use crate::key_pair::KeyPairSource;
use crate::retry::RetryPolicy;
use crate::scheduler::{JobHandle, Scheduler};
use crate::tls;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Minimum delay before a proactive refresh, to avoid a thundering herd
/// when many instances' certs happen to expire close together.
const MIN_JITTER: Duration = Duration::from_secs(60);
/// Time before `expiration` at which a proactive refresh is scheduled.
const REFRESH_BUFFER: Duration = Duration::from_secs(4 * 60);
/// Backoff ceiling for a failed refresh when a valid cached value still
/// shields callers from the failure.
const FAILURE_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// The state `currentFuture` can resolve to.
#[derive(Clone)]
pub enum EntryState {
    /// No successful refresh has completed yet.
    PendingFirst,
    /// Resolved, unexpired.
    Valid(Arc<InstanceData>),
    /// Resolved, past `expiration`; a refresh has already been scheduled
    /// (or is in flight) to replace it.
    Expired(Arc<InstanceData>),
    /// The first refresh failed before any success was ever recorded.
    Failed(ConnectError),
    /// `terminate()` was called.
    Closed,
}

struct JobState {
    handle: Option<JobHandle>,
    refreshing: bool,
    force_pending: bool,
}

pub struct InstanceEntry {
    inner: Arc<Inner>,
}

struct Inner {
    name: InstanceName,
    auth_type: AuthType,
    key_pair: KeyPairSource,
    credentials: Arc<dyn CredentialSource>,
    api_fetcher: Arc<AdminApiFetcher>,
    scheduler: Arc<dyn Scheduler>,
    retry: RetryPolicy,
    state_tx: watch::Sender<EntryState>,
    job: Mutex<JobState>,
    terminated: AtomicBool,
}

impl InstanceEntry {
    pub fn new(
        name: InstanceName,
        auth_type: AuthType,
        key_pair: KeyPairSource,
        credentials: Arc<dyn CredentialSource>,
        api_fetcher: Arc<AdminApiFetcher>,
        scheduler: Arc<dyn Scheduler>,
    ) -> InstanceEntry {
        let (state_tx, _) = watch::channel(EntryState::PendingFirst);
        let inner = Arc::new(Inner {
            name,
            auth_type,
            key_pair,
            credentials,
            api_fetcher,
            scheduler,
            retry: RetryPolicy::default(),
            state_tx,
            job: Mutex::new(JobState {
                handle: None,
                refreshing: false,
                force_pending: false,
            }),
            terminated: AtomicBool::new(false),
        });
        let first = Inner::schedule(&inner, Duration::ZERO);
        inner.job.lock().unwrap().handle = Some(first);
        InstanceEntry { inner }
    }

    /// Returns the most recent `InstanceData`, awaiting a refresh if none
    /// has completed yet or if the cached value is expired (a replacement
    /// is already scheduled/in flight whenever that happens).
    pub async fn get_instance_data(&self) -> Result<Arc<InstanceData>, ConnectError> {
        let mut rx = self.inner.state_tx.subscribe();
        loop {
            match &*rx.borrow() {
                EntryState::Valid(data) if !data.is_expired(SystemTime::now()) => return Ok(data.clone()),
                EntryState::Failed(e) => return Err(e.clone()),
                EntryState::Closed => {
                    return Err(ConnectError::new(ConnectErrorKind::EntryClosed, "instance entry is closed"))
                }
                EntryState::Valid(_) | EntryState::PendingFirst | EntryState::Expired(_) => {}
            }
            if rx.changed().await.is_err() {
                return Err(ConnectError::new(
                    ConnectErrorKind::EntryClosed,
                    "instance entry was dropped while awaiting refresh",
                ));
            }
        }
    }

    /// Idempotent hint that the cached cert is no longer usable (e.g. after
    /// a TLS handshake rejection). Coalesces with any in-flight refresh: at
    /// most one extra refresh is started beyond the one currently running.
    pub fn force_refresh(&self) {
        if self.inner.terminated.load(Ordering::Acquire) {
            return;
        }
        let mut job = self.inner.job.lock().unwrap();
        if job.refreshing {
            job.force_pending = true;
            return;
        }
        if let Some(handle) = job.handle.take() {
            self.inner.scheduler.cancel(handle);
        }
        job.handle = Some(Inner::schedule(&self.inner, Duration::ZERO));
    }

    /// Marks the entry terminated, fails any awaiters with `EntryClosed`,
    /// and cancels the scheduled refresh. One-way; safe to call more than
    /// once.
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut job = self.inner.job.lock().unwrap();
        if let Some(handle) = job.handle.take() {
            self.inner.scheduler.cancel(handle);
        }
        drop(job);
        let _ = self.inner.state_tx.send(EntryState::Closed);
    }

    pub fn name(&self) -> &InstanceName {
        &self.inner.name
    }

    /// Returns the engine version and IP map of the most recently cached
    /// data, awaiting a refresh under the same rules as `get_instance_data`.
    pub async fn get_metadata(&self) -> Result<crate::instance_data::InstanceMetadata, ConnectError> {
        Ok(self.get_instance_data().await?.metadata.clone())
    }
}

impl Inner {
    fn schedule(inner: &Arc<Inner>, delay: Duration) -> JobHandle {
        let inner = inner.clone();
        inner.scheduler.schedule(delay, Box::pin(Inner::run_refresh_cycle(inner.clone())))
    }

    async fn run_refresh_cycle(inner: Arc<Inner>) {
        if inner.terminated.load(Ordering::Acquire) {
            return;
        }
        {
            let mut job = inner.job.lock().unwrap();
            job.refreshing = true;
        }
        let stale = match &*inner.state_tx.borrow() {
            EntryState::Valid(data) if data.is_expired(SystemTime::now()) => Some(data.clone()),
            _ => None,
        };
        if let Some(data) = stale {
            let _ = inner.state_tx.send(EntryState::Expired(data));
        }

        let result = inner.retry.run("refreshInstanceData", || Self::do_refresh(&inner)).await;

        if inner.terminated.load(Ordering::Acquire) {
            return;
        }

        let next_delay = match result {
            Ok(data) => {
                let now = SystemTime::now();
                let data = Arc::new(data);
                info!(
                    "refreshed instance data for {}, expires at {:?}, cert fingerprint {}",
                    inner.name,
                    data.expiration,
                    data.client_cert.fingerprint_sha256()
                );
                let _ = inner.state_tx.send(EntryState::Valid(data.clone()));
                if data.expiration <= now {
                    // Already expired at publish time (near-zero-lifetime
                    // cert, clock skew): refresh immediately instead of
                    // holding stale data for up to MIN_JITTER.
                    Duration::ZERO
                } else {
                    data.expiration
                        .duration_since(now + REFRESH_BUFFER)
                        .unwrap_or(Duration::ZERO)
                        .max(MIN_JITTER)
                }
            }
            Err(e) => {
                warn!("refresh failed for {}: {e}", inner.name);
                let now = SystemTime::now();
                let still_usable = matches!(&*inner.state_tx.borrow(), EntryState::Valid(data) if !data.is_expired(now));
                if still_usable {
                    // Valid data remains in place; the failure is logged and
                    // swallowed from the caller's perspective per the
                    // TransientApi surfacing rule.
                } else {
                    let _ = inner.state_tx.send(EntryState::Failed(e));
                }
                FAILURE_BACKOFF_CAP
            }
        };

        let mut job = inner.job.lock().unwrap();
        job.refreshing = false;
        let delay = if job.force_pending {
            job.force_pending = false;
            Duration::ZERO
        } else {
            next_delay
        };
        job.handle = Some(Self::schedule(&inner, delay));
    }

    async fn do_refresh(inner: &Arc<Inner>) -> Result<InstanceData, ConnectError> {
        let key_pair = inner.key_pair.get().await?;
        let api_creds = inner.credentials.api_credentials().await?;

        let db_token = if inner.auth_type == AuthType::Iam {
            let token = inner.credentials.db_user_token().await?;
            if token.token.is_empty() {
                return Err(ConnectError::new(ConnectErrorKind::TokenInvalid, "Access Token has length of zero"));
            }
            if token.is_expired() {
                return Err(ConnectError::new(
                    ConnectErrorKind::TokenInvalid,
                    "Access Token expiration time is in the past",
                ));
            }
            Some(token)
        } else {
            None
        };

        let (metadata_result, cert_result) = tokio::join!(
            inner.api_fetcher.fetch_metadata(&inner.name, &api_creds.token),
            inner.api_fetcher.fetch_ephemeral_cert(
                &inner.name,
                key_pair.public_key_pem(),
                db_token.as_ref().map(|t| t.token.as_str()),
                &api_creds.token,
            )
        );
        let metadata = metadata_result?;
        let client_cert = cert_result?;

        if inner.auth_type == AuthType::Iam && !metadata.iam_auth_supported() {
            return Err(ConnectError::new(
                ConnectErrorKind::IamUnsupported,
                format!(
                    "[{}] IAM Authentication is not supported for SQL Server instances",
                    inner.name
                ),
            ));
        }

        let expected_identity = format!("{}:{}", inner.name.project(), inner.name.instance());
        let client_key_pem = key_pair.private_key_pem()?;
        let tls_config = tls::build_client_config(
            &metadata.server_ca_cert_pem,
            &client_cert.cert_pem,
            &client_key_pem,
            &expected_identity,
        )?;

        let expiration = InstanceData::compute_expiration(
            client_cert.not_after,
            db_token.map(|t| SystemTime::UNIX_EPOCH + Duration::from_secs(t.expires_at.max(0) as u64)),
        );

        debug!("built InstanceData for {}", inner.name);
        Ok(InstanceData {
            metadata,
            client_cert,
            tls_config: Arc::new(tls_config),
            expiration,
            instance_identity: expected_identity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{BearerToken, CredentialSource, StaticOauth2Token};
    use crate::scheduler::TokioScheduler;
    use async_trait::async_trait;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_entry(auth_type: AuthType) -> InstanceEntry {
        InstanceEntry::new(
            InstanceName::parse("proj:region1:inst").unwrap(),
            auth_type,
            KeyPairSource::new(),
            Arc::new(StaticOauth2Token::new("tok")),
            Arc::new(AdminApiFetcher::with_base_url("http://127.0.0.1:0")),
            Arc::new(TokioScheduler::new()),
        )
    }

    /// A `CredentialSource` whose `db_user_token()` answer is fixed at
    /// construction, for exercising the IAM token-validity checks in
    /// `do_refresh` without a real identity provider.
    struct FixedDbToken {
        db_token: Result<BearerToken, ConnectError>,
    }

    #[async_trait]
    impl CredentialSource for FixedDbToken {
        async fn api_credentials(&self) -> Result<BearerToken, ConnectError> {
            Ok(BearerToken {
                token: "api-tok".into(),
                expires_at: i64::MAX / 2,
            })
        }

        async fn db_user_token(&self) -> Result<BearerToken, ConnectError> {
            self.db_token.clone()
        }
    }

    fn entry_against(
        server: &MockServer,
        auth_type: AuthType,
        credentials: Arc<dyn CredentialSource>,
    ) -> InstanceEntry {
        InstanceEntry::new(
            InstanceName::parse("p:r:i").unwrap(),
            auth_type,
            KeyPairSource::new(),
            credentials,
            Arc::new(AdminApiFetcher::with_base_url(server.uri())),
            Arc::new(TokioScheduler::new()),
        )
    }

    /// A real, parseable self-signed certificate with the given common
    /// name. `do_refresh` routes both the "server CA" and "ephemeral
    /// client cert" fields straight through `tls::build_client_config`,
    /// which parses them as X.509 PEM, so fixtures need to be real certs
    /// rather than placeholder text.
    fn self_signed_cert_pem(common_name: &str) -> String {
        let mut params = rcgen::CertificateParams::new(vec![]).unwrap();
        let mut dn = rcgen::DistinguishedName::new();
        dn.push(rcgen::DnType::CommonName, common_name);
        params.distinguished_name = dn;
        let key_pair = rcgen::KeyPair::generate().unwrap();
        params.self_signed(&key_pair).unwrap().pem()
    }

    async fn mount_connect_settings(server: &MockServer, database_version: &str) {
        Mock::given(method("GET"))
            .and(path_regex(r"^/projects/p/instances/i/connectSettings$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ipAddresses": [{"type": "PRIMARY", "ipAddress": "34.1.2.3"}],
                "serverCaCert": {"cert": self_signed_cert_pem("p:i")},
                "databaseVersion": database_version,
            })))
            .mount(server)
            .await;
    }

    async fn mount_ephemeral_cert(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/projects/p/instances/i:generateEphemeralCert$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ephemeralCert": {
                    "cert": self_signed_cert_pem("p:i"),
                    "expirationTime": "2099-01-01T00:00:00Z",
                }
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn iam_unsupported_for_sql_server_surfaces_before_any_valid_data() {
        let server = MockServer::start().await;
        mount_connect_settings(&server, "SQLSERVER_2019_STANDARD").await;
        mount_ephemeral_cert(&server).await;
        let creds = Arc::new(FixedDbToken {
            db_token: Ok(BearerToken {
                token: "db-user-tok".into(),
                expires_at: i64::MAX / 2,
            }),
        });
        let entry = entry_against(&server, AuthType::Iam, creds);

        let err = entry.get_instance_data().await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::IamUnsupported);
        assert!(err.message().contains("[p:r:i] IAM Authentication is not supported for SQL Server instances"));
    }

    #[tokio::test]
    async fn empty_iam_token_fails_before_any_network_call() {
        let server = MockServer::start().await;
        // No mocks mounted: fetch_metadata/fetch_ephemeral_cert must never
        // be called, since the token check happens first in `do_refresh`.
        let creds = Arc::new(FixedDbToken {
            db_token: Ok(BearerToken {
                token: String::new(),
                expires_at: i64::MAX / 2,
            }),
        });
        let entry = entry_against(&server, AuthType::Iam, creds);

        let err = entry.get_instance_data().await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::TokenInvalid);
        assert!(err.message().contains("Access Token has length of zero"));
    }

    #[tokio::test]
    async fn expired_iam_token_fails_before_any_network_call() {
        let server = MockServer::start().await;
        let creds = Arc::new(FixedDbToken {
            db_token: Ok(BearerToken {
                token: "stale".into(),
                expires_at: 1,
            }),
        });
        let entry = entry_against(&server, AuthType::Iam, creds);

        let err = entry.get_instance_data().await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::TokenInvalid);
        assert!(err.message().contains("Access Token expiration time is in the past"));
    }

    #[tokio::test]
    async fn happy_path_resolves_metadata_and_database_version() {
        let server = MockServer::start().await;
        mount_connect_settings(&server, "POSTGRES_14").await;
        mount_ephemeral_cert(&server).await;
        let entry = entry_against(&server, AuthType::Password, Arc::new(StaticOauth2Token::new("tok")));

        let data = entry.get_instance_data().await.unwrap();
        assert_eq!(data.metadata.database_version, "POSTGRES_14");
        assert_eq!(data.metadata.ip_addrs.get(&crate::ip_type::IpType::Primary).unwrap(), "34.1.2.3");
        assert_eq!(entry.get_metadata().await.unwrap().database_version, "POSTGRES_14");
    }

    #[tokio::test]
    async fn pending_first_waits_and_eventually_fails_without_a_server() {
        let entry = make_entry(AuthType::Password);
        let result = tokio::time::timeout(Duration::from_secs(5), entry.get_instance_data()).await;
        assert!(result.is_ok(), "should not hang forever awaiting currentFuture");
    }

    #[tokio::test]
    async fn force_refresh_is_idempotent_when_entry_closed() {
        let entry = make_entry(AuthType::Password);
        entry.terminate();
        entry.force_refresh();
        let err = entry.get_instance_data().await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::EntryClosed);
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let entry = make_entry(AuthType::Password);
        entry.terminate();
        entry.terminate();
        let err = entry.get_instance_data().await.unwrap_err();
        assert_eq!(err.kind(), ConnectErrorKind::EntryClosed);
    }

    #[test]
    fn bearer_token_constructor_is_available_for_fixtures() {
        let _ = BearerToken {
            token: "x".into(),
            expires_at: 0,
        };
    }
}

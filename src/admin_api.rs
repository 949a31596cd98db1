//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! The control-plane HTTP client: fetches connect settings and submits the
//! public key for an ephemeral client certificate.

use crate::error::{conn_err, conn_error, ConnectError, ConnectErrorKind};
use crate::instance_data::{ClientCertificate, InstanceMetadata};
use crate::instance_name::InstanceName;
use crate::ip_type::IpType;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, instrument};

const API_BASE: &str = "https://sqladmin.googleapis.com/sql/v1beta4";
/// Ephemeral certs have a cloud-wide max lifetime of one hour; used only as
/// a fallback if the server ever omits `expirationTime`.
const DEFAULT_CERT_LIFETIME: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct IpAddress {
    #[serde(rename = "type")]
    ip_type: String,
    #[serde(rename = "ipAddress")]
    ip_address: String,
}

#[derive(Debug, Deserialize)]
struct ServerCaCert {
    cert: String,
}

#[derive(Debug, Deserialize)]
struct ConnectSettingsResponse {
    #[serde(rename = "ipAddresses", default)]
    ip_addresses: Vec<IpAddress>,
    #[serde(rename = "serverCaCert")]
    server_ca_cert: ServerCaCert,
    #[serde(rename = "databaseVersion")]
    database_version: String,
}

#[derive(Debug, Deserialize)]
struct EphemeralCertInner {
    cert: String,
    #[serde(rename = "expirationTime")]
    expiration_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateEphemeralCertResponse {
    #[serde(rename = "ephemeralCert")]
    ephemeral_cert: EphemeralCertInner,
}

#[derive(serde::Serialize)]
struct GenerateEphemeralCertRequest<'a> {
    #[serde(rename = "publicKey")]
    public_key: &'a str,
    #[serde(rename = "access_token", skip_serializing_if = "Option::is_none")]
    access_token: Option<&'a str>,
}

/// Performs the two admin API calls and wraps both in [`RetryPolicy`].
pub struct AdminApiFetcher {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl Default for AdminApiFetcher {
    fn default() -> Self {
        AdminApiFetcher::new()
    }
}

impl AdminApiFetcher {
    pub fn new() -> AdminApiFetcher {
        AdminApiFetcher {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .user_agent(crate::error::user_agent())
                .build()
                .expect("failed to build admin API reqwest client"),
            base_url: API_BASE.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(base_url: impl Into<String>) -> AdminApiFetcher {
        AdminApiFetcher {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
        }
    }

    #[instrument(skip(self, access_token))]
    pub async fn fetch_metadata(
        &self,
        name: &InstanceName,
        access_token: &str,
    ) -> Result<InstanceMetadata, ConnectError> {
        let url = format!(
            "{}/projects/{}/instances/{}/connectSettings",
            self.base_url,
            name.project(),
            name.instance()
        );
        self.retry
            .run("fetchMetadata", || async {
                debug!("fetching connect settings for {name}");
                let resp = self
                    .client
                    .get(&url)
                    .bearer_auth(access_token)
                    .send()
                    .await?;
                Self::check_status(resp.status().as_u16(), name)?;
                let parsed: ConnectSettingsResponse = resp.json().await?;
                Self::to_instance_metadata(parsed)
            })
            .await
    }

    #[instrument(skip(self, access_token, db_user_token))]
    pub async fn fetch_ephemeral_cert(
        &self,
        name: &InstanceName,
        public_key_pem: &str,
        db_user_token: Option<&str>,
        access_token: &str,
    ) -> Result<ClientCertificate, ConnectError> {
        let url = format!(
            "{}/projects/{}/instances/{}:generateEphemeralCert",
            self.base_url,
            name.project(),
            name.instance()
        );
        let body = GenerateEphemeralCertRequest {
            public_key: public_key_pem,
            access_token: db_user_token,
        };
        self.retry
            .run("fetchEphemeralCert", || async {
                debug!("requesting ephemeral client certificate for {name}");
                let resp = self
                    .client
                    .post(&url)
                    .bearer_auth(access_token)
                    .json(&body)
                    .send()
                    .await?;
                Self::check_status(resp.status().as_u16(), name)?;
                let parsed: GenerateEphemeralCertResponse = resp.json().await?;
                Self::to_client_certificate(parsed)
            })
            .await
    }

    fn check_status(status: u16, name: &InstanceName) -> Result<(), ConnectError> {
        match status {
            200..=299 => Ok(()),
            401 | 403 => conn_err!(ConnectErrorKind::NotAuthorized, "not authorized for instance {name}"),
            404 => conn_err!(ConnectErrorKind::NotFound, "instance {name} not found"),
            500..=599 => conn_err!(ConnectErrorKind::TransientApi, "admin API returned {status} for {name}"),
            _ => conn_err!(ConnectErrorKind::TransientApi, "admin API returned unexpected status {status} for {name}"),
        }
    }

    fn to_instance_metadata(resp: ConnectSettingsResponse) -> Result<InstanceMetadata, ConnectError> {
        let mut ip_addrs = HashMap::new();
        for ip in resp.ip_addresses {
            let ip_type: IpType = ip.ip_type.parse()?;
            ip_addrs.insert(ip_type, ip.ip_address);
        }
        Ok(InstanceMetadata {
            ip_addrs,
            server_ca_cert_pem: resp.server_ca_cert.cert,
            database_version: resp.database_version,
        })
    }

    fn to_client_certificate(resp: GenerateEphemeralCertResponse) -> Result<ClientCertificate, ConnectError> {
        let not_after = match resp.ephemeral_cert.expiration_time {
            Some(ts) => parse_rfc3339(&ts)?,
            None => SystemTime::now() + DEFAULT_CERT_LIFETIME,
        };
        Ok(ClientCertificate {
            cert_pem: resp.ephemeral_cert.cert,
            not_after,
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<SystemTime, ConnectError> {
    let dt = chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| conn_error!(ConnectErrorKind::TransientApi, "invalid expirationTime \"{s}\": {e}"))?;
    Ok(SystemTime::UNIX_EPOCH + Duration::from_millis(dt.timestamp_millis().max(0) as u64))
}

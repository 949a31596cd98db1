//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Caller-facing configuration surface. Mirrors the fluent, consuming
//! builder style used for this crate's connection handle, with an
//! additional `from_environment()` entry point.

use crate::credentials::{ApplicationDefaultCredentials, CredentialSource, StaticOauth2Token};
use crate::error::{conn_err, ConnectError, ConnectErrorKind};
use crate::ip_type::{parse_ip_type_preferences, IpType};
use std::sync::Arc;

/// Fully resolved connector configuration for one instance.
#[derive(Clone)]
pub struct ConnectorOptions {
    cloud_sql_instance: String,
    ip_types: Vec<IpType>,
    enable_iam_auth: bool,
    unix_socket_path: Option<String>,
    credentials_file: Option<String>,
    oauth2_token: Option<String>,
}

impl ConnectorOptions {
    pub fn builder(cloud_sql_instance: impl Into<String>) -> ConnectorOptionsBuilder {
        ConnectorOptionsBuilder::new(cloud_sql_instance)
    }

    pub fn cloud_sql_instance(&self) -> &str {
        &self.cloud_sql_instance
    }

    pub fn ip_types(&self) -> &[IpType] {
        &self.ip_types
    }

    pub fn enable_iam_auth(&self) -> bool {
        self.enable_iam_auth
    }

    /// Present only as a configuration value: dialing a Unix socket is out
    /// of scope for this crate. Callers that see this set are expected to
    /// branch before ever calling `Registry::connect`.
    pub fn unix_socket_path(&self) -> Option<&str> {
        self.unix_socket_path.as_deref()
    }

    /// Builds the credential source this configuration describes: a static
    /// token if `oauth2Token` was supplied, otherwise application default
    /// credentials resolved from `credentialsFile`/the environment.
    pub fn build_credentials(&self) -> Result<Arc<dyn CredentialSource>, ConnectError> {
        if let Some(token) = &self.oauth2_token {
            return Ok(Arc::new(StaticOauth2Token::new(token.clone())));
        }
        Ok(Arc::new(ApplicationDefaultCredentials::from_environment(
            self.credentials_file.as_deref(),
        )?))
    }
}

/// Consuming, fluent builder for [`ConnectorOptions`], mirroring this
/// crate's connection-handle builder.
pub struct ConnectorOptionsBuilder {
    cloud_sql_instance: String,
    ip_types: Vec<IpType>,
    enable_iam_auth: bool,
    unix_socket_path: Option<String>,
    credentials_file: Option<String>,
    oauth2_token: Option<String>,
}

impl ConnectorOptionsBuilder {
    pub fn new(cloud_sql_instance: impl Into<String>) -> ConnectorOptionsBuilder {
        ConnectorOptionsBuilder {
            cloud_sql_instance: cloud_sql_instance.into(),
            ip_types: vec![IpType::Primary, IpType::Private],
            enable_iam_auth: false,
            unix_socket_path: None,
            credentials_file: None,
            oauth2_token: None,
        }
    }

    /// Parses a comma-separated `ipTypes` list, preserving the
    /// `PRIMARY`/`PUBLIC` synonym.
    pub fn ip_types(mut self, s: &str) -> Result<ConnectorOptionsBuilder, ConnectError> {
        self.ip_types = parse_ip_type_preferences(s)?;
        Ok(self)
    }

    pub fn enable_iam_auth(mut self, enabled: bool) -> ConnectorOptionsBuilder {
        self.enable_iam_auth = enabled;
        self
    }

    pub fn unix_socket_path(mut self, path: impl Into<String>) -> ConnectorOptionsBuilder {
        self.unix_socket_path = Some(path.into());
        self
    }

    pub fn credentials_file(mut self, path: impl Into<String>) -> ConnectorOptionsBuilder {
        self.credentials_file = Some(path.into());
        self
    }

    pub fn oauth2_token(mut self, token: impl Into<String>) -> ConnectorOptionsBuilder {
        self.oauth2_token = Some(token.into());
        self
    }

    pub fn build(self) -> Result<ConnectorOptions, ConnectError> {
        if self.cloud_sql_instance.trim().is_empty() {
            return conn_err!(ConnectErrorKind::InvalidInstanceName, "cloudSqlInstance must not be empty");
        }
        Ok(ConnectorOptions {
            cloud_sql_instance: self.cloud_sql_instance,
            ip_types: self.ip_types,
            enable_iam_auth: self.enable_iam_auth,
            unix_socket_path: self.unix_socket_path,
            credentials_file: self.credentials_file,
            oauth2_token: self.oauth2_token,
        })
    }

    /// Reads `cloudSqlInstance` plus the remaining keys from their
    /// environment-variable equivalents, falling back to this builder's
    /// defaults when unset.
    pub fn from_environment(cloud_sql_instance: impl Into<String>) -> ConnectorOptionsBuilder {
        let mut b = ConnectorOptionsBuilder::new(cloud_sql_instance);
        if let Ok(v) = std::env::var("CLOUD_SQL_IP_TYPES") {
            if let Ok(prefs) = parse_ip_type_preferences(&v) {
                b.ip_types = prefs;
            }
        }
        if let Ok(v) = std::env::var("CLOUD_SQL_ENABLE_IAM_AUTH") {
            b.enable_iam_auth = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("CLOUD_SQL_CREDENTIALS_FILE") {
            b.credentials_file = Some(v);
        }
        if let Ok(v) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            b.credentials_file.get_or_insert(v);
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_to_primary_then_private() {
        let opts = ConnectorOptions::builder("p:r:i").build().unwrap();
        assert_eq!(opts.ip_types(), &[IpType::Primary, IpType::Private]);
        assert!(!opts.enable_iam_auth());
        assert!(opts.unix_socket_path().is_none());
    }

    #[test]
    fn rejects_empty_instance_name() {
        assert!(ConnectorOptions::builder("  ").build().is_err());
    }

    #[test]
    fn ip_types_rejects_unknown_entries() {
        assert!(ConnectorOptions::builder("p:r:i").ip_types("BOGUS").is_err());
    }

    #[test]
    fn oauth2_token_yields_a_static_credential_source() {
        let opts = ConnectorOptions::builder("p:r:i")
            .oauth2_token("tok")
            .build()
            .unwrap();
        let creds = opts.build_credentials().unwrap();
        let _ = creds;
    }
}

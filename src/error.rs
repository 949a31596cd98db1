//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
include!(concat!(env!("OUT_DIR"), "/ua.rs"));

pub(crate) fn sdk_version() -> &'static str {
    SDK_VERSION
}

pub(crate) fn user_agent() -> &'static str {
    USER_AGENT
}

/// Error returned by every fallible operation in this crate.
///
/// Carries a discoverable [`ConnectErrorKind`] plus a human-readable message.
/// Callers that need to branch on cause should match on `.kind()` rather
/// than parsing `.to_string()`.
#[derive(Debug, Clone)]
pub struct ConnectError {
    kind: ConnectErrorKind,
    message: String,
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, msg: impl Into<String>) -> ConnectError {
        ConnectError {
            kind,
            message: msg.into(),
        }
    }

    pub fn kind(&self) -> ConnectErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True for transient-API failures that a caller may retry once a
    /// `TransientApi` budget (see [`crate::retry`]) has been exhausted but a
    /// still-valid cached instance remains usable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ConnectErrorKind::TransientApi | ConnectErrorKind::HandshakeFailed
        )
    }
}

macro_rules! conn_error {
    ($kind:expr, $($t:tt)*) => {{
        let m = format!($($t)*);
        crate::error::ConnectError::new($kind, format!("[{}] {}", crate::error::sdk_version(), m))
    }};
}

pub(crate) use conn_error;

macro_rules! conn_err {
    ($kind:expr, $($t:tt)*) => {{
        Err(crate::error::conn_error!($kind, $($t)*))
    }};
}

pub(crate) use conn_err;

impl From<reqwest::Error> for ConnectError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ConnectErrorKind::TransientApi
        } else if let Some(status) = e.status() {
            match status.as_u16() {
                401 | 403 => ConnectErrorKind::NotAuthorized,
                404 => ConnectErrorKind::NotFound,
                500..=599 => ConnectErrorKind::TransientApi,
                _ => ConnectErrorKind::TransientApi,
            }
        } else {
            ConnectErrorKind::TransientApi
        };
        ConnectError {
            kind,
            message: format!("admin API request failed: {e}"),
        }
    }
}

impl From<reqwest::header::InvalidHeaderValue> for ConnectError {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        conn_error!(ConnectErrorKind::InvalidInstanceName, "invalid header value: {e}")
    }
}

impl From<url::ParseError> for ConnectError {
    fn from(e: url::ParseError) -> Self {
        conn_error!(ConnectErrorKind::InvalidInstanceName, "error parsing url: {e}")
    }
}

impl From<serde_json::Error> for ConnectError {
    fn from(e: serde_json::Error) -> Self {
        conn_error!(ConnectErrorKind::TransientApi, "error decoding admin API response: {e}")
    }
}

impl From<rustls::Error> for ConnectError {
    fn from(e: rustls::Error) -> Self {
        ConnectError {
            kind: ConnectErrorKind::HandshakeFailed,
            message: format!("TLS error: {e}"),
        }
    }
}

impl From<std::io::Error> for ConnectError {
    fn from(e: std::io::Error) -> Self {
        ConnectError {
            kind: ConnectErrorKind::DialFailed,
            message: format!("I/O error: {e}"),
        }
    }
}

/// The discrete cause of a [`ConnectError`].
///
/// Mirrors the error-kind table: each variant documents whether the
/// operation that raised it may be retried and who the failure surfaces to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectErrorKind {
    /// Instance identifier did not parse. Not retryable; surfaced to caller.
    InvalidInstanceName,

    /// Admin API responded 401/403. Not retryable; surfaced to caller.
    NotAuthorized,

    /// Admin API responded 404 (instance absent). Not retryable; surfaced to caller.
    NotFound,

    /// Admin API 5xx or request timeout. Retried with bounded backoff;
    /// swallowed (logged) if a still-valid cached `InstanceData` exists.
    TransientApi,

    /// IAM database auth was requested for an engine that does not support it
    /// (SQL Server family). Not retryable; surfaced to caller.
    IamUnsupported,

    /// DB-user access token was empty or already expired at refresh time.
    /// Not retryable; surfaced to caller.
    TokenInvalid,

    /// TLS peer certificate subject/SAN did not match the expected instance
    /// identity. Not retryable; surfaced to caller.
    ServerIdentityMismatch,

    /// TLS handshake failed for any other reason. Retried once via a
    /// `forceRefresh` + retry; surfaced to caller if the retry also fails.
    HandshakeFailed,

    /// TCP connect failed. Subject to the caller-supplied dial timeout;
    /// surfaced to caller.
    DialFailed,

    /// The registry (or the entry it was obtained from) has been shut down.
    /// Not retryable; surfaced to caller.
    EntryClosed,
}

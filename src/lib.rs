//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Client-side connector cache for authenticated, mutually-authenticated
//! TLS connections to managed cloud database instances.
//!
//! This crate does not speak a database wire protocol, pool connections, or
//! proxy bytes between a driver and a server. It owns exactly the part of a
//! connector that a driver integration shim cannot: resolving a logical
//! `project:region:instance` identifier to a reachable IP, obtaining a
//! short-lived client certificate from the instance's control plane, and
//! handing back an established, mTLS-wrapped socket.
//!
//! ## Quickstart
//!
//! ```no_run
//! use cloud_sql_connect_core::{ConnectorOptions, Registry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opts = ConnectorOptions::builder("my-project:us-central1:my-instance")
//!         .enable_iam_auth(true)
//!         .build()?;
//!     let credentials = opts.build_credentials()?;
//!     let registry = Arc::new(Registry::new(credentials));
//!
//!     let socket = registry
//!         .connect(
//!             opts.cloud_sql_instance(),
//!             cloud_sql_connect_core::AuthType::Iam,
//!             opts.ip_types(),
//!             Default::default(),
//!         )
//!         .await?;
//!     let _ = socket.stream;
//!
//!     registry.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`instance_name`] parses and validates the `project:region:instance`
//!   identifier.
//! - [`ip_type`] covers IP selection preference and database-auth mode.
//! - [`key_pair`] lazily generates the process-wide RSA key pair every
//!   client certificate is issued against.
//! - [`credentials`] resolves OAuth2 bearer credentials for the control
//!   plane and, when IAM database auth is enabled, a database-user access
//!   token.
//! - [`admin_api`] is the control-plane HTTP client.
//! - [`tls`] assembles the per-instance `rustls::ClientConfig`, pinned to
//!   the instance's server CA and checking presented identity.
//! - [`instance_entry`] is the per-instance refresh state machine.
//! - [`scheduler`] is the abstract delayed-task executor refresh cycles run
//!   on.
//! - [`registry`] is the process-wide map from instance name to entry.
//! - [`connector`] dials and TLS-upgrades a socket from cached instance
//!   data.
//! - [`config`] is the caller-facing configuration surface.
//! - [`retry`] is the shared backoff-with-jitter retry policy.
//! - [`error`] is this crate's error type.

pub(crate) mod admin_api;

pub(crate) mod config;
pub use crate::config::{ConnectorOptions, ConnectorOptionsBuilder};

pub(crate) mod connector;
pub use crate::connector::{ConnectedSocket, DialOptions};

pub(crate) mod credentials;
pub use crate::credentials::{ApplicationDefaultCredentials, BearerToken, CredentialSource, StaticOauth2Token};

pub(crate) mod error;
pub use crate::error::{ConnectError, ConnectErrorKind};

pub(crate) mod instance_data;
pub use crate::instance_data::{ClientCertificate, InstanceData, InstanceMetadata};

pub(crate) mod instance_entry;
pub use crate::instance_entry::{EntryState, InstanceEntry};

pub(crate) mod instance_name;
pub use crate::instance_name::InstanceName;

pub(crate) mod ip_type;
pub use crate::ip_type::{AuthType, IpType};

pub(crate) mod key_pair;
pub use crate::key_pair::{KeyPair, KeyPairSource};

pub(crate) mod registry;
pub use crate::registry::Registry;

pub(crate) mod retry;
pub use crate::retry::RetryPolicy;

pub(crate) mod scheduler;
pub use crate::scheduler::{JobHandle, Scheduler, TokioScheduler};

pub(crate) mod tls;

//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
//! Process-wide mapping from instance name to [`InstanceEntry`]. Creates
//! entries on first use, forces refreshes on authentication/TLS failures,
//! and coordinates shutdown.

use crate::admin_api::AdminApiFetcher;
use crate::connector::{dial, ConnectedSocket, DialOptions};
use crate::credentials::CredentialSource;
use crate::error::{ConnectError, ConnectErrorKind};
use crate::instance_data::InstanceMetadata;
use crate::instance_entry::InstanceEntry;
use crate::instance_name::InstanceName;
use crate::ip_type::{AuthType, IpType};
use crate::key_pair::KeyPairSource;
use crate::scheduler::{Scheduler, TokioScheduler};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Extra attempts a `connect()` call makes after a `forceRefresh()`, per
/// the documented "one forceRefresh + retry" policy.
const HANDSHAKE_RETRIES: u32 = 1;

/// The process-wide, explicitly constructed registry. Exactly one entry
/// exists per normalized [`InstanceName`] for the registry's lifetime.
pub struct Registry {
    key_pair: KeyPairSource,
    credentials: Arc<dyn CredentialSource>,
    api_fetcher: Arc<AdminApiFetcher>,
    scheduler: Arc<dyn Scheduler>,
    entries: Mutex<HashMap<InstanceName, Arc<InstanceEntry>>>,
    shut_down: AtomicBool,
}

impl Registry {
    pub fn new(credentials: Arc<dyn CredentialSource>) -> Registry {
        Registry {
            key_pair: KeyPairSource::new(),
            credentials,
            api_fetcher: Arc::new(AdminApiFetcher::new()),
            scheduler: Arc::new(TokioScheduler::new()),
            entries: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Resolves or creates the entry for `name`, awaits its current
    /// `InstanceData`, dials, and TLS-upgrades. On TLS failure, forces
    /// exactly one refresh and retries once.
    pub async fn connect(
        &self,
        name: &str,
        auth_type: AuthType,
        ip_preferences: &[IpType],
        opts: DialOptions,
    ) -> Result<ConnectedSocket, ConnectError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ConnectError::new(ConnectErrorKind::EntryClosed, "registry is shut down"));
        }
        let instance_name = InstanceName::parse(name)?;
        let entry = self.entry_for(instance_name, auth_type);

        let mut attempts_left = HANDSHAKE_RETRIES + 1;
        loop {
            let data = entry.get_instance_data().await?;
            match dial(&data, ip_preferences, &opts).await {
                Ok(socket) => return Ok(socket),
                Err(e) if attempts_left > 1 && matches!(e.kind(), ConnectErrorKind::HandshakeFailed) => {
                    debug!("handshake failed for {}, forcing refresh and retrying", entry.name());
                    entry.force_refresh();
                    attempts_left -= 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns the database version and IP map used by driver shims to
    /// select dialect.
    pub async fn get_metadata(&self, name: &str) -> Result<InstanceMetadata, ConnectError> {
        let instance_name = InstanceName::parse(name)?;
        let entry = self.entry_for(instance_name, AuthType::Password);
        entry.get_metadata().await
    }

    /// Terminates all entries and the scheduler. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries = self.entries.lock().unwrap();
        for entry in entries.values() {
            entry.terminate();
        }
        self.scheduler.close();
    }

    fn entry_for(&self, name: InstanceName, auth_type: AuthType) -> Arc<InstanceEntry> {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(name.clone())
            .or_insert_with(|| {
                Arc::new(InstanceEntry::new(
                    name,
                    auth_type,
                    self.key_pair.clone(),
                    self.credentials.clone(),
                    self.api_fetcher.clone(),
                    self.scheduler.clone(),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticOauth2Token;

    fn registry() -> Registry {
        Registry::new(Arc::new(StaticOauth2Token::new("tok")))
    }

    #[test]
    fn connect_rejects_unparseable_name_without_creating_an_entry() {
        let r = registry();
        assert_eq!(r.entries.lock().unwrap().len(), 0);
        assert!(InstanceName::parse("bad name").is_err());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let r = registry();
        r.shutdown();
        r.shutdown();
        assert!(r.shut_down.load(Ordering::Acquire));
    }

    #[test]
    fn concurrent_lookups_for_a_new_name_share_one_entry() {
        let r = registry();
        let name = InstanceName::parse("p:r:i").unwrap();
        let a = r.entry_for(name.clone(), AuthType::Password);
        let b = r.entry_for(name, AuthType::Password);
        assert!(Arc::ptr_eq(&a, &b));
    }
}

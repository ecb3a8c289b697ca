// Session cache
//
// Keeps one authenticated client per (endpoint, credential) pair so that
// many resources managed against the same appliance share a session.
// Logging in concurrently for the same key would trip the appliance's
// session limit, so creation is serialized under the write lock.

use std::collections::HashMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::client::PiholeClient;
use crate::error::Error;
use crate::transport::ClientConfig;

/// Endpoint plus a digest of the password; the password itself is never kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    endpoint: String,
    credential: [u8; 32],
}

impl CacheKey {
    fn new(endpoint: &Url, password: &SecretString) -> Self {
        Self {
            endpoint: endpoint.as_str().trim_end_matches('/').to_owned(),
            credential: Sha256::digest(password.expose_secret().as_bytes()).into(),
        }
    }
}

/// Shared registry of authenticated clients.
#[derive(Default)]
pub struct SessionCache {
    clients: RwLock<HashMap<CacheKey, Arc<PiholeClient>>>,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache").finish_non_exhaustive()
    }
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client for `endpoint` and `password`, authenticating a
    /// new one only if none exists yet.
    ///
    /// Concurrent callers with the same key observe exactly one login.
    /// A failed login leaves nothing cached, so the next call tries again.
    pub async fn get_or_create(
        &self,
        endpoint: &Url,
        password: &SecretString,
        config: &ClientConfig,
    ) -> Result<Arc<PiholeClient>, Error> {
        let key = CacheKey::new(endpoint, password);

        if let Some(client) = self.clients.read().await.get(&key) {
            debug!(endpoint = %key.endpoint, "reusing cached session");
            return Ok(Arc::clone(client));
        }

        let mut clients = self.clients.write().await;
        // Another task may have logged in while we waited for the lock.
        if let Some(client) = clients.get(&key) {
            debug!(endpoint = %key.endpoint, "reusing cached session");
            return Ok(Arc::clone(client));
        }

        let client =
            Arc::new(PiholeClient::connect(endpoint.clone(), password, config.clone()).await?);
        info!(endpoint = %key.endpoint, "cached new session");
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Number of cached clients.
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Log out and close every cached client, leaving the cache empty.
    pub async fn clear(&self) {
        let drained: Vec<Arc<PiholeClient>> = {
            let mut clients = self.clients.write().await;
            clients.drain().map(|(_, client)| client).collect()
        };
        debug!(count = drained.len(), "clearing session cache");
        for client in drained {
            client.logout().await;
        }
    }
}

//! Key-value store interface.
//!
//! The store is the only state shared between concurrent requests, so every
//! coordination primitive the allocator needs is expressed here: plain
//! reads, prefix listings, and an atomic create-if-absent with expiry.
//! Backends:
//!
//! - [`MemoryStore`] - in-process map, optionally persisted to a JSON file
//! - `EtcdStore` - etcd v3 (cargo feature `etcd`)

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// One key and its value, as returned by a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Operations the allocator and the admin tooling need from a store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads one key. `Ok(None)` means the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Lists every live key starting with `prefix`, sorted by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Writes a key unconditionally, without expiry.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Writes a key only if it does not exist yet.
    ///
    /// Returns `Ok(false)` when another writer already holds the key. With a
    /// `ttl`, the key disappears on its own once the duration elapses.
    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Removes one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes every key under `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize>;

    /// Persists anything the backend holds only in memory.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// A store handle that bounds every call by a timeout.
///
/// An elapsed call is reported as [`Error::Timeout`] and its future is
/// dropped, which abandons the remote request.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn Store>,
    call_timeout: Duration,
}

impl StoreClient {
    pub fn new(store: Arc<dyn Store>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    async fn timed<T>(
        &self,
        operation: &str,
        key: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: format!("{} {}", operation, key),
                after: self.call_timeout,
            }),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.timed("get", key, self.store.get(key)).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        self.timed("list", prefix, self.store.list(prefix)).await
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.timed("put", key, self.store.put(key, value)).await
    }

    pub async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        self.timed("create", key, self.store.create(key, value, ttl))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.timed("delete", key, self.store.delete(key)).await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        self.timed("delete", prefix, self.store.delete_prefix(prefix))
            .await
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }
}

/// The store key layout.
pub mod keys {
    /// JSON array of dynamic network names.
    pub const NETWORKS: &str = "nets";

    pub fn network_prefix(network: &str) -> String {
        format!("net/{}/", network)
    }

    pub fn subnet(network: &str) -> String {
        format!("net/{}/subnet4", network)
    }

    pub fn domain(network: &str) -> String {
        format!("net/{}/domain", network)
    }

    pub fn ip_range(network: &str) -> String {
        format!("net/{}/ip4_range", network)
    }

    pub fn mac_range(network: &str) -> String {
        format!("net/{}/mac_range", network)
    }

    pub fn gateways(network: &str) -> String {
        format!("net/{}/gateways", network)
    }

    pub fn nameservers(network: &str) -> String {
        format!("net/{}/nameservers", network)
    }

    pub fn options(network: &str) -> String {
        format!("net/{}/opts", network)
    }

    pub fn members_prefix(network: &str) -> String {
        format!("net/{}/members/", network)
    }

    pub fn member(network: &str, mac: &str) -> String {
        format!("net/{}/members/{}", network, mac)
    }

    pub fn pool_prefix(network: &str) -> String {
        format!("net/{}/pool4/", network)
    }

    pub fn pool_entry(network: &str, offset: u32) -> String {
        format!("net/{}/pool4/{}", network, offset)
    }

    /// Numeric suffix of a pool entry key.
    pub fn pool_offset(key: &str) -> Option<u32> {
        key.rsplit('/').next()?.parse().ok()
    }

    pub fn static_ip4(mac: &str) -> String {
        format!("{}/ip4", mac)
    }

    pub fn static_network(mac: &str) -> String {
        format!("{}/net", mac)
    }

    /// Host name index; the value is the member's MAC.
    pub fn name(name: &str) -> String {
        format!("name/{}", name)
    }
}

//! etcd v3 backend.
//!
//! Conditional pool writes are a transaction guarded on
//! `create_revision == 0`, with the value bound to an etcd lease so that it
//! expires on the store side.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, SortOrder, SortTarget,
    Txn, TxnOp,
};
use tracing::debug;

use super::{KeyValue, Store};
use crate::error::{Error, Result};

fn unavailable(error: etcd_client::Error) -> Error {
    Error::StoreUnavailable(error.to_string())
}

/// Store backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Connects to the given endpoints, e.g. `["http://db:2379"]`.
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(unavailable)?;
        debug!("Connected to etcd at {:?}", endpoints);
        Ok(Self { client })
    }

    /// Best effort; an unrevoked lease still expires with its TTL.
    async fn revoke(&self, lease: Option<i64>) {
        let Some(id) = lease else {
            return;
        };
        let mut client = self.client.clone();
        if let Err(error) = client.lease_revoke(id).await {
            debug!("Failed to revoke etcd lease {:x}: {}", id, error);
        }
    }
}

/// Whole seconds for an etcd lease, at least one.
fn lease_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

/// The lease a create no longer needs: one granted for a write that lost.
fn orphaned_lease(succeeded: bool, lease: Option<i64>) -> Option<i64> {
    if succeeded { None } else { lease }
}

#[async_trait]
impl Store for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        let response = client.get(key, None).await.map_err(unavailable)?;
        match response.kvs().first() {
            Some(kv) => Ok(Some(kv.value_str().map_err(unavailable)?.to_string())),
            None => Ok(None),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let options = GetOptions::new()
            .with_prefix()
            .with_sort(SortTarget::Key, SortOrder::Ascend);
        let response = client
            .get(prefix, Some(options))
            .await
            .map_err(unavailable)?;

        response
            .kvs()
            .iter()
            .map(|kv| {
                Ok(KeyValue::new(
                    kv.key_str().map_err(unavailable)?,
                    kv.value_str().map_err(unavailable)?,
                ))
            })
            .collect()
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.put(key, value, None).await.map_err(unavailable)?;
        Ok(())
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut client = self.client.clone();

        let lease = match ttl {
            Some(ttl) => {
                let granted = client
                    .lease_grant(lease_seconds(ttl), None)
                    .await
                    .map_err(unavailable)?;
                debug!("Granted etcd lease {:x} for {}", granted.id(), key);
                Some(granted.id())
            }
            None => None,
        };
        let put_options = lease.map(|id| PutOptions::new().with_lease(id));

        let txn = Txn::new()
            .when(vec![Compare::create_revision(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, value, put_options)]);
        let succeeded = match client.txn(txn).await {
            Ok(response) => response.succeeded(),
            Err(error) => {
                self.revoke(lease).await;
                return Err(unavailable(error));
            }
        };

        if let Some(id) = orphaned_lease(succeeded, lease) {
            debug!("{} already exists, revoking lease {:x}", key, id);
            self.revoke(Some(id)).await;
        }
        Ok(succeeded)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let response = client.delete(key, None).await.map_err(unavailable)?;
        Ok(response.deleted() > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut client = self.client.clone();
        let response = client
            .delete(prefix, Some(DeleteOptions::new().with_prefix()))
            .await
            .map_err(unavailable)?;
        Ok(usize::try_from(response.deleted()).unwrap_or(0))
    }
}

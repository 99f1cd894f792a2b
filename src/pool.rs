//! Dynamic address pool allocation.
//!
//! A network's pool is the set of `net/<name>/pool4/<offset>` keys, each
//! holding the MAC that occupies `ip_range.begin + offset`. Entries carry a
//! store-side expiry and are never renewed here; an entry that expires
//! frees its offset.
//!
//! # Free Offset Search
//!
//! Entries are scanned in increasing offset order and the first position
//! `i` whose offset is not `i` is taken as free. With no such gap the next
//! offset is the entry count. Only the first hole is ever found, so a pool
//! with several holes fills them one per allocation, front to back.
//!
//! # Concurrency
//!
//! The new entry is written with a create-if-absent call at the exact
//! computed key. Losing that race means another allocator took the offset,
//! so the entries are re-read and the offset recomputed, a bounded number
//! of times.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::network::NetworkDescriptor;
use crate::store::{StoreClient, keys};

/// One occupied pool offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEntry {
    pub offset: u32,
    pub mac: String,
}

/// Hands out addresses from a network's `ip_range`.
#[derive(Clone)]
pub struct PoolAllocator {
    store: StoreClient,
    lease_ttl: Duration,
    commit_attempts: u32,
}

impl PoolAllocator {
    pub fn new(store: StoreClient, lease_ttl: Duration, commit_attempts: u32) -> Self {
        Self {
            store,
            lease_ttl,
            commit_attempts: commit_attempts.max(1),
        }
    }

    /// Reads the pool of `network`, ordered by offset.
    pub async fn entries(&self, network: &str) -> Result<Vec<PoolEntry>> {
        read_entries(&self.store, network).await
    }

    /// Returns the address held by `mac` in `network`, assigning a new one
    /// if it holds none.
    ///
    /// # Errors
    ///
    /// - [`Error::RangeExhausted`] if the network has no `ip_range` or the
    ///   next free offset lies past its end
    /// - [`Error::AllocationConflict`] if every commit attempt lost to a
    ///   concurrent allocator
    /// - any store error from listing or committing
    pub async fn allocate(&self, network: &NetworkDescriptor, mac: &str) -> Result<Ipv4Addr> {
        let exhausted = || Error::RangeExhausted {
            network: network.name.clone(),
        };
        let range = network.ip_range.ok_or_else(exhausted)?;

        for attempt in 1..=self.commit_attempts {
            let entries = self.entries(&network.name).await?;

            if let Some(offset) = existing_offset(&entries, mac) {
                let address = range.address_at(offset).ok_or_else(exhausted)?;
                debug!(
                    "{} already holds {} in {} (offset {})",
                    mac, address, network.name, offset
                );
                return Ok(address);
            }

            let offset = free_offset(&entries);
            let candidate = range.address_at(offset).ok_or_else(exhausted)?;

            let key = keys::pool_entry(&network.name, offset);
            if self.store.create(&key, mac, Some(self.lease_ttl)).await? {
                info!(
                    "Assigned {} to {} from {} (offset {})",
                    candidate, mac, network.name, offset
                );
                return Ok(candidate);
            }

            debug!(
                "Offset {} in {} taken concurrently (attempt {}/{})",
                offset, network.name, attempt, self.commit_attempts
            );
        }

        Err(Error::AllocationConflict {
            network: network.name.clone(),
            attempts: self.commit_attempts,
        })
    }
}

/// Reads the pool of `network`, ordered by offset.
///
/// Keys whose suffix is not a decimal offset are skipped.
pub async fn read_entries(store: &StoreClient, network: &str) -> Result<Vec<PoolEntry>> {
    let listed = store.list(&keys::pool_prefix(network)).await?;

    let mut entries: Vec<PoolEntry> = listed
        .into_iter()
        .filter_map(|entry| match keys::pool_offset(&entry.key) {
            Some(offset) => Some(PoolEntry {
                offset,
                mac: entry.value,
            }),
            None => {
                warn!("Ignoring pool key without numeric offset: {}", entry.key);
                None
            }
        })
        .collect();
    entries.sort_by_key(|entry| entry.offset);
    Ok(entries)
}

/// First offset not occupied at its own position, else the entry count.
///
/// `entries` must be sorted by offset.
pub fn free_offset(entries: &[PoolEntry]) -> u32 {
    entries
        .iter()
        .zip(0u32..)
        .find(|(entry, position)| entry.offset != *position)
        .map(|(_, position)| position)
        .unwrap_or_else(|| u32::try_from(entries.len()).unwrap_or(u32::MAX))
}

/// Offset already held by `mac`, if any.
pub fn existing_offset(entries: &[PoolEntry], mac: &str) -> Option<u32> {
    entries
        .iter()
        .find(|entry| entry.mac == mac)
        .map(|entry| entry.offset)
}

//! Lease allocation engine.
//!
//! Resolves a client MAC to an address and the options that go with it.
//! Static bindings are tried first; only a MAC without a usable static
//! binding is matched against the dynamic networks.
//!
//! # Failure Containment
//!
//! Nothing below [`LeaseEngine::allocate`] aborts a request. A broken
//! static binding falls through to dynamic resolution, a network that
//! fails to load or allocate is skipped, and a request that runs out of
//! time is abandoned. All of these end in [`NoAssignment`] when nothing
//! else succeeds, leaving the host to apply its own fallback.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::address;
use crate::error::{NoAssignment, Result};
use crate::network::{self, NetworkDescriptor};
use crate::options::{DhcpOption, build_options};
use crate::pool::PoolAllocator;
use crate::store::{Store, StoreClient, keys};

/// Time budgets and pool parameters for a [`LeaseEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Budget for each individual store call.
    pub store_timeout: Duration,
    /// Budget for a whole `allocate` call.
    pub request_timeout: Duration,
    /// Store-side expiry of new pool entries.
    pub pool_lease_ttl: Duration,
    /// Conditional pool writes tried before giving up.
    pub commit_attempts: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(2),
            pool_lease_ttl: Duration::from_secs(3600),
            commit_attempts: 3,
        }
    }
}

/// A resolved address with the options to send alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub address: Ipv4Addr,
    /// Network the address was resolved in.
    pub network: String,
    pub options: Vec<DhcpOption>,
}

impl Assignment {
    fn new(address: Ipv4Addr, network: &NetworkDescriptor) -> Self {
        Self {
            address,
            network: network.name.clone(),
            options: build_options(network),
        }
    }
}

/// Allocation engine shared by all requests.
///
/// Holds no per-request state; the store is the only thing concurrent
/// requests share. Cloning is cheap.
#[derive(Clone)]
pub struct LeaseEngine {
    store: StoreClient,
    pool: PoolAllocator,
    settings: EngineSettings,
    span: Span,
}

impl LeaseEngine {
    pub fn new(store: Arc<dyn Store>, settings: EngineSettings) -> Self {
        let store = StoreClient::new(store, settings.store_timeout);
        let pool = PoolAllocator::new(
            store.clone(),
            settings.pool_lease_ttl,
            settings.commit_attempts,
        );
        Self {
            store,
            pool,
            settings,
            span: info_span!("lease_engine"),
        }
    }

    /// Sets the span every request is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    pub fn pool(&self) -> &PoolAllocator {
        &self.pool
    }

    /// Resolves `mac`, static binding first, then the dynamic networks.
    ///
    /// `mac` must be in the form the bindings were written in, normally
    /// [`address::format_mac`] output. The whole call is bounded by the
    /// request timeout; on expiry outstanding store calls are dropped.
    pub async fn allocate(&self, mac: &str) -> std::result::Result<Assignment, NoAssignment> {
        let span = info_span!(parent: &self.span, "allocate", mac = %mac);

        async move {
            let resolve = async {
                match self.resolve_static(mac).await {
                    Some(assignment) => Some(assignment),
                    None => self.resolve_dynamic(mac).await,
                }
            };

            match tokio::time::timeout(self.settings.request_timeout, resolve).await {
                Ok(Some(assignment)) => Ok(assignment),
                Ok(None) => {
                    info!("No address for {}", mac);
                    Err(NoAssignment)
                }
                Err(_) => {
                    warn!(
                        "Allocation for {} abandoned after {:?}",
                        mac, self.settings.request_timeout
                    );
                    Err(NoAssignment)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Looks up the static binding of `mac`.
    ///
    /// Any failure along the way (no binding, no bound network, a network
    /// that does not load) is logged and reported as no binding.
    pub async fn resolve_static(&self, mac: &str) -> Option<Assignment> {
        match self.lookup_static(mac).await {
            Ok(Some(assignment)) => {
                info!(
                    "Static binding {} -> {} in {}",
                    mac, assignment.address, assignment.network
                );
                Some(assignment)
            }
            Ok(None) => None,
            Err(error) => {
                debug!("Static binding for {} unusable: {}", mac, error);
                None
            }
        }
    }

    async fn lookup_static(&self, mac: &str) -> Result<Option<Assignment>> {
        let Some(text) = self.store.get(&keys::static_ip4(mac)).await? else {
            debug!("No static binding for {}", mac);
            return Ok(None);
        };
        let address = address::parse_ipv4(&text)?;

        let Some(name) = self.store.get(&keys::static_network(mac)).await? else {
            debug!("Static binding for {} names no network", mac);
            return Ok(None);
        };
        let network = NetworkDescriptor::load(&self.store, &name).await?;

        Ok(Some(Assignment::new(address, &network)))
    }

    /// Allocates from the first dynamic network `mac` belongs to that can
    /// serve it.
    ///
    /// Networks are tried in listing order. One that fails to load, does
    /// not match, or cannot allocate is skipped.
    pub async fn resolve_dynamic(&self, mac: &str) -> Option<Assignment> {
        for name in network::list_networks(&self.store).await {
            let network = match NetworkDescriptor::load(&self.store, &name).await {
                Ok(network) => network,
                Err(error) => {
                    warn!("Skipping network {}: {}", name, error);
                    continue;
                }
            };

            if !mac_belongs_to_net(mac, &network) {
                continue;
            }

            match self.pool.allocate(&network, mac).await {
                Ok(address) => return Some(Assignment::new(address, &network)),
                Err(error) => {
                    warn!("Allocation for {} in {} failed: {}", mac, name, error);
                }
            }
        }
        None
    }
}

/// Whether `mac` falls inside the network's MAC range (bounds excluded) or
/// is listed verbatim among its members.
pub fn mac_belongs_to_net(mac: &str, network: &NetworkDescriptor) -> bool {
    let in_range = network
        .mac_range
        .is_some_and(|range| match address::mac_to_int(mac) {
            Ok(value) => range.contains(value),
            Err(error) => {
                debug!("{}: cannot range-match {}: {}", network.name, mac, error);
                false
            }
        });

    in_range
        || network
            .members
            .as_ref()
            .is_some_and(|members| members.iter().any(|member| member.mac == mac))
}

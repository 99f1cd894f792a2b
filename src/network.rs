//! Network descriptors loaded from the store.
//!
//! A [`NetworkDescriptor`] is a per-request snapshot of one network's
//! configuration. Only the subnet is required; every other property is
//! fetched and decoded independently, and a property that is missing or
//! fails to decode is simply left absent.
//!
//! # Loading Order
//!
//! The subnet is fetched first and alone, since nothing is usable without
//! it. The optional properties (domain, ranges, gateways, nameservers,
//! options, members) do not depend on each other and are fetched
//! concurrently.

use std::future::Future;
use std::net::Ipv4Addr;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::address::{self, IpRange, MacRange, Subnet};
use crate::error::{Error, Result};
use crate::store::{StoreClient, keys};

/// A DHCP option override configured on a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opt {
    /// DHCPv4 option code, 1..=254.
    pub number: u8,
    /// Raw text value, sent untouched.
    pub value: String,
}

impl Opt {
    pub fn new(number: u8, value: impl Into<String>) -> Self {
        Self {
            number,
            value: value.into(),
        }
    }
}

/// An explicit membership record.
///
/// Only `mac` is populated from the store today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub mac: String,
    pub ip4: Option<Ipv4Addr>,
    pub name: Option<String>,
}

impl Member {
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            ip4: None,
            name: None,
        }
    }
}

/// Snapshot of one named network's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub name: String,
    pub subnet: Subnet,

    pub domain: Option<String>,
    /// Dynamic pool. Offset `n` maps to `ip_range.begin + n`.
    pub ip_range: Option<IpRange>,
    pub mac_range: Option<MacRange>,
    /// Gateway addresses as stored; parsed per entry when options are built.
    pub gateways: Option<Vec<String>>,
    /// Name server addresses as stored; parsed per entry when options are built.
    pub nameservers: Option<Vec<String>>,
    pub options: Option<Vec<Opt>>,
    pub members: Option<Vec<Member>>,
}

impl NetworkDescriptor {
    /// A descriptor with every optional property absent.
    pub fn new(name: impl Into<String>, subnet: Subnet) -> Self {
        Self {
            name: name.into(),
            subnet,
            domain: None,
            ip_range: None,
            mac_range: None,
            gateways: None,
            nameservers: None,
            options: None,
            members: None,
        }
    }

    /// Loads the descriptor for `name` from the store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequiredField`] if the subnet cannot be
    /// fetched or is not `"<address>/<prefix>"`. Failures of optional
    /// properties are logged and leave the property absent.
    pub async fn load(store: &StoreClient, name: &str) -> Result<Self> {
        let subnet = load_subnet(store, name).await?;

        let (domain, ip_range, mac_range, gateways, nameservers, options, members) = tokio::join!(
            optional(name, "domain", load_domain(store, name)),
            optional(name, "ip4_range", load_ip_range(store, name)),
            optional(name, "mac_range", load_mac_range(store, name)),
            optional(name, "gateways", load_address_list(store, keys::gateways(name))),
            optional(name, "nameservers", load_address_list(store, keys::nameservers(name))),
            optional(name, "opts", load_options(store, name)),
            optional(name, "members", load_members(store, name)),
        );

        Ok(Self {
            name: name.to_string(),
            subnet,
            domain,
            ip_range,
            mac_range,
            gateways,
            nameservers,
            options,
            members,
        })
    }
}

/// Returns the names of all dynamic networks.
///
/// An absent key, a failed fetch or an undecodable value all yield an
/// empty list.
pub async fn list_networks(store: &StoreClient) -> Vec<String> {
    let text = match store.get(keys::NETWORKS).await {
        Ok(Some(text)) => text,
        Ok(None) => {
            debug!("No dynamic networks defined");
            return Vec::new();
        }
        Err(error) => {
            warn!("Failed to fetch network list: {}", error);
            return Vec::new();
        }
    };

    match decode::<Vec<String>>(keys::NETWORKS, &text) {
        Ok(names) => names,
        Err(error) => {
            warn!("Failed to decode network list: {}", error);
            Vec::new()
        }
    }
}

async fn load_subnet(store: &StoreClient, name: &str) -> Result<Subnet> {
    let missing = |reason: String| Error::MissingRequiredField {
        network: name.to_string(),
        field: "subnet4",
        reason,
    };

    let text = store
        .get(&keys::subnet(name))
        .await
        .map_err(|error| missing(error.to_string()))?
        .ok_or_else(|| missing("not set".to_string()))?;

    text.parse::<Subnet>()
        .map_err(|error| missing(error.to_string()))
}

/// Runs one optional property loader, folding failure into absence.
async fn optional<T>(
    network: &str,
    field: &'static str,
    load: impl Future<Output = Result<Option<T>>>,
) -> Option<T> {
    match load.await {
        Ok(Some(value)) => Some(value),
        Ok(None) => {
            debug!("{}: {} property not set", network, field);
            None
        }
        Err(error) => {
            let error = Error::OptionalFieldUnavailable {
                network: network.to_string(),
                field,
                reason: error.to_string(),
            };
            debug!("{}", error);
            None
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|error| Error::InvalidFormat(format!("{}: {}", key, error)))
}

/// Stored form of `ip4_range` and `mac_range`.
#[derive(Debug, Deserialize)]
struct RangeText {
    #[serde(default)]
    begin: String,
    #[serde(default)]
    end: String,
}

impl RangeText {
    fn bounds(&self, key: &str) -> Result<(&str, &str)> {
        if self.begin.is_empty() || self.end.is_empty() {
            return Err(Error::InvalidFormat(format!("{}: empty range bound", key)));
        }
        Ok((&self.begin, &self.end))
    }
}

/// Stored form of one `opts` entry.
#[derive(Debug, Deserialize)]
struct OptText {
    #[serde(default)]
    number: i64,
    #[serde(default)]
    value: String,
}

async fn load_domain(store: &StoreClient, name: &str) -> Result<Option<String>> {
    store.get(&keys::domain(name)).await
}

async fn load_ip_range(store: &StoreClient, name: &str) -> Result<Option<IpRange>> {
    let key = keys::ip_range(name);
    let Some(text) = store.get(&key).await? else {
        return Ok(None);
    };

    let range: RangeText = decode(&key, &text)?;
    let (begin, end) = range.bounds(&key)?;
    Ok(Some(IpRange::new(
        address::parse_ipv4(begin)?,
        address::parse_ipv4(end)?,
    )))
}

async fn load_mac_range(store: &StoreClient, name: &str) -> Result<Option<MacRange>> {
    let key = keys::mac_range(name);
    let Some(text) = store.get(&key).await? else {
        return Ok(None);
    };

    let range: RangeText = decode(&key, &text)?;
    let (begin, end) = range.bounds(&key)?;
    Ok(Some(MacRange::new(
        address::mac_to_int(begin)?,
        address::mac_to_int(end)?,
    )))
}

async fn load_address_list(store: &StoreClient, key: String) -> Result<Option<Vec<String>>> {
    let Some(text) = store.get(&key).await? else {
        return Ok(None);
    };
    decode(&key, &text).map(Some)
}

async fn load_options(store: &StoreClient, name: &str) -> Result<Option<Vec<Opt>>> {
    let key = keys::options(name);
    let Some(text) = store.get(&key).await? else {
        return Ok(None);
    };

    let entries: Vec<OptText> = decode(&key, &text)?;
    let options = entries
        .into_iter()
        .filter(|entry| entry.number != 0 && !entry.value.is_empty())
        .filter_map(|entry| match u8::try_from(entry.number) {
            Ok(number) if number != u8::MAX => Some(Opt::new(number, entry.value)),
            _ => {
                debug!("{}: dropping option {}, not a DHCPv4 code", name, entry.number);
                None
            }
        })
        .collect();
    Ok(Some(options))
}

async fn load_members(store: &StoreClient, name: &str) -> Result<Option<Vec<Member>>> {
    let listed = store.list(&keys::members_prefix(name)).await?;
    if listed.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        listed
            .into_iter()
            .map(|entry| Member::new(entry.value))
            .collect(),
    ))
}

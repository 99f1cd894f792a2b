//! Writing network state into the store.
//!
//! The engine only ever reads networks; this module is how they get there.
//! A [`Topology`] file describes networks and their members, and [`Admin`]
//! writes it out in the key layout of [`crate::store::keys`]. The smaller
//! operations (members, static bindings, network removal) cover day-to-day
//! changes without re-applying a whole topology.
//!
//! Updates to the `nets` list are read-modify-write and assume a single
//! administrator at a time.

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::address::{self, Subnet};
use crate::error::{Error, Result};
use crate::network;
use crate::pool::{self, PoolEntry};
use crate::store::{StoreClient, keys};

/// A set of networks to write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub networks: Vec<NetworkSpec>,
}

impl Topology {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let topology: Topology = serde_json::from_str(&content)?;
        Ok(topology)
    }
}

/// A `{begin, end}` pair, stored as-is for `ip4_range` and `mac_range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub begin: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptSpec {
    pub number: u8,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSpec {
    pub mac: String,
    /// Writes a static binding for this member into this network.
    #[serde(default)]
    pub ip4: Option<Ipv4Addr>,
    /// Host name, indexed so [`Admin::resolve_name`] can find the member.
    #[serde(default)]
    pub name: Option<String>,
}

/// One network in a [`Topology`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub name: String,
    pub subnet4: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub range4: Option<RangeSpec>,
    #[serde(default)]
    pub mac_range: Option<RangeSpec>,
    #[serde(default)]
    pub gateways: Option<Vec<String>>,
    #[serde(default)]
    pub nameservers: Option<Vec<String>>,
    #[serde(default)]
    pub opts: Option<Vec<OptSpec>>,
    #[serde(default)]
    pub members: Vec<MemberSpec>,
    /// Listed under `nets` and so eligible for dynamic allocation.
    #[serde(default = "default_dynamic")]
    pub dynamic: bool,
}

fn default_dynamic() -> bool {
    true
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>, subnet4: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subnet4: subnet4.into(),
            domain: None,
            range4: None,
            mac_range: None,
            gateways: None,
            nameservers: None,
            opts: None,
            members: Vec::new(),
            dynamic: true,
        }
    }

    /// Rejects text the engine could not read back.
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| Error::InvalidConfig(format!("{}: {}", self.name, detail));

        if self.name.is_empty() || self.name.contains('/') {
            return Err(invalid("network name must be non-empty without '/'".to_string()));
        }

        self.subnet4
            .parse::<Subnet>()
            .map_err(|error| invalid(error.to_string()))?;

        if let Some(range) = &self.range4 {
            address::parse_ipv4(&range.begin).map_err(|error| invalid(error.to_string()))?;
            address::parse_ipv4(&range.end).map_err(|error| invalid(error.to_string()))?;
        }

        if let Some(range) = &self.mac_range {
            address::mac_to_int(&range.begin).map_err(|error| invalid(error.to_string()))?;
            address::mac_to_int(&range.end).map_err(|error| invalid(error.to_string()))?;
        }

        if let Some(opts) = &self.opts
            && let Some(opt) = opts.iter().find(|opt| opt.number == 0 || opt.number == u8::MAX)
        {
            return Err(invalid(format!("option number {} is reserved", opt.number)));
        }

        for member in &self.members {
            address::mac_to_int(&member.mac).map_err(|error| invalid(error.to_string()))?;
            if let Some(name) = &member.name
                && (name.is_empty() || name.contains('/'))
            {
                return Err(invalid(format!("member name {:?} is not a valid host name", name)));
            }
        }

        Ok(())
    }
}

/// Store-side administration.
#[derive(Clone)]
pub struct Admin {
    store: StoreClient,
}

impl Admin {
    pub fn new(store: StoreClient) -> Self {
        Self { store }
    }

    /// Validates every network, then writes them in order.
    pub async fn apply(&self, topology: &Topology) -> Result<()> {
        for spec in &topology.networks {
            spec.validate()?;
        }
        for spec in &topology.networks {
            self.apply_network(spec).await?;
        }
        Ok(())
    }

    /// Writes one network.
    ///
    /// Optional properties left out of `spec` are removed from the store,
    /// so re-applying an edited spec drops what was taken out. Members and
    /// pool entries are only ever added.
    pub async fn apply_network(&self, spec: &NetworkSpec) -> Result<()> {
        spec.validate()?;
        let name = spec.name.as_str();

        self.store.put(&keys::subnet(name), &spec.subnet4).await?;
        self.put_or_delete(&keys::domain(name), spec.domain.clone())
            .await?;
        self.put_or_delete(&keys::ip_range(name), json(&spec.range4)?)
            .await?;
        self.put_or_delete(&keys::mac_range(name), json(&spec.mac_range)?)
            .await?;
        self.put_or_delete(&keys::gateways(name), json(&spec.gateways)?)
            .await?;
        self.put_or_delete(&keys::nameservers(name), json(&spec.nameservers)?)
            .await?;
        self.put_or_delete(&keys::options(name), json(&spec.opts)?)
            .await?;

        for member in &spec.members {
            self.add_member(name, &member.mac).await?;
            if let Some(ip4) = member.ip4 {
                self.bind_static(&member.mac, ip4, name).await?;
            }
            if let Some(host) = &member.name {
                self.name_member(host, &member.mac).await?;
            }
        }

        if spec.dynamic {
            self.list_network(name).await?;
        } else {
            self.unlist_network(name).await?;
        }

        info!(
            "Applied network {} ({} members, dynamic: {})",
            name,
            spec.members.len(),
            spec.dynamic
        );
        Ok(())
    }

    pub async fn add_member(&self, network: &str, mac: &str) -> Result<()> {
        address::mac_to_int(mac)?;
        self.store.put(&keys::member(network, mac), mac).await?;
        debug!("Added member {} to {}", mac, network);
        Ok(())
    }

    /// Returns whether the member existed.
    pub async fn remove_member(&self, network: &str, mac: &str) -> Result<bool> {
        self.store.delete(&keys::member(network, mac)).await
    }

    pub async fn members(&self, network: &str) -> Result<Vec<String>> {
        let listed = self.store.list(&keys::members_prefix(network)).await?;
        Ok(listed.into_iter().map(|entry| entry.value).collect())
    }

    /// Binds `mac` to `address` in `network`, ahead of any dynamic pool.
    pub async fn bind_static(&self, mac: &str, address: Ipv4Addr, network: &str) -> Result<()> {
        self.store
            .put(&keys::static_ip4(mac), &address.to_string())
            .await?;
        self.store.put(&keys::static_network(mac), network).await?;
        debug!("Bound {} to {} in {}", mac, address, network);
        Ok(())
    }

    /// Returns whether a binding existed.
    pub async fn unbind_static(&self, mac: &str) -> Result<bool> {
        let address = self.store.delete(&keys::static_ip4(mac)).await?;
        let network = self.store.delete(&keys::static_network(mac)).await?;
        Ok(address || network)
    }

    /// Points the host name `name` at `mac`, replacing any earlier owner.
    pub async fn name_member(&self, name: &str, mac: &str) -> Result<()> {
        address::mac_to_int(mac)?;
        self.store.put(&keys::name(name), mac).await?;
        debug!("Named {} {}", mac, name);
        Ok(())
    }

    /// Follows a host name to its MAC, then to that MAC's static address.
    ///
    /// `Ok(None)` when the name is unknown or its MAC has no usable binding.
    /// Pool addresses are not considered.
    pub async fn resolve_name(&self, name: &str) -> Result<Option<Ipv4Addr>> {
        let Some(mac) = self.store.get(&keys::name(name)).await? else {
            debug!("No member is named {}", name);
            return Ok(None);
        };
        let Some(text) = self.store.get(&keys::static_ip4(&mac)).await? else {
            debug!("{} ({}) has no static address", name, mac);
            return Ok(None);
        };
        match address::parse_ipv4(&text) {
            Ok(address) => {
                info!("Resolved {} to {} via {}", name, address, mac);
                Ok(Some(address))
            }
            Err(error) => {
                debug!("{} ({}): unreadable binding: {}", name, mac, error);
                Ok(None)
            }
        }
    }

    /// Removes every key of `name`, pool included, and unlists it.
    ///
    /// Static bindings pointing at the network are left in place; they stop
    /// resolving once the network is gone.
    pub async fn delete_network(&self, name: &str) -> Result<usize> {
        self.unlist_network(name).await?;
        let removed = self
            .store
            .delete_prefix(&keys::network_prefix(name))
            .await?;
        info!("Deleted network {} ({} keys)", name, removed);
        Ok(removed)
    }

    pub async fn networks(&self) -> Vec<String> {
        network::list_networks(&self.store).await
    }

    pub async fn pool_entries(&self, name: &str) -> Result<Vec<PoolEntry>> {
        pool::read_entries(&self.store, name).await
    }

    async fn put_or_delete(&self, key: &str, value: Option<String>) -> Result<()> {
        match value {
            Some(value) => self.store.put(key, &value).await,
            None => self.store.delete(key).await.map(|_| ()),
        }
    }

    /// Reads `nets` strictly; a corrupt list is not silently replaced.
    async fn listed_networks(&self) -> Result<Vec<String>> {
        match self.store.get(keys::NETWORKS).await? {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(Vec::new()),
        }
    }

    async fn list_network(&self, name: &str) -> Result<()> {
        let mut names = self.listed_networks().await?;
        if names.iter().any(|listed| listed == name) {
            return Ok(());
        }
        names.push(name.to_string());
        self.store
            .put(keys::NETWORKS, &serde_json::to_string(&names)?)
            .await
    }

    async fn unlist_network(&self, name: &str) -> Result<()> {
        let mut names = self.listed_networks().await?;
        let before = names.len();
        names.retain(|listed| listed != name);
        if names.len() == before {
            return Ok(());
        }
        self.store
            .put(keys::NETWORKS, &serde_json::to_string(&names)?)
            .await
    }
}

fn json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value
        .as_ref()
        .map(|value| serde_json::to_string(value).map_err(Error::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::engine::{EngineSettings, LeaseEngine};
    use crate::network::{NetworkDescriptor, Opt};
    use crate::store::{MemoryStore, Store};

    struct TestGuard(String);
    impl Drop for TestGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn setup() -> (Arc<MemoryStore>, Admin, StoreClient) {
        let store = Arc::new(MemoryStore::new());
        let client = StoreClient::new(store.clone(), Duration::from_secs(1));
        (store, Admin::new(client.clone()), client)
    }

    fn lab_spec() -> NetworkSpec {
        NetworkSpec {
            domain: Some("lab.example".to_string()),
            range4: Some(RangeSpec {
                begin: "10.0.0.10".to_string(),
                end: "10.0.0.20".to_string(),
            }),
            gateways: Some(vec!["10.0.0.1".to_string()]),
            opts: Some(vec![OptSpec {
                number: 66,
                value: "tftp.lab".to_string(),
            }]),
            members: vec![
                MemberSpec {
                    mac: "00:00:11:11:00:01".to_string(),
                    ip4: None,
                    name: Some("whiskey".to_string()),
                },
                MemberSpec {
                    mac: "00:00:22:22:00:01".to_string(),
                    ip4: Some(Ipv4Addr::new(10, 0, 0, 5)),
                    name: Some("tango".to_string()),
                },
            ],
            ..NetworkSpec::new("lab", "10.0.0.0/24")
        }
    }

    #[tokio::test]
    async fn test_apply_round_trips_through_loader() {
        let (store, admin, client) = setup();
        admin
            .apply(&Topology {
                networks: vec![lab_spec()],
            })
            .await
            .unwrap();

        assert_eq!(store.get("nets").await.unwrap(), Some(r#"["lab"]"#.to_string()));
        assert_eq!(
            store.get("00:00:22:22:00:01/ip4").await.unwrap(),
            Some("10.0.0.5".to_string())
        );
        assert_eq!(
            store.get("00:00:22:22:00:01/net").await.unwrap(),
            Some("lab".to_string())
        );

        let network = NetworkDescriptor::load(&client, "lab").await.unwrap();
        assert_eq!(network.domain.as_deref(), Some("lab.example"));
        assert_eq!(network.options, Some(vec![Opt::new(66, "tftp.lab")]));
        assert_eq!(network.members.map(|members| members.len()), Some(2));
        assert!(network.mac_range.is_none());
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent_and_prunes() {
        let (store, admin, _) = setup();
        let mut spec = lab_spec();
        admin.apply_network(&spec).await.unwrap();
        admin.apply_network(&spec).await.unwrap();
        assert_eq!(admin.networks().await, vec!["lab"]);

        spec.domain = None;
        admin.apply_network(&spec).await.unwrap();
        assert_eq!(store.get("net/lab/domain").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_static_only_network_is_unlisted() {
        let (_, admin, _) = setup();
        admin.apply_network(&lab_spec()).await.unwrap();

        let spec = NetworkSpec {
            dynamic: false,
            ..lab_spec()
        };
        admin.apply_network(&spec).await.unwrap();
        assert!(admin.networks().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_validates_before_writing() {
        let (store, admin, _) = setup();
        let topology = Topology {
            networks: vec![lab_spec(), NetworkSpec::new("bad", "10.0.0.0")],
        };

        assert!(matches!(
            admin.apply(&topology).await,
            Err(Error::InvalidConfig(_))
        ));
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_spec_validation() {
        assert!(lab_spec().validate().is_ok());
        assert!(NetworkSpec::new("a/b", "10.0.0.0/8").validate().is_err());
        assert!(NetworkSpec::new("", "10.0.0.0/8").validate().is_err());

        let mut spec = lab_spec();
        spec.mac_range = Some(RangeSpec {
            begin: "zz".to_string(),
            end: "ff".to_string(),
        });
        assert!(spec.validate().is_err());

        let mut spec = lab_spec();
        spec.opts = Some(vec![OptSpec {
            number: 0,
            value: "x".to_string(),
        }]);
        assert!(spec.validate().is_err());

        let mut spec = lab_spec();
        spec.members[0].name = Some("a/b".to_string());
        assert!(spec.validate().is_err());
    }

    #[tokio::test]
    async fn test_resolve_name_follows_index_to_binding() {
        let (store, admin, _) = setup();
        admin.apply_network(&lab_spec()).await.unwrap();

        assert_eq!(
            store.get("name/tango").await.unwrap(),
            Some("00:00:22:22:00:01".to_string())
        );
        assert_eq!(
            admin.resolve_name("tango").await.unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );

        // Named, but no static binding.
        assert_eq!(
            store.get("name/whiskey").await.unwrap(),
            Some("00:00:11:11:00:01".to_string())
        );
        assert_eq!(admin.resolve_name("whiskey").await.unwrap(), None);
        assert_eq!(admin.resolve_name("nobody").await.unwrap(), None);

        admin.unbind_static("00:00:22:22:00:01").await.unwrap();
        assert_eq!(admin.resolve_name("tango").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_resolve_name_ignores_unreadable_binding() {
        let (store, admin, _) = setup();
        admin.name_member("echo", "00:00:33:33:00:01").await.unwrap();
        store.put("00:00:33:33:00:01/ip4", "10.0.0").await.unwrap();

        assert_eq!(admin.resolve_name("echo").await.unwrap(), None);
        assert!(admin.name_member("echo", "bogus").await.is_err());
    }

    #[tokio::test]
    async fn test_members_and_bindings() {
        let (store, admin, _) = setup();
        admin.add_member("lab", "aa:bb:cc:dd:ee:ff").await.unwrap();
        assert_eq!(admin.members("lab").await.unwrap(), vec!["aa:bb:cc:dd:ee:ff"]);
        assert!(admin.add_member("lab", "bogus").await.is_err());

        assert!(admin.remove_member("lab", "aa:bb:cc:dd:ee:ff").await.unwrap());
        assert!(!admin.remove_member("lab", "aa:bb:cc:dd:ee:ff").await.unwrap());

        admin
            .bind_static("aa:bb:cc:dd:ee:ff", Ipv4Addr::new(10, 0, 0, 9), "lab")
            .await
            .unwrap();
        assert_eq!(store.len().await, 2);
        assert!(admin.unbind_static("aa:bb:cc:dd:ee:ff").await.unwrap());
        assert!(!admin.unbind_static("aa:bb:cc:dd:ee:ff").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_network() {
        let (store, admin, client) = setup();
        admin.apply_network(&lab_spec()).await.unwrap();
        admin
            .apply_network(&NetworkSpec::new("lab2", "10.2.0.0/16"))
            .await
            .unwrap();

        let engine = LeaseEngine::new(store.clone(), EngineSettings::default());
        engine.allocate("00:00:11:11:00:01").await.unwrap();
        assert_eq!(admin.pool_entries("lab").await.unwrap().len(), 1);

        assert!(admin.delete_network("lab").await.unwrap() > 0);
        assert_eq!(admin.networks().await, vec!["lab2"]);
        assert!(client.list("net/lab/").await.unwrap().is_empty());
        assert!(admin.pool_entries("lab").await.unwrap().is_empty());
        assert!(store.get("net/lab2/subnet4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_topology_file() {
        let path = "test_admin_topology.json".to_string();
        let _guard = TestGuard(path.clone());
        std::fs::write(
            &path,
            r#"{"networks":[{"name":"mini","subnet4":"10.0.0.0/24",
                "range4":{"begin":"10.0.0.0","end":"10.0.0.254"},
                "members":[{"mac":"00:00:11:11:00:01","name":"whiskey"}]}]}"#,
        )
        .unwrap();

        let topology = Topology::load(&path).await.unwrap();
        assert_eq!(topology.networks.len(), 1);
        let spec = &topology.networks[0];
        assert!(spec.dynamic);
        assert_eq!(spec.members[0].name.as_deref(), Some("whiskey"));
        assert_eq!(spec.gateways, None);
    }
}

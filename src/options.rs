//! DHCP options attached to an assignment.
//!
//! Every assignment carries the subnet mask of its network, plus routers,
//! name servers and per-network custom options when the network defines
//! them. Options are attached to the outgoing packet verbatim, replacing
//! any option with the same code the host already put there.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions

use std::fmt;
use std::net::Ipv4Addr;

use tracing::debug;

use crate::address;
use crate::network::NetworkDescriptor;

/// Maximum number of IP addresses in Router (3) or DNS Server (6) options.
///
/// Options have a 1-byte length field, so maximum data is 255 bytes.
/// With 4 bytes per IPv4 address, that's 63 addresses maximum.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

/// Option codes with a dedicated [`DhcpOption`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
}

/// An option ready to be attached to a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Router/gateway addresses (Option 3). First address is the default gateway.
    Router(Vec<Ipv4Addr>),
    /// DNS server addresses (Option 6).
    DnsServer(Vec<Ipv4Addr>),
    /// Network-defined option with its text value sent as-is.
    Custom(u8, String),
}

impl DhcpOption {
    /// Returns the RFC 2132 option code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::Custom(code, _) => *code,
        }
    }

    /// Option payload, without code and length.
    pub fn data(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr) => addr.octets().to_vec(),
            Self::Router(addrs) | Self::DnsServer(addrs) => addrs
                .iter()
                .take(MAX_ADDRESSES_PER_OPTION)
                .flat_map(|addr| addr.octets())
                .collect(),
            Self::Custom(_, value) => {
                let bytes = value.as_bytes();
                bytes[..bytes.len().min(255)].to_vec()
            }
        }
    }

    /// Encodes the option to its wire format (code + length + data).
    pub fn encode(&self) -> Vec<u8> {
        let data = self.data();
        let mut result = Vec::with_capacity(data.len() + 2);
        result.push(self.option_code());
        result.push(data.len() as u8);
        result.extend_from_slice(&data);
        result
    }
}

impl fmt::Display for DhcpOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(addrs: &[Ipv4Addr]) -> String {
            addrs
                .iter()
                .map(Ipv4Addr::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }

        match self {
            Self::SubnetMask(addr) => write!(f, "subnet-mask {}", addr),
            Self::Router(addrs) => write!(f, "routers [{}]", join(addrs)),
            Self::DnsServer(addrs) => write!(f, "domain-name-servers [{}]", join(addrs)),
            Self::Custom(code, value) => write!(f, "option {} {:?}", code, value),
        }
    }
}

/// Builds the options for an assignment from `network`.
///
/// Order is fixed: subnet mask, routers, name servers, then custom options
/// in the order the network lists them. Unparsable gateway or name server
/// entries are skipped one by one; the option itself is still emitted.
pub fn build_options(network: &NetworkDescriptor) -> Vec<DhcpOption> {
    let mut options = vec![DhcpOption::SubnetMask(network.subnet.mask_addr())];

    if let Some(gateways) = &network.gateways {
        options.push(DhcpOption::Router(parse_addresses(
            &network.name,
            "gateway",
            gateways,
        )));
    }

    if let Some(nameservers) = &network.nameservers {
        options.push(DhcpOption::DnsServer(parse_addresses(
            &network.name,
            "nameserver",
            nameservers,
        )));
    }

    if let Some(custom) = &network.options {
        options.extend(
            custom
                .iter()
                .map(|opt| DhcpOption::Custom(opt.number, opt.value.clone())),
        );
    }

    options
}

fn parse_addresses(network: &str, kind: &str, entries: &[String]) -> Vec<Ipv4Addr> {
    entries
        .iter()
        .filter_map(|entry| match address::parse_ipv4(entry) {
            Ok(addr) => Some(addr),
            Err(error) => {
                debug!("{}: skipping {} entry: {}", network, kind, error);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Opt;

    fn network() -> NetworkDescriptor {
        NetworkDescriptor::new("lab", "192.168.1.0/24".parse().unwrap())
    }

    #[test]
    fn test_subnet_only_emits_mask() {
        assert_eq!(
            build_options(&network()),
            vec![DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 255, 0))]
        );
    }

    #[test]
    fn test_option_order() {
        let mut net = network();
        net.options = Some(vec![Opt::new(66, "tftp.lab"), Opt::new(67, "boot.efi")]);
        net.nameservers = Some(vec!["192.168.1.2".to_string()]);
        net.gateways = Some(vec!["192.168.1.1".to_string()]);

        let codes: Vec<u8> = build_options(&net)
            .iter()
            .map(DhcpOption::option_code)
            .collect();
        assert_eq!(codes, vec![1, 3, 6, 66, 67]);
    }

    #[test]
    fn test_invalid_addresses_skipped_per_entry() {
        let mut net = network();
        net.gateways = Some(vec![
            "192.168.1.1".to_string(),
            "not-an-ip".to_string(),
            "192.168.1.254".to_string(),
        ]);
        net.nameservers = Some(vec!["300.1.1.1".to_string()]);

        let options = build_options(&net);
        assert_eq!(
            options[1],
            DhcpOption::Router(vec![
                Ipv4Addr::new(192, 168, 1, 1),
                Ipv4Addr::new(192, 168, 1, 254)
            ])
        );
        assert_eq!(options[2], DhcpOption::DnsServer(vec![]));
    }

    #[test]
    fn test_custom_value_untouched() {
        let mut net = network();
        net.options = Some(vec![Opt::new(252, "http://wpad/ proxy.pac ")]);

        let options = build_options(&net);
        assert_eq!(
            options[1],
            DhcpOption::Custom(252, "http://wpad/ proxy.pac ".to_string())
        );
        assert_eq!(options[1].data(), b"http://wpad/ proxy.pac ".to_vec());
    }

    #[test]
    fn test_encode() {
        assert_eq!(
            DhcpOption::SubnetMask(Ipv4Addr::new(255, 255, 0, 0)).encode(),
            vec![1, 4, 255, 255, 0, 0]
        );
        assert_eq!(
            DhcpOption::Router(vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)])
                .encode(),
            vec![3, 8, 10, 0, 0, 1, 10, 0, 0, 2]
        );
        assert_eq!(
            DhcpOption::Custom(66, "tftp".to_string()).encode(),
            vec![66, 4, b't', b'f', b't', b'p']
        );
    }

    #[test]
    fn test_encode_clamps_address_lists() {
        let addrs = vec![Ipv4Addr::new(10, 0, 0, 1); 70];
        let encoded = DhcpOption::DnsServer(addrs).encode();
        assert_eq!(encoded[1] as usize, MAX_ADDRESSES_PER_OPTION * 4);
        assert_eq!(encoded.len(), 2 + MAX_ADDRESSES_PER_OPTION * 4);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DhcpOption::Router(vec![Ipv4Addr::new(10, 0, 0, 1)]).to_string(),
            "routers [10.0.0.1]"
        );
        assert_eq!(
            DhcpOption::Custom(66, "tftp".to_string()).to_string(),
            "option 66 \"tftp\""
        );
    }
}

//! Parsing and arithmetic over IPv4 addresses, MAC addresses and CIDR subnets.
//!
//! Everything here is pure. MAC addresses are handled as 48-bit unsigned
//! integers once parsed; the textual form is only ever colon-stripped, never
//! otherwise normalized.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Largest value a 48-bit hardware address can take.
const MAC_MAX: u64 = (1 << 48) - 1;

/// Longest IPv4 prefix.
pub const MAX_PREFIX: u8 = 32;

/// Parses a MAC address as a 48-bit unsigned integer.
///
/// Colons are stripped and the remaining digits are read as hexadecimal.
/// Digit case does not matter to the integer value.
///
/// # Errors
///
/// Returns [`Error::InvalidFormat`] on empty or non-hex input, or when the
/// value does not fit in 48 bits.
pub fn mac_to_int(text: &str) -> Result<u64> {
    let digits: String = text.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidFormat(format!("invalid MAC address: {text}")));
    }

    let value = u64::from_str_radix(&digits, 16)
        .map_err(|_| Error::InvalidFormat(format!("MAC address out of range: {text}")))?;
    if value > MAC_MAX {
        return Err(Error::InvalidFormat(format!(
            "MAC address wider than 48 bits: {text}"
        )));
    }
    Ok(value)
}

/// Renders hardware address bytes as lowercase, colon-separated hex.
///
/// This is the text form the host hands to the engine, and therefore the
/// form static bindings and member records must use.
pub fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parses dotted-quad IPv4 text.
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr> {
    text.parse::<Ipv4Addr>()
        .map_err(|_| Error::InvalidFormat(format!("invalid IPv4 address: {text}")))
}

/// Parses dotted-quad IPv4 text into network-order bytes.
pub fn ipv4_to_bytes(text: &str) -> Result<[u8; 4]> {
    parse_ipv4(text).map(|addr| addr.octets())
}

/// Returns `base + offset`, or `None` if that wraps past 255.255.255.255.
pub fn ipv4_from_offset(base: Ipv4Addr, offset: u32) -> Option<Ipv4Addr> {
    u32::from(base).checked_add(offset).map(Ipv4Addr::from)
}

/// Returns a mask with the top `prefix` bits set.
///
/// Prefixes above 32 are treated as 32.
pub fn subnet_mask(prefix: u8) -> u32 {
    let prefix = prefix.min(MAX_PREFIX) as u32;
    u32::MAX.checked_shl(32 - prefix).unwrap_or(0)
}

/// An IPv4 subnet in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    pub address: Ipv4Addr,
    pub prefix: u8,
}

impl Subnet {
    /// Builds a subnet, rejecting prefixes above 32.
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > MAX_PREFIX {
            return Err(Error::InvalidFormat(format!(
                "prefix {prefix} exceeds {MAX_PREFIX}"
            )));
        }
        Ok(Self { address, prefix })
    }

    pub fn mask(&self) -> u32 {
        subnet_mask(self.prefix)
    }

    /// The mask rendered as an address, as carried by the subnet-mask option.
    pub fn mask_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask())
    }
}

impl FromStr for Subnet {
    type Err = Error;

    /// Parses `"<address>/<prefix>"`. Parts after the second are ignored.
    fn from_str(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.split('/').collect();
        if parts.len() < 2 {
            return Err(Error::InvalidFormat(format!("invalid subnet: {text}")));
        }

        let address = parse_ipv4(parts[0])?;
        let prefix = parts[1]
            .parse::<u8>()
            .map_err(|_| Error::InvalidFormat(format!("invalid subnet prefix: {text}")))?;
        Self::new(address, prefix)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// An inclusive range of IPv4 addresses backing a dynamic pool.
///
/// `begin <= end` is not enforced; an inverted range simply has no usable
/// offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    pub begin: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl IpRange {
    pub fn new(begin: Ipv4Addr, end: Ipv4Addr) -> Self {
        Self { begin, end }
    }

    /// The address for pool `offset`, or `None` when it falls past `end`.
    pub fn address_at(&self, offset: u32) -> Option<Ipv4Addr> {
        ipv4_from_offset(self.begin, offset).filter(|candidate| *candidate <= self.end)
    }
}

/// A range of MAC addresses, compared as 48-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacRange {
    pub begin: u64,
    pub end: u64,
}

impl MacRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// Strictly exclusive on both bounds: a MAC equal to `begin` or `end`
    /// is outside the range.
    pub fn contains(&self, mac: u64) -> bool {
        self.begin < mac && mac < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_to_int() {
        assert_eq!(mac_to_int("00:00:00:00:00:01").unwrap(), 1);
        assert_eq!(mac_to_int("aa:bb:cc:dd:ee:ff").unwrap(), 0xaabb_ccdd_eeff);
        assert_eq!(mac_to_int("aabbccddeeff").unwrap(), 0xaabb_ccdd_eeff);
        assert_eq!(mac_to_int("AA:BB:CC:DD:EE:FF").unwrap(), 0xaabb_ccdd_eeff);
    }

    #[test]
    fn test_mac_to_int_rejects_garbage() {
        assert!(mac_to_int("").is_err());
        assert!(mac_to_int(":::").is_err());
        assert!(mac_to_int("aa-bb-cc-dd-ee-ff").is_err());
        assert!(mac_to_int("zz:bb:cc:dd:ee:ff").is_err());
        assert!(mac_to_int("+a:bb").is_err());
    }

    #[test]
    fn test_mac_to_int_rejects_wide_values() {
        assert!(mac_to_int("01:00:00:00:00:00:00").is_err());
        assert!(mac_to_int("ffffffffffffffffffff").is_err());
        assert_eq!(mac_to_int("ff:ff:ff:ff:ff:ff").unwrap(), MAC_MAX);
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(
            format_mac(&[0xaa, 0xbb, 0x0c, 0xdd, 0xee, 0x01]),
            "aa:bb:0c:dd:ee:01"
        );
        assert_eq!(format_mac(&[]), "");
    }

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_ipv4("10.0.0.1").unwrap(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ipv4_to_bytes("10.0.0.1").unwrap(), [10, 0, 0, 1]);
        assert!(parse_ipv4("10.0.0").is_err());
        assert!(parse_ipv4("10.0.0.256").is_err());
        assert!(parse_ipv4(" 10.0.0.1").is_err());
    }

    #[test]
    fn test_ipv4_from_offset() {
        let base = Ipv4Addr::new(10, 0, 0, 250);
        assert_eq!(ipv4_from_offset(base, 10), Some(Ipv4Addr::new(10, 0, 1, 4)));
        assert_eq!(ipv4_from_offset(Ipv4Addr::BROADCAST, 1), None);
    }

    #[test]
    fn test_subnet_mask() {
        assert_eq!(subnet_mask(0), 0);
        assert_eq!(subnet_mask(8), 0xff00_0000);
        assert_eq!(subnet_mask(24), 0xffff_ff00);
        assert_eq!(subnet_mask(32), u32::MAX);
        assert_eq!(subnet_mask(40), u32::MAX);
    }

    #[test]
    fn test_subnet_parse() {
        let subnet: Subnet = "192.168.1.0/24".parse().unwrap();
        assert_eq!(subnet.address, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(subnet.prefix, 24);
        assert_eq!(subnet.mask_addr(), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(subnet.to_string(), "192.168.1.0/24");

        assert!("192.168.1.0".parse::<Subnet>().is_err());
        assert!("192.168.1.0/33".parse::<Subnet>().is_err());
        assert!("192.168.1.0/x".parse::<Subnet>().is_err());
        assert!("nope/24".parse::<Subnet>().is_err());
        assert!("10.0.0.0/8/extra".parse::<Subnet>().is_ok());
    }

    #[test]
    fn test_ip_range_address_at() {
        let range = IpRange::new(Ipv4Addr::new(10, 0, 0, 0), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(range.address_at(0), Some(Ipv4Addr::new(10, 0, 0, 0)));
        assert_eq!(range.address_at(1), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(range.address_at(2), None);

        let inverted = IpRange::new(Ipv4Addr::new(10, 0, 0, 5), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(inverted.address_at(0), None);
    }

    #[test]
    fn test_mac_range_is_exclusive() {
        let range = MacRange::new(10, 12);
        assert!(!range.contains(10));
        assert!(range.contains(11));
        assert!(!range.contains(12));
    }
}

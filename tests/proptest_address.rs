use std::net::Ipv4Addr;

use proptest::prelude::*;

use kvlease::address::{self, IpRange, MacRange, Subnet};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn mask_has_prefix_leading_ones(octets: [u8; 4], prefix in 0u8..=32) {
        let text = format!("{}/{}", Ipv4Addr::from(octets), prefix);
        let subnet: Subnet = text.parse().unwrap();
        prop_assert_eq!(subnet.mask().leading_ones(), u32::from(prefix));
        prop_assert_eq!(subnet.mask().count_ones(), u32::from(prefix));
    }

    #[test]
    fn subnet_parse_never_panics(text in ".{0,40}") {
        let _ = text.parse::<Subnet>();
    }

    #[test]
    fn mac_value_ignores_colon_placement(
        value in 0u64..(1 << 48),
        cuts in prop::collection::vec(0usize..12, 0..8)
    ) {
        let digits = format!("{:012x}", value);
        let mut text = String::new();
        for (index, digit) in digits.chars().enumerate() {
            if cuts.contains(&index) {
                text.push(':');
            }
            text.push(digit);
        }
        prop_assert_eq!(address::mac_to_int(&text).unwrap(), value);
        prop_assert_eq!(address::mac_to_int(&text.to_uppercase()).unwrap(), value);
    }

    #[test]
    fn format_mac_parses_back(bytes: [u8; 6]) {
        let text = address::format_mac(&bytes);
        let mut expected = [0u8; 8];
        expected[2..].copy_from_slice(&bytes);
        prop_assert_eq!(address::mac_to_int(&text).unwrap(), u64::from_be_bytes(expected));
    }

    #[test]
    fn mac_to_int_never_panics(text in ".{0,40}") {
        let _ = address::mac_to_int(&text);
    }

    #[test]
    fn mac_range_excludes_bounds(begin in 0u64..(1 << 40), width in 0u64..1000) {
        let range = MacRange::new(begin, begin + width);
        prop_assert!(!range.contains(begin));
        prop_assert!(!range.contains(begin + width));
        prop_assert_eq!(range.contains(begin + 1), width >= 2);
    }

    #[test]
    fn range_addresses_stay_in_bounds(begin: u32, span in 0u32..4096, offset: u32) {
        let end = begin.saturating_add(span);
        let range = IpRange::new(Ipv4Addr::from(begin), Ipv4Addr::from(end));
        match range.address_at(offset) {
            Some(address) => {
                prop_assert!(u32::from(address) >= begin);
                prop_assert!(u32::from(address) <= end);
                prop_assert_eq!(u32::from(address) - begin, offset);
            }
            None => prop_assert!(u64::from(begin) + u64::from(offset) > u64::from(end)),
        }
    }
}

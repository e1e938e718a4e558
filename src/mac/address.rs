//! MAC addresses and their allocation.

use std::fmt;
use std::str::FromStr;

use crate::error::SimError;

/// Six-byte MAC address, written as `aa:bb:cc:dd:ee:ff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Address whose low 48 bits are `index`, big-endian.
    pub fn from_index(index: u64) -> Self {
        let bytes = index.to_be_bytes();
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&bytes[2..]);
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for MacAddress {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| SimError::InvalidAddress(s.to_string()))?;
            if part.len() != 2 {
                return Err(SimError::InvalidAddress(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| SimError::InvalidAddress(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(SimError::InvalidAddress(s.to_string()));
        }
        Ok(Self(octets))
    }
}

/// Hands out consecutive addresses starting at `00:00:00:00:00:01`.
///
/// Each simulation owns its own allocator, so runs do not influence each other.
#[derive(Debug, Default)]
pub struct AddressAllocator {
    issued: u64,
}

impl AddressAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> MacAddress {
        self.issued += 1;
        MacAddress::from_index(self.issued)
    }

    /// Number of addresses handed out so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocators_are_independent() {
        let mut first = AddressAllocator::new();
        let mut second = AddressAllocator::new();
        assert_eq!(first.allocate().to_string(), "00:00:00:00:00:01");
        assert_eq!(first.allocate().to_string(), "00:00:00:00:00:02");
        assert_eq!(second.allocate().to_string(), "00:00:00:00:00:01");
        assert_eq!(first.issued(), 2);
    }

    #[test]
    fn text_form_parses_back() {
        let address = MacAddress::from_index(0x0102_0304_05ff);
        assert_eq!(address.to_string(), "01:02:03:04:05:ff");
        assert_eq!("01:02:03:04:05:ff".parse::<MacAddress>().unwrap(), address);
        assert!("01:02:03".parse::<MacAddress>().is_err());
        assert!("01:02:03:04:05:06:07".parse::<MacAddress>().is_err());
        assert!("zz:02:03:04:05:06".parse::<MacAddress>().is_err());
    }
}

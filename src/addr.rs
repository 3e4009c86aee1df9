//! 128-bit host addresses and (address, port) socket keys.
//!
//! Addresses use the familiar colon-hex notation: eight groups of up to four
//! hex digits, with at most one `::` run compressing consecutive zero groups.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Reasons an address string can fail to parse.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AddrParseError {
    /// More than eight groups, with or without `::` compression.
    #[error("too many groups in address")]
    TooManyGroups,
    /// Not eight groups and no `::`, or a group that is not 1-4 hex digits.
    #[error("invalid address format")]
    InvalidFormat,
    /// Raw-byte construction with a slice that is not 16 bytes long.
    #[error("address raw form takes 16 bytes")]
    WrongByteCount,
}

/// A 128-bit simulated network address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
pub struct Address {
    bytes: [u8; 16],
}

impl Address {
    /// The all-zero address, used as the "unassigned" placeholder.
    pub const UNSPECIFIED: Address = Address { bytes: [0; 16] };

    /// Builds an address from its two 64-bit halves (big-endian order).
    pub fn from_halves(head: u64, tail: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&head.to_be_bytes());
        bytes[8..].copy_from_slice(&tail.to_be_bytes());
        Address { bytes }
    }

    /// Builds an address from exactly 16 raw bytes.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, AddrParseError> {
        let bytes: [u8; 16] = raw.try_into().map_err(|_| AddrParseError::WrongByteCount)?;
        Ok(Address { bytes })
    }

    /// Draws a uniformly random address.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        Address { bytes }
    }

    /// The upper 64 bits.
    pub fn head(&self) -> u64 {
        u64::from_be_bytes(self.bytes[..8].try_into().unwrap_or([0; 8]))
    }

    /// The lower 64 bits.
    pub fn tail(&self) -> u64 {
        u64::from_be_bytes(self.bytes[8..].try_into().unwrap_or([0; 8]))
    }

    /// The raw byte representation.
    pub fn octets(&self) -> [u8; 16] {
        self.bytes
    }

    fn group(&self, idx: usize) -> u16 {
        u16::from(self.bytes[idx * 2]) << 8 | u16::from(self.bytes[idx * 2 + 1])
    }
}

impl FromStr for Address {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let groups = match s.find("::") {
            Some(pos) => {
                // A second "::" leaves hex-invalid residue in one side and is
                // rejected by the group parser below.
                let head = parse_groups(&s[..pos])?;
                let tail = parse_groups(&s[pos + 2..])?;
                if head.len() + tail.len() > 8 {
                    return Err(AddrParseError::TooManyGroups);
                }
                let mut all = head;
                all.resize(8 - tail.len(), 0);
                all.extend(tail);
                all
            }
            None => {
                let all = parse_groups(s)?;
                if all.len() != 8 {
                    return Err(AddrParseError::InvalidFormat);
                }
                all
            }
        };

        let mut bytes = [0u8; 16];
        for (i, group) in groups.iter().enumerate() {
            bytes[i * 2] = (group >> 8) as u8;
            bytes[i * 2 + 1] = (group & 0xff) as u8;
        }
        Ok(Address { bytes })
    }
}

fn parse_groups(part: &str) -> Result<Vec<u16>, AddrParseError> {
    let mut out = Vec::new();
    for seg in part.split(':') {
        if seg.is_empty() {
            continue;
        }
        if seg.len() > 4 {
            return Err(AddrParseError::InvalidFormat);
        }
        let value = u16::from_str_radix(seg, 16).map_err(|_| AddrParseError::InvalidFormat)?;
        out.push(value);
    }
    if out.len() > 8 {
        return Err(AddrParseError::TooManyGroups);
    }
    Ok(out)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..8 {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:04x}", self.group(i))?;
        }
        Ok(())
    }
}

/// The socket registry key: an address plus a port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AddrPair {
    /// The host address.
    pub addr: Address,
    /// The bound port.
    pub port: u16,
}

impl AddrPair {
    /// Pairs an address with a port.
    pub fn new(addr: Address, port: u16) -> Self {
        AddrPair { addr, port }
    }
}

impl fmt::Display for AddrPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_full_form() {
        let addr: Address = "0011:2233:4455:6677:8899:aabb:ccdd:eeff".parse().unwrap();
        assert_eq!(addr.head(), 0x0011_2233_4455_6677);
        assert_eq!(addr.tail(), 0x8899_aabb_ccdd_eeff);
    }

    #[test]
    fn parse_compressed_forms() {
        assert_eq!("::".parse::<Address>().unwrap(), Address::UNSPECIFIED);
        assert_eq!(
            "::1".parse::<Address>().unwrap(),
            Address::from_halves(0, 1)
        );
        assert_eq!(
            "1::".parse::<Address>().unwrap(),
            Address::from_halves(0x0001_0000_0000_0000, 0)
        );
        assert_eq!(
            "fe80::c0fe".parse::<Address>().unwrap(),
            Address::from_halves(0xfe80_0000_0000_0000, 0xc0fe)
        );
    }

    #[test]
    fn parse_rejects_bad_forms() {
        assert_eq!(
            "1:2:3:4:5:6:7".parse::<Address>(),
            Err(AddrParseError::InvalidFormat)
        );
        assert_eq!(
            "1:2:3:4:5:6:7:8:9".parse::<Address>(),
            Err(AddrParseError::TooManyGroups)
        );
        assert_eq!(
            "1::2:3:4:5:6:7:8:9".parse::<Address>(),
            Err(AddrParseError::TooManyGroups)
        );
        assert_eq!(
            "g000::".parse::<Address>(),
            Err(AddrParseError::InvalidFormat)
        );
        assert_eq!(
            "12345::".parse::<Address>(),
            Err(AddrParseError::InvalidFormat)
        );
    }

    #[test]
    fn format_round_trip() {
        for addr in [
            Address::UNSPECIFIED,
            Address::from_halves(1, 2),
            Address::from_halves(u64::MAX, u64::MAX),
            Address::from_halves(0xfe80_0000_0000_0000, 0x0202_b3ff_fe1e_8329),
        ] {
            let text = addr.to_string();
            assert_eq!(text.parse::<Address>().unwrap(), addr, "{text}");
        }
    }

    #[test]
    fn raw_byte_round_trip() {
        let addr = Address::random();
        assert_eq!(Address::from_bytes(&addr.octets()).unwrap(), addr);
        assert_eq!(
            Address::from_bytes(&[0u8; 4]),
            Err(AddrParseError::WrongByteCount)
        );
    }

    #[test]
    fn pair_equality_includes_port() {
        let addr = Address::from_halves(1, 2);
        assert_ne!(AddrPair::new(addr, 22), AddrPair::new(addr, 23));
        assert_eq!(AddrPair::new(addr, 22), AddrPair::new(addr, 22));
    }
}

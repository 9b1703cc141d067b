//! Bluetooth UUIDs
//!
//! Attribute types are kept as full 128-bit values so SIG-assigned 16-bit
//! UUIDs and vendor-specific 128-bit UUIDs compare the same way.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A 128-bit Bluetooth UUID, stored little-endian as it appears on air.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
}

/// The Bluetooth base UUID "00000000-0000-1000-8000-00805F9B34FB" (little-endian).
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset of the 16/32-bit alias inside a 128-bit UUID.
const ALIAS_OFFSET: usize = 12;

impl Uuid {
    /// Creates a UUID from 16 little-endian bytes.
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes }
    }

    /// Creates a UUID from 16 big-endian bytes (textual order).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes }
    }

    /// Creates a UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[ALIAS_OFFSET] = uuid16 as u8;
        bytes[ALIAS_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes }
    }

    /// Creates a UUID from a 32-bit SIG-assigned value.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        let alias = uuid32.to_le_bytes();
        bytes[ALIAS_OFFSET] = alias[0];
        bytes[ALIAS_OFFSET + 1] = alias[1];
        bytes[ALIAS_OFFSET + 2] = alias[2];
        bytes[ALIAS_OFFSET + 3] = alias[3];
        Uuid { bytes }
    }

    /// Creates a vendor UUID by placing a 16-bit alias into a vendor base UUID.
    ///
    /// The alias lands at the same position a SIG alias would, so
    /// `from_vendor_base(base, 0x0802)` on the A6EDxxxx base yields
    /// `A6ED0802-...`.
    pub const fn from_vendor_base(base: [u8; 16], alias: u16) -> Self {
        let mut bytes = base;
        bytes[ALIAS_OFFSET] = alias as u8;
        bytes[ALIAS_OFFSET + 1] = (alias >> 8) as u8;
        Uuid { bytes }
    }

    /// Parses a UUID from an on-air slice of 2, 4 or 16 bytes.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::from_u32(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    fn is_sig_assigned(&self) -> bool {
        self.bytes[..ALIAS_OFFSET] == BASE_UUID_BYTES[..ALIAS_OFFSET]
    }

    /// Returns the 16-bit alias when this is a SIG-assigned 16-bit UUID.
    pub fn as_u16(&self) -> Option<u16> {
        if self.is_sig_assigned() && self.bytes[ALIAS_OFFSET + 2] == 0 && self.bytes[ALIAS_OFFSET + 3] == 0 {
            Some(u16::from_le_bytes([self.bytes[ALIAS_OFFSET], self.bytes[ALIAS_OFFSET + 1]]))
        } else {
            None
        }
    }

    /// Shortest on-air form: 2 bytes for SIG aliases, 16 bytes otherwise.
    pub fn to_vec_le(&self) -> Vec<u8> {
        match self.as_u16() {
            Some(alias) => alias.to_le_bytes().to_vec(),
            None => self.bytes.to_vec(),
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = hex::encode_upper(self.as_bytes_be());
        write!(f, "{}-{}-{}-{}-{}", &s[0..8], &s[8..12], &s[12..16], &s[16..20], &s[20..32])
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_u16() {
            Some(alias) => write!(f, "Uuid(0x{:04X})", alias),
            None => write!(f, "Uuid({})", self),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum UuidParseError {
    #[error("UUID must have 4 or 32 hex digits, got {0}")]
    InvalidLength(usize),

    #[error("Invalid hex in UUID: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    /// Accepts "180D", "0x180D" or the hyphenated 128-bit form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();

        match cleaned.len() {
            4 => {
                let mut alias = [0u8; 2];
                hex::decode_to_slice(&cleaned, &mut alias)?;
                Ok(Uuid::from_u16(u16::from_be_bytes(alias)))
            }
            32 => {
                let mut bytes_be = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes_be)?;
                Ok(Uuid::from_bytes_be(bytes_be))
            }
            n => Err(UuidParseError::InvalidLength(n)),
        }
    }
}

//! Client Characteristic Configuration Descriptor values and per-connection state

use crate::att::AttErrorCode;
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::ConnIdx;
use byteorder::{ByteOrder, LittleEndian};

bitflags::bitflags! {
    /// CCCD value as written by the peer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Cccd: u16 {
        const NOTIFICATION = 0x0001;
        const INDICATION = 0x0002;
    }
}

impl Cccd {
    pub fn notifications_enabled(&self) -> bool {
        *self == Cccd::NOTIFICATION
    }

    pub fn indications_enabled(&self) -> bool {
        *self == Cccd::INDICATION
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.bits().to_le_bytes()
    }
}

/// A CCCD may only stop, start notifications or start indications.
pub fn cccd_value_valid(value: u16) -> bool {
    matches!(value, 0x0000 | 0x0001 | 0x0002)
}

/// Decodes a CCCD write request value.
pub fn parse_cccd_write(value: &[u8]) -> Result<Cccd, AttErrorCode> {
    if value.len() != 2 {
        return Err(AttErrorCode::InvalidAttributeValueLength);
    }
    let raw = LittleEndian::read_u16(value);
    if !cccd_value_valid(raw) {
        return Err(AttErrorCode::CCCD_IMPROPERLY_CONFIGURED);
    }
    Ok(Cccd::from_bits_retain(raw))
}

/// Fixed set of per-connection slots
#[derive(Debug, Clone)]
pub struct ConnTable<T> {
    slots: Vec<T>,
}

impl<T: Clone + Default> ConnTable<T> {
    pub fn new(max_connections: usize) -> Self {
        Self::with_value(max_connections, T::default())
    }
}

impl<T: Clone> ConnTable<T> {
    /// Every slot starts as a copy of `value`
    pub fn with_value(max_connections: usize, value: T) -> Self {
        Self { slots: vec![value; max_connections] }
    }
}

impl<T> ConnTable<T> {
    pub fn get(&self, conn: ConnIdx) -> ProfileResult<&T> {
        self.slots.get(usize::from(conn)).ok_or(ProfileError::InvalidConnection(conn))
    }

    pub fn get_mut(&mut self, conn: ConnIdx) -> ProfileResult<&mut T> {
        self.slots.get_mut(usize::from(conn)).ok_or(ProfileError::InvalidConnection(conn))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cccd_write_parsing() {
        assert_eq!(parse_cccd_write(&[0x01, 0x00]), Ok(Cccd::NOTIFICATION));
        assert_eq!(parse_cccd_write(&[0x02, 0x00]), Ok(Cccd::INDICATION));
        assert_eq!(parse_cccd_write(&[0x00, 0x00]), Ok(Cccd::empty()));
        assert_eq!(parse_cccd_write(&[0x03, 0x00]), Err(AttErrorCode::CCCD_IMPROPERLY_CONFIGURED));
        assert_eq!(parse_cccd_write(&[0x01]), Err(AttErrorCode::InvalidAttributeValueLength));
    }

    #[test]
    fn test_conn_table_bounds() {
        let mut table: ConnTable<Cccd> = ConnTable::new(2);
        *table.get_mut(1).unwrap() = Cccd::INDICATION;
        assert!(table.get(1).unwrap().indications_enabled());
        assert_eq!(table.get(2), Err(ProfileError::InvalidConnection(2)));
    }
}

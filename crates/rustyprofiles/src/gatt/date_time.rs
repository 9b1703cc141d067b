//! The 7 byte Date Time characteristic format used inside measurements
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

/// Encoded length of a [`DateTime`]
pub const DATE_TIME_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub min: u8,
    pub sec: u8,
}

impl DateTime {
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u16::<LittleEndian>(self.year)?;
        w.write_all(&[self.month, self.day, self.hour, self.min, self.sec])
    }

    pub fn to_bytes(&self) -> [u8; DATE_TIME_LEN] {
        let year = self.year.to_le_bytes();
        [year[0], year[1], self.month, self.day, self.hour, self.min, self.sec]
    }

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < DATE_TIME_LEN {
            return None;
        }
        let mut cursor = Cursor::new(data);
        let year = cursor.read_u16::<LittleEndian>().ok()?;
        Some(Self { year, month: data[2], day: data[3], hour: data[4], min: data[5], sec: data[6] })
    }
}

//! Body Composition Measurement values and their packet encoding
//!
//! A measurement is indicated as one packet, or as two when the optional
//! fields do not fit in one ATT payload. Both halves of a split measurement
//! carry the "multiple packet" flag and repeat the flags and body fat
//! percentage header.

use crate::gatt::date_time::DateTime;

/// Upper bound of one encoded measurement packet
pub const BCS_MEAS_VAL_LEN_MAX: usize = 30;
/// Body fat percentage value marking an unsuccessful measurement
pub const BCS_MEAS_UNSUCCESSFUL: u16 = 0xFFFF;

const FIELD_SIZE: usize = 2;

bitflags::bitflags! {
    /// Body Composition Feature characteristic value
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BcsFeature: u32 {
        const TIME_STAMP = 1 << 0;
        const MULTI_USER = 1 << 1;
        const BASAL_METABOLISM = 1 << 2;
        const MUSCLE_PERCENTAGE = 1 << 3;
        const MUSCLE_MASS = 1 << 4;
        const FAT_FREE_MASS = 1 << 5;
        const SOFT_LEAN_MASS = 1 << 6;
        const BODY_WATER_MASS = 1 << 7;
        const IMPEDANCE = 1 << 8;
        const WEIGHT = 1 << 9;
        const HEIGHT = 1 << 10;
        /// Mass measurement resolution, bits 11..=14
        const MASS_RESOLUTION = 0xF << 11;
        /// Height measurement resolution, bits 15..=17
        const HEIGHT_RESOLUTION = 0x7 << 15;
    }
}

impl BcsFeature {
    /// Every optional field supported, resolutions left unspecified
    pub const ALL_FIELDS: BcsFeature = BcsFeature::from_bits_truncate(0x07FF);

    pub fn with_resolutions(self, mass: u8, height: u8) -> Self {
        let bits = (self.bits() & !(Self::MASS_RESOLUTION.bits() | Self::HEIGHT_RESOLUTION.bits()))
            | ((u32::from(mass) & 0xF) << 11)
            | ((u32::from(height) & 0x7) << 15);
        Self::from_bits_retain(bits)
    }

    pub fn mass_resolution(&self) -> u8 {
        ((self.bits() >> 11) & 0xF) as u8
    }

    pub fn height_resolution(&self) -> u8 {
        ((self.bits() >> 15) & 0x7) as u8
    }
}

bitflags::bitflags! {
    /// Flags field of a measurement packet. Also used to select which optional
    /// fields the application fills in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BcsMeasFlags: u16 {
        const UNIT_IMPERIAL = 1 << 0;
        const TIME_STAMP = 1 << 1;
        const USER_ID = 1 << 2;
        const BASAL_METABOLISM = 1 << 3;
        const MUSCLE_PERCENTAGE = 1 << 4;
        const MUSCLE_MASS = 1 << 5;
        const FAT_FREE_MASS = 1 << 6;
        const SOFT_LEAN_MASS = 1 << 7;
        const BODY_WATER_MASS = 1 << 8;
        const IMPEDANCE = 1 << 9;
        const WEIGHT = 1 << 10;
        const HEIGHT = 1 << 11;
        const MULTIPLE_PACKET = 1 << 12;
    }
}

impl BcsMeasFlags {
    /// All optional fields selected
    pub const ALL_FIELDS: BcsMeasFlags = BcsMeasFlags::from_bits_truncate(0x0FFE);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BcsUnit {
    /// Kilogram and meter
    #[default]
    Si,
    /// Pound and inch
    Imperial,
}

/// One body composition measurement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BcsMeasurement {
    /// 0.1 % resolution, [`BCS_MEAS_UNSUCCESSFUL`] when the measurement failed
    pub body_fat_percentage: u16,
    pub time_stamp: DateTime,
    pub user_id: u8,
    pub basal_metabolism: u16,
    pub muscle_percentage: u16,
    pub muscle_mass: u16,
    pub fat_free_mass: u16,
    pub soft_lean_mass: u16,
    pub body_water_mass: u16,
    pub impedance: u16,
    pub weight: u16,
    pub height: u16,
}

struct Packet {
    flags: BcsMeasFlags,
    body: Vec<u8>,
}

impl Packet {
    fn new(unit_flag: BcsMeasFlags, body_fat_percentage: u16) -> Self {
        let mut body = Vec::with_capacity(BCS_MEAS_VAL_LEN_MAX);
        body.extend_from_slice(&body_fat_percentage.to_le_bytes());
        Self { flags: unit_flag, body }
    }

    /// Encoded size including the flags field
    fn len(&self) -> usize {
        2 + self.body.len()
    }

    fn add(&mut self, flag: BcsMeasFlags, value: u16) {
        self.flags |= flag;
        self.body.extend_from_slice(&value.to_le_bytes());
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        bytes.extend_from_slice(&self.flags.bits().to_le_bytes());
        bytes.extend(self.body);
        bytes
    }
}

/// Packs measurements according to the supported and selected fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasEncoder {
    pub feature: BcsFeature,
    pub fields: BcsMeasFlags,
    pub unit: BcsUnit,
}

impl MeasEncoder {
    fn enabled(&self, feature: BcsFeature, field: BcsMeasFlags) -> bool {
        self.feature.contains(feature) && self.fields.contains(field)
    }

    fn unit_flag(&self) -> BcsMeasFlags {
        match self.unit {
            BcsUnit::Si => BcsMeasFlags::empty(),
            BcsUnit::Imperial => BcsMeasFlags::UNIT_IMPERIAL,
        }
    }

    /// Encodes `meas` into one or two packets of at most `max_payload` bytes.
    pub fn encode(&self, meas: &BcsMeasurement, max_payload: usize) -> Vec<Vec<u8>> {
        let max_payload = max_payload.min(BCS_MEAS_VAL_LEN_MAX);
        let unit = self.unit_flag();
        let mut first = Packet::new(unit, meas.body_fat_percentage);

        if self.enabled(BcsFeature::TIME_STAMP, BcsMeasFlags::TIME_STAMP) {
            first.flags |= BcsMeasFlags::TIME_STAMP;
            first.body.extend_from_slice(&meas.time_stamp.to_bytes());
        }
        if self.enabled(BcsFeature::MULTI_USER, BcsMeasFlags::USER_ID) {
            first.flags |= BcsMeasFlags::USER_ID;
            first.body.push(meas.user_id);
        }

        if meas.body_fat_percentage == BCS_MEAS_UNSUCCESSFUL {
            return vec![first.into_bytes()];
        }

        // Fits the first packet at the default MTU together with the fields above.
        let leading = [
            (BcsFeature::BASAL_METABOLISM, BcsMeasFlags::BASAL_METABOLISM, meas.basal_metabolism),
            (BcsFeature::MUSCLE_PERCENTAGE, BcsMeasFlags::MUSCLE_PERCENTAGE, meas.muscle_percentage),
            (BcsFeature::MUSCLE_MASS, BcsMeasFlags::MUSCLE_MASS, meas.muscle_mass),
            (BcsFeature::FAT_FREE_MASS, BcsMeasFlags::FAT_FREE_MASS, meas.fat_free_mass),
        ];
        for (feature, flag, value) in leading {
            if self.enabled(feature, flag) {
                first.add(flag, value);
            }
        }

        let trailing = [
            (BcsFeature::SOFT_LEAN_MASS, BcsMeasFlags::SOFT_LEAN_MASS, meas.soft_lean_mass),
            (BcsFeature::BODY_WATER_MASS, BcsMeasFlags::BODY_WATER_MASS, meas.body_water_mass),
            (BcsFeature::IMPEDANCE, BcsMeasFlags::IMPEDANCE, meas.impedance),
            (BcsFeature::WEIGHT, BcsMeasFlags::WEIGHT, meas.weight),
            (BcsFeature::HEIGHT, BcsMeasFlags::HEIGHT, meas.height),
        ];
        let mut second: Option<Packet> = None;
        for (feature, flag, value) in trailing {
            if !self.enabled(feature, flag) {
                continue;
            }
            if second.is_none() && first.len() + FIELD_SIZE > max_payload {
                first.flags |= BcsMeasFlags::MULTIPLE_PACKET;
                second = Some(Packet::new(unit | BcsMeasFlags::MULTIPLE_PACKET, meas.body_fat_percentage));
            }
            match second.as_mut() {
                Some(packet) => packet.add(flag, value),
                None => first.add(flag, value),
            }
        }

        let mut packets = vec![first.into_bytes()];
        packets.extend(second.map(Packet::into_bytes));
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_measurement() -> BcsMeasurement {
        BcsMeasurement {
            body_fat_percentage: 215,
            time_stamp: DateTime { year: 2023, month: 11, day: 2, hour: 7, min: 30, sec: 0 },
            user_id: 3,
            basal_metabolism: 1600,
            muscle_percentage: 400,
            muscle_mass: 3000,
            fat_free_mass: 5500,
            soft_lean_mass: 5200,
            body_water_mass: 4000,
            impedance: 5000,
            weight: 14000,
            height: 1750,
        }
    }

    fn encoder(fields: BcsMeasFlags, unit: BcsUnit) -> MeasEncoder {
        MeasEncoder { feature: BcsFeature::ALL_FIELDS, fields, unit }
    }

    fn flags_of(packet: &[u8]) -> BcsMeasFlags {
        BcsMeasFlags::from_bits_retain(u16::from_le_bytes([packet[0], packet[1]]))
    }

    #[test]
    fn test_full_measurement_splits_at_default_mtu() {
        let packets = encoder(BcsMeasFlags::ALL_FIELDS, BcsUnit::Si).encode(&full_measurement(), 20);
        assert_eq!(packets.len(), 2);

        let first = &packets[0];
        assert_eq!(first.len(), 20);
        assert_eq!(flags_of(first).bits(), 0x107E);
        assert_eq!(&first[2..4], &215u16.to_le_bytes());
        assert_eq!(&first[4..11], &[0xE7, 0x07, 11, 2, 7, 30, 0]);
        assert_eq!(first[11], 3);

        let second = &packets[1];
        assert_eq!(second.len(), 14);
        assert_eq!(flags_of(second).bits(), 0x1F80);
        assert_eq!(&second[2..4], &215u16.to_le_bytes());
        assert_eq!(&second[4..6], &5200u16.to_le_bytes());
        assert_eq!(&second[12..14], &1750u16.to_le_bytes());
    }

    #[test]
    fn test_large_payload_keeps_single_packet() {
        let packets = encoder(BcsMeasFlags::ALL_FIELDS, BcsUnit::Imperial).encode(&full_measurement(), 244);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), BCS_MEAS_VAL_LEN_MAX);
        assert_eq!(flags_of(&packets[0]).bits(), 0x0FFF);
    }

    #[test]
    fn test_unsuccessful_measurement_has_no_body_fields() {
        let meas = BcsMeasurement { body_fat_percentage: BCS_MEAS_UNSUCCESSFUL, ..full_measurement() };
        let packets = encoder(BcsMeasFlags::ALL_FIELDS, BcsUnit::Si).encode(&meas, 20);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), 4 + 7 + 1);
        assert_eq!(flags_of(&packets[0]), BcsMeasFlags::TIME_STAMP | BcsMeasFlags::USER_ID);
    }

    #[test]
    fn test_skipped_field_does_not_stop_later_fields() {
        let fields = BcsMeasFlags::WEIGHT | BcsMeasFlags::HEIGHT;
        let packets = encoder(fields, BcsUnit::Si).encode(&full_measurement(), 20);
        assert_eq!(packets, vec![vec![0x00, 0x0C, 0xD7, 0x00, 0xB0, 0x36, 0xD6, 0x06]]);
    }

    #[test]
    fn test_field_needs_feature_and_selection() {
        let enc = MeasEncoder {
            feature: BcsFeature::WEIGHT,
            fields: BcsMeasFlags::WEIGHT | BcsMeasFlags::HEIGHT,
            unit: BcsUnit::Si,
        };
        let packets = enc.encode(&full_measurement(), 20);
        assert_eq!(flags_of(&packets[0]), BcsMeasFlags::WEIGHT);
        assert_eq!(packets[0].len(), 6);
    }

    #[test]
    fn test_feature_resolutions() {
        let feature = BcsFeature::ALL_FIELDS.with_resolutions(3, 2);
        assert_eq!(feature.mass_resolution(), 3);
        assert_eq!(feature.height_resolution(), 2);
        assert!(feature.contains(BcsFeature::HEIGHT));
    }
}

//! Service implementations
//!
//! Servers expose a static attribute table through [`crate::gatt::ServerProfile`];
//! clients discover a peer service through [`crate::gatt::ClientProfile`].
//! Every profile reports to the application through its own event enum.

pub mod bas_c;
pub mod bcs;
pub mod dis_c;
pub mod gus_c;
pub mod hids;
pub mod hrs;
pub mod hrs_c;
pub mod lns;
pub mod otas_c;

use crate::uuid::Uuid;

/// Base of the vendor 128-bit UUIDs, alias bytes zeroed
pub const VENDOR_BASE_UUID: [u8; 16] = [
    0x1B, 0xD7, 0x90, 0xEC, 0xE8, 0xB9, 0x75, 0x80, 0x0A, 0x46, 0x44, 0xD3, 0x00, 0x00, 0xED, 0xA6,
];

pub(crate) const fn vendor_uuid(alias: u16) -> Uuid {
    Uuid::from_vendor_base(VENDOR_BASE_UUID, alias)
}

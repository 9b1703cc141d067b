//! Static attribute tables and handle lookup
//!
//! Every server profile describes its service as a fixed array of
//! [`AttrDesc`] indexed by an attribute index. A [`CharMask`] selects which
//! entries are instantiated; the stack allocates consecutive handles starting
//! at the service start handle for the selected entries only. The two lookups
//! below translate between the two numbering schemes.

use crate::att::{AttPermissions, CHARACTERISTIC_UUID, PRIMARY_SERVICE_UUID, SECONDARY_SERVICE_UUID};
use crate::uuid::Uuid;
use std::ops::RangeInclusive;

/// One row of a service attribute table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrDesc {
    /// Attribute type
    pub uuid: Uuid,
    pub perm: AttPermissions,
    /// Maximum value length, 0 for declarations
    pub max_len: u16,
}

impl AttrDesc {
    pub const fn new(uuid: Uuid, perm: AttPermissions, max_len: u16) -> Self {
        Self { uuid, perm, max_len }
    }

    /// Primary service declaration row
    pub const fn primary_service() -> Self {
        Self::new(Uuid::from_u16(PRIMARY_SERVICE_UUID), AttPermissions::READ, 0)
    }

    /// Secondary service declaration row
    pub const fn secondary_service() -> Self {
        Self::new(Uuid::from_u16(SECONDARY_SERVICE_UUID), AttPermissions::READ, 0)
    }

    /// Characteristic declaration row
    pub const fn characteristic() -> Self {
        Self::new(Uuid::from_u16(CHARACTERISTIC_UUID), AttPermissions::READ, 0)
    }
}

/// Presence bitmask over attribute indexes (bit `n` = index `n`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CharMask(u64);

impl CharMask {
    pub const fn new(bits: u64) -> Self {
        CharMask(bits)
    }

    /// Mask with the first `nb` indexes present
    pub const fn all(nb: usize) -> Self {
        if nb >= 64 {
            CharMask(u64::MAX)
        } else {
            CharMask((1u64 << nb) - 1)
        }
    }

    /// Builds a mask from little-endian bytes, byte 0 holding indexes 0..8.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let bits = bytes
            .iter()
            .take(8)
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)));
        CharMask(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, idx: usize) -> bool {
        idx < 64 && (self.0 >> idx) & 1 == 1
    }

    pub fn insert(&mut self, idx: usize) {
        if idx < 64 {
            self.0 |= 1 << idx;
        }
    }

    pub const fn union(self, other: CharMask) -> CharMask {
        CharMask(self.0 | other.0)
    }

    /// Number of instantiated attributes among the first `nb` indexes
    pub fn count(&self, nb: usize) -> usize {
        (self.0 & CharMask::all(nb).0).count_ones() as usize
    }
}

/// Finds the attribute index of `handle`.
///
/// Walks the first `nb` indexes, advancing the candidate handle only for
/// indexes present in `mask`.
pub fn find_idx_by_handle(handle: u16, start_hdl: u16, mask: CharMask, nb: usize) -> Option<usize> {
    let mut current = start_hdl;
    for idx in 0..nb.min(64) {
        if !mask.contains(idx) {
            continue;
        }
        if current == handle {
            return Some(idx);
        }
        current = current.checked_add(1)?;
    }
    None
}

/// Finds the handle allocated to attribute index `idx`, if it is present.
pub fn find_handle_by_idx(idx: usize, start_hdl: u16, mask: CharMask) -> Option<u16> {
    if !mask.contains(idx) {
        return None;
    }
    let below = mask.bits() & ((1u64 << idx) - 1);
    start_hdl.checked_add(below.count_ones() as u16)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Primary,
    Secondary,
}

/// Service description handed to the stack when a server profile is created
#[derive(Debug, Clone, Copy)]
pub struct ServiceDb {
    pub uuid: Uuid,
    pub kind: ServiceKind,
    pub attrs: &'static [AttrDesc],
    pub mask: CharMask,
}

impl ServiceDb {
    /// Handles occupied by this service once created at `start_hdl`
    pub fn handle_range(&self, start_hdl: u16) -> RangeInclusive<u16> {
        let count = self.mask.count(self.attrs.len()).max(1) as u16;
        start_hdl..=start_hdl.saturating_add(count - 1)
    }

    /// Table rows selected by the mask, paired with their index
    pub fn present_attrs(&self) -> impl Iterator<Item = (usize, &AttrDesc)> + '_ {
        self.attrs.iter().enumerate().filter(move |(idx, _)| self.mask.contains(*idx))
    }
}

/// A service table bound to the start handle the stack allocated for it
#[derive(Debug, Clone, Copy)]
pub struct ServiceInstance {
    db: ServiceDb,
    start_hdl: Option<u16>,
}

impl ServiceInstance {
    pub fn new(db: ServiceDb) -> Self {
        Self { db, start_hdl: None }
    }

    pub fn db(&self) -> &ServiceDb {
        &self.db
    }

    pub fn bind(&mut self, start_hdl: u16) {
        self.start_hdl = Some(start_hdl);
    }

    pub fn start_handle(&self) -> Option<u16> {
        self.start_hdl
    }

    /// Attribute index of `handle`, `None` when it is not ours
    pub fn idx_of(&self, handle: u16) -> Option<usize> {
        let start = self.start_hdl?;
        find_idx_by_handle(handle, start, self.db.mask, self.db.attrs.len())
    }

    /// Handle of attribute index `idx`, `None` when absent or not created yet
    pub fn handle_of(&self, idx: usize) -> Option<u16> {
        find_handle_by_idx(idx, self.start_hdl?, self.db.mask)
    }

    pub fn handle_range(&self) -> Option<RangeInclusive<u16>> {
        self.start_hdl.map(|start| self.db.handle_range(start))
    }
}

//! Client profile dispatch and discovery results
//!
//! Client profiles discover a peer service with `browse_service`, remember the
//! handles they care about, and turn read responses, write responses and
//! notifications on those handles into profile events.

use crate::att::{AttErrorCode, NtfInd};
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::cccd::Cccd;
use crate::gatt::stack::GattcStack;
use crate::gatt::ConnIdx;
use crate::uuid::Uuid;
use log::{debug, trace, warn};
use std::sync::{Arc, Mutex, PoisonError};

/// Maximum number of client profiles one manager routes for
pub const MAX_CLIENT_PROFILES: usize = 16;

/// Outcome of a GATT client procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Success,
    /// Service browsing finished, no further services follow
    BrowseExhausted,
    Failed(AttErrorCode),
}

impl OpStatus {
    pub fn is_success(&self) -> bool {
        *self == OpStatus::Success
    }
}

/// One entry of a browsed service, in handle order after the declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseAttr {
    /// End of the attribute list
    None,
    IncludedService { start_handle: u16, end_handle: u16, uuid: Uuid },
    /// Characteristic declaration
    Characteristic { properties: u8, value_handle: u16 },
    /// Characteristic value
    Value(Uuid),
    Descriptor(Uuid),
}

/// A service found by `browse_service`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseService {
    pub uuid: Uuid,
    pub start_handle: u16,
    pub end_handle: u16,
    /// Attribute `i` sits at `start_handle + i + 1`
    pub attrs: Vec<BrowseAttr>,
}

impl BrowseService {
    /// `(handle, attribute)` pairs up to the first [`BrowseAttr::None`]
    pub fn attributes(&self) -> impl Iterator<Item = (u16, &BrowseAttr)> + '_ {
        let span = usize::from(self.end_handle.saturating_sub(self.start_handle));
        self.attrs
            .iter()
            .take(span)
            .take_while(|attr| **attr != BrowseAttr::None)
            .enumerate()
            .map(move |(i, attr)| (self.start_handle + i as u16 + 1, attr))
    }

    pub fn contains(&self, handle: u16) -> bool {
        (self.start_handle..=self.end_handle).contains(&handle)
    }
}

/// What a browse callback means to a profile looking for one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery<'a> {
    /// Browsing ended or failed, nothing to report
    Ignored,
    /// A service other than the one looked for
    Mismatch,
    Found(&'a BrowseService),
}

/// Classifies a browse callback for a profile looking for `uuid`.
pub fn discovery<'a>(status: OpStatus, svc: &'a BrowseService, uuid: &Uuid) -> Discovery<'a> {
    match status {
        OpStatus::BrowseExhausted => Discovery::Ignored,
        OpStatus::Failed(code) => {
            debug!("browse for {} failed: {:?}", uuid, code);
            Discovery::Ignored
        }
        OpStatus::Success if svc.uuid == *uuid => Discovery::Found(svc),
        OpStatus::Success => Discovery::Mismatch,
    }
}

/// One attribute value from a read response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadValue {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadRsp {
    pub values: Vec<ReadValue>,
}

impl ReadRsp {
    pub fn single(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self { values: vec![ReadValue { handle, offset: 0, value: value.into() }] }
    }

    pub fn first(&self) -> Option<&ReadValue> {
        self.values.first()
    }
}

/// Callbacks a client profile handles for the procedures it started
pub trait ClientProfile {
    fn name(&self) -> &'static str;

    /// Called once by the manager with the id the stack will route by.
    fn bind(&mut self, prf_id: u8);

    fn on_browse(&mut self, _conn: ConnIdx, _status: OpStatus, _svc: &BrowseService) {}

    fn on_read_rsp(&mut self, _conn: ConnIdx, _status: OpStatus, _rsp: &ReadRsp) {}

    fn on_write_rsp(&mut self, _conn: ConnIdx, _status: OpStatus, _handle: u16) {}

    fn on_ntf_ind(&mut self, _conn: ConnIdx, _ntf: &NtfInd) {}

    fn on_mtu_exchanged(&mut self, _conn: ConnIdx, _mtu: u16) {}

    fn on_disconnected(&mut self, _conn: ConnIdx) {}
}

pub type SharedClientProfile = Arc<Mutex<dyn ClientProfile + Send>>;

fn lock(profile: &SharedClientProfile) -> std::sync::MutexGuard<'_, dyn ClientProfile + Send + 'static> {
    profile.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Routes stack callbacks to client profiles by profile id
#[derive(Default)]
pub struct ClientProfileManager {
    profiles: Vec<SharedClientProfile>,
}

impl ClientProfileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `profile` and returns the id the stack must route by.
    pub fn add_profile(&mut self, profile: SharedClientProfile) -> ProfileResult<u8> {
        if self.profiles.len() >= MAX_CLIENT_PROFILES {
            return Err(ProfileError::NoResources);
        }
        let prf_id = self.profiles.len() as u8;
        {
            let mut guard = lock(&profile);
            guard.bind(prf_id);
            debug!("{} registered as client profile {}", guard.name(), prf_id);
        }
        self.profiles.push(profile);
        Ok(prf_id)
    }

    fn profile(&self, prf_id: u8) -> Option<&SharedClientProfile> {
        let profile = self.profiles.get(usize::from(prf_id));
        if profile.is_none() {
            warn!("callback for unknown client profile {}", prf_id);
        }
        profile
    }

    pub fn on_browse(&self, prf_id: u8, conn: ConnIdx, status: OpStatus, svc: &BrowseService) {
        if let Some(profile) = self.profile(prf_id) {
            lock(profile).on_browse(conn, status, svc);
        }
    }

    pub fn on_read_rsp(&self, prf_id: u8, conn: ConnIdx, status: OpStatus, rsp: &ReadRsp) {
        if let Some(profile) = self.profile(prf_id) {
            lock(profile).on_read_rsp(conn, status, rsp);
        }
    }

    pub fn on_write_rsp(&self, prf_id: u8, conn: ConnIdx, status: OpStatus, handle: u16) {
        if let Some(profile) = self.profile(prf_id) {
            lock(profile).on_write_rsp(conn, status, handle);
        }
    }

    pub fn on_ntf_ind(&self, prf_id: u8, conn: ConnIdx, ntf: &NtfInd) {
        if let Some(profile) = self.profile(prf_id) {
            lock(profile).on_ntf_ind(conn, ntf);
        }
    }

    pub fn on_mtu_exchanged(&self, conn: ConnIdx, mtu: u16) {
        for profile in &self.profiles {
            lock(profile).on_mtu_exchanged(conn, mtu);
        }
    }

    pub fn on_disconnected(&self, conn: ConnIdx) {
        for profile in &self.profiles {
            lock(profile).on_disconnected(conn);
        }
    }
}

/// A client profile's handle on the stack
///
/// Wraps the stack with the profile id and rejects operations on handles that
/// were never discovered.
pub struct ClientLink {
    stack: Arc<dyn GattcStack>,
    prf_id: Option<u8>,
}

impl ClientLink {
    pub fn new(stack: Arc<dyn GattcStack>) -> Self {
        Self { stack, prf_id: None }
    }

    pub fn bind(&mut self, prf_id: u8) {
        self.prf_id = Some(prf_id);
    }

    fn prf_id(&self) -> ProfileResult<u8> {
        self.prf_id.ok_or(ProfileError::NotRegistered)
    }

    pub fn browse(&self, conn: ConnIdx, uuid: &Uuid) -> ProfileResult<()> {
        self.stack.browse_service(self.prf_id()?, conn, uuid)
    }

    pub fn read(&self, conn: ConnIdx, handle: Option<u16>) -> ProfileResult<()> {
        let handle = handle.ok_or(ProfileError::InvalidHandle)?;
        self.stack.read(self.prf_id()?, conn, handle, 0)
    }

    pub fn write(&self, conn: ConnIdx, handle: Option<u16>, value: &[u8]) -> ProfileResult<()> {
        let handle = handle.ok_or(ProfileError::InvalidHandle)?;
        trace!("write {:#06x}: {}", handle, hex::encode(value));
        self.stack.write(self.prf_id()?, conn, handle, 0, value)
    }

    pub fn write_no_resp(&self, conn: ConnIdx, handle: Option<u16>, value: &[u8]) -> ProfileResult<()> {
        let handle = handle.ok_or(ProfileError::InvalidHandle)?;
        trace!("write command {:#06x}: {}", handle, hex::encode(value));
        self.stack.write_no_resp(self.prf_id()?, conn, handle, value)
    }

    /// Enables `cfg` on a CCCD, or clears it when `enable` is false.
    pub fn write_cccd(&self, conn: ConnIdx, handle: Option<u16>, cfg: Cccd, enable: bool) -> ProfileResult<()> {
        let value = if enable { cfg } else { Cccd::empty() };
        self.write(conn, handle, &value.to_le_bytes())
    }
}

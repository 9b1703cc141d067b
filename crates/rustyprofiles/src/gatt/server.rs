//! Server profile dispatch
//!
//! A server profile owns one service table. The [`ServerProfileManager`]
//! creates each service in the stack, remembers which handle range it
//! received, and routes the stack's read/write/CCCD/completion callbacks to
//! the owning profile. Read and write confirms produced by the profile are
//! forwarded back to the stack.

use crate::att::{AttErrorCode, NtfIndKind, ReadConfirm, ReadRequest, WriteConfirm, WriteRequest};
use crate::error::ProfileResult;
use crate::gatt::stack::GattsStack;
use crate::gatt::ConnIdx;
use log::{debug, trace, warn};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};

/// Callbacks a server profile handles for its own attributes
pub trait ServerProfile {
    /// Short name used in log output
    fn name(&self) -> &'static str;

    /// Creates the service in the stack.
    fn init(&mut self) -> ProfileResult<()>;

    /// Handles owned by this profile, `None` before `init`
    fn handle_range(&self) -> Option<RangeInclusive<u16>>;

    fn on_read(&mut self, conn: ConnIdx, req: &ReadRequest) -> ReadConfirm;

    fn on_write(&mut self, conn: ConnIdx, req: &WriteRequest) -> WriteConfirm;

    /// CCCD restored by the stack for a bonded peer. No confirm is sent.
    fn on_cccd_set(&mut self, _conn: ConnIdx, _handle: u16, _value: u16) {}

    /// Notification or indication sent by this profile has completed.
    fn on_ntf_ind_complete(
        &mut self,
        _conn: ConnIdx,
        _status: Result<(), AttErrorCode>,
        _kind: NtfIndKind,
        _handle: u16,
    ) {
    }

    /// The ATT MTU of `conn` changed.
    fn on_mtu_exchanged(&mut self, _conn: ConnIdx, _mtu: u16) {}

    /// The link `conn` went down.
    fn on_disconnected(&mut self, _conn: ConnIdx) {}
}

/// A server profile shared between the application and the manager
pub type SharedServerProfile = Arc<Mutex<dyn ServerProfile + Send>>;

struct Registered {
    range: RangeInclusive<u16>,
    profile: SharedServerProfile,
}

/// Routes stack callbacks to server profiles
///
/// Profile event handlers run while the profile is locked; they must not call
/// back into the same profile.
pub struct ServerProfileManager {
    stack: Arc<dyn GattsStack>,
    profiles: Vec<Registered>,
}

fn lock(profile: &SharedServerProfile) -> std::sync::MutexGuard<'_, dyn ServerProfile + Send + 'static> {
    profile.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServerProfileManager {
    pub fn new(stack: Arc<dyn GattsStack>) -> Self {
        Self { stack, profiles: Vec::new() }
    }

    /// Initialises `profile` and starts routing its handles.
    pub fn add_profile(&mut self, profile: SharedServerProfile) -> ProfileResult<()> {
        let (name, range) = {
            let mut guard = lock(&profile);
            guard.init()?;
            (guard.name(), guard.handle_range())
        };

        let Some(range) = range else {
            warn!("{} initialised without a handle range", name);
            return Ok(());
        };

        debug!("{} registered on handles {:#06x}..={:#06x}", name, range.start(), range.end());
        self.profiles.push(Registered { range, profile });
        Ok(())
    }

    fn owner(&self, handle: u16) -> Option<&SharedServerProfile> {
        self.profiles
            .iter()
            .find(|registered| registered.range.contains(&handle))
            .map(|registered| &registered.profile)
    }

    /// Peer read of `req.handle`; always answered with a confirm.
    pub fn on_read(&self, conn: ConnIdx, req: &ReadRequest) {
        let cfm = match self.owner(req.handle) {
            Some(profile) => lock(profile).on_read(conn, req),
            None => {
                trace!("read of unowned handle {:#06x}", req.handle);
                ReadConfirm::error(req.handle, AttErrorCode::InvalidHandle)
            }
        };
        self.stack.read_confirm(conn, cfm);
    }

    /// Peer write of `req.handle`; always answered with a confirm.
    pub fn on_write(&self, conn: ConnIdx, req: &WriteRequest) {
        let cfm = match self.owner(req.handle) {
            Some(profile) => lock(profile).on_write(conn, req),
            None => {
                trace!("write of unowned handle {:#06x}", req.handle);
                WriteConfirm::error(req.handle, AttErrorCode::InvalidHandle)
            }
        };
        self.stack.write_confirm(conn, cfm);
    }

    pub fn on_cccd_set(&self, conn: ConnIdx, handle: u16, value: u16) {
        if let Some(profile) = self.owner(handle) {
            lock(profile).on_cccd_set(conn, handle, value);
        }
    }

    pub fn on_ntf_ind_complete(
        &self,
        conn: ConnIdx,
        status: Result<(), AttErrorCode>,
        kind: NtfIndKind,
        handle: u16,
    ) {
        if let Some(profile) = self.owner(handle) {
            lock(profile).on_ntf_ind_complete(conn, status, kind, handle);
        }
    }

    pub fn on_mtu_exchanged(&self, conn: ConnIdx, mtu: u16) {
        for registered in &self.profiles {
            lock(&registered.profile).on_mtu_exchanged(conn, mtu);
        }
    }

    pub fn on_disconnected(&self, conn: ConnIdx) {
        for registered in &self.profiles {
            lock(&registered.profile).on_disconnected(conn);
        }
    }
}

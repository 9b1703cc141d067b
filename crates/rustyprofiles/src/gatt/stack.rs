//! Seams to the external BLE stack
//!
//! The link layer, ATT engine and attribute storage live outside this crate.
//! Profiles reach them only through these two traits; the stack glue calls
//! back into the profile managers in [`super::server`] and [`super::client`].

use crate::att::{NtfInd, ReadConfirm, WriteConfirm};
use crate::error::ProfileResult;
use crate::gatt::table::ServiceDb;
use crate::gatt::ConnIdx;
use crate::uuid::Uuid;

/// GATT server side of the stack
pub trait GattsStack: Send + Sync {
    /// Instantiates the attributes selected by `db.mask` and returns the
    /// allocated start handle.
    fn create_service(&self, db: &ServiceDb) -> ProfileResult<u16>;

    /// Completes a pending peer read.
    fn read_confirm(&self, conn: ConnIdx, cfm: ReadConfirm);

    /// Completes a pending peer write request.
    fn write_confirm(&self, conn: ConnIdx, cfm: WriteConfirm);

    /// Queues a notification or indication. Completion is reported back
    /// through `ServerProfileManager::on_ntf_ind_complete`.
    fn notify_indicate(&self, conn: ConnIdx, ntf: &NtfInd) -> ProfileResult<()>;
}

/// GATT client side of the stack
///
/// `prf_id` identifies the client profile so the stack can route the
/// responses back through `ClientProfileManager`.
pub trait GattcStack: Send + Sync {
    /// Starts discovery of services matching `uuid`.
    fn browse_service(&self, prf_id: u8, conn: ConnIdx, uuid: &Uuid) -> ProfileResult<()>;

    fn read(&self, prf_id: u8, conn: ConnIdx, handle: u16, offset: u16) -> ProfileResult<()>;

    /// Write request, answered by `on_write_rsp`.
    fn write(&self, prf_id: u8, conn: ConnIdx, handle: u16, offset: u16, value: &[u8]) -> ProfileResult<()>;

    /// Write command. The stack still reports completion through
    /// `on_write_rsp` once the packet has been sent.
    fn write_no_resp(&self, prf_id: u8, conn: ConnIdx, handle: u16, value: &[u8]) -> ProfileResult<()>;
}

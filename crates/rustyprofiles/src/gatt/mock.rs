//! Recording stand-ins for the external stack, used by unit tests

use crate::att::{NtfInd, ReadConfirm, WriteConfirm};
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::stack::{GattcStack, GattsStack};
use crate::gatt::table::ServiceDb;
use crate::gatt::{ConnIdx, EventHandler};
use crate::uuid::Uuid;
use std::sync::{Arc, Mutex};

/// Mock GATT server stack allocating handles from 1 upwards
pub struct MockGattsStack {
    next_handle: Mutex<u16>,
    pub services: Mutex<Vec<(u16, ServiceDb)>>,
    pub read_cfms: Mutex<Vec<(ConnIdx, ReadConfirm)>>,
    pub write_cfms: Mutex<Vec<(ConnIdx, WriteConfirm)>>,
    pub sent: Mutex<Vec<(ConnIdx, NtfInd)>>,
    /// When set, `notify_indicate` fails with this error
    pub send_error: Mutex<Option<ProfileError>>,
}

impl MockGattsStack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_handle: Mutex::new(1),
            services: Mutex::new(Vec::new()),
            read_cfms: Mutex::new(Vec::new()),
            write_cfms: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
        })
    }

    pub fn take_sent(&self) -> Vec<(ConnIdx, NtfInd)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn last_read_cfm(&self) -> Option<ReadConfirm> {
        self.read_cfms.lock().unwrap().last().map(|(_, cfm)| cfm.clone())
    }

    pub fn last_write_cfm(&self) -> Option<WriteConfirm> {
        self.write_cfms.lock().unwrap().last().map(|(_, cfm)| *cfm)
    }
}

impl GattsStack for MockGattsStack {
    fn create_service(&self, db: &ServiceDb) -> ProfileResult<u16> {
        let mut next = self.next_handle.lock().unwrap();
        let start = *next;
        *next += db.mask.count(db.attrs.len()) as u16;
        self.services.lock().unwrap().push((start, *db));
        Ok(start)
    }

    fn read_confirm(&self, conn: ConnIdx, cfm: ReadConfirm) {
        self.read_cfms.lock().unwrap().push((conn, cfm));
    }

    fn write_confirm(&self, conn: ConnIdx, cfm: WriteConfirm) {
        self.write_cfms.lock().unwrap().push((conn, cfm));
    }

    fn notify_indicate(&self, conn: ConnIdx, ntf: &NtfInd) -> ProfileResult<()> {
        if let Some(err) = self.send_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.sent.lock().unwrap().push((conn, ntf.clone()));
        Ok(())
    }
}

/// A GATT client procedure issued through [`MockGattcStack`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattcCall {
    Browse { prf_id: u8, conn: ConnIdx, uuid: Uuid },
    Read { prf_id: u8, conn: ConnIdx, handle: u16 },
    Write { prf_id: u8, conn: ConnIdx, handle: u16, value: Vec<u8> },
    WriteNoResp { prf_id: u8, conn: ConnIdx, handle: u16, value: Vec<u8> },
}

#[derive(Default)]
pub struct MockGattcStack {
    pub calls: Mutex<Vec<GattcCall>>,
}

impl MockGattcStack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_calls(&self) -> Vec<GattcCall> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }
}

impl GattcStack for MockGattcStack {
    fn browse_service(&self, prf_id: u8, conn: ConnIdx, uuid: &Uuid) -> ProfileResult<()> {
        self.calls.lock().unwrap().push(GattcCall::Browse { prf_id, conn, uuid: *uuid });
        Ok(())
    }

    fn read(&self, prf_id: u8, conn: ConnIdx, handle: u16, _offset: u16) -> ProfileResult<()> {
        self.calls.lock().unwrap().push(GattcCall::Read { prf_id, conn, handle });
        Ok(())
    }

    fn write(&self, prf_id: u8, conn: ConnIdx, handle: u16, _offset: u16, value: &[u8]) -> ProfileResult<()> {
        self.calls.lock().unwrap().push(GattcCall::Write { prf_id, conn, handle, value: value.to_vec() });
        Ok(())
    }

    fn write_no_resp(&self, prf_id: u8, conn: ConnIdx, handle: u16, value: &[u8]) -> ProfileResult<()> {
        self.calls.lock().unwrap().push(GattcCall::WriteNoResp { prf_id, conn, handle, value: value.to_vec() });
        Ok(())
    }
}

pub type Recorded<E> = Arc<Mutex<Vec<(ConnIdx, E)>>>;

/// Event handler that appends every event to a shared list
pub fn recorder<E: Send + 'static>() -> (EventHandler<E>, Recorded<E>) {
    let events: Recorded<E> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handler: EventHandler<E> = Box::new(move |conn, event| sink.lock().unwrap().push((conn, event)));
    (handler, events)
}

/// Drains the recorded events, dropping the connection index
pub fn drain<E>(events: &Recorded<E>) -> Vec<E> {
    events.lock().unwrap().drain(..).map(|(_, event)| event).collect()
}

/// Browse result for a service declared at `start` followed by `attrs`
pub fn browsed(uuid: Uuid, start: u16, attrs: Vec<crate::gatt::BrowseAttr>) -> crate::gatt::BrowseService {
    crate::gatt::BrowseService { uuid, start_handle: start, end_handle: start + attrs.len() as u16, attrs }
}

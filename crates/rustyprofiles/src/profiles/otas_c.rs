//! OTA transport client

use crate::att::NtfInd;
use crate::error::ProfileResult;
use crate::gatt::cccd::{Cccd, ConnTable};
use crate::gatt::client::{discovery, BrowseAttr, ClientLink, ClientProfile, Discovery, OpStatus};
use crate::gatt::stack::GattcStack;
use crate::gatt::{BrowseService, ConnIdx, EventHandler, ProfileConfig};
use crate::profiles::vendor_uuid;
use crate::uuid::Uuid;
use log::debug;
use std::sync::Arc;

pub const OTAS_SERVICE_UUID: Uuid = vendor_uuid(0x0401);
pub const OTAS_TX_CHAR_UUID: Uuid = vendor_uuid(0x0402);
pub const OTAS_RX_CHAR_UUID: Uuid = vendor_uuid(0x0403);
pub const OTAS_CTRL_CHAR_UUID: Uuid = vendor_uuid(0x0404);

/// Peer handles found during discovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OtasHandles {
    pub srvc_start: u16,
    pub srvc_end: u16,
    pub tx: Option<u16>,
    pub tx_cccd: Option<u16>,
    pub rx: Option<u16>,
    pub ctrl: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtasCEvent {
    DiscoveryComplete,
    DiscoveryFail,
    TxNtfSetSuccess,
    CtrlSuccess,
    TxCplt,
    WriteOpErr,
    PeerDataReceive(Vec<u8>),
}

pub struct OtaClient {
    link: ClientLink,
    handles: ConnTable<OtasHandles>,
    handler: EventHandler<OtasCEvent>,
}

impl OtaClient {
    pub fn new(stack: Arc<dyn GattcStack>, config: &ProfileConfig, handler: EventHandler<OtasCEvent>) -> Self {
        Self {
            link: ClientLink::new(stack),
            handles: ConnTable::new(config.max_connections),
            handler,
        }
    }

    pub fn handles(&self, conn: ConnIdx) -> ProfileResult<&OtasHandles> {
        self.handles.get(conn)
    }

    pub fn disc_srvc_start(&self, conn: ConnIdx) -> ProfileResult<()> {
        self.link.browse(conn, &OTAS_SERVICE_UUID)
    }

    pub fn tx_notify_set(&self, conn: ConnIdx, enable: bool) -> ProfileResult<()> {
        let handle = self.handles.get(conn)?.tx_cccd;
        self.link.write_cccd(conn, handle, Cccd::NOTIFICATION, enable)
    }

    /// Writes a control word, little-endian, without response.
    pub fn ctrl_data_send(&self, conn: ConnIdx, data: u32) -> ProfileResult<()> {
        self.link.write_no_resp(conn, self.handles.get(conn)?.ctrl, &data.to_le_bytes())
    }

    /// Writes `data` to the peer RX characteristic in one command.
    pub fn tx_data_send(&self, conn: ConnIdx, data: &[u8]) -> ProfileResult<()> {
        self.link.write_no_resp(conn, self.handles.get(conn)?.rx, data)
    }

    fn record(svc: &BrowseService) -> OtasHandles {
        let mut handles = OtasHandles {
            srvc_start: svc.start_handle,
            srvc_end: svc.end_handle,
            ..OtasHandles::default()
        };
        for (handle, attr) in svc.attributes() {
            let BrowseAttr::Value(uuid) = attr else {
                continue;
            };
            if *uuid == OTAS_RX_CHAR_UUID {
                handles.rx = Some(handle);
            } else if *uuid == OTAS_TX_CHAR_UUID {
                handles.tx = Some(handle);
                handles.tx_cccd = handle.checked_add(1);
            } else if *uuid == OTAS_CTRL_CHAR_UUID {
                handles.ctrl = Some(handle);
            }
        }
        handles
    }
}

impl ClientProfile for OtaClient {
    fn name(&self) -> &'static str {
        "otas_c"
    }

    fn bind(&mut self, prf_id: u8) {
        self.link.bind(prf_id);
    }

    fn on_browse(&mut self, conn: ConnIdx, status: OpStatus, svc: &BrowseService) {
        let event = match discovery(status, svc, &OTAS_SERVICE_UUID) {
            Discovery::Ignored => return,
            Discovery::Mismatch => OtasCEvent::DiscoveryFail,
            Discovery::Found(svc) => {
                let Ok(slot) = self.handles.get_mut(conn) else {
                    return;
                };
                *slot = Self::record(svc);
                debug!("otas_c discovered {:?}", slot);
                OtasCEvent::DiscoveryComplete
            }
        };
        (self.handler)(conn, event);
    }

    fn on_write_rsp(&mut self, conn: ConnIdx, status: OpStatus, handle: u16) {
        let Ok(h) = self.handles.get(conn) else {
            return;
        };
        let event = if h.tx_cccd == Some(handle) {
            OtasCEvent::TxNtfSetSuccess
        } else if h.ctrl == Some(handle) {
            OtasCEvent::CtrlSuccess
        } else if h.rx == Some(handle) {
            OtasCEvent::TxCplt
        } else {
            return;
        };
        let event = if status.is_success() { event } else { OtasCEvent::WriteOpErr };
        (self.handler)(conn, event);
    }

    fn on_ntf_ind(&mut self, conn: ConnIdx, ntf: &NtfInd) {
        if self.handles.get(conn).is_ok_and(|h| h.tx == Some(ntf.handle)) {
            (self.handler)(conn, OtasCEvent::PeerDataReceive(ntf.value.clone()));
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        if let Ok(handles) = self.handles.get_mut(conn) {
            *handles = OtasHandles::default();
        }
    }
}

//! Battery Service client
//!
//! Discovers the peer Battery Level characteristic and reports its value
//! from reads and notifications.

use crate::att::{NtfInd, CHAR_FORMAT_UUID, CLIENT_CHAR_CONFIG_UUID};
use crate::error::ProfileResult;
use crate::gatt::cccd::{Cccd, ConnTable};
use crate::gatt::client::{discovery, BrowseAttr, ClientLink, ClientProfile, Discovery, OpStatus, ReadRsp};
use crate::gatt::stack::GattcStack;
use crate::gatt::{BrowseService, ConnIdx, EventHandler, ProfileConfig};
use crate::uuid::Uuid;
use log::debug;
use std::sync::Arc;

pub const BAS_SERVICE_UUID: u16 = 0x180F;
pub const BATTERY_LEVEL_UUID: u16 = 0x2A19;

/// Peer handles found during discovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasHandles {
    pub srvc_start: u16,
    pub srvc_end: u16,
    pub bat_level: Option<u16>,
    pub bat_level_cccd: Option<u16>,
    pub bat_level_pres_format: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasCEvent {
    DiscoveryComplete,
    DiscoveryFail,
    BatLevelNtfSetSuccess,
    BatLevelNtfSetErr,
    BatLevelReceive(u8),
}

pub struct BatteryClient {
    link: ClientLink,
    handles: ConnTable<BasHandles>,
    handler: EventHandler<BasCEvent>,
}

impl BatteryClient {
    pub fn new(stack: Arc<dyn GattcStack>, config: &ProfileConfig, handler: EventHandler<BasCEvent>) -> Self {
        Self {
            link: ClientLink::new(stack),
            handles: ConnTable::new(config.max_connections),
            handler,
        }
    }

    pub fn handles(&self, conn: ConnIdx) -> ProfileResult<&BasHandles> {
        self.handles.get(conn)
    }

    pub fn disc_srvc_start(&self, conn: ConnIdx) -> ProfileResult<()> {
        self.link.browse(conn, &Uuid::from_u16(BAS_SERVICE_UUID))
    }

    pub fn bat_level_notify_set(&self, conn: ConnIdx, enable: bool) -> ProfileResult<()> {
        let handle = self.handles.get(conn)?.bat_level_cccd;
        self.link.write_cccd(conn, handle, Cccd::NOTIFICATION, enable)
    }

    pub fn bat_level_read(&self, conn: ConnIdx) -> ProfileResult<()> {
        self.link.read(conn, self.handles.get(conn)?.bat_level)
    }

    fn record(svc: &BrowseService) -> BasHandles {
        let mut handles = BasHandles {
            srvc_start: svc.start_handle,
            srvc_end: svc.end_handle,
            ..BasHandles::default()
        };
        for (handle, attr) in svc.attributes() {
            match attr {
                BrowseAttr::Value(uuid) if *uuid == BATTERY_LEVEL_UUID => handles.bat_level = Some(handle),
                BrowseAttr::Descriptor(uuid) if *uuid == CLIENT_CHAR_CONFIG_UUID => {
                    handles.bat_level_cccd = Some(handle)
                }
                BrowseAttr::Descriptor(uuid) if *uuid == CHAR_FORMAT_UUID => {
                    handles.bat_level_pres_format = Some(handle)
                }
                _ => {}
            }
        }
        handles
    }

    fn is_bat_level(&self, conn: ConnIdx, handle: u16) -> bool {
        self.handles.get(conn).is_ok_and(|h| h.bat_level == Some(handle))
    }
}

impl ClientProfile for BatteryClient {
    fn name(&self) -> &'static str {
        "bas_c"
    }

    fn bind(&mut self, prf_id: u8) {
        self.link.bind(prf_id);
    }

    fn on_browse(&mut self, conn: ConnIdx, status: OpStatus, svc: &BrowseService) {
        let event = match discovery(status, svc, &Uuid::from_u16(BAS_SERVICE_UUID)) {
            Discovery::Ignored => return,
            Discovery::Mismatch => BasCEvent::DiscoveryFail,
            Discovery::Found(svc) => {
                let Ok(slot) = self.handles.get_mut(conn) else {
                    return;
                };
                *slot = Self::record(svc);
                debug!("bas_c discovered {:?}", slot);
                BasCEvent::DiscoveryComplete
            }
        };
        (self.handler)(conn, event);
    }

    fn on_read_rsp(&mut self, conn: ConnIdx, status: OpStatus, rsp: &ReadRsp) {
        if !status.is_success() {
            return;
        }
        let Some(read) = rsp.first() else {
            return;
        };
        if let (true, Some(&level)) = (self.is_bat_level(conn, read.handle), read.value.first()) {
            (self.handler)(conn, BasCEvent::BatLevelReceive(level));
        }
    }

    fn on_write_rsp(&mut self, conn: ConnIdx, status: OpStatus, handle: u16) {
        let is_cccd = self.handles.get(conn).is_ok_and(|h| h.bat_level_cccd == Some(handle));
        if !is_cccd {
            return;
        }
        let event = if status.is_success() {
            BasCEvent::BatLevelNtfSetSuccess
        } else {
            BasCEvent::BatLevelNtfSetErr
        };
        (self.handler)(conn, event);
    }

    fn on_ntf_ind(&mut self, conn: ConnIdx, ntf: &NtfInd) {
        if let (true, Some(&level)) = (self.is_bat_level(conn, ntf.handle), ntf.value.first()) {
            (self.handler)(conn, BasCEvent::BatLevelReceive(level));
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        if let Ok(handles) = self.handles.get_mut(conn) {
            *handles = BasHandles::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::AttErrorCode;
    use crate::error::ProfileError;
    use crate::gatt::mock::{browsed, drain, recorder, GattcCall, MockGattcStack, Recorded};

    fn battery_service() -> BrowseService {
        browsed(
            Uuid::from_u16(BAS_SERVICE_UUID),
            0x20,
            vec![
                BrowseAttr::Characteristic { properties: 0x12, value_handle: 0x22 },
                BrowseAttr::Value(Uuid::from_u16(BATTERY_LEVEL_UUID)),
                BrowseAttr::Descriptor(Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID)),
                BrowseAttr::Descriptor(Uuid::from_u16(CHAR_FORMAT_UUID)),
            ],
        )
    }

    fn setup() -> (BatteryClient, Arc<MockGattcStack>, Recorded<BasCEvent>) {
        let stack = MockGattcStack::new();
        let (handler, events) = recorder();
        let mut bas = BatteryClient::new(stack.clone(), &ProfileConfig::default(), handler);
        bas.bind(3);
        (bas, stack, events)
    }

    #[test]
    fn test_operations_need_discovery() {
        let (bas, stack, _) = setup();
        assert_eq!(bas.bat_level_read(0), Err(ProfileError::InvalidHandle));
        assert_eq!(bas.bat_level_notify_set(0, true), Err(ProfileError::InvalidHandle));

        bas.disc_srvc_start(0).unwrap();
        assert_eq!(
            stack.take_calls(),
            vec![GattcCall::Browse { prf_id: 3, conn: 0, uuid: Uuid::from_u16(BAS_SERVICE_UUID) }]
        );
    }

    #[test]
    fn test_discovery_records_handles() {
        let (mut bas, stack, events) = setup();
        bas.on_browse(0, OpStatus::Success, &battery_service());
        assert_eq!(drain(&events), vec![BasCEvent::DiscoveryComplete]);
        assert_eq!(
            *bas.handles(0).unwrap(),
            BasHandles {
                srvc_start: 0x20,
                srvc_end: 0x24,
                bat_level: Some(0x22),
                bat_level_cccd: Some(0x23),
                bat_level_pres_format: Some(0x24),
            }
        );

        bas.bat_level_notify_set(0, true).unwrap();
        bas.bat_level_notify_set(0, false).unwrap();
        bas.bat_level_read(0).unwrap();
        assert_eq!(
            stack.take_calls(),
            vec![
                GattcCall::Write { prf_id: 3, conn: 0, handle: 0x23, value: vec![0x01, 0x00] },
                GattcCall::Write { prf_id: 3, conn: 0, handle: 0x23, value: vec![0x00, 0x00] },
                GattcCall::Read { prf_id: 3, conn: 0, handle: 0x22 },
            ]
        );
    }

    #[test]
    fn test_browse_outcomes() {
        let (mut bas, _, events) = setup();
        bas.on_browse(0, OpStatus::BrowseExhausted, &battery_service());
        bas.on_browse(0, OpStatus::Failed(AttErrorCode::AttributeNotFound), &battery_service());
        assert!(drain(&events).is_empty());

        let other = browsed(Uuid::from_u16(0x180A), 1, vec![]);
        bas.on_browse(0, OpStatus::Success, &other);
        assert_eq!(drain(&events), vec![BasCEvent::DiscoveryFail]);
        assert_eq!(bas.handles(0).unwrap().bat_level, None);
    }

    #[test]
    fn test_level_from_read_and_notification() {
        let (mut bas, _, events) = setup();
        bas.on_browse(1, OpStatus::Success, &battery_service());
        drain(&events);

        bas.on_read_rsp(1, OpStatus::Success, &ReadRsp::single(0x22, [87]));
        bas.on_read_rsp(1, OpStatus::Failed(AttErrorCode::ReadNotPermitted), &ReadRsp::single(0x22, [1]));
        bas.on_ntf_ind(1, &NtfInd::notification(0x22, [86]));
        bas.on_ntf_ind(1, &NtfInd::notification(0x30, [1]));
        // handles of connection 1 do not apply to connection 0
        bas.on_ntf_ind(0, &NtfInd::notification(0x22, [5]));
        assert_eq!(drain(&events), vec![BasCEvent::BatLevelReceive(87), BasCEvent::BatLevelReceive(86)]);

        bas.on_write_rsp(1, OpStatus::Success, 0x23);
        bas.on_write_rsp(1, OpStatus::Failed(AttErrorCode::WriteNotPermitted), 0x23);
        bas.on_write_rsp(1, OpStatus::Success, 0x22);
        assert_eq!(drain(&events), vec![BasCEvent::BatLevelNtfSetSuccess, BasCEvent::BatLevelNtfSetErr]);

        bas.on_disconnected(1);
        assert_eq!(bas.bat_level_read(1), Err(ProfileError::InvalidHandle));
    }
}

//! Device Information Service client

use crate::error::ProfileResult;
use crate::gatt::cccd::ConnTable;
use crate::gatt::client::{discovery, BrowseAttr, ClientLink, ClientProfile, Discovery, OpStatus, ReadRsp};
use crate::gatt::stack::GattcStack;
use crate::gatt::{BrowseService, ConnIdx, EventHandler, ProfileConfig};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

pub const DIS_SERVICE_UUID: u16 = 0x180A;

/// Characteristics of the Device Information Service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisCharType {
    SystemId,
    ModelNumber,
    SerialNumber,
    FirmwareRevision,
    HardwareRevision,
    SoftwareRevision,
    ManufacturerName,
    CertList,
    PnpId,
}

impl DisCharType {
    pub const ALL: [DisCharType; 9] = [
        DisCharType::SystemId,
        DisCharType::ModelNumber,
        DisCharType::SerialNumber,
        DisCharType::FirmwareRevision,
        DisCharType::HardwareRevision,
        DisCharType::SoftwareRevision,
        DisCharType::ManufacturerName,
        DisCharType::CertList,
        DisCharType::PnpId,
    ];

    pub const fn uuid(self) -> u16 {
        match self {
            DisCharType::SystemId => 0x2A23,
            DisCharType::ModelNumber => 0x2A24,
            DisCharType::SerialNumber => 0x2A25,
            DisCharType::FirmwareRevision => 0x2A26,
            DisCharType::HardwareRevision => 0x2A27,
            DisCharType::SoftwareRevision => 0x2A28,
            DisCharType::ManufacturerName => 0x2A29,
            DisCharType::CertList => 0x2A2A,
            DisCharType::PnpId => 0x2A50,
        }
    }

    fn from_uuid(uuid: &Uuid) -> Option<DisCharType> {
        let uuid16 = uuid.as_u16()?;
        DisCharType::ALL.into_iter().find(|char_type| char_type.uuid() == uuid16)
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

/// System ID characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemId {
    pub manufacturer_id: [u8; 5],
    pub org_unique_id: [u8; 3],
}

/// PnP ID characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnpId {
    pub vendor_id_source: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_version: u16,
}

/// A decoded Device Information value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisValue {
    SystemId(SystemId),
    PnpId(PnpId),
    /// IEEE 11073-20601 certification data list, opaque
    CertList(Vec<u8>),
    Text(String),
}

#[derive(Error, Debug)]
pub enum DisValueError {
    #[error("{0:?} value too short: {1} bytes")]
    TooShort(DisCharType, usize),

    #[error("invalid UTF-8 string: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl DisValue {
    /// Decodes the value read from a `char_type` characteristic.
    pub fn decode(char_type: DisCharType, value: &[u8]) -> Result<DisValue, DisValueError> {
        let too_short = |_: std::io::Error| DisValueError::TooShort(char_type, value.len());
        match char_type {
            DisCharType::SystemId => {
                let bytes = value.get(..8).ok_or(DisValueError::TooShort(char_type, value.len()))?;
                let mut manufacturer_id = [0u8; 5];
                let mut org_unique_id = [0u8; 3];
                manufacturer_id.copy_from_slice(&bytes[..5]);
                org_unique_id.copy_from_slice(&bytes[5..]);
                Ok(DisValue::SystemId(SystemId { manufacturer_id, org_unique_id }))
            }
            DisCharType::PnpId => {
                let mut rdr = Cursor::new(value);
                Ok(DisValue::PnpId(PnpId {
                    vendor_id_source: rdr.read_u8().map_err(too_short)?,
                    vendor_id: rdr.read_u16::<LittleEndian>().map_err(too_short)?,
                    product_id: rdr.read_u16::<LittleEndian>().map_err(too_short)?,
                    product_version: rdr.read_u16::<LittleEndian>().map_err(too_short)?,
                }))
            }
            DisCharType::CertList => Ok(DisValue::CertList(value.to_vec())),
            _ => Ok(DisValue::Text(String::from_utf8(value.to_vec())?)),
        }
    }
}

/// Peer handles found during discovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisHandles {
    pub srvc_start: u16,
    pub srvc_end: u16,
    chars: [Option<u16>; 9],
}

impl DisHandles {
    pub fn char_handle(&self, char_type: DisCharType) -> Option<u16> {
        self.chars[char_type.slot()]
    }

    fn char_type_of(&self, handle: u16) -> Option<DisCharType> {
        DisCharType::ALL.into_iter().find(|t| self.chars[t.slot()] == Some(handle))
    }

    fn contains(&self, handle: u16) -> bool {
        self.srvc_start != 0 && (self.srvc_start..=self.srvc_end).contains(&handle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisCEvent {
    DiscoveryComplete,
    DiscoveryFail,
    ReadRsp { char_type: DisCharType, value: DisValue },
}

pub struct DeviceInfoClient {
    link: ClientLink,
    handles: ConnTable<DisHandles>,
    handler: EventHandler<DisCEvent>,
}

impl DeviceInfoClient {
    pub fn new(stack: Arc<dyn GattcStack>, config: &ProfileConfig, handler: EventHandler<DisCEvent>) -> Self {
        Self {
            link: ClientLink::new(stack),
            handles: ConnTable::new(config.max_connections),
            handler,
        }
    }

    pub fn handles(&self, conn: ConnIdx) -> ProfileResult<&DisHandles> {
        self.handles.get(conn)
    }

    pub fn disc_srvc_start(&self, conn: ConnIdx) -> ProfileResult<()> {
        self.link.browse(conn, &Uuid::from_u16(DIS_SERVICE_UUID))
    }

    pub fn char_value_read(&self, conn: ConnIdx, char_type: DisCharType) -> ProfileResult<()> {
        self.link.read(conn, self.handles.get(conn)?.char_handle(char_type))
    }
}

impl ClientProfile for DeviceInfoClient {
    fn name(&self) -> &'static str {
        "dis_c"
    }

    fn bind(&mut self, prf_id: u8) {
        self.link.bind(prf_id);
    }

    fn on_browse(&mut self, conn: ConnIdx, status: OpStatus, svc: &BrowseService) {
        let event = match discovery(status, svc, &Uuid::from_u16(DIS_SERVICE_UUID)) {
            Discovery::Ignored => return,
            Discovery::Mismatch => DisCEvent::DiscoveryFail,
            Discovery::Found(svc) => {
                let mut handles = DisHandles {
                    srvc_start: svc.start_handle,
                    srvc_end: svc.end_handle,
                    ..DisHandles::default()
                };
                for (handle, attr) in svc.attributes() {
                    if let BrowseAttr::Value(uuid) = attr {
                        if let Some(char_type) = DisCharType::from_uuid(uuid) {
                            handles.chars[char_type.slot()] = Some(handle);
                        }
                    }
                }
                let Ok(slot) = self.handles.get_mut(conn) else {
                    return;
                };
                *slot = handles;
                DisCEvent::DiscoveryComplete
            }
        };
        (self.handler)(conn, event);
    }

    fn on_read_rsp(&mut self, conn: ConnIdx, status: OpStatus, rsp: &ReadRsp) {
        if !status.is_success() {
            return;
        }
        let (Some(read), Ok(handles)) = (rsp.first(), self.handles.get(conn)) else {
            return;
        };
        if !handles.contains(read.handle) {
            return;
        }
        let Some(char_type) = handles.char_type_of(read.handle) else {
            debug!("dis_c: read response for unknown handle {:#06x}", read.handle);
            return;
        };
        match DisValue::decode(char_type, &read.value) {
            Ok(value) => (self.handler)(conn, DisCEvent::ReadRsp { char_type, value }),
            Err(err) => warn!("dis_c: dropping {:?} value {}: {}", char_type, hex::encode(&read.value), err),
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        if let Ok(handles) = self.handles.get_mut(conn) {
            *handles = DisHandles::default();
        }
    }
}

//! Heart Rate Service client

use crate::att::{NtfInd, CLIENT_CHAR_CONFIG_UUID};
use crate::error::ProfileResult;
use crate::gatt::cccd::{Cccd, ConnTable};
use crate::gatt::client::{discovery, BrowseAttr, ClientLink, ClientProfile, Discovery, OpStatus, ReadRsp};
use crate::gatt::stack::GattcStack;
use crate::gatt::{BrowseService, ConnIdx, EventHandler, ProfileConfig};
use crate::profiles::hrs::{
    HrMeasFlags, SensorLocation, BODY_SENSOR_LOCATION_UUID, HEART_RATE_CTRL_POINT_UUID, HEART_RATE_MEAS_UUID,
    HRS_SERVICE_UUID,
};
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use std::io::{self, Cursor};
use std::sync::Arc;

/// A decoded Heart Rate Measurement notification
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HrMeasurement {
    pub heart_rate: u16,
    /// `None` when the sensor does not support contact detection
    pub is_sensor_contact_detected: Option<bool>,
    pub energy_expended: Option<u16>,
    /// RR intervals in milliseconds, oldest first
    pub rr_intervals: Vec<u16>,
}

impl HrMeasurement {
    pub fn decode(value: &[u8]) -> io::Result<HrMeasurement> {
        let mut rdr = Cursor::new(value);
        let flags = HrMeasFlags::from_bits_truncate(rdr.read_u8()?);
        let mut meas = HrMeasurement {
            heart_rate: if flags.contains(HrMeasFlags::RATE_FORMAT_U16) {
                rdr.read_u16::<LittleEndian>()?
            } else {
                u16::from(rdr.read_u8()?)
            },
            ..HrMeasurement::default()
        };
        if flags.contains(HrMeasFlags::SENSOR_CONTACT_SUPPORTED) {
            meas.is_sensor_contact_detected = Some(flags.contains(HrMeasFlags::SENSOR_CONTACT_DETECTED));
        }
        if flags.contains(HrMeasFlags::ENERGY_EXPENDED_PRESENT) {
            meas.energy_expended = Some(rdr.read_u16::<LittleEndian>()?);
        }
        if flags.contains(HrMeasFlags::RR_INTERVAL_PRESENT) {
            while value.len() - (rdr.position() as usize) >= 2 {
                let raw = rdr.read_u16::<LittleEndian>()?;
                meas.rr_intervals.push(rr_to_millis(raw));
            }
        }
        Ok(meas)
    }
}

/// Converts an RR interval from 1/1024 s units to milliseconds.
pub fn rr_to_millis(raw: u16) -> u16 {
    (u32::from(raw) * 1000 / 1024) as u16
}

/// Peer handles found during discovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HrsHandles {
    pub srvc_start: u16,
    pub srvc_end: u16,
    pub hr_meas: Option<u16>,
    pub hr_meas_cccd: Option<u16>,
    pub sensor_loc: Option<u16>,
    pub ctrl_point: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HrsCEvent {
    DiscoveryComplete,
    DiscoveryFail,
    HrMeasNtfSetSuccess,
    CtrlPointSet,
    WriteOpErr,
    HrMeasValueReceive(HrMeasurement),
    SensorLocReadRsp(SensorLocation),
}

pub struct HeartRateClient {
    link: ClientLink,
    handles: ConnTable<HrsHandles>,
    handler: EventHandler<HrsCEvent>,
}

impl HeartRateClient {
    pub fn new(stack: Arc<dyn GattcStack>, config: &ProfileConfig, handler: EventHandler<HrsCEvent>) -> Self {
        Self {
            link: ClientLink::new(stack),
            handles: ConnTable::new(config.max_connections),
            handler,
        }
    }

    pub fn handles(&self, conn: ConnIdx) -> ProfileResult<&HrsHandles> {
        self.handles.get(conn)
    }

    pub fn disc_srvc_start(&self, conn: ConnIdx) -> ProfileResult<()> {
        self.link.browse(conn, &Uuid::from_u16(HRS_SERVICE_UUID))
    }

    pub fn heart_rate_meas_notify_set(&self, conn: ConnIdx, enable: bool) -> ProfileResult<()> {
        let handle = self.handles.get(conn)?.hr_meas_cccd;
        self.link.write_cccd(conn, handle, Cccd::NOTIFICATION, enable)
    }

    pub fn sensor_loc_read(&self, conn: ConnIdx) -> ProfileResult<()> {
        self.link.read(conn, self.handles.get(conn)?.sensor_loc)
    }

    pub fn ctrl_point_set(&self, conn: ConnIdx, ctrl_value: u8) -> ProfileResult<()> {
        self.link.write(conn, self.handles.get(conn)?.ctrl_point, &[ctrl_value])
    }

    fn record(svc: &BrowseService) -> HrsHandles {
        let mut handles = HrsHandles {
            srvc_start: svc.start_handle,
            srvc_end: svc.end_handle,
            ..HrsHandles::default()
        };
        for (handle, attr) in svc.attributes() {
            match attr {
                BrowseAttr::Value(uuid) if *uuid == HEART_RATE_MEAS_UUID => handles.hr_meas = Some(handle),
                BrowseAttr::Value(uuid) if *uuid == BODY_SENSOR_LOCATION_UUID => handles.sensor_loc = Some(handle),
                BrowseAttr::Value(uuid) if *uuid == HEART_RATE_CTRL_POINT_UUID => handles.ctrl_point = Some(handle),
                BrowseAttr::Descriptor(uuid) if *uuid == CLIENT_CHAR_CONFIG_UUID => handles.hr_meas_cccd = Some(handle),
                _ => {}
            }
        }
        handles
    }
}

impl ClientProfile for HeartRateClient {
    fn name(&self) -> &'static str {
        "hrs_c"
    }

    fn bind(&mut self, prf_id: u8) {
        self.link.bind(prf_id);
    }

    fn on_browse(&mut self, conn: ConnIdx, status: OpStatus, svc: &BrowseService) {
        let event = match discovery(status, svc, &Uuid::from_u16(HRS_SERVICE_UUID)) {
            Discovery::Ignored => return,
            Discovery::Mismatch => HrsCEvent::DiscoveryFail,
            Discovery::Found(svc) => {
                let Ok(slot) = self.handles.get_mut(conn) else {
                    return;
                };
                *slot = Self::record(svc);
                debug!("hrs_c discovered {:?}", slot);
                HrsCEvent::DiscoveryComplete
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
        if handles.sensor_loc != Some(read.handle) {
            return;
        }
        match read.value.first().map(|raw| SensorLocation::try_from(*raw)) {
            Some(Ok(loc)) => (self.handler)(conn, HrsCEvent::SensorLocReadRsp(loc)),
            Some(Err(raw)) => warn!("hrs_c: unknown body sensor location {}", raw),
            None => warn!("hrs_c: empty body sensor location"),
        }
    }

    fn on_write_rsp(&mut self, conn: ConnIdx, status: OpStatus, handle: u16) {
        let Ok(handles) = self.handles.get(conn) else {
            return;
        };
        let event = if handles.hr_meas_cccd == Some(handle) {
            HrsCEvent::HrMeasNtfSetSuccess
        } else if handles.ctrl_point == Some(handle) {
            HrsCEvent::CtrlPointSet
        } else {
            return;
        };
        let event = if status.is_success() { event } else { HrsCEvent::WriteOpErr };
        (self.handler)(conn, event);
    }

    fn on_ntf_ind(&mut self, conn: ConnIdx, ntf: &NtfInd) {
        let is_meas = self.handles.get(conn).is_ok_and(|h| h.hr_meas == Some(ntf.handle));
        if !is_meas {
            return;
        }
        match HrMeasurement::decode(&ntf.value) {
            Ok(meas) => (self.handler)(conn, HrsCEvent::HrMeasValueReceive(meas)),
            Err(err) => warn!("hrs_c: malformed measurement {}: {}", hex::encode(&ntf.value), err),
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        if let Ok(handles) = self.handles.get_mut(conn) {
            *handles = HrsHandles::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::AttErrorCode;
    use crate::error::ProfileError;
    use crate::gatt::mock::{browsed, drain, recorder, GattcCall, MockGattcStack, Recorded};

    fn heart_rate_service() -> BrowseService {
        browsed(
            Uuid::from_u16(HRS_SERVICE_UUID),
            1,
            vec![
                BrowseAttr::Characteristic { properties: 0x10, value_handle: 3 },
                BrowseAttr::Value(Uuid::from_u16(HEART_RATE_MEAS_UUID)),
                BrowseAttr::Descriptor(Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID)),
                BrowseAttr::Characteristic { properties: 0x02, value_handle: 6 },
                BrowseAttr::Value(Uuid::from_u16(BODY_SENSOR_LOCATION_UUID)),
                BrowseAttr::Characteristic { properties: 0x08, value_handle: 8 },
                BrowseAttr::Value(Uuid::from_u16(HEART_RATE_CTRL_POINT_UUID)),
            ],
        )
    }

    fn setup() -> (HeartRateClient, Arc<MockGattcStack>, Recorded<HrsCEvent>) {
        let stack = MockGattcStack::new();
        let (handler, events) = recorder();
        let mut hrs = HeartRateClient::new(stack.clone(), &ProfileConfig::default(), handler);
        hrs.bind(2);
        hrs.on_browse(0, OpStatus::Success, &heart_rate_service());
        assert_eq!(drain(&events), vec![HrsCEvent::DiscoveryComplete]);
        (hrs, stack, events)
    }

    #[test]
    fn test_measurement_decoding() {
        assert_eq!(
            HrMeasurement::decode(&[0x00, 72]).unwrap(),
            HrMeasurement { heart_rate: 72, ..HrMeasurement::default() }
        );

        // u16 rate, contact supported + detected, energy, two RR intervals
        let value = [0x1F, 0x2C, 0x01, 0x10, 0x00, 0x00, 0x04, 0x00, 0x02];
        assert_eq!(
            HrMeasurement::decode(&value).unwrap(),
            HrMeasurement {
                heart_rate: 300,
                is_sensor_contact_detected: Some(true),
                energy_expended: Some(16),
                rr_intervals: vec![1000, 500],
            }
        );

        assert_eq!(
            HrMeasurement::decode(&[0x04, 60]).unwrap().is_sensor_contact_detected,
            Some(false)
        );
        assert!(HrMeasurement::decode(&[0x01, 0x2C]).is_err());
        assert!(HrMeasurement::decode(&[0x08, 60, 0x01]).is_err());
        assert!(HrMeasurement::decode(&[]).is_err());
    }

    #[test]
    fn test_rr_conversion() {
        assert_eq!(rr_to_millis(1024), 1000);
        assert_eq!(rr_to_millis(819), 799);
        assert_eq!(rr_to_millis(u16::MAX), 63999);
    }

    #[test]
    fn test_discovered_operations() {
        let (hrs, stack, _) = setup();
        assert_eq!(
            *hrs.handles(0).unwrap(),
            HrsHandles {
                srvc_start: 1,
                srvc_end: 8,
                hr_meas: Some(3),
                hr_meas_cccd: Some(4),
                sensor_loc: Some(6),
                ctrl_point: Some(8),
            }
        );

        hrs.heart_rate_meas_notify_set(0, true).unwrap();
        hrs.sensor_loc_read(0).unwrap();
        hrs.ctrl_point_set(0, 0x01).unwrap();
        assert_eq!(
            stack.take_calls(),
            vec![
                GattcCall::Write { prf_id: 2, conn: 0, handle: 4, value: vec![0x01, 0x00] },
                GattcCall::Read { prf_id: 2, conn: 0, handle: 6 },
                GattcCall::Write { prf_id: 2, conn: 0, handle: 8, value: vec![0x01] },
            ]
        );
        assert_eq!(hrs.sensor_loc_read(1), Err(ProfileError::InvalidHandle));
    }

    #[test]
    fn test_callbacks_to_events() {
        let (mut hrs, _, events) = setup();
        hrs.on_write_rsp(0, OpStatus::Success, 4);
        hrs.on_write_rsp(0, OpStatus::Success, 8);
        hrs.on_write_rsp(0, OpStatus::Failed(AttErrorCode::ApplicationError(0x80)), 8);
        hrs.on_read_rsp(0, OpStatus::Success, &ReadRsp::single(6, [SensorLocation::Chest as u8]));
        hrs.on_read_rsp(0, OpStatus::Success, &ReadRsp::single(6, [0x42]));
        hrs.on_ntf_ind(0, &NtfInd::notification(3, [0x00, 90]));
        hrs.on_ntf_ind(0, &NtfInd::notification(3, [0x01]));
        hrs.on_ntf_ind(0, &NtfInd::notification(6, [0x00, 90]));

        assert_eq!(
            drain(&events),
            vec![
                HrsCEvent::HrMeasNtfSetSuccess,
                HrsCEvent::CtrlPointSet,
                HrsCEvent::WriteOpErr,
                HrsCEvent::SensorLocReadRsp(SensorLocation::Chest),
                HrsCEvent::HrMeasValueReceive(HrMeasurement { heart_rate: 90, ..HrMeasurement::default() }),
            ]
        );
    }
}

//! Heart Rate Service (server)
//!
//! Exposes Heart Rate Measurement (notify), optional Body Sensor Location
//! (read) and optional Heart Rate Control Point (write). RR intervals are
//! buffered between measurements and drained oldest first into each
//! notification as room allows.

use crate::att::{AttErrorCode, AttPermissions, NtfInd, ReadConfirm, ReadRequest, WriteConfirm, WriteRequest};
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::cccd::{cccd_value_valid, parse_cccd_write, Cccd, ConnTable};
use crate::gatt::server::ServerProfile;
use crate::gatt::stack::GattsStack;
use crate::gatt::table::{AttrDesc, CharMask, ServiceDb, ServiceInstance, ServiceKind};
use crate::gatt::{ConnIdx, EventHandler, ProfileConfig};
use crate::uuid::Uuid;
use log::{debug, info, trace};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::Arc;

pub const HRS_SERVICE_UUID: u16 = 0x180D;
pub const HEART_RATE_MEAS_UUID: u16 = 0x2A37;
pub const BODY_SENSOR_LOCATION_UUID: u16 = 0x2A38;
pub const HEART_RATE_CTRL_POINT_UUID: u16 = 0x2A39;

/// Maximum encoded Heart Rate Measurement length
pub const HRS_MEAS_MAX_LEN: usize = 20;
/// RR intervals kept between two measurements
pub const HRS_MAX_BUFFERED_RR_INTERVALS: usize = 20;

/// Control point opcode resetting the energy expended counter
pub const CTRL_POINT_RESET_ENERGY_EXPENDED: u8 = 0x01;
/// "Control point not supported" application error
const CTRL_POINT_NOT_SUPPORTED: u8 = 0x80;

#[allow(dead_code)]
mod idx {
    pub const SVC: usize = 0;
    pub const MEAS_CHAR: usize = 1;
    pub const MEAS_VAL: usize = 2;
    pub const MEAS_NTF_CFG: usize = 3;
    pub const BSL_CHAR: usize = 4;
    pub const BSL_VAL: usize = 5;
    pub const CTRL_PT_CHAR: usize = 6;
    pub const CTRL_PT_VAL: usize = 7;
    pub const NB: usize = 8;
}

static HRS_ATTR_TAB: [AttrDesc; idx::NB] = {
    let mut tab = [AttrDesc::characteristic(); idx::NB];
    tab[idx::SVC] = AttrDesc::primary_service();
    tab[idx::MEAS_CHAR] = AttrDesc::characteristic();
    tab[idx::MEAS_VAL] =
        AttrDesc::new(Uuid::from_u16(HEART_RATE_MEAS_UUID), AttPermissions::NOTIFY, HRS_MEAS_MAX_LEN as u16);
    tab[idx::MEAS_NTF_CFG] = AttrDesc::new(Uuid::from_u16(crate::att::CLIENT_CHAR_CONFIG_UUID), AttPermissions::CCCD, 2);
    tab[idx::BSL_CHAR] = AttrDesc::characteristic();
    tab[idx::BSL_VAL] = AttrDesc::new(Uuid::from_u16(BODY_SENSOR_LOCATION_UUID), AttPermissions::READ, 1);
    tab[idx::CTRL_PT_CHAR] = AttrDesc::characteristic();
    tab[idx::CTRL_PT_VAL] = AttrDesc::new(Uuid::from_u16(HEART_RATE_CTRL_POINT_UUID), AttPermissions::WRITE_REQ, 1);
    tab
};

/// Measurement, its CCCD and the service declaration
pub const HRS_CHAR_MANDATORY: CharMask = CharMask::new(0x0F);
/// Body Sensor Location characteristic
pub const HRS_CHAR_BODY_SENSOR_LOC_SUP: CharMask = CharMask::new(0x30);
/// Energy expended support, which adds the control point
pub const HRS_CHAR_ENERGY_EXP_SUP: CharMask = CharMask::new(0xC0);

bitflags::bitflags! {
    /// Flags byte leading every Heart Rate Measurement
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HrMeasFlags: u8 {
        const RATE_FORMAT_U16 = 0x01;
        const SENSOR_CONTACT_DETECTED = 0x02;
        const SENSOR_CONTACT_SUPPORTED = 0x04;
        const ENERGY_EXPENDED_PRESENT = 0x08;
        const RR_INTERVAL_PRESENT = 0x10;
    }
}

/// Body Sensor Location values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SensorLocation {
    #[default]
    Other = 0,
    Chest = 1,
    Wrist = 2,
    Finger = 3,
    Hand = 4,
    EarLobe = 5,
    Foot = 6,
}

impl TryFrom<u8> for SensorLocation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => SensorLocation::Other,
            1 => SensorLocation::Chest,
            2 => SensorLocation::Wrist,
            3 => SensorLocation::Finger,
            4 => SensorLocation::Hand,
            5 => SensorLocation::EarLobe,
            6 => SensorLocation::Foot,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrsEvent {
    NotificationEnabled,
    NotificationDisabled,
    ResetEnergyExpended,
    ReadBodySensorLocation,
}

/// Heart Rate Service configuration
#[derive(Debug, Clone)]
pub struct HrsInit {
    pub char_mask: CharMask,
    pub sensor_loc: SensorLocation,
    pub is_sensor_contact_supported: bool,
}

impl Default for HrsInit {
    fn default() -> Self {
        Self {
            char_mask: HRS_CHAR_MANDATORY
                .union(HRS_CHAR_BODY_SENSOR_LOC_SUP)
                .union(HRS_CHAR_ENERGY_EXP_SUP),
            sensor_loc: SensorLocation::default(),
            is_sensor_contact_supported: false,
        }
    }
}

pub struct HeartRateServer {
    stack: Arc<dyn GattsStack>,
    svc: ServiceInstance,
    init: HrsInit,
    ntf_cfg: ConnTable<Cccd>,
    meas_value: Vec<u8>,
    energy_expended: u16,
    is_sensor_contact_detected: bool,
    rr_intervals: VecDeque<u16>,
    handler: EventHandler<HrsEvent>,
}

impl HeartRateServer {
    pub fn new(
        stack: Arc<dyn GattsStack>,
        config: &ProfileConfig,
        init: HrsInit,
        handler: EventHandler<HrsEvent>,
    ) -> Self {
        let db = ServiceDb {
            uuid: Uuid::from_u16(HRS_SERVICE_UUID),
            kind: ServiceKind::Primary,
            attrs: &HRS_ATTR_TAB,
            mask: init.char_mask.union(HRS_CHAR_MANDATORY),
        };
        Self {
            stack,
            svc: ServiceInstance::new(db),
            init,
            ntf_cfg: ConnTable::new(config.max_connections),
            meas_value: Vec::new(),
            energy_expended: 0,
            is_sensor_contact_detected: false,
            rr_intervals: VecDeque::with_capacity(HRS_MAX_BUFFERED_RR_INTERVALS),
            handler,
        }
    }

    /// Buffers an RR interval (1/1024 s units) for the next measurement.
    /// The oldest interval is dropped when the buffer is full.
    pub fn rr_interval_add(&mut self, rr_interval: u16) {
        if self.rr_intervals.len() == HRS_MAX_BUFFERED_RR_INTERVALS {
            self.rr_intervals.pop_front();
        }
        self.rr_intervals.push_back(rr_interval);
    }

    pub fn energy_update(&mut self, energy: u16) {
        self.energy_expended = energy;
    }

    pub fn sensor_contact_detected_update(&mut self, is_sensor_contact_detected: bool) {
        self.is_sensor_contact_detected = is_sensor_contact_detected;
    }

    pub fn sensor_contact_supported_set(&mut self, is_sensor_contact_supported: bool) {
        self.init.is_sensor_contact_supported = is_sensor_contact_supported;
    }

    pub fn sensor_location_set(&mut self, sensor_loc: SensorLocation) {
        self.init.sensor_loc = sensor_loc;
    }

    pub fn buffered_rr_intervals(&self) -> usize {
        self.rr_intervals.len()
    }

    /// Encodes the measurement; returns the value and how many buffered RR
    /// intervals it carries.
    fn encode(&self, heart_rate: u16, is_energy_updated: bool) -> (Vec<u8>, usize) {
        let mut flags = HrMeasFlags::empty();
        let mut value = Vec::with_capacity(HRS_MEAS_MAX_LEN);
        value.push(0);

        if self.init.is_sensor_contact_supported {
            flags |= HrMeasFlags::SENSOR_CONTACT_SUPPORTED;
        }
        if self.is_sensor_contact_detected {
            flags |= HrMeasFlags::SENSOR_CONTACT_DETECTED;
        }

        match u8::try_from(heart_rate) {
            Ok(rate) => value.push(rate),
            Err(_) => {
                flags |= HrMeasFlags::RATE_FORMAT_U16;
                value.extend_from_slice(&heart_rate.to_le_bytes());
            }
        }

        let energy_supported = self.svc.db().mask.bits() & HRS_CHAR_ENERGY_EXP_SUP.bits() != 0;
        if energy_supported && is_energy_updated {
            flags |= HrMeasFlags::ENERGY_EXPENDED_PRESENT;
            value.extend_from_slice(&self.energy_expended.to_le_bytes());
        }

        let room = (HRS_MEAS_MAX_LEN - value.len()) / 2;
        let rr_count = room.min(self.rr_intervals.len());
        if rr_count > 0 {
            flags |= HrMeasFlags::RR_INTERVAL_PRESENT;
            for rr in self.rr_intervals.iter().take(rr_count) {
                value.extend_from_slice(&rr.to_le_bytes());
            }
        }

        value[0] = flags.bits();
        (value, rr_count)
    }

    /// Encodes and notifies a heart rate measurement.
    ///
    /// RR intervals leave the buffer only once the notification was accepted
    /// by the stack.
    pub fn heart_rate_measurement_send(
        &mut self,
        conn: ConnIdx,
        heart_rate: u16,
        is_energy_updated: bool,
    ) -> ProfileResult<()> {
        let (value, rr_count) = self.encode(heart_rate, is_energy_updated);
        self.meas_value = value.clone();

        if !self.ntf_cfg.get(conn)?.notifications_enabled() {
            return Err(ProfileError::NtfDisabled);
        }

        let handle = self.svc.handle_of(idx::MEAS_VAL).ok_or(ProfileError::InvalidHandle)?;
        trace!("hrs measurement: {}", hex::encode(&value));
        self.stack.notify_indicate(conn, &NtfInd::notification(handle, value))?;
        self.rr_intervals.drain(..rr_count);
        Ok(())
    }

    fn set_ntf_cfg(&mut self, conn: ConnIdx, cfg: Cccd) -> ProfileResult<()> {
        *self.ntf_cfg.get_mut(conn)? = cfg;
        let event = if cfg.notifications_enabled() {
            HrsEvent::NotificationEnabled
        } else {
            HrsEvent::NotificationDisabled
        };
        (self.handler)(conn, event);
        Ok(())
    }
}

impl ServerProfile for HeartRateServer {
    fn name(&self) -> &'static str {
        "hrs"
    }

    fn init(&mut self) -> ProfileResult<()> {
        let start = self.stack.create_service(self.svc.db())?;
        self.svc.bind(start);
        info!("heart rate service created at handle {:#06x}", start);
        Ok(())
    }

    fn handle_range(&self) -> Option<RangeInclusive<u16>> {
        self.svc.handle_range()
    }

    fn on_read(&mut self, conn: ConnIdx, req: &ReadRequest) -> ReadConfirm {
        match self.svc.idx_of(req.handle) {
            Some(idx::MEAS_VAL) => ReadConfirm::value(req.handle, self.meas_value.clone()),
            Some(idx::MEAS_NTF_CFG) => match self.ntf_cfg.get(conn) {
                Ok(cfg) => ReadConfirm::value(req.handle, cfg.to_le_bytes()),
                Err(_) => ReadConfirm::error(req.handle, AttErrorCode::Unlikely),
            },
            Some(idx::BSL_VAL) => {
                (self.handler)(conn, HrsEvent::ReadBodySensorLocation);
                ReadConfirm::value(req.handle, [self.init.sensor_loc as u8])
            }
            _ => ReadConfirm::error(req.handle, AttErrorCode::InvalidHandle),
        }
    }

    fn on_write(&mut self, conn: ConnIdx, req: &WriteRequest) -> WriteConfirm {
        match self.svc.idx_of(req.handle) {
            Some(idx::MEAS_NTF_CFG) => {
                let cfg = match parse_cccd_write(&req.value) {
                    Ok(cfg) => cfg,
                    Err(code) => return WriteConfirm::error(req.handle, code),
                };
                match self.set_ntf_cfg(conn, cfg) {
                    Ok(()) => WriteConfirm::ok(req.handle),
                    Err(_) => WriteConfirm::error(req.handle, AttErrorCode::Unlikely),
                }
            }
            Some(idx::CTRL_PT_VAL) => {
                if req.value.first() == Some(&CTRL_POINT_RESET_ENERGY_EXPENDED) {
                    (self.handler)(conn, HrsEvent::ResetEnergyExpended);
                    WriteConfirm::ok(req.handle)
                } else {
                    debug!("hrs control point value {} not supported", hex::encode(&req.value));
                    WriteConfirm::error(req.handle, AttErrorCode::ApplicationError(CTRL_POINT_NOT_SUPPORTED))
                }
            }
            _ => WriteConfirm::error(req.handle, AttErrorCode::InvalidHandle),
        }
    }

    fn on_cccd_set(&mut self, conn: ConnIdx, handle: u16, value: u16) {
        if !cccd_value_valid(value) {
            return;
        }
        if self.svc.idx_of(handle) == Some(idx::MEAS_NTF_CFG) {
            let _ = self.set_ntf_cfg(conn, Cccd::from_bits_retain(value));
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        if let Ok(cfg) = self.ntf_cfg.get_mut(conn) {
            *cfg = Cccd::empty();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::mock::{drain, recorder, MockGattsStack};

    fn setup(init: HrsInit) -> (HeartRateServer, Arc<MockGattsStack>, crate::gatt::mock::Recorded<HrsEvent>) {
        let stack = MockGattsStack::new();
        let (handler, events) = recorder();
        let mut hrs = HeartRateServer::new(stack.clone(), &ProfileConfig::default(), init, handler);
        hrs.init().unwrap();
        (hrs, stack, events)
    }

    fn enable_notifications(hrs: &mut HeartRateServer) {
        // service at 1, measurement value at 3, CCCD at 4
        let cfm = hrs.on_write(0, &WriteRequest::new(4, [0x01, 0x00]));
        assert_eq!(cfm.result, Ok(()));
    }

    #[test]
    fn test_send_requires_notifications() {
        let (mut hrs, stack, _) = setup(HrsInit::default());
        assert_eq!(hrs.heart_rate_measurement_send(0, 70, false), Err(ProfileError::NtfDisabled));
        assert!(stack.take_sent().is_empty());
    }

    #[test]
    fn test_measurement_encoding() {
        let init = HrsInit { is_sensor_contact_supported: true, ..HrsInit::default() };
        let (mut hrs, stack, events) = setup(init);
        enable_notifications(&mut hrs);
        assert_eq!(drain(&events), vec![HrsEvent::NotificationEnabled]);

        hrs.sensor_contact_detected_update(true);
        hrs.energy_update(0x0102);
        hrs.heart_rate_measurement_send(0, 300, true).unwrap();

        let sent = stack.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.handle, 3);
        assert_eq!(sent[0].1.value, vec![0x0F, 0x2C, 0x01, 0x02, 0x01]);
    }

    #[test]
    fn test_rr_intervals_drain_oldest_first() {
        let (mut hrs, stack, _) = setup(HrsInit::default());
        enable_notifications(&mut hrs);
        for rr in 1..=12u16 {
            hrs.rr_interval_add(rr);
        }

        // flags + u8 rate leaves room for 9 intervals
        hrs.heart_rate_measurement_send(0, 60, false).unwrap();
        let value = stack.take_sent().remove(0).1.value;
        assert_eq!(value.len(), 20);
        assert_eq!(value[0], HrMeasFlags::RR_INTERVAL_PRESENT.bits());
        assert_eq!(&value[2..4], &1u16.to_le_bytes());
        assert_eq!(hrs.buffered_rr_intervals(), 3);

        hrs.heart_rate_measurement_send(0, 60, false).unwrap();
        let value = stack.take_sent().remove(0).1.value;
        assert_eq!(value.len(), 2 + 3 * 2);
        assert_eq!(&value[2..4], &10u16.to_le_bytes());
        assert_eq!(hrs.buffered_rr_intervals(), 0);

        hrs.heart_rate_measurement_send(0, 60, false).unwrap();
        assert_eq!(stack.take_sent().remove(0).1.value, vec![0x00, 60]);
    }

    #[test]
    fn test_refused_send_keeps_rr_intervals() {
        let (mut hrs, stack, _) = setup(HrsInit::default());
        enable_notifications(&mut hrs);
        hrs.rr_interval_add(800);
        hrs.rr_interval_add(810);

        *stack.send_error.lock().unwrap() = Some(ProfileError::NoResources);
        assert_eq!(hrs.heart_rate_measurement_send(0, 72, false), Err(ProfileError::NoResources));
        assert_eq!(hrs.buffered_rr_intervals(), 2);

        *stack.send_error.lock().unwrap() = None;
        hrs.heart_rate_measurement_send(0, 72, false).unwrap();
        assert_eq!(hrs.buffered_rr_intervals(), 0);
        let value = stack.take_sent().remove(0).1.value;
        assert_eq!(&value[2..], &[0x20, 0x03, 0x2A, 0x03]);
    }

    #[test]
    fn test_rr_buffer_drops_oldest_when_full() {
        let (mut hrs, _, _) = setup(HrsInit::default());
        for rr in 0..(HRS_MAX_BUFFERED_RR_INTERVALS as u16 + 5) {
            hrs.rr_interval_add(rr);
        }
        assert_eq!(hrs.buffered_rr_intervals(), HRS_MAX_BUFFERED_RR_INTERVALS);
        assert_eq!(hrs.rr_intervals.front(), Some(&5));
    }

    #[test]
    fn test_energy_omitted_without_support() {
        let init = HrsInit { char_mask: HRS_CHAR_MANDATORY, ..HrsInit::default() };
        let (mut hrs, stack, _) = setup(init);
        enable_notifications(&mut hrs);
        hrs.energy_update(500);
        hrs.heart_rate_measurement_send(0, 80, true).unwrap();
        assert_eq!(stack.take_sent().remove(0).1.value, vec![0x00, 80]);
    }

    #[test]
    fn test_body_sensor_location_read_and_control_point() {
        let (mut hrs, _, events) = setup(HrsInit::default());
        hrs.sensor_location_set(SensorLocation::Wrist);

        let cfm = hrs.on_read(0, &ReadRequest { handle: 6 });
        assert_eq!(cfm.result, Ok(vec![SensorLocation::Wrist as u8]));

        let cfm = hrs.on_write(0, &WriteRequest::new(8, [CTRL_POINT_RESET_ENERGY_EXPENDED]));
        assert_eq!(cfm.result, Ok(()));
        let cfm = hrs.on_write(0, &WriteRequest::new(8, [0x02]));
        assert_eq!(cfm.result, Err(AttErrorCode::ApplicationError(0x80)));

        assert_eq!(
            drain(&events),
            vec![HrsEvent::ReadBodySensorLocation, HrsEvent::ResetEnergyExpended]
        );
    }

    #[test]
    fn test_unknown_handle_and_recovered_cccd() {
        let (mut hrs, _, events) = setup(HrsInit::default());
        assert_eq!(hrs.on_read(0, &ReadRequest { handle: 42 }).result, Err(AttErrorCode::InvalidHandle));

        hrs.on_cccd_set(0, 4, 0x0005);
        assert!(drain(&events).is_empty());
        hrs.on_cccd_set(0, 4, 0x0001);
        assert_eq!(drain(&events), vec![HrsEvent::NotificationEnabled]);
        assert_eq!(hrs.on_read(0, &ReadRequest { handle: 4 }).result, Ok(vec![0x01, 0x00]));
    }
}

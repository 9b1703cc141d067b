//! HID over GATT Service (server)
//!
//! The service exposes up to three input reports, an optional output and
//! feature report, the boot keyboard and boot mouse reports, the report map,
//! HID information and the control point. Which of them exist is derived
//! from [`HidsInit`]; absent rows never get a handle.

use crate::att::{
    AttErrorCode, AttPermissions, NtfInd, ReadConfirm, ReadRequest, WriteConfirm, WriteRequest,
    CLIENT_CHAR_CONFIG_UUID, REPORT_REFERENCE_UUID,
};
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::cccd::{cccd_value_valid, parse_cccd_write, Cccd, ConnTable};
use crate::gatt::server::ServerProfile;
use crate::gatt::stack::GattsStack;
use crate::gatt::table::{AttrDesc, CharMask, ServiceDb, ServiceInstance, ServiceKind};
use crate::gatt::{ConnIdx, EventHandler, ProfileConfig};
use crate::uuid::Uuid;
use log::{debug, info, trace};
use std::ops::RangeInclusive;
use std::sync::Arc;

pub const HIDS_SERVICE_UUID: u16 = 0x1812;
pub const BOOT_KB_IN_REPORT_UUID: u16 = 0x2A22;
pub const BOOT_KB_OUT_REPORT_UUID: u16 = 0x2A32;
pub const BOOT_MOUSE_IN_REPORT_UUID: u16 = 0x2A33;
pub const HID_INFO_UUID: u16 = 0x2A4A;
pub const REPORT_MAP_UUID: u16 = 0x2A4B;
pub const HID_CTRL_POINT_UUID: u16 = 0x2A4C;
pub const REPORT_UUID: u16 = 0x2A4D;
pub const PROTOCOL_MODE_UUID: u16 = 0x2A4E;

/// Largest value of an input, output or feature report
pub const HIDS_REPORT_MAX_SIZE: usize = 20;
/// Largest report map the service accepts
pub const HIDS_REPORT_MAP_MAX_SIZE: usize = 512;
/// Number of input report characteristics the table carries
pub const HIDS_INPUT_REPORT_MAX_COUNT: usize = 3;

pub const BOOT_KB_IN_REPORT_MAX_SIZE: usize = 8;
pub const BOOT_KB_OUT_REPORT_MAX_SIZE: usize = 1;
pub const BOOT_MOUSE_IN_REPORT_MIN_SIZE: usize = 3;
pub const BOOT_MOUSE_IN_REPORT_MAX_SIZE: usize = 8;

const REPORT_REFERENCE_LEN: u16 = 2;
const HID_INFO_LEN: u16 = 4;

#[allow(dead_code)]
mod idx {
    pub const SVC: usize = 0;
    pub const PROTOCOL_MODE_CHAR: usize = 1;
    pub const PROTOCOL_MODE_VAL: usize = 2;
    pub const IN1_CHAR: usize = 3;
    pub const IN1_VAL: usize = 4;
    pub const IN1_CCCD: usize = 5;
    pub const IN1_REF: usize = 6;
    pub const IN2_CHAR: usize = 7;
    pub const IN2_VAL: usize = 8;
    pub const IN2_CCCD: usize = 9;
    pub const IN2_REF: usize = 10;
    pub const IN3_CHAR: usize = 11;
    pub const IN3_VAL: usize = 12;
    pub const IN3_CCCD: usize = 13;
    pub const IN3_REF: usize = 14;
    pub const OUT_CHAR: usize = 15;
    pub const OUT_VAL: usize = 16;
    pub const OUT_REF: usize = 17;
    pub const FEATURE_CHAR: usize = 18;
    pub const FEATURE_VAL: usize = 19;
    pub const FEATURE_REF: usize = 20;
    pub const REPORT_MAP_CHAR: usize = 21;
    pub const REPORT_MAP_VAL: usize = 22;
    pub const BOOT_KB_IN_CHAR: usize = 23;
    pub const BOOT_KB_IN_VAL: usize = 24;
    pub const BOOT_KB_IN_CCCD: usize = 25;
    pub const BOOT_KB_OUT_CHAR: usize = 26;
    pub const BOOT_KB_OUT_VAL: usize = 27;
    pub const BOOT_MOUSE_IN_CHAR: usize = 28;
    pub const BOOT_MOUSE_IN_VAL: usize = 29;
    pub const BOOT_MOUSE_IN_CCCD: usize = 30;
    pub const HID_INFO_CHAR: usize = 31;
    pub const HID_INFO_VAL: usize = 32;
    pub const CTRL_POINT_CHAR: usize = 33;
    pub const CTRL_POINT_VAL: usize = 34;
    pub const NB: usize = 35;
}

const INPUT_VAL_IDX: [usize; HIDS_INPUT_REPORT_MAX_COUNT] = [idx::IN1_VAL, idx::IN2_VAL, idx::IN3_VAL];

static HIDS_ATTR_TAB: [AttrDesc; idx::NB] = {
    let report_perm = AttPermissions::READ.union(AttPermissions::WRITE_REQ);
    let input_perm = report_perm.union(AttPermissions::NOTIFY);
    let output_perm = report_perm.union(AttPermissions::WRITE_CMD);
    let report = Uuid::from_u16(REPORT_UUID);
    let cccd = AttrDesc::new(Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID), AttPermissions::CCCD, 2);
    let reference = AttrDesc::new(Uuid::from_u16(REPORT_REFERENCE_UUID), AttPermissions::READ, REPORT_REFERENCE_LEN);
    let report_len = HIDS_REPORT_MAX_SIZE as u16;

    let mut tab = [AttrDesc::characteristic(); idx::NB];
    tab[idx::SVC] = AttrDesc::primary_service();
    tab[idx::PROTOCOL_MODE_VAL] = AttrDesc::new(
        Uuid::from_u16(PROTOCOL_MODE_UUID),
        AttPermissions::READ.union(AttPermissions::WRITE_CMD),
        1,
    );

    tab[idx::IN1_VAL] = AttrDesc::new(report, input_perm, report_len);
    tab[idx::IN1_CCCD] = cccd;
    tab[idx::IN1_REF] = reference;
    tab[idx::IN2_VAL] = AttrDesc::new(report, input_perm, report_len);
    tab[idx::IN2_CCCD] = cccd;
    tab[idx::IN2_REF] = reference;
    tab[idx::IN3_VAL] = AttrDesc::new(report, input_perm, report_len);
    tab[idx::IN3_CCCD] = cccd;
    tab[idx::IN3_REF] = reference;

    tab[idx::OUT_VAL] = AttrDesc::new(report, output_perm, report_len);
    tab[idx::OUT_REF] = reference;
    tab[idx::FEATURE_VAL] = AttrDesc::new(report, report_perm, report_len);
    tab[idx::FEATURE_REF] = reference;

    tab[idx::REPORT_MAP_VAL] =
        AttrDesc::new(Uuid::from_u16(REPORT_MAP_UUID), AttPermissions::READ, HIDS_REPORT_MAP_MAX_SIZE as u16);

    tab[idx::BOOT_KB_IN_VAL] =
        AttrDesc::new(Uuid::from_u16(BOOT_KB_IN_REPORT_UUID), input_perm, BOOT_KB_IN_REPORT_MAX_SIZE as u16);
    tab[idx::BOOT_KB_IN_CCCD] = cccd;
    tab[idx::BOOT_KB_OUT_VAL] =
        AttrDesc::new(Uuid::from_u16(BOOT_KB_OUT_REPORT_UUID), output_perm, BOOT_KB_OUT_REPORT_MAX_SIZE as u16);
    tab[idx::BOOT_MOUSE_IN_VAL] =
        AttrDesc::new(Uuid::from_u16(BOOT_MOUSE_IN_REPORT_UUID), input_perm, BOOT_MOUSE_IN_REPORT_MAX_SIZE as u16);
    tab[idx::BOOT_MOUSE_IN_CCCD] = cccd;

    tab[idx::HID_INFO_VAL] = AttrDesc::new(Uuid::from_u16(HID_INFO_UUID), AttPermissions::READ, HID_INFO_LEN);
    tab[idx::CTRL_POINT_VAL] = AttrDesc::new(Uuid::from_u16(HID_CTRL_POINT_UUID), AttPermissions::WRITE_CMD, 1);
    tab
};

/// Mask selecting indexes `first..=last`
const fn span(first: usize, last: usize) -> CharMask {
    CharMask::new(CharMask::all(last + 1).bits() & !CharMask::all(first).bits())
}

/// Mask of the attributes instantiated for `init`
fn char_mask(init: &HidsInit) -> CharMask {
    let mut mask = span(idx::SVC, idx::SVC)
        .union(span(idx::REPORT_MAP_CHAR, idx::REPORT_MAP_VAL))
        .union(span(idx::HID_INFO_CHAR, idx::CTRL_POINT_VAL));

    if init.is_kb || init.is_mouse {
        mask = mask.union(span(idx::PROTOCOL_MODE_CHAR, idx::PROTOCOL_MODE_VAL));
    }
    if init.is_kb {
        mask = mask.union(span(idx::BOOT_KB_IN_CHAR, idx::BOOT_KB_OUT_VAL));
    }
    if init.is_mouse {
        mask = mask.union(span(idx::BOOT_MOUSE_IN_CHAR, idx::BOOT_MOUSE_IN_CCCD));
    }
    if !init.input_reports.is_empty() {
        let count = init.input_reports.len().min(HIDS_INPUT_REPORT_MAX_COUNT);
        mask = mask.union(span(idx::IN1_CHAR, idx::IN1_REF + 4 * (count - 1)));
    }
    if init.output_report.is_some() {
        mask = mask.union(span(idx::OUT_CHAR, idx::OUT_REF));
    }
    if init.feature_report.is_some() {
        mask = mask.union(span(idx::FEATURE_CHAR, idx::FEATURE_REF));
    }
    mask
}

/// Protocol Mode characteristic values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolMode {
    Boot = 0x00,
    Report = 0x01,
}

/// HID Control Point commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlPoint {
    Suspend = 0x00,
    ExitSuspend = 0x01,
}

/// Report characteristic a value or CCCD belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportType {
    Input1,
    Input2,
    Input3,
    Output,
    Feature,
    BootKeyboardInput,
    BootKeyboardOutput,
    BootMouseInput,
}

impl ReportType {
    fn input(rep_idx: usize) -> Option<ReportType> {
        match rep_idx {
            0 => Some(ReportType::Input1),
            1 => Some(ReportType::Input2),
            2 => Some(ReportType::Input3),
            _ => None,
        }
    }

    fn of_value(attr_idx: usize) -> Option<ReportType> {
        Some(match attr_idx {
            idx::IN1_VAL => ReportType::Input1,
            idx::IN2_VAL => ReportType::Input2,
            idx::IN3_VAL => ReportType::Input3,
            idx::OUT_VAL => ReportType::Output,
            idx::FEATURE_VAL => ReportType::Feature,
            idx::BOOT_KB_IN_VAL => ReportType::BootKeyboardInput,
            idx::BOOT_KB_OUT_VAL => ReportType::BootKeyboardOutput,
            idx::BOOT_MOUSE_IN_VAL => ReportType::BootMouseInput,
            _ => return None,
        })
    }

    fn of_cccd(attr_idx: usize) -> Option<ReportType> {
        Some(match attr_idx {
            idx::IN1_CCCD => ReportType::Input1,
            idx::IN2_CCCD => ReportType::Input2,
            idx::IN3_CCCD => ReportType::Input3,
            idx::BOOT_KB_IN_CCCD => ReportType::BootKeyboardInput,
            idx::BOOT_MOUSE_IN_CCCD => ReportType::BootMouseInput,
            _ => return None,
        })
    }
}

/// Type field of a Report Reference descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReportReferenceType {
    Input = 0x01,
    Output = 0x02,
    Feature = 0x03,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportReference {
    pub report_id: u8,
    pub report_type: ReportReferenceType,
}

impl ReportReference {
    pub fn to_bytes(&self) -> [u8; 2] {
        [self.report_id, self.report_type as u8]
    }
}

/// Static description of one report characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportInit {
    /// Length of the report value, at most [`HIDS_REPORT_MAX_SIZE`]
    pub value_len: u16,
    pub reference: ReportReference,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HidInfoFlags: u8 {
        const REMOTE_WAKE = 0x01;
        const NORMALLY_CONNECTABLE = 0x02;
    }
}

/// HID Information characteristic value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidInfo {
    pub bcd_hid: u16,
    pub country_code: u8,
    pub flags: HidInfoFlags,
}

impl Default for HidInfo {
    fn default() -> Self {
        Self { bcd_hid: 0x0111, country_code: 0, flags: HidInfoFlags::NORMALLY_CONNECTABLE }
    }
}

impl HidInfo {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(usize::from(HID_INFO_LEN));
        buf.extend_from_slice(&self.bcd_hid.to_le_bytes());
        buf.push(self.country_code);
        buf.push(self.flags.bits());
        buf
    }
}

/// HID Service configuration
#[derive(Debug, Clone, Default)]
pub struct HidsInit {
    pub is_kb: bool,
    pub is_mouse: bool,
    /// Up to [`HIDS_INPUT_REPORT_MAX_COUNT`] input reports
    pub input_reports: Vec<ReportInit>,
    pub output_report: Option<ReportInit>,
    pub feature_report: Option<ReportInit>,
    pub report_map: Vec<u8>,
    pub hid_info: HidInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HidsEvent {
    HostSuspend,
    HostExitSuspend,
    BootModeEntered,
    ReportModeEntered,
    InReportNotifyEnabled(ReportType),
    InReportNotifyDisabled(ReportType),
    /// The peer wrote `data` at `offset` into a report value
    ReportCharWrite { report_type: ReportType, offset: u16, data: Vec<u8> },
}

#[derive(Debug, Clone, Copy, Default)]
struct ConnCccds {
    input: [Cccd; HIDS_INPUT_REPORT_MAX_COUNT],
    boot_kb_in: Cccd,
    boot_mouse_in: Cccd,
}

impl ConnCccds {
    fn slot_mut(&mut self, report_type: ReportType) -> Option<&mut Cccd> {
        match report_type {
            ReportType::Input1 => Some(&mut self.input[0]),
            ReportType::Input2 => Some(&mut self.input[1]),
            ReportType::Input3 => Some(&mut self.input[2]),
            ReportType::BootKeyboardInput => Some(&mut self.boot_kb_in),
            ReportType::BootMouseInput => Some(&mut self.boot_mouse_in),
            _ => None,
        }
    }

    fn slot(&self, report_type: ReportType) -> Cccd {
        match report_type {
            ReportType::Input1 => self.input[0],
            ReportType::Input2 => self.input[1],
            ReportType::Input3 => self.input[2],
            ReportType::BootKeyboardInput => self.boot_kb_in,
            ReportType::BootMouseInput => self.boot_mouse_in,
            _ => Cccd::empty(),
        }
    }
}

/// Copies `data` into `buf` at `offset`, rejecting writes past the end.
fn write_at(buf: &mut [u8], offset: u16, data: &[u8]) -> Result<(), AttErrorCode> {
    let offset = usize::from(offset);
    if offset > buf.len() {
        return Err(AttErrorCode::InvalidOffset);
    }
    let end = offset + data.len();
    if end > buf.len() {
        return Err(AttErrorCode::InvalidAttributeValueLength);
    }
    buf[offset..end].copy_from_slice(data);
    Ok(())
}

pub struct HidServer {
    stack: Arc<dyn GattsStack>,
    svc: ServiceInstance,
    init: HidsInit,
    cccds: ConnTable<ConnCccds>,
    protocol_mode: u8,
    ctrl_point: u8,
    input_values: Vec<Vec<u8>>,
    output_value: Vec<u8>,
    feature_value: Vec<u8>,
    boot_kb_in: [u8; BOOT_KB_IN_REPORT_MAX_SIZE],
    boot_kb_out: [u8; BOOT_KB_OUT_REPORT_MAX_SIZE],
    boot_mouse_in: [u8; BOOT_MOUSE_IN_REPORT_MAX_SIZE],
    handler: EventHandler<HidsEvent>,
}

impl HidServer {
    pub fn new(
        stack: Arc<dyn GattsStack>,
        config: &ProfileConfig,
        init: HidsInit,
        handler: EventHandler<HidsEvent>,
    ) -> ProfileResult<Self> {
        if init.input_reports.len() > HIDS_INPUT_REPORT_MAX_COUNT {
            return Err(ProfileError::InvalidParam("too many input reports"));
        }
        let mut reports = init.input_reports.iter().chain(&init.output_report).chain(&init.feature_report);
        if reports.any(|report| usize::from(report.value_len) > HIDS_REPORT_MAX_SIZE) {
            return Err(ProfileError::InvalidParam("report value too long"));
        }
        if init.report_map.len() > HIDS_REPORT_MAP_MAX_SIZE {
            return Err(ProfileError::InvalidParam("report map too long"));
        }

        let db = ServiceDb {
            uuid: Uuid::from_u16(HIDS_SERVICE_UUID),
            kind: ServiceKind::Primary,
            attrs: &HIDS_ATTR_TAB,
            mask: char_mask(&init),
        };
        let zeroed = |report: Option<&ReportInit>| vec![0u8; report.map_or(0, |r| usize::from(r.value_len))];

        Ok(Self {
            stack,
            svc: ServiceInstance::new(db),
            cccds: ConnTable::new(config.max_connections),
            protocol_mode: ProtocolMode::Report as u8,
            ctrl_point: ControlPoint::Suspend as u8,
            input_values: init.input_reports.iter().map(|r| zeroed(Some(r))).collect(),
            output_value: zeroed(init.output_report.as_ref()),
            feature_value: zeroed(init.feature_report.as_ref()),
            boot_kb_in: [0; BOOT_KB_IN_REPORT_MAX_SIZE],
            boot_kb_out: [0; BOOT_KB_OUT_REPORT_MAX_SIZE],
            boot_mouse_in: [0; BOOT_MOUSE_IN_REPORT_MAX_SIZE],
            init,
            handler,
        })
    }

    pub fn protocol_mode(&self) -> u8 {
        self.protocol_mode
    }

    /// Stores input report `rep_idx` and notifies it.
    ///
    /// `data` is truncated to [`HIDS_REPORT_MAX_SIZE`].
    pub fn input_rep_send(&mut self, conn: ConnIdx, rep_idx: usize, data: &[u8]) -> ProfileResult<()> {
        if rep_idx >= self.input_values.len() {
            return Err(ProfileError::InvalidParam("input report index"));
        }
        if data.is_empty() {
            return Err(ProfileError::InvalidParam("empty report"));
        }
        let data = &data[..data.len().min(HIDS_REPORT_MAX_SIZE)];
        let stored = &mut self.input_values[rep_idx];
        let len = data.len().min(stored.len());
        stored[..len].copy_from_slice(&data[..len]);

        let report_type = ReportType::input(rep_idx).ok_or(ProfileError::InvalidParam("input report index"))?;
        self.notify_report(conn, report_type, INPUT_VAL_IDX[rep_idx], data)
    }

    /// Stores and notifies the boot keyboard input report, truncated to 8 bytes.
    pub fn boot_kb_in_rep_send(&mut self, conn: ConnIdx, data: &[u8]) -> ProfileResult<()> {
        if data.is_empty() {
            return Err(ProfileError::InvalidParam("empty report"));
        }
        let data = &data[..data.len().min(BOOT_KB_IN_REPORT_MAX_SIZE)];
        self.boot_kb_in[..data.len()].copy_from_slice(data);
        self.notify_report(conn, ReportType::BootKeyboardInput, idx::BOOT_KB_IN_VAL, data)
    }

    /// Stores and notifies the boot mouse input report.
    ///
    /// The report carries at least the buttons and the X/Y displacement.
    pub fn boot_mouse_in_rep_send(&mut self, conn: ConnIdx, data: &[u8]) -> ProfileResult<()> {
        if data.len() < BOOT_MOUSE_IN_REPORT_MIN_SIZE {
            return Err(ProfileError::InvalidParam("boot mouse report too short"));
        }
        let data = &data[..data.len().min(BOOT_MOUSE_IN_REPORT_MAX_SIZE)];
        self.boot_mouse_in[..data.len()].copy_from_slice(data);
        self.notify_report(conn, ReportType::BootMouseInput, idx::BOOT_MOUSE_IN_VAL, data)
    }

    fn notify_report(
        &mut self,
        conn: ConnIdx,
        report_type: ReportType,
        attr_idx: usize,
        data: &[u8],
    ) -> ProfileResult<()> {
        if !self.cccds.get(conn)?.slot(report_type).notifications_enabled() {
            return Err(ProfileError::NtfDisabled);
        }
        let handle = self.svc.handle_of(attr_idx).ok_or(ProfileError::InvalidHandle)?;
        trace!("hids {:?} report: {}", report_type, hex::encode(data));
        self.stack.notify_indicate(conn, &NtfInd::notification(handle, data))
    }

    fn set_cccd(&mut self, conn: ConnIdx, report_type: ReportType, cfg: Cccd) -> ProfileResult<()> {
        let slot = self.cccds.get_mut(conn)?.slot_mut(report_type).ok_or(ProfileError::InvalidHandle)?;
        *slot = cfg;
        let event = if cfg.notifications_enabled() {
            HidsEvent::InReportNotifyEnabled(report_type)
        } else {
            HidsEvent::InReportNotifyDisabled(report_type)
        };
        (self.handler)(conn, event);
        Ok(())
    }

    fn report_value(&self, report_type: ReportType) -> &[u8] {
        match report_type {
            ReportType::Input1 => self.input_values.first().map(Vec::as_slice).unwrap_or(&[]),
            ReportType::Input2 => self.input_values.get(1).map(Vec::as_slice).unwrap_or(&[]),
            ReportType::Input3 => self.input_values.get(2).map(Vec::as_slice).unwrap_or(&[]),
            ReportType::Output => &self.output_value,
            ReportType::Feature => &self.feature_value,
            ReportType::BootKeyboardInput => &self.boot_kb_in,
            ReportType::BootKeyboardOutput => &self.boot_kb_out,
            ReportType::BootMouseInput => &self.boot_mouse_in,
        }
    }

    fn report_value_mut(&mut self, report_type: ReportType) -> &mut [u8] {
        match report_type {
            ReportType::Input1 => self.input_values.get_mut(0).map(Vec::as_mut_slice).unwrap_or(&mut []),
            ReportType::Input2 => self.input_values.get_mut(1).map(Vec::as_mut_slice).unwrap_or(&mut []),
            ReportType::Input3 => self.input_values.get_mut(2).map(Vec::as_mut_slice).unwrap_or(&mut []),
            ReportType::Output => &mut self.output_value,
            ReportType::Feature => &mut self.feature_value,
            ReportType::BootKeyboardInput => &mut self.boot_kb_in,
            ReportType::BootKeyboardOutput => &mut self.boot_kb_out,
            ReportType::BootMouseInput => &mut self.boot_mouse_in,
        }
    }

    fn reference(&self, attr_idx: usize) -> Option<ReportReference> {
        let report = match attr_idx {
            idx::IN1_REF => self.init.input_reports.first(),
            idx::IN2_REF => self.init.input_reports.get(1),
            idx::IN3_REF => self.init.input_reports.get(2),
            idx::OUT_REF => self.init.output_report.as_ref(),
            idx::FEATURE_REF => self.init.feature_report.as_ref(),
            _ => None,
        };
        report.map(|r| r.reference)
    }

    fn on_single_byte_write(&mut self, conn: ConnIdx, attr_idx: usize, value: &[u8]) -> Result<(), AttErrorCode> {
        let [byte] = value else {
            return Err(AttErrorCode::InvalidAttributeValueLength);
        };
        let event = if attr_idx == idx::PROTOCOL_MODE_VAL {
            self.protocol_mode = *byte;
            match *byte {
                0x00 => Some(HidsEvent::BootModeEntered),
                0x01 => Some(HidsEvent::ReportModeEntered),
                _ => None,
            }
        } else {
            self.ctrl_point = *byte;
            match *byte {
                0x00 => Some(HidsEvent::HostSuspend),
                0x01 => Some(HidsEvent::HostExitSuspend),
                _ => None,
            }
        };
        match event {
            Some(event) => (self.handler)(conn, event),
            None => debug!("hids: ignoring value {:#04x} at index {}", byte, attr_idx),
        }
        Ok(())
    }
}

impl ServerProfile for HidServer {
    fn name(&self) -> &'static str {
        "hids"
    }

    fn init(&mut self) -> ProfileResult<()> {
        let start = self.stack.create_service(self.svc.db())?;
        self.svc.bind(start);
        info!("hid service created at handle {:#06x}", start);
        Ok(())
    }

    fn handle_range(&self) -> Option<RangeInclusive<u16>> {
        self.svc.handle_range()
    }

    fn on_read(&mut self, conn: ConnIdx, req: &ReadRequest) -> ReadConfirm {
        let Some(attr_idx) = self.svc.idx_of(req.handle) else {
            return ReadConfirm::error(req.handle, AttErrorCode::InvalidHandle);
        };

        if let Some(report_type) = ReportType::of_value(attr_idx) {
            return ReadConfirm::value(req.handle, self.report_value(report_type));
        }
        if let Some(report_type) = ReportType::of_cccd(attr_idx) {
            return match self.cccds.get(conn) {
                Ok(cccds) => ReadConfirm::value(req.handle, cccds.slot(report_type).to_le_bytes()),
                Err(_) => ReadConfirm::error(req.handle, AttErrorCode::Unlikely),
            };
        }
        if let Some(reference) = self.reference(attr_idx) {
            return ReadConfirm::value(req.handle, reference.to_bytes());
        }

        match attr_idx {
            idx::PROTOCOL_MODE_VAL => ReadConfirm::value(req.handle, [self.protocol_mode]),
            idx::REPORT_MAP_VAL => ReadConfirm::value(req.handle, self.init.report_map.as_slice()),
            idx::HID_INFO_VAL => ReadConfirm::value(req.handle, self.init.hid_info.to_bytes()),
            idx::CTRL_POINT_VAL => ReadConfirm::value(req.handle, [self.ctrl_point]),
            _ => ReadConfirm::error(req.handle, AttErrorCode::InvalidHandle),
        }
    }

    fn on_write(&mut self, conn: ConnIdx, req: &WriteRequest) -> WriteConfirm {
        let Some(attr_idx) = self.svc.idx_of(req.handle) else {
            return WriteConfirm::error(req.handle, AttErrorCode::InvalidHandle);
        };

        let result = if let Some(report_type) = ReportType::of_cccd(attr_idx) {
            parse_cccd_write(&req.value).and_then(|cfg| {
                self.set_cccd(conn, report_type, cfg).map_err(|_| AttErrorCode::Unlikely)
            })
        } else if let Some(report_type) = ReportType::of_value(attr_idx) {
            write_at(self.report_value_mut(report_type), req.offset, &req.value).map(|()| {
                let event = HidsEvent::ReportCharWrite {
                    report_type,
                    offset: req.offset,
                    data: req.value.clone(),
                };
                (self.handler)(conn, event);
            })
        } else if attr_idx == idx::PROTOCOL_MODE_VAL || attr_idx == idx::CTRL_POINT_VAL {
            self.on_single_byte_write(conn, attr_idx, &req.value)
        } else {
            Err(AttErrorCode::WriteNotPermitted)
        };

        match result {
            Ok(()) => WriteConfirm::ok(req.handle),
            Err(code) => WriteConfirm::error(req.handle, code),
        }
    }

    fn on_cccd_set(&mut self, conn: ConnIdx, handle: u16, value: u16) {
        if !cccd_value_valid(value) {
            return;
        }
        if let Some(report_type) = self.svc.idx_of(handle).and_then(ReportType::of_cccd) {
            let _ = self.set_cccd(conn, report_type, Cccd::from_bits_retain(value));
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        if let Ok(cccds) = self.cccds.get_mut(conn) {
            *cccds = ConnCccds::default();
        }
    }
}

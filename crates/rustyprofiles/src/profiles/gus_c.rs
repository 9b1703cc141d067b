//! UART-like transport client
//!
//! Data written by the client goes to the peer RX characteristic as
//! write-without-response chunks sized to the connection MTU. Data from the
//! peer arrives as TX notifications; frames longer than one notification start
//! with a header byte and the total frame length, and are reassembled per
//! connection before delivery.

use crate::att::{NtfInd, ATT_DEFAULT_MTU, ATT_MAX_MTU, ATT_NTF_IND_HEADER_LEN};
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::cccd::{Cccd, ConnTable};
use crate::gatt::client::{discovery, BrowseAttr, ClientLink, ClientProfile, Discovery, OpStatus};
use crate::gatt::stack::GattcStack;
use crate::gatt::{BrowseService, ConnIdx, EventHandler, ProfileConfig};
use crate::profiles::vendor_uuid;
use crate::uuid::Uuid;
use log::{debug, trace, warn};
use std::sync::Arc;

pub const GUS_SERVICE_UUID: Uuid = vendor_uuid(0x0201);
pub const GUS_TX_CHAR_UUID: Uuid = vendor_uuid(0x0202);
pub const GUS_RX_CHAR_UUID: Uuid = vendor_uuid(0x0203);
pub const GUS_FLOW_CTRL_UUID: Uuid = vendor_uuid(0x0204);

/// First byte of a frame carrying its total length
pub const GUS_FRAME_HEADER: u8 = 0xA0;
/// Header byte plus the little-endian frame length
pub const GUS_FRAME_HEADER_LEN: usize = 3;
/// Largest frame the reassembly buffer accepts
pub const GUS_MAX_FRAME_LEN: usize = 516;

/// Flow control value written to or notified by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlowCtrl {
    Off = 0x00,
    On = 0x01,
}

impl TryFrom<u8> for FlowCtrl {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x00 => Ok(FlowCtrl::Off),
            0x01 => Ok(FlowCtrl::On),
            other => Err(other),
        }
    }
}

/// Peer handles found during discovery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GusHandles {
    pub srvc_start: u16,
    pub srvc_end: u16,
    pub tx: Option<u16>,
    pub tx_cccd: Option<u16>,
    pub rx: Option<u16>,
    pub flow_ctrl: Option<u16>,
    pub flow_ctrl_cccd: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GusCEvent {
    DiscoveryComplete,
    DiscoveryFail,
    TxNtfSetSuccess,
    FlowCtrlNtfSetSuccess,
    TxCplt,
    RxFlowUpdateCplt,
    WriteOpErr,
    TxFlowOn,
    TxFlowOff,
    PeerDataReceive(Vec<u8>),
}

/// Reassembles notifications into frames
#[derive(Debug, Clone, Default)]
pub struct FrameAssembler {
    expected: usize,
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn is_pending(&self) -> bool {
        self.expected != 0
    }

    pub fn reset(&mut self) {
        self.expected = 0;
        self.buf.clear();
    }

    /// Feeds one notification value. Returns a frame once one is complete.
    ///
    /// `payload_len` is the largest value one notification can carry on this
    /// link; frames declaring no more than that are passed through untouched.
    pub fn push(&mut self, value: &[u8], payload_len: usize) -> Option<Vec<u8>> {
        if !self.is_pending() {
            let Some(total) = frame_len(value) else {
                return Some(value.to_vec());
            };
            if total <= payload_len {
                return Some(value.to_vec());
            }
            if total > GUS_MAX_FRAME_LEN {
                warn!("gus_c: frame of {} bytes exceeds {}, dropped", total, GUS_MAX_FRAME_LEN);
                return None;
            }
            self.expected = total;
        }

        self.buf.extend_from_slice(value);
        if self.buf.len() > self.expected {
            warn!("gus_c: frame overrun, {} of {} bytes, dropped", self.buf.len(), self.expected);
            self.reset();
            return None;
        }
        if self.buf.len() < self.expected {
            trace!("gus_c: frame {}/{}", self.buf.len(), self.expected);
            return None;
        }
        self.expected = 0;
        Some(std::mem::take(&mut self.buf))
    }
}

fn frame_len(value: &[u8]) -> Option<usize> {
    match value {
        [GUS_FRAME_HEADER, lo, hi, ..] => Some(usize::from(u16::from_le_bytes([*lo, *hi]))),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct GusLink {
    handles: GusHandles,
    mtu: u16,
    rx: FrameAssembler,
}

impl GusLink {
    fn new(mtu: u16) -> Self {
        Self { handles: GusHandles::default(), mtu, rx: FrameAssembler::default() }
    }

    fn payload_len(&self) -> usize {
        usize::from(self.mtu.saturating_sub(ATT_NTF_IND_HEADER_LEN).max(1))
    }
}

pub struct UartClient {
    link: ClientLink,
    default_mtu: u16,
    conns: ConnTable<GusLink>,
    handler: EventHandler<GusCEvent>,
}

impl UartClient {
    pub fn new(stack: Arc<dyn GattcStack>, config: &ProfileConfig, handler: EventHandler<GusCEvent>) -> Self {
        Self {
            link: ClientLink::new(stack),
            default_mtu: config.att_mtu,
            conns: ConnTable::with_value(config.max_connections, GusLink::new(config.att_mtu)),
            handler,
        }
    }

    pub fn handles(&self, conn: ConnIdx) -> ProfileResult<&GusHandles> {
        Ok(&self.conns.get(conn)?.handles)
    }

    pub fn mtu(&self, conn: ConnIdx) -> ProfileResult<u16> {
        Ok(self.conns.get(conn)?.mtu)
    }

    pub fn disc_srvc_start(&self, conn: ConnIdx) -> ProfileResult<()> {
        self.link.browse(conn, &GUS_SERVICE_UUID)
    }

    pub fn tx_notify_set(&self, conn: ConnIdx, enable: bool) -> ProfileResult<()> {
        let handle = self.handles(conn)?.tx_cccd;
        self.link.write_cccd(conn, handle, Cccd::NOTIFICATION, enable)
    }

    pub fn flow_ctrl_notify_set(&self, conn: ConnIdx, enable: bool) -> ProfileResult<()> {
        let handle = self.handles(conn)?.flow_ctrl_cccd;
        self.link.write_cccd(conn, handle, Cccd::NOTIFICATION, enable)
    }

    /// Sends `data` to the peer RX characteristic in MTU sized chunks.
    ///
    /// Stops at the first chunk the stack refuses.
    pub fn tx_data_send(&self, conn: ConnIdx, data: &[u8]) -> ProfileResult<()> {
        let link = self.conns.get(conn)?;
        let handle = link.handles.rx.ok_or(ProfileError::InvalidHandle)?;
        if data.is_empty() {
            return Err(ProfileError::InvalidParam("empty data"));
        }
        for chunk in data.chunks(link.payload_len()) {
            self.link.write_no_resp(conn, Some(handle), chunk)?;
        }
        Ok(())
    }

    pub fn rx_flow_ctrl_set(&self, conn: ConnIdx, flow_ctrl: FlowCtrl) -> ProfileResult<()> {
        let handle = self.handles(conn)?.flow_ctrl;
        self.link.write(conn, handle, &[flow_ctrl as u8])
    }

    fn record(svc: &BrowseService) -> GusHandles {
        let mut handles = GusHandles {
            srvc_start: svc.start_handle,
            srvc_end: svc.end_handle,
            ..GusHandles::default()
        };
        for (handle, attr) in svc.attributes() {
            let BrowseAttr::Value(uuid) = attr else {
                continue;
            };
            if *uuid == GUS_RX_CHAR_UUID {
                handles.rx = Some(handle);
            } else if *uuid == GUS_TX_CHAR_UUID {
                handles.tx = Some(handle);
                handles.tx_cccd = handle.checked_add(1);
            } else if *uuid == GUS_FLOW_CTRL_UUID {
                handles.flow_ctrl = Some(handle);
                handles.flow_ctrl_cccd = handle.checked_add(1);
            }
        }
        handles
    }

    fn on_flow_ctrl(&mut self, conn: ConnIdx, value: &[u8]) {
        let event = match value.first().map(|raw| FlowCtrl::try_from(*raw)) {
            Some(Ok(FlowCtrl::On)) => GusCEvent::TxFlowOn,
            Some(Ok(FlowCtrl::Off)) => GusCEvent::TxFlowOff,
            Some(Err(raw)) => {
                debug!("gus_c: unknown flow control value {:#04x}", raw);
                return;
            }
            None => return,
        };
        (self.handler)(conn, event);
    }
}

impl ClientProfile for UartClient {
    fn name(&self) -> &'static str {
        "gus_c"
    }

    fn bind(&mut self, prf_id: u8) {
        self.link.bind(prf_id);
    }

    fn on_browse(&mut self, conn: ConnIdx, status: OpStatus, svc: &BrowseService) {
        let event = match discovery(status, svc, &GUS_SERVICE_UUID) {
            Discovery::Ignored => return,
            Discovery::Mismatch => GusCEvent::DiscoveryFail,
            Discovery::Found(svc) => {
                let Ok(link) = self.conns.get_mut(conn) else {
                    return;
                };
                link.handles = Self::record(svc);
                debug!("gus_c discovered {:?}", link.handles);
                GusCEvent::DiscoveryComplete
            }
        };
        (self.handler)(conn, event);
    }

    fn on_write_rsp(&mut self, conn: ConnIdx, status: OpStatus, handle: u16) {
        let Ok(link) = self.conns.get(conn) else {
            return;
        };
        let h = &link.handles;
        let event = if h.tx_cccd == Some(handle) {
            GusCEvent::TxNtfSetSuccess
        } else if h.flow_ctrl_cccd == Some(handle) {
            GusCEvent::FlowCtrlNtfSetSuccess
        } else if h.rx == Some(handle) {
            GusCEvent::TxCplt
        } else if h.flow_ctrl == Some(handle) {
            GusCEvent::RxFlowUpdateCplt
        } else {
            return;
        };
        let event = if status.is_success() { event } else { GusCEvent::WriteOpErr };
        (self.handler)(conn, event);
    }

    fn on_ntf_ind(&mut self, conn: ConnIdx, ntf: &NtfInd) {
        let Ok(link) = self.conns.get_mut(conn) else {
            return;
        };
        if link.handles.flow_ctrl == Some(ntf.handle) {
            self.on_flow_ctrl(conn, &ntf.value);
            return;
        }
        if link.handles.tx != Some(ntf.handle) {
            return;
        }
        let payload_len = link.payload_len();
        if let Some(frame) = link.rx.push(&ntf.value, payload_len) {
            (self.handler)(conn, GusCEvent::PeerDataReceive(frame));
        }
    }

    fn on_mtu_exchanged(&mut self, conn: ConnIdx, mtu: u16) {
        if let Ok(link) = self.conns.get_mut(conn) {
            link.mtu = mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        let mtu = self.default_mtu;
        if let Ok(link) = self.conns.get_mut(conn) {
            *link = GusLink::new(mtu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::att::AttErrorCode;
    use crate::gatt::mock::{browsed, drain, recorder, GattcCall, MockGattcStack, Recorded};
    use rand::Rng;

    fn uart_service() -> BrowseService {
        browsed(
            GUS_SERVICE_UUID,
            0x10,
            vec![
                BrowseAttr::Characteristic { properties: 0x10, value_handle: 0x12 },
                BrowseAttr::Value(GUS_TX_CHAR_UUID),
                BrowseAttr::Descriptor(Uuid::from_u16(crate::att::CLIENT_CHAR_CONFIG_UUID)),
                BrowseAttr::Characteristic { properties: 0x04, value_handle: 0x15 },
                BrowseAttr::Value(GUS_RX_CHAR_UUID),
                BrowseAttr::Characteristic { properties: 0x18, value_handle: 0x17 },
                BrowseAttr::Value(GUS_FLOW_CTRL_UUID),
                BrowseAttr::Descriptor(Uuid::from_u16(crate::att::CLIENT_CHAR_CONFIG_UUID)),
                BrowseAttr::None,
            ],
        )
    }

    fn setup() -> (UartClient, Arc<MockGattcStack>, Recorded<GusCEvent>) {
        let stack = MockGattcStack::new();
        let (handler, events) = recorder();
        let mut gus = UartClient::new(stack.clone(), &ProfileConfig::default(), handler);
        gus.bind(1);
        gus.on_browse(0, OpStatus::Success, &uart_service());
        assert_eq!(drain(&events), vec![GusCEvent::DiscoveryComplete]);
        (gus, stack, events)
    }

    fn frame(body_len: usize) -> Vec<u8> {
        let total = (body_len + GUS_FRAME_HEADER_LEN) as u16;
        let mut frame = vec![GUS_FRAME_HEADER];
        frame.extend_from_slice(&total.to_le_bytes());
        frame.extend((0..body_len).map(|i| i as u8));
        frame
    }

    #[test]
    fn test_discovery_cccd_follows_value() {
        let (gus, _, _) = setup();
        assert_eq!(
            *gus.handles(0).unwrap(),
            GusHandles {
                srvc_start: 0x10,
                srvc_end: 0x19,
                tx: Some(0x12),
                tx_cccd: Some(0x13),
                rx: Some(0x15),
                flow_ctrl: Some(0x17),
                flow_ctrl_cccd: Some(0x18),
            }
        );
    }

    #[test]
    fn test_value_at_last_handle_has_no_cccd() {
        let stack = MockGattcStack::new();
        let (handler, _) = recorder();
        let mut gus = UartClient::new(stack.clone(), &ProfileConfig::default(), handler);
        gus.bind(1);
        let svc = browsed(
            GUS_SERVICE_UUID,
            0xFFFD,
            vec![
                BrowseAttr::Characteristic { properties: 0x10, value_handle: 0xFFFF },
                BrowseAttr::Value(GUS_TX_CHAR_UUID),
            ],
        );
        gus.on_browse(0, OpStatus::Success, &svc);

        let handles = *gus.handles(0).unwrap();
        assert_eq!(handles.tx, Some(0xFFFF));
        assert_eq!(handles.tx_cccd, None);
        assert_eq!(gus.tx_notify_set(0, true), Err(ProfileError::InvalidHandle));
        assert!(stack.take_calls().is_empty());
    }

    #[test]
    fn test_tx_data_send_chunks_to_mtu() {
        let (mut gus, stack, _) = setup();
        let data: Vec<u8> = (0..50).collect();
        gus.tx_data_send(0, &data).unwrap();
        let lens: Vec<usize> = stack
            .take_calls()
            .into_iter()
            .map(|call| match call {
                GattcCall::WriteNoResp { handle: 0x15, value, .. } => value.len(),
                other => panic!("unexpected call {:?}", other),
            })
            .collect();
        assert_eq!(lens, vec![20, 20, 10]);

        gus.on_mtu_exchanged(0, 247);
        assert_eq!(gus.mtu(0).unwrap(), 247);
        gus.tx_data_send(0, &data).unwrap();
        assert_eq!(stack.take_calls().len(), 1);

        assert_eq!(gus.tx_data_send(0, &[]), Err(ProfileError::InvalidParam("empty data")));
        assert_eq!(gus.tx_data_send(1, &data), Err(ProfileError::InvalidHandle));

        gus.on_disconnected(0);
        assert_eq!(gus.mtu(0).unwrap(), 23);
    }

    #[test]
    fn test_random_sizes_reach_peer_intact() {
        let (mut gus, stack, _) = setup();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mtu = rng.gen_range(23..=247u16);
            gus.on_mtu_exchanged(0, mtu);
            let data: Vec<u8> = (0..rng.gen_range(1..=600)).map(|_| rng.gen()).collect();
            gus.tx_data_send(0, &data).unwrap();

            let mut sent = Vec::new();
            for call in stack.take_calls() {
                let GattcCall::WriteNoResp { value, .. } = call else {
                    panic!("unexpected call {:?}", call);
                };
                assert!(!value.is_empty() && value.len() <= usize::from(mtu) - 3);
                sent.extend(value);
            }
            assert_eq!(sent, data);
        }
    }

    #[test]
    fn test_flow_control() {
        let (mut gus, stack, events) = setup();
        gus.flow_ctrl_notify_set(0, true).unwrap();
        gus.rx_flow_ctrl_set(0, FlowCtrl::Off).unwrap();
        assert_eq!(
            stack.take_calls(),
            vec![
                GattcCall::Write { prf_id: 1, conn: 0, handle: 0x18, value: vec![0x01, 0x00] },
                GattcCall::Write { prf_id: 1, conn: 0, handle: 0x17, value: vec![0x00] },
            ]
        );

        gus.on_ntf_ind(0, &NtfInd::notification(0x17, [0x00]));
        gus.on_ntf_ind(0, &NtfInd::notification(0x17, [0x01]));
        gus.on_ntf_ind(0, &NtfInd::notification(0x17, [0x07]));
        gus.on_write_rsp(0, OpStatus::Success, 0x18);
        gus.on_write_rsp(0, OpStatus::Success, 0x17);
        gus.on_write_rsp(0, OpStatus::Success, 0x15);
        gus.on_write_rsp(0, OpStatus::Failed(AttErrorCode::WriteNotPermitted), 0x13);
        assert_eq!(
            drain(&events),
            vec![
                GusCEvent::TxFlowOff,
                GusCEvent::TxFlowOn,
                GusCEvent::FlowCtrlNtfSetSuccess,
                GusCEvent::RxFlowUpdateCplt,
                GusCEvent::TxCplt,
                GusCEvent::WriteOpErr,
            ]
        );
    }

    #[test]
    fn test_short_values_pass_through() {
        let (mut gus, _, events) = setup();
        gus.on_ntf_ind(0, &NtfInd::notification(0x12, *b"hello"));
        gus.on_ntf_ind(0, &NtfInd::notification(0x12, frame(10)));
        gus.on_ntf_ind(0, &NtfInd::notification(0x15, *b"ignored"));
        assert_eq!(
            drain(&events),
            vec![GusCEvent::PeerDataReceive(b"hello".to_vec()), GusCEvent::PeerDataReceive(frame(10))]
        );
    }

    #[test]
    fn test_reassembly_of_random_splits() {
        let (mut gus, _, events) = setup();
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let whole = frame(rng.gen_range(20..=GUS_MAX_FRAME_LEN - GUS_FRAME_HEADER_LEN));
            let mut rest = whole.as_slice();
            while !rest.is_empty() {
                let n = rng.gen_range(GUS_FRAME_HEADER_LEN..=20).min(rest.len());
                let (head, tail) = rest.split_at(n);
                gus.on_ntf_ind(0, &NtfInd::notification(0x12, head.to_vec()));
                rest = tail;
            }
            assert_eq!(drain(&events), vec![GusCEvent::PeerDataReceive(whole)]);
        }
    }

    #[test]
    fn test_oversize_and_overrun_frames_dropped() {
        let mut rx = FrameAssembler::default();
        let mut oversize = vec![GUS_FRAME_HEADER];
        oversize.extend_from_slice(&600u16.to_le_bytes());
        assert_eq!(rx.push(&oversize, 20), None);
        assert!(!rx.is_pending());

        let whole = frame(27);
        assert_eq!(rx.push(&whole[..20], 20), None);
        assert!(rx.is_pending());
        let mut too_long = whole[20..].to_vec();
        too_long.push(0xFF);
        assert_eq!(rx.push(&too_long, 20), None);
        assert!(!rx.is_pending());

        assert_eq!(rx.push(&whole[..20], 20), None);
        assert_eq!(rx.push(&whole[20..], 20), Some(whole));
    }
}

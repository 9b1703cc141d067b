//! Log Notification Service (server)
//!
//! Lets a peer query, dump and clear the device fault records. Records are
//! owned by an external [`FaultLog`]; a dump is sent as a chain of
//! notifications on Log Information, one chunk per completed notification.

use crate::att::{
    AttErrorCode, AttPermissions, NtfInd, NtfIndKind, ReadConfirm, ReadRequest, WriteConfirm, WriteRequest,
    CLIENT_CHAR_CONFIG_UUID,
};
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::cccd::{cccd_value_valid, parse_cccd_write, Cccd, ConnTable};
use crate::gatt::server::ServerProfile;
use crate::gatt::stack::GattsStack;
use crate::gatt::table::{AttrDesc, CharMask, ServiceDb, ServiceInstance, ServiceKind};
use crate::gatt::{ConnIdx, EventHandler, ProfileConfig};
use crate::profiles::vendor_uuid;
use crate::uuid::Uuid;
use log::{debug, info, trace, warn};
use std::ops::RangeInclusive;
use std::sync::Arc;

pub const LNS_SERVICE_UUID: Uuid = vendor_uuid(0x0801);
pub const LNS_LOG_INFO_UUID: Uuid = vendor_uuid(0x0802);
pub const LNS_LOG_CTRL_PT_UUID: Uuid = vendor_uuid(0x0803);

/// Log Information value length, the upper bound of a chunk
pub const LNS_LOG_INFO_VAL_LEN: u16 = 244;
pub const LNS_LOG_CTRL_PT_VAL_LEN: u16 = 1;
/// Chunk size used until [`LogNotificationServer::payload_len_update`]
pub const LNS_DEFAULT_PAYLOAD_LEN: u16 = 20;

pub const LNS_CTRL_PT_TRACE_STATUS_GET: u8 = 0x01;
pub const LNS_CTRL_PT_TRACE_INFO_DUMP: u8 = 0x02;
pub const LNS_CTRL_PT_TRACE_INFO_CLEAR: u8 = 0x03;

#[allow(dead_code)]
mod idx {
    pub const SVC: usize = 0;
    pub const LOG_INFO_CHAR: usize = 1;
    pub const LOG_INFO_VAL: usize = 2;
    pub const LOG_INFO_NTF_CFG: usize = 3;
    pub const CTRL_PT_CHAR: usize = 4;
    pub const CTRL_PT_VAL: usize = 5;
    pub const CTRL_PT_IND_CFG: usize = 6;
    pub const NB: usize = 7;
}

static LNS_ATTR_TAB: [AttrDesc; idx::NB] = {
    let cccd = AttrDesc::new(Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID), AttPermissions::CCCD, 2);
    let mut tab = [AttrDesc::characteristic(); idx::NB];
    tab[idx::SVC] = AttrDesc::primary_service();
    tab[idx::LOG_INFO_VAL] = AttrDesc::new(LNS_LOG_INFO_UUID, AttPermissions::NOTIFY, LNS_LOG_INFO_VAL_LEN);
    tab[idx::LOG_INFO_NTF_CFG] = cccd;
    tab[idx::CTRL_PT_VAL] = AttrDesc::new(
        LNS_LOG_CTRL_PT_UUID,
        AttPermissions::WRITE_REQ.union(AttPermissions::INDICATE),
        LNS_LOG_CTRL_PT_VAL_LEN,
    );
    tab[idx::CTRL_PT_IND_CFG] = cccd;
    tab
};

/// Store of fault records kept outside the profile
pub trait FaultLog: Send {
    /// Number of stored records
    fn records_num(&self) -> u8;

    /// Every record, concatenated in storage format
    fn records_dump(&self) -> Vec<u8>;

    fn records_clear(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LnsEvent {
    LogInfoNtfEnabled,
    LogInfoNtfDisabled,
    CtrlPtIndEnabled,
    CtrlPtIndDisabled,
    TraceStatusGet,
    TraceInfoDump,
    TraceInfoClear,
}

#[derive(Debug, Clone, Copy, Default)]
struct ConnState {
    log_info_ntf: Cccd,
    ctrl_pt_ind: Cccd,
}

/// A dump being notified chunk by chunk
#[derive(Debug)]
struct LogTransfer {
    conn: ConnIdx,
    data: Vec<u8>,
    offset: usize,
}

pub struct LogNotificationServer {
    stack: Arc<dyn GattsStack>,
    svc: ServiceInstance,
    fault_log: Box<dyn FaultLog>,
    conns: ConnTable<ConnState>,
    payload_len: u16,
    transfer: Option<LogTransfer>,
    handler: EventHandler<LnsEvent>,
}

impl LogNotificationServer {
    pub fn new(
        stack: Arc<dyn GattsStack>,
        config: &ProfileConfig,
        fault_log: Box<dyn FaultLog>,
        handler: EventHandler<LnsEvent>,
    ) -> Self {
        let db = ServiceDb {
            uuid: LNS_SERVICE_UUID,
            kind: ServiceKind::Primary,
            attrs: &LNS_ATTR_TAB,
            mask: CharMask::all(idx::NB),
        };
        Self {
            stack,
            svc: ServiceInstance::new(db),
            fault_log,
            conns: ConnTable::new(config.max_connections),
            payload_len: LNS_DEFAULT_PAYLOAD_LEN,
            transfer: None,
            handler,
        }
    }

    /// Sets the dump chunk size, clamped to the Log Information value length.
    pub fn payload_len_update(&mut self, payload_len: u16) -> ProfileResult<()> {
        if payload_len == 0 {
            return Err(ProfileError::InvalidParam("payload length"));
        }
        self.payload_len = payload_len.min(LNS_LOG_INFO_VAL_LEN);
        Ok(())
    }

    pub fn payload_len(&self) -> u16 {
        self.payload_len
    }

    pub fn is_transferring(&self) -> bool {
        self.transfer.is_some()
    }

    /// Indicates the number of stored records on the control point.
    pub fn log_status_send(&mut self, conn: ConnIdx, log_num: u8) -> ProfileResult<()> {
        if !self.conns.get(conn)?.ctrl_pt_ind.indications_enabled() {
            return Err(ProfileError::IndDisabled);
        }
        let handle = self.svc.handle_of(idx::CTRL_PT_VAL).ok_or(ProfileError::InvalidHandle)?;
        self.stack.notify_indicate(conn, &NtfInd::indication(handle, [log_num]))
    }

    /// Dumps the fault records and starts notifying them to `conn`.
    pub fn log_info_send(&mut self, conn: ConnIdx) -> ProfileResult<()> {
        if self.transfer.is_some() {
            return Err(ProfileError::Busy);
        }
        self.conns.get(conn)?;
        self.svc.handle_of(idx::LOG_INFO_VAL).ok_or(ProfileError::InvalidHandle)?;
        let data = self.fault_log.records_dump();
        debug!("lns: dumping {} bytes of fault records", data.len());
        self.transfer = Some(LogTransfer { conn, data, offset: 0 });
        self.log_info_chunk()
    }

    /// Sends the next chunk of the running dump, ending the transfer once
    /// everything went out or the send failed.
    fn log_info_chunk(&mut self) -> ProfileResult<()> {
        let Some(transfer) = self.transfer.as_mut() else {
            return Ok(());
        };
        let remaining = transfer.data.len() - transfer.offset;
        let chunk_len = remaining.min(usize::from(self.payload_len));
        if chunk_len == 0 {
            self.transfer = None;
            return Ok(());
        }

        let conn = transfer.conn;
        let enabled = self.conns.get(conn).is_ok_and(|state| state.log_info_ntf.notifications_enabled());
        let result = match self.svc.handle_of(idx::LOG_INFO_VAL) {
            _ if !enabled => Err(ProfileError::NtfDisabled),
            None => Err(ProfileError::InvalidHandle),
            Some(handle) => {
                let chunk = &transfer.data[transfer.offset..transfer.offset + chunk_len];
                trace!("lns log chunk at {}: {}", transfer.offset, hex::encode(chunk));
                self.stack.notify_indicate(conn, &NtfInd::notification(handle, chunk))
            }
        };

        match result {
            Ok(()) => transfer.offset += chunk_len,
            Err(_) => self.transfer = None,
        }
        result
    }

    fn set_cccd(&mut self, conn: ConnIdx, attr_idx: usize, cfg: Cccd) -> ProfileResult<()> {
        let state = self.conns.get_mut(conn)?;
        let event = if attr_idx == idx::LOG_INFO_NTF_CFG {
            state.log_info_ntf = cfg;
            if cfg.notifications_enabled() {
                LnsEvent::LogInfoNtfEnabled
            } else {
                LnsEvent::LogInfoNtfDisabled
            }
        } else {
            state.ctrl_pt_ind = cfg;
            if cfg.indications_enabled() {
                LnsEvent::CtrlPtIndEnabled
            } else {
                LnsEvent::CtrlPtIndDisabled
            }
        };
        (self.handler)(conn, event);
        Ok(())
    }

    fn on_ctrl_pt(&mut self, conn: ConnIdx, opcode: u8) {
        let (event, result) = match opcode {
            LNS_CTRL_PT_TRACE_STATUS_GET => {
                let num = self.fault_log.records_num();
                (LnsEvent::TraceStatusGet, self.log_status_send(conn, num))
            }
            LNS_CTRL_PT_TRACE_INFO_DUMP => (LnsEvent::TraceInfoDump, self.log_info_send(conn)),
            LNS_CTRL_PT_TRACE_INFO_CLEAR => {
                self.fault_log.records_clear();
                (LnsEvent::TraceInfoClear, Ok(()))
            }
            other => {
                debug!("lns: unknown control point opcode {:#04x}", other);
                return;
            }
        };
        if let Err(err) = result {
            warn!("lns: {:?} failed: {}", event, err);
        }
        (self.handler)(conn, event);
    }
}

impl ServerProfile for LogNotificationServer {
    fn name(&self) -> &'static str {
        "lns"
    }

    fn init(&mut self) -> ProfileResult<()> {
        let start = self.stack.create_service(self.svc.db())?;
        self.svc.bind(start);
        info!("log notification service created at handle {:#06x}", start);
        Ok(())
    }

    fn handle_range(&self) -> Option<RangeInclusive<u16>> {
        self.svc.handle_range()
    }

    fn on_read(&mut self, conn: ConnIdx, req: &ReadRequest) -> ReadConfirm {
        let state = match self.conns.get(conn) {
            Ok(state) => *state,
            Err(_) => return ReadConfirm::error(req.handle, AttErrorCode::Unlikely),
        };
        match self.svc.idx_of(req.handle) {
            Some(idx::LOG_INFO_NTF_CFG) => ReadConfirm::value(req.handle, state.log_info_ntf.to_le_bytes()),
            Some(idx::CTRL_PT_IND_CFG) => ReadConfirm::value(req.handle, state.ctrl_pt_ind.to_le_bytes()),
            _ => ReadConfirm::error(req.handle, AttErrorCode::InvalidHandle),
        }
    }

    fn on_write(&mut self, conn: ConnIdx, req: &WriteRequest) -> WriteConfirm {
        match self.svc.idx_of(req.handle) {
            Some(attr_idx @ (idx::LOG_INFO_NTF_CFG | idx::CTRL_PT_IND_CFG)) => {
                let result = parse_cccd_write(&req.value)
                    .and_then(|cfg| self.set_cccd(conn, attr_idx, cfg).map_err(|_| AttErrorCode::Unlikely));
                match result {
                    Ok(()) => WriteConfirm::ok(req.handle),
                    Err(code) => WriteConfirm::error(req.handle, code),
                }
            }
            Some(idx::CTRL_PT_VAL) => match req.value.first() {
                Some(&opcode) => {
                    self.on_ctrl_pt(conn, opcode);
                    WriteConfirm::ok(req.handle)
                }
                None => WriteConfirm::error(req.handle, AttErrorCode::InvalidAttributeValueLength),
            },
            _ => WriteConfirm::error(req.handle, AttErrorCode::InvalidHandle),
        }
    }

    fn on_cccd_set(&mut self, conn: ConnIdx, handle: u16, value: u16) {
        if !cccd_value_valid(value) {
            return;
        }
        if let Some(attr_idx @ (idx::LOG_INFO_NTF_CFG | idx::CTRL_PT_IND_CFG)) = self.svc.idx_of(handle) {
            let _ = self.set_cccd(conn, attr_idx, Cccd::from_bits_retain(value));
        }
    }

    fn on_ntf_ind_complete(
        &mut self,
        conn: ConnIdx,
        status: Result<(), AttErrorCode>,
        _kind: NtfIndKind,
        handle: u16,
    ) {
        if self.svc.idx_of(handle) != Some(idx::LOG_INFO_VAL) {
            return;
        }
        if self.transfer.as_ref().map(|t| t.conn) != Some(conn) {
            return;
        }
        match status {
            Ok(()) => {
                if let Err(err) = self.log_info_chunk() {
                    warn!("lns: log transfer aborted: {}", err);
                }
            }
            Err(code) => {
                warn!("lns: log chunk not delivered ({:?}), dropping transfer", code);
                self.transfer = None;
            }
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        if let Ok(state) = self.conns.get_mut(conn) {
            *state = ConnState::default();
        }
        if self.transfer.as_ref().is_some_and(|t| t.conn == conn) {
            self.transfer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatt::mock::{drain, recorder, MockGattsStack, Recorded};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct MemoryLog {
        records: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl FaultLog for MemoryLog {
        fn records_num(&self) -> u8 {
            self.records.lock().unwrap().len() as u8
        }

        fn records_dump(&self) -> Vec<u8> {
            self.records.lock().unwrap().concat()
        }

        fn records_clear(&mut self) {
            self.records.lock().unwrap().clear();
        }
    }

    // service at 1: log info value 3, its CCCD 4, control point 6, its CCCD 7
    const LOG_INFO: u16 = 3;
    const LOG_INFO_CCCD: u16 = 4;
    const CTRL_PT: u16 = 6;
    const CTRL_PT_CCCD: u16 = 7;

    fn setup(records: Vec<Vec<u8>>) -> (LogNotificationServer, Arc<MockGattsStack>, Recorded<LnsEvent>, MemoryLog) {
        let stack = MockGattsStack::new();
        let log = MemoryLog { records: Arc::new(Mutex::new(records)) };
        let (handler, events) = recorder();
        let mut lns =
            LogNotificationServer::new(stack.clone(), &ProfileConfig::default(), Box::new(log.clone()), handler);
        lns.init().unwrap();
        (lns, stack, events, log)
    }

    fn complete(lns: &mut LogNotificationServer, status: Result<(), AttErrorCode>) {
        lns.on_ntf_ind_complete(0, status, NtfIndKind::Notification, LOG_INFO);
    }

    #[test]
    fn test_status_get_indicates_record_count() {
        let (mut lns, stack, events, _) = setup(vec![vec![1; 4], vec![2; 4]]);
        lns.on_write(0, &WriteRequest::new(CTRL_PT_CCCD, [0x02, 0x00]));
        let cfm = lns.on_write(0, &WriteRequest::new(CTRL_PT, [LNS_CTRL_PT_TRACE_STATUS_GET]));
        assert_eq!(cfm.result, Ok(()));

        let sent = stack.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, NtfInd::indication(CTRL_PT, [2]));
        assert_eq!(drain(&events), vec![LnsEvent::CtrlPtIndEnabled, LnsEvent::TraceStatusGet]);
    }

    #[test]
    fn test_status_requires_indications() {
        let (mut lns, stack, events, _) = setup(vec![]);
        assert_eq!(lns.log_status_send(0, 3), Err(ProfileError::IndDisabled));
        lns.on_write(0, &WriteRequest::new(CTRL_PT, [LNS_CTRL_PT_TRACE_STATUS_GET]));
        assert!(stack.take_sent().is_empty());
        assert_eq!(drain(&events), vec![LnsEvent::TraceStatusGet]);
    }

    #[test]
    fn test_dump_is_chunked_across_completions() {
        let records: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i; 10]).collect();
        let (mut lns, stack, _, _) = setup(records);
        lns.on_write(0, &WriteRequest::new(LOG_INFO_CCCD, [0x01, 0x00]));
        lns.on_write(0, &WriteRequest::new(CTRL_PT, [LNS_CTRL_PT_TRACE_INFO_DUMP]));

        let mut received = Vec::new();
        let mut chunks = 0;
        while lns.is_transferring() {
            let sent = stack.take_sent();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].1.value.len() <= usize::from(LNS_DEFAULT_PAYLOAD_LEN));
            received.extend_from_slice(&sent[0].1.value);
            chunks += 1;
            complete(&mut lns, Ok(()));
        }
        assert_eq!(chunks, 3);
        assert_eq!(received.len(), 50);
        assert_eq!(&received[40..], &[4; 10]);
        assert!(stack.take_sent().is_empty());
    }

    #[test]
    fn test_dump_dropped_on_failure() {
        let (mut lns, stack, _, _) = setup(vec![vec![0xEE; 60]]);
        lns.on_write(0, &WriteRequest::new(LOG_INFO_CCCD, [0x01, 0x00]));
        lns.log_info_send(0).unwrap();
        assert_eq!(lns.log_info_send(0), Err(ProfileError::Busy));

        complete(&mut lns, Err(AttErrorCode::Unlikely));
        assert!(!lns.is_transferring());
        assert_eq!(stack.take_sent().len(), 1);

        // a fresh dump may start afterwards
        lns.log_info_send(0).unwrap();
        assert!(lns.is_transferring());
    }

    #[test]
    fn test_dump_without_notifications() {
        let (mut lns, stack, _, _) = setup(vec![vec![1; 8]]);
        assert_eq!(lns.log_info_send(0), Err(ProfileError::NtfDisabled));
        assert!(!lns.is_transferring());
        assert!(stack.take_sent().is_empty());

        // nothing stored: the transfer ends at once
        let (mut lns, _, _, _) = setup(vec![]);
        lns.on_write(0, &WriteRequest::new(LOG_INFO_CCCD, [0x01, 0x00]));
        assert_eq!(lns.log_info_send(0), Ok(()));
        assert!(!lns.is_transferring());
    }

    #[test]
    fn test_dump_before_service_created() {
        let stack = MockGattsStack::new();
        let log = MemoryLog { records: Arc::new(Mutex::new(vec![vec![1; 8]])) };
        let (handler, _) = recorder();
        let mut lns = LogNotificationServer::new(stack.clone(), &ProfileConfig::default(), Box::new(log), handler);

        assert_eq!(lns.log_info_send(0), Err(ProfileError::InvalidHandle));
        assert!(!lns.is_transferring());
        assert!(stack.take_sent().is_empty());
    }

    #[test]
    fn test_refused_dump_can_restart() {
        let (mut lns, stack, _, _) = setup(vec![vec![0xEE; 60]]);
        lns.on_write(0, &WriteRequest::new(LOG_INFO_CCCD, [0x01, 0x00]));
        *stack.send_error.lock().unwrap() = Some(ProfileError::NoResources);
        assert_eq!(lns.log_info_send(0), Err(ProfileError::NoResources));
        assert!(!lns.is_transferring());
        assert!(stack.take_sent().is_empty());

        *stack.send_error.lock().unwrap() = None;
        lns.log_info_send(0).unwrap();
        assert!(lns.is_transferring());
        assert_eq!(stack.take_sent().len(), 1);
    }

    #[test]
    fn test_payload_len_clamped() {
        let (mut lns, stack, _, _) = setup(vec![vec![7; 300]]);
        lns.payload_len_update(1000).unwrap();
        assert_eq!(lns.payload_len(), LNS_LOG_INFO_VAL_LEN);
        assert!(lns.payload_len_update(0).is_err());

        lns.on_write(0, &WriteRequest::new(LOG_INFO_CCCD, [0x01, 0x00]));
        lns.log_info_send(0).unwrap();
        assert_eq!(stack.take_sent()[0].1.value.len(), 244);
        complete(&mut lns, Ok(()));
        assert_eq!(stack.take_sent()[0].1.value.len(), 56);
    }

    #[test]
    fn test_clear_and_cccd_reads() {
        let (mut lns, _, events, log) = setup(vec![vec![1; 4]]);
        lns.on_cccd_set(0, LOG_INFO_CCCD, 0x0001);
        lns.on_write(0, &WriteRequest::new(CTRL_PT, [LNS_CTRL_PT_TRACE_INFO_CLEAR]));
        lns.on_write(0, &WriteRequest::new(CTRL_PT, [0x7F]));
        assert_eq!(log.records_num(), 0);
        assert_eq!(drain(&events), vec![LnsEvent::LogInfoNtfEnabled, LnsEvent::TraceInfoClear]);

        assert_eq!(lns.on_read(0, &ReadRequest { handle: LOG_INFO_CCCD }).result, Ok(vec![1, 0]));
        assert_eq!(lns.on_read(0, &ReadRequest { handle: CTRL_PT_CCCD }).result, Ok(vec![0, 0]));
        assert_eq!(lns.on_read(0, &ReadRequest { handle: LOG_INFO }).result, Err(AttErrorCode::InvalidHandle));
        let cfm = lns.on_write(0, &WriteRequest::new(CTRL_PT, Vec::<u8>::new()));
        assert_eq!(cfm.result, Err(AttErrorCode::InvalidAttributeValueLength));
    }
}

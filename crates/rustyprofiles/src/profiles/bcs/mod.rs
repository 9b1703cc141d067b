//! Body Composition Service (server)
//!
//! Secondary service carrying the Body Composition Feature (read) and Body
//! Composition Measurement (indicate) characteristics. Measurements handed to
//! [`BodyCompositionServer::measurement_send`] are encoded up front and
//! indicated one packet at a time, the next packet going out when the peer
//! confirms the previous one.

pub mod measurement;

pub use measurement::{
    BcsFeature, BcsMeasFlags, BcsMeasurement, BcsUnit, MeasEncoder, BCS_MEAS_UNSUCCESSFUL, BCS_MEAS_VAL_LEN_MAX,
};

use crate::att::{
    AttErrorCode, AttPermissions, NtfInd, NtfIndKind, ReadConfirm, ReadRequest, WriteConfirm, WriteRequest,
    ATT_NTF_IND_HEADER_LEN, CLIENT_CHAR_CONFIG_UUID,
};
use crate::error::{ProfileError, ProfileResult};
use crate::gatt::cccd::{cccd_value_valid, parse_cccd_write, Cccd, ConnTable};
use crate::gatt::server::ServerProfile;
use crate::gatt::stack::GattsStack;
use crate::gatt::table::{AttrDesc, CharMask, ServiceDb, ServiceInstance, ServiceKind};
use crate::gatt::{ConnIdx, EventHandler, ProfileConfig};
use crate::uuid::Uuid;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::Arc;

pub const BCS_SERVICE_UUID: u16 = 0x181B;
pub const BODY_COMPOSITION_FEATURE_UUID: u16 = 0x2A9B;
pub const BODY_COMPOSITION_MEAS_UUID: u16 = 0x2A9C;

/// Measurements accepted by one `measurement_send` call
pub const BCS_CACHE_MEAS_NUM_MAX: usize = 25;

#[allow(dead_code)]
mod idx {
    pub const SVC: usize = 0;
    pub const FEAT_CHAR: usize = 1;
    pub const FEAT_VAL: usize = 2;
    pub const MEAS_CHAR: usize = 3;
    pub const MEAS_VAL: usize = 4;
    pub const MEAS_IND_CFG: usize = 5;
    pub const NB: usize = 6;
}

static BCS_ATTR_TAB: [AttrDesc; idx::NB] = {
    let mut tab = [AttrDesc::characteristic(); idx::NB];
    tab[idx::SVC] = AttrDesc::secondary_service();
    tab[idx::FEAT_CHAR] = AttrDesc::characteristic();
    tab[idx::FEAT_VAL] = AttrDesc::new(Uuid::from_u16(BODY_COMPOSITION_FEATURE_UUID), AttPermissions::READ, 4);
    tab[idx::MEAS_CHAR] = AttrDesc::characteristic();
    tab[idx::MEAS_VAL] = AttrDesc::new(
        Uuid::from_u16(BODY_COMPOSITION_MEAS_UUID),
        AttPermissions::INDICATE,
        BCS_MEAS_VAL_LEN_MAX as u16,
    );
    tab[idx::MEAS_IND_CFG] = AttrDesc::new(Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID), AttPermissions::CCCD, 2);
    tab
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcsEvent {
    MeasIndicationEnable,
    MeasIndicationDisable,
    /// The peer confirmed one measurement packet
    MeasIndicationCplt,
}

/// Body Composition Service configuration
#[derive(Debug, Clone)]
pub struct BcsInit {
    pub char_mask: CharMask,
    /// Features advertised in the feature characteristic
    pub feature: BcsFeature,
    /// Optional fields the application fills in
    pub meas_fields: BcsMeasFlags,
    pub unit: BcsUnit,
}

impl Default for BcsInit {
    fn default() -> Self {
        Self {
            char_mask: CharMask::all(idx::NB),
            feature: BcsFeature::ALL_FIELDS,
            meas_fields: BcsMeasFlags::ALL_FIELDS,
            unit: BcsUnit::Si,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ConnState {
    ind_cfg: Cccd,
    mtu: u16,
    pending: VecDeque<Vec<u8>>,
    /// An indication is out and not yet confirmed by the peer
    awaiting_cfm: bool,
}

impl ConnState {
    fn drop_queue(&mut self) {
        self.pending.clear();
        self.awaiting_cfm = false;
    }
}

pub struct BodyCompositionServer {
    stack: Arc<dyn GattsStack>,
    svc: ServiceInstance,
    init: BcsInit,
    default_mtu: u16,
    conns: ConnTable<ConnState>,
    handler: EventHandler<BcsEvent>,
}

impl BodyCompositionServer {
    pub fn new(
        stack: Arc<dyn GattsStack>,
        config: &ProfileConfig,
        init: BcsInit,
        handler: EventHandler<BcsEvent>,
    ) -> Self {
        let db = ServiceDb {
            uuid: Uuid::from_u16(BCS_SERVICE_UUID),
            kind: ServiceKind::Secondary,
            attrs: &BCS_ATTR_TAB,
            mask: init.char_mask,
        };
        let conns = ConnTable::with_value(
            config.max_connections,
            ConnState { mtu: config.att_mtu, ..ConnState::default() },
        );
        Self { stack, svc: ServiceInstance::new(db), init, default_mtu: config.att_mtu, conns, handler }
    }

    fn encoder(&self) -> MeasEncoder {
        MeasEncoder { feature: self.init.feature, fields: self.init.meas_fields, unit: self.init.unit }
    }

    /// Encodes and starts indicating `measurements` to `conn`.
    pub fn measurement_send(&mut self, conn: ConnIdx, measurements: &[BcsMeasurement]) -> ProfileResult<()> {
        if measurements.is_empty() {
            return Err(ProfileError::InvalidParam("no measurement to send"));
        }
        if measurements.len() > BCS_CACHE_MEAS_NUM_MAX {
            return Err(ProfileError::InvalidParam("too many cached measurements"));
        }

        let encoder = self.encoder();
        let state = self.conns.get_mut(conn)?;
        if !state.ind_cfg.indications_enabled() {
            return Err(ProfileError::IndDisabled);
        }
        if !state.pending.is_empty() || state.awaiting_cfm {
            return Err(ProfileError::Busy);
        }

        let max_payload = usize::from(state.mtu.saturating_sub(ATT_NTF_IND_HEADER_LEN));
        state.pending = measurements
            .iter()
            .flat_map(|meas| encoder.encode(meas, max_payload))
            .collect();
        debug!("bcs queued {} packets for conn {}", state.pending.len(), conn);

        self.indicate_next(conn)
    }

    /// Indicates the oldest queued packet, if any.
    fn indicate_next(&mut self, conn: ConnIdx) -> ProfileResult<()> {
        let handle = self.svc.handle_of(idx::MEAS_VAL).ok_or(ProfileError::InvalidHandle)?;
        let state = self.conns.get_mut(conn)?;
        let Some(packet) = state.pending.front() else {
            return Ok(());
        };
        if !state.ind_cfg.indications_enabled() {
            state.drop_queue();
            return Err(ProfileError::IndDisabled);
        }

        match self.stack.notify_indicate(conn, &NtfInd::indication(handle, packet.clone())) {
            Ok(()) => {
                state.pending.pop_front();
                state.awaiting_cfm = true;
                Ok(())
            }
            Err(err) => {
                state.drop_queue();
                Err(err)
            }
        }
    }

    /// Packets still waiting to be indicated to `conn`
    pub fn pending_packets(&self, conn: ConnIdx) -> usize {
        self.conns.get(conn).map(|state| state.pending.len()).unwrap_or(0)
    }

    /// True while packets are queued or the last indication is unconfirmed
    pub fn is_busy(&self, conn: ConnIdx) -> bool {
        self.conns
            .get(conn)
            .is_ok_and(|state| !state.pending.is_empty() || state.awaiting_cfm)
    }

    fn set_ind_cfg(&mut self, conn: ConnIdx, cfg: Cccd) -> ProfileResult<()> {
        let state = self.conns.get_mut(conn)?;
        state.ind_cfg = cfg;
        let event = if cfg.indications_enabled() {
            BcsEvent::MeasIndicationEnable
        } else {
            state.drop_queue();
            BcsEvent::MeasIndicationDisable
        };
        (self.handler)(conn, event);
        Ok(())
    }
}

impl ServerProfile for BodyCompositionServer {
    fn name(&self) -> &'static str {
        "bcs"
    }

    fn init(&mut self) -> ProfileResult<()> {
        let start = self.stack.create_service(self.svc.db())?;
        self.svc.bind(start);
        info!("body composition service created at handle {:#06x}", start);
        Ok(())
    }

    fn handle_range(&self) -> Option<RangeInclusive<u16>> {
        self.svc.handle_range()
    }

    fn on_read(&mut self, conn: ConnIdx, req: &ReadRequest) -> ReadConfirm {
        match self.svc.idx_of(req.handle) {
            Some(idx::FEAT_VAL) => ReadConfirm::value(req.handle, self.init.feature.bits().to_le_bytes()),
            Some(idx::MEAS_IND_CFG) => match self.conns.get(conn) {
                Ok(state) => ReadConfirm::value(req.handle, state.ind_cfg.to_le_bytes()),
                Err(_) => ReadConfirm::error(req.handle, AttErrorCode::Unlikely),
            },
            _ => ReadConfirm::error(req.handle, AttErrorCode::InvalidHandle),
        }
    }

    fn on_write(&mut self, conn: ConnIdx, req: &WriteRequest) -> WriteConfirm {
        if self.svc.idx_of(req.handle) != Some(idx::MEAS_IND_CFG) {
            return WriteConfirm::error(req.handle, AttErrorCode::InvalidHandle);
        }
        let result = parse_cccd_write(&req.value)
            .and_then(|cfg| self.set_ind_cfg(conn, cfg).map_err(|_| AttErrorCode::Unlikely));
        WriteConfirm { handle: req.handle, result }
    }

    fn on_cccd_set(&mut self, conn: ConnIdx, handle: u16, value: u16) {
        if !cccd_value_valid(value) {
            return;
        }
        if self.svc.idx_of(handle) == Some(idx::MEAS_IND_CFG) {
            let _ = self.set_ind_cfg(conn, Cccd::from_bits_retain(value));
        }
    }

    fn on_ntf_ind_complete(&mut self, conn: ConnIdx, status: Result<(), AttErrorCode>, kind: NtfIndKind, _handle: u16) {
        if kind != NtfIndKind::Indication {
            return;
        }
        if let Ok(state) = self.conns.get_mut(conn) {
            state.awaiting_cfm = false;
        }
        match status {
            Ok(()) => {
                if let Err(err) = self.indicate_next(conn) {
                    warn!("bcs dropping queued measurement packets for conn {}: {}", conn, err);
                }
                (self.handler)(conn, BcsEvent::MeasIndicationCplt);
            }
            Err(code) => {
                warn!("bcs indication to conn {} failed: {}", conn, code);
                if let Ok(state) = self.conns.get_mut(conn) {
                    state.drop_queue();
                }
            }
        }
    }

    fn on_mtu_exchanged(&mut self, conn: ConnIdx, mtu: u16) {
        if let Ok(state) = self.conns.get_mut(conn) {
            state.mtu = mtu;
        }
    }

    fn on_disconnected(&mut self, conn: ConnIdx) {
        let mtu = self.default_mtu;
        if let Ok(state) = self.conns.get_mut(conn) {
            *state = ConnState { mtu, ..ConnState::default() };
        }
    }
}

//! GATT profile plumbing shared by every service
//!
//! This module provides the static attribute table model, the seams to the
//! external stack, and the managers that route stack callbacks to server and
//! client profiles.

pub mod cccd;
pub mod client;
pub mod date_time;
pub mod server;
pub mod stack;
pub mod table;

#[cfg(test)]
pub(crate) mod mock;

use crate::att::ATT_DEFAULT_MTU;

pub use cccd::{cccd_value_valid, Cccd, ConnTable};
pub use client::{
    discovery, BrowseAttr, BrowseService, ClientLink, ClientProfile, ClientProfileManager, Discovery, OpStatus,
    ReadRsp, ReadValue, SharedClientProfile,
};
pub use date_time::DateTime;
pub use server::{ServerProfile, ServerProfileManager, SharedServerProfile};
pub use stack::{GattcStack, GattsStack};
pub use table::{find_handle_by_idx, find_idx_by_handle, AttrDesc, CharMask, ServiceDb, ServiceInstance, ServiceKind};

/// Connection index assigned by the stack
pub type ConnIdx = u8;

/// Application callback receiving profile events
pub type EventHandler<E> = Box<dyn FnMut(ConnIdx, E) + Send>;

/// Settings shared by every profile instance
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Number of simultaneous links the profile keeps state for
    pub max_connections: usize,
    /// ATT MTU assumed until the stack reports an exchange
    pub att_mtu: u16,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            att_mtu: ATT_DEFAULT_MTU,
        }
    }
}

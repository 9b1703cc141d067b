//! RustyProfiles - BLE GATT service profiles over an external stack
//!
//! Each profile wires a static attribute table (servers) or a discovered set of
//! peer handles (clients) into the GATT callbacks of a BLE stack that lives
//! outside this crate. The stack is reached through [`GattsStack`] and
//! [`GattcStack`]; raw attribute traffic comes back as per-service events.

pub mod att;
pub mod error;
pub mod gatt;
pub mod profiles;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttErrorCode, NtfInd, NtfIndKind, ReadConfirm, ReadRequest, WriteConfirm, WriteRequest};
pub use error::{ProfileError, ProfileResult};
pub use gatt::{
    ClientProfile, ClientProfileManager, ConnIdx, EventHandler, GattcStack, GattsStack, OpStatus, ProfileConfig,
    ServerProfile, ServerProfileManager,
};
pub use uuid::Uuid;

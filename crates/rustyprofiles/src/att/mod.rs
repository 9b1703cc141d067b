//! Attribute Protocol (ATT) definitions
//!
//! Only the pieces the profile layer shares with the external stack live here:
//! status codes, permission flags, and the request/confirm values passed across
//! the stack callbacks. The ATT protocol engine itself belongs to the stack.

pub mod constants;
pub mod error;
pub mod types;

pub use self::constants::*;
pub use self::error::{status_to_result, AttErrorCode};
pub use self::types::*;

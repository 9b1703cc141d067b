//! ATT permission flags and the request/confirm values exchanged with the stack
use super::error::AttErrorCode;

bitflags::bitflags! {
    /// Access properties and security requirements of one attribute
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttPermissions: u16 {
        const READ = 1 << 0;
        const WRITE_REQ = 1 << 1;
        const WRITE_CMD = 1 << 2;
        const NOTIFY = 1 << 3;
        const INDICATE = 1 << 4;
        /// Value length may vary up to the declared maximum
        const VARIABLE_LEN = 1 << 5;
        const READ_ENCRYPTED = 1 << 8;
        const WRITE_ENCRYPTED = 1 << 9;
        const READ_AUTHENTICATED = 1 << 10;
        const WRITE_AUTHENTICATED = 1 << 11;
    }
}

impl AttPermissions {
    /// Read and write request access, as every CCCD needs
    pub const CCCD: AttPermissions = AttPermissions::READ.union(AttPermissions::WRITE_REQ);
}

/// Read of a server attribute issued by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub handle: u16,
}

/// Answer to a [`ReadRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadConfirm {
    pub handle: u16,
    pub result: Result<Vec<u8>, AttErrorCode>,
}

impl ReadConfirm {
    pub fn value(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self { handle, result: Ok(value.into()) }
    }

    pub fn error(handle: u16, code: AttErrorCode) -> Self {
        Self { handle, result: Err(code) }
    }
}

/// Write (request or command) to a server attribute issued by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
}

impl WriteRequest {
    pub fn new(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self { handle, offset: 0, value: value.into() }
    }
}

/// Answer to a [`WriteRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteConfirm {
    pub handle: u16,
    pub result: Result<(), AttErrorCode>,
}

impl WriteConfirm {
    pub fn ok(handle: u16) -> Self {
        Self { handle, result: Ok(()) }
    }

    pub fn error(handle: u16, code: AttErrorCode) -> Self {
        Self { handle, result: Err(code) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtfIndKind {
    Notification,
    Indication,
}

/// A handle value notification or indication, in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtfInd {
    pub kind: NtfIndKind,
    pub handle: u16,
    pub value: Vec<u8>,
}

impl NtfInd {
    pub fn notification(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self { kind: NtfIndKind::Notification, handle, value: value.into() }
    }

    pub fn indication(handle: u16, value: impl Into<Vec<u8>>) -> Self {
        Self { kind: NtfIndKind::Indication, handle, value: value.into() }
    }
}

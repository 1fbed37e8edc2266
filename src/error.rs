//! Error types for the AgentX sub-agent.

use std::{fmt, io};

use thiserror::Error;

use crate::pdu::{CloseReason, PduType};

/// Errors raised while decoding AgentX wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough bytes left for the next field.
    #[error("Truncated data: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Header payload length exceeds the bytes actually present.
    #[error("Payload length {declared} exceeds remaining buffer size {available}")]
    PayloadLength { declared: usize, available: usize },

    /// Payload decoder did not consume exactly the declared payload.
    #[error("Payload length {declared} does not match decoded size {consumed}")]
    PayloadMismatch { declared: usize, consumed: usize },

    #[error("Unknown PDU type: {0}")]
    UnknownPduType(u8),

    #[error("Unsupported AgentX version: {0}")]
    UnsupportedVersion(u8),

    /// More than 128 sub-identifiers (RFC 2741 §5.1).
    #[error("OID has {0} sub-identifiers, at most 128 allowed")]
    OidTooLong(usize),

    #[error("Unknown varbind type: {0}")]
    UnknownValueType(u16),

    #[error("IpAddress must be 4 octets, got {0}")]
    InvalidIpAddress(usize),

    #[error("Invalid OID text: {0}")]
    InvalidOidText(String),
}

/// Errors surfaced by the sub-agent session.
#[derive(Error, Debug)]
pub enum AgentXError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transport to the master agent is gone.
    #[error("Disconnected from master agent")]
    Disconnected,

    /// No Response arrived within the request timeout.
    #[error("Timed out waiting for response to packet {0}")]
    Timeout(u32),

    /// An operation needs an open session.
    #[error("Session is not open")]
    NotOpen,

    /// The master agent answered a request with an error.
    #[error("Master agent returned {error} (index {index})")]
    Response { error: ErrorStatus, index: u16 },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Duplicate registration of {0}")]
    DuplicateRegistration(String),

    #[error("Unknown registration of {0}")]
    UnknownRegistration(String),

    #[error("Index {0} is not allocated in this session")]
    IndexNotAllocated(String),

    #[error("Unexpected PDU type: {0:?}")]
    UnexpectedPdu(PduType),

    /// The master agent closed the session.
    #[error("Session closed by master agent: {0:?}")]
    Closed(CloseReason),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentXError>;

/// The `res.error` field of a Response PDU (RFC 2741 §6.2.16).
///
/// Holds both the SNMP error-status values (0..=18) that sub-agents report
/// for variable processing and the AgentX administrative errors (256..=268)
/// returned by the master. Unknown codes are kept as [`ErrorStatus::Other`]
/// so that decoding never loses information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    NoError,
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    AuthorizationError,
    NotWritable,
    InconsistentName,
    OpenFailed,
    NotOpen,
    IndexWrongType,
    IndexAlreadyAllocated,
    IndexNoneAvailable,
    IndexNotAllocated,
    UnsupportedContext,
    DuplicateRegistration,
    UnknownRegistration,
    UnknownAgentCaps,
    ParseError,
    RequestDenied,
    ProcessingError,
    Other(u16),
}

impl ErrorStatus {
    pub fn from_u16(code: u16) -> Self {
        match code {
            0 => ErrorStatus::NoError,
            1 => ErrorStatus::TooBig,
            2 => ErrorStatus::NoSuchName,
            3 => ErrorStatus::BadValue,
            4 => ErrorStatus::ReadOnly,
            5 => ErrorStatus::GenErr,
            6 => ErrorStatus::NoAccess,
            7 => ErrorStatus::WrongType,
            8 => ErrorStatus::WrongLength,
            9 => ErrorStatus::WrongEncoding,
            10 => ErrorStatus::WrongValue,
            11 => ErrorStatus::NoCreation,
            12 => ErrorStatus::InconsistentValue,
            13 => ErrorStatus::ResourceUnavailable,
            14 => ErrorStatus::CommitFailed,
            15 => ErrorStatus::UndoFailed,
            16 => ErrorStatus::AuthorizationError,
            17 => ErrorStatus::NotWritable,
            18 => ErrorStatus::InconsistentName,
            256 => ErrorStatus::OpenFailed,
            257 => ErrorStatus::NotOpen,
            258 => ErrorStatus::IndexWrongType,
            259 => ErrorStatus::IndexAlreadyAllocated,
            260 => ErrorStatus::IndexNoneAvailable,
            261 => ErrorStatus::IndexNotAllocated,
            262 => ErrorStatus::UnsupportedContext,
            263 => ErrorStatus::DuplicateRegistration,
            264 => ErrorStatus::UnknownRegistration,
            265 => ErrorStatus::UnknownAgentCaps,
            266 => ErrorStatus::ParseError,
            267 => ErrorStatus::RequestDenied,
            268 => ErrorStatus::ProcessingError,
            other => ErrorStatus::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            ErrorStatus::NoError => 0,
            ErrorStatus::TooBig => 1,
            ErrorStatus::NoSuchName => 2,
            ErrorStatus::BadValue => 3,
            ErrorStatus::ReadOnly => 4,
            ErrorStatus::GenErr => 5,
            ErrorStatus::NoAccess => 6,
            ErrorStatus::WrongType => 7,
            ErrorStatus::WrongLength => 8,
            ErrorStatus::WrongEncoding => 9,
            ErrorStatus::WrongValue => 10,
            ErrorStatus::NoCreation => 11,
            ErrorStatus::InconsistentValue => 12,
            ErrorStatus::ResourceUnavailable => 13,
            ErrorStatus::CommitFailed => 14,
            ErrorStatus::UndoFailed => 15,
            ErrorStatus::AuthorizationError => 16,
            ErrorStatus::NotWritable => 17,
            ErrorStatus::InconsistentName => 18,
            ErrorStatus::OpenFailed => 256,
            ErrorStatus::NotOpen => 257,
            ErrorStatus::IndexWrongType => 258,
            ErrorStatus::IndexAlreadyAllocated => 259,
            ErrorStatus::IndexNoneAvailable => 260,
            ErrorStatus::IndexNotAllocated => 261,
            ErrorStatus::UnsupportedContext => 262,
            ErrorStatus::DuplicateRegistration => 263,
            ErrorStatus::UnknownRegistration => 264,
            ErrorStatus::UnknownAgentCaps => 265,
            ErrorStatus::ParseError => 266,
            ErrorStatus::RequestDenied => 267,
            ErrorStatus::ProcessingError => 268,
            ErrorStatus::Other(code) => code,
        }
    }

    pub fn is_error(self) -> bool {
        self != ErrorStatus::NoError
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorStatus::Other(code) => write!(f, "error({})", code),
            other => write!(f, "{:?}({})", other, other.as_u16()),
        }
    }
}

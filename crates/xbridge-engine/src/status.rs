//! Status bytes carried by response frames.

use std::fmt;

use serde::Serialize;

/// Delivery status of a data-transmit request (api id `0x89`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Ok,
    NoAck,
    CcaFailure,
    Purged,
}

impl TxStatus {
    pub fn from_byte(status: u8) -> Option<Self> {
        match status {
            0 => Some(Self::Ok),
            1 => Some(Self::NoAck),
            2 => Some(Self::CcaFailure),
            3 => Some(Self::Purged),
            _ => None,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::NoAck => f.write_str("no ACK received"),
            Self::CcaFailure => f.write_str("CCA failure"),
            Self::Purged => f.write_str("purged"),
        }
    }
}

/// Status of a local (`0x88`) or remote (`0x97`) AT command response.
///
/// `NoResponse` only occurs for remote commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AtStatus {
    Ok,
    Error,
    InvalidCommand,
    InvalidParameter,
    NoResponse,
}

impl AtStatus {
    pub fn from_byte(status: u8) -> Option<Self> {
        match status {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::InvalidCommand),
            3 => Some(Self::InvalidParameter),
            4 => Some(Self::NoResponse),
            _ => None,
        }
    }
}

impl fmt::Display for AtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Error => f.write_str("ERROR"),
            Self::InvalidCommand => f.write_str("INVALID COMMAND"),
            Self::InvalidParameter => f.write_str("INVALID PARAMETER"),
            Self::NoResponse => f.write_str("NO RESPONSE"),
        }
    }
}

/// A non-OK status, tagged with the kind of request that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ResponseStatus {
    Transmit(TxStatus),
    LocalAt(AtStatus),
    RemoteAt(AtStatus),
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transmit(status) => write!(f, "transmit status: {status}"),
            Self::LocalAt(status) => write!(f, "AT command response: {status}"),
            Self::RemoteAt(status) => write!(f, "remote AT command response: {status}"),
        }
    }
}

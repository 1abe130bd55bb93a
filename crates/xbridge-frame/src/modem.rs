//! Modem status events (api id `0x8A`).
//!
//! These are logged by the reassembler and never stored for correlation.

use std::fmt;

/// Status byte carried by a modem status frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemStatus {
    HardwareReset,
    WatchdogReset,
    Associated,
    Disassociated,
    SyncLost,
    CoordinatorRealignment,
    CoordinatorStarted,
    Unknown(u8),
}

impl ModemStatus {
    pub fn from_byte(status: u8) -> Self {
        match status {
            0 => Self::HardwareReset,
            1 => Self::WatchdogReset,
            2 => Self::Associated,
            3 => Self::Disassociated,
            4 => Self::SyncLost,
            5 => Self::CoordinatorRealignment,
            6 => Self::CoordinatorStarted,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for ModemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareReset => f.write_str("HARDWARE_RESET"),
            Self::WatchdogReset => f.write_str("WATCHDOG_RESET"),
            Self::Associated => f.write_str("ASSOCIATED"),
            Self::Disassociated => f.write_str("DISASSOCIATED"),
            Self::SyncLost => f.write_str("SYNC_LOST"),
            Self::CoordinatorRealignment => f.write_str("COORD_REALIGNMENT"),
            Self::CoordinatorStarted => f.write_str("COORD_STARTED"),
            Self::Unknown(status) => write!(f, "invalid status {status}"),
        }
    }
}

use std::fmt;
use std::str::FromStr;

/// 64-bit IEEE address of a radio module.
///
/// Remote operations take it as two 32-bit halves (`SH`/`SL` on the module);
/// logs and configuration use the 16-digit hex form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address64(pub u64);

impl Address64 {
    /// Broadcast address.
    pub const BROADCAST: Address64 = Address64(0x0000_0000_0000_FFFF);

    /// Build from the high and low 32-bit halves.
    pub fn from_parts(high: u32, low: u32) -> Self {
        Self((u64::from(high) << 32) | u64::from(low))
    }

    /// Read the first 8 bytes of `bytes` as a big-endian address.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        Some(Self(u64::from_be_bytes(raw)))
    }

    pub fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn low(self) -> u32 {
        self.0 as u32
    }

    /// Big-endian wire representation.
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Address64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Error returned when parsing an [`Address64`] fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid 64-bit address '{0}' (expected 16 hex digits)")]
pub struct ParseAddressError(String);

impl FromStr for Address64 {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);
        if digits.is_empty() || digits.len() > 16 {
            return Err(ParseAddressError(s.to_string()));
        }
        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| ParseAddressError(s.to_string()))
    }
}

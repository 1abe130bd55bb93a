//! API identifiers.
//!
//! Only the kinds the engine builds or routes are named here; any other id
//! still decodes, it just has no frame id and a generic name.

/// Transmit request, 64-bit destination.
pub const TX_REQUEST_64: u8 = 0x00;

/// Transmit request, 16-bit destination.
pub const TX_REQUEST_16: u8 = 0x01;

/// Local AT command, applied immediately.
pub const AT_COMMAND: u8 = 0x08;

/// Local AT command, queued until `AC`.
pub const AT_COMMAND_QUEUED: u8 = 0x09;

/// AT command executed on a remote module.
pub const REMOTE_AT_COMMAND: u8 = 0x17;

/// Received packet, 64-bit source.
pub const RX_PACKET_64: u8 = 0x80;

/// Received packet, 16-bit source.
pub const RX_PACKET_16: u8 = 0x81;

/// Received IO sample, 64-bit source.
pub const RX_IO_64: u8 = 0x82;

/// Received IO sample, 16-bit source.
pub const RX_IO_16: u8 = 0x83;

/// Response to a local AT command.
pub const AT_RESPONSE: u8 = 0x88;

/// Delivery status of a transmit request.
pub const TX_STATUS: u8 = 0x89;

/// Unsolicited modem status event.
pub const MODEM_STATUS: u8 = 0x8A;

/// Response to a remote AT command.
pub const REMOTE_AT_RESPONSE: u8 = 0x97;

/// Api ids whose frames carry a frame id byte.
const FRAME_ID_BEARING: [u8; 8] = [
    TX_REQUEST_64,
    TX_REQUEST_16,
    AT_COMMAND,
    AT_COMMAND_QUEUED,
    REMOTE_AT_COMMAND,
    AT_RESPONSE,
    TX_STATUS,
    REMOTE_AT_RESPONSE,
];

/// Returns true if frames of this kind carry a frame id after the api id.
pub fn has_frame_id(api_id: u8) -> bool {
    FRAME_ID_BEARING.contains(&api_id)
}

/// Returns true for unsolicited kinds whose payload starts with a 64-bit source address.
pub fn has_source_address(api_id: u8) -> bool {
    matches!(api_id, RX_PACKET_64 | RX_IO_64)
}

/// Returns a human-readable name for an api id.
pub fn api_name(api_id: u8) -> &'static str {
    match api_id {
        TX_REQUEST_64 => "TX_REQUEST_64",
        TX_REQUEST_16 => "TX_REQUEST_16",
        AT_COMMAND => "AT_COMMAND",
        AT_COMMAND_QUEUED => "AT_COMMAND_QUEUED",
        REMOTE_AT_COMMAND => "REMOTE_AT_COMMAND",
        RX_PACKET_64 => "RX_PACKET_64",
        RX_PACKET_16 => "RX_PACKET_16",
        RX_IO_64 => "RX_IO_64",
        RX_IO_16 => "RX_IO_16",
        AT_RESPONSE => "AT_RESPONSE",
        TX_STATUS => "TX_STATUS",
        MODEM_STATUS => "MODEM_STATUS",
        REMOTE_AT_RESPONSE => "REMOTE_AT_RESPONSE",
        _ => "UNKNOWN",
    }
}

//! Request payload builders and response parsers for the API frame kinds the
//! engine speaks.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{error, warn};
use xbridge_frame::{api, Address64, Frame};

use crate::error::{EngineError, Result};
use crate::status::{AtStatus, ResponseStatus, TxStatus};

/// Transmit options byte for data requests: none.
const TX_OPTIONS: u8 = 0x00;

/// 16-bit destination meaning "use the 64-bit address".
const REMOTE_DEST_16: [u8; 2] = [0xFF, 0xFE];

/// Remote command option: apply changes immediately.
const REMOTE_APPLY_CHANGES: u8 = 0x02;

/// Offset of the echoed command in a remote AT response:
/// 64-bit source (8) + 16-bit source (2).
const REMOTE_RESPONSE_COMMAND_OFFSET: usize = 10;

/// Reject empty AT commands and those shorter than the two command letters.
pub fn validate_at_command(command: &[u8]) -> Result<()> {
    if command.len() < 2 {
        error!(len = command.len(), "invalid command length");
        return Err(EngineError::InvalidCommand(format!(
            "AT command must be at least 2 bytes, got {}",
            command.len()
        )));
    }
    Ok(())
}

/// Data-transmit request (api `0x00`) for `address`.
pub fn tx_request(frame_id: u8, address: Address64, data: &[u8]) -> Result<Frame> {
    if data.is_empty() {
        error!("invalid data length");
        return Err(EngineError::InvalidCommand("data payload is empty".into()));
    }
    let mut payload = BytesMut::with_capacity(9 + data.len());
    payload.put_slice(&address.to_bytes());
    payload.put_u8(TX_OPTIONS);
    payload.put_slice(data);
    Ok(Frame::new(api::TX_REQUEST_64, Some(frame_id), payload.freeze()))
}

/// Local AT command (api `0x08`).
pub fn local_at(frame_id: u8, command: &[u8]) -> Result<Frame> {
    validate_at_command(command)?;
    Ok(Frame::new(
        api::AT_COMMAND,
        Some(frame_id),
        Bytes::copy_from_slice(command),
    ))
}

/// Remote AT command (api `0x17`). Frame id `0` asks for no response.
pub fn remote_at(frame_id: u8, address: Address64, command: &[u8]) -> Result<Frame> {
    validate_at_command(command)?;
    let mut payload = BytesMut::with_capacity(11 + command.len());
    payload.put_slice(&address.to_bytes());
    payload.put_slice(&REMOTE_DEST_16);
    payload.put_u8(REMOTE_APPLY_CHANGES);
    payload.put_slice(command);
    Ok(Frame::new(
        api::REMOTE_AT_COMMAND,
        Some(frame_id),
        payload.freeze(),
    ))
}

/// Interpret a transmit status reply.
pub fn parse_tx_status(frame: &Frame) -> Result<()> {
    let [status] = frame.payload.as_ref() else {
        error!(%frame, "invalid frame");
        return Err(EngineError::Protocol(format!(
            "transmit status carries {} bytes, expected 1",
            frame.payload.len()
        )));
    };
    match TxStatus::from_byte(*status) {
        Some(TxStatus::Ok) => Ok(()),
        Some(status) => {
            warn!(%status, "transmitted data");
            Err(EngineError::Status(ResponseStatus::Transmit(status)))
        }
        None => {
            warn!(status, "transmitted data: invalid status code");
            Err(EngineError::Protocol(format!(
                "invalid transmit status code 0x{status:02x}"
            )))
        }
    }
}

/// Interpret a local AT response to `command`, returning the value bytes.
pub fn parse_at_response(command: &[u8], frame: &Frame) -> Result<Bytes> {
    parse_echoed(command, &frame.payload, 0).and_then(|(status, value)| {
        at_result(status, value, ResponseStatus::LocalAt, "AT command response frame")
    })
}

/// Interpret a remote AT response to `command`, returning the value bytes.
pub fn parse_remote_at_response(command: &[u8], frame: &Frame) -> Result<Bytes> {
    parse_echoed(command, &frame.payload, REMOTE_RESPONSE_COMMAND_OFFSET).and_then(
        |(status, value)| {
            at_result(
                status,
                value,
                ResponseStatus::RemoteAt,
                "AT remote command response frame",
            )
        },
    )
}

fn parse_echoed(command: &[u8], payload: &Bytes, offset: usize) -> Result<(u8, Bytes)> {
    let echoed = payload.get(offset..offset + 2);
    let status = payload.get(offset + 2);
    match (echoed, status) {
        (Some(echoed), Some(&status)) if command.get(..2) == Some(echoed) => {
            Ok((status, payload.slice(offset + 3..)))
        }
        _ => {
            error!(payload = %xbridge_frame::hex::encode(payload), "invalid frame");
            Err(EngineError::Protocol(
                "AT response does not echo the requested command".into(),
            ))
        }
    }
}

fn at_result(
    status: u8,
    value: Bytes,
    wrap: fn(AtStatus) -> ResponseStatus,
    what: &str,
) -> Result<Bytes> {
    match AtStatus::from_byte(status) {
        Some(AtStatus::Ok) => Ok(value),
        Some(status) => {
            warn!(%status, "{what}");
            Err(EngineError::Status(wrap(status)))
        }
        None => {
            warn!(status, "{what}: invalid status code");
            Err(EngineError::Protocol(format!(
                "invalid AT status code 0x{status:02x}"
            )))
        }
    }
}

use std::fmt;
use std::io;

use xbridge_engine::EngineError;
use xbridge_frame::FrameError;
use xbridge_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const NOT_CONNECTED: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => NOT_CONNECTED,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        TransportError::InvalidEndpoint(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(NOT_CONNECTED, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn engine_error(context: &str, err: EngineError) -> CliError {
    match err {
        EngineError::Transport(err) => transport_error(context, err),
        EngineError::Frame(err) => frame_error(context, err),
        EngineError::Io(err) => io_error(context, err),
        EngineError::NotConnected => CliError::new(NOT_CONNECTED, format!("{context}: {err}")),
        EngineError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        EngineError::InvalidCommand(_) => CliError::new(USAGE, format!("{context}: {err}")),
        EngineError::Protocol(_) | EngineError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        EngineError::Status(_) | EngineError::Negotiation(_) | EngineError::Provisioning(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use xbridge_engine::{ResponseStatus, TxStatus};

    use super::*;

    #[test]
    fn engine_errors_map_to_distinct_codes() {
        assert_eq!(engine_error("x", EngineError::NotConnected).code, NOT_CONNECTED);
        assert_eq!(
            engine_error("x", EngineError::Timeout(Duration::from_secs(5))).code,
            TIMEOUT
        );
        assert_eq!(
            engine_error("x", EngineError::InvalidCommand("M".into())).code,
            USAGE
        );
        assert_eq!(
            engine_error(
                "x",
                EngineError::Status(ResponseStatus::Transmit(TxStatus::NoAck))
            )
            .code,
            FAILURE
        );
    }

    #[test]
    fn refused_connect_is_not_connected() {
        let err = EngineError::Transport(TransportError::Connect {
            endpoint: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });
        let cli = engine_error("connect failed", err);
        assert_eq!(cli.code, NOT_CONNECTED);
        assert!(cli.message.starts_with("connect failed: "));
    }
}

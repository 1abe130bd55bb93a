//! Transport to a transparent TCP-to-serial gateway.
//!
//! The radio module sits behind a serial bridge that exposes the UART as a
//! plain byte stream:
//! - TCP (`host:port`, e.g. ser2net or a hardware terminal server)
//! - Unix domain sockets (`unix:/path`, for local bridges such as socat)
//!
//! This is the lowest layer of xbridge. Everything else builds on top of
//! the [`SerialStream`] type provided here.

pub mod endpoint;
pub mod error;
pub mod stream;

pub use endpoint::{connect, Connector, Endpoint, EndpointConnector};
pub use error::{Result, TransportError};
pub use stream::SerialStream;

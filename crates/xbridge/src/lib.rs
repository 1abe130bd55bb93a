//! Supervised API-mode access to XBee-style radio modules.
//!
//! xbridge talks to a radio module sitting behind a transparent TCP-to-serial
//! gateway: it keeps the connection alive, switches the module into escaped
//! API mode, and correlates requests with their asynchronous replies.
//!
//! # Crate Structure
//!
//! - [`transport`] — Gateway byte stream (TCP, Unix sockets)
//! - [`frame`] — API frame codec and stream reassembly
//! - [`engine`] — Connection supervisor and command API

/// Re-export transport types.
pub mod transport {
    pub use xbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use xbridge_frame::*;
}

/// Re-export engine types.
pub mod engine {
    pub use xbridge_engine::*;
}

pub use xbridge_engine::{EngineError, Supervisor, SupervisorConfig};
pub use xbridge_frame::Address64;

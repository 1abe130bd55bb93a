//! Connection supervision and command correlation for XBee-style modules.
//!
//! This is the "just works" layer. A [`Supervisor`] keeps the gateway
//! connection alive, switches the module into escaped API mode, and lets any
//! thread send data, run local or remote AT commands, and hold
//! transparent-mode dialogs, each reply matched to its request by frame id.

pub mod command;
pub mod config;
pub mod dialog;
pub mod error;
pub mod ids;
pub mod module;
pub mod provision;
pub mod queue;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod text;
pub mod worker;

pub use config::SupervisorConfig;
pub use dialog::{DialogStep, Negotiated, NegotiationPlan};
pub use error::{EngineError, Result};
pub use ids::{FrameIdAllocator, FIRST_FRAME_ID, LAST_FRAME_ID};
pub use module::ModuleCommands;
pub use provision::{ProvisionPlan, ProvisionStep, Provisioner};
pub use queue::{TransparentCommand, WriteItem, WriteQueue};
pub use status::{AtStatus, ResponseStatus, TxStatus};
pub use store::FrameStore;
pub use supervisor::{ConnectionState, Supervisor, SupervisorBuilder};
pub use text::{latin1, TextBuffer};
pub use worker::{Link, Session, ShutdownSignal};

//! Switching the module into escaped API mode.
//!
//! The negotiation is a list of transparent-mode dialog steps run in order.
//! A probe step may short-circuit the list when the module is already
//! configured; every other step must get its expected reply or the whole
//! negotiation fails and the supervisor reconnects.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::duration_ms;
use crate::error::{EngineError, Result};
use crate::module::ModuleCommands;

fn default_terminator() -> String {
    "\r".to_string()
}

/// One transparent-mode exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogStep {
    /// Command text, including its trailing `\r`.
    pub command: String,
    /// End of the reply.
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Reply required for the step to pass.
    pub expect: String,
    /// Skip `ATCN` afterwards (the command already leaves command mode).
    #[serde(default)]
    pub skip_exit: bool,
    /// Pause after the exchange, before the reply is checked.
    #[serde(default, with = "duration_ms")]
    pub settle: Duration,
}

impl DialogStep {
    pub fn new(command: impl Into<String>, expect: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            terminator: default_terminator(),
            expect: expect.into(),
            skip_exit: false,
            settle: Duration::ZERO,
        }
    }

    pub fn skip_exit(mut self) -> Self {
        self.skip_exit = true;
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Run the exchange, returning the reply (`None` when it failed).
    fn exchange(&self, module: &dyn ModuleCommands) -> Result<Option<String>> {
        let reply = match module.transparent_at_dialog(
            self.command.as_bytes(),
            self.terminator.as_bytes(),
            self.skip_exit,
        ) {
            Ok(reply) => Some(reply),
            Err(err) if err.is_connection_error() => return Err(err),
            Err(err) => {
                warn!(command = %self.command.trim_end(), %err, "dialog step failed");
                None
            }
        };
        if !self.settle.is_zero() {
            module.pause(self.settle)?;
        }
        Ok(reply)
    }
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    /// The probe showed the module was already in the right mode.
    AlreadyConfigured,
    /// The steps ran and the module was switched.
    Reconfigured,
}

/// Ordered steps that put the module into API mode 2 (escaped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationPlan {
    /// Checked first; a matching reply ends the negotiation successfully.
    #[serde(default)]
    pub probe: Option<DialogStep>,
    /// Run in order when the probe is absent or does not match.
    #[serde(default)]
    pub steps: Vec<DialogStep>,
}

impl Default for NegotiationPlan {
    fn default() -> Self {
        Self {
            probe: Some(DialogStep::new("ATAP\r", "2")),
            steps: vec![
                DialogStep::new("ATAP2\r", "OK"),
                DialogStep::new("ATWR\r", "OK"),
                DialogStep::new("ATAC\r", "OK"),
                DialogStep::new("ATFR\r", "OK")
                    .skip_exit()
                    .settle(Duration::from_millis(1000)),
            ],
        }
    }
}

impl NegotiationPlan {
    /// A plan that assumes the module is already in API mode.
    pub fn none() -> Self {
        Self {
            probe: None,
            steps: Vec::new(),
        }
    }

    pub fn run(&self, module: &dyn ModuleCommands) -> Result<Negotiated> {
        if let Some(probe) = &self.probe {
            let reply = probe.exchange(module)?;
            if reply.as_deref() == Some(probe.expect.as_str()) {
                info!("API mode is correct");
                return Ok(Negotiated::AlreadyConfigured);
            }
            warn!(reply = ?reply, expected = %probe.expect, "invalid API mode");
        }

        for step in &self.steps {
            let reply = step.exchange(module)?;
            if reply.as_deref() != Some(step.expect.as_str()) {
                warn!(command = %step.command.trim_end(), reply = ?reply, "negotiation step failed");
                return Err(EngineError::Negotiation(format!(
                    "{} replied {:?}, expected {:?}",
                    step.command.trim_end(),
                    reply.unwrap_or_default(),
                    step.expect
                )));
            }
        }
        info!("API mode set");
        Ok(Negotiated::Reconfigured)
    }
}

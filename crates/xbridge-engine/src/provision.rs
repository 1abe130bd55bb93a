//! One-time module configuration checks run after each (re)connect.
//!
//! What to check is policy, supplied by the application as a
//! [`ProvisionPlan`] or any other [`Provisioner`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use xbridge_frame::hex;

use crate::error::{EngineError, Result};
use crate::module::ModuleCommands;

/// Runs once the module is in API mode, before the connection is marked ready.
///
/// An error makes the supervisor reconnect.
pub trait Provisioner: Send + Sync {
    fn provision(&self, module: &dyn ModuleCommands) -> Result<()>;
}

/// Check one AT parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStep {
    /// Two-letter AT command, e.g. `"ID"`.
    pub command: String,
    /// Expected value as lowercase hex, e.g. `"afae"`.
    #[serde(default)]
    pub expect_hex: Option<String>,
    /// Write the expected value when it differs, instead of only warning.
    #[serde(default)]
    pub enforce: bool,
}

impl ProvisionStep {
    /// Read the parameter and log it.
    pub fn read(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expect_hex: None,
            enforce: false,
        }
    }

    /// Warn when the parameter differs from `expect_hex`.
    pub fn expect(command: impl Into<String>, expect_hex: impl Into<String>) -> Self {
        Self {
            expect_hex: Some(expect_hex.into()),
            ..Self::read(command)
        }
    }

    /// Write `expect_hex` when the parameter differs.
    pub fn enforce(command: impl Into<String>, expect_hex: impl Into<String>) -> Self {
        Self {
            enforce: true,
            ..Self::expect(command, expect_hex)
        }
    }

    fn run(&self, module: &dyn ModuleCommands) -> Result<()> {
        let value = module
            .local_at_query(self.command.as_bytes())
            .map_err(|err| self.failed(err))?;
        let actual = hex::encode(&value);
        info!(command = %self.command, value = %actual, "module parameter");

        let Some(expected) = &self.expect_hex else {
            return Ok(());
        };
        if actual.eq_ignore_ascii_case(expected) {
            return Ok(());
        }
        if !self.enforce {
            warn!(command = %self.command, value = %actual, expected = %expected, "unexpected module parameter");
            return Ok(());
        }

        let wanted = hex::decode(expected).ok_or_else(|| {
            EngineError::Provisioning(format!("{}: invalid hex value {expected:?}", self.command))
        })?;
        warn!(command = %self.command, value = %actual, expected = %expected, "setting module parameter");
        let mut set = self.command.as_bytes().to_vec();
        set.extend_from_slice(&wanted);
        let reply = module.local_at_query(&set).map_err(|err| self.failed(err))?;
        if !reply.is_empty() {
            return Err(EngineError::Provisioning(format!(
                "{}: unexpected reply {} to set",
                self.command,
                hex::encode(&reply)
            )));
        }
        info!(command = %self.command, value = %expected, "module parameter set");
        Ok(())
    }

    fn failed(&self, err: EngineError) -> EngineError {
        if err.is_connection_error() {
            return err;
        }
        EngineError::Provisioning(format!("{}: {err}", self.command))
    }
}

/// Ordered parameter checks, optionally followed by `WR`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionPlan {
    pub steps: Vec<ProvisionStep>,
    /// Persist the configuration with `WR` once every step passed.
    #[serde(default)]
    pub save: bool,
}

impl ProvisionPlan {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

impl Provisioner for ProvisionPlan {
    fn provision(&self, module: &dyn ModuleCommands) -> Result<()> {
        for step in &self.steps {
            step.run(module)?;
        }
        if self.save {
            info!("trying to save configuration");
            ProvisionStep::read("WR").run(module)?;
            info!("configuration saved");
        }
        Ok(())
    }
}

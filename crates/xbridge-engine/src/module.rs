use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// Commands a negotiation or provisioning plan may issue to the module.
///
/// The supervisor implements this twice: once for external callers (which
/// requires a ready connection) and once for its own use while the
/// connection is still being negotiated.
pub trait ModuleCommands {
    /// Local AT query in API mode. Returns the value bytes of an OK reply.
    fn local_at_query(&self, command: &[u8]) -> Result<Bytes>;

    /// Guard-time dialog in transparent mode. Returns the reply text
    /// preceding `terminator`.
    fn transparent_at_dialog(
        &self,
        command: &[u8],
        terminator: &[u8],
        skip_exit: bool,
    ) -> Result<String>;

    /// Wait between steps. Implementations that can be stopped return
    /// `NotConnected` when stopped before `duration` has passed.
    fn pause(&self, duration: Duration) -> Result<()> {
        std::thread::sleep(duration);
        Ok(())
    }
}

use super::psk::{masked_echo, psk_token, URC_PSK_ERROR_HASH};
use super::{CommandContext, CommandHandler, URC_PSK_SUCCESS};
use crate::error::CommandError;
use crest_psk::PskError;
use tracing::{error, info};

const URC_PSK_ERROR_DOWNLINK: &str = "PSK:DLER";
const URC_PSK_ERROR_EQUALITY: &str = "PSK:EQER";

/// `PSK:<key>:<hash>:SET` confirms the pending key.
///
/// Only verifies; the key is activated by the engine after the `PSK:SET`
/// report has actually been transmitted. Failures report `PSK:EQER`,
/// `PSK:HSER` or `PSK:DLER` and invalidate the pending key.
#[derive(Debug, Clone, Copy, Default)]
pub struct PskSetHandler;

impl CommandHandler for PskSetHandler {
    fn name(&self) -> &'static str {
        "PskSet"
    }

    fn can_handle(&self, command: &str) -> bool {
        psk_token(command) == Some(true)
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        self.ensure_can_handle(command)?;

        let echo = masked_echo(true);
        info!(command = echo, "Handling psk set command");
        match ctx.keys.verify_pending_key(command) {
            Ok(()) => {
                ctx.state.add_urc(URC_PSK_SUCCESS).add_downlink(echo);
            }
            Err(e) => {
                error!(error = %e, "Handling failure for psk set command");
                let urc = match e {
                    PskError::InvalidPskHash { .. } => URC_PSK_ERROR_HASH,
                    PskError::InvalidPskEquality { .. } => URC_PSK_ERROR_EQUALITY,
                    _ => URC_PSK_ERROR_DOWNLINK,
                };
                ctx.state.add_urc(urc).add_downlink(echo);
                ctx.keys.set_pending_key_as_invalid()?;
            }
        }
        Ok(())
    }
}

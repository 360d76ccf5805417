use super::{CommandContext, CommandHandler};
use crate::error::CommandError;
use crest_psk::PskError;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{error, info};

/// Tokens the PSK handlers claim. Wider than the extractor so a malformed
/// hash is still answered and invalidates the pending key.
static PSK_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^PSK:[a-zA-Z0-9]{16}:[a-zA-Z0-9]{64}(:SET)?$").expect("invalid psk token pattern")
});

const URC_PSK_PENDING: &str = "PSK:TMP";
const URC_PSK_ERROR_DOWNLINK: &str = "PSK:DLER";
pub(super) const URC_PSK_ERROR_HASH: &str = "PSK:HSER";

const DOWNLINK_PSK: &str = "PSK:################";
const DOWNLINK_PSK_SET: &str = "PSK:################:SET";

/// `Some(confirm)` when `command` is shaped like a PSK or PSK SET token.
pub(super) fn psk_token(command: &str) -> Option<bool> {
    PSK_TOKEN
        .captures(command)
        .map(|captures| captures.get(1).is_some())
}

/// Echo used in place of a PSK token so key material never leaves the device.
pub(crate) fn masked_echo(confirm: bool) -> &'static str {
    if confirm {
        DOWNLINK_PSK_SET
    } else {
        DOWNLINK_PSK
    }
}

/// `PSK:<key>:<hash>` proposes a new key.
///
/// Reports `PSK:TMP` once the proposal is stored as pending, `PSK:HSER` for a
/// hash mismatch and `PSK:DLER` for anything else. Any failure invalidates the
/// pending key.
#[derive(Debug, Clone, Copy, Default)]
pub struct PskHandler;

impl CommandHandler for PskHandler {
    fn name(&self) -> &'static str {
        "Psk"
    }

    fn can_handle(&self, command: &str) -> bool {
        psk_token(command) == Some(false)
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        self.ensure_can_handle(command)?;

        info!(command = DOWNLINK_PSK, "Handling psk command");
        match ctx.keys.prepare_pending_key(command) {
            Ok(_) => {
                ctx.state.add_urc(URC_PSK_PENDING).add_downlink(DOWNLINK_PSK);
            }
            Err(e) => {
                error!(error = %e, "Handling failure for psk command");
                let urc = match e {
                    PskError::InvalidPskHash { .. } => URC_PSK_ERROR_HASH,
                    _ => URC_PSK_ERROR_DOWNLINK,
                };
                ctx.state.add_urc(urc).add_downlink(DOWNLINK_PSK);
                ctx.keys.set_pending_key_as_invalid()?;
            }
        }
        Ok(())
    }
}

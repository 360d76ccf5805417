use super::{CommandContext, CommandHandler};
use crate::error::CommandError;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

/// `OTA` plus a four digit block number; the data chunk follows.
static OTA_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^OTA\d{4}").expect("invalid ota pattern"));

const FIRMWARE_DONE_SUFFIX: &str = ":DONE";
const URC_FIRMWARE_SUCCESS: &str = "OTA:SUC";

/// Firmware-over-the-air data chunk.
///
/// Counts chunks in `FMC`; a chunk ending in `:DONE` resets the counter and
/// reports `OTA:SUC`. Only the block header is echoed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirmwareHandler;

impl CommandHandler for FirmwareHandler {
    fn name(&self) -> &'static str {
        "Firmware"
    }

    fn can_handle(&self, command: &str) -> bool {
        OTA_HEADER.is_match(command)
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let header = OTA_HEADER
            .find(command)
            .map(|header| header.as_str())
            .ok_or_else(|| CommandError::Unsupported {
                handler: self.name(),
                command: command.to_string(),
            })?;

        debug!(header = %header, "Received firmware chunk");
        ctx.state.add_downlink(header);
        if command.ends_with(FIRMWARE_DONE_SUFFIX) {
            info!(
                chunks = ctx.state.fota_message_counter(),
                "Firmware transfer done, resetting FMC"
            );
            ctx.state.reset_fota_message_counter();
            ctx.state.add_urc(URC_FIRMWARE_SUCCESS);
        } else {
            ctx.state.increment_fota_message_counter();
        }
        Ok(())
    }
}

use super::{CommandContext, CommandHandler};
use crate::error::CommandError;
use crate::state::AlarmThresholdValues;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{info, warn};

static ALARM_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^AL(?<channel>[2-7]):(?<very_low>-?\d+),(?<low>-?\d+),(?<high>-?\d+),(?<very_high>-?\d+),(?<hysteresis>-?\d+)$",
    )
    .expect("invalid alarm pattern")
});

/// `AL<2-7>:<veryLow>,<low>,<high>,<veryHigh>,<hysteresis>` sets the
/// thresholds for one channel.
///
/// Reports `AL<ch>:SET` on success and `AL<ch>:DLER` when a value does not fit
/// a signed 32-bit integer. The token is echoed either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmHandler;

impl AlarmHandler {
    fn parse(captures: &Captures<'_>) -> Option<AlarmThresholdValues> {
        let field = |name: &str| captures.name(name)?.as_str().parse::<i32>().ok();
        Some(AlarmThresholdValues {
            channel: captures.name("channel")?.as_str().parse().ok()?,
            very_low: field("very_low")?,
            low: field("low")?,
            high: field("high")?,
            very_high: field("very_high")?,
            hysteresis: field("hysteresis")?,
        })
    }
}

impl CommandHandler for AlarmHandler {
    fn name(&self) -> &'static str {
        "Alarm"
    }

    fn can_handle(&self, command: &str) -> bool {
        ALARM_COMMAND.is_match(command)
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let captures = ALARM_COMMAND
            .captures(command)
            .ok_or_else(|| CommandError::Unsupported {
                handler: self.name(),
                command: command.to_string(),
            })?;

        match Self::parse(&captures) {
            Some(values) => {
                info!(channel = values.channel, "Setting alarm thresholds");
                ctx.state
                    .add_alarm_thresholds(values)
                    .add_urc(format!("AL{}:SET", values.channel))
                    .add_downlink(command);
            }
            None => {
                warn!(command = %command, "Alarm thresholds out of range");
                let alarm = command.split(':').next().unwrap_or_default();
                ctx.state
                    .add_urc(format!("{alarm}:DLER"))
                    .add_downlink(command);
            }
        }
        Ok(())
    }
}

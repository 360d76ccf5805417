use super::{CommandContext, CommandHandler};
use crate::error::CommandError;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

static INFO_ALARMS_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^INFO:AL([2-7]|ARMS)$").expect("invalid info alarms pattern"));

const URC_INFO_ERROR: &str = "INFO:DLER";

/// `INFO:AL<2-7>` reports one channel's thresholds, `INFO:ALARMS` reports
/// channels 0 through 7.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoAlarmsHandler;

impl InfoAlarmsHandler {
    fn report(channel: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let thresholds = if channel == "ARMS" {
            ctx.state.all_alarm_thresholds()
        } else {
            let channel: u8 = channel
                .parse()
                .map_err(|_| CommandError::MissingThresholds { channel: 0 })?;
            let values = ctx
                .state
                .alarm_thresholds(channel)
                .copied()
                .ok_or(CommandError::MissingThresholds { channel })?;
            vec![values]
        };
        ctx.state.add_alarm_report(thresholds);
        Ok(())
    }
}

impl CommandHandler for InfoAlarmsHandler {
    fn name(&self) -> &'static str {
        "InfoAlarms"
    }

    fn can_handle(&self, command: &str) -> bool {
        INFO_ALARMS_COMMAND.is_match(command)
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        let channel = INFO_ALARMS_COMMAND
            .captures(command)
            .and_then(|captures| captures.get(1))
            .map(|channel| channel.as_str())
            .ok_or_else(|| CommandError::Unsupported {
                handler: self.name(),
                command: command.to_string(),
            })?;

        info!(command = %command, "Reporting alarm thresholds");
        ctx.state.add_downlink(command);
        if let Err(e) = Self::report(channel, ctx) {
            warn!(command = %command, error = %e, "Alarm threshold report failed");
            ctx.state.add_urc(URC_INFO_ERROR);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::psk_service;
    use crate::state::{AlarmThresholdValues, SimulatorState, Urc};

    fn run(state: &mut SimulatorState, command: &str) -> Result<(), CommandError> {
        let mut keys = psk_service();
        let mut ctx = CommandContext {
            state,
            keys: &mut keys,
        };
        InfoAlarmsHandler.handle(command, &mut ctx)
    }

    fn configured_state() -> SimulatorState {
        let mut state = SimulatorState::new();
        state.reset_urc();
        state.add_alarm_thresholds(AlarmThresholdValues {
            channel: 7,
            very_low: 1,
            low: 2,
            high: 3,
            very_high: 4,
            hysteresis: 5,
        });
        state
    }

    #[test]
    fn test_can_handle() {
        assert!(InfoAlarmsHandler.can_handle("INFO:AL2"));
        assert!(InfoAlarmsHandler.can_handle("INFO:AL7"));
        assert!(InfoAlarmsHandler.can_handle("INFO:ALARMS"));
        assert!(!InfoAlarmsHandler.can_handle("INFO:ALARM"));
        assert!(!InfoAlarmsHandler.can_handle("INFO:AL1"));
        assert!(!InfoAlarmsHandler.can_handle("INFO:AL77"));
        assert!(!InfoAlarmsHandler.can_handle("XINFO:AL7"));
    }

    #[test]
    fn test_single_channel_report() {
        let mut state = configured_state();
        run(&mut state, "INFO:AL7").unwrap();

        let expected = *state.alarm_thresholds(7).unwrap();
        assert_eq!(state.urcs(), &[Urc::Alarms(vec![expected])]);
        assert_eq!(state.downlinks(), &["INFO:AL7".to_string()]);
    }

    #[test]
    fn test_all_channel_report() {
        let mut state = configured_state();
        run(&mut state, "INFO:ALARMS").unwrap();

        let Urc::Alarms(report) = &state.urcs()[0] else {
            panic!("expected alarm report, got {:?}", state.urcs());
        };
        let channels: Vec<u8> = report.iter().map(|values| values.channel).collect();
        assert_eq!(channels, (0..8).collect::<Vec<u8>>());
        assert_eq!(report[7].values(), [1, 2, 3, 4, 5]);
        assert_eq!(state.downlinks(), &["INFO:ALARMS".to_string()]);
    }

    #[test]
    fn test_unknown_channel_is_missing() {
        let mut state = configured_state();
        let mut keys = psk_service();
        let mut ctx = CommandContext {
            state: &mut state,
            keys: &mut keys,
        };

        let result = InfoAlarmsHandler::report("9", &mut ctx);
        assert!(matches!(result, Err(CommandError::MissingThresholds { channel: 9 })));
        assert!(state.urcs().is_empty());
    }

    #[test]
    fn test_missing_channel_reports_dler_and_echoes() {
        let mut state = configured_state();
        state.remove_alarm_thresholds(4);

        run(&mut state, "INFO:AL4").unwrap();

        assert_eq!(state.urcs(), &[Urc::code("INFO:DLER")]);
        assert_eq!(state.downlinks(), &["INFO:AL4".to_string()]);
    }

    #[test]
    fn test_rejects_foreign_token() {
        let mut state = SimulatorState::new();
        assert!(matches!(
            run(&mut state, "INFO:ALARM"),
            Err(CommandError::Unsupported { .. })
        ));
    }
}

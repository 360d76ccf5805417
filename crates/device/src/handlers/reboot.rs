use super::{CommandContext, CommandHandler};
use crate::error::CommandError;
use crate::state::URC_INIT;
use tracing::info;

const CMD_REBOOT: &str = "CMD:REBOOT";
const URC_WATCHDOG_RESET: &str = "WDR";

#[derive(Debug, Clone, Copy, Default)]
pub struct RebootHandler;

impl CommandHandler for RebootHandler {
    fn name(&self) -> &'static str {
        "Reboot"
    }

    fn can_handle(&self, command: &str) -> bool {
        command == CMD_REBOOT
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        self.ensure_can_handle(command)?;

        info!(command = %command, "Handling reboot command");
        ctx.state
            .add_urc(URC_INIT)
            .add_urc(URC_WATCHDOG_RESET)
            .add_downlink(CMD_REBOOT);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::psk_service;
    use crate::state::{AlarmThresholdValues, SimulatorState, Urc};

    #[test]
    fn test_reboot_reports_init_and_wdr() {
        let mut state = SimulatorState::new();
        state.reset_urc();
        state.add_urc("AL2:SET").increment_fota_message_counter();
        state.add_alarm_thresholds(AlarmThresholdValues {
            channel: 2,
            very_low: 1,
            low: 1,
            high: 1,
            very_high: 1,
            hysteresis: 1,
        });
        let mut keys = psk_service();
        let mut ctx = CommandContext {
            state: &mut state,
            keys: &mut keys,
        };

        RebootHandler.handle("CMD:REBOOT", &mut ctx).unwrap();

        assert_eq!(
            state.urcs(),
            &[Urc::code("AL2:SET"), Urc::code("INIT"), Urc::code("WDR")]
        );
        assert_eq!(state.downlinks(), &["CMD:REBOOT".to_string()]);
    }

    #[test]
    fn test_exact_literal_only() {
        assert!(RebootHandler.can_handle("CMD:REBOOT"));
        assert!(!RebootHandler.can_handle("CMD:REBOOT "));
        assert!(!RebootHandler.can_handle("cmd:reboot"));
    }
}

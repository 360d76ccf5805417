use super::{CommandContext, CommandHandler};
use crate::error::CommandError;
use crate::state::SimulatorState;
use tracing::{error, info};

/// Exact-literal response request such as `CMD:RSP`, answered with `<name>:OK`.
///
/// The `<name>:DLER` branch is kept for a failing response path; the current
/// response never fails.
#[derive(Debug, Clone, Copy)]
pub struct RspHandler {
    name: &'static str,
    command: &'static str,
    urc_success: &'static str,
    urc_error: &'static str,
}

impl RspHandler {
    pub const fn rsp() -> Self {
        Self {
            name: "Rsp",
            command: "CMD:RSP",
            urc_success: "RSP:OK",
            urc_error: "RSP:DLER",
        }
    }

    pub const fn rsp2() -> Self {
        Self {
            name: "Rsp2",
            command: "CMD:RSP2",
            urc_success: "RSP2:OK",
            urc_error: "RSP2:DLER",
        }
    }

    fn respond(&self, state: &mut SimulatorState) -> Result<(), CommandError> {
        state.add_urc(self.urc_success).add_downlink(self.command);
        Ok(())
    }
}

impl CommandHandler for RspHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn can_handle(&self, command: &str) -> bool {
        command == self.command
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        self.ensure_can_handle(command)?;

        info!(command = %command, "Handling response command");
        if let Err(e) = self.respond(ctx.state) {
            error!(command = %command, error = %e, "Handling failure for response command");
            ctx.state.add_urc(self.urc_error).add_downlink(command);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::psk_service;
    use crate::state::Urc;

    fn run(handler: RspHandler, command: &str) -> SimulatorState {
        let mut state = SimulatorState::new();
        state.reset_urc();
        let mut keys = psk_service();
        let mut ctx = CommandContext {
            state: &mut state,
            keys: &mut keys,
        };
        handler.handle(command, &mut ctx).unwrap();
        state
    }

    #[test]
    fn test_rsp() {
        let state = run(RspHandler::rsp(), "CMD:RSP");
        assert_eq!(state.urcs(), &[Urc::code("RSP:OK")]);
        assert_eq!(state.downlinks(), &["CMD:RSP".to_string()]);
    }

    #[test]
    fn test_rsp2() {
        let state = run(RspHandler::rsp2(), "CMD:RSP2");
        assert_eq!(state.urcs(), &[Urc::code("RSP2:OK")]);
        assert_eq!(state.downlinks(), &["CMD:RSP2".to_string()]);
    }

    #[test]
    fn test_literals_do_not_overlap() {
        assert!(RspHandler::rsp().can_handle("CMD:RSP"));
        assert!(!RspHandler::rsp().can_handle("CMD:RSP2"));
        assert!(RspHandler::rsp2().can_handle("CMD:RSP2"));
        assert!(!RspHandler::rsp2().can_handle("CMD:RSP"));
    }
}

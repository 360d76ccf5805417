//! Downlink command handlers.
//!
//! Several grammars overlap structurally (a `PSK:...:SET` token also starts
//! like a plain `PSK:` proposal), so the registry fixes the order in which
//! handlers are asked and the first one that accepts a token owns it.

mod alarm;
mod firmware;
mod info_alarms;
mod psk;
mod psk_set;
mod reboot;
mod rsp;

pub use alarm::AlarmHandler;
pub use firmware::FirmwareHandler;
pub use info_alarms::InfoAlarmsHandler;
pub use psk::PskHandler;
pub use psk_set::PskSetHandler;
pub use reboot::RebootHandler;
pub use rsp::RspHandler;

use crate::error::CommandError;
use crate::state::SimulatorState;
use crest_psk::PskService;
use tracing::{debug, info};

/// URC reported once a PSK SET confirmation was accepted.
pub const URC_PSK_SUCCESS: &str = "PSK:SET";

/// Mutable collaborators available to a handler.
pub struct CommandContext<'a> {
    pub state: &'a mut SimulatorState,
    pub keys: &'a mut PskService,
}

/// Two-step contract shared by every handler.
pub trait CommandHandler {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    fn can_handle(&self, command: &str) -> bool;

    /// Apply `command`. Fails with [`CommandError::Unsupported`] when
    /// [`can_handle`](Self::can_handle) would reject it.
    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError>;

    fn ensure_can_handle(&self, command: &str) -> Result<(), CommandError> {
        if self.can_handle(command) {
            Ok(())
        } else {
            Err(CommandError::Unsupported {
                handler: self.name(),
                command: command.to_string(),
            })
        }
    }
}

/// Closed set of handlers known to the device.
#[derive(Debug, Clone)]
pub enum Handler {
    Alarm(AlarmHandler),
    InfoAlarms(InfoAlarmsHandler),
    PskSet(PskSetHandler),
    Psk(PskHandler),
    Reboot(RebootHandler),
    Rsp(RspHandler),
    Rsp2(RspHandler),
    Firmware(FirmwareHandler),
}

impl Handler {
    fn inner(&self) -> &dyn CommandHandler {
        match self {
            Handler::Alarm(handler) => handler,
            Handler::InfoAlarms(handler) => handler,
            Handler::PskSet(handler) => handler,
            Handler::Psk(handler) => handler,
            Handler::Reboot(handler) => handler,
            Handler::Rsp(handler) | Handler::Rsp2(handler) => handler,
            Handler::Firmware(handler) => handler,
        }
    }
}

impl CommandHandler for Handler {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn can_handle(&self, command: &str) -> bool {
        self.inner().can_handle(command)
    }

    fn handle(&self, command: &str, ctx: &mut CommandContext<'_>) -> Result<(), CommandError> {
        self.inner().handle(command, ctx)
    }
}

/// Ordered handler list used to dispatch downlink tokens.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<Handler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            handlers: vec![
                Handler::Alarm(AlarmHandler),
                Handler::InfoAlarms(InfoAlarmsHandler),
                Handler::PskSet(PskSetHandler),
                Handler::Psk(PskHandler),
                Handler::Reboot(RebootHandler),
                Handler::Rsp(RspHandler::rsp()),
                Handler::Rsp2(RspHandler::rsp2()),
                Handler::Firmware(FirmwareHandler),
            ],
        }
    }
}

impl HandlerRegistry {
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Find the handler that owns `command`, if any.
    pub fn find(&self, command: &str) -> Option<&Handler> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle(command))
    }

    /// Hand `command` to the first handler that accepts it.
    ///
    /// Returns the name of that handler, or `None` when no handler owns the
    /// token; unrecognized tokens are dropped without touching state.
    pub fn dispatch(
        &self,
        command: &str,
        ctx: &mut CommandContext<'_>,
    ) -> Result<Option<&'static str>, CommandError> {
        let Some(handler) = self.find(command) else {
            debug!(command = %mask(command), "Ignoring unrecognized downlink");
            return Ok(None);
        };

        info!(handler = handler.name(), command = %mask(command), "Dispatching downlink");
        handler.handle(command, ctx)?;
        Ok(Some(handler.name()))
    }
}

/// Mask key material in `PSK:` tokens before they reach a log line.
pub fn mask(command: &str) -> String {
    if command.starts_with("PSK:") {
        let confirm = command.ends_with(":SET");
        psk::masked_echo(confirm).to_string()
    } else {
        command.to_string()
    }
}

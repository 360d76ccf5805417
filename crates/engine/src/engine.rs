//! Protocol engine: the device's single send/receive loop.

use crate::transport::Transport;
use crest_core::SimulatorConfig;
use crest_device::handlers::{mask, URC_PSK_SUCCESS};
use crest_device::{CommandContext, DeviceMessage, HandlerRegistry, SimulatorState};
use crest_psk::PskService;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Leading marker asking the device to send again without sleeping.
pub const FOLLOW_UP_MARKER: char = '!';

/// Separator between downlink tokens in a response body.
pub const DOWNLINK_DELIMITER: char = ';';

/// Consecutive sends allowed before the device sleeps regardless of markers.
pub const DEFAULT_BURST_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub produce_valid_cbor: bool,
    pub sleep_duration: Duration,
    pub burst_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&SimulatorConfig::default())
    }
}

impl From<&SimulatorConfig> for EngineConfig {
    fn from(config: &SimulatorConfig) -> Self {
        Self {
            produce_valid_cbor: config.produce_valid_cbor,
            sleep_duration: config.sleep_duration(),
            burst_limit: DEFAULT_BURST_LIMIT,
        }
    }
}

/// Response body split into its follow-up flag and downlink tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBody<'a> {
    pub follow_up: bool,
    pub commands: Vec<&'a str>,
}

pub fn parse_response_body(body: &str) -> ResponseBody<'_> {
    let (follow_up, rest) = match body.strip_prefix(FOLLOW_UP_MARKER) {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    ResponseBody {
        follow_up,
        commands: rest
            .split(DOWNLINK_DELIMITER)
            .map(str::trim)
            .filter(|command| !command.is_empty())
            .collect(),
    }
}

/// Result of one send cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The platform accepted the envelope.
    Delivered { follow_up: bool, commands: usize },
    /// Encoding, transport or platform failure; nothing was dispatched.
    Failed,
}

impl CycleOutcome {
    pub fn follow_up_requested(&self) -> bool {
        matches!(self, CycleOutcome::Delivered { follow_up: true, .. })
    }
}

/// Decides whether the next send happens immediately or after the sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstScheduler {
    limit: usize,
    sends_in_burst: usize,
}

impl BurstScheduler {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            sends_in_burst: 0,
        }
    }

    /// Record a completed send. Returns true when the next send should go out
    /// without sleeping.
    pub fn send_immediately(&mut self, follow_up: bool) -> bool {
        self.sends_in_burst += 1;
        if follow_up && self.sends_in_burst < self.limit {
            true
        } else {
            self.sends_in_burst = 0;
            false
        }
    }
}

/// Owns the device state and drives it through the transport.
pub struct ProtocolEngine<T> {
    transport: T,
    state: SimulatorState,
    keys: PskService,
    registry: HandlerRegistry,
    config: EngineConfig,
}

impl<T: Transport> ProtocolEngine<T> {
    pub fn new(transport: T, keys: PskService, config: EngineConfig) -> Self {
        Self {
            transport,
            state: SimulatorState::new(),
            keys,
            registry: HandlerRegistry::default(),
            config,
        }
    }

    pub fn state(&self) -> &SimulatorState {
        &self.state
    }

    pub fn keys(&self) -> &PskService {
        &self.keys
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run cycles forever. Nothing raised inside a cycle stops the loop.
    pub async fn run(&mut self) {
        info!(
            identity = %self.keys.identity(),
            sleep_ms = self.config.sleep_duration.as_millis() as u64,
            burst_limit = self.config.burst_limit,
            "Starting device loop"
        );

        let mut scheduler = BurstScheduler::new(self.config.burst_limit);
        loop {
            let outcome = self.run_cycle().await;
            if scheduler.send_immediately(outcome.follow_up_requested()) {
                debug!("Follow-up requested, sending immediately");
                continue;
            }
            debug!(sleep_ms = self.config.sleep_duration.as_millis() as u64, "Sleeping");
            tokio::time::sleep(self.config.sleep_duration).await;
        }
    }

    /// Build, send and process one envelope.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let message = DeviceMessage::from_state(&self.state, self.keys.identity());
        self.state.reset_urc();

        let payload = match message.to_payload(self.config.produce_valid_cbor) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode device message");
                self.state.request_failed();
                return CycleOutcome::Failed;
            }
        };

        info!(
            bytes = payload.len(),
            valid = self.config.produce_valid_cbor,
            urcs = message.urc.len(),
            "Sending device message"
        );

        let response = match self.transport.send(&payload).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!(code = %response.code, "Platform rejected device message");
                self.state.request_failed();
                return CycleOutcome::Failed;
            }
            Err(e) => {
                error!(error = %e, "Failed to send device message");
                self.state.request_failed();
                return CycleOutcome::Failed;
            }
        };

        self.state.request_succeeded();
        self.on_message_sent(&message);

        let body = String::from_utf8_lossy(&response.payload);
        info!(code = %response.code, bytes = response.payload.len(), "Received response");
        let parsed = parse_response_body(&body);
        for command in &parsed.commands {
            self.dispatch(command);
        }

        CycleOutcome::Delivered {
            follow_up: parsed.follow_up,
            commands: parsed.commands.len(),
        }
    }

    /// Runs synchronously after a successful send, before the response is
    /// processed. A `PSK:SET` report that actually left the device is the only
    /// trigger for key activation.
    fn on_message_sent(&mut self, message: &DeviceMessage) {
        if !message.contains_urc(URC_PSK_SUCCESS) {
            return;
        }

        match self.keys.has_pending_key() {
            Ok(true) => {
                if let Err(e) = self.keys.activate_key() {
                    error!(error = %e, "Failed to activate confirmed psk");
                }
            }
            Ok(false) => {
                warn!("PSK:SET was sent but no pending psk exists");
            }
            Err(e) => {
                error!(error = %e, "Failed to look up pending psk");
            }
        }
    }

    fn dispatch(&mut self, command: &str) {
        let mut ctx = CommandContext {
            state: &mut self.state,
            keys: &mut self.keys,
        };
        if let Err(e) = self.registry.dispatch(command, &mut ctx) {
            error!(command = %mask(command), error = %e, "Failed to handle downlink");
        }
    }
}

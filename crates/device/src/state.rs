//! Per-device mutable state.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of alarm channels stored by the device (0 through 7).
pub const ALARM_CHANNELS: u8 = 8;

/// Status reported at startup and after a reboot.
pub const URC_INIT: &str = "INIT";

/// Thresholds for one alarm channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmThresholdValues {
    pub channel: u8,
    pub very_low: i32,
    pub low: i32,
    pub high: i32,
    pub very_high: i32,
    pub hysteresis: i32,
}

impl AlarmThresholdValues {
    pub fn zeroed(channel: u8) -> Self {
        Self {
            channel,
            very_low: 0,
            low: 0,
            high: 0,
            very_high: 0,
            hysteresis: 0,
        }
    }

    /// Threshold values in wire order.
    pub fn values(&self) -> [i32; 5] {
        [
            self.very_low,
            self.low,
            self.high,
            self.very_high,
            self.hysteresis,
        ]
    }
}

/// One entry of the envelope's `URC` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Urc {
    /// Plain status code such as `INIT` or `AL3:SET`
    Code(String),
    /// Threshold report, encoded as `{"AL<ch>": [vl, l, h, vh, hy], ...}`
    Alarms(Vec<AlarmThresholdValues>),
    /// Echoed downlinks, encoded as `{"DL": "<joined>"}`
    Downlink(String),
}

impl Urc {
    pub fn code(code: impl Into<String>) -> Self {
        Urc::Code(code.into())
    }

    pub fn as_code(&self) -> Option<&str> {
        match self {
            Urc::Code(code) => Some(code),
            _ => None,
        }
    }
}

/// Everything the simulated device remembers between cycles.
///
/// URCs and downlink echoes only live until the next envelope is built;
/// thresholds and the firmware counter persist until changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorState {
    fota_message_counter: u32,
    urcs: Vec<Urc>,
    downlinks: Vec<String>,
    alarm_thresholds: BTreeMap<u8, AlarmThresholdValues>,
    mem: u32,
    tsl: u64,
}

impl Default for SimulatorState {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorState {
    pub fn new() -> Self {
        Self {
            fota_message_counter: 0,
            urcs: vec![Urc::code(URC_INIT)],
            downlinks: Vec::new(),
            alarm_thresholds: (0..ALARM_CHANNELS)
                .map(|channel| (channel, AlarmThresholdValues::zeroed(channel)))
                .collect(),
            mem: 0,
            tsl: 0,
        }
    }

    pub fn fota_message_counter(&self) -> u32 {
        self.fota_message_counter
    }

    pub fn increment_fota_message_counter(&mut self) {
        self.fota_message_counter = self.fota_message_counter.saturating_add(1);
    }

    pub fn reset_fota_message_counter(&mut self) {
        self.fota_message_counter = 0;
    }

    pub fn urcs(&self) -> &[Urc] {
        &self.urcs
    }

    pub fn downlinks(&self) -> &[String] {
        &self.downlinks
    }

    pub fn add_urc(&mut self, urc: impl Into<String>) -> &mut Self {
        self.urcs.push(Urc::Code(urc.into()));
        self
    }

    pub fn add_alarm_report(&mut self, thresholds: Vec<AlarmThresholdValues>) -> &mut Self {
        self.urcs.push(Urc::Alarms(thresholds));
        self
    }

    pub fn add_downlink(&mut self, downlink: impl Into<String>) -> &mut Self {
        self.downlinks.push(downlink.into());
        self
    }

    /// Replace the thresholds for `values.channel`.
    pub fn add_alarm_thresholds(&mut self, values: AlarmThresholdValues) -> &mut Self {
        self.alarm_thresholds.insert(values.channel, values);
        self
    }

    pub fn alarm_thresholds(&self, channel: u8) -> Option<&AlarmThresholdValues> {
        self.alarm_thresholds.get(&channel)
    }

    #[cfg(test)]
    pub(crate) fn remove_alarm_thresholds(&mut self, channel: u8) -> &mut Self {
        self.alarm_thresholds.remove(&channel);
        self
    }

    /// All stored thresholds ordered by channel.
    pub fn all_alarm_thresholds(&self) -> Vec<AlarmThresholdValues> {
        self.alarm_thresholds.values().copied().collect()
    }

    /// URC list for the next envelope: queued entries followed by one
    /// downlink entry holding every echo joined with `,`.
    pub fn urc_list_for_device_message(&self) -> Vec<Urc> {
        let mut urcs = self.urcs.clone();
        urcs.push(Urc::Downlink(self.downlinks.join(",")));
        urcs
    }

    /// Clear queued URCs and downlink echoes.
    pub fn reset_urc(&mut self) {
        self.urcs.clear();
        self.downlinks.clear();
    }

    /// Flash backlog counter reported as `MEM`.
    pub fn mem(&self) -> u32 {
        self.mem
    }

    /// Unix time of the last successful send, reported as `TSL`.
    pub fn tsl(&self) -> u64 {
        self.tsl
    }

    pub fn request_succeeded(&mut self) {
        // Pretend the flash backlog was flushed with this message.
        self.mem = 0;
        self.tsl = unix_time();
    }

    pub fn request_failed(&mut self) {
        self.mem = self.mem.saturating_add(1);
    }
}

pub(crate) fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

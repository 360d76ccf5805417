//! Telemetry envelope sent every cycle.
//!
//! Encoded as a CBOR map with text keys. Keys are the upper-cased field names
//! except `cID`, which keeps its mixed case on the wire.

use crate::error::EnvelopeError;
use crate::state::{unix_time, SimulatorState, Urc};
use minicbor::encode::{Error, Write};
use minicbor::{Encode, Encoder};

/// Payload sent instead of the envelope when negative testing is enabled.
pub const INVALID_CBOR_MESSAGE: &[u8] = b"B36249441B000313";

const FIELD_COUNT: u64 = 29;
const PRESSURE_SAMPLES: usize = 72;
const PRESSURE_BASELINE: u16 = 2048;

fn pressure_curve(head: &[u16]) -> Vec<u16> {
    let mut samples = head.to_vec();
    samples.resize(PRESSURE_SAMPLES, PRESSURE_BASELINE);
    samples
}

/// Device identity as reported in the `ID` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceId {
    Numeric(u64),
    Text(String),
}

impl From<&str> for DeviceId {
    fn from(identity: &str) -> Self {
        match identity.parse() {
            Ok(id) => DeviceId::Numeric(id),
            Err(_) => DeviceId::Text(identity.to_string()),
        }
    }
}

/// Fixed-schema telemetry record. Everything except the URC list, firmware
/// counter and timing fields is a representative constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMessage {
    pub a: Vec<u8>,
    pub bat: u16,
    pub con: String,
    pub d: u8,
    pub eid: String,
    pub fmc: u32,
    pub fw: u16,
    pub h1: Vec<u16>,
    pub iccid: String,
    pub id: DeviceId,
    pub imsi: u64,
    pub mem: u32,
    pub mid: u8,
    pub msi: u8,
    pub p1: Vec<u16>,
    pub p2: Vec<u16>,
    pub pwr: u8,
    pub rly: u8,
    pub rsrp: i32,
    pub rsrq: i32,
    pub snr: i32,
    pub t1: Vec<i32>,
    pub tel: u32,
    pub r#try: u8,
    pub ts: u64,
    pub tsl: u64,
    pub upt: u32,
    pub urc: Vec<Urc>,
    pub cid: u64,
}

impl DeviceMessage {
    /// Build the envelope for the current cycle.
    pub fn from_state(state: &SimulatorState, identity: &str) -> Self {
        Self {
            a: vec![3, 0, 0, 0, 0, 0, 0, 0],
            bat: 3758,
            con: "M".to_string(),
            d: 8,
            eid: "89001012012341234012345678901224".to_string(),
            fmc: state.fota_message_counter(),
            fw: 2100,
            h1: vec![463],
            iccid: "89882280666074936745".to_string(),
            id: DeviceId::from(identity),
            imsi: 460_023_210_226_023,
            mem: state.mem(),
            mid: 1,
            msi: 0,
            p1: pressure_curve(&[2020, 2034, 2022, 2050]),
            p2: pressure_curve(&[1800, 1848, 1948, 2148, 2248, 1948]),
            pwr: 1,
            rly: 0,
            rsrp: -99,
            rsrq: -210,
            snr: 22,
            t1: vec![222],
            tel: 20416,
            r#try: 1,
            ts: unix_time(),
            tsl: state.tsl(),
            upt: 100,
            urc: state.urc_list_for_device_message(),
            cid: 49_093_243,
        }
    }

    /// True when the URC list carries the plain status `code`.
    pub fn contains_urc(&self, code: &str) -> bool {
        self.urc.iter().any(|urc| urc.as_code() == Some(code))
    }

    pub fn encode_valid(&self) -> Result<Vec<u8>, EnvelopeError> {
        minicbor::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Request body for this envelope: the CBOR encoding, or the fixed
    /// invalid payload when `produce_valid` is false.
    pub fn to_payload(&self, produce_valid: bool) -> Result<Vec<u8>, EnvelopeError> {
        if produce_valid {
            self.encode_valid()
        } else {
            Ok(INVALID_CBOR_MESSAGE.to_vec())
        }
    }
}

impl<C> Encode<C> for DeviceId {
    fn encode<W: Write>(&self, e: &mut Encoder<W>, _ctx: &mut C) -> Result<(), Error<W::Error>> {
        match self {
            DeviceId::Numeric(id) => e.u64(*id)?,
            DeviceId::Text(id) => e.str(id)?,
        };
        Ok(())
    }
}

impl<C> Encode<C> for Urc {
    fn encode<W: Write>(&self, e: &mut Encoder<W>, _ctx: &mut C) -> Result<(), Error<W::Error>> {
        match self {
            Urc::Code(code) => {
                e.str(code)?;
            }
            Urc::Alarms(thresholds) => {
                e.map(thresholds.len() as u64)?;
                for values in thresholds {
                    e.str(&format!("AL{}", values.channel))?
                        .encode(values.values())?;
                }
            }
            Urc::Downlink(downlinks) => {
                e.map(1)?.str("DL")?.str(downlinks)?;
            }
        }
        Ok(())
    }
}

impl<C> Encode<C> for DeviceMessage {
    fn encode<W: Write>(&self, e: &mut Encoder<W>, ctx: &mut C) -> Result<(), Error<W::Error>> {
        e.map(FIELD_COUNT)?;
        e.str("A")?.encode(&self.a)?;
        e.str("BAT")?.u16(self.bat)?;
        e.str("CON")?.str(&self.con)?;
        e.str("D")?.u8(self.d)?;
        e.str("EID")?.str(&self.eid)?;
        e.str("FMC")?.u32(self.fmc)?;
        e.str("FW")?.u16(self.fw)?;
        e.str("H1")?.encode(&self.h1)?;
        e.str("ICCID")?.str(&self.iccid)?;
        e.str("ID")?.encode_with(&self.id, ctx)?;
        e.str("IMSI")?.u64(self.imsi)?;
        e.str("MEM")?.u32(self.mem)?;
        e.str("MID")?.u8(self.mid)?;
        e.str("MSI")?.u8(self.msi)?;
        e.str("P1")?.encode(&self.p1)?;
        e.str("P2")?.encode(&self.p2)?;
        e.str("PWR")?.u8(self.pwr)?;
        e.str("RLY")?.u8(self.rly)?;
        e.str("RSRP")?.i32(self.rsrp)?;
        e.str("RSRQ")?.i32(self.rsrq)?;
        e.str("SNR")?.i32(self.snr)?;
        e.str("T1")?.encode(&self.t1)?;
        e.str("TEL")?.u32(self.tel)?;
        e.str("TRY")?.u8(self.r#try)?;
        e.str("TS")?.u64(self.ts)?;
        e.str("TSL")?.u64(self.tsl)?;
        e.str("UPT")?.u32(self.upt)?;
        e.str("URC")?.encode_with(&self.urc, ctx)?;
        e.str("cID")?.u64(self.cid)?;
        Ok(())
    }
}

//! Integration tests for the device send loop.
//!
//! A scripted transport stands in for the platform: it replays canned
//! responses and records every request together with the key that was live
//! when the request went out. These tests cover:
//! - Full PSK rotation (key switches only after PSK:SET was transmitted)
//! - Rejected rotations (tampered hash, mismatched key)
//! - Downlink dispatch, echoes and URC reporting across cycles
//! - Transport failures and request bookkeeping

use crest_engine::{
    CycleOutcome, EngineConfig, ProtocolEngine, ResponseCode, Transport, TransportError,
    TransportResponse, TransportResult,
};
use crest_psk::{rotation_hash, PskRepository, PskService, PskStatus, PskStore};
use minicbor::data::Type;
use minicbor::Decoder;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

const IDENTITY: &str = "867787050253370";
const SECRET: &str = "S";
const K0: &str = "1234567891234567";
const K1: &str = "ABCDEFGHIJKLMNOP";
const K2: &str = "abcdefghijklmnop";

/// One recorded request.
struct SentRequest {
    payload: Vec<u8>,
    key: String,
}

struct ScriptedTransport {
    store: PskStore,
    responses: Mutex<VecDeque<TransportResult<TransportResponse>>>,
    sent: Mutex<Vec<SentRequest>>,
}

impl ScriptedTransport {
    fn new(store: PskStore) -> Self {
        Self {
            store,
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn respond(&self, body: &str) {
        self.push(Ok(TransportResponse::new(ResponseCode::CHANGED, body.as_bytes())));
    }

    fn push(&self, response: TransportResult<TransportResponse>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn last(&self) -> Envelope {
        let sent = self.sent.lock().unwrap();
        let request = sent.last().expect("no request sent");
        Envelope::decode(&request.payload, &request.key)
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    async fn send(&self, payload: &[u8]) -> TransportResult<TransportResponse> {
        self.sent.lock().unwrap().push(SentRequest {
            payload: payload.to_vec(),
            key: self.store.key().to_string(),
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TransportResponse::new(ResponseCode::CHANGED, Vec::new())))
    }
}

/// The parts of a decoded envelope the tests look at.
#[derive(Debug)]
struct Envelope {
    key: String,
    urcs: Vec<String>,
    downlinks: String,
    fmc: u64,
    mem: u64,
}

impl Envelope {
    fn decode(payload: &[u8], key: &str) -> Self {
        let mut envelope = Envelope {
            key: key.to_string(),
            urcs: Vec::new(),
            downlinks: String::new(),
            fmc: 0,
            mem: 0,
        };

        let mut d = Decoder::new(payload);
        let fields = d.map().unwrap().unwrap();
        for _ in 0..fields {
            match d.str().unwrap() {
                "FMC" => envelope.fmc = d.u64().unwrap(),
                "MEM" => envelope.mem = d.u64().unwrap(),
                "URC" => {
                    let entries = d.array().unwrap().unwrap();
                    for _ in 0..entries {
                        if d.datatype().unwrap() == Type::String {
                            envelope.urcs.push(d.str().unwrap().to_string());
                            continue;
                        }
                        let keys = d.map().unwrap().unwrap();
                        for _ in 0..keys {
                            let name = d.str().unwrap().to_string();
                            if name == "DL" {
                                envelope.downlinks = d.str().unwrap().to_string();
                            } else {
                                envelope.urcs.push(name);
                                d.skip().unwrap();
                            }
                        }
                    }
                }
                _ => d.skip().unwrap(),
            }
        }
        envelope
    }

    fn has(&self, urc: &str) -> bool {
        self.urcs.iter().any(|u| u == urc)
    }
}

fn engine() -> ProtocolEngine<ScriptedTransport> {
    let store = PskStore::new(IDENTITY, K0);
    let repository = PskRepository::open_in_memory().unwrap();
    let mut keys = PskService::new(repository, store.clone());
    keys.provision(K0, SECRET).unwrap();

    let config = EngineConfig {
        produce_valid_cbor: true,
        sleep_duration: Duration::from_millis(10),
        burst_limit: 5,
    };
    ProtocolEngine::new(ScriptedTransport::new(store), keys, config)
}

fn propose(key: &str) -> String {
    format!("PSK:{key}:{}", rotation_hash(SECRET, key))
}

fn confirm(key: &str) -> String {
    format!("{}:SET", propose(key))
}

fn statuses(engine: &ProtocolEngine<ScriptedTransport>) -> Vec<(u32, PskStatus)> {
    engine
        .keys()
        .revisions()
        .unwrap()
        .into_iter()
        .map(|row| (row.revision, row.status))
        .collect()
}

#[tokio::test]
async fn test_first_cycle_reports_init() {
    let mut engine = engine();

    let outcome = engine.run_cycle().await;

    assert_eq!(
        outcome,
        CycleOutcome::Delivered {
            follow_up: false,
            commands: 0
        }
    );
    let envelope = engine.transport().last();
    assert_eq!(envelope.urcs, vec!["INIT"]);
    assert_eq!(envelope.downlinks, "");

    // Queues are cleared once reported.
    engine.run_cycle().await;
    assert!(engine.transport().last().urcs.is_empty());
}

#[tokio::test]
async fn test_psk_rotation_round_trip() {
    let mut engine = engine();

    // Cycle 1 receives the proposal.
    engine.transport().respond(&propose(K1));
    engine.run_cycle().await;
    assert_eq!(engine.keys().store().key().as_str(), K0);

    // Cycle 2 reports PSK:TMP and receives the confirmation.
    engine.transport().respond(&confirm(K1));
    engine.run_cycle().await;
    let envelope = engine.transport().last();
    assert!(envelope.has("PSK:TMP"));
    assert_eq!(envelope.downlinks, "PSK:################");
    assert_eq!(envelope.key, K0);
    assert_eq!(engine.keys().store().key().as_str(), K0);
    assert_eq!(
        statuses(&engine),
        vec![(0, PskStatus::Active), (1, PskStatus::Pending)]
    );

    // Cycle 3 carries PSK:SET under the old key, then activates.
    engine.run_cycle().await;
    let envelope = engine.transport().last();
    assert!(envelope.has("PSK:SET"));
    assert_eq!(envelope.downlinks, "PSK:################:SET");
    assert_eq!(envelope.key, K0);
    assert_eq!(engine.keys().store().key().as_str(), K1);
    assert_eq!(
        statuses(&engine),
        vec![(0, PskStatus::Inactive), (1, PskStatus::Active)]
    );

    // Cycle 4 runs under the new key and does not rotate again.
    engine.run_cycle().await;
    assert_eq!(engine.transport().last().key, K1);
    assert_eq!(
        statuses(&engine),
        vec![(0, PskStatus::Inactive), (1, PskStatus::Active)]
    );
}

#[tokio::test]
async fn test_confirmation_lost_in_transit_does_not_activate() {
    let mut engine = engine();
    engine.transport().respond(&propose(K1));
    engine.run_cycle().await;
    engine.transport().respond(&confirm(K1));
    engine.run_cycle().await;

    // The envelope carrying PSK:SET never reaches the platform.
    engine
        .transport()
        .push(Err(TransportError::Timeout(Duration::from_secs(1))));
    assert_eq!(engine.run_cycle().await, CycleOutcome::Failed);

    assert_eq!(engine.keys().store().key().as_str(), K0);
    assert!(engine.keys().has_pending_key().unwrap());
}

#[tokio::test]
async fn test_tampered_hash_is_rejected() {
    let mut engine = engine();
    let tampered = format!("PSK:{K1}:{}", rotation_hash("not-the-secret", K1));

    engine.transport().respond(&tampered);
    engine.run_cycle().await;
    engine.run_cycle().await;

    let envelope = engine.transport().last();
    assert!(envelope.has("PSK:HSER"));
    assert!(!envelope.has("PSK:TMP"));
    assert_eq!(statuses(&engine), vec![(0, PskStatus::Active)]);
    assert_eq!(engine.keys().store().key().as_str(), K0);
}

#[tokio::test]
async fn test_mismatched_confirmation_invalidates_pending_key() {
    let mut engine = engine();
    engine.transport().respond(&propose(K1));
    engine.run_cycle().await;

    let mismatched = format!("PSK:{K2}:{}:SET", rotation_hash(SECRET, K1));
    engine.transport().respond(&mismatched);
    engine.run_cycle().await;
    engine.run_cycle().await;

    let envelope = engine.transport().last();
    assert!(envelope.has("PSK:EQER"));
    assert!(!envelope.has("PSK:SET"));
    assert_eq!(
        statuses(&engine),
        vec![(0, PskStatus::Active), (1, PskStatus::Invalid)]
    );
    assert_eq!(engine.keys().store().key().as_str(), K0);
}

#[tokio::test]
async fn test_non_hex_confirmation_is_answered_and_invalidates() {
    let mut engine = engine();
    engine.transport().respond(&propose(K1));
    engine.run_cycle().await;

    let malformed = format!("PSK:{K1}:{}:SET", "z".repeat(64));
    engine.transport().respond(&malformed);
    let outcome = engine.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Delivered {
            follow_up: false,
            commands: 1
        }
    );
    engine.run_cycle().await;

    let envelope = engine.transport().last();
    assert!(envelope.has("PSK:DLER"));
    assert!(!envelope.has("PSK:SET"));
    assert_eq!(envelope.downlinks, "PSK:################:SET");
    assert_eq!(
        statuses(&engine),
        vec![(0, PskStatus::Active), (1, PskStatus::Invalid)]
    );
    assert_eq!(engine.keys().store().key().as_str(), K0);
}

#[tokio::test]
async fn test_reboot_and_alarm_commands() {
    let mut engine = engine();
    engine
        .transport()
        .respond("CMD:REBOOT;AL3:-10,-5,5,10,1;INFO:AL3;UNKNOWN");

    let outcome = engine.run_cycle().await;
    assert_eq!(
        outcome,
        CycleOutcome::Delivered {
            follow_up: false,
            commands: 4
        }
    );

    engine.run_cycle().await;
    let envelope = engine.transport().last();
    assert_eq!(envelope.urcs, vec!["INIT", "WDR", "AL3:SET", "AL3"]);
    assert_eq!(
        envelope.downlinks,
        "CMD:REBOOT,AL3:-10,-5,5,10,1,INFO:AL3"
    );
    assert_eq!(
        engine.state().alarm_thresholds(3).map(|t| t.values()),
        Some([-10, -5, 5, 10, 1])
    );
}

#[tokio::test]
async fn test_firmware_transfer_counter() {
    let mut engine = engine();
    engine.transport().respond("OTA0000:00aa11bb");
    engine.run_cycle().await;
    engine.transport().respond("OTA0001:22cc33dd");
    engine.run_cycle().await;

    engine.transport().respond("OTA0002:44ee:DONE");
    engine.run_cycle().await;
    let envelope = engine.transport().last();
    assert_eq!(envelope.fmc, 2);
    assert_eq!(envelope.downlinks, "OTA0001");

    engine.run_cycle().await;
    let envelope = engine.transport().last();
    assert_eq!(envelope.fmc, 0);
    assert!(envelope.has("OTA:SUC"));
    assert_eq!(envelope.downlinks, "OTA0002");
}

#[tokio::test]
async fn test_follow_up_marker_is_reported() {
    let mut engine = engine();
    engine.transport().respond("!CMD:RSP;CMD:RSP2");

    let outcome = engine.run_cycle().await;

    assert!(outcome.follow_up_requested());
    engine.run_cycle().await;
    let envelope = engine.transport().last();
    assert_eq!(envelope.urcs, vec!["RSP:OK", "RSP2:OK"]);
    assert_eq!(envelope.downlinks, "CMD:RSP,CMD:RSP2");
}

#[tokio::test]
async fn test_transport_failure_is_contained() {
    let mut engine = engine();
    engine
        .transport()
        .push(Err(TransportError::Timeout(Duration::from_secs(1))));
    engine.transport().push(Ok(TransportResponse::new(
        ResponseCode::INTERNAL_SERVER_ERROR,
        b"CMD:REBOOT".as_slice(),
    )));

    assert_eq!(engine.run_cycle().await, CycleOutcome::Failed);
    assert_eq!(engine.run_cycle().await, CycleOutcome::Failed);
    assert_eq!(engine.state().mem(), 2);

    // The rejected body was never dispatched.
    engine.run_cycle().await;
    let envelope = engine.transport().last();
    assert_eq!(envelope.mem, 2);
    assert!(!envelope.has("WDR"));
    assert_eq!(engine.state().mem(), 0);
    assert_eq!(engine.transport().sent_count(), 3);
}

#[tokio::test]
async fn test_invalid_cbor_mode() {
    let store = PskStore::new(IDENTITY, K0);
    let mut keys = PskService::new(PskRepository::open_in_memory().unwrap(), store.clone());
    keys.provision(K0, SECRET).unwrap();
    let config = EngineConfig {
        produce_valid_cbor: false,
        ..EngineConfig::default()
    };
    let mut engine = ProtocolEngine::new(ScriptedTransport::new(store), keys, config);

    engine.run_cycle().await;

    let sent = engine.transport().sent.lock().unwrap();
    assert_eq!(sent[0].payload, b"B36249441B000313".to_vec());
}

#[tokio::test]
async fn test_run_loop_keeps_sending() {
    let mut engine = engine();
    for _ in 0..3 {
        engine.transport().respond("!CMD:RSP");
    }

    // The loop never returns; stop it from outside once a few sends happened.
    let _ = tokio::time::timeout(Duration::from_millis(100), engine.run()).await;

    assert!(engine.transport().sent_count() >= 4);
}

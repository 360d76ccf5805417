//! Minimal CoAP (RFC 7252) message codec.
//!
//! Covers what a device posting telemetry needs: confirmable requests with
//! Uri-Path and Content-Format options, piggy-backed or separate responses,
//! empty ACKs and resets.

use crate::error::{TransportError, TransportResult};
use crate::transport::ResponseCode;

const VERSION: u8 = 1;
const PAYLOAD_MARKER: u8 = 0xff;
const MAX_TOKEN_LENGTH: usize = 8;

/// Option numbers used by the simulator.
pub const OPTION_URI_PATH: u16 = 11;
pub const OPTION_CONTENT_FORMAT: u16 = 12;

/// Content-Format for `application/cbor`.
pub const CONTENT_FORMAT_CBOR: u16 = 60;

/// POST request code (0.02).
pub const CODE_POST: u8 = 0x02;
/// Empty message code (0.00).
pub const CODE_EMPTY: u8 = 0x00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl MessageType {
    fn bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
    pub kind: MessageType,
    pub code: u8,
    pub message_id: u16,
    pub token: Vec<u8>,
    /// `(number, value)` pairs, kept sorted by number.
    pub options: Vec<(u16, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl CoapMessage {
    /// Confirmable POST carrying a CBOR body to `path`.
    pub fn post(message_id: u16, token: Vec<u8>, path: &[String], payload: Vec<u8>) -> Self {
        let mut options: Vec<(u16, Vec<u8>)> = path
            .iter()
            .map(|segment| (OPTION_URI_PATH, segment.as_bytes().to_vec()))
            .collect();
        options.push((OPTION_CONTENT_FORMAT, encode_uint(CONTENT_FORMAT_CBOR)));

        Self {
            kind: MessageType::Confirmable,
            code: CODE_POST,
            message_id,
            token,
            options,
            payload,
        }
    }

    /// Empty ACK for a confirmable message received from the peer.
    pub fn ack(message_id: u16) -> Self {
        Self {
            kind: MessageType::Acknowledgement,
            code: CODE_EMPTY,
            message_id,
            token: Vec::new(),
            options: Vec::new(),
            payload: Vec::new(),
        }
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode(self.code)
    }

    pub fn is_empty(&self) -> bool {
        self.code == CODE_EMPTY
    }

    pub fn option(&self, number: u16) -> impl Iterator<Item = &[u8]> {
        self.options
            .iter()
            .filter(move |(n, _)| *n == number)
            .map(|(_, value)| value.as_slice())
    }

    pub fn encode(&self) -> TransportResult<Vec<u8>> {
        if self.token.len() > MAX_TOKEN_LENGTH {
            return Err(TransportError::InvalidEndpoint(format!(
                "token longer than {MAX_TOKEN_LENGTH} bytes"
            )));
        }

        let mut out = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 32);
        out.push((VERSION << 6) | (self.kind.bits() << 4) | self.token.len() as u8);
        out.push(self.code);
        out.extend_from_slice(&self.message_id.to_be_bytes());
        out.extend_from_slice(&self.token);

        let mut options = self.options.clone();
        options.sort_by_key(|(number, _)| *number);
        let mut previous = 0u16;
        for (number, value) in &options {
            let (delta_nibble, delta_ext) = option_nibble(number - previous);
            let (length_nibble, length_ext) = option_nibble(value.len() as u16);
            out.push((delta_nibble << 4) | length_nibble);
            out.extend_from_slice(&delta_ext);
            out.extend_from_slice(&length_ext);
            out.extend_from_slice(value);
            previous = *number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> TransportResult<Self> {
        let malformed = |reason: &str| TransportError::MalformedResponse(reason.to_string());

        if bytes.len() < 4 {
            return Err(malformed("datagram shorter than header"));
        }
        if bytes[0] >> 6 != VERSION {
            return Err(malformed("unsupported version"));
        }
        let kind = MessageType::from_bits(bytes[0] >> 4);
        let token_length = (bytes[0] & 0x0f) as usize;
        if token_length > MAX_TOKEN_LENGTH {
            return Err(malformed("token length above 8"));
        }
        let code = bytes[1];
        let message_id = u16::from_be_bytes([bytes[2], bytes[3]]);

        let mut cursor = 4;
        let token = bytes
            .get(cursor..cursor + token_length)
            .ok_or_else(|| malformed("truncated token"))?
            .to_vec();
        cursor += token_length;

        let mut options = Vec::new();
        let mut number = 0u16;
        let mut payload = Vec::new();
        while let Some(&byte) = bytes.get(cursor) {
            cursor += 1;
            if byte == PAYLOAD_MARKER {
                payload = bytes[cursor..].to_vec();
                if payload.is_empty() {
                    return Err(malformed("payload marker without payload"));
                }
                break;
            }

            let delta = read_extended(byte >> 4, bytes, &mut cursor)
                .ok_or_else(|| malformed("invalid option delta"))?;
            let length = read_extended(byte & 0x0f, bytes, &mut cursor)
                .ok_or_else(|| malformed("invalid option length"))? as usize;
            number = number
                .checked_add(delta)
                .ok_or_else(|| malformed("option number overflow"))?;
            let value = bytes
                .get(cursor..cursor + length)
                .ok_or_else(|| malformed("truncated option value"))?;
            options.push((number, value.to_vec()));
            cursor += length;
        }

        Ok(Self {
            kind,
            code,
            message_id,
            token,
            options,
            payload,
        })
    }
}

/// Minimal big-endian encoding of an unsigned option value.
fn encode_uint(value: u16) -> Vec<u8> {
    match value {
        0 => Vec::new(),
        1..=0xff => vec![value as u8],
        _ => value.to_be_bytes().to_vec(),
    }
}

fn option_nibble(value: u16) -> (u8, Vec<u8>) {
    match value {
        0..=12 => (value as u8, Vec::new()),
        13..=268 => (13, vec![(value - 13) as u8]),
        _ => (14, (value - 269).to_be_bytes().to_vec()),
    }
}

fn read_extended(nibble: u8, bytes: &[u8], cursor: &mut usize) -> Option<u16> {
    match nibble {
        0..=12 => Some(nibble as u16),
        13 => {
            let value = *bytes.get(*cursor)? as u16 + 13;
            *cursor += 1;
            Some(value)
        }
        14 => {
            let raw = bytes.get(*cursor..*cursor + 2)?;
            *cursor += 2;
            u16::from_be_bytes([raw[0], raw[1]]).checked_add(269)
        }
        _ => None,
    }
}

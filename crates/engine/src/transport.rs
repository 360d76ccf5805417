//! Request/response boundary between the engine and the network.

use crate::error::TransportResult;
use std::fmt;
use std::future::Future;

/// CoAP-style response code, `class.detail` (e.g. 2.04).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const CHANGED: ResponseCode = ResponseCode::new(2, 4);
    pub const CONTENT: ResponseCode = ResponseCode::new(2, 5);
    pub const BAD_REQUEST: ResponseCode = ResponseCode::new(4, 0);
    pub const INTERNAL_SERVER_ERROR: ResponseCode = ResponseCode::new(5, 0);

    pub const fn new(class: u8, detail: u8) -> Self {
        ResponseCode((class << 5) | (detail & 0x1f))
    }

    pub fn class(&self) -> u8 {
        self.0 >> 5
    }

    pub fn detail(&self) -> u8 {
        self.0 & 0x1f
    }

    pub fn is_success(&self) -> bool {
        self.class() == 2
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub code: ResponseCode,
    pub payload: Vec<u8>,
}

impl TransportResponse {
    pub fn new(code: ResponseCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// Posts one encoded envelope and returns the platform's answer.
///
/// Implementations open a fresh secured session per call, keyed by the
/// current pre-shared key, and release it before returning.
pub trait Transport {
    fn send(&self, payload: &[u8]) -> impl Future<Output = TransportResult<TransportResponse>> + Send;
}

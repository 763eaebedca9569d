//! Record kinds carried through the bridge and their wire form.
//!
//! Every record is one [`Event`]. A slot payload holds exactly the bincode
//! encoding of one event, so the consumer decodes by variant tag without any
//! side table.

use crate::error::RecordError;
use serde::{Deserialize, Serialize};

/// Why an [`Event::Error`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A main-channel post found no room.
    Overflow,
    /// A producer rejected its input mid-construction.
    BadRecord,
    /// A multi-record response failed part way.
    ResponseFailed,
    /// Error code passed through from the upstream source.
    Upstream(u32),
}

/// Session state reported by [`Event::SessionStatusChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Disconnected,
    DisconnectedDuplicateLogin,
    Connected,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::DisconnectedDuplicateLogin => "disconnected (duplicate login)",
            Self::Connected => "connected",
        }
    }
}

/// A record handed from a producer to the consumer.
///
/// `request` identifies the request a response record belongs to; streaming
/// updates use `0`. `end` marks the final record of a multi-record response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Error {
        code: ErrorCode,
        message: String,
    },
    Success {
        request: u64,
        records: u32,
    },
    SessionStatusChange {
        session: u64,
        status: SessionStatus,
    },
    ResponseComplete {
        request: u64,
    },
    RequestTimeout {
        request: u64,
    },
    Trade {
        request: u64,
        symbol: String,
        price: f64,
        size: u32,
        time: u64,
        end: bool,
    },
    Quote {
        request: u64,
        symbol: String,
        bid: f64,
        ask: f64,
        bid_size: u32,
        ask_size: u32,
        time: u64,
        end: bool,
    },
    ServerTime {
        time: u64,
    },
}

impl Event {
    /// Stable kind name, as exposed to downstream consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error { .. } => "error",
            Self::Success { .. } => "success",
            Self::SessionStatusChange { .. } => "session-status-change",
            Self::ResponseComplete { .. } => "response-complete",
            Self::RequestTimeout { .. } => "request-timeout",
            Self::Trade { .. } => "trade",
            Self::Quote { .. } => "quote",
            Self::ServerTime { .. } => "server-time",
        }
    }

    /// Builds an error record.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Marks this record as the last one of its response.
    ///
    /// Only trades and quotes carry the flag; other kinds are left unchanged.
    pub fn mark_end(&mut self) {
        if let Self::Trade { end, .. } | Self::Quote { end, .. } = self {
            *end = true;
        }
    }

    /// Returns `true` for the final record of a multi-record response.
    pub fn is_end(&self) -> bool {
        matches!(self, Self::Trade { end: true, .. } | Self::Quote { end: true, .. })
    }

    /// Returns `true` for kinds that belong on the priority channel.
    pub fn is_priority(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Success { .. })
    }
}

/// Exact payload size of `event` once encoded.
pub fn encoded_len(event: &Event) -> Result<usize, RecordError> {
    Ok(bincode::serialized_size(event)? as usize)
}

/// Encodes `event` into the start of `buf`.
pub fn encode_into(event: &Event, buf: &mut [u8]) -> Result<(), RecordError> {
    bincode::serialize_into(buf, event)?;
    Ok(())
}

/// Decodes one event from a slot payload.
pub fn decode(payload: &[u8]) -> Result<Event, RecordError> {
    Ok(bincode::deserialize(payload)?)
}

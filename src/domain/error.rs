//! Error types surfaced by device operations.

use thiserror::Error;

/// Stage of an operation at which a wait ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Temperature,
    LearnHandshake,
    LearnStatus,
    LearnPacketCount,
    LearnHeader,
    LearnPayload,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Temperature => "temperature response",
            Self::LearnHandshake => "learn handshake",
            Self::LearnStatus => "learn status",
            Self::LearnPacketCount => "learn packet count",
            Self::LearnHeader => "learn header",
            Self::LearnPayload => "learn payload",
        };
        f.write_str(name)
    }
}

/// An inbound frame too short for the decoding rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("frame too short: need {needed} bytes, got {actual}")]
pub struct FrameError {
    pub needed: usize,
    pub actual: usize,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("can't connect to {address}")]
    Connect {
        address: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("can't discover profile")]
    Discover(#[source] anyhow::Error),

    #[error("can't subscribe to characteristic")]
    Subscribe(#[source] anyhow::Error),

    #[error("can't disconnect")]
    Disconnect(#[source] anyhow::Error),

    #[error("invalid IR data")]
    InvalidEncoding(#[from] hex::FromHexError),

    #[error("IR payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("malformed response frame")]
    MalformedFrame(#[from] FrameError),

    #[error("no {stage} within the operation timeout")]
    Timeout { stage: Stage },

    #[error("{failed_writes} command write(s) failed before the {stage} wait timed out")]
    CommandNotSent { stage: Stage, failed_writes: usize },

    #[error("subscription closed before a notification arrived")]
    SubscriptionClosed,

    #[error("device is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, DeviceError>;

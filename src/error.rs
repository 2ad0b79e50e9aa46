//! Top-level error kinds, grouped the way `spec.md` §7 describes them.
//!
//! Each component also defines its own narrower `thiserror` enum (e.g.
//! `handshake::HandshakeError`, `transport::TransportError`); this module's
//! `GatewayError` is the crate-wide union exposed at public API boundaries,
//! mirroring how the teacher crate layers `StreamError`/`ProfileError` under
//! a single `ClientError` in `sdk/client.rs`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(String),
    #[error("gmac verification failed")]
    GmacInvalid,
    #[error("key_pos gap: expected {expected}, got {actual}")]
    KeyPosGap { expected: u64, actual: u64 },
    #[error("transport timeout")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("unexpected state: {0}")]
    BadState(String),
    #[error("decode error: {0}")]
    DecodeError(String),
    #[error("handshake timeout")]
    Timeout,
    #[error("rejected by peer: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("bad key material")]
    BadKey,
    #[error("authentication tag mismatch")]
    BadTag,
    #[error("registration PIN rejected")]
    BadPin,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("frame {start}..{end} could not be reconstructed")]
    CorruptFrame { start: u32, end: u32 },
    #[error("no IDR received yet")]
    NoIdrYet,
    #[error("unknown codec: {0}")]
    CodecUnknown(String),
}

#[derive(Debug, Error)]
pub enum BackpressureError {
    #[error("queue full, frame dropped")]
    QueueFull,
    #[error("peer connection closed")]
    PeerClosed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid resolution {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("invalid bitrate: {0} kbps")]
    InvalidBitrate(u32),
}

/// Crate-wide error union surfaced at public API boundaries.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Backpressure(#[from] BackpressureError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("device not found")]
    DeviceNotFound,
    #[error("device not registered")]
    NotRegistered,
    #[error("session already active")]
    AlreadyActive,
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Coarse user-visible health surface (spec.md §7: "exposes only a coarse enum").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Warn,
    Frozen,
    Error(String),
}

//! Typed errors for the bridge boundaries.
//!
//! Every variant here is recoverable: the affected operation is logged and
//! skipped. The only fatal startup condition (failing to bind the OSC listen
//! port) is surfaced through `anyhow` in `main`.

use thiserror::Error;

/// Send or write failure on either protocol link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket send failed: {0}")]
    Socket(#[from] std::io::Error),

    #[error("OSC encode failed: {0}")]
    Encode(String),

    #[error("MIDI write failed: {0}")]
    Midi(String),
}

/// Pad controller not found or the MIDI handshake failed.
///
/// Non-fatal: the bridge keeps mirroring feedback and accepting console
/// commands, it just runs without the hardware surface.
#[derive(Debug, Error)]
pub enum DeviceInitError {
    #[error("no MIDI port matching '{0}'")]
    PortNotFound(String),

    #[error("MIDI init failed: {0}")]
    Midi(String),
}

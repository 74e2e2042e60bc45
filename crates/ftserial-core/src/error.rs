//! Error types for the MPSSE engine and the buses built on it

use thiserror::Error;

/// Recoverable failures of the MPSSE engine
///
/// Programming errors (zero-length writes, bit counts outside 1..=8,
/// out-of-range I2C addresses, reading a reply before it was flushed)
/// are not represented here; they panic.
#[derive(Debug, Error)]
pub enum MpsseError {
    /// The USB transport reported a failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A bulk-read chunk did not start with the modem-status sentinel
    #[error("Unfamiliar modem status in response: {0}")]
    BadModemStatus(String),

    /// A bulk-read chunk carried the sentinel but no status byte
    #[error("Expected at least one byte to follow modem status")]
    ShortChunk,

    /// Read retries ran out before every queued reply was collected
    #[error(
        "Failed to collect all expected replies: {outstanding} outstanding, \
         {leftover} unclaimed bytes [{dump}]"
    )]
    Desync {
        outstanding: usize,
        leftover: usize,
        dump: String,
    },

    /// A previous flush lost byte framing; the engine must be re-created
    #[error("MPSSE engine is desynchronized from the device and must be re-initialized")]
    Desynchronized,

    /// The bogus-opcode probe did not come back as a "bad command" echo
    #[error("Expected \"bad opcode\" reply {expected}, got {got}")]
    ModeProbe { expected: String, got: String },

    /// An I2C target did not acknowledge a byte
    #[error("Failed to get ACK writing byte 0x{byte:02X}")]
    Nack { byte: u8 },

    /// Invalid configuration value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl MpsseError {
    /// Whether this is an I2C NACK rather than a transport or framing failure
    pub fn is_nack(&self) -> bool {
        matches!(self, MpsseError::Nack { .. })
    }
}

/// Result type for MPSSE operations
pub type Result<T> = std::result::Result<T, MpsseError>;

//! Error types for the USB transport

use ftserial_core::MpsseError;
use thiserror::Error;

/// Result type for USB transport operations
pub type Result<T> = std::result::Result<T, UsbError>;

/// Errors that can occur opening or talking to an FTDI adapter
#[derive(Debug, Error)]
pub enum UsbError {
    /// No matching FTDI device found
    #[error("No FTDI device found{0}")]
    DeviceNotFound(String),

    /// Failed to open device
    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    /// Failed to claim USB interface
    #[error("Failed to claim interface: {0}")]
    ClaimFailed(String),

    /// USB transfer failed
    #[error("USB transfer failed: {0}")]
    TransferFailed(String),

    /// Invalid device type
    #[error("Invalid device type: {0}")]
    InvalidDeviceType(String),

    /// Invalid channel/port specification
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// USB enumeration error
    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),
}

impl From<UsbError> for MpsseError {
    fn from(e: UsbError) -> Self {
        match e {
            UsbError::InvalidDeviceType(s)
            | UsbError::InvalidChannel(s)
            | UsbError::InvalidParameter(s) => MpsseError::InvalidParameter(s),
            other => MpsseError::Transport(other.to_string()),
        }
    }
}

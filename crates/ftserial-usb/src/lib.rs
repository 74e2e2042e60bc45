//! ftserial-usb - USB transport for FTDI MPSSE adapters
//!
//! Implements [`ftserial_core::Transport`] on top of `nusb` for the FTDI
//! 'H' parts with an MPSSE:
//!
//! - FTDI FT232H (single channel)
//! - FTDI FT2232H (dual channel)
//! - FTDI FT4232H / FT4233H (quad channel, MPSSE on A and B)
//!
//! # Example
//!
//! ```no_run
//! use ftserial_core::{I2cBus, I2cConfig, MpsseConfig};
//! use ftserial_usb::{FtdiInterface, UsbConfig, UsbTransport};
//!
//! let usb = UsbTransport::open(&UsbConfig::new().interface(FtdiInterface::A))?;
//! let bus = I2cBus::new(usb, &MpsseConfig::default(), &I2cConfig::default())?;
//! for address in bus.scan()? {
//!     println!("0x{:02x}", address);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Programmer Options
//!
//! - `type=<device>` - Device type (232h, 2232h, 4232h, 4233h; default: any)
//! - `port=<A|B|C|D>` - Channel to use (default: A)
//! - `serial=<string>` - USB serial number filter
//! - `index=<n>` - Open the nth matching device (default: 0)
//! - `timeout=<ms>` - Transfer timeout (default: 5000)

mod device;
mod error;
mod protocol;

pub use device::{FtdiDeviceInfo, UsbConfig, UsbTransport, DEFAULT_TIMEOUT};
pub use error::{Result, UsbError};
pub use protocol::{FtdiDeviceType, FtdiInterface};

//! ftserial-core - FTDI MPSSE command engine and serial buses
//!
//! This crate drives the Multi-Protocol Synchronous Serial Engine found in
//! FTDI 'H' parts (FT232H, FT2232H, FT4232H, FT4233H). Commands are queued
//! into a pending batch and sent with a single bulk write on flush; the
//! replies of reply-bearing commands come back as [`Reply`] slots filled in
//! queue order.
//!
//! On top of the engine:
//!
//! - [`I2cBus`] / [`I2cDevice`] - I2C master (fast mode, no clock stretching)
//! - [`Spi`] - write-only SPI master (mode 0)
//! - [`Gpio`] - ADBUS/ACBUS pin banks
//!
//! The USB side is abstracted behind [`Transport`]; `ftserial-usb` provides
//! the real adapter and [`dummy::DummyMpsse`] emulates one in memory.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ftserial_core::dummy::DummyMpsse;
//! use ftserial_core::{I2cBus, I2cConfig, I2cDevice, MpsseConfig};
//!
//! let adapter = DummyMpsse::new();
//! let bus = I2cBus::new(adapter, &MpsseConfig::default(), &I2cConfig::default())?;
//! let eeprom = I2cDevice::new(Arc::new(bus), 0x50);
//! let data = eeprom.read_register(0x00, 4)?;
//! assert_eq!(data.len(), 4);
//! # Ok::<(), ftserial_core::MpsseError>(())
//! ```
//!
//! # Programmer Options
//!
//! - `latency=<ms>` - USB latency timer (1-255, default: 16)
//! - `frequency=<hz>` - Bus clock (I2C: capped at 400000; SPI default: 1000000)
//! - `hold=<n>` - I2C hold-delay repetitions (default: 4)
//! - `mode=0` - SPI mode
//! - `adbus=<mask>` / `acbus=<mask>` - GPIO output masks (hex)
//!
//! # Clock Speed
//!
//! ```text
//! f = 60 MHz / (edges * (divisor + 1))    edges = 3 with 3-phase clocking, else 2
//! ```

pub mod dummy;
mod error;
mod gpio;
mod i2c;
mod i2c_device;
mod mpsse;
pub mod protocol;
mod reply;
mod spi;
mod transport;

pub use error::{MpsseError, Result};
pub use gpio::{Gpio, GpioConfig};
pub use i2c::{
    control_byte, BusState, Conversation, Direction, I2cBus, I2cConfig, I2cMode, TristateOutput,
    SCAN_FIRST_ADDRESS, SCAN_LAST_ADDRESS,
};
pub use i2c_device::I2cDevice;
pub use mpsse::{Mpsse, MpsseConfig};
pub use protocol::{BitMode, BitOrder, DataWindow, GpioBank, Opcode, VendorRequest};
pub use reply::{Reply, Validator};
pub use spi::{Spi, SpiConfig, SpiMode, DEFAULT_SPI_FREQUENCY_HZ};
pub use transport::Transport;

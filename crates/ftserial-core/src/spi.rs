//! Write-only SPI master
//!
//! Clocks bytes out of TDI/DO on ADBUS1 with SCK on ADBUS0. Chip select is
//! left to the caller (for example through [`crate::Gpio`]).

use crate::error::{MpsseError, Result};
use crate::mpsse::{Mpsse, MpsseConfig};
use crate::protocol::{BitOrder, DataWindow, GpioBank, SerialPins, MAX_BYTES_PER_COMMAND};
use crate::transport::Transport;

/// Default SCK frequency
pub const DEFAULT_SPI_FREQUENCY_HZ: u32 = 1_000_000;

/// SPI clock polarity/phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpiMode {
    /// CPOL=0, CPHA=0: clock idles low, data changes on the falling edge
    #[default]
    Mode0,
}

impl SpiMode {
    /// Edge on which output data is changed
    pub fn write_window(self) -> DataWindow {
        match self {
            SpiMode::Mode0 => DataWindow::FallingEdge,
        }
    }

    /// ADBUS levels while no transfer is running
    pub fn idle_pins(self) -> u8 {
        match self {
            SpiMode::Mode0 => 0x00,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "0" | "mode0" => Some(SpiMode::Mode0),
            _ => None,
        }
    }
}

/// SPI configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiConfig {
    pub frequency_hz: u32,
    pub mode: SpiMode,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            frequency_hz: DEFAULT_SPI_FREQUENCY_HZ,
            mode: SpiMode::Mode0,
        }
    }
}

impl SpiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frequency_hz(mut self, frequency_hz: u32) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    /// Apply one `key=value` programmer option
    ///
    /// - `frequency=<hz>`: SCK frequency (default: 1000000)
    /// - `mode=0`: SPI mode; only mode 0 is supported
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "frequency" => {
                let hz: u32 = value.parse().map_err(|_| {
                    MpsseError::InvalidParameter(format!("Invalid frequency value: {}", value))
                })?;
                if hz == 0 {
                    return Err(MpsseError::InvalidParameter(
                        "frequency must be non-zero".into(),
                    ));
                }
                self.frequency_hz = hz;
            }
            "mode" => {
                self.mode = SpiMode::parse(value).ok_or_else(|| {
                    MpsseError::InvalidParameter(format!(
                        "Invalid SPI mode: {} (only mode 0 is supported)",
                        value
                    ))
                })?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// SPI master owning its MPSSE engine
pub struct Spi<T: Transport> {
    engine: Mpsse<T>,
    config: SpiConfig,
}

impl<T: Transport> Spi<T> {
    /// Open the engine on `transport` and configure it for SPI
    pub fn new(transport: T, mpsse: &MpsseConfig, config: &SpiConfig) -> Result<Self> {
        let engine = Mpsse::new(transport, mpsse)?;
        Self::with_engine(engine, config)
    }

    /// Configure an already-open engine for SPI
    ///
    /// 2-phase clocking at the configured frequency, SCK and DO driven to
    /// their idle levels.
    pub fn with_engine(engine: Mpsse<T>, config: &SpiConfig) -> Result<Self> {
        let divisor = engine.configure_clocking(config.frequency_hz, false);
        engine.queue_data_bits(
            config.mode.idle_pins(),
            SerialPins::OUTPUTS.bits(),
            GpioBank::Adbus,
        );
        engine.flush()?;
        log::info!(
            "SPI configured: {} Hz requested, divisor {}",
            config.frequency_hz,
            divisor
        );
        Ok(Self {
            engine,
            config: config.clone(),
        })
    }

    pub fn engine(&self) -> &Mpsse<T> {
        &self.engine
    }

    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    /// Clock `data` out MSB first and flush
    ///
    /// Payloads longer than one command allows are split across several
    /// byte-write commands in the same batch. Nothing is read back.
    ///
    /// # Panics
    ///
    /// Panics if `data` is empty.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        assert!(!data.is_empty(), "write must send minimum of one byte");
        let window = self.config.mode.write_window();
        for chunk in data.chunks(MAX_BYTES_PER_COMMAND) {
            self.engine
                .write_bytes_with_clock(chunk, window, BitOrder::Msb);
        }
        self.engine.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::DummyMpsse;
    use crate::protocol::Opcode;

    fn spi(dummy: &DummyMpsse) -> Spi<DummyMpsse> {
        Spi::new(dummy.clone(), &MpsseConfig::default(), &SpiConfig::default()).unwrap()
    }

    #[test]
    fn test_configuration() {
        let dummy = DummyMpsse::new();
        let _spi = spi(&dummy);
        assert_eq!(dummy.divisor(), Some(29));
        assert!(!dummy.three_phase());
        let pins = dummy.pins(GpioBank::Adbus);
        assert_eq!((pins.value, pins.direction), (0x00, 0x03));
    }

    #[test]
    fn test_write_encoding() {
        let dummy = DummyMpsse::new();
        let spi = spi(&dummy);
        dummy.clear_commands();
        spi.write(&[0xDE, 0xAD]).unwrap();
        let commands = dummy.commands();
        assert!(commands[0].is(Opcode::WriteBytesFallingMsb, &[0x01, 0x00, 0xDE, 0xAD]));
    }

    #[test]
    fn test_long_write_is_chunked() {
        let dummy = DummyMpsse::new();
        let spi = spi(&dummy);
        dummy.clear_commands();
        let writes = dummy.bulk_writes();
        spi.write(&vec![0x5A; MAX_BYTES_PER_COMMAND + 10]).unwrap();
        assert_eq!(dummy.bulk_writes() - writes, 1);

        let lengths: Vec<usize> = dummy
            .commands()
            .iter()
            .filter(|c| c.opcode == Opcode::WriteBytesFallingMsb.value())
            .map(|c| usize::from(u16::from_le_bytes([c.args[0], c.args[1]])) + 1)
            .collect();
        assert_eq!(lengths, vec![MAX_BYTES_PER_COMMAND, 10]);
    }

    #[test]
    #[should_panic(expected = "minimum of one byte")]
    fn test_empty_write_panics() {
        let dummy = DummyMpsse::new();
        spi(&dummy).write(&[]).unwrap();
    }

    #[test]
    fn test_options() {
        let mut config = SpiConfig::default();
        assert!(config.apply_option("frequency", "6000000").unwrap());
        assert_eq!(config.frequency_hz, 6_000_000);
        assert!(config.apply_option("mode", "0").unwrap());
        assert!(config.apply_option("mode", "3").is_err());
        assert!(!config.apply_option("hold", "4").unwrap());
    }
}

//! GPIO access to the ADBUS and ACBUS pin banks
//!
//! The adapter can only set a whole bank at once, so output values and
//! directions are cached per bank and single-pin writes are composed from
//! the cache.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{MpsseError, Result};
use crate::mpsse::{Mpsse, MpsseConfig};
use crate::protocol::GpioBank;
use crate::transport::Transport;

/// Output directions for both banks (1 = output)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpioConfig {
    pub adbus_outputs: u8,
    pub acbus_outputs: u8,
}

impl GpioConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a 16-bit mask: ADBUS in the low byte, ACBUS in the high byte
    pub fn from_pin_mask(mask: u16) -> Self {
        let [adbus_outputs, acbus_outputs] = mask.to_le_bytes();
        Self {
            adbus_outputs,
            acbus_outputs,
        }
    }

    pub fn outputs(&self, bank: GpioBank) -> u8 {
        match bank {
            GpioBank::Adbus => self.adbus_outputs,
            GpioBank::Acbus => self.acbus_outputs,
        }
    }

    /// Apply one `key=value` programmer option
    ///
    /// - `adbus=<mask>`: ADBUS output mask, hex with optional 0x prefix
    /// - `acbus=<mask>`: ACBUS output mask
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<bool> {
        let bank = match key {
            "adbus" => &mut self.adbus_outputs,
            "acbus" => &mut self.acbus_outputs,
            _ => return Ok(false),
        };
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        *bank = u8::from_str_radix(digits, 16).map_err(|_| {
            MpsseError::InvalidParameter(format!("Invalid {} mask: {}", key, value))
        })?;
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BankState {
    values: u8,
    outputs: u8,
}

/// GPIO manager owning its MPSSE engine
pub struct Gpio<T: Transport> {
    engine: Mpsse<T>,
    banks: Mutex<[BankState; 2]>,
}

impl<T: Transport> Gpio<T> {
    /// Open the engine and drive every configured output low
    pub fn new(transport: T, mpsse: &MpsseConfig, config: &GpioConfig) -> Result<Self> {
        let mpsse = mpsse.clone().with_output_pins(config.adbus_outputs);
        let engine = Mpsse::new(transport, &mpsse)?;
        Self::with_engine(engine, config)
    }

    pub fn with_engine(engine: Mpsse<T>, config: &GpioConfig) -> Result<Self> {
        let mut banks = [BankState::default(); 2];
        for bank in [GpioBank::Adbus, GpioBank::Acbus] {
            let state = &mut banks[bank.index()];
            state.outputs = config.outputs(bank);
            engine.queue_data_bits(state.values, state.outputs, bank);
        }
        engine.flush()?;
        log::info!(
            "GPIO configured: ADBUS outputs 0x{:02x}, ACBUS outputs 0x{:02x}",
            config.adbus_outputs,
            config.acbus_outputs
        );
        Ok(Self {
            engine,
            banks: Mutex::new(banks),
        })
    }

    pub fn engine(&self) -> &Mpsse<T> {
        &self.engine
    }

    fn banks(&self) -> MutexGuard<'_, [BankState; 2]> {
        self.banks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set every output of `bank` and flush
    ///
    /// Bits for pins configured as inputs are ignored by the adapter.
    pub fn set_pins(&self, bank: GpioBank, values: u8) -> Result<()> {
        let mut banks = self.banks();
        let state = &mut banks[bank.index()];
        state.values = values;
        self.engine.queue_data_bits(values, state.outputs, bank);
        drop(banks);
        self.engine.flush()
    }

    /// Read the current levels of every pin of `bank`
    pub fn read_pins(&self, bank: GpioBank) -> Result<u8> {
        let reply = self.engine.query_data_bits(bank);
        self.engine.flush()?;
        Ok(reply.byte())
    }

    /// Drive one output pin, leaving the other pins of the bank unchanged
    ///
    /// # Panics
    ///
    /// Panics if `index` is not 0-7 or the pin is not configured as an
    /// output.
    pub fn write_pin(&self, bank: GpioBank, index: u8, high: bool) -> Result<()> {
        assert!(index < 8, "GPIO pin index out of range: {}", index);
        let mask = 1u8 << index;
        let values = {
            let banks = self.banks();
            let state = banks[bank.index()];
            assert!(
                state.outputs & mask != 0,
                "{} pin {} is not configured as an output",
                bank.name(),
                index
            );
            if high {
                state.values | mask
            } else {
                state.values & !mask
            }
        };
        self.set_pins(bank, values)
    }

    /// Cached output values of `bank`
    pub fn values(&self, bank: GpioBank) -> u8 {
        self.banks()[bank.index()].values
    }

    /// Output mask of `bank`
    pub fn outputs(&self, bank: GpioBank) -> u8 {
        self.banks()[bank.index()].outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{DummyMpsse, PinBank};

    fn gpio(dummy: &DummyMpsse) -> Gpio<DummyMpsse> {
        let config = GpioConfig::from_pin_mask(0xF0FF);
        Gpio::new(dummy.clone(), &MpsseConfig::default(), &config).unwrap()
    }

    #[test]
    fn test_configuration() {
        let dummy = DummyMpsse::new();
        let _gpio = gpio(&dummy);
        assert_eq!(
            dummy.pins(GpioBank::Adbus),
            PinBank {
                value: 0x00,
                direction: 0xFF
            }
        );
        assert_eq!(dummy.pins(GpioBank::Acbus).direction, 0xF0);
    }

    #[test]
    fn test_bank_isolation() {
        let dummy = DummyMpsse::new();
        let gpio = gpio(&dummy);

        gpio.set_pins(GpioBank::Acbus, 0xA0).unwrap();
        assert_eq!(gpio.values(GpioBank::Adbus), 0x00);
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x00);

        gpio.set_pins(GpioBank::Adbus, 0x5A).unwrap();
        assert_eq!(gpio.values(GpioBank::Acbus), 0xA0);
        assert_eq!(dummy.pins(GpioBank::Acbus).value, 0xA0);

        gpio.set_pins(GpioBank::Acbus, 0x30).unwrap();
        assert_eq!(gpio.values(GpioBank::Adbus), 0x5A);
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x5A);
        assert_eq!(dummy.pins(GpioBank::Acbus).value, 0x30);
    }

    #[test]
    fn test_write_pin_keeps_other_pins() {
        let dummy = DummyMpsse::new();
        let gpio = gpio(&dummy);
        gpio.set_pins(GpioBank::Adbus, 0x81).unwrap();
        gpio.write_pin(GpioBank::Adbus, 4, true).unwrap();
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x91);
        gpio.write_pin(GpioBank::Adbus, 0, false).unwrap();
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x90);
    }

    #[test]
    #[should_panic(expected = "not configured as an output")]
    fn test_write_input_pin_panics() {
        let dummy = DummyMpsse::new();
        gpio(&dummy).write_pin(GpioBank::Acbus, 0, true).unwrap();
    }

    #[test]
    fn test_read_pins_mixes_inputs() {
        let dummy = DummyMpsse::new();
        let gpio = gpio(&dummy);
        dummy.set_inputs(GpioBank::Acbus, 0x0F);
        gpio.set_pins(GpioBank::Acbus, 0x50).unwrap();
        assert_eq!(gpio.read_pins(GpioBank::Acbus).unwrap(), 0x5F);
    }

    #[test]
    fn test_options() {
        let mut config = GpioConfig::default();
        assert!(config.apply_option("adbus", "0xfb").unwrap());
        assert!(config.apply_option("acbus", "0F").unwrap());
        assert_eq!(config, GpioConfig::from_pin_mask(0x0FFB));
        assert!(config.apply_option("acbus", "zz").is_err());
        assert!(!config.apply_option("frequency", "1").unwrap());
    }
}

//! GPIO command implementations

use ftserial_core::{Gpio, GpioBank};

use crate::programmers::{BoxedTransport, ProgrammerOptions};

/// Drive a bank, or one pin of it
///
/// A bank with no outputs in the programmer options is made all-output.
pub fn run_set(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
    bank: GpioBank,
    value: u8,
    pin: Option<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = options.gpio;
    if config.outputs(bank) == 0 {
        log::info!("No outputs configured for {}, using 0xFF", bank.name());
        match bank {
            GpioBank::Adbus => config.adbus_outputs = 0xFF,
            GpioBank::Acbus => config.acbus_outputs = 0xFF,
        }
    }

    let gpio = Gpio::new(transport, &options.mpsse, &config)?;
    match pin {
        Some(index) => {
            if value > 1 {
                return Err("--value must be 0 or 1 with --pin".into());
            }
            if config.outputs(bank) & (1 << index) == 0 {
                return Err(format!("{} pin {} is not an output", bank.name(), index).into());
            }
            gpio.write_pin(bank, index, value == 1)?;
        }
        None => gpio.set_pins(bank, value)?,
    }

    println!(
        "{} = 0x{:02X} (outputs 0x{:02X})",
        bank.name(),
        gpio.values(bank),
        gpio.outputs(bank)
    );
    Ok(())
}

/// Print the levels of a bank
pub fn run_get(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
    bank: GpioBank,
) -> Result<(), Box<dyn std::error::Error>> {
    let gpio = Gpio::new(transport, &options.mpsse, &options.gpio)?;
    let levels = gpio.read_pins(bank)?;
    println!("{} = 0x{:02X} ({:08b})", bank.name(), levels, levels);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programmers::open_programmer;

    #[test]
    fn test_set_pin_rejects_input() {
        let (transport, options) = open_programmer("dummy:acbus=0x01").unwrap();
        assert!(run_set(transport, &options, GpioBank::Acbus, 1, Some(3)).is_err());
    }

    #[test]
    fn test_set_bank() {
        let (transport, options) = open_programmer("dummy").unwrap();
        run_set(transport, &options, GpioBank::Acbus, 0xA5, None).unwrap();
    }
}

//! Probe command implementation

use ftserial_core::protocol::{clock_divisor, divisor_frequency, INTERNAL_CLOCK_HZ};
use ftserial_core::{GpioBank, Mpsse};

use crate::programmers::{BoxedTransport, ProgrammerOptions};

/// Open the engine, which runs the mode-confirmation handshake, then
/// report both pin banks
pub fn run_probe(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Mpsse::new(transport, &options.mpsse)?;
    println!("MPSSE engine responding (latency timer {} ms)", options.mpsse.latency_ms);

    let adbus = engine.query_data_bits(GpioBank::Adbus);
    let acbus = engine.query_data_bits(GpioBank::Acbus);
    engine.flush()?;

    println!("  {}: 0x{:02X} ({:08b})", GpioBank::Adbus.name(), adbus.byte(), adbus.byte());
    println!("  {}: 0x{:02X} ({:08b})", GpioBank::Acbus.name(), acbus.byte(), acbus.byte());

    let i2c_hz = options.i2c.effective_clock_hz();
    println!(
        "I2C clock {} Hz requested, {} Hz effective",
        i2c_hz,
        effective(i2c_hz, true)
    );
    println!(
        "SPI clock {} Hz requested, {} Hz effective",
        options.spi.frequency_hz,
        effective(options.spi.frequency_hz, false)
    );
    Ok(())
}

/// Clock actually produced for a requested frequency
fn effective(frequency_hz: u32, three_phase: bool) -> u32 {
    let divisor = clock_divisor(INTERNAL_CLOCK_HZ, frequency_hz, three_phase);
    divisor_frequency(INTERNAL_CLOCK_HZ, divisor, three_phase)
}

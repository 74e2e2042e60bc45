//! I2C command implementations

use std::sync::Arc;

use ftserial_core::{I2cBus, I2cDevice, SCAN_FIRST_ADDRESS, SCAN_LAST_ADDRESS};

use crate::programmers::{BoxedTransport, ProgrammerOptions};

fn open_bus(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
) -> Result<Arc<I2cBus<BoxedTransport>>, Box<dyn std::error::Error>> {
    Ok(Arc::new(I2cBus::new(transport, &options.mpsse, &options.i2c)?))
}

/// Print an i2cdetect-style map of acknowledging addresses
pub fn run_scan(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = open_bus(transport, options)?;
    let found = bus.scan()?;
    print!("{}", format_scan(&found));
    println!("{} device(s) found", found.len());
    Ok(())
}

/// Render scan results as a 16-column grid; reserved addresses stay blank
pub fn format_scan(found: &[u8]) -> String {
    let mut out = String::from("     0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f\n");
    for row in (0u8..0x80).step_by(16) {
        out.push_str(&format!("{:02x}:", row));
        for address in row..row + 16 {
            let cell = if !(SCAN_FIRST_ADDRESS..=SCAN_LAST_ADDRESS).contains(&address) {
                "   ".to_string()
            } else if found.contains(&address) {
                format!(" {:02x}", address)
            } else {
                " --".to_string()
            };
            out.push_str(&cell);
        }
        out.push('\n');
    }
    out
}

/// Read bytes from a target, optionally starting at a register
pub fn run_read(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
    address: u8,
    length: usize,
    register: Option<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    if length == 0 {
        return Err("read length must be at least 1".into());
    }
    let device = I2cDevice::new(open_bus(transport, options)?, address);
    let data = match register {
        Some(register) => device.read_register(register, length)?,
        None => device.read(length)?,
    };
    print_bytes(&data);
    Ok(())
}

/// Write bytes to a target
pub fn run_write(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
    address: u8,
    data: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let device = I2cDevice::new(open_bus(transport, options)?, address);
    device.write(data)?;
    println!("Wrote {} byte(s) to 0x{:02x}", data.len(), address);
    Ok(())
}

/// Write bytes, then read after a repeated start
pub fn run_write_read(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
    address: u8,
    data: &[u8],
    length: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if length == 0 {
        return Err("read length must be at least 1".into());
    }
    let device = I2cDevice::new(open_bus(transport, options)?, address);
    let response = device.write_and_read(data, length)?;
    print_bytes(&response);
    Ok(())
}

fn print_bytes(data: &[u8]) {
    let hex: Vec<String> = data.iter().map(|b| format!("0x{:02x}", b)).collect();
    println!("{}", hex.join(" "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::programmers::open_programmer;

    #[test]
    fn test_format_scan() {
        let grid = format_scan(&[0x08, 0x50]);
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[1], format!("00:{}{}", "   ".repeat(8), " 08 -- -- -- -- -- -- --"));
        assert!(lines[6].starts_with("50: 50 --"));
        assert!(lines[8].ends_with(&format!(" --{}", "   ".repeat(8))));
    }

    #[test]
    fn test_read_on_emulator() {
        let (transport, options) = open_programmer("dummy").unwrap();
        run_read(transport, &options, 0x50, 4, Some(0x00)).unwrap();
    }
}

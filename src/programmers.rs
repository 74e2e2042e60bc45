//! Programmer registration and dispatch
//!
//! A programmer string names the adapter backend and carries `key=value`
//! options for every layer: USB selection, engine setup and the bus
//! configuration of the command being run.

use ftserial_core::dummy::DummyMpsse;
use ftserial_core::{GpioConfig, I2cConfig, MpsseConfig, SpiConfig, Transport};

/// Transport chosen at runtime
pub type BoxedTransport = Box<dyn Transport + Send>;

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available programmers (enabled at compile time)
#[allow(clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &["emulator"],
        description: "In-memory MPSSE emulator for testing (chunk=<bytes>)",
    });

    #[cfg(feature = "usb")]
    programmers.push(ProgrammerInfo {
        name: "ftdi",
        aliases: &["ft232h", "ft2232h", "ft4232h", "ft4233h"],
        description: "FTDI MPSSE adapter (type=<dev>,port=<A-D>,serial=<sn>,index=<n>)",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let mut help = String::from("Available programmers:\n");
    for p in available_programmers() {
        help.push_str(&format!("  {:8} - {}\n", p.name, p.description));
        if !p.aliases.is_empty() {
            help.push_str(&format!("  {:8}   aliases: {}\n", "", p.aliases.join(", ")));
        }
    }
    help.push_str(
        "\nCommon options: latency=<ms>, frequency=<hz>, hold=<n>, mode=0, \
         adbus=<mask>, acbus=<mask>\n",
    );
    help
}

/// Resolve a programmer name or alias
pub fn find_programmer(name: &str) -> Option<&'static str> {
    available_programmers()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name))
        .map(|p| p.name)
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

/// Configuration of every layer, filled from programmer options
#[derive(Debug, Clone, Default)]
pub struct ProgrammerOptions {
    #[cfg(feature = "usb")]
    pub usb: ftserial_usb::UsbConfig,
    pub mpsse: MpsseConfig,
    pub i2c: I2cConfig,
    pub spi: SpiConfig,
    pub gpio: GpioConfig,
    /// Reply payload per bulk read of the emulator
    pub chunk_size: Option<usize>,
}

/// Route `key=value` options to the layer(s) that understand them
///
/// A key may configure more than one layer (`frequency` sets both the I2C
/// and the SPI clock). Unknown keys are ignored with a warning.
pub fn parse_options(
    options: &[(&str, &str)],
) -> Result<ProgrammerOptions, Box<dyn std::error::Error>> {
    let mut parsed = ProgrammerOptions::default();

    for &(key, value) in options {
        let mut known = false;
        known |= parsed.mpsse.apply_option(key, value)?;
        known |= parsed.i2c.apply_option(key, value)?;
        known |= parsed.spi.apply_option(key, value)?;
        known |= parsed.gpio.apply_option(key, value)?;
        #[cfg(feature = "usb")]
        {
            known |= parsed.usb.apply_option(key, value)?;
        }
        if key == "chunk" {
            let size: usize = value
                .parse()
                .map_err(|_| format!("Invalid chunk size '{}'", value))?;
            if size == 0 {
                return Err("chunk size must be non-zero".into());
            }
            parsed.chunk_size = Some(size);
            known = true;
        }
        if !known {
            log::warn!("Unknown programmer option: {}={}", key, value);
        }
    }

    Ok(parsed)
}

/// Open the transport named by a programmer string
pub fn open_programmer(
    programmer: &str,
) -> Result<(BoxedTransport, ProgrammerOptions), Box<dyn std::error::Error>> {
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = find_programmer(name).ok_or_else(|| unknown_programmer_error(name))?;

    #[cfg_attr(not(feature = "usb"), allow(unused_mut))]
    let mut options = parse_options(&options)?;

    match canonical_name {
        "dummy" => {
            log::info!("Opening MPSSE emulator...");
            let dummy = DummyMpsse::new();
            if let Some(size) = options.chunk_size {
                dummy.set_chunk_size(size);
            }
            Ok((Box::new(dummy), options))
        }

        #[cfg(feature = "usb")]
        "ftdi" => {
            use ftserial_usb::{FtdiDeviceType, UsbTransport};

            // An alias naming the part doubles as a type filter
            if options.usb.device_type.is_none() {
                options.usb.device_type = FtdiDeviceType::parse(name);
            }

            log::info!("Opening FTDI adapter...");
            let transport = UsbTransport::open(&options.usb).map_err(|e| {
                format!(
                    "Failed to open FTDI device: {}\n\
                     Make sure the device is connected and you have permissions.",
                    e
                )
            })?;
            Ok((Box::new(transport), options))
        }

        _ => Err(unknown_programmer_error(name)),
    }
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.push_str("\nUse 'ftserial list' for more details");
    msg.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_programmer_string() {
        assert_eq!(parse_programmer_string("dummy"), ("dummy", vec![]));
        assert_eq!(
            parse_programmer_string("ftdi:type=2232h,port=B"),
            ("ftdi", vec![("type", "2232h"), ("port", "B")])
        );
        // Entries without '=' are dropped
        assert_eq!(
            parse_programmer_string("ftdi:verbose,hold=8"),
            ("ftdi", vec![("hold", "8")])
        );
    }

    #[test]
    fn test_options_reach_every_layer() {
        let options = parse_options(&[
            ("latency", "2"),
            ("frequency", "100000"),
            ("hold", "6"),
            ("acbus", "0x0f"),
            ("chunk", "3"),
            ("bogus", "1"),
        ])
        .unwrap();
        assert_eq!(options.mpsse.latency_ms, 2);
        assert_eq!(options.i2c.effective_clock_hz(), 100_000);
        assert_eq!(options.spi.frequency_hz, 100_000);
        assert_eq!(options.i2c.effective_hold_repetitions(), 6);
        assert_eq!(options.gpio.acbus_outputs, 0x0F);
        assert_eq!(options.chunk_size, Some(3));
    }

    #[test]
    fn test_malformed_option_is_an_error() {
        assert!(parse_options(&[("latency", "fast")]).is_err());
        assert!(parse_options(&[("chunk", "0")]).is_err());
    }

    #[test]
    fn test_find_programmer() {
        assert_eq!(find_programmer("dummy"), Some("dummy"));
        assert_eq!(find_programmer("emulator"), Some("dummy"));
        assert_eq!(find_programmer("ch341a"), None);
    }

    #[test]
    fn test_open_dummy() {
        let (_transport, options) = open_programmer("dummy:chunk=4").unwrap();
        assert_eq!(options.chunk_size, Some(4));
        assert!(open_programmer("nonexistent").is_err());
    }
}

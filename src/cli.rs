//! CLI argument parsing

use clap::{Parser, Subcommand};
use ftserial_core::GpioBank;
use std::path::PathBuf;

const PROGRAMMER_HELP: &str = "Programmer to use, as name[:key=value,...] (e.g. ftdi:type=2232h,port=B,frequency=100000 or dummy)";

/// Parse a string as a hex (0x prefix) or decimal u8
pub fn parse_hex_u8(s: &str) -> Result<u8, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u8>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a 7-bit I2C address
fn parse_address(s: &str) -> Result<u8, String> {
    let address = parse_hex_u8(s)?;
    if address >= 0x80 {
        return Err(format!(
            "I2C address 0x{:02x} does not fit in 7 bits",
            address
        ));
    }
    Ok(address)
}

fn parse_bank(s: &str) -> Result<GpioBank, String> {
    GpioBank::parse(s).ok_or_else(|| format!("Unknown bank '{}' (use adbus or acbus)", s))
}

#[derive(Parser)]
#[command(name = "ftserial")]
#[command(author, version, about = "I2C, SPI and GPIO through FTDI MPSSE adapters", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List programmers and attached FTDI adapters
    List,

    /// Open the adapter, confirm MPSSE mode and show pin levels
    Probe {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,
    },

    /// I2C bus operations
    #[command(subcommand)]
    I2c(I2cCommands),

    /// SPI bus operations
    #[command(subcommand)]
    Spi(SpiCommands),

    /// GPIO bank operations
    #[command(subcommand)]
    Gpio(GpioCommands),
}

#[derive(Subcommand)]
pub enum I2cCommands {
    /// Probe every non-reserved address (0x08-0x77)
    Scan {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,
    },

    /// Read bytes from a target
    Read {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// 7-bit target address (hex or decimal)
        #[arg(short, long, value_parser = parse_address)]
        address: u8,

        /// Number of bytes to read
        #[arg(short, long, default_value = "1")]
        length: usize,

        /// Register to start from (written before a repeated start)
        #[arg(short, long, value_parser = parse_hex_u8)]
        register: Option<u8>,
    },

    /// Write bytes to a target
    Write {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// 7-bit target address (hex or decimal)
        #[arg(short, long, value_parser = parse_address)]
        address: u8,

        /// Bytes to write (comma-separated, hex or decimal)
        #[arg(short, long, value_delimiter = ',', value_parser = parse_hex_u8)]
        data: Vec<u8>,
    },

    /// Write bytes, then read after a repeated start
    WriteRead {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// 7-bit target address (hex or decimal)
        #[arg(short, long, value_parser = parse_address)]
        address: u8,

        /// Bytes to write (comma-separated, hex or decimal)
        #[arg(short, long, value_delimiter = ',', value_parser = parse_hex_u8, required = true)]
        data: Vec<u8>,

        /// Number of bytes to read
        #[arg(short, long, default_value = "1")]
        length: usize,
    },
}

#[derive(Subcommand)]
pub enum SpiCommands {
    /// Clock bytes out (mode 0, write only)
    Write {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Bytes to write (comma-separated, hex or decimal)
        #[arg(short, long, value_delimiter = ',', value_parser = parse_hex_u8, conflicts_with = "input")]
        data: Vec<u8>,

        /// File whose contents are written
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum GpioCommands {
    /// Drive the outputs of a bank, or a single pin with --pin
    Set {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Pin bank (adbus or acbus)
        #[arg(short, long, value_parser = parse_bank)]
        bank: GpioBank,

        /// Output values (hex or decimal); 0 or 1 with --pin
        #[arg(long, value_parser = parse_hex_u8)]
        value: u8,

        /// Single pin (0-7) to change
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..8))]
        pin: Option<u8>,
    },

    /// Read the levels of a bank
    Get {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Pin bank (adbus or acbus)
        #[arg(short, long, value_parser = parse_bank)]
        bank: GpioBank,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_hex_arguments() {
        assert_eq!(parse_hex_u8("0x50"), Ok(0x50));
        assert_eq!(parse_hex_u8("80"), Ok(80));
        assert!(parse_hex_u8("0x100").is_err());
        assert!(parse_address("0x80").is_err());
    }

    #[test]
    fn test_i2c_read_arguments() {
        let cli = Cli::parse_from([
            "ftserial", "i2c", "read", "-p", "dummy", "-a", "0x60", "-l", "5", "-r", "0x10",
        ]);
        match cli.command {
            Commands::I2c(I2cCommands::Read {
                address,
                length,
                register,
                ..
            }) => {
                assert_eq!(address, 0x60);
                assert_eq!(length, 5);
                assert_eq!(register, Some(0x10));
            }
            _ => panic!("expected i2c read"),
        }
    }

    #[test]
    fn test_data_list() {
        let cli = Cli::parse_from(["ftserial", "spi", "write", "-p", "dummy", "-d", "0x9f,1,0xff"]);
        match cli.command {
            Commands::Spi(SpiCommands::Write { data, .. }) => assert_eq!(data, vec![0x9F, 1, 0xFF]),
            _ => panic!("expected spi write"),
        }
    }
}

//! ftserial - I2C, SPI and GPIO through FTDI MPSSE adapters
//!
//! Every bus command opens the programmer named on the command line,
//! puts its channel into MPSSE mode and runs one operation against it.
//! The `dummy` programmer runs the same code against an in-memory
//! emulator.

mod cli;
mod commands;
mod programmers;

use clap::Parser;
use cli::{Cli, Commands, GpioCommands, I2cCommands, SpiCommands};
use programmers::open_programmer;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    match cli.command {
        Commands::List => commands::run_list(),
        Commands::Probe { programmer } => {
            let (transport, options) = open_programmer(&programmer)?;
            commands::run_probe(transport, &options)
        }
        Commands::I2c(cmd) => match cmd {
            I2cCommands::Scan { programmer } => {
                let (transport, options) = open_programmer(&programmer)?;
                commands::i2c::run_scan(transport, &options)
            }
            I2cCommands::Read {
                programmer,
                address,
                length,
                register,
            } => {
                let (transport, options) = open_programmer(&programmer)?;
                commands::i2c::run_read(transport, &options, address, length, register)
            }
            I2cCommands::Write {
                programmer,
                address,
                data,
            } => {
                let (transport, options) = open_programmer(&programmer)?;
                commands::i2c::run_write(transport, &options, address, &data)
            }
            I2cCommands::WriteRead {
                programmer,
                address,
                data,
                length,
            } => {
                let (transport, options) = open_programmer(&programmer)?;
                commands::i2c::run_write_read(transport, &options, address, &data, length)
            }
        },
        Commands::Spi(SpiCommands::Write {
            programmer,
            data,
            input,
        }) => {
            let (transport, options) = open_programmer(&programmer)?;
            commands::spi::run_write(transport, &options, &data, input.as_deref())
        }
        Commands::Gpio(cmd) => match cmd {
            GpioCommands::Set {
                programmer,
                bank,
                value,
                pin,
            } => {
                let (transport, options) = open_programmer(&programmer)?;
                commands::gpio::run_set(transport, &options, bank, value, pin)
            }
            GpioCommands::Get { programmer, bank } => {
                let (transport, options) = open_programmer(&programmer)?;
                commands::gpio::run_get(transport, &options, bank)
            }
        },
    }
}

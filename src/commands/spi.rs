//! SPI command implementation

use std::fs;
use std::path::Path;

use ftserial_core::Spi;
use indicatif::{ProgressBar, ProgressStyle};

use crate::programmers::{BoxedTransport, ProgrammerOptions};

/// Bytes sent per flush when streaming a file
const WRITE_CHUNK_SIZE: usize = 4096;

/// Clock out bytes given on the command line or read from a file
pub fn run_write(
    transport: BoxedTransport,
    options: &ProgrammerOptions,
    data: &[u8],
    input: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = match input {
        Some(path) => fs::read(path)?,
        None => data.to_vec(),
    };
    if payload.is_empty() {
        return Err("nothing to write (use --data or --input)".into());
    }

    let spi = Spi::new(transport, &options.mpsse, &options.spi)?;

    if input.is_none() {
        spi.write(&payload)?;
        println!("Wrote {} byte(s)", payload.len());
        return Ok(());
    }

    let pb = ProgressBar::new(payload.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );
    for chunk in payload.chunks(WRITE_CHUNK_SIZE) {
        spi.write(chunk)?;
        pb.inc(chunk.len() as u64);
    }
    pb.finish_with_message("Write complete");

    println!("Wrote {} byte(s)", payload.len());
    Ok(())
}

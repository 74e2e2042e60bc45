//! MPSSE command engine
//!
//! This module provides the `Mpsse` struct that batches MPSSE commands into
//! a pending buffer, sends the whole batch with a single bulk write on
//! `flush`, and demultiplexes the chunked bulk-read stream back into the
//! [`Reply`] slots of the commands that asked for data.
//!
//! # Lifetime
//!
//! Following AN_135, `Mpsse::new` resets the adapter, sets the latency
//! timer, enables MPSSE mode and confirms the command processor answers a
//! bogus opcode with a "bad command" echo. Dropping the engine resets the
//! bitmode again.
//!
//! # Concurrency
//!
//! Every operation takes `&self`; one lock guards the pending buffer, the
//! outstanding replies and the transport, and is held for the whole flush.
//! Reply validators run inside that lock, so they must not queue commands.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{MpsseError, Result};
use crate::protocol::*;
use crate::reply::{PendingReply, Reply, Validator};
use crate::transport::Transport;

/// Port configuration applied when the engine is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpsseConfig {
    /// Latency timer in milliseconds
    pub latency_ms: u16,
    /// ADBUS pins configured as outputs when MPSSE mode is enabled
    pub output_pins: u8,
}

impl Default for MpsseConfig {
    fn default() -> Self {
        Self {
            latency_ms: DEFAULT_LATENCY_MS,
            output_pins: SerialPins::OUTPUTS.bits(),
        }
    }
}

impl MpsseConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latency timer
    pub fn with_latency_ms(mut self, latency_ms: u16) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Set the ADBUS output mask used when enabling MPSSE mode
    pub fn with_output_pins(mut self, output_pins: u8) -> Self {
        self.output_pins = output_pins;
        self
    }

    /// Apply one `key=value` programmer option
    ///
    /// Returns `Ok(false)` if the key is not an engine option.
    ///
    /// - `latency=<ms>`: latency timer, 1-255 ms (default: 16)
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "latency" => {
                let ms: u16 = value.parse().map_err(|_| {
                    MpsseError::InvalidParameter(format!("Invalid latency value: {}", value))
                })?;
                if !(1..=255).contains(&ms) {
                    return Err(MpsseError::InvalidParameter(format!(
                        "Invalid latency: {} (must be 1-255)",
                        ms
                    )));
                }
                self.latency_ms = ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

struct Inner<T> {
    transport: T,
    /// Command bytes not yet sent
    pending: Vec<u8>,
    /// Replies expected from the device, in queue order
    outstanding: VecDeque<PendingReply>,
    /// Set once byte framing with the device has been lost
    desynchronized: bool,
}

impl<T: Transport> Inner<T> {
    fn push(&mut self, opcode: Opcode, args: &[u8]) {
        self.pending.push(opcode.value());
        self.pending.extend_from_slice(args);
    }

    fn control_out(&mut self, request: VendorRequest, value: u16) -> Result<()> {
        self.transport.control_out(request.value(), value, &[])
    }

    /// One bulk write of the pending batch, then read until every
    /// outstanding reply is fulfilled or the retries run out
    fn exchange(&mut self) -> Result<()> {
        self.push(Opcode::SendImmediate, &[]);
        let batch = std::mem::take(&mut self.pending);
        log::trace!("bulk transfer writing {}", hex_preview(&batch));
        self.transport.bulk_write(&batch)?;

        let mut assembled: Vec<u8> = Vec::new();
        let mut rejected: Option<MpsseError> = None;
        let mut retries = FLUSH_READ_RETRIES;

        // Reading stops once every reply is satisfied. Bytes the device
        // sends after that are not seen here and land in front of the next
        // flush's first reply.
        while !self.outstanding.is_empty() && retries > 0 {
            retries -= 1;
            let chunk = self.transport.bulk_read()?;
            log::trace!("bulk transfer read {}", hex_preview(&chunk));
            if chunk.is_empty() {
                continue;
            }
            if chunk[0] != MODEM_STATUS_SENTINEL {
                return Err(MpsseError::BadModemStatus(hex_preview(&chunk)));
            }
            if chunk.len() < MODEM_STATUS_SIZE {
                return Err(MpsseError::ShortChunk);
            }
            if chunk[1] != MODEM_STATUS_DEFAULT {
                log::debug!("unusual modem status 0x{:02x}", chunk[1]);
            }
            assembled.extend_from_slice(&chunk[MODEM_STATUS_SIZE..]);

            while let Some(head) = self.outstanding.front() {
                let needed = head.expected_len();
                if needed > assembled.len() {
                    break;
                }
                let Some(head) = self.outstanding.pop_front() else {
                    break;
                };
                let bytes: Vec<u8> = assembled.drain(..needed).collect();
                if let Err(e) = head.fulfill(bytes) {
                    // Keep demultiplexing so later replies stay aligned
                    rejected.get_or_insert(e);
                }
            }
        }

        if !self.outstanding.is_empty() || !assembled.is_empty() {
            return Err(MpsseError::Desync {
                outstanding: self.outstanding.len(),
                leftover: assembled.len(),
                dump: hex_preview(&assembled),
            });
        }

        match rejected {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// FTDI MPSSE command engine
///
/// Generic over the [`Transport`] so it can run against a USB adapter or
/// the in-memory emulator in [`crate::dummy`].
pub struct Mpsse<T: Transport> {
    inner: Mutex<Inner<T>>,
}

impl<T: Transport> Mpsse<T> {
    /// Configure the adapter for MPSSE use and confirm the mode took effect
    pub fn new(transport: T, config: &MpsseConfig) -> Result<Self> {
        let engine = Self {
            inner: Mutex::new(Inner {
                transport,
                pending: Vec::new(),
                outstanding: VecDeque::new(),
                desynchronized: false,
            }),
        };
        engine.configure_ports(config)?;
        engine.confirm_mpsse_mode()?;
        log::info!(
            "MPSSE engine ready (latency {} ms, outputs 0x{:02x})",
            config.latency_ms,
            config.output_pins
        );
        Ok(engine)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// AN_135 4.2: configure the port for MPSSE use
    fn configure_ports(&self, config: &MpsseConfig) -> Result<()> {
        self.set_bitmode(BitMode::Reset, 0)?;
        self.set_latency_timer(config.latency_ms)?;
        self.set_bitmode(BitMode::Reset, 0)?;
        self.set_bitmode(BitMode::Mpsse, config.output_pins)
    }

    /// Set the adapter's read latency timer
    pub fn set_latency_timer(&self, latency_ms: u16) -> Result<()> {
        log::debug!("Setting latency timer to {} ms", latency_ms);
        self.lock()
            .control_out(VendorRequest::SetLatencyTimer, latency_ms)
    }

    /// Select the adapter's operating mode
    ///
    /// `output_mask` marks ADBUS pins used as outputs.
    pub fn set_bitmode(&self, mode: BitMode, output_mask: u8) -> Result<()> {
        log::debug!("Setting bitmode {:?} (outputs 0x{:02x})", mode, output_mask);
        self.lock()
            .control_out(VendorRequest::SetBitMode, mode.request_value(output_mask))
    }

    /// Check that the command processor is listening
    ///
    /// Queues the bogus opcode and expects the `{0xFA, opcode}` "bad
    /// command" echo. Does not change configuration or move data.
    pub fn confirm_mpsse_mode(&self) -> Result<()> {
        let echo = self.queue(Opcode::Bogus, &[], 2, None);
        self.flush()?;
        let expected = [BAD_COMMAND, Opcode::Bogus.value()];
        if echo.value() != expected {
            return Err(MpsseError::ModeProbe {
                expected: hex_preview(&expected),
                got: hex_preview(echo.value()),
            });
        }
        log::debug!("MPSSE mode confirmed");
        Ok(())
    }

    /// Append a command to the pending batch
    ///
    /// When `expected_len` is non-zero the returned reply is fulfilled by
    /// the next flush, after `validator` (if any) has seen the bytes.
    /// Never touches the transport.
    pub fn queue(
        &self,
        opcode: Opcode,
        args: &[u8],
        expected_len: usize,
        validator: Option<Validator>,
    ) -> Reply {
        let mut inner = self.lock();
        inner.push(opcode, args);
        if expected_len == 0 {
            assert!(
                validator.is_none(),
                "validator attached to a command without a reply"
            );
            return Reply::empty();
        }
        let reply = Reply::pending(expected_len);
        inner
            .outstanding
            .push_back(PendingReply::new(reply.clone(), validator));
        reply
    }

    /// Append a command that produces no reply
    pub fn queue_command(&self, opcode: Opcode, args: &[u8]) {
        self.queue(opcode, args, 0, None);
    }

    /// Send the pending batch and collect every outstanding reply
    ///
    /// A validator failure (such as an I2C NACK) is returned after all
    /// replies were demultiplexed, and the engine stays usable. Framing and
    /// transport failures leave the engine desynchronized; later flushes
    /// fail with [`MpsseError::Desynchronized`].
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.desynchronized {
            inner.pending.clear();
            inner.outstanding.clear();
            return Err(MpsseError::Desynchronized);
        }
        let result = inner.exchange();
        if let Err(e) = &result {
            if !e.is_nack() {
                log::debug!("MPSSE flush failed, marking engine desynchronized: {}", e);
                inner.desynchronized = true;
                inner.outstanding.clear();
            }
        }
        result
    }

    /// Whether a framing failure has made the engine unusable
    pub fn is_desynchronized(&self) -> bool {
        self.lock().desynchronized
    }

    // ------------------------------------------------------------------
    // Clocking
    // ------------------------------------------------------------------

    /// Queue the clock setup for a target frequency
    ///
    /// Disables adaptive clocking, selects 3-phase or 2-phase clocking,
    /// selects the 60 MHz reference and sets the divisor. Returns the
    /// divisor. Does not flush.
    pub fn configure_clocking(&self, frequency_hz: u32, three_phase: bool) -> u16 {
        self.disable_adaptive_clock();
        if three_phase {
            self.enable_three_phase_clock();
        } else {
            self.disable_three_phase_clock();
        }
        self.set_clock_divide_by_5(false);

        let divisor = clock_divisor(INTERNAL_CLOCK_HZ, frequency_hz, three_phase);
        log::debug!(
            "Setting clock divisor to {} ({} Hz requested)",
            divisor,
            frequency_hz
        );
        self.queue_command(Opcode::SetClockDivisor, &divisor.to_le_bytes());
        divisor
    }

    /// Gate the clock on RTCK (GPIOL3). Not usable for I2C.
    pub fn enable_adaptive_clock(&self) {
        log::debug!("Enabling adaptive clock");
        self.queue_command(Opcode::EnableAdaptiveClock, &[]);
    }

    pub fn disable_adaptive_clock(&self) {
        log::debug!("Disabling adaptive clock");
        self.queue_command(Opcode::DisableAdaptiveClock, &[]);
    }

    /// Keep data valid through a clock level instead of an edge
    pub fn enable_three_phase_clock(&self) {
        log::debug!("Enabling 3-phase clock");
        self.queue_command(Opcode::EnableThreePhase, &[]);
    }

    pub fn disable_three_phase_clock(&self) {
        log::debug!("Disabling 3-phase clock");
        self.queue_command(Opcode::DisableThreePhase, &[]);
    }

    /// Select the 12 MHz (`true`) or 60 MHz (`false`) internal reference
    pub fn set_clock_divide_by_5(&self, enabled: bool) {
        let opcode = if enabled {
            Opcode::EnableClockDivide5
        } else {
            Opcode::DisableClockDivide5
        };
        self.queue_command(opcode, &[]);
    }

    /// Connect data out to data in internally
    pub fn set_loopback(&self, enabled: bool) {
        let opcode = if enabled {
            Opcode::LoopbackStart
        } else {
            Opcode::LoopbackEnd
        };
        self.queue_command(opcode, &[]);
    }

    // ------------------------------------------------------------------
    // Clocked data
    // ------------------------------------------------------------------

    /// Queue a clocked write of whole bytes
    ///
    /// The clock pin must already be at the right level for the starting
    /// phase; it ends where it started.
    ///
    /// # Panics
    ///
    /// Panics if `data` is empty or longer than 65536 bytes.
    pub fn write_bytes_with_clock(&self, data: &[u8], window: DataWindow, order: BitOrder) {
        assert!(!data.is_empty(), "write must send minimum of one byte");
        assert!(
            data.len() <= MAX_BYTES_PER_COMMAND,
            "write of {} bytes exceeds one command",
            data.len()
        );
        let opcode = write_opcode(order, window, Granularity::Bytes);
        let length = ((data.len() - 1) as u16).to_le_bytes();
        let mut args = Vec::with_capacity(2 + data.len());
        args.extend_from_slice(&length);
        args.extend_from_slice(data);
        self.queue_command(opcode, &args);
    }

    /// Queue a clocked write of 1-8 bits of `datum`
    ///
    /// With MSB order the bits are taken from the top of `datum`.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is outside 1..=8.
    pub fn write_bits_with_clock(&self, bits: u8, datum: u8, window: DataWindow, order: BitOrder) {
        assert!(
            (1..=8).contains(&bits),
            "bit write must send 1-8 bits, got {}",
            bits
        );
        let opcode = write_opcode(order, window, Granularity::Bits);
        self.queue_command(opcode, &[bits - 1, datum]);
    }

    /// Queue a clocked read of 1-8 bits; the reply is one byte
    ///
    /// A read of fewer than 8 bits fills the reply from the MSB; shift
    /// right by `8 - bits` for a right-justified value.
    ///
    /// # Panics
    ///
    /// Panics if `bits` is outside 1..=8.
    pub fn read_bits_with_clock(
        &self,
        bits: u8,
        window: DataWindow,
        order: BitOrder,
        validator: Option<Validator>,
    ) -> Reply {
        assert!(
            (1..=8).contains(&bits),
            "bit read must request 1-8 bits, got {}",
            bits
        );
        let opcode = read_opcode(order, window, Granularity::Bits);
        self.queue(opcode, &[bits - 1], 1, validator)
    }

    /// Queue a clocked read of whole bytes; the reply is `count` bytes
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero or larger than 65536.
    pub fn read_bytes_with_clock(&self, count: usize, window: DataWindow, order: BitOrder) -> Reply {
        assert!(
            (1..=MAX_BYTES_PER_COMMAND).contains(&count),
            "byte read must request 1-{} bytes, got {}",
            MAX_BYTES_PER_COMMAND,
            count
        );
        let opcode = read_opcode(order, window, Granularity::Bytes);
        let length = ((count - 1) as u16).to_le_bytes();
        self.queue(opcode, &length, count, None)
    }

    // ------------------------------------------------------------------
    // Pins
    // ------------------------------------------------------------------

    /// Queue setting pin directions and output values for a bank
    ///
    /// `output_mask` bits set to 1 mark outputs.
    pub fn queue_data_bits(&self, values: u8, output_mask: u8, bank: GpioBank) {
        self.queue_command(bank.set_opcode(), &[values, output_mask]);
    }

    /// Queue reading a bank's pins; the reply is one byte
    pub fn query_data_bits(&self, bank: GpioBank) -> Reply {
        self.queue(bank.get_opcode(), &[], 1, None)
    }

    /// Queue setting which outputs float on '1' instead of driving high
    pub fn set_tristate(&self, low_mask: u8, high_mask: u8) {
        self.queue_command(Opcode::OnlyDriveZero, &[low_mask, high_mask]);
    }
}

impl<T: Transport> Drop for Mpsse<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = inner.control_out(VendorRequest::SetBitMode, BitMode::Reset.request_value(0))
        {
            log::warn!("Failed to reset bitmode on close: {}", e);
        }
    }
}

//! In-memory FTDI MPSSE emulator for testing
//!
//! `DummyMpsse` implements [`Transport`] by decoding the MPSSE command
//! stream the way the FT232H command processor does and producing the
//! chunked, modem-status-prefixed reply stream the engine has to
//! demultiplex. It needs no hardware, so every bus front end can be
//! exercised against it.
//!
//! The handle is cheaply cloneable; clones share one emulated adapter, so
//! a test can keep a handle to inspect state after the engine has taken
//! ownership of its own copy.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::protocol::*;
use crate::transport::Transport;

/// Default reply payload per bulk-read chunk (one 512-byte packet minus header)
pub const DEFAULT_CHUNK_SIZE: usize = 510;

/// One decoded MPSSE command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub args: Vec<u8>,
}

impl Command {
    /// Whether this command is `opcode` with exactly `args`
    pub fn is(&self, opcode: Opcode, args: &[u8]) -> bool {
        self.opcode == opcode.value() && self.args == args
    }
}

/// Value and direction of one emulated pin bank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinBank {
    /// Output levels last set
    pub value: u8,
    /// 1 = output
    pub direction: u8,
}

#[derive(Debug)]
struct DummyState {
    bitmode: u8,
    latency_ms: u16,
    control_requests: Vec<(u8, u16)>,
    commands: Vec<Command>,
    /// Bytes of a command split across bulk writes
    partial: Vec<u8>,
    banks: [PinBank; 2],
    inputs: [u8; 2],
    divisor: Option<u16>,
    three_phase: bool,
    adaptive: bool,
    divide_by_5: bool,
    loopback: bool,
    tristate: (u8, u8),
    /// Data clocked in by read commands
    input_queue: VecDeque<u8>,
    /// Reply bytes waiting to be read by the host
    replies: VecDeque<u8>,
    bulk_writes: usize,
    bulk_reads: usize,
    chunk_size: usize,
    sentinel: u8,
    modem_status: u8,
    bad_command_echo: Option<[u8; 2]>,
    starve: bool,
    /// Raw chunks returned as-is before any reply data
    scripted_reads: VecDeque<Vec<u8>>,
}

impl Default for DummyState {
    fn default() -> Self {
        Self {
            bitmode: BitMode::Reset as u8,
            latency_ms: DEFAULT_LATENCY_MS,
            control_requests: Vec::new(),
            commands: Vec::new(),
            partial: Vec::new(),
            banks: [PinBank::default(); 2],
            inputs: [0; 2],
            divisor: None,
            three_phase: false,
            adaptive: false,
            divide_by_5: true,
            loopback: false,
            tristate: (0, 0),
            input_queue: VecDeque::new(),
            replies: VecDeque::new(),
            bulk_writes: 0,
            bulk_reads: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sentinel: MODEM_STATUS_SENTINEL,
            modem_status: MODEM_STATUS_DEFAULT,
            bad_command_echo: None,
            starve: false,
            scripted_reads: VecDeque::new(),
        }
    }
}

/// Number of argument bytes following `opcode`, if the header is complete
///
/// Returns `None` when more bytes are needed to know the length.
fn argument_len(opcode: Option<Opcode>, rest: &[u8]) -> Option<usize> {
    use Opcode::*;
    let len = match opcode {
        Some(
            WriteBytesRisingMsb | WriteBytesFallingMsb | WriteBytesRisingLsb
            | WriteBytesFallingLsb,
        ) => {
            if rest.len() < 2 {
                return None;
            }
            2 + usize::from(u16::from_le_bytes([rest[0], rest[1]])) + 1
        }
        Some(
            WriteBitsRisingMsb | WriteBitsFallingMsb | WriteBitsRisingLsb | WriteBitsFallingLsb,
        ) => 2,
        Some(
            ReadBytesRisingMsb | ReadBytesFallingMsb | ReadBytesRisingLsb | ReadBytesFallingLsb,
        ) => 2,
        Some(ReadBitsRisingMsb | ReadBitsFallingMsb | ReadBitsRisingLsb | ReadBitsFallingLsb) => 1,
        Some(SetBitsLow | SetBitsHigh | SetClockDivisor | OnlyDriveZero) => 2,
        _ => 0,
    };
    Some(len)
}

impl DummyState {
    fn control_out(&mut self, request: u8, value: u16) {
        self.control_requests.push((request, value));
        if request == VendorRequest::SetBitMode.value() {
            self.bitmode = (value >> 8) as u8;
            if self.bitmode == BitMode::Mpsse as u8 {
                self.banks[GpioBank::Adbus.index()].direction = value as u8;
            } else {
                self.partial.clear();
                self.replies.clear();
            }
        } else if request == VendorRequest::SetLatencyTimer.value() {
            self.latency_ms = value;
        }
    }

    fn bulk_write(&mut self, data: &[u8]) {
        self.bulk_writes += 1;
        if self.bitmode != BitMode::Mpsse as u8 {
            log::trace!("dummy: ignoring {} bytes outside MPSSE mode", data.len());
            return;
        }
        self.partial.extend_from_slice(data);
        let mut offset = 0;
        while offset < self.partial.len() {
            let byte = self.partial[offset];
            let opcode = Opcode::from_u8(byte);
            let Some(args_len) = argument_len(opcode, &self.partial[offset + 1..]) else {
                break;
            };
            if offset + 1 + args_len > self.partial.len() {
                break;
            }
            let args = self.partial[offset + 1..offset + 1 + args_len].to_vec();
            offset += 1 + args_len;
            self.execute(byte, opcode, args);
        }
        self.partial.drain(..offset);
    }

    fn clock_in(&mut self, count: usize) {
        for _ in 0..count {
            let byte = self.input_queue.pop_front().unwrap_or(0);
            self.replies.push_back(byte);
        }
    }

    fn execute(&mut self, byte: u8, opcode: Option<Opcode>, args: Vec<u8>) {
        use Opcode::*;
        match opcode {
            Some(
                ReadBytesRisingMsb | ReadBytesFallingMsb | ReadBytesRisingLsb
                | ReadBytesFallingLsb,
            ) => {
                let count = usize::from(u16::from_le_bytes([args[0], args[1]])) + 1;
                self.clock_in(count);
            }
            Some(
                ReadBitsRisingMsb | ReadBitsFallingMsb | ReadBitsRisingLsb | ReadBitsFallingLsb,
            ) => self.clock_in(1),
            Some(SetBitsLow | SetBitsHigh) => {
                let bank = if opcode == Some(SetBitsLow) {
                    GpioBank::Adbus
                } else {
                    GpioBank::Acbus
                };
                self.banks[bank.index()] = PinBank {
                    value: args[0],
                    direction: args[1],
                };
            }
            Some(GetBitsLow | GetBitsHigh) => {
                let bank = if opcode == Some(GetBitsLow) {
                    GpioBank::Adbus
                } else {
                    GpioBank::Acbus
                };
                let pins = self.banks[bank.index()];
                let level = (pins.value & pins.direction) | (self.inputs[bank.index()] & !pins.direction);
                self.replies.push_back(level);
            }
            Some(SetClockDivisor) => self.divisor = Some(u16::from_le_bytes([args[0], args[1]])),
            Some(EnableThreePhase) => self.three_phase = true,
            Some(DisableThreePhase) => self.three_phase = false,
            Some(EnableAdaptiveClock) => self.adaptive = true,
            Some(DisableAdaptiveClock) => self.adaptive = false,
            Some(EnableClockDivide5) => self.divide_by_5 = true,
            Some(DisableClockDivide5) => self.divide_by_5 = false,
            Some(LoopbackStart) => self.loopback = true,
            Some(LoopbackEnd) => self.loopback = false,
            Some(OnlyDriveZero) => self.tristate = (args[0], args[1]),
            Some(Bogus) | None => {
                let echo = self.bad_command_echo.unwrap_or([BAD_COMMAND, byte]);
                self.replies.extend(echo);
            }
            _ => {}
        }
        self.commands.push(Command { opcode: byte, args });
    }

    fn bulk_read(&mut self) -> Vec<u8> {
        self.bulk_reads += 1;
        if let Some(chunk) = self.scripted_reads.pop_front() {
            return chunk;
        }
        let mut chunk = vec![self.sentinel, self.modem_status];
        if !self.starve {
            let take = self.chunk_size.min(self.replies.len());
            chunk.extend(self.replies.drain(..take));
        }
        chunk
    }
}

/// Emulated FTDI adapter in MPSSE mode
#[derive(Debug, Clone, Default)]
pub struct DummyMpsse {
    state: Arc<Mutex<DummyState>>,
}

impl DummyMpsse {
    /// Create an emulated adapter in its power-on state
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Limit the reply payload returned per bulk read
    pub fn set_chunk_size(&self, chunk_size: usize) {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        self.state().chunk_size = chunk_size;
    }

    /// Append bytes to be returned by clocked read commands
    ///
    /// Reads with nothing queued return zero (ACK for a 1-bit read).
    pub fn queue_input(&self, data: &[u8]) {
        self.state().input_queue.extend(data.iter().copied());
    }

    /// Levels seen on a bank's input pins
    pub fn set_inputs(&self, bank: GpioBank, levels: u8) {
        self.state().inputs[bank.index()] = levels;
    }

    /// Status flags byte sent in every chunk header
    pub fn set_modem_status(&self, status: u8) {
        self.state().modem_status = status;
    }

    /// First header byte of every chunk (0x32 on real hardware)
    pub fn set_sentinel(&self, sentinel: u8) {
        self.state().sentinel = sentinel;
    }

    /// Reply to unknown opcodes with a fixed pair instead of `{0xFA, opcode}`
    pub fn override_bad_command_echo(&self, echo: [u8; 2]) {
        self.state().bad_command_echo = Some(echo);
    }

    /// Withhold all reply bytes; reads return bare headers
    pub fn starve_replies(&self, starve: bool) {
        self.state().starve = starve;
    }

    /// Make the next `count` bulk reads return nothing, as a timed-out
    /// read does on real hardware
    pub fn inject_empty_reads(&self, count: usize) {
        let mut state = self.state();
        for _ in 0..count {
            state.scripted_reads.push_back(Vec::new());
        }
    }

    /// Return `chunk` verbatim, header included, from the next bulk read
    /// not already scripted
    pub fn inject_raw_chunk(&self, chunk: &[u8]) {
        self.state().scripted_reads.push_back(chunk.to_vec());
    }

    /// Queue reply bytes no command asked for
    pub fn append_stray(&self, data: &[u8]) {
        self.state().replies.extend(data.iter().copied());
    }

    /// Decoded commands, in execution order
    pub fn commands(&self) -> Vec<Command> {
        self.state().commands.clone()
    }

    /// Forget the command log
    pub fn clear_commands(&self) {
        self.state().commands.clear();
    }

    /// Vendor control requests as `(request, value)` pairs
    pub fn control_requests(&self) -> Vec<(u8, u16)> {
        self.state().control_requests.clone()
    }

    /// Value and direction of a pin bank
    pub fn pins(&self, bank: GpioBank) -> PinBank {
        self.state().banks[bank.index()]
    }

    pub fn bitmode(&self) -> u8 {
        self.state().bitmode
    }

    pub fn latency_ms(&self) -> u16 {
        self.state().latency_ms
    }

    /// Clock divisor, once one has been set
    pub fn divisor(&self) -> Option<u16> {
        self.state().divisor
    }

    pub fn three_phase(&self) -> bool {
        self.state().three_phase
    }

    pub fn adaptive(&self) -> bool {
        self.state().adaptive
    }

    pub fn divide_by_5(&self) -> bool {
        self.state().divide_by_5
    }

    pub fn loopback(&self) -> bool {
        self.state().loopback
    }

    /// Tristate masks for the low and high banks
    pub fn tristate(&self) -> (u8, u8) {
        self.state().tristate
    }

    pub fn bulk_writes(&self) -> usize {
        self.state().bulk_writes
    }

    pub fn bulk_reads(&self) -> usize {
        self.state().bulk_reads
    }
}

impl Transport for DummyMpsse {
    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        self.state().bulk_write(data);
        Ok(())
    }

    fn bulk_read(&mut self) -> Result<Vec<u8>> {
        Ok(self.state().bulk_read())
    }

    fn control_out(&mut self, request: u8, value: u16, _data: &[u8]) -> Result<()> {
        self.state().control_out(request, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpsse_mode(dummy: &mut DummyMpsse) {
        dummy
            .control_out(
                VendorRequest::SetBitMode.value(),
                BitMode::Mpsse.request_value(0x03),
                &[],
            )
            .unwrap();
    }

    #[test]
    fn test_ignores_writes_outside_mpsse_mode() {
        let mut dummy = DummyMpsse::new();
        dummy.bulk_write(&[Opcode::Bogus.value()]).unwrap();
        assert!(dummy.commands().is_empty());
        assert_eq!(dummy.bulk_read().unwrap(), vec![0x32, 0x60]);
    }

    #[test]
    fn test_command_split_across_writes() {
        let mut dummy = DummyMpsse::new();
        mpsse_mode(&mut dummy);
        dummy.bulk_write(&[0x11, 0x01]).unwrap();
        assert!(dummy.commands().is_empty());
        dummy.bulk_write(&[0x00, 0xAA, 0xBB, 0x87]).unwrap();
        let commands = dummy.commands();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].is(Opcode::WriteBytesFallingMsb, &[0x01, 0x00, 0xAA, 0xBB]));
        assert!(commands[1].is(Opcode::SendImmediate, &[]));
    }

    #[test]
    fn test_unknown_opcode_echo() {
        let mut dummy = DummyMpsse::new();
        mpsse_mode(&mut dummy);
        dummy.bulk_write(&[0xAB, 0xFF]).unwrap();
        assert_eq!(
            dummy.bulk_read().unwrap(),
            vec![0x32, 0x60, 0xFA, 0xAB, 0xFA, 0xFF]
        );
    }

    #[test]
    fn test_pin_read_mixes_inputs() {
        let mut dummy = DummyMpsse::new();
        mpsse_mode(&mut dummy);
        dummy.set_inputs(GpioBank::Acbus, 0xF0);
        dummy.bulk_write(&[0x82, 0x0F, 0x0C, 0x83]).unwrap();
        // Output pins report the driven value, input pins the external levels
        assert_eq!(dummy.bulk_read().unwrap(), vec![0x32, 0x60, 0xF0 | 0x0C]);
        assert_eq!(
            dummy.pins(GpioBank::Acbus),
            PinBank {
                value: 0x0F,
                direction: 0x0C
            }
        );
    }

    #[test]
    fn test_chunking() {
        let mut dummy = DummyMpsse::new();
        mpsse_mode(&mut dummy);
        dummy.set_chunk_size(2);
        dummy.queue_input(&[1, 2, 3]);
        dummy.bulk_write(&[0x20, 0x02, 0x00]).unwrap();
        assert_eq!(dummy.bulk_read().unwrap(), vec![0x32, 0x60, 1, 2]);
        assert_eq!(dummy.bulk_read().unwrap(), vec![0x32, 0x60, 3]);
        assert_eq!(dummy.bulk_read().unwrap(), vec![0x32, 0x60]);
    }
}

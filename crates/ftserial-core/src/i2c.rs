//! I2C bus master on top of the MPSSE engine
//!
//! SCL is ADBUS0 and SDA is ADBUS1, both configured as tristate outputs so
//! they only ever pull low; a pull-up (or another bus participant) decides
//! the level when they float. Start and stop conditions are produced by
//! setting pin levels directly; bytes are clocked with 3-phase clocking so
//! SDA is stable while SCL is high.
//!
//! References: UM10204 (I2C-bus specification), AN_113 (FTDI I2C example),
//! AN_411 (clock stretching is not supported by the MPSSE).

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{MpsseError, Result};
use crate::mpsse::{Mpsse, MpsseConfig};
use crate::protocol::{BitOrder, DataWindow, GpioBank, SerialPins};
use crate::reply::Reply;
use crate::transport::Transport;

/// Lowest non-reserved 7-bit address probed by [`I2cBus::scan`]
pub const SCAN_FIRST_ADDRESS: u8 = 0x08;

/// Highest non-reserved 7-bit address probed by [`I2cBus::scan`]
pub const SCAN_LAST_ADDRESS: u8 = 0x77;

/// ACK bit sent after a received byte when more bytes follow (pull SDA low)
const ACK: u8 = 0x00;

/// NACK sent after the last received byte (let SDA float)
const NACK: u8 = 0xFF;

/// I2C speed grades
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum I2cMode {
    /// Fast-mode, 400 kbit/s
    #[default]
    Fast,
}

impl I2cMode {
    /// Maximum SCL frequency for this grade
    pub fn max_clock_hz(self) -> u32 {
        match self {
            I2cMode::Fast => 400_000,
        }
    }

    /// Pin-set repetitions used to hold a bus state
    ///
    /// Four repetitions approximate the 600 ns fast-mode setup and hold
    /// times at the engine's command rate (AN_113). Empirical, not derived
    /// from the UM10204 timing table.
    pub fn hold_repetitions(self) -> usize {
        match self {
            I2cMode::Fast => 4,
        }
    }

    /// Parse mode from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" | "fm" | "400k" => Some(I2cMode::Fast),
            _ => None,
        }
    }

    /// Get the name of this mode
    pub fn name(self) -> &'static str {
        match self {
            I2cMode::Fast => "fast",
        }
    }
}

/// I2C bus configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct I2cConfig {
    /// Speed grade
    pub mode: I2cMode,
    /// Requested SCL frequency; capped at the mode's maximum
    pub clock_override_hz: Option<u32>,
    /// Override for the hold-delay repetition count
    pub hold_repetitions: Option<usize>,
}

impl I2cConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an SCL frequency (capped at the mode's maximum)
    ///
    /// # Panics
    ///
    /// Panics if `clock_hz` is zero.
    pub fn with_clock_hz(mut self, clock_hz: u32) -> Self {
        assert!(clock_hz > 0, "I2C clock frequency must be non-zero");
        self.clock_override_hz = Some(clock_hz);
        self
    }

    /// Override the hold-delay repetition count
    ///
    /// # Panics
    ///
    /// Panics if `repetitions` is zero.
    pub fn with_hold_repetitions(mut self, repetitions: usize) -> Self {
        assert!(repetitions >= 1, "hold delay needs at least one repetition");
        self.hold_repetitions = Some(repetitions);
        self
    }

    /// SCL frequency that will actually be configured
    pub fn effective_clock_hz(&self) -> u32 {
        let max = self.mode.max_clock_hz();
        self.clock_override_hz.map_or(max, |hz| hz.min(max))
    }

    /// Hold-delay repetitions that will actually be used
    pub fn effective_hold_repetitions(&self) -> usize {
        self.hold_repetitions
            .unwrap_or_else(|| self.mode.hold_repetitions())
    }

    /// Apply one `key=value` programmer option
    ///
    /// - `i2cmode=fast`: speed grade (default: fast)
    /// - `frequency=<hz>`: SCL frequency, capped at the mode maximum
    /// - `hold=<n>`: hold-delay repetitions (default: 4)
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "i2cmode" => {
                self.mode = I2cMode::parse(value).ok_or_else(|| {
                    MpsseError::InvalidParameter(format!("Invalid i2cmode: {} (must be fast)", value))
                })?;
            }
            "frequency" => {
                let hz: u32 = value.parse().map_err(|_| {
                    MpsseError::InvalidParameter(format!("Invalid frequency value: {}", value))
                })?;
                if hz == 0 {
                    return Err(MpsseError::InvalidParameter(
                        "frequency must be non-zero".into(),
                    ));
                }
                self.clock_override_hz = Some(hz);
            }
            "hold" => {
                let repetitions: usize = value.parse().map_err(|_| {
                    MpsseError::InvalidParameter(format!("Invalid hold value: {}", value))
                })?;
                if repetitions == 0 {
                    return Err(MpsseError::InvalidParameter("hold must be at least 1".into()));
                }
                self.hold_repetitions = Some(repetitions);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Level requested for an I2C line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TristateOutput {
    /// Released; pulled high unless another device sinks it
    Float,
    /// Actively pulled low
    Zero,
}

/// Requested levels of SDA and SCL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusState {
    pub sda: TristateOutput,
    pub scl: TristateOutput,
}

impl BusState {
    /// Both lines released: the bus is free
    pub const IDLE: Self = Self {
        sda: TristateOutput::Float,
        scl: TristateOutput::Float,
    };

    /// SCL held low, SDA released; neutral state between bytes
    pub const CLOCK_LOW: Self = Self {
        sda: TristateOutput::Float,
        scl: TristateOutput::Zero,
    };

    /// SDA low while SCL is high; entered from idle this is a start
    /// condition, left towards idle it is a stop condition
    pub const DATA_LOW: Self = Self {
        sda: TristateOutput::Zero,
        scl: TristateOutput::Float,
    };

    /// Both lines pulled low
    pub const BOTH_LOW: Self = Self {
        sda: TristateOutput::Zero,
        scl: TristateOutput::Zero,
    };

    /// ADBUS value byte for this state
    pub fn pin_values(self) -> u8 {
        let mut floating = SerialPins::empty();
        if self.sda == TristateOutput::Float {
            floating |= SerialPins::DATA_OUT;
        }
        if self.scl == TristateOutput::Float {
            floating |= SerialPins::CLOCK;
        }
        floating.bits()
    }
}

/// Transfer direction bit of the control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write = 0,
    Read = 1,
}

/// Build the control byte for a 7-bit address
///
/// # Panics
///
/// Panics if `address` does not fit in 7 bits.
pub fn control_byte(address: u8, direction: Direction) -> u8 {
    assert!(address < 0x80, "I2C address out of range: 0x{:02x}", address);
    (address << 1) | direction as u8
}

/// I2C bus master
///
/// Owns its MPSSE engine. The low-level operations (`send_start`,
/// `write`, `read`, ...) do not serialize whole conversations; use
/// [`I2cBus::conversation`] or [`crate::I2cDevice`] when the bus is shared.
pub struct I2cBus<T: Transport> {
    engine: Mpsse<T>,
    config: I2cConfig,
    hold: usize,
    conversation: Mutex<()>,
}

impl<T: Transport> I2cBus<T> {
    /// Open the engine on `transport` and configure it for I2C
    pub fn new(transport: T, mpsse: &MpsseConfig, config: &I2cConfig) -> Result<Self> {
        let engine = Mpsse::new(transport, mpsse)?;
        Self::with_engine(engine, config)
    }

    /// Configure an already-open engine for I2C
    ///
    /// Sets SDA and SCL to tristate, enables 3-phase clocking at the
    /// configured frequency and releases the bus.
    pub fn with_engine(engine: Mpsse<T>, config: &I2cConfig) -> Result<Self> {
        // Fields are public, so a config may skip the builder checks
        if config.clock_override_hz == Some(0) {
            return Err(MpsseError::InvalidParameter(
                "I2C clock frequency must be non-zero".to_string(),
            ));
        }
        if config.hold_repetitions == Some(0) {
            return Err(MpsseError::InvalidParameter(
                "hold delay needs at least one repetition".to_string(),
            ));
        }

        let bus = Self {
            engine,
            config: config.clone(),
            hold: config.effective_hold_repetitions(),
            conversation: Mutex::new(()),
        };

        bus.engine.set_tristate(SerialPins::OUTPUTS.bits(), 0);
        let clock_hz = config.effective_clock_hz();
        bus.engine.configure_clocking(clock_hz, true);
        bus.queue_bus(BusState::IDLE);
        bus.engine.flush()?;

        log::info!(
            "I2C bus configured: {} mode, SCL {} Hz",
            config.mode.name(),
            clock_hz
        );
        Ok(bus)
    }

    /// The underlying engine
    pub fn engine(&self) -> &Mpsse<T> {
        &self.engine
    }

    /// The configuration the bus was created with
    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    /// Always false: the MPSSE cannot follow a target holding SCL low
    pub fn supports_clock_stretching(&self) -> bool {
        false
    }

    /// Queue a pin update for SDA and SCL
    fn queue_bus(&self, state: BusState) {
        self.engine.queue_data_bits(
            state.pin_values(),
            SerialPins::OUTPUTS.bits(),
            GpioBank::Adbus,
        );
    }

    /// Queue `state` repeatedly to hold it for the setup/hold time
    pub fn hold_delay(&self, state: BusState) {
        for _ in 0..self.hold {
            self.queue_bus(state);
        }
    }

    /// Signal a start condition: SDA falls while SCL is high
    ///
    /// Leaves both lines low, ready for the first bit. Flushes.
    pub fn send_start(&self) -> Result<()> {
        self.hold_delay(BusState::IDLE);
        self.hold_delay(BusState::DATA_LOW);
        self.queue_bus(BusState::BOTH_LOW);
        self.engine.flush()
    }

    /// Signal a stop condition: SDA rises while SCL is high
    ///
    /// Leaves the bus idle. Flushes.
    pub fn send_stop(&self) -> Result<()> {
        self.hold_delay(BusState::DATA_LOW);
        self.hold_delay(BusState::IDLE);
        self.engine.flush()
    }

    /// Queue clocking out one byte and reading its ACK bit
    ///
    /// The next flush fails with [`MpsseError::Nack`] if the target
    /// leaves SDA high. Does not flush.
    pub fn write_byte_read_ack(&self, byte: u8) -> Reply {
        self.engine
            .write_bits_with_clock(8, byte, DataWindow::HighClock, BitOrder::Msb);
        self.queue_bus(BusState::CLOCK_LOW);
        let ack = self.engine.read_bits_with_clock(
            1,
            DataWindow::HighClock,
            BitOrder::Msb,
            Some(Box::new(move |bits: &[u8]| {
                if bits[0] != 0 {
                    Err(MpsseError::Nack { byte })
                } else {
                    Ok(())
                }
            })),
        );
        self.queue_bus(BusState::CLOCK_LOW);
        ack
    }

    /// Queue reading one byte and answering in the ACK slot
    ///
    /// Sends ACK when more bytes follow and NACK when `last` is set, so the
    /// target stops transmitting. Does not flush.
    pub fn read_byte(&self, last: bool) -> Reply {
        let data = self
            .engine
            .read_bits_with_clock(8, DataWindow::HighClock, BitOrder::Msb, None);
        let answer = if last { NACK } else { ACK };
        self.engine
            .write_bits_with_clock(1, answer, DataWindow::HighClock, BitOrder::Msb);
        self.hold_delay(BusState::CLOCK_LOW);
        data
    }

    /// Start, address `address` for writing and send `data`
    ///
    /// Does not send a stop. Every byte's ACK is checked; a NACK is
    /// returned as [`MpsseError::Nack`].
    pub fn write(&self, address: u8, data: &[u8]) -> Result<()> {
        let control = control_byte(address, Direction::Write);
        self.send_start()?;
        self.write_byte_read_ack(control);
        for &byte in data {
            self.write_byte_read_ack(byte);
        }
        self.engine.flush()
    }

    /// Start, address `address` for reading and receive `count` bytes
    ///
    /// Only the last byte is NACKed. Does not send a stop.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    pub fn read(&self, address: u8, count: usize) -> Result<Vec<u8>> {
        assert!(count > 0, "read request must be for at least one byte");
        let control = control_byte(address, Direction::Read);
        self.send_start()?;
        self.write_byte_read_ack(control);
        let replies: Vec<Reply> = (0..count).map(|i| self.read_byte(i + 1 == count)).collect();
        self.engine.flush()?;
        Ok(replies.iter().map(Reply::byte).collect())
    }

    /// Reserve the bus for one start...stop conversation
    ///
    /// The returned guard sends the stop when finished or dropped, so a
    /// conversation is terminated even on early return.
    pub fn conversation(&self) -> Conversation<'_, T> {
        let lock = self
            .conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Conversation {
            bus: self,
            _lock: lock,
            finished: false,
        }
    }

    /// Check whether a target acknowledges `address`
    ///
    /// Addresses the target for writing without sending data, then stops.
    pub fn probe_address(&self, address: u8) -> Result<bool> {
        let conversation = self.conversation();
        match conversation.write(address, &[]) {
            Ok(()) => {
                conversation.finish()?;
                Ok(true)
            }
            Err(e) if e.is_nack() => {
                conversation.finish()?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Probe every non-reserved 7-bit address
    pub fn scan(&self) -> Result<Vec<u8>> {
        let mut found = Vec::new();
        for address in SCAN_FIRST_ADDRESS..=SCAN_LAST_ADDRESS {
            if self.probe_address(address)? {
                log::debug!("I2C target acknowledged at 0x{:02x}", address);
                found.push(address);
            }
        }
        Ok(found)
    }
}

/// Exclusive use of the bus until a stop has been sent
pub struct Conversation<'a, T: Transport> {
    bus: &'a I2cBus<T>,
    _lock: MutexGuard<'a, ()>,
    finished: bool,
}

impl<T: Transport> Conversation<'_, T> {
    /// (Repeated) start and write to `address`
    pub fn write(&self, address: u8, data: &[u8]) -> Result<()> {
        self.bus.write(address, data)
    }

    /// (Repeated) start and read `count` bytes from `address`
    pub fn read(&self, address: u8, count: usize) -> Result<Vec<u8>> {
        self.bus.read(address, count)
    }

    /// Send the stop condition and release the bus
    pub fn finish(mut self) -> Result<()> {
        self.finished = true;
        self.bus.send_stop()
    }
}

impl<T: Transport> Drop for Conversation<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.bus.send_stop() {
                log::warn!("Failed to send I2C stop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::{Command, DummyMpsse, PinBank};
    use crate::protocol::Opcode;

    fn bus(dummy: &DummyMpsse) -> I2cBus<DummyMpsse> {
        I2cBus::new(dummy.clone(), &MpsseConfig::default(), &I2cConfig::default()).unwrap()
    }

    /// ADBUS values set by pin commands, in order
    fn pin_history(commands: &[Command]) -> Vec<u8> {
        commands
            .iter()
            .filter(|c| c.opcode == Opcode::SetBitsLow.value())
            .map(|c| c.args[0])
            .collect()
    }

    /// Count (start, stop) transitions in a pin history that begins idle
    fn count_conditions(history: &[u8]) -> (usize, usize) {
        let idle = BusState::IDLE.pin_values();
        let data_low = BusState::DATA_LOW.pin_values();
        let mut previous = idle;
        let (mut starts, mut stops) = (0, 0);
        for &value in history {
            if previous == idle && value == data_low {
                starts += 1;
            }
            if previous == data_low && value == idle {
                stops += 1;
            }
            previous = value;
        }
        (starts, stops)
    }

    #[test]
    fn test_pin_encoding() {
        assert_eq!(BusState::IDLE.pin_values(), 0x03);
        assert_eq!(BusState::CLOCK_LOW.pin_values(), 0x02);
        assert_eq!(BusState::DATA_LOW.pin_values(), 0x01);
        assert_eq!(BusState::BOTH_LOW.pin_values(), 0x00);
    }

    #[test]
    fn test_control_byte() {
        assert_eq!(control_byte(0x60, Direction::Read), 0xC1);
        assert_eq!(control_byte(0x60, Direction::Write), 0xC0);
    }

    #[test]
    #[should_panic(expected = "address out of range")]
    fn test_eight_bit_address_panics() {
        control_byte(0x80, Direction::Write);
    }

    #[test]
    fn test_configuration() {
        let dummy = DummyMpsse::new();
        let _bus = bus(&dummy);
        assert_eq!(dummy.tristate(), (0x03, 0x00));
        assert!(dummy.three_phase());
        assert!(!dummy.adaptive());
        assert_eq!(dummy.divisor(), Some(49));
        assert_eq!(
            dummy.pins(GpioBank::Adbus),
            PinBank {
                value: 0x03,
                direction: 0x03
            }
        );
    }

    #[test]
    fn test_clock_override_is_capped() {
        let config = I2cConfig::new().with_clock_hz(1_000_000);
        assert_eq!(config.effective_clock_hz(), 400_000);
        let config = I2cConfig::new().with_clock_hz(100_000);
        assert_eq!(config.effective_clock_hz(), 100_000);

        let dummy = DummyMpsse::new();
        I2cBus::new(dummy.clone(), &MpsseConfig::default(), &config).unwrap();
        assert_eq!(dummy.divisor(), Some(199));
    }

    #[test]
    #[should_panic(expected = "at least one repetition")]
    fn test_zero_hold_builder_panics() {
        I2cConfig::new().with_hold_repetitions(0);
    }

    #[test]
    #[should_panic(expected = "must be non-zero")]
    fn test_zero_clock_builder_panics() {
        I2cConfig::new().with_clock_hz(0);
    }

    #[test]
    fn test_zero_values_rejected_at_construction() {
        let config = I2cConfig {
            hold_repetitions: Some(0),
            ..I2cConfig::default()
        };
        let err = I2cBus::new(DummyMpsse::new(), &MpsseConfig::default(), &config)
            .err()
            .unwrap();
        assert!(matches!(err, MpsseError::InvalidParameter(_)));

        let config = I2cConfig {
            clock_override_hz: Some(0),
            ..I2cConfig::default()
        };
        let err = I2cBus::new(DummyMpsse::new(), &MpsseConfig::default(), &config)
            .err()
            .unwrap();
        assert!(matches!(err, MpsseError::InvalidParameter(_)));
    }

    #[test]
    fn test_start_stop_restores_idle() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        let before = dummy.pins(GpioBank::Adbus);

        bus.send_start().unwrap();
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x00);
        bus.send_stop().unwrap();

        assert_eq!(dummy.pins(GpioBank::Adbus), before);
    }

    #[test]
    fn test_start_sequence() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        dummy.clear_commands();
        bus.send_start().unwrap();
        assert_eq!(
            pin_history(&dummy.commands()),
            vec![0x03, 0x03, 0x03, 0x03, 0x01, 0x01, 0x01, 0x01, 0x00]
        );
    }

    #[test]
    fn test_write_byte_ack() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        dummy.queue_input(&[0x00]);
        let ack = bus.write_byte_read_ack(0x42);
        bus.engine().flush().unwrap();
        assert_eq!(ack.byte(), 0);
        assert!(dummy
            .commands()
            .iter()
            .any(|c| c.is(Opcode::WriteBitsFallingMsb, &[7, 0x42])));
    }

    #[test]
    fn test_write_byte_nack() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        dummy.queue_input(&[0x01]);
        bus.write_byte_read_ack(0x42);
        match bus.engine().flush().unwrap_err() {
            MpsseError::Nack { byte } => assert_eq!(byte, 0x42),
            e => panic!("unexpected error: {}", e),
        }
        assert!(!bus.engine().is_desynchronized());
    }

    #[test]
    fn test_read_framing() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        dummy.clear_commands();
        // ACK for the control byte, then five data bytes
        dummy.queue_input(&[0x00, 0x10, 0x20, 0x30, 0x40, 0x50]);

        let conversation = bus.conversation();
        let data = conversation.read(0x60, 5).unwrap();
        conversation.finish().unwrap();
        assert_eq!(data, vec![0x10, 0x20, 0x30, 0x40, 0x50]);

        let commands = dummy.commands();
        let count = |opcode: Opcode, args: &[u8]| commands.iter().filter(|c| c.is(opcode, args)).count();
        assert_eq!(count(Opcode::WriteBitsFallingMsb, &[7, 0xC1]), 1);
        assert_eq!(count(Opcode::ReadBitsRisingMsb, &[7]), 5);
        assert_eq!(count(Opcode::WriteBitsFallingMsb, &[0, 0x00]), 4);
        assert_eq!(count(Opcode::WriteBitsFallingMsb, &[0, 0xFF]), 1);
        assert_eq!(count_conditions(&pin_history(&commands)), (1, 1));
    }

    #[test]
    fn test_write_flushes_once_after_start() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        let writes = dummy.bulk_writes();
        bus.write(0x50, &[0x01, 0x02, 0x03]).unwrap();
        // One flush for the start, one for the whole byte train
        assert_eq!(dummy.bulk_writes() - writes, 2);
        let acked: Vec<u8> = dummy
            .commands()
            .iter()
            .filter(|c| c.opcode == Opcode::WriteBitsFallingMsb.value() && c.args[0] == 7)
            .map(|c| c.args[1])
            .collect();
        assert_eq!(acked, vec![0xA0, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_probe_and_scan() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        dummy.queue_input(&[0x01]);
        assert!(!bus.probe_address(0x20).unwrap());
        assert!(bus.probe_address(0x21).unwrap());
        // Bus is idle after a rejected probe
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x03);

        // Only 0x08 answers
        dummy.queue_input(&[0x00]);
        dummy.queue_input(&vec![0x01; usize::from(SCAN_LAST_ADDRESS - SCAN_FIRST_ADDRESS)]);
        assert_eq!(bus.scan().unwrap(), vec![0x08]);
    }

    #[test]
    fn test_dropped_conversation_sends_stop() {
        let dummy = DummyMpsse::new();
        let bus = bus(&dummy);
        {
            let conversation = bus.conversation();
            conversation.write(0x10, &[]).unwrap();
            assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x02);
        }
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x03);
    }

    #[test]
    fn test_no_clock_stretching() {
        let dummy = DummyMpsse::new();
        assert!(!bus(&dummy).supports_clock_stretching());
    }

    #[test]
    fn test_options() {
        let mut config = I2cConfig::default();
        assert!(config.apply_option("frequency", "100000").unwrap());
        assert!(config.apply_option("hold", "8").unwrap());
        assert!(!config.apply_option("latency", "2").unwrap());
        assert_eq!(config.effective_clock_hz(), 100_000);
        assert_eq!(config.effective_hold_repetitions(), 8);
        assert!(config.apply_option("hold", "0").is_err());
        assert!(config.apply_option("i2cmode", "turbo").is_err());
    }
}

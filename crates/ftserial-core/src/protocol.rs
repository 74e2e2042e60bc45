//! FTDI MPSSE protocol constants and opcode selection
//!
//! Based on FTDI AN_108 (MPSSE command processor) and AN_135 (MPSSE basics).

use bitflags::bitflags;

// ============================================================================
// Modem status framing
// ============================================================================

/// First byte of every bulk-read chunk
pub const MODEM_STATUS_SENTINEL: u8 = 0x32;

/// Status flags byte the FT232H reports while idle
pub const MODEM_STATUS_DEFAULT: u8 = 0x60;

/// Number of modem-status bytes prefixed to every bulk-read chunk
pub const MODEM_STATUS_SIZE: usize = 2;

/// First byte of the reply to an unknown opcode
pub const BAD_COMMAND: u8 = 0xFA;

// ============================================================================
// Engine limits
// ============================================================================

/// Internal reference clock with divide-by-5 disabled
pub const INTERNAL_CLOCK_HZ: u32 = 60_000_000;

/// Bulk reads attempted per flush before giving up on outstanding replies
pub const FLUSH_READ_RETRIES: usize = 7;

/// Largest payload a single byte-clocking command can carry
pub const MAX_BYTES_PER_COMMAND: usize = 65536;

/// Default latency timer in milliseconds (the FT232H power-on value)
pub const DEFAULT_LATENCY_MS: u16 = 16;

/// Number of bytes shown by [`hex_preview`] before eliding
const PREVIEW_LEN: usize = 10;

// ============================================================================
// MPSSE opcodes
// ============================================================================

/// MPSSE command opcodes
///
/// "Rising"/"Falling" name the clock edge the data is valid on.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    WriteBytesRisingMsb = 0x10,
    WriteBytesFallingMsb = 0x11,
    WriteBitsRisingMsb = 0x12,
    WriteBitsFallingMsb = 0x13,
    WriteBytesRisingLsb = 0x18,
    WriteBytesFallingLsb = 0x19,
    WriteBitsRisingLsb = 0x1A,
    WriteBitsFallingLsb = 0x1B,
    ReadBytesRisingMsb = 0x20,
    ReadBitsRisingMsb = 0x22,
    ReadBytesFallingMsb = 0x24,
    ReadBitsFallingMsb = 0x26,
    ReadBytesRisingLsb = 0x28,
    ReadBitsRisingLsb = 0x2A,
    ReadBytesFallingLsb = 0x2C,
    ReadBitsFallingLsb = 0x2E,
    /// Set value and direction of ADBUS pins
    SetBitsLow = 0x80,
    /// Read ADBUS pins
    GetBitsLow = 0x81,
    /// Set value and direction of ACBUS pins
    SetBitsHigh = 0x82,
    /// Read ACBUS pins
    GetBitsHigh = 0x83,
    LoopbackStart = 0x84,
    LoopbackEnd = 0x85,
    /// Set clock divisor (16-bit little endian argument)
    SetClockDivisor = 0x86,
    /// Flush the device's reply buffer to the host
    SendImmediate = 0x87,
    /// 60 MHz internal clock
    DisableClockDivide5 = 0x8A,
    /// 12 MHz internal clock
    EnableClockDivide5 = 0x8B,
    EnableThreePhase = 0x8C,
    DisableThreePhase = 0x8D,
    EnableAdaptiveClock = 0x96,
    DisableAdaptiveClock = 0x97,
    /// Drive on '0', tristate on '1' (masks for low and high bank)
    OnlyDriveZero = 0x9E,
    /// Deliberately invalid; provokes a "bad command" reply
    Bogus = 0xAB,
}

impl Opcode {
    /// Every opcode the engine knows how to issue
    pub const ALL: &'static [Opcode] = &[
        Opcode::WriteBytesRisingMsb,
        Opcode::WriteBytesFallingMsb,
        Opcode::WriteBitsRisingMsb,
        Opcode::WriteBitsFallingMsb,
        Opcode::WriteBytesRisingLsb,
        Opcode::WriteBytesFallingLsb,
        Opcode::WriteBitsRisingLsb,
        Opcode::WriteBitsFallingLsb,
        Opcode::ReadBytesRisingMsb,
        Opcode::ReadBitsRisingMsb,
        Opcode::ReadBytesFallingMsb,
        Opcode::ReadBitsFallingMsb,
        Opcode::ReadBytesRisingLsb,
        Opcode::ReadBitsRisingLsb,
        Opcode::ReadBytesFallingLsb,
        Opcode::ReadBitsFallingLsb,
        Opcode::SetBitsLow,
        Opcode::GetBitsLow,
        Opcode::SetBitsHigh,
        Opcode::GetBitsHigh,
        Opcode::LoopbackStart,
        Opcode::LoopbackEnd,
        Opcode::SetClockDivisor,
        Opcode::SendImmediate,
        Opcode::DisableClockDivide5,
        Opcode::EnableClockDivide5,
        Opcode::EnableThreePhase,
        Opcode::DisableThreePhase,
        Opcode::EnableAdaptiveClock,
        Opcode::DisableAdaptiveClock,
        Opcode::OnlyDriveZero,
        Opcode::Bogus,
    ];

    /// Raw opcode byte
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Look up an opcode by its raw byte
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.value() == value)
    }
}

// ============================================================================
// Clocked data selection
// ============================================================================

/// Relationship between clock state and the period data is valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataWindow {
    /// Valid on the transition to high
    RisingEdge,
    /// Valid on the transition to low
    FallingEdge,
    /// Valid while the clock is high (3-phase clocking)
    HighClock,
}

/// Order in which the bits of a datum are shifted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Most-significant bit first
    #[default]
    Msb,
    /// Least-significant bit first
    Lsb,
}

/// Whether a clocking command counts bits or bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Bits,
    Bytes,
}

/// Opcode for clocking data out
///
/// The high-clock window uses the falling-edge opcode. AN_113 does this in
/// its I2C examples; it has not been checked against the chip's timing.
pub fn write_opcode(order: BitOrder, window: DataWindow, granularity: Granularity) -> Opcode {
    let falling = matches!(window, DataWindow::FallingEdge | DataWindow::HighClock);
    match (order, granularity, falling) {
        (BitOrder::Msb, Granularity::Bytes, false) => Opcode::WriteBytesRisingMsb,
        (BitOrder::Msb, Granularity::Bytes, true) => Opcode::WriteBytesFallingMsb,
        (BitOrder::Msb, Granularity::Bits, false) => Opcode::WriteBitsRisingMsb,
        (BitOrder::Msb, Granularity::Bits, true) => Opcode::WriteBitsFallingMsb,
        (BitOrder::Lsb, Granularity::Bytes, false) => Opcode::WriteBytesRisingLsb,
        (BitOrder::Lsb, Granularity::Bytes, true) => Opcode::WriteBytesFallingLsb,
        (BitOrder::Lsb, Granularity::Bits, false) => Opcode::WriteBitsRisingLsb,
        (BitOrder::Lsb, Granularity::Bits, true) => Opcode::WriteBitsFallingLsb,
    }
}

/// Opcode for clocking data in
///
/// The high-clock window samples on the rising edge.
pub fn read_opcode(order: BitOrder, window: DataWindow, granularity: Granularity) -> Opcode {
    let falling = matches!(window, DataWindow::FallingEdge);
    match (order, granularity, falling) {
        (BitOrder::Msb, Granularity::Bytes, false) => Opcode::ReadBytesRisingMsb,
        (BitOrder::Msb, Granularity::Bytes, true) => Opcode::ReadBytesFallingMsb,
        (BitOrder::Msb, Granularity::Bits, false) => Opcode::ReadBitsRisingMsb,
        (BitOrder::Msb, Granularity::Bits, true) => Opcode::ReadBitsFallingMsb,
        (BitOrder::Lsb, Granularity::Bytes, false) => Opcode::ReadBytesRisingLsb,
        (BitOrder::Lsb, Granularity::Bytes, true) => Opcode::ReadBytesFallingLsb,
        (BitOrder::Lsb, Granularity::Bits, false) => Opcode::ReadBitsRisingLsb,
        (BitOrder::Lsb, Granularity::Bits, true) => Opcode::ReadBitsFallingLsb,
    }
}

/// Compute the clock divisor for a target frequency
///
/// `divisor = internal / (edges * frequency) - 1`, clamped to 16 bits, with
/// three internal edges per bit under 3-phase clocking and two otherwise.
pub fn clock_divisor(internal_hz: u32, frequency_hz: u32, three_phase: bool) -> u16 {
    assert!(frequency_hz > 0, "clock frequency must be non-zero");
    let edges: i64 = if three_phase { 3 } else { 2 };
    let divisor = i64::from(internal_hz) / (edges * i64::from(frequency_hz)) - 1;
    divisor.clamp(0, i64::from(u16::MAX)) as u16
}

/// Clock frequency produced by a divisor
pub fn divisor_frequency(internal_hz: u32, divisor: u16, three_phase: bool) -> u32 {
    let edges = if three_phase { 3 } else { 2 };
    internal_hz / (edges * (u32::from(divisor) + 1))
}

// ============================================================================
// Pins
// ============================================================================

/// One of the two 8-bit GPIO groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpioBank {
    /// ADBUS 7-0, the low byte (carries the serial pins)
    Adbus,
    /// ACBUS 7-0, the high byte
    Acbus,
}

impl GpioBank {
    /// Opcode that sets values and directions for this bank
    pub fn set_opcode(self) -> Opcode {
        match self {
            GpioBank::Adbus => Opcode::SetBitsLow,
            GpioBank::Acbus => Opcode::SetBitsHigh,
        }
    }

    /// Opcode that reads this bank's pins
    pub fn get_opcode(self) -> Opcode {
        match self {
            GpioBank::Adbus => Opcode::GetBitsLow,
            GpioBank::Acbus => Opcode::GetBitsHigh,
        }
    }

    /// Array slot used by per-bank caches
    pub fn index(self) -> usize {
        match self {
            GpioBank::Adbus => 0,
            GpioBank::Acbus => 1,
        }
    }

    /// Parse bank from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "adbus" | "low" | "d" => Some(GpioBank::Adbus),
            "acbus" | "high" | "c" => Some(GpioBank::Acbus),
            _ => None,
        }
    }

    /// Get the name of this bank
    pub fn name(self) -> &'static str {
        match self {
            GpioBank::Adbus => "ADBUS",
            GpioBank::Acbus => "ACBUS",
        }
    }
}

bitflags! {
    /// ADBUS pins used by the serial engine
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SerialPins: u8 {
        /// TCK/SK (clock, I2C SCL)
        const CLOCK = 1 << 0;
        /// TDI/DO (data out, I2C SDA)
        const DATA_OUT = 1 << 1;
        /// TDO/DI (data in)
        const DATA_IN = 1 << 2;

        const OUTPUTS = Self::CLOCK.bits() | Self::DATA_OUT.bits();
        const INPUTS = Self::DATA_IN.bits();
    }
}

// ============================================================================
// Vendor control requests
// ============================================================================

/// SIO vendor requests understood by FTDI adapters
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorRequest {
    Reset = 0x00,
    ModemCtrl = 0x01,
    SetFlowCtrl = 0x02,
    SetBaudRate = 0x03,
    SetData = 0x04,
    PollModemStatus = 0x05,
    SetEventChar = 0x06,
    SetErrorChar = 0x07,
    /// wValue = latency in milliseconds
    SetLatencyTimer = 0x09,
    GetLatencyTimer = 0x0A,
    /// wValue = mode << 8 | output pin mask
    SetBitMode = 0x0B,
    ReadPins = 0x0C,
}

impl VendorRequest {
    /// Raw bRequest value
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Major operating modes of the adapter
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitMode {
    Reset = 0x00,
    Mpsse = 0x02,
}

impl BitMode {
    /// wValue for a SetBitMode request
    pub fn request_value(self, output_mask: u8) -> u16 {
        (u16::from(self as u8) << 8) | u16::from(output_mask)
    }
}

/// Render a short hex prefix of a buffer for diagnostics
pub fn hex_preview(data: &[u8]) -> String {
    let mut out = data
        .iter()
        .take(PREVIEW_LEN)
        .map(|b| format!("0x{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_mode_divisor() {
        assert_eq!(clock_divisor(INTERNAL_CLOCK_HZ, 400_000, true), 49);
        assert_eq!(clock_divisor(INTERNAL_CLOCK_HZ, 400_000, false), 74);
    }

    #[test]
    fn test_divisor_clamps() {
        assert_eq!(clock_divisor(INTERNAL_CLOCK_HZ, 60_000_000, false), 0);
        assert_eq!(clock_divisor(INTERNAL_CLOCK_HZ, 1, true), u16::MAX);
        assert_eq!(divisor_frequency(INTERNAL_CLOCK_HZ, 49, true), 400_000);
    }

    #[test]
    fn test_high_clock_window_opcodes() {
        assert_eq!(
            write_opcode(BitOrder::Msb, DataWindow::HighClock, Granularity::Bits),
            Opcode::WriteBitsFallingMsb
        );
        assert_eq!(
            write_opcode(BitOrder::Lsb, DataWindow::HighClock, Granularity::Bytes),
            Opcode::WriteBytesFallingLsb
        );
        assert_eq!(
            read_opcode(BitOrder::Msb, DataWindow::HighClock, Granularity::Bits),
            Opcode::ReadBitsRisingMsb
        );
        assert_eq!(
            read_opcode(BitOrder::Lsb, DataWindow::HighClock, Granularity::Bytes),
            Opcode::ReadBytesRisingLsb
        );
    }

    #[test]
    fn test_edge_opcodes() {
        assert_eq!(
            write_opcode(BitOrder::Msb, DataWindow::RisingEdge, Granularity::Bytes).value(),
            0x10
        );
        assert_eq!(
            write_opcode(BitOrder::Lsb, DataWindow::RisingEdge, Granularity::Bits).value(),
            0x1A
        );
        assert_eq!(
            read_opcode(BitOrder::Msb, DataWindow::FallingEdge, Granularity::Bytes).value(),
            0x24
        );
        assert_eq!(
            read_opcode(BitOrder::Lsb, DataWindow::FallingEdge, Granularity::Bits).value(),
            0x2E
        );
    }

    #[test]
    fn test_opcode_lookup() {
        assert_eq!(Opcode::from_u8(0xAB), Some(Opcode::Bogus));
        assert_eq!(Opcode::from_u8(0x9E), Some(Opcode::OnlyDriveZero));
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_bitmode_value() {
        assert_eq!(BitMode::Mpsse.request_value(0x03), 0x0203);
        assert_eq!(BitMode::Reset.request_value(0), 0);
    }

    #[test]
    fn test_hex_preview_is_bounded() {
        assert_eq!(hex_preview(&[0x32, 0x60]), "0x32 0x60");
        let long = [0u8; 12];
        assert!(hex_preview(&long).ends_with("..."));
        assert_eq!(hex_preview(&long).matches("0x").count(), 10);
    }
}

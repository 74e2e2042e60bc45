//! FTDI USB identifiers and channel layout

// ============================================================================
// USB VID/PID constants
// ============================================================================

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;

/// FT2232H product ID (dual channel)
pub const FTDI_FT2232H_PID: u16 = 0x6010;

/// FT4232H product ID (quad channel)
pub const FTDI_FT4232H_PID: u16 = 0x6011;

/// FT232H product ID (single channel)
pub const FTDI_FT232H_PID: u16 = 0x6014;

/// FT4233H product ID (quad channel)
pub const FTDI_FT4233H_PID: u16 = 0x6041;

// ============================================================================
// Supported device types
// ============================================================================

/// FTDI parts with an MPSSE on at least one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FtdiDeviceType {
    /// FT232H (single channel, 60 MHz)
    #[default]
    Ft232H,
    /// FT2232H (dual channel, 60 MHz)
    Ft2232H,
    /// FT4232H (quad channel, MPSSE on A and B)
    Ft4232H,
    /// FT4233H (quad channel, MPSSE on A and B)
    Ft4233H,
}

impl FtdiDeviceType {
    pub const ALL: &'static [FtdiDeviceType] = &[
        FtdiDeviceType::Ft232H,
        FtdiDeviceType::Ft2232H,
        FtdiDeviceType::Ft4232H,
        FtdiDeviceType::Ft4233H,
    ];

    /// Get the vendor ID for this device type
    pub fn vendor_id(&self) -> u16 {
        FTDI_VID
    }

    /// Get the product ID for this device type
    pub fn product_id(&self) -> u16 {
        match self {
            FtdiDeviceType::Ft232H => FTDI_FT232H_PID,
            FtdiDeviceType::Ft2232H => FTDI_FT2232H_PID,
            FtdiDeviceType::Ft4232H => FTDI_FT4232H_PID,
            FtdiDeviceType::Ft4233H => FTDI_FT4233H_PID,
        }
    }

    /// Number of channels on the part
    pub fn channels(&self) -> u8 {
        match self {
            FtdiDeviceType::Ft232H => 1,
            FtdiDeviceType::Ft2232H => 2,
            FtdiDeviceType::Ft4232H | FtdiDeviceType::Ft4233H => 4,
        }
    }

    /// Whether `interface` has an MPSSE on this part
    pub fn has_mpsse(&self, interface: FtdiInterface) -> bool {
        match self {
            FtdiDeviceType::Ft232H => interface == FtdiInterface::A,
            FtdiDeviceType::Ft2232H | FtdiDeviceType::Ft4232H | FtdiDeviceType::Ft4233H => {
                matches!(interface, FtdiInterface::A | FtdiInterface::B)
            }
        }
    }

    /// Look up the device type for a VID/PID pair
    pub fn from_ids(vendor_id: u16, product_id: u16) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.vendor_id() == vendor_id && t.product_id() == product_id)
    }

    /// Parse device type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "232h" | "ft232h" => Some(FtdiDeviceType::Ft232H),
            "2232h" | "ft2232h" => Some(FtdiDeviceType::Ft2232H),
            "4232h" | "ft4232h" => Some(FtdiDeviceType::Ft4232H),
            "4233h" | "ft4233h" => Some(FtdiDeviceType::Ft4233H),
            _ => None,
        }
    }

    /// Get the name of this device type
    pub fn name(&self) -> &'static str {
        match self {
            FtdiDeviceType::Ft232H => "FT232H",
            FtdiDeviceType::Ft2232H => "FT2232H",
            FtdiDeviceType::Ft4232H => "FT4232H",
            FtdiDeviceType::Ft4233H => "FT4233H",
        }
    }
}

/// FTDI interface/channel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FtdiInterface {
    /// Channel A (default)
    #[default]
    A,
    /// Channel B
    B,
    /// Channel C
    C,
    /// Channel D
    D,
}

impl FtdiInterface {
    /// Parse interface from character
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(FtdiInterface::A),
            'B' => Some(FtdiInterface::B),
            'C' => Some(FtdiInterface::C),
            'D' => Some(FtdiInterface::D),
            _ => None,
        }
    }

    /// USB interface number (0-3)
    pub fn index(&self) -> u8 {
        match self {
            FtdiInterface::A => 0,
            FtdiInterface::B => 1,
            FtdiInterface::C => 2,
            FtdiInterface::D => 3,
        }
    }

    /// `wIndex` of vendor requests addressed to this channel (1-based)
    pub fn request_index(&self) -> u16 {
        u16::from(self.index()) + 1
    }

    /// Bulk OUT endpoint address
    pub fn write_endpoint(&self) -> u8 {
        0x02 + 2 * self.index()
    }

    /// Bulk IN endpoint address
    pub fn read_endpoint(&self) -> u8 {
        0x81 + 2 * self.index()
    }

    /// Get the channel letter
    pub fn letter(&self) -> char {
        match self {
            FtdiInterface::A => 'A',
            FtdiInterface::B => 'B',
            FtdiInterface::C => 'C',
            FtdiInterface::D => 'D',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(FtdiInterface::A.write_endpoint(), 0x02);
        assert_eq!(FtdiInterface::A.read_endpoint(), 0x81);
        assert_eq!(FtdiInterface::B.write_endpoint(), 0x04);
        assert_eq!(FtdiInterface::B.read_endpoint(), 0x83);
        assert_eq!(FtdiInterface::D.request_index(), 4);
    }

    #[test]
    fn test_device_lookup() {
        assert_eq!(
            FtdiDeviceType::from_ids(0x0403, 0x6010),
            Some(FtdiDeviceType::Ft2232H)
        );
        assert_eq!(FtdiDeviceType::from_ids(0x0403, 0x6001), None);
        assert_eq!(FtdiDeviceType::parse("FT4232H"), Some(FtdiDeviceType::Ft4232H));
    }

    #[test]
    fn test_mpsse_channels() {
        assert!(FtdiDeviceType::Ft4232H.has_mpsse(FtdiInterface::B));
        assert!(!FtdiDeviceType::Ft4232H.has_mpsse(FtdiInterface::C));
        assert!(!FtdiDeviceType::Ft232H.has_mpsse(FtdiInterface::B));
    }
}

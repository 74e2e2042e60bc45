//! nusb-backed transport for FTDI MPSSE adapters
//!
//! This module provides `UsbTransport`, which claims one channel of an
//! FTDI 'H' part and moves raw bytes for the MPSSE engine: bulk writes of
//! command batches, bulk reads of single packets (modem-status header
//! included) and vendor control requests addressed to the channel.

use std::time::Duration;

use ftserial_core::{MpsseError, Transport};
use nusb::transfer::{Buffer, Bulk, ControlOut, ControlType, In, Out, Recipient, TransferError};
use nusb::{DeviceInfo, Endpoint, MaybeFuture};

use crate::error::{Result, UsbError};
use crate::protocol::*;

/// Default timeout for every USB transfer
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which adapter to open and how to talk to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbConfig {
    /// Restrict to one part; `None` matches any supported part
    pub device_type: Option<FtdiDeviceType>,
    /// Channel to claim
    pub interface: FtdiInterface,
    /// USB serial number filter
    pub serial: Option<String>,
    /// Index among the matching devices
    pub index: usize,
    /// Timeout for each bulk and control transfer
    pub timeout: Duration,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            device_type: None,
            interface: FtdiInterface::A,
            serial: None,
            index: 0,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl UsbConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Only match one device type
    pub fn device_type(mut self, device_type: FtdiDeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    /// Select the channel to claim
    pub fn interface(mut self, interface: FtdiInterface) -> Self {
        self.interface = interface;
        self
    }

    /// Only match a device with this serial number
    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// Whether an enumerated device passes the type and serial filters
    fn matches(&self, info: &DeviceInfo) -> bool {
        let Some(found) = FtdiDeviceType::from_ids(info.vendor_id(), info.product_id()) else {
            return false;
        };
        if self.device_type.is_some_and(|wanted| wanted != found) {
            return false;
        }
        match &self.serial {
            Some(serial) => info.serial_number() == Some(serial.as_str()),
            None => true,
        }
    }

    /// Apply one `key=value` programmer option
    ///
    /// Returns `Ok(false)` if the key is not a USB option.
    ///
    /// - `type=<device>`: 232h, 2232h, 4232h or 4233h (default: any)
    /// - `port=<A|B|C|D>`: channel (default: A)
    /// - `serial=<string>`: USB serial number filter
    /// - `index=<n>`: nth matching device (default: 0)
    /// - `timeout=<ms>`: transfer timeout (default: 5000)
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<bool> {
        match key {
            "type" => {
                let device_type = FtdiDeviceType::parse(value).ok_or_else(|| {
                    UsbError::InvalidDeviceType(format!(
                        "Unknown device type '{}'. Valid types: 232h, 2232h, 4232h, 4233h",
                        value
                    ))
                })?;
                self.device_type = Some(device_type);
            }
            "port" | "channel" => {
                let mut chars = value.chars();
                let interface = match (chars.next(), chars.next()) {
                    (Some(c), None) => FtdiInterface::from_char(c),
                    _ => None,
                }
                .ok_or_else(|| {
                    UsbError::InvalidChannel(format!(
                        "Invalid channel '{}': must be A, B, C, or D",
                        value
                    ))
                })?;
                self.interface = interface;
            }
            "serial" => {
                self.serial = Some(value.to_string());
            }
            "index" => {
                self.index = value.parse().map_err(|_| {
                    UsbError::InvalidParameter(format!("Invalid index '{}'", value))
                })?;
            }
            "timeout" => {
                let ms: u64 = value.parse().map_err(|_| {
                    UsbError::InvalidParameter(format!("Invalid timeout '{}'", value))
                })?;
                if ms == 0 {
                    return Err(UsbError::InvalidParameter(
                        "timeout must be non-zero".to_string(),
                    ));
                }
                self.timeout = Duration::from_millis(ms);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// One claimed channel of an FTDI adapter
pub struct UsbTransport {
    interface: nusb::Interface,
    /// Bulk OUT endpoint for command batches
    out_ep: Endpoint<Bulk, Out>,
    /// Bulk IN endpoint for status/reply packets
    in_ep: Endpoint<Bulk, In>,
    device_type: FtdiDeviceType,
    channel: FtdiInterface,
    timeout: Duration,
}

impl UsbTransport {
    /// Open the device selected by `config` and claim its channel
    pub fn open(config: &UsbConfig) -> Result<Self> {
        let devices: Vec<DeviceInfo> = nusb::list_devices()
            .wait()
            .map_err(|e| UsbError::OpenFailed(e.to_string()))?
            .filter(|d| config.matches(d))
            .collect();

        let device_info = devices.get(config.index).ok_or_else(|| {
            let mut filter = String::new();
            if let Some(device_type) = config.device_type {
                filter.push_str(&format!(" of type {}", device_type.name()));
            }
            if let Some(serial) = &config.serial {
                filter.push_str(&format!(" with serial {}", serial));
            }
            if config.index > 0 {
                filter.push_str(&format!(" at index {}", config.index));
            }
            UsbError::DeviceNotFound(filter)
        })?;

        let device_type = FtdiDeviceType::from_ids(device_info.vendor_id(), device_info.product_id())
            .ok_or_else(|| UsbError::DeviceNotFound(String::new()))?;
        if !device_type.has_mpsse(config.interface) {
            return Err(UsbError::InvalidChannel(format!(
                "{} has no MPSSE on channel {}",
                device_type.name(),
                config.interface.letter()
            )));
        }

        log::info!(
            "Opening FTDI {} channel {} at bus {} address {}",
            device_type.name(),
            config.interface.letter(),
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| UsbError::OpenFailed(e.to_string()))?;

        // ftdi_sio usually owns the channel
        let interface = device
            .detach_and_claim_interface(config.interface.index())
            .wait()
            .map_err(|e| UsbError::ClaimFailed(e.to_string()))?;

        let out_ep = interface
            .endpoint::<Bulk, Out>(config.interface.write_endpoint())
            .map_err(|e| UsbError::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(config.interface.read_endpoint())
            .map_err(|e| UsbError::ClaimFailed(e.to_string()))?;

        log::debug!(
            "Using interface {}, IN EP 0x{:02X}, OUT EP 0x{:02X}",
            config.interface.index(),
            config.interface.read_endpoint(),
            config.interface.write_endpoint()
        );

        Ok(Self {
            interface,
            out_ep,
            in_ep,
            device_type,
            channel: config.interface,
            timeout: config.timeout,
        })
    }

    /// List all connected FTDI MPSSE adapters
    pub fn list_devices() -> Result<Vec<FtdiDeviceInfo>> {
        let devices = nusb::list_devices()
            .wait()?
            .filter_map(|d| {
                let device_type = FtdiDeviceType::from_ids(d.vendor_id(), d.product_id())?;
                Some(FtdiDeviceInfo {
                    bus: d.busnum(),
                    address: d.device_address(),
                    device_type,
                    serial: d.serial_number().map(String::from),
                })
            })
            .collect();
        Ok(devices)
    }

    pub fn device_type(&self) -> FtdiDeviceType {
        self.device_type
    }

    pub fn channel(&self) -> FtdiInterface {
        self.channel
    }
}

fn transfer_error(e: impl std::fmt::Display) -> MpsseError {
    UsbError::TransferFailed(e.to_string()).into()
}

impl Transport for UsbTransport {
    fn bulk_write(&mut self, data: &[u8]) -> ftserial_core::Result<()> {
        let mut buf = Buffer::new(data.len());
        buf.extend_from_slice(data);

        let completion = self.out_ep.transfer_blocking(buf, self.timeout);
        completion.into_result().map_err(transfer_error)?;

        log::trace!("USB write {} bytes", data.len());
        Ok(())
    }

    /// Read one packet; a timed-out read yields an empty chunk
    fn bulk_read(&mut self) -> ftserial_core::Result<Vec<u8>> {
        // One packet per read so every chunk carries exactly one status header
        let max_packet_size = self.in_ep.max_packet_size();
        let mut buf = Buffer::new(max_packet_size);
        buf.set_requested_len(max_packet_size);

        let completion = self.in_ep.transfer_blocking(buf, self.timeout);
        match completion.into_result() {
            Ok(data) => {
                log::trace!("USB read {} bytes", data.len());
                Ok(data.into_vec())
            }
            Err(TransferError::Cancelled) => {
                log::trace!("USB read timed out");
                Ok(Vec::new())
            }
            Err(e) => Err(transfer_error(e)),
        }
    }

    fn control_out(&mut self, request: u8, value: u16, data: &[u8]) -> ftserial_core::Result<()> {
        self.interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: self.channel.request_index(),
                    data,
                },
                self.timeout,
            )
            .wait()
            .map_err(transfer_error)
    }
}

/// Information about a connected FTDI adapter
#[derive(Debug, Clone)]
pub struct FtdiDeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    pub device_type: FtdiDeviceType,
    /// Serial number (if the descriptor has one)
    pub serial: Option<String>,
}

impl std::fmt::Display for FtdiDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FTDI {} at bus {} address {} ({:04X}:{:04X})",
            self.device_type.name(),
            self.bus,
            self.address,
            self.device_type.vendor_id(),
            self.device_type.product_id()
        )?;
        if let Some(serial) = &self.serial {
            write!(f, " serial {}", serial)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options() {
        let mut config = UsbConfig::default();
        assert!(config.apply_option("type", "2232h").unwrap());
        assert!(config.apply_option("port", "b").unwrap());
        assert!(config.apply_option("serial", "FT1234").unwrap());
        assert!(config.apply_option("index", "1").unwrap());
        assert!(config.apply_option("timeout", "250").unwrap());
        assert!(!config.apply_option("frequency", "100000").unwrap());

        assert_eq!(config.device_type, Some(FtdiDeviceType::Ft2232H));
        assert_eq!(config.interface, FtdiInterface::B);
        assert_eq!(config.serial.as_deref(), Some("FT1234"));
        assert_eq!(config.index, 1);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_options() {
        let mut config = UsbConfig::default();
        assert!(matches!(
            config.apply_option("port", "AB"),
            Err(UsbError::InvalidChannel(_))
        ));
        assert!(matches!(
            config.apply_option("type", "232r"),
            Err(UsbError::InvalidDeviceType(_))
        ));
        assert!(config.apply_option("timeout", "0").is_err());
    }

    #[test]
    fn test_error_conversion() {
        let e: MpsseError = UsbError::InvalidChannel("E".into()).into();
        assert!(matches!(e, MpsseError::InvalidParameter(_)));
        let e: MpsseError = UsbError::TransferFailed("stall".into()).into();
        assert!(matches!(e, MpsseError::Transport(_)));
    }
}

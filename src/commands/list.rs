//! List command implementation

use crate::programmers;

/// List programmers and attached adapters
pub fn run_list() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", programmers::programmer_help());

    #[cfg(feature = "usb")]
    {
        let devices = ftserial_usb::UsbTransport::list_devices()?;
        if devices.is_empty() {
            println!("No FTDI adapters found.");
        } else {
            println!("Attached FTDI adapters:");
            for (index, device) in devices.iter().enumerate() {
                println!("  [{}] {}", index, device);
            }
        }
    }

    Ok(())
}

//! I2C target at a fixed address on a shared bus

use std::sync::Arc;

use crate::error::Result;
use crate::i2c::I2cBus;
use crate::transport::Transport;

/// Handle to one I2C target
///
/// Every operation is a complete conversation: it holds the bus's
/// conversation lock from the start condition until the stop has been
/// sent, so handles for different targets on one bus can be used from
/// several threads without interleaving their framing.
pub struct I2cDevice<T: Transport> {
    bus: Arc<I2cBus<T>>,
    address: u8,
}

impl<T: Transport> I2cDevice<T> {
    /// Create a handle for the 7-bit `address`
    ///
    /// # Panics
    ///
    /// Panics if `address` does not fit in 7 bits.
    pub fn new(bus: Arc<I2cBus<T>>, address: u8) -> Self {
        assert!(address < 0x80, "I2C address out of range: 0x{:02x}", address);
        Self { bus, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn bus(&self) -> &Arc<I2cBus<T>> {
        &self.bus
    }

    /// Write `data` to the target, then stop
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let conversation = self.bus.conversation();
        conversation.write(self.address, data)?;
        conversation.finish()
    }

    /// Read `count` bytes from the target, then stop
    pub fn read(&self, count: usize) -> Result<Vec<u8>> {
        let conversation = self.bus.conversation();
        let data = conversation.read(self.address, count)?;
        conversation.finish()?;
        Ok(data)
    }

    /// Write `data`, then read `count` bytes after a repeated start
    ///
    /// A single stop ends the conversation.
    pub fn write_and_read(&self, data: &[u8], count: usize) -> Result<Vec<u8>> {
        let conversation = self.bus.conversation();
        conversation.write(self.address, data)?;
        let response = conversation.read(self.address, count)?;
        conversation.finish()?;
        Ok(response)
    }

    /// Read `count` bytes starting at register `register`
    pub fn read_register(&self, register: u8, count: usize) -> Result<Vec<u8>> {
        self.write_and_read(&[register], count)
    }

    /// Write `data` starting at register `register`
    pub fn write_register(&self, register: u8, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(register);
        payload.extend_from_slice(data);
        self.write(&payload)
    }

    pub fn supports_clock_stretching(&self) -> bool {
        self.bus.supports_clock_stretching()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::DummyMpsse;
    use crate::error::MpsseError;
    use crate::i2c::I2cConfig;
    use crate::mpsse::MpsseConfig;
    use crate::protocol::{GpioBank, Opcode};
    use std::thread;

    fn device(dummy: &DummyMpsse, address: u8) -> I2cDevice<DummyMpsse> {
        let bus = I2cBus::new(dummy.clone(), &MpsseConfig::default(), &I2cConfig::default())
            .unwrap();
        I2cDevice::new(Arc::new(bus), address)
    }

    fn control_bytes(dummy: &DummyMpsse) -> Vec<u8> {
        dummy
            .commands()
            .iter()
            .filter(|c| c.opcode == Opcode::WriteBitsFallingMsb.value() && c.args[0] == 7)
            .map(|c| c.args[1])
            .collect()
    }

    #[test]
    fn test_read_stops_bus() {
        let dummy = DummyMpsse::new();
        let device = device(&dummy, 0x60);
        dummy.queue_input(&[0x00, 1, 2, 3, 4, 5]);
        assert_eq!(device.read(5).unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x03);
    }

    #[test]
    fn test_write_and_read_uses_repeated_start() {
        let dummy = DummyMpsse::new();
        let device = device(&dummy, 0x50);
        dummy.clear_commands();
        // ACKs for control byte and register, ACK for read control, data
        dummy.queue_input(&[0x00, 0x00, 0x00, 0xAA, 0xBB]);
        assert_eq!(device.read_register(0x10, 2).unwrap(), vec![0xAA, 0xBB]);
        assert_eq!(control_bytes(&dummy), vec![0xA0, 0x10, 0xA1]);

        // Exactly one stop: SDA released while SCL is released
        let history: Vec<u8> = dummy
            .commands()
            .iter()
            .filter(|c| c.opcode == Opcode::SetBitsLow.value())
            .map(|c| c.args[0])
            .collect();
        let stops = history.windows(2).filter(|w| **w == [0x01, 0x03]).count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_write_register() {
        let dummy = DummyMpsse::new();
        let device = device(&dummy, 0x50);
        device.write_register(0x02, &[0x11, 0x22]).unwrap();
        assert_eq!(control_bytes(&dummy), vec![0xA0, 0x02, 0x11, 0x22]);
    }

    #[test]
    fn test_nack_still_sends_stop() {
        let dummy = DummyMpsse::new();
        let device = device(&dummy, 0x50);
        dummy.queue_input(&[0x01]);
        let err = device.write(&[0x00]).unwrap_err();
        assert!(matches!(err, MpsseError::Nack { byte: 0xA0 }));
        assert_eq!(dummy.pins(GpioBank::Adbus).value, 0x03);
        // The bus is still usable
        device.write(&[0x00]).unwrap();
    }

    #[test]
    fn test_threads_do_not_interleave() {
        let dummy = DummyMpsse::new();
        let first = device(&dummy, 0x20);
        let second = I2cDevice::new(Arc::clone(first.bus()), 0x21);
        dummy.clear_commands();

        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|device| {
                thread::spawn(move || {
                    for _ in 0..10 {
                        device.write(&[device.address()]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Every conversation is a control byte followed by its own payload
        let bytes = control_bytes(&dummy);
        assert_eq!(bytes.len(), 40);
        for pair in bytes.chunks(2) {
            assert_eq!(pair[0] >> 1, pair[1]);
        }
    }

    #[test]
    #[should_panic(expected = "address out of range")]
    fn test_eight_bit_address_panics() {
        let dummy = DummyMpsse::new();
        device(&dummy, 0xA0);
    }
}

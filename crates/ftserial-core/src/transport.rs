//! Transport layer abstraction for MPSSE communication
//!
//! The engine only ever needs three USB operations: one bulk write per
//! flush, repeated bulk reads of raw chunks, and vendor control requests
//! for the port configuration sequence.

use crate::error::Result;

/// Blocking byte transport to an FTDI adapter interface
pub trait Transport {
    /// Write the whole buffer to the bulk OUT endpoint
    fn bulk_write(&mut self, data: &[u8]) -> Result<()>;

    /// Read one raw chunk from the bulk IN endpoint
    ///
    /// The chunk still carries its 2-byte modem-status header. An empty
    /// vector means nothing arrived before the transport's own timeout.
    fn bulk_read(&mut self) -> Result<Vec<u8>>;

    /// Issue a vendor control request to the adapter
    ///
    /// The implementation supplies `wIndex` for the interface it owns.
    fn control_out(&mut self, request: u8, value: u16, data: &[u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bulk_write(&mut self, data: &[u8]) -> Result<()> {
        (**self).bulk_write(data)
    }

    fn bulk_read(&mut self) -> Result<Vec<u8>> {
        (**self).bulk_read()
    }

    fn control_out(&mut self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        (**self).control_out(request, value, data)
    }
}

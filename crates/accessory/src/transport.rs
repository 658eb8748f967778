//! Transfer primitive seam
//!
//! The runtime consumes USB through the [`DeviceIo`] trait: vendor control
//! transfers for the handshake, bulk transfers for channel I/O, and
//! interface claim/release. [`RusbDeviceIo`] is the production
//! implementation over an opened `rusb` handle; tests script a mock against
//! the same trait.
//!
//! Methods return raw `rusb` results; callers annotate failures with the
//! operation that was running (see [`crate::error::Error::transport`]).

use rusb::{Context, DeviceHandle, Direction, Recipient, RequestType};
use std::time::Duration;

/// Default timeout for handshake control transfers.
pub(crate) const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// USB operations of one opened device handle.
///
/// Implementations must allow concurrent bulk IN and bulk OUT transfers;
/// the channel runs its read loop while writes are in flight.
pub trait DeviceIo: Send + Sync {
    /// Vendor control transfer, device to host.
    fn vendor_read(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Vendor control transfer, host to device.
    fn vendor_write(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    /// Bulk IN transfer; returns the number of bytes actually received.
    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    /// Bulk OUT transfer; returns the number of bytes actually sent.
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;

    fn claim_interface(&self, interface: u8) -> rusb::Result<()>;

    fn release_interface(&self, interface: u8) -> rusb::Result<()>;
}

/// [`DeviceIo`] over an opened `rusb` device handle.
pub struct RusbDeviceIo {
    handle: DeviceHandle<Context>,
}

impl RusbDeviceIo {
    pub fn new(handle: DeviceHandle<Context>) -> Self {
        Self { handle }
    }
}

impl DeviceIo for RusbDeviceIo {
    fn vendor_read(
        &self,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
    }

    fn vendor_write(
        &self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        let request_type =
            rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.read_bulk(endpoint, buf, timeout)
    }

    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle.write_bulk(endpoint, data, timeout)
    }

    fn claim_interface(&self, interface: u8) -> rusb::Result<()> {
        self.handle.claim_interface(interface)
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        self.handle.release_interface(interface)
    }
}

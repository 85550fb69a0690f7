// SPDX-License-Identifier: Apache-2.0
//! The physical-link abstraction and its three implementations.
//!
//! A [`Transport`] carries protocol bytes without knowing what they mean.
//! There are exactly three kinds of link an MI48 module ships on, and each
//! gets a dedicated implementation rather than open-ended dynamic dispatch:
//!
//! - [`UsbSerialTransport`]: the EVK USB-serial bridge. Registers and frames
//!   both travel the framed ASCII command protocol.
//! - [`SpiI2cTransport`]: registers on I²C, frame payload on SPI, frame
//!   readiness on the DATA_READY GPIO.
//! - [`I2cTransport`]: control and payload on one I²C bus; no readiness
//!   signal, so the status register must be polled.
//!
//! All operations are synchronous and block for at most their stated
//! timeout. A timeout of zero means "return immediately with whatever is
//! available". Concurrent access from two threads is undefined; serialize
//! on one owner per device.

pub mod i2c;
pub mod spi;
pub mod usb;

pub use i2c::I2cTransport;
pub use spi::SpiI2cTransport;
pub use usb::UsbSerialTransport;

use std::time::Duration;

use crate::error::TransportError;
use crate::protocol::CommandCodec;

/// A physical link to one MI48 module.
pub trait Transport {
    /// Send bytes on the control plane.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read up to `buf.len()` bytes from the control plane.
    ///
    /// Returns the number of bytes actually read, which may be less than the
    /// buffer size. `Err(Timeout)` means nothing at all arrived within a
    /// non-zero timeout; with a zero timeout, `Ok(0)` is returned instead.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Read frame-payload bytes.
    ///
    /// On links with a separate data plane (SPI) this reads from it; the
    /// default forwards to the control plane.
    fn read_payload(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.read(buf, timeout)
    }

    /// Whether this link has a frame-readiness signal of its own.
    fn has_data_ready_signal(&self) -> bool {
        false
    }

    /// Block until the link signals frame readiness, or the timeout elapses.
    ///
    /// Returns `Ok(true)` on the signal and `Ok(false)` on timeout. Links
    /// without a signal report `Ok(false)` immediately; the sync layer
    /// refuses to select the edge strategy for them in the first place.
    fn wait_data_ready(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let _ = timeout;
        Ok(false)
    }

    /// The register command encoding this link speaks.
    fn codec(&self) -> CommandCodec;

    /// Release the underlying physical resource.
    ///
    /// Safe to call multiple times; the release happens deterministically on
    /// the first call, not at some later finalization point.
    fn close(&mut self);
}

/// Keep filling `buf` until it is full or the deadline passes.
///
/// Returns the number of bytes read; a short count means the deadline
/// expired. I/O faults propagate immediately.
pub(crate) fn read_exact<T: Transport + ?Sized>(
    transport: &mut T,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, TransportError> {
    let deadline = std::time::Instant::now() + timeout;
    let mut filled = 0;
    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() && filled > 0 {
            break;
        }
        match transport.read(&mut buf[filled..], remaining) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(TransportError::Timeout) => break,
            Err(other) => return Err(other),
        }
    }
    Ok(filled)
}

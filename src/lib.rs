// SPDX-License-Identifier: Apache-2.0

//! A pure-Rust driver for Meridian Innovation MI48xx thermal camera
//! modules ("SenXor").
//!
//! The same module ships on three mutually incompatible links — a USB
//! serial EVK bridge, a combined SPI(data)+I²C(control) header, and an
//! I²C-only header on some host boards — and this crate presents one
//! contract over all of them: discover the device, read and write control
//! registers, stream frames with bounded timeouts, and manage the small
//! non-volatile calibration store behind its unlock/relock bracket.
//!
//! # High-Level API
//! ```no_run
//! use std::time::Duration;
//! use mi48::{discovery, FilterControl};
//!
//! let mut camera = discovery::bind_first()?;
//! println!("{}", camera.camera_info());
//! // 2.55 FPS, stage-1 temporal filter, emissivity for skin
//! let filters = FilterControl { f1_temporal: true, ..Default::default() };
//! camera.configure(10, filters, 0.95, 0.0)?;
//! camera.start()?;
//! while let Some(frame) = camera.read(Duration::from_millis(500))? {
//!     let header = frame.header();
//!     println!("frame {} die {:.1} C", header.frame_counter, header.senxor_temperature());
//! }
//! camera.stop()?;
//! # Ok::<(), mi48::Error>(())
//! ```
//! `read` returns `Ok(None)` on a quiet frame slot — an expected
//! steady-state condition under polling sync — and reserves errors for
//! actual faults. A truncated frame is fatal: the state machine drops to
//! Idle and the stream must be started again.
//!
//! # Transports
//! [`UsbSerialTransport`] speaks the EVK's framed ASCII command protocol.
//! [`SpiI2cTransport`] and [`I2cTransport`] are generic over the
//! [`embedded-hal`][embedded-hal] 0.2 blocking traits, so anything from
//! `linux-embedded-hal` to a bare-metal HAL can carry them; registers go
//! over I²C and (on the combo link) frame payload over SPI, with the
//! DATA_READY GPIO as the frame-boundary signal. Frame-boundary detection
//! is a construction-time choice between the edge-triggered and
//! status-polling strategies ([`SyncStrategy`]); the I²C-only link has no
//! signal and must poll.
//!
//! [embedded-hal]: https://docs.rs/embedded-hal/0.2/embedded_hal/
//!
//! # Calibration store
//! Four compensation parameters per module live in user flash, writable
//! only between an explicit unlock and relock. [`Mi48::with_user_flash`]
//! runs the whole bracket and relocks on every exit path:
//! ```no_run
//! # use mi48::{discovery, CalibrationRecord};
//! # let mut camera = discovery::bind_first()?;
//! let record = CalibrationRecord([1.0, 2.0, 3.0, 4.0]);
//! camera.with_user_flash(|flash| flash.store(record))?;
//! # Ok::<(), mi48::Error>(())
//! ```
//!
//! # Concurrency
//! Everything is synchronous and blocks for at most its stated timeout;
//! there is no background I/O thread. Serialize all access to one module
//! through a single owner. `stop()` followed by `close()` is safe from a
//! signal-triggered shutdown path because reads time out rather than
//! hang.

pub mod common;
pub mod discovery;
pub mod error;
pub mod flash;
pub mod frame;
pub mod protocol;
pub mod register;
pub mod stream;
pub mod sync;
#[cfg(test)]
mod test;
pub mod transport;

pub use common::{Address, CameraInfo, FirmwareVersion, SenxorType};
pub use error::{
    AssemblyError, ConfigError, DiscoveryError, Error, FlashError, ProtocolError, Result,
    StartError, StopError, TransportError,
};
pub use flash::{CalibrationRecord, UserFlash, ERASED_WORD};
pub use frame::{Frame, FrameHeader};
pub use protocol::CommandCodec;
pub use register::{FilterControl, FrameMode, StatusFlags};
pub use stream::{Mi48, StreamState, BASE_FRAME_RATE_HZ};
pub use sync::SyncStrategy;
pub use transport::{I2cTransport, SpiI2cTransport, Transport, UsbSerialTransport};

// SPDX-License-Identifier: Apache-2.0
//! USB-serial transport for the MI48 EVK bridge.
//!
//! The EVK enumerates as a USB CDC-ACM device and speaks the framed ASCII
//! command protocol at 115200 baud with hardware flow control. Frame
//! readiness on this link is simply "response bytes are pending in the RX
//! buffer": the EVK pushes `GFRA` messages on its own while streaming.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use serialport::SerialPort;

use crate::error::TransportError;
use crate::protocol::CommandCodec;
use crate::transport::Transport;

/// Baud rate of the EVK bridge.
pub const BAUD_RATE: u32 = 115_200;

/// Granularity of the RX-pending poll in [`Transport::wait_data_ready`].
const RX_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct UsbSerialTransport {
    /// The underlying port; `None` once closed.
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
}

impl UsbSerialTransport {
    /// Open the named serial port with the EVK's settings.
    ///
    /// `port_name` is an OS port path, e.g. `/dev/ttyACM0` on Linux or
    /// `COM3` on Windows.
    pub fn open(port_name: &str) -> Result<Self, TransportError> {
        debug!("opening EVK serial port {}", port_name);
        let mut port = serialport::new(port_name, BAUD_RATE)
            .flow_control(serialport::FlowControl::Hardware)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                TransportError::IoFault(format!("failed to open {}: {}", port_name, e))
            })?;
        // The EVK expects DTR asserted before it talks.
        if let Err(e) = port.write_data_terminal_ready(true) {
            warn!("{}: failed to assert DTR: {}", port_name, e);
        }
        if let Err(e) = port.clear(serialport::ClearBuffer::All) {
            warn!("{}: failed to clear buffers: {}", port_name, e);
        }
        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port
            .as_mut()
            .ok_or_else(|| TransportError::IoFault("port is closed".to_string()))
    }

    fn pending_bytes(&mut self) -> Result<u32, TransportError> {
        let name = self.port_name.clone();
        let port = self.port_mut()?;
        port.bytes_to_read()
            .map_err(|e| TransportError::IoFault(format!("{}: {}", name, e)))
    }
}

impl Transport for UsbSerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let name = self.port_name.clone();
        let port = self.port_mut()?;
        trace!("{}: sending {} bytes", name, bytes.len());
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| TransportError::IoFault(format!("{}: write failed: {}", name, e)))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if timeout.is_zero() && self.pending_bytes()? == 0 {
            return Ok(0);
        }
        let name = self.port_name.clone();
        let port = self.port_mut()?;
        let effective = if timeout.is_zero() {
            RX_POLL_INTERVAL
        } else {
            timeout
        };
        port.set_timeout(effective)
            .map_err(|e| TransportError::IoFault(format!("{}: {}", name, e)))?;
        match port.read(buf) {
            Ok(n) => {
                trace!("{}: received {} bytes", name, n);
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                if timeout.is_zero() {
                    Ok(0)
                } else {
                    Err(TransportError::Timeout)
                }
            }
            Err(e) => Err(TransportError::IoFault(format!(
                "{}: read failed: {}",
                name, e
            ))),
        }
    }

    fn has_data_ready_signal(&self) -> bool {
        true
    }

    fn wait_data_ready(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending_bytes()? > 0 {
                return Ok(true);
            }
            if Instant::now() + RX_POLL_INTERVAL > deadline {
                return Ok(false);
            }
            std::thread::sleep(RX_POLL_INTERVAL);
        }
    }

    fn codec(&self) -> CommandCodec {
        CommandCodec::Framed
    }

    fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush() {
                warn!("{}: flush on close failed: {}", self.port_name, e);
            }
            debug!("{}: serial port closed", self.port_name);
            // The port handle is dropped here, releasing the device node.
        }
    }
}

impl Drop for UsbSerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

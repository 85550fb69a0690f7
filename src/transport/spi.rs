// SPDX-License-Identifier: Apache-2.0
//! Combined SPI(data) + I²C(control) transport.
//!
//! On development boards the MI48 exposes its register file on an I²C slave
//! address (0x40 or 0x41 depending on how the ADDR pin is tied) and streams
//! frame data over SPI, with frame readiness on the DATA_READY GPIO. The
//! SPI payload is clocked out in row-sized chunks; the kernel's transfer
//! buffer is usually far smaller than a full frame.

use core::fmt::Debug;
use std::time::{Duration, Instant};

use embedded_hal::blocking::i2c;
use embedded_hal::blocking::spi;
use embedded_hal::digital::v2::InputPin;
use log::{debug, trace};

use crate::error::TransportError;
use crate::protocol::CommandCodec;
use crate::transport::Transport;

/// Default I²C slave address of the MI48 control interface.
pub const DEFAULT_I2C_ADDRESS: u8 = 0x40;

/// Granularity of the DATA_READY pin poll.
const PIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct SpiI2cTransport<SPI, I2C, PIN> {
    spi: SPI,
    i2c: I2C,
    data_ready: PIN,
    address: u8,
    /// SPI transfer chunk size in bytes. One FPA row is a good default; see
    /// the kernel's spidev buffer limit before raising it.
    xfer_size: usize,
    open: bool,
}

impl<SPI, I2C, PIN, ES, EI, EP> SpiI2cTransport<SPI, I2C, PIN>
where
    SPI: spi::Transfer<u8, Error = ES>,
    I2C: i2c::Write<Error = EI> + i2c::Read<Error = EI>,
    PIN: InputPin<Error = EP>,
    ES: Debug,
    EI: Debug,
    EP: Debug,
{
    /// Wrap an SPI bus, an I²C bus and the DATA_READY input pin.
    ///
    /// `xfer_size` is the SPI chunk size in bytes; pass one row's worth
    /// (columns × 2) unless the platform allows larger transfers.
    pub fn new(spi: SPI, i2c: I2C, data_ready: PIN, address: u8, xfer_size: usize) -> Self {
        debug!(
            "SPI+I2C transport at address {:#04X}, {} byte transfers",
            address, xfer_size
        );
        Self {
            spi,
            i2c,
            data_ready,
            address,
            xfer_size: xfer_size.max(2),
            open: true,
        }
    }

    fn guard_open(&self) -> Result<(), TransportError> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::IoFault("transport is closed".to_string()))
        }
    }
}

impl<SPI, I2C, PIN, ES, EI, EP> Transport for SpiI2cTransport<SPI, I2C, PIN>
where
    SPI: spi::Transfer<u8, Error = ES>,
    I2C: i2c::Write<Error = EI> + i2c::Read<Error = EI>,
    PIN: InputPin<Error = EP>,
    ES: Debug,
    EI: Debug,
    EP: Debug,
{
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.guard_open()?;
        trace!("i2c write of {} bytes", bytes.len());
        self.i2c
            .write(self.address, bytes)
            .map_err(|e| TransportError::IoFault(format!("i2c write failed: {:?}", e)))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        // I²C transactions complete within the bus clock; there is nothing
        // to wait on beyond the transfer itself, and nothing arrives
        // unsolicited for a zero-timeout drain to collect.
        self.guard_open()?;
        if timeout.is_zero() {
            return Ok(0);
        }
        self.i2c
            .read(self.address, buf)
            .map_err(|e| TransportError::IoFault(format!("i2c read failed: {:?}", e)))?;
        Ok(buf.len())
    }

    fn read_payload(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        self.guard_open()?;
        trace!("spi payload read of {} bytes", buf.len());
        for chunk in buf.chunks_mut(self.xfer_size) {
            chunk.fill(0);
            self.spi
                .transfer(chunk)
                .map_err(|e| TransportError::IoFault(format!("spi transfer failed: {:?}", e)))?;
        }
        Ok(buf.len())
    }

    fn has_data_ready_signal(&self) -> bool {
        true
    }

    fn wait_data_ready(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        self.guard_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            let high = self
                .data_ready
                .is_high()
                .map_err(|e| TransportError::IoFault(format!("DATA_READY pin: {:?}", e)))?;
            if high {
                return Ok(true);
            }
            if Instant::now() + PIN_POLL_INTERVAL > deadline {
                return Ok(false);
            }
            std::thread::sleep(PIN_POLL_INTERVAL);
        }
    }

    fn codec(&self) -> CommandCodec {
        CommandCodec::Direct
    }

    fn close(&mut self) {
        if self.open {
            debug!("SPI+I2C transport closed");
            self.open = false;
        }
    }
}

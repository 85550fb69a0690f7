// SPDX-License-Identifier: Apache-2.0
//! I²C-only transport.
//!
//! Some host boards route only the I²C pins; registers and frame payload
//! share the one bus. There is no readiness signal on this link, so the
//! stream layer must use the status-polling sync strategy.

use core::fmt::Debug;
use std::time::Duration;

use embedded_hal::blocking::i2c;
use log::{debug, trace};

use crate::error::TransportError;
use crate::protocol::CommandCodec;
use crate::transport::Transport;

pub struct I2cTransport<I2C> {
    i2c: I2C,
    address: u8,
    open: bool,
}

impl<I2C, E> I2cTransport<I2C>
where
    I2C: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: Debug,
{
    pub fn new(i2c: I2C, address: u8) -> Self {
        debug!("I2C transport at address {:#04X}", address);
        Self {
            i2c,
            address,
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

impl<I2C, E> Transport for I2cTransport<I2C>
where
    I2C: i2c::Write<Error = E> + i2c::Read<Error = E>,
    E: Debug,
{
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.guard_open()?;
        trace!("i2c write of {} bytes", bytes.len());
        self.i2c
            .write(self.address, bytes)
            .map_err(|e| TransportError::IoFault(format!("i2c write failed: {:?}", e)))
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        self.guard_open()?;
        // The bus is transactional; nothing arrives unsolicited, so a
        // zero-timeout drain has nothing to collect.
        if timeout.is_zero() {
            return Ok(0);
        }
        self.i2c
            .read(self.address, buf)
            .map_err(|e| TransportError::IoFault(format!("i2c read failed: {:?}", e)))?;
        Ok(buf.len())
    }

    fn codec(&self) -> CommandCodec {
        CommandCodec::Direct
    }

    fn close(&mut self) {
        if self.open {
            debug!("I2C transport closed");
            self.open = false;
        }
    }
}

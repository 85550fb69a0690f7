// SPDX-License-Identifier: Apache-2.0
//! Locating sensors on the host.
//!
//! EVK bridges enumerate as USB serial devices with a fixed vendor id and
//! one of a small set of product ids. On a production test jig, several
//! modules sit in numbered sockets (1 at the top left through 25 at the
//! bottom right) behind one hub; each candidate port is asked for its
//! socket id until the requested one answers. The driver never silently
//! substitutes a different physical port for the one the caller asked
//! for: zero matches and multiple matches are both surfaced.

use std::time::Duration;

use log::{debug, info};
use serialport::SerialPortType;

use crate::error::{ConfigError, DiscoveryError, Result};
use crate::protocol;
use crate::register;
use crate::stream::Mi48;
use crate::transport::{Transport, UsbSerialTransport};

/// USB vendor id of the EVK bridge.
pub const VENDOR_ID: u16 = 0x0416;

/// Known product ids of the EVK bridge revisions.
pub const PRODUCT_IDS: [u16; 2] = [0xB002, 0x5011];

/// Highest jig socket number.
pub const MAX_JIG_SOCKET: u8 = 25;

/// Settle time after powering a jig socket up.
const POWERUP_SETTLE: Duration = Duration::from_millis(500);

const SOCKET_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// One USB serial endpoint that looks like a sensor bridge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Candidate {
    /// OS port path, e.g. `/dev/ttyACM0` or `COM3`.
    pub port_name: String,

    pub product_id: u16,

    /// Serial string reported by the USB descriptor, when present. This is
    /// the bridge's serial, not the sensor module's.
    pub usb_serial: Option<String>,
}

pub(crate) fn matches_sensor(vid: u16, pid: u16) -> bool {
    vid == VENDOR_ID && PRODUCT_IDS.contains(&pid)
}

/// List every USB serial endpoint matching the sensor's identifiers.
pub fn enumerate() -> Result<Vec<Candidate>> {
    let ports = serialport::available_ports()
        .map_err(|e| DiscoveryError::Busy(format!("port enumeration failed: {}", e)))?;
    let candidates: Vec<Candidate> = ports
        .into_iter()
        .filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(usb) if matches_sensor(usb.vid, usb.pid) => Some(Candidate {
                port_name: port.port_name,
                product_id: usb.pid,
                usb_serial: usb.serial_number,
            }),
            _ => None,
        })
        .collect();
    debug!("found {} sensor candidate(s)", candidates.len());
    Ok(candidates)
}

/// Open the candidate's port and bind the sensor behind it.
pub fn bind(candidate: &Candidate) -> Result<Mi48<UsbSerialTransport>> {
    let transport = UsbSerialTransport::open(&candidate.port_name)
        .map_err(|e| DiscoveryError::Busy(e.to_string()))?;
    Mi48::new(transport)
}

/// Bind the single attached sensor.
///
/// Exactly one candidate must be present; none is `NotFound` and several
/// are `Ambiguous` — picking one of many would bind a port the caller
/// never asked for.
pub fn bind_first() -> Result<Mi48<UsbSerialTransport>> {
    let candidates = enumerate()?;
    match candidates.as_slice() {
        [] => Err(DiscoveryError::NotFound.into()),
        [only] => bind(only),
        many => Err(DiscoveryError::Ambiguous(many.len()).into()),
    }
}

/// Bind the sensor seated in the given jig socket.
///
/// Scans every candidate port, powering each module up and asking for its
/// socket id, until the requested socket answers.
pub fn bind_socket(socket_id: u8) -> Result<Mi48<UsbSerialTransport>> {
    if !(1..=MAX_JIG_SOCKET).contains(&socket_id) {
        return Err(ConfigError::InvalidRange("jig socket id").into());
    }
    let candidates = enumerate()?;
    if candidates.is_empty() {
        return Err(DiscoveryError::NotFound.into());
    }
    for candidate in &candidates {
        let mut transport = UsbSerialTransport::open(&candidate.port_name)
            .map_err(|e| DiscoveryError::Busy(e.to_string()))?;
        protocol::write_register(&mut transport, register::POWER_MODE, 0x00, 1)?;
        std::thread::sleep(POWERUP_SETTLE);
        let sid = protocol::query_socket_id(&mut transport, SOCKET_QUERY_TIMEOUT)?;
        debug!("socket {} on {}", sid, candidate.port_name);
        if sid == socket_id {
            let driver = Mi48::new(transport)?;
            info!(
                "{} in socket {} connected via {}",
                driver.camera_info().serial,
                socket_id,
                candidate.port_name
            );
            return Ok(driver);
        }
        transport.close();
    }
    Err(DiscoveryError::NotFound.into())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    #[test]
    fn identifier_matching() {
        assert!(matches_sensor(VENDOR_ID, 0xB002));
        assert!(matches_sensor(VENDOR_ID, 0x5011));
        assert!(!matches_sensor(VENDOR_ID, 0x0001));
        assert!(!matches_sensor(0x1234, 0xB002));
    }

    #[test]
    fn socket_ids_outside_the_jig_are_rejected() {
        for bad in [0u8, 26, 255] {
            let err = bind_socket(bad).unwrap_err();
            assert!(matches!(
                err,
                Error::Config(ConfigError::InvalidRange("jig socket id"))
            ));
        }
    }
}

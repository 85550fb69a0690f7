// SPDX-License-Identifier: Apache-2.0
//! Types shared between the MI48xx protocol layers.

use core::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Marker newtype for addresses in the MI48 register space.
///
/// The register space is a single byte wide. The user-flash words and the
/// EVK-level registers live in the same space, so one address type covers
/// everything the host can name.
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
pub struct Address(u8);

impl Address {
    /// Wrap the given address in an `Address`.
    ///
    /// This function is intended to be used in const contexts, in other cases
    /// the [`From`] implementations are probably easier to use.
    pub const fn new(address: u8) -> Self {
        Self(address)
    }

    pub(crate) fn as_byte(&self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#04X})", self.0)
    }
}

impl From<u8> for Address {
    fn from(raw_address: u8) -> Self {
        Self::new(raw_address)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl From<Address> for usize {
    fn from(address: Address) -> Self {
        address.0 as usize
    }
}

/// The sensor families an MI48 module can carry.
///
/// The type code is reported by the [`SENXOR_TYPE`][crate::register::SENXOR_TYPE]
/// register and fixes the frame-plane shape for the lifetime of the handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SenxorType {
    /// MI0801 "Bobcat", 80×62.
    Mi0801 = 0,

    /// MI0802, 80×62.
    Mi0802 = 1,

    /// MI1602 "Panther", 160×120.
    Mi1602 = 2,
}

impl SenxorType {
    /// The frame-plane shape as (columns, rows).
    pub fn fpa_shape(&self) -> (usize, usize) {
        match self {
            Self::Mi0801 | Self::Mi0802 => (80, 62),
            Self::Mi1602 => (160, 120),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mi0801 => "MI0801",
            Self::Mi0802 => "MI0802",
            Self::Mi1602 => "MI1602",
        }
    }
}

/// Firmware revision of the MI48 controller, read out at bind time.
///
/// Some features are only present from a given major revision onwards (the
/// temporal filters appeared in 2.x), so this is kept around for callers to
/// gate on.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Identity snapshot of one physical sensor module.
///
/// Created once during discovery and immutable afterwards; logging and UX
/// collaborators consume this without touching the transport.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CameraInfo {
    /// Factory serial number, rendered as eight uppercase hex digits.
    pub serial: String,

    /// The sensor family on the module.
    pub senxor_type: SenxorType,

    /// MI48 controller firmware revision.
    pub firmware_version: FirmwareVersion,

    /// Frame-plane shape as (columns, rows).
    pub fpa_shape: (usize, usize),
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} SN {} (fw {}, {}x{})",
            self.senxor_type.name(),
            self.serial,
            self.firmware_version,
            self.fpa_shape.0,
            self.fpa_shape.1,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn senxor_type_from_raw() {
        assert_eq!(SenxorType::try_from(0u8).unwrap(), SenxorType::Mi0801);
        assert_eq!(SenxorType::try_from(1u8).unwrap(), SenxorType::Mi0802);
        assert_eq!(SenxorType::try_from(2u8).unwrap(), SenxorType::Mi1602);
        assert!(SenxorType::try_from(3u8).is_err());
    }

    #[test]
    fn fpa_shapes() {
        assert_eq!(SenxorType::Mi0801.fpa_shape(), (80, 62));
        assert_eq!(SenxorType::Mi0802.fpa_shape(), (80, 62));
        assert_eq!(SenxorType::Mi1602.fpa_shape(), (160, 120));
    }

    #[test]
    fn camera_info_display() {
        let info = CameraInfo {
            serial: "00C0FFEE".to_string(),
            senxor_type: SenxorType::Mi0801,
            firmware_version: FirmwareVersion { major: 2, minor: 1 },
            fpa_shape: (80, 62),
        };
        assert_eq!(info.to_string(), "MI0801 SN 00C0FFEE (fw 2.1, 80x62)");
    }
}

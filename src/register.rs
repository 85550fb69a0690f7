//! The MI48 register map and typed views of the control registers.
//!
//! Registers are a single byte wide unless noted. Multi-byte values
//! (OFFSET_CORR, the user-flash words, CAMERA_ID) are big-endian on the
//! control plane. Reserved bits must be preserved on write, so each typed
//! register carries a write mask.

use crate::common::Address;

/// Trait for common register functionality.
pub trait Register: Into<u8> + From<u8> {
    /// A bit mask of which bits can be modified by the controller.
    ///
    /// When changing register values, the current value should be read, then
    /// bitwise-ANDed with the complement of this mask, then bitwise-ORed with
    /// the new value. This preserves the values of any reserved bits.
    fn write_mask() -> u8;

    /// The address of this register in the MI48's register map.
    fn address() -> Address;
}

/// The four user-flash calibration words. Width 4, only meaningful while the
/// user flash is unlocked; locked reads return the erased sentinel.
pub const USER_FLASH: [Address; 4] = [
    Address::new(0x00),
    Address::new(0x04),
    Address::new(0x08),
    Address::new(0x0C),
];

/// Capture/readout mode, width 1. See [`FrameMode`].
pub const FRAME_MODE: Address = Address::new(0xB1);

pub const FW_VERSION_MAJOR: Address = Address::new(0xB2);
pub const FW_VERSION_MINOR: Address = Address::new(0xB3);

/// Frame-rate divisor, width 1. Accepted range 1..=63; the effective frame
/// rate is the 25.5 Hz base rate divided by this value.
pub const FRAME_RATE: Address = Address::new(0xB4);

/// Power mode, width 1. 0x00 is normal operation; the jig flow writes this
/// to power a socket up before querying it.
pub const POWER_MODE: Address = Address::new(0xB5);

/// Status/error flags, width 1. See [`StatusFlags`].
pub const STATUS: Address = Address::new(0xB6);

/// Sensor family code, width 1. See [`SenxorType`][crate::SenxorType].
pub const SENXOR_TYPE: Address = Address::new(0xBA);

/// Sensitivity enhancement factor ×100, width 1. 0x64 is a factor of 1.00.
pub const SENS_FACTOR: Address = Address::new(0xC2);

/// Target emissivity in percent, width 1. Accepted range 1..=100.
pub const EMISSIVITY: Address = Address::new(0xCA);

/// Whole-frame offset correction in deci-Celsius, two's complement, width 2.
pub const OFFSET_CORR: Address = Address::new(0xCB);

/// Temporal-filter control, width 1. See [`FilterControl`].
pub const FILTER_CONTROL: Address = Address::new(0xD0);

/// User-flash lock control, width 1. The unlock handshake is 0xA5 followed
/// by 0x96; writing 0x00 relocks.
pub const FLASH_CTRL: Address = Address::new(0xDE);

/// Factory serial word, width 4.
pub const CAMERA_ID: Address = Address::new(0xE0);

/// Jig socket identifier, width 1. EVK-level; only reachable through the
/// framed codec's GSID query.
pub const EVK_SOCKET_ID: Address = Address::new(0xE4);

pub(crate) fn is_bit_set(raw: u8, bit: usize) -> bool {
    raw & (1 << bit) != 0
}

/// Represents the possible states of the frame-mode register (0xB1).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FrameMode {
    /// Capture a single frame, then return to idle. Reset by the device once
    /// the frame has been read out.
    pub single_capture: bool,

    /// Continuous streaming. While set, the device pushes a frame every
    /// divisor-th base period.
    pub continuous: bool,

    /// Suppress the header row in the readout. The driver always streams
    /// with the header on; the bit exists for parity with the register map.
    pub suppress_header: bool,
}

impl FrameMode {
    /// The mode written by `start()`: continuous streaming with the header.
    pub(crate) fn streaming() -> Self {
        Self {
            single_capture: false,
            continuous: true,
            suppress_header: false,
        }
    }

    /// Everything off; written by `stop()`.
    pub(crate) fn idle() -> Self {
        Self::default()
    }
}

impl Register for FrameMode {
    fn write_mask() -> u8 {
        0x07
    }

    fn address() -> Address {
        FRAME_MODE
    }
}

impl From<u8> for FrameMode {
    fn from(raw: u8) -> Self {
        Self {
            single_capture: is_bit_set(raw, 0),
            continuous: is_bit_set(raw, 1),
            suppress_header: is_bit_set(raw, 2),
        }
    }
}

impl From<FrameMode> for u8 {
    fn from(mode: FrameMode) -> Self {
        let mut raw = 0u8;
        raw |= mode.single_capture as u8;
        raw |= (mode.continuous as u8) << 1;
        raw |= (mode.suppress_header as u8) << 2;
        raw
    }
}

/// Represents the possible states of the status register (0xB6).
///
/// All bits are set by the device; the register is read-only from the host.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatusFlags {
    /// The controller is still booting; register contents are not yet valid.
    pub booting: bool,

    /// A complete frame is available for readout.
    pub data_ready: bool,

    /// The capture pipeline is running. `stop()` polls this bit down.
    pub capture_active: bool,
}

impl Register for StatusFlags {
    fn write_mask() -> u8 {
        0x00
    }

    fn address() -> Address {
        STATUS
    }
}

impl From<u8> for StatusFlags {
    fn from(raw: u8) -> Self {
        Self {
            booting: is_bit_set(raw, 0),
            data_ready: is_bit_set(raw, 4),
            capture_active: is_bit_set(raw, 5),
        }
    }
}

impl From<StatusFlags> for u8 {
    fn from(status: StatusFlags) -> Self {
        let mut raw = 0u8;
        raw |= status.booting as u8;
        raw |= (status.data_ready as u8) << 4;
        raw |= (status.capture_active as u8) << 5;
        raw
    }
}

/// Represents the possible states of the filter-control register (0xD0).
///
/// The three filter stages toggle independently. Filters are only present
/// from firmware 2.x; on earlier firmware the register reads as zero and
/// writes are ignored by the device.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FilterControl {
    /// Stage 1, temporal filter.
    pub f1_temporal: bool,

    /// Stage 2, rolling-average filter.
    pub f2_rolling_average: bool,

    /// Stage 3, median filter.
    pub f3_median: bool,

    /// Use a 5×5 kernel for stage 3 instead of the default 3×3.
    pub f3_kernel_5: bool,
}

impl Register for FilterControl {
    fn write_mask() -> u8 {
        0x0F
    }

    fn address() -> Address {
        FILTER_CONTROL
    }
}

impl From<u8> for FilterControl {
    fn from(raw: u8) -> Self {
        Self {
            f1_temporal: is_bit_set(raw, 0),
            f2_rolling_average: is_bit_set(raw, 1),
            f3_median: is_bit_set(raw, 2),
            f3_kernel_5: is_bit_set(raw, 3),
        }
    }
}

impl From<FilterControl> for u8 {
    fn from(filters: FilterControl) -> Self {
        let mut raw = 0u8;
        raw |= filters.f1_temporal as u8;
        raw |= (filters.f2_rolling_average as u8) << 1;
        raw |= (filters.f3_median as u8) << 2;
        raw |= (filters.f3_kernel_5 as u8) << 3;
        raw
    }
}

#[cfg(test)]
mod test {
    use super::*;

    macro_rules! assert_register_field {
        ($register:ty, $value:literal, $field:ident, $expected:expr) => {
            // backdoor type annotation for the macro
            let value: u8 = $value;
            let packed: $register = From::from(value);
            assert_eq!(packed.$field, $expected);
            let unpacked: u8 = packed.into();
            assert_eq!(unpacked, value);
        };
    }

    #[test]
    fn frame_mode_masked() {
        let all_on = FrameMode::from(0xFFu8);
        let masked_on = FrameMode::from(FrameMode::write_mask());
        assert_eq!(all_on, masked_on);
    }

    #[test]
    fn frame_mode_single_capture() {
        assert_register_field!(FrameMode, 0x01, single_capture, true);
        assert_register_field!(FrameMode, 0x00, single_capture, false);
    }

    #[test]
    fn frame_mode_continuous() {
        assert_register_field!(FrameMode, 0x02, continuous, true);
        assert_register_field!(FrameMode, 0x00, continuous, false);
    }

    #[test]
    fn frame_mode_suppress_header() {
        assert_register_field!(FrameMode, 0x04, suppress_header, true);
        assert_register_field!(FrameMode, 0x00, suppress_header, false);
    }

    #[test]
    fn frame_mode_streaming_is_continuous_with_header() {
        let raw: u8 = FrameMode::streaming().into();
        assert_eq!(raw, 0x02);
        let raw: u8 = FrameMode::idle().into();
        assert_eq!(raw, 0x00);
    }

    #[test]
    fn status_booting() {
        assert_register_field!(StatusFlags, 0x01, booting, true);
        assert_register_field!(StatusFlags, 0x00, booting, false);
    }

    #[test]
    fn status_data_ready() {
        assert_register_field!(StatusFlags, 0x10, data_ready, true);
        assert_register_field!(StatusFlags, 0x00, data_ready, false);
    }

    #[test]
    fn status_capture_active() {
        assert_register_field!(StatusFlags, 0x20, capture_active, true);
        assert_register_field!(StatusFlags, 0x00, capture_active, false);
    }

    #[test]
    fn status_is_read_only() {
        assert_eq!(StatusFlags::write_mask(), 0x00);
    }

    #[test]
    fn filter_control_fields() {
        assert_register_field!(FilterControl, 0x01, f1_temporal, true);
        assert_register_field!(FilterControl, 0x02, f2_rolling_average, true);
        assert_register_field!(FilterControl, 0x04, f3_median, true);
        assert_register_field!(FilterControl, 0x08, f3_kernel_5, true);
        assert_register_field!(FilterControl, 0x00, f1_temporal, false);
    }

    #[test]
    fn filter_control_masked() {
        let all_on = FilterControl::from(0xFFu8);
        let masked_on = FilterControl::from(FilterControl::write_mask());
        assert_eq!(all_on, masked_on);
    }
}

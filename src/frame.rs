// SPDX-License-Identifier: Apache-2.0
//! Frame wire format and assembly.
//!
//! A frame on the wire is one header row followed by the pixel grid, all
//! little-endian unsigned 16-bit words. The header row is `cols` words
//! long; the first three carry the sequence counter, the sensor die
//! temperature and the status flags, the rest are reserved. Pixels are raw
//! samples in deci-Kelvin. The total payload size is constant for a given
//! module.
//!
//! Conversion to physical temperature is `T = raw / 10 - 273.15`; no
//! smoothing or clipping happens at this layer.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::AssemblyError;
use crate::protocol::{self, CommandCodec, TAG_GFRA};
use crate::transport::Transport;

/// Raw sample scale: samples are tenths of a Kelvin.
pub const TEMPERATURE_SCALE: f32 = 10.0;

/// Offset from Kelvin to Celsius.
pub const KELVIN_OFFSET: f32 = 273.15;

/// Convert one raw deci-Kelvin sample to degrees Celsius.
pub fn raw_to_celsius(raw: u16) -> f32 {
    raw as f32 / TEMPERATURE_SCALE - KELVIN_OFFSET
}

/// Per-frame metadata from the header row.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Wrapping frame sequence counter.
    pub frame_counter: u16,

    /// On-die sensor temperature, raw deci-Kelvin.
    pub senxor_temperature_raw: u16,

    /// Status/error flag bits captured with the frame.
    pub status: u16,
}

impl FrameHeader {
    pub(crate) fn from_words(words: &[u16]) -> Self {
        Self {
            frame_counter: words[0],
            senxor_temperature_raw: words[1],
            status: words[2],
        }
    }

    /// On-die sensor temperature in degrees Celsius.
    pub fn senxor_temperature(&self) -> f32 {
        raw_to_celsius(self.senxor_temperature_raw)
    }
}

/// One complete thermal capture: header plus cols×rows raw samples.
///
/// Exclusively owned by the caller once returned; the driver keeps no
/// reference to it.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    header: FrameHeader,
    cols: usize,
    rows: usize,
    data: Vec<u16>,
}

impl Frame {
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The frame-plane shape as (columns, rows).
    pub fn shape(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// The raw deci-Kelvin samples in row-major order.
    pub fn raw(&self) -> &[u16] {
        &self.data
    }

    /// One raw sample, or `None` outside the frame plane.
    pub fn sample(&self, col: usize, row: usize) -> Option<u16> {
        if col < self.cols && row < self.rows {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// The whole plane converted to degrees Celsius, row-major.
    pub fn to_celsius(&self) -> Vec<f32> {
        self.data.iter().map(|&raw| raw_to_celsius(raw)).collect()
    }
}

/// Read one frame off the transport once sync has signalled readiness.
///
/// Any short read, transport fault or framing defect mid-frame means the
/// frame boundary is lost; everything maps to [`AssemblyError::Truncated`]
/// and the caller is expected to tear the stream down rather than retry.
pub(crate) fn assemble<T: Transport + ?Sized>(
    transport: &mut T,
    cols: usize,
    rows: usize,
    timeout: Duration,
) -> Result<Frame, AssemblyError> {
    let expected_words = cols + cols * rows;
    let expected_bytes = expected_words * 2;
    let payload = match transport.codec() {
        CommandCodec::Framed => framed_payload(transport, expected_bytes, timeout)?,
        CommandCodec::Direct => direct_payload(transport, expected_bytes, timeout)?,
    };
    let words: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let header = FrameHeader::from_words(&words[..cols]);
    debug!(
        "frame {} assembled, die {:.1} C",
        header.frame_counter,
        header.senxor_temperature()
    );
    Ok(Frame {
        header,
        cols,
        rows,
        data: words[cols..].to_vec(),
    })
}

fn framed_payload<T: Transport + ?Sized>(
    transport: &mut T,
    expected_bytes: usize,
    timeout: Duration,
) -> Result<Vec<u8>, AssemblyError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (tag, payload) = protocol::read_framed_message(transport, remaining).map_err(|e| {
            warn!("frame message failed: {}", e);
            AssemblyError::Truncated {
                expected: expected_bytes,
                got: 0,
            }
        })?;
        if tag != TAG_GFRA {
            // Stale register response from before the stream started.
            continue;
        }
        if payload.len() != expected_bytes {
            return Err(AssemblyError::Truncated {
                expected: expected_bytes,
                got: payload.len(),
            });
        }
        return Ok(payload);
    }
}

fn direct_payload<T: Transport + ?Sized>(
    transport: &mut T,
    expected_bytes: usize,
    timeout: Duration,
) -> Result<Vec<u8>, AssemblyError> {
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; expected_bytes];
    let mut filled = 0;
    while filled < expected_bytes {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match transport.read_payload(&mut buf[filled..], remaining) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => {
                warn!("payload read failed mid-frame: {}", e);
                break;
            }
        }
        if remaining.is_zero() {
            break;
        }
    }
    if filled < expected_bytes {
        return Err(AssemblyError::Truncated {
            expected: expected_bytes,
            got: filled,
        });
    }
    Ok(buf)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::MockSensor;
    use float_cmp::assert_approx_eq;

    #[test]
    fn raw_conversion() {
        // 2981 dK = 298.1 K = 24.95 C
        assert_approx_eq!(f32, raw_to_celsius(2981), 24.95, epsilon = 0.001);
        assert_approx_eq!(f32, raw_to_celsius(2731), 0.0, epsilon = 0.06);
    }

    #[test]
    fn header_from_words() {
        let words = [7u16, 3031, 0x0000, 0, 0];
        let header = FrameHeader::from_words(&words);
        assert_eq!(header.frame_counter, 7);
        assert_approx_eq!(f32, header.senxor_temperature(), 29.95, epsilon = 0.001);
    }

    #[test]
    fn sample_indexing() {
        let frame = Frame {
            header: FrameHeader {
                frame_counter: 0,
                senxor_temperature_raw: 0,
                status: 0,
            },
            cols: 3,
            rows: 2,
            data: vec![10, 11, 12, 20, 21, 22],
        };
        assert_eq!(frame.sample(0, 0), Some(10));
        assert_eq!(frame.sample(2, 1), Some(22));
        assert_eq!(frame.sample(3, 0), None);
        assert_eq!(frame.sample(0, 2), None);
        assert_eq!(frame.to_celsius().len(), 6);
    }

    fn assemble_one(mut mock: MockSensor) {
        mock.begin_streaming();
        mock.set_data_ready_after(Duration::ZERO);
        let (cols, rows) = mock.fpa_shape();
        let frame = assemble(&mut mock, cols, rows, Duration::from_millis(200)).unwrap();
        assert_eq!(frame.shape(), (cols, rows));
        assert_eq!(frame.raw().len(), cols * rows);
        // The mock's pixel pattern stays within plausible indoor range.
        for celsius in frame.to_celsius() {
            assert!((0.0..60.0).contains(&celsius), "{celsius}");
        }
    }

    #[test]
    fn assembles_framed_frames() {
        assemble_one(MockSensor::framed());
    }

    #[test]
    fn assembles_direct_frames() {
        assemble_one(MockSensor::direct());
    }

    #[test]
    fn short_payload_is_truncated() {
        let mut mock = MockSensor::direct();
        mock.begin_streaming();
        mock.set_data_ready_after(Duration::ZERO);
        mock.truncate_next_frame();
        let (cols, rows) = mock.fpa_shape();
        let err = assemble(&mut mock, cols, rows, Duration::from_millis(100)).unwrap_err();
        match err {
            AssemblyError::Truncated { expected, got } => {
                assert_eq!(expected, (cols + cols * rows) * 2);
                assert!(got < expected);
            }
        }
    }

    #[test]
    fn silence_is_truncated_with_zero_bytes() {
        let mut mock = MockSensor::framed();
        // Never streaming: no GFRA will arrive.
        let err = assemble(&mut mock, 80, 62, Duration::from_millis(30)).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::Truncated {
                expected: (80 + 80 * 62) * 2,
                got: 0
            }
        );
    }
}

// SPDX-License-Identifier: Apache-2.0
//! Register command encoding for the two addressing models.
//!
//! The EVK USB bridge speaks a framed ASCII protocol; the I²C-style links
//! address the register file directly. Both are captured in the closed
//! [`CommandCodec`] enum so every protocol routine match is exhaustive.
//!
//! # Framed messages
//!
//! ```text
//! "   #" LLLL TTTT <payload> CCCC
//! ```
//!
//! `LLLL` is the byte count of everything after itself (tag, payload and
//! checksum) as four uppercase hex digits. `TTTT` is a four-character
//! command tag (`WREG`, `RREG`, `GFRA`, `GSID`). `CCCC` is the 16-bit
//! truncated sum of every byte from the prefix through the payload, again
//! as four uppercase hex digits. Register writes carry the address and the
//! value as ASCII hex; `GFRA` responses carry the raw binary frame.
//!
//! Writes are considered committed once the transport accepts them; the
//! link offers no application-level acknowledgement, so callers needing
//! certainty must read back. Reads fail loudly on any length, tag or
//! checksum mismatch. No retries happen here.

use std::time::{Duration, Instant};

use arrayvec::ArrayVec;
use log::trace;

use crate::common::Address;
use crate::error::{ConfigError, ProtocolError, Result};
use crate::transport::{read_exact, Transport};

/// The register command encoding a transport speaks.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommandCodec {
    /// EVK framed ASCII commands; registers and frames share the stream.
    Framed,

    /// Raw register addressing: write `[addr, value…]`, read by writing
    /// `[addr]` then reading the value bytes.
    Direct,
}

pub(crate) type Tag = [u8; 4];

pub(crate) const MESSAGE_PREFIX: &[u8; 4] = b"   #";
pub(crate) const TAG_WREG: Tag = *b"WREG";
pub(crate) const TAG_RREG: Tag = *b"RREG";
pub(crate) const TAG_GFRA: Tag = *b"GFRA";
pub(crate) const TAG_GSID: Tag = *b"GSID";

/// Prefix + length + tag + max payload (addr + 32-bit value) + checksum.
const MAX_COMMAND: usize = 4 + 4 + 4 + 10 + 4;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn push_hex(buf: &mut dyn FnMut(u8), value: u32, digits: usize) {
    for i in (0..digits).rev() {
        buf(HEX[((value >> (i * 4)) & 0xF) as usize]);
    }
}

pub(crate) fn parse_hex(digits: &[u8]) -> std::result::Result<u32, ProtocolError> {
    let mut value = 0u32;
    for &d in digits {
        let nibble = match d {
            b'0'..=b'9' => d - b'0',
            b'A'..=b'F' => d - b'A' + 10,
            b'a'..=b'f' => d - b'a' + 10,
            _ => return Err(ProtocolError::Malformed("non-hex digit in message")),
        };
        value = (value << 4) | nibble as u32;
    }
    Ok(value)
}

/// 16-bit truncated sum over the message bytes up to the checksum field.
pub(crate) fn checksum<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u16 {
    bytes
        .into_iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Assemble a host-side command message into a bounded buffer.
pub(crate) fn frame_command(tag: &Tag, payload: &[u8]) -> ArrayVec<u8, MAX_COMMAND> {
    let mut msg = ArrayVec::<u8, MAX_COMMAND>::new();
    msg.try_extend_from_slice(MESSAGE_PREFIX)
        .expect("prefix fits the framing buffer");
    let body_len = (4 + payload.len() + 4) as u32;
    push_hex(&mut |b| msg.push(b), body_len, 4);
    msg.try_extend_from_slice(tag)
        .expect("tag fits the framing buffer");
    msg.try_extend_from_slice(payload)
        .expect("command payloads never exceed the framing buffer");
    let sum = checksum(msg.iter());
    push_hex(&mut |b| msg.push(b), sum as u32, 4);
    msg
}

/// Assemble an arbitrarily-sized framed message (device-to-host shapes).
#[cfg(test)]
pub(crate) fn frame_message(tag: &Tag, payload: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(4 + 4 + 4 + payload.len() + 4);
    msg.extend_from_slice(MESSAGE_PREFIX);
    push_hex(&mut |b| msg.push(b), (4 + payload.len() + 4) as u32, 4);
    msg.extend_from_slice(tag);
    msg.extend_from_slice(payload);
    let sum = checksum(msg.iter());
    push_hex(&mut |b| msg.push(b), sum as u32, 4);
    msg
}

fn check_width(width: usize, value: u32) -> Result<()> {
    if !matches!(width, 1 | 2 | 4) {
        return Err(ConfigError::InvalidRange("register width").into());
    }
    if width < 4 && value >= 1u32 << (8 * width) {
        return Err(ConfigError::InvalidRange("register value").into());
    }
    Ok(())
}

/// Serialize and send a register write.
///
/// The write is committed once the transport accepts it; there is no
/// application-level acknowledgement on any of the links.
pub(crate) fn write_register<T: Transport + ?Sized>(
    transport: &mut T,
    addr: Address,
    value: u32,
    width: usize,
) -> Result<()> {
    check_width(width, value)?;
    trace!(
        "write_register {:?} <- {:#X} (width {})",
        addr,
        value,
        width
    );
    match transport.codec() {
        CommandCodec::Framed => {
            let mut payload = ArrayVec::<u8, 10>::new();
            push_hex(&mut |b| payload.push(b), addr.as_byte() as u32, 2);
            push_hex(&mut |b| payload.push(b), value, 2 * width);
            let msg = frame_command(&TAG_WREG, &payload);
            transport.write(&msg)?;
        }
        CommandCodec::Direct => {
            let mut bytes = ArrayVec::<u8, 5>::new();
            bytes.push(addr.as_byte());
            bytes
                .try_extend_from_slice(&value.to_be_bytes()[4 - width..])
                .expect("a register value is at most four bytes");
            transport.write(&bytes)?;
        }
    }
    Ok(())
}

/// Send a register read command and collect exactly the expected response.
pub(crate) fn read_register<T: Transport + ?Sized>(
    transport: &mut T,
    addr: Address,
    width: usize,
    timeout: Duration,
) -> Result<u32> {
    check_width(width, 0)?;
    match transport.codec() {
        CommandCodec::Framed => {
            let mut payload = ArrayVec::<u8, 2>::new();
            push_hex(&mut |b| payload.push(b), addr.as_byte() as u32, 2);
            let msg = frame_command(&TAG_RREG, &payload);
            transport.write(&msg)?;
            let deadline = Instant::now() + timeout;
            // Frame pushes may be interleaved with the response while the
            // device is streaming; skip anything that isn't ours.
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let (tag, body) = read_framed_message(transport, remaining)?;
                if tag != TAG_RREG {
                    trace!("skipping {} message while awaiting RREG", tag_name(&tag));
                    continue;
                }
                if body.len() != 2 * width {
                    return Err(ProtocolError::Malformed("register response length").into());
                }
                let value = parse_hex(&body)?;
                trace!("read_register {:?} -> {:#X}", addr, value);
                return Ok(value);
            }
        }
        CommandCodec::Direct => {
            transport.write(&[addr.as_byte()])?;
            let mut bytes = [0u8; 4];
            let got = read_exact(transport, &mut bytes[..width], timeout)?;
            if got == 0 {
                return Err(ProtocolError::Timeout.into());
            }
            if got < width {
                return Err(ProtocolError::Malformed("short register response").into());
            }
            let mut value = 0u32;
            for &b in &bytes[..width] {
                value = (value << 8) | b as u32;
            }
            trace!("read_register {:?} -> {:#X}", addr, value);
            Ok(value)
        }
    }
}

/// Query the EVK jig-socket identifier. Framed codec only.
pub(crate) fn query_socket_id<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<u8> {
    if transport.codec() != CommandCodec::Framed {
        return Err(ProtocolError::Malformed("socket id query requires the framed codec").into());
    }
    let msg = frame_command(&TAG_GSID, &[]);
    transport.write(&msg)?;
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (tag, body) = read_framed_message(transport, remaining)?;
        if tag != TAG_GSID {
            continue;
        }
        if body.len() != 2 {
            return Err(ProtocolError::Malformed("socket id response length").into());
        }
        return Ok(parse_hex(&body)? as u8);
    }
}

/// Read one complete framed message: `(tag, payload)`.
///
/// Fails with `ProtocolError::Timeout` if a complete message does not
/// arrive in time, and `ProtocolError::Malformed` on any framing defect.
pub(crate) fn read_framed_message<T: Transport + ?Sized>(
    transport: &mut T,
    timeout: Duration,
) -> Result<(Tag, Vec<u8>)> {
    let deadline = Instant::now() + timeout;
    let mut head = [0u8; 8];
    let got = read_exact(transport, &mut head, timeout)?;
    if got < head.len() {
        return Err(ProtocolError::Timeout.into());
    }
    if &head[..4] != MESSAGE_PREFIX {
        return Err(ProtocolError::Malformed("bad message prefix").into());
    }
    let body_len = parse_hex(&head[4..8])? as usize;
    if body_len < 4 + 4 {
        return Err(ProtocolError::Malformed("message length too short").into());
    }
    let mut body = vec![0u8; body_len];
    let remaining = deadline.saturating_duration_since(Instant::now());
    let got = read_exact(transport, &mut body, remaining)?;
    if got < body.len() {
        return Err(ProtocolError::Timeout.into());
    }
    let (content, checksum_field) = body.split_at(body_len - 4);
    let expected = parse_hex(checksum_field)? as u16;
    let actual = checksum(head.iter().chain(content.iter()));
    if expected != actual {
        return Err(ProtocolError::Malformed("checksum mismatch").into());
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&content[..4]);
    Ok((tag, content[4..].to_vec()))
}

fn tag_name(tag: &Tag) -> &str {
    std::str::from_utf8(tag).unwrap_or("????")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::register;
    use crate::test::MockSensor;

    #[test]
    fn wreg_command_layout() {
        // WREG 0xB4 <- 0x0A: "   #" + len + "WREG" + "B40A" + checksum
        let mut payload = ArrayVec::<u8, 10>::new();
        push_hex(&mut |b| payload.push(b), 0xB4, 2);
        push_hex(&mut |b| payload.push(b), 0x0A, 2);
        let msg = frame_command(&TAG_WREG, &payload);
        assert_eq!(&msg[..4], b"   #");
        // body = tag(4) + payload(4) + checksum(4) = 12 = 0x000C
        assert_eq!(&msg[4..8], b"000C");
        assert_eq!(&msg[8..12], b"WREG");
        assert_eq!(&msg[12..16], b"B40A");
        let sum = checksum(msg[..16].iter());
        assert_eq!(parse_hex(&msg[16..20]).unwrap() as u16, sum);
    }

    #[test]
    fn checksum_is_truncated_sum() {
        assert_eq!(checksum(b"\x01\x02\x03".iter()), 6);
        assert_eq!(checksum(b"\xFF".iter().cycle().take(300)), (255 * 300 % 65536) as u16);
    }

    #[test]
    fn parse_hex_rejects_garbage() {
        assert_eq!(parse_hex(b"00FF").unwrap(), 0xFF);
        assert_eq!(parse_hex(b"b40a").unwrap(), 0xB40A);
        assert!(parse_hex(b"12G4").is_err());
    }

    #[test]
    fn invalid_widths_are_local_errors() {
        let mut mock = MockSensor::framed();
        assert!(matches!(
            write_register(&mut mock, register::FRAME_RATE, 1, 3),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            write_register(&mut mock, register::FRAME_RATE, 0x100, 1),
            Err(Error::Config(_))
        ));
        assert!(mock.recent_operations().is_empty());
    }

    fn register_roundtrip(mut mock: MockSensor) {
        let timeout = Duration::from_millis(100);
        for (addr, value, width) in [
            (register::FRAME_RATE, 0x0Au32, 1usize),
            (register::OFFSET_CORR, 0xFF9Cu32, 2),
            (register::EMISSIVITY, 0x5F, 1),
            (register::CAMERA_ID, 0xDEAD_BEEF, 4),
        ] {
            write_register(&mut mock, addr, value, width).unwrap();
            let read_back = read_register(&mut mock, addr, width, timeout).unwrap();
            assert_eq!(read_back, value, "{:?}", addr);
        }
    }

    #[test]
    fn framed_register_roundtrip() {
        register_roundtrip(MockSensor::framed());
    }

    #[test]
    fn direct_register_roundtrip() {
        register_roundtrip(MockSensor::direct());
    }

    #[test]
    fn framed_checksum_fault_is_malformed() {
        let mut mock = MockSensor::framed();
        mock.corrupt_next_response();
        let err = read_register(
            &mut mock,
            register::FRAME_RATE,
            1,
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn framed_silence_is_timeout() {
        let mut mock = MockSensor::framed();
        mock.drop_next_response();
        let err = read_register(
            &mut mock,
            register::FRAME_RATE,
            1,
            Duration::from_millis(20),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Timeout)));
    }

    #[test]
    fn socket_id_query_is_framed_only() {
        let mut mock = MockSensor::direct();
        let err = query_socket_id(&mut mock, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::Malformed(_))));

        let mut mock = MockSensor::framed();
        mock.set_socket_id(18);
        let id = query_socket_id(&mut mock, Duration::from_millis(100)).unwrap();
        assert_eq!(id, 18);
    }
}

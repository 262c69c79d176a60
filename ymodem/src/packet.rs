//! Packet framing: block headers, SEQ/~SEQ, CRC-16 trailer, and the
//! filename/size payload carried by packet 0.
//!
//! ```text
//! [HDR:1][SEQ:1][~SEQ:1][DATA:N][CRC_HI:1][CRC_LO:1]
//! ```

use crate::crc::crc16_ccitt;
use crate::error::{Error, Result};

/// Single-byte control codes used on the wire.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
    /// Padding byte for short final payloads.
    pub const SUB: u8 = 0x1A;
}

/// Payload length of an SOH block.
pub const SOH_BLOCK_SIZE: usize = 128;

/// Payload length of an STX block.
pub const STX_BLOCK_SIZE: usize = 1024;

/// Largest packet that can appear on the wire: 3-byte header + 1024-byte
/// payload + 2-byte CRC.
pub const MAX_PACKET_SIZE: usize = 3 + STX_BLOCK_SIZE + 2;

/// A decoded header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// 128-byte data block.
    Soh,
    /// 1024-byte data block.
    Stx,
    /// End of transmission.
    Eot,
    /// Cancel.
    Can,
    /// Acknowledge.
    Ack,
    /// Negative acknowledge.
    Nak,
    /// CRC-mode request character.
    C,
    /// Any other byte.
    Other(u8),
}

impl Header {
    /// Classify a raw byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            control::SOH => Self::Soh,
            control::STX => Self::Stx,
            control::EOT => Self::Eot,
            control::CAN => Self::Can,
            control::ACK => Self::Ack,
            control::NAK => Self::Nak,
            control::C => Self::C,
            other => Self::Other(other),
        }
    }

    /// The payload size a data-block header implies, or `None` if this
    /// header does not begin a data block.
    #[must_use]
    pub fn expected_payload_size(self) -> Option<usize> {
        match self {
            Self::Soh => Some(SOH_BLOCK_SIZE),
            Self::Stx => Some(STX_BLOCK_SIZE),
            _ => None,
        }
    }
}

/// A validated packet's sequence number and payload.
#[derive(Debug)]
pub struct ValidatedPacket<'a> {
    /// The packet's sequence number.
    pub seq: u8,
    /// Borrowed view of the packet's data bytes (excludes header and CRC).
    pub payload: &'a [u8],
}

/// Build a data-block packet into `out`, returning the number of bytes
/// written.
///
/// `payload` must be exactly [`SOH_BLOCK_SIZE`] bytes for an SOH block or
/// [`STX_BLOCK_SIZE`] bytes for an STX block; anything else is
/// [`Error::WrongDataSize`].
pub fn build_packet(header: Header, seq: u8, payload: &[u8], out: &mut [u8]) -> Result<usize> {
    let Some(expected) = header.expected_payload_size() else {
        return Err(Error::WrongDataSize(format!(
            "{header:?} is not a data-block header"
        )));
    };
    if payload.len() != expected {
        return Err(Error::WrongDataSize(format!(
            "expected {expected}-byte payload, got {}",
            payload.len()
        )));
    }
    let packet_len = 3 + expected + 2;
    if out.len() < packet_len {
        return Err(Error::WrongDataSize(format!(
            "output buffer too small: need {packet_len}, have {}",
            out.len()
        )));
    }

    let hdr_byte = match header {
        Header::Soh => control::SOH,
        Header::Stx => control::STX,
        _ => unreachable!("expected_payload_size already filtered non-data headers"),
    };

    out[0] = hdr_byte;
    out[1] = seq;
    out[2] = !seq;
    out[3..3 + expected].copy_from_slice(payload);

    let crc = crc16_ccitt(payload);
    out[3 + expected] = (crc >> 8) as u8;
    out[3 + expected + 1] = (crc & 0xFF) as u8;

    Ok(packet_len)
}

/// Validate a complete packet (header byte through CRC trailer) already
/// staged in `buf`, whose length must equal `3 + payload_len + 2` for the
/// header encoded at `buf[0]`.
pub fn validate_packet(buf: &[u8]) -> Result<ValidatedPacket<'_>> {
    let header = Header::from_byte(buf[0]);
    let Some(expected) = header.expected_payload_size() else {
        return Err(Error::WrongCode(format!(
            "unexpected header byte {:#04x}",
            buf[0]
        )));
    };
    let packet_len = 3 + expected + 2;
    if buf.len() != packet_len {
        return Err(Error::WrongDataSize(format!(
            "expected {packet_len}-byte packet, got {}",
            buf.len()
        )));
    }

    let seq = buf[1];
    if buf[2] != !seq {
        return Err(Error::WrongSequence(format!(
            "SEQ {seq:#04x} complement mismatch: got {:#04x}",
            buf[2]
        )));
    }

    let payload = &buf[3..3 + expected];
    let crc_hi = buf[3 + expected];
    let crc_lo = buf[3 + expected + 1];
    let received_crc = (u16::from(crc_hi) << 8) | u16::from(crc_lo);
    let computed_crc = crc16_ccitt(payload);
    if received_crc != computed_crc {
        return Err(Error::WrongCrc {
            expected: computed_crc,
            actual: received_crc,
        });
    }

    Ok(ValidatedPacket { seq, payload })
}

/// Encode the packet-0 (file-info) payload: `filename\0sizedigits\0...\0`,
/// zero-padded to [`SOH_BLOCK_SIZE`].
///
/// Passing an empty `filename` with `size == 0` produces the all-zero
/// batch-terminator payload.
pub fn encode_file_info(filename: &str, size: u64, out: &mut [u8; SOH_BLOCK_SIZE]) -> Result<()> {
    out.fill(0);
    if filename.is_empty() {
        return Ok(());
    }

    let size_str = size.to_string();
    // filename + NUL + size digits must fit in the 128-byte payload.
    if filename.len() + 1 + size_str.len() >= SOH_BLOCK_SIZE {
        return Err(Error::WrongDataSize(format!(
            "filename {filename:?} with size {size} does not fit in a {SOH_BLOCK_SIZE}-byte packet-0 payload"
        )));
    }

    let name_bytes = filename.as_bytes();
    out[..name_bytes.len()].copy_from_slice(name_bytes);
    out[name_bytes.len()] = 0;
    let size_start = name_bytes.len() + 1;
    out[size_start..size_start + size_str.len()].copy_from_slice(size_str.as_bytes());
    Ok(())
}

/// Decode a packet-0 payload into `(filename, size)`. An empty filename
/// (payload's first byte is NUL) signals the batch terminator and decodes
/// to `("", 0)`.
pub fn decode_file_info(payload: &[u8]) -> Result<(String, u64)> {
    if payload.first() == Some(&0) {
        return Ok((String::new(), 0));
    }

    let nul_pos = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::FileError("packet-0 payload has no NUL terminator".into()))?;
    if nul_pos == 0 {
        return Err(Error::FileError("packet-0 filename is empty".into()));
    }

    let filename = std::str::from_utf8(&payload[..nul_pos])
        .map_err(|e| Error::FileError(format!("packet-0 filename is not valid UTF-8: {e}")))?
        .to_string();

    let size_bytes = &payload[nul_pos + 1..];
    let size_end = size_bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(size_bytes.len());
    let size = if size_end == 0 {
        0
    } else {
        std::str::from_utf8(&size_bytes[..size_end])
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| Error::FileError("packet-0 size field is not a valid number".into()))?
    };

    Ok((filename, size))
}

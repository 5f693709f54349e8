//! Wire format encoding and decoding.
//!
//! Implements the TCP "full" transport packet layout:
//! ```text
//! ┌──────────┬──────────────┬─────────────────┬──────────┐
//! │ Length   │ Packet no.   │ Payload         │ CRC32    │
//! │ 4 bytes  │ 4 bytes      │ length-12 bytes │ 4 bytes  │
//! │ uint32 LE│ int32 LE     │                 │ uint32 LE│
//! └──────────┴──────────────┴─────────────────┴──────────┘
//! ```
//!
//! `length` counts the whole packet, itself and the checksum included.
//! The checksum is CRC-32 (IEEE) over everything that precedes it.

use crate::error::{MtwireError, Result};

/// Size of the length prefix.
pub const LENGTH_SIZE: usize = 4;

/// Length prefix plus packet number.
pub const HEADER_SIZE: usize = 8;

/// Size of the CRC32 trailer.
pub const CHECKSUM_SIZE: usize = 4;

/// Bytes every packet carries besides its payload.
pub const PACKET_OVERHEAD: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Shortest valid packet (empty payload).
pub const MIN_PACKET_LENGTH: usize = PACKET_OVERHEAD;

/// Default upper bound for an incoming packet (1 MB payload plus overhead).
pub const DEFAULT_MAX_PACKET_LENGTH: usize = 1024 * 1024 + PACKET_OVERHEAD;

/// Largest payload whose packet length still fits the `u32` prefix.
pub const MAX_PAYLOAD_LENGTH: usize = u32::MAX as usize - PACKET_OVERHEAD;

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet length in bytes.
    pub length: u32,
    /// Sequence number of the packet within its direction.
    pub packet_number: i32,
}

impl PacketHeader {
    /// Header for a packet carrying `payload_length` bytes.
    ///
    /// Fails with `SizeExceeded` when the packet length would not fit the
    /// `u32` prefix.
    pub fn for_payload(packet_number: i32, payload_length: usize) -> Result<Self> {
        let length = payload_length
            .checked_add(PACKET_OVERHEAD)
            .and_then(|length| u32::try_from(length).ok())
            .ok_or(MtwireError::SizeExceeded {
                requested: payload_length,
                max: MAX_PAYLOAD_LENGTH,
            })?;

        Ok(Self {
            length,
            packet_number,
        })
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use mtwire_client::protocol::PacketHeader;
    ///
    /// let header = PacketHeader::for_payload(1, 2).unwrap();
    /// assert_eq!(header.encode(), [14, 0, 0, 0, 1, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.packet_number.to_le_bytes());
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            length: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            packet_number: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Payload bytes implied by `length`.
    #[inline]
    pub fn payload_length(&self) -> usize {
        (self.length as usize).saturating_sub(PACKET_OVERHEAD)
    }

    /// Check the announced length against protocol and local bounds.
    pub fn validate(&self, max_packet_length: usize) -> Result<()> {
        validate_length(self.length, max_packet_length).map(|_| ())
    }
}

/// Check an announced packet length and convert it to `usize`.
pub fn validate_length(length: u32, max_packet_length: usize) -> Result<usize> {
    let length = length as usize;

    if length < MIN_PACKET_LENGTH {
        return Err(MtwireError::FramingCorruption(format!(
            "packet length {} below minimum {}",
            length, MIN_PACKET_LENGTH
        )));
    }

    if length > max_packet_length {
        return Err(MtwireError::FramingCorruption(format!(
            "packet length {} exceeds maximum {}",
            length, max_packet_length
        )));
    }

    Ok(length)
}

/// CRC-32 (IEEE) of a byte range.
#[inline]
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_little_endian_byte_order() {
        let header = PacketHeader {
            length: 0x0403_0201,
            packet_number: 0x0807_0605,
        };

        assert_eq!(header.encode(), [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_negative_packet_number() {
        let header = PacketHeader {
            length: 12,
            packet_number: -1,
        };
        let bytes = header.encode();
        assert_eq!(&bytes[4..8], &[0xFF; 4]);
        assert_eq!(PacketHeader::decode(&bytes).unwrap().packet_number, -1);
    }

    #[test]
    fn test_for_payload_counts_overhead() {
        let header = PacketHeader::for_payload(7, 100).unwrap();
        assert_eq!(header.length, 112);
        assert_eq!(header.payload_length(), 100);
    }

    #[test]
    fn test_for_payload_rejects_length_beyond_prefix() {
        let header = PacketHeader::for_payload(0, MAX_PAYLOAD_LENGTH).unwrap();
        assert_eq!(header.length, u32::MAX);

        let err = PacketHeader::for_payload(0, MAX_PAYLOAD_LENGTH + 1).unwrap_err();
        assert!(matches!(
            err,
            MtwireError::SizeExceeded { requested, max }
                if requested == MAX_PAYLOAD_LENGTH + 1 && max == MAX_PAYLOAD_LENGTH
        ));

        let err = PacketHeader::for_payload(0, usize::MAX).unwrap_err();
        assert!(matches!(err, MtwireError::SizeExceeded { .. }));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(PacketHeader::decode(&[0u8; 7]).is_none());
    }

    #[test]
    fn test_validate_length_bounds() {
        assert_eq!(validate_length(12, 100).unwrap(), 12);
        assert_eq!(validate_length(100, 100).unwrap(), 100);

        let err = validate_length(11, 100).unwrap_err();
        assert!(err.to_string().contains("below minimum"));

        let err = validate_length(101, 100).unwrap_err();
        assert!(matches!(err, MtwireError::FramingCorruption(_)));
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_checksum_known_vector() {
        // Standard CRC-32 check value.
        assert_eq!(checksum(b"123456789"), 0xCBF4_3926);
    }
}

//! Packets: serialization of outgoing ones, typed access to incoming ones.
//!
//! An [`InboundPacket`] owns the bucket the framer filled, so the bytes
//! stay in the ocean until the consumer drops the packet.
//!
//! # Example
//!
//! ```
//! use mtwire_client::protocol::{write_packet, PACKET_OVERHEAD};
//!
//! let bytes = write_packet(1, b"AB").unwrap();
//! assert_eq!(bytes.len(), PACKET_OVERHEAD + 2);
//! assert_eq!(&bytes[8..10], b"AB");
//! ```

use bytes::BufMut;

use super::wire_format::{checksum, PacketHeader, CHECKSUM_SIZE, HEADER_SIZE, PACKET_OVERHEAD};
use crate::error::{MtwireError, Result};
use crate::ocean::Bucket;

/// A complete packet received from the wire, held in a leased bucket.
#[derive(Debug)]
pub struct InboundPacket {
    bucket: Bucket,
}

impl InboundPacket {
    /// Wrap a bucket whose used range holds one whole packet.
    pub(crate) fn new(bucket: Bucket) -> Self {
        Self { bucket }
    }

    /// All packet bytes, length prefix and checksum included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.bucket.used()
    }

    /// Decoded length and packet number.
    pub fn header(&self) -> PacketHeader {
        let bytes = self.as_bytes();
        PacketHeader::decode(bytes).unwrap_or(PacketHeader {
            length: bytes.len() as u32,
            packet_number: 0,
        })
    }

    #[inline]
    pub fn packet_number(&self) -> i32 {
        self.header().packet_number
    }

    /// Total packet length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload().is_empty()
    }

    /// Payload bytes between header and checksum.
    pub fn payload(&self) -> &[u8] {
        let bytes = self.as_bytes();
        if bytes.len() < PACKET_OVERHEAD {
            return &[];
        }
        &bytes[HEADER_SIZE..bytes.len() - CHECKSUM_SIZE]
    }

    /// Checksum carried in the trailer.
    pub fn checksum(&self) -> u32 {
        let bytes = self.as_bytes();
        match bytes.len().checked_sub(CHECKSUM_SIZE) {
            Some(start) if bytes.len() >= PACKET_OVERHEAD => {
                u32::from_le_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]])
            }
            _ => 0,
        }
    }

    /// Compare the trailer against the CRC of the preceding bytes.
    pub fn verify_checksum(&self) -> Result<()> {
        let bytes = self.as_bytes();
        if bytes.len() < PACKET_OVERHEAD {
            return Err(MtwireError::FramingCorruption(format!(
                "packet of {} bytes is shorter than its header",
                bytes.len()
            )));
        }

        let expected = checksum(&bytes[..bytes.len() - CHECKSUM_SIZE]);
        let actual = self.checksum();
        if expected != actual {
            return Err(MtwireError::FramingCorruption(format!(
                "checksum mismatch on packet {}: expected {:#010x}, got {:#010x}",
                self.packet_number(),
                expected,
                actual
            )));
        }
        Ok(())
    }

    /// Borrow the underlying bucket.
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Take ownership of the underlying bucket.
    pub fn into_bucket(self) -> Bucket {
        self.bucket
    }
}

/// Serialize a complete packet into a fresh byte vector.
pub fn write_packet(packet_number: i32, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(PACKET_OVERHEAD + payload.len());
    write_packet_into(&mut buf, packet_number, payload)?;
    Ok(buf)
}

/// Serialize a complete packet into `dst`.
///
/// Returns the number of bytes written. Fails with `SizeExceeded`, before
/// touching `dst`, when the payload is too long for the length prefix.
pub fn write_packet_into<B: BufMut>(
    dst: &mut B,
    packet_number: i32,
    payload: &[u8],
) -> Result<usize> {
    let header = PacketHeader::for_payload(packet_number, payload.len())?.encode();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header);
    hasher.update(payload);

    dst.put_slice(&header);
    dst.put_slice(payload);
    dst.put_u32_le(hasher.finalize());

    Ok(PACKET_OVERHEAD + payload.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocean::{ArenaConfig, Ocean};
    use bytes::BytesMut;

    fn packet_from(bytes: &[u8]) -> (Ocean, InboundPacket) {
        let ocean = Ocean::new(ArenaConfig::new().class(256, 1)).unwrap();
        let mut bucket = ocean.try_take(bytes.len()).unwrap().unwrap();
        bucket.extend_from_slice(bytes).unwrap();
        (ocean, InboundPacket::new(bucket))
    }

    #[test]
    fn test_write_packet_layout() {
        let bytes = write_packet(2, b"CD").unwrap();

        assert_eq!(&bytes[0..4], &14u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[8..10], b"CD");
        assert_eq!(&bytes[10..14], &checksum(&bytes[..10]).to_le_bytes());
    }

    #[test]
    fn test_write_packet_into_appends() {
        let mut dst = BytesMut::from(&b"xx"[..]);
        let written = write_packet_into(&mut dst, 5, b"hello").unwrap();

        assert_eq!(written, PACKET_OVERHEAD + 5);
        assert_eq!(dst.len(), 2 + written);
        assert_eq!(&dst[..2], b"xx");
        assert_eq!(&dst[2..], &write_packet(5, b"hello").unwrap()[..]);
    }

    #[test]
    fn test_inbound_accessors() {
        let (_ocean, packet) = packet_from(&write_packet(9, b"payload").unwrap());

        assert_eq!(packet.packet_number(), 9);
        assert_eq!(packet.len(), PACKET_OVERHEAD + 7);
        assert_eq!(packet.payload(), b"payload");
        assert_eq!(packet.header().length as usize, packet.len());
        assert!(packet.verify_checksum().is_ok());
    }

    #[test]
    fn test_empty_payload() {
        let (_ocean, packet) = packet_from(&write_packet(0, b"").unwrap());
        assert!(packet.is_empty());
        assert!(packet.verify_checksum().is_ok());
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let mut bytes = write_packet(3, b"data").unwrap();
        bytes[9] ^= 0xFF;
        let (_ocean, packet) = packet_from(&bytes);

        let err = packet.verify_checksum().unwrap_err();
        assert!(matches!(err, MtwireError::FramingCorruption(_)));
        assert!(err.to_string().contains("checksum mismatch on packet 3"));
    }

    #[test]
    fn test_dropping_packet_releases_bucket() {
        let (ocean, packet) = packet_from(&write_packet(1, b"x").unwrap());
        assert_eq!(ocean.free_count(256), Some(0));
        drop(packet);
        assert_eq!(ocean.free_count(256), Some(1));
    }
}

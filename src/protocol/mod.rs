//! Protocol module - wire format, framing, and packet types.
//!
//! This module implements the packet layer of the data stream:
//! - 8-byte header and CRC32 trailer encoding/decoding
//! - Packet framer for reassembling partial reads into leased buckets
//! - Packet serialization for the write path

mod framer;
mod packet;
mod wire_format;

pub use framer::{PacketFramer, PacketStream};
pub use packet::{write_packet, write_packet_into, InboundPacket};
pub use wire_format::{
    checksum, validate_length, PacketHeader, CHECKSUM_SIZE, DEFAULT_MAX_PACKET_LENGTH,
    HEADER_SIZE, LENGTH_SIZE, MAX_PAYLOAD_LENGTH, MIN_PACKET_LENGTH, PACKET_OVERHEAD,
};

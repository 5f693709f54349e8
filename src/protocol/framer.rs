//! Packet framer: reassembles packets from arbitrarily split socket reads.
//!
//! Implements a state machine for handling fragmented packets:
//! - `Idle`: no packet in progress
//! - `AccumulatingLength`: collecting the 4-byte length prefix
//! - `AccumulatingBody`: length known, bucket leased, filling it
//!
//! Once the length prefix is complete the framer leases a bucket of that size
//! from the [`Ocean`] and copies bytes straight into it. Completed packets are
//! checksummed and pushed onto the [`PacketStream`]; from then on the consumer
//! owns the bucket.
//!
//! # Example
//!
//! ```
//! use mtwire_client::ocean::{ArenaConfig, Ocean};
//! use mtwire_client::protocol::{write_packet, PacketFramer};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mtwire_client::error::Result<()> {
//! let ocean = Ocean::new(ArenaConfig::new().class(64, 4))?;
//! let (mut framer, mut packets) = PacketFramer::new(ocean);
//!
//! let mut wire = write_packet(1, b"AB").unwrap();
//! wire.extend_from_slice(&write_packet(2, b"CD").unwrap());
//! framer.process_incoming(&wire).await?;
//!
//! assert_eq!(packets.try_recv().unwrap().payload(), b"AB");
//! assert_eq!(packets.try_recv().unwrap().payload(), b"CD");
//! # Ok(())
//! # }
//! ```

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::packet::InboundPacket;
use super::wire_format::{validate_length, DEFAULT_MAX_PACKET_LENGTH, LENGTH_SIZE};
use crate::error::{MtwireError, Result};
use crate::ocean::{Bucket, Ocean};

/// State machine for packet parsing.
#[derive(Debug)]
enum State {
    /// No packet in progress.
    Idle,
    /// Collecting the length prefix.
    AccumulatingLength {
        prefix: [u8; LENGTH_SIZE],
        filled: usize,
    },
    /// Filling a leased bucket up to `length` bytes.
    AccumulatingBody { bucket: Bucket, length: usize },
}

/// Receiving side of the framer's completed-packet stream.
///
/// Packets arrive in completion order. Dropping a packet returns its bucket
/// to the ocean.
pub struct PacketStream {
    rx: mpsc::UnboundedReceiver<InboundPacket>,
}

impl PacketStream {
    /// Wait for the next completed packet.
    ///
    /// Returns `None` once the framer is gone and the stream is drained.
    pub async fn recv(&mut self) -> Option<InboundPacket> {
        self.rx.recv().await
    }

    /// Take a completed packet if one is ready.
    pub fn try_recv(&mut self) -> Option<InboundPacket> {
        self.rx.try_recv().ok()
    }
}

/// Incremental stream-to-packet assembler.
pub struct PacketFramer {
    ocean: Ocean,
    state: State,
    tx: mpsc::UnboundedSender<InboundPacket>,
    cancel: CancellationToken,
    max_packet_length: usize,
}

impl PacketFramer {
    /// Create a framer leasing from `ocean`, with the default packet limit.
    pub fn new(ocean: Ocean) -> (Self, PacketStream) {
        Self::with_max_packet_length(ocean, DEFAULT_MAX_PACKET_LENGTH)
    }

    /// Create a framer with a custom packet limit.
    ///
    /// The limit is clamped to the largest bucket the ocean can lease.
    pub fn with_max_packet_length(ocean: Ocean, max_packet_length: usize) -> (Self, PacketStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let max_packet_length = max_packet_length.min(ocean.max_bucket_size());

        let framer = Self {
            ocean,
            state: State::Idle,
            tx,
            cancel: CancellationToken::new(),
            max_packet_length,
        };
        (framer, PacketStream { rx })
    }

    /// Whether a packet is partially assembled.
    #[inline]
    pub fn is_processing_packet(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Largest packet the framer accepts.
    #[inline]
    pub fn max_packet_length(&self) -> usize {
        self.max_packet_length
    }

    /// Token that aborts a `process_incoming` call waiting for a bucket.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drop any partially assembled packet, releasing its bucket.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Consume a chunk of stream bytes.
    ///
    /// The chunk may hold any number of packets and may end mid-packet; the
    /// partial state carries over to the next call. May wait for the ocean
    /// when a packet's bucket is not immediately available.
    ///
    /// Returns the number of packets emitted by this call.
    ///
    /// # Errors
    ///
    /// - `FramingCorruption` on an out-of-range length or a checksum mismatch;
    ///   the framer is reset and the stream should be torn down.
    /// - `Cancelled` if the cancellation token fired while waiting for a bucket.
    /// - `ConnectionClosed` if the packet stream receiver is gone.
    pub async fn process_incoming(&mut self, mut data: &[u8]) -> Result<usize> {
        let mut emitted = 0;

        loop {
            match &mut self.state {
                State::Idle => {
                    if data.is_empty() {
                        break;
                    }
                    self.state = State::AccumulatingLength {
                        prefix: [0; LENGTH_SIZE],
                        filled: 0,
                    };
                }

                State::AccumulatingLength { prefix, filled } => {
                    if *filled < LENGTH_SIZE {
                        if data.is_empty() {
                            break;
                        }
                        let n = (LENGTH_SIZE - *filled).min(data.len());
                        prefix[*filled..*filled + n].copy_from_slice(&data[..n]);
                        *filled += n;
                        data = &data[n..];
                        continue;
                    }

                    let prefix = *prefix;
                    let length =
                        match validate_length(u32::from_le_bytes(prefix), self.max_packet_length) {
                            Ok(length) => length,
                            Err(e) => {
                                tracing::warn!("Rejecting packet: {}", e);
                                self.state = State::Idle;
                                return Err(e);
                            }
                        };

                    let mut bucket = self.ocean.take(length, &self.cancel).await?;
                    bucket.extend_from_slice(&prefix)?;
                    self.state = State::AccumulatingBody { bucket, length };
                }

                State::AccumulatingBody { bucket, length } => {
                    let n = (*length - bucket.used_length()).min(data.len());
                    bucket.extend_from_slice(&data[..n])?;
                    data = &data[n..];

                    if bucket.used_length() < *length {
                        break;
                    }

                    if let State::AccumulatingBody { bucket, .. } =
                        std::mem::replace(&mut self.state, State::Idle)
                    {
                        self.emit(bucket)?;
                        emitted += 1;
                    }
                }
            }
        }

        Ok(emitted)
    }

    fn emit(&self, bucket: Bucket) -> Result<()> {
        let packet = InboundPacket::new(bucket);

        if let Err(e) = packet.verify_checksum() {
            tracing::warn!("Dropping corrupted packet: {}", e);
            return Err(e);
        }

        tracing::trace!(
            packet_number = packet.packet_number(),
            length = packet.len(),
            "packet complete"
        );

        self.tx
            .send(packet)
            .map_err(|_| MtwireError::ConnectionClosed)
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::Idle => "Idle",
            State::AccumulatingLength { .. } => "AccumulatingLength",
            State::AccumulatingBody { .. } => "AccumulatingBody",
        }
    }
}

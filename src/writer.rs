//! Dedicated writer task for outbound packets.
//!
//! Callers hand message payloads to a [`WriterHandle`]; a single task owns
//! the write half of the stream, frames each payload into a packet and
//! batches whatever is queued into one vectored write.
//!
//! ```text
//! invoke 1 ─┐
//! invoke 2 ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► Stream
//! invoke N ─┘
//! ```
//!
//! Packet numbers are assigned by the task in the order packets hit the
//! stream, starting at 0. Cancelling the task's token stops it and shuts
//! the write half down; anything still queued is discarded.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{MtwireError, Result};
use crate::protocol::{PacketHeader, CHECKSUM_SIZE, HEADER_SIZE, MAX_PAYLOAD_LENGTH};

/// Maximum packets to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A packet ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundPacket {
    /// Encoded length and packet number.
    pub header: [u8; HEADER_SIZE],
    /// Serialized message envelope.
    pub payload: Bytes,
    /// CRC32 of header and payload, little-endian.
    pub trailer: [u8; CHECKSUM_SIZE],
}

impl OutboundPacket {
    /// Frame `payload`. Fails with `SizeExceeded` past `MAX_PAYLOAD_LENGTH`.
    pub fn new(packet_number: i32, payload: Bytes) -> Result<Self> {
        let header = PacketHeader::for_payload(packet_number, payload.len())?.encode();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(&payload);

        Ok(Self {
            header,
            payload,
            trailer: hasher.finalize().to_le_bytes(),
        })
    }

    /// Total size of this packet on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + CHECKSUM_SIZE
    }
}

/// Handle for queueing payloads on the writer task.
///
/// Cheaply cloneable. The task exits once every handle is dropped.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    /// Payloads queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    /// Queue a payload, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// - `SizeExceeded` if the payload cannot be framed
    /// - `ConnectionClosed` if the writer task has stopped
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(MtwireError::SizeExceeded {
                requested: payload.len(),
                max: MAX_PAYLOAD_LENGTH,
            });
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(payload).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            MtwireError::ConnectionClosed
        })
    }

    /// Number of payloads queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for queueing payloads.
///
/// The `JoinHandle` resolves when the task stops: `Ok` once all handles are
/// dropped or `cancel` fires, or the first I/O error.
pub fn spawn_writer_task<W>(
    writer: W,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle {
        tx,
        pending: pending.clone(),
    };

    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer, pending, cancel).await;
        if let Err(e) = &result {
            tracing::error!("Writer loop error: {}", e);
        }
        result
    });

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let result = write_until_stopped(&mut rx, &mut writer, &pending, &cancel).await;

    // Refuse new payloads, then account for the ones that will never be written.
    rx.close();
    let mut discarded = 0;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        pending.fetch_sub(discarded, Ordering::Release);
        tracing::debug!(discarded, "writer stopped with payloads queued");
    }

    if result.is_ok() {
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("Writer shutdown error: {}", e);
        }
    }
    result
}

async fn write_until_stopped<W>(
    rx: &mut mpsc::Receiver<Bytes>,
    writer: &mut W,
    pending: &AtomicUsize,
    cancel: &CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut packet_number: i32 = 0;
    let mut payloads = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            payload = rx.recv() => match payload {
                Some(payload) => payload,
                None => return Ok(()),
            },
        };

        payloads.push(first);
        while payloads.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(payload) => payloads.push(payload),
                Err(_) => break,
            }
        }

        let count = payloads.len();
        let written = write_payloads(writer, &mut packet_number, payloads.drain(..)).await;
        pending.fetch_sub(count, Ordering::Release);
        written?;

        tracing::trace!(packets = count, "wrote batch");
    }
}

/// Frame `payloads` with consecutive packet numbers and write them as one batch.
async fn write_payloads<W>(
    writer: &mut W,
    packet_number: &mut i32,
    payloads: impl Iterator<Item = Bytes>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    for payload in payloads {
        batch.push(OutboundPacket::new(*packet_number, payload)?);
        *packet_number = packet_number.wrapping_add(1);
    }
    write_batch(writer, &batch).await
}

/// Write a batch of packets with vectored I/O, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundPacket]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundPacket::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(MtwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundPacket], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 3);
    let mut offset = 0;

    for packet in batch {
        for part in [&packet.header[..], &packet.payload[..], &packet.trailer[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocean::{ArenaConfig, Ocean};
    use crate::protocol::{write_packet, PacketFramer};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_outbound_packet_matches_write_packet() {
        let packet = OutboundPacket::new(3, Bytes::from_static(b"hello")).unwrap();
        assert_eq!(packet.size(), 17);

        let mut bytes = packet.header.to_vec();
        bytes.extend_from_slice(&packet.payload);
        bytes.extend_from_slice(&packet.trailer);
        assert_eq!(bytes, write_packet(3, b"hello").unwrap());
    }

    #[test]
    fn test_remaining_slices_skip_partial_parts() {
        let batch = vec![
            OutboundPacket::new(0, Bytes::from_static(b"abc")).unwrap(),
            OutboundPacket::new(1, Bytes::new()).unwrap(),
        ];

        let all = build_remaining_slices(&batch, 0);
        assert_eq!(all.len(), 5);

        // Into the first payload.
        let slices = build_remaining_slices(&batch, HEADER_SIZE + 1);
        assert_eq!(&slices[0][..], b"bc");
        assert_eq!(slices.len(), 4);

        // Into the second header.
        let slices = build_remaining_slices(&batch, 15 + 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 2);
        assert_eq!(slices.len(), 2);

        assert!(build_remaining_slices(&batch, 15 + 12).is_empty());
    }

    #[tokio::test]
    async fn test_packets_numbered_in_write_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, task) = spawn_writer_task(client, 16, CancellationToken::new());

        for payload in [&b"first"[..], b"second", b"third"] {
            handle.send(Bytes::copy_from_slice(payload)).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();

        let mut expected = write_packet(0, b"first").unwrap();
        expected.extend(write_packet(1, b"second").unwrap());
        expected.extend(write_packet(2, b"third").unwrap());
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_written_packets_pass_through_framer() {
        let (client, mut server) = duplex(1024);
        let (handle, _task) = spawn_writer_task(client, 16, CancellationToken::new());

        for n in 0..10u8 {
            handle.send(Bytes::from(vec![n; 40])).await.unwrap();
        }

        let ocean = Ocean::new(ArenaConfig::new().class(64, 4)).unwrap();
        let (mut framer, mut packets) = PacketFramer::new(ocean);

        let mut buf = [0u8; 100];
        let mut seen = 0;
        while seen < 10 {
            let n = server.read(&mut buf).await.unwrap();
            framer.process_incoming(&buf[..n]).await.unwrap();
            while let Some(packet) = packets.try_recv() {
                assert_eq!(packet.packet_number(), seen as i32);
                assert_eq!(packet.payload(), &[seen; 40][..]);
                seen += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_pending_count_drains() {
        let (client, _server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, 16, CancellationToken::new());

        handle.send(Bytes::from_static(b"x")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.pending_count() != 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_send_after_writer_failure() {
        let (client, server) = duplex(64);
        drop(server);
        let (handle, task) = spawn_writer_task(client, 16, CancellationToken::new());

        for payload in [&b"lost"[..], b"also lost", b"and this"] {
            handle.send(Bytes::copy_from_slice(payload)).await.unwrap();
        }
        assert!(task.await.unwrap().is_err());

        assert!(handle.is_closed());
        assert_eq!(handle.pending_count(), 0);

        let err = handle.send(Bytes::from_static(b"late")).await.unwrap_err();
        assert!(matches!(err, MtwireError::ConnectionClosed));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_writer_and_closes_stream() {
        let (client, mut server) = duplex(1024);
        let cancel = CancellationToken::new();
        let (handle, task) = spawn_writer_task(client, 16, cancel.clone());

        handle.send(Bytes::from_static(b"before")).await.unwrap();
        let mut expected = write_packet(0, b"before").unwrap();
        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);

        cancel.cancel();
        task.await.unwrap().unwrap();

        let err = handle.send(Bytes::from_static(b"after")).await.unwrap_err();
        assert!(matches!(err, MtwireError::ConnectionClosed));
        assert_eq!(handle.pending_count(), 0);

        // The write half was shut down: the peer sees EOF, not more packets.
        expected.clear();
        server.read_to_end(&mut expected).await.unwrap();
        assert!(expected.is_empty());
    }
}

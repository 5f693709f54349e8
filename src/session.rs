//! Session builder and runtime loops.
//!
//! A [`Session`] drives one connected stream:
//! 1. Read loop: socket bytes into the [`PacketFramer`]
//! 2. Dispatch loop: framed packets decoded by the schema and handed to the
//!    [`ResponseHandler`]
//! 3. Writer task: outbound envelopes framed and written in batches
//!
//! # Example
//!
//! ```ignore
//! use mtwire_client::{SchemaRegistry, Session};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let schema = Arc::new(SchemaRegistry::new());
//!     schema.register::<Pong>();
//!
//!     let stream = tokio::net::TcpStream::connect("149.154.167.51:443").await?;
//!     let session = Session::builder()
//!         .schema(schema)
//!         .request_timeout(std::time::Duration::from_secs(5))
//!         .start(stream)
//!         .await?;
//!
//!     let pong: Pong = session.invoke(&Ping { ping_id: 1 }).await?;
//!     session.shutdown();
//!     session.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{encode_message, Body, MessageIdGenerator, SchemaRegistry, TypeTag, TypedBody};
use crate::config::SessionConfig;
use crate::error::{MtwireError, Result};
use crate::ocean::{ArenaConfig, Ocean};
use crate::protocol::{PacketFramer, PacketStream};
use crate::rpc::{RequestManager, ResponseHandler};
use crate::writer::{spawn_writer_task, WriterHandle};

/// Messages sent before an authorization key exists carry a zero key id.
const PLAIN_AUTH_KEY_ID: i64 = 0;

/// Builder for configuring and starting a [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    schema: Option<Arc<SchemaRegistry>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            schema: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Schema used to decode incoming bodies. Defaults to an empty registry.
    pub fn schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn arena(mut self, arena: ArenaConfig) -> Self {
        self.config.arena = arena;
        self
    }

    pub fn max_packet_length(mut self, length: usize) -> Self {
        self.config.max_packet_length = length;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Validate the configuration and start the session on `stream`.
    pub async fn start<S>(self, stream: S) -> Result<Session>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.config.validate()?;
        let schema = self.schema.unwrap_or_default();
        Session::start(stream, schema, self.config)
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running session over one stream.
///
/// Use `invoke()` for request/response calls and `wait_for_shutdown()` to
/// block until the stream closes.
pub struct Session {
    requests: RequestManager,
    schema: Arc<SchemaRegistry>,
    ocean: Ocean,
    writer: WriterHandle,
    message_ids: MessageIdGenerator,
    request_timeout: Duration,
    /// Stops the read loop (including a framer waiting for a bucket) and
    /// the writer.
    cancel: CancellationToken,
    /// Terminal outcome of the read loop.
    shutdown_rx: oneshot::Receiver<Result<()>>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    fn start<S>(stream: S, schema: Arc<SchemaRegistry>, config: SessionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let ocean = Ocean::new(config.arena.clone())?;

        let (framer, packets) =
            PacketFramer::with_max_packet_length(ocean.clone(), config.max_packet_length);
        let cancel = framer.cancellation();

        let (reader, write_half) = tokio::io::split(stream);
        let (writer, writer_task) =
            spawn_writer_task(write_half, config.channel_capacity, cancel.clone());

        let requests = RequestManager::new();
        let handler = ResponseHandler::new(requests.clone(), schema.known_types());
        tokio::spawn(Self::dispatch_loop(packets, schema.clone(), handler));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let read_buffer_size = config.read_buffer_size;
        let read_cancel = cancel.clone();
        let read_requests = requests.clone();

        tokio::spawn(async move {
            let result =
                Self::read_loop(reader, framer, read_buffer_size, read_cancel.clone()).await;
            if let Err(e) = &result {
                tracing::error!("Read loop error: {}", e);
            }

            // Stop the writer before failing requests so none can slip in after.
            read_cancel.cancel();
            let dropped = read_requests.cancel_all();
            if dropped > 0 {
                tracing::debug!(dropped, "session closed with requests in flight");
            }
            let _ = shutdown_tx.send(result);
        });

        tracing::debug!(
            arena_bytes = ocean.total_size(),
            max_packet_length = config.max_packet_length,
            "session started"
        );

        Ok(Session {
            requests,
            schema,
            ocean,
            writer,
            message_ids: MessageIdGenerator::new(),
            request_timeout: config.request_timeout,
            cancel,
            shutdown_rx,
            _writer_task: writer_task,
        })
    }

    /// Main read loop - feeds socket reads to the framer until EOF,
    /// cancellation or a framing error.
    async fn read_loop<R: AsyncRead + Unpin>(
        mut reader: R,
        mut framer: PacketFramer,
        read_buffer_size: usize,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; read_buffer_size];

        loop {
            let n = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                read = reader.read(&mut buf) => read?,
            };
            if n == 0 {
                return Ok(());
            }

            match framer.process_incoming(&buf[..n]).await {
                Ok(_) => {}
                Err(MtwireError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Decode framed packets and route them to pending requests.
    async fn dispatch_loop(
        mut packets: PacketStream,
        schema: Arc<SchemaRegistry>,
        mut handler: ResponseHandler,
    ) {
        while let Some(packet) = packets.recv().await {
            let envelope = match schema.decode_envelope(packet.payload()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        packet_number = packet.packet_number(),
                        "Dropping undecodable packet: {}",
                        e
                    );
                    continue;
                }
            };
            // The decoded body owns its data; give the bucket back first.
            drop(packet);
            handler.handle(&envelope);
        }
        handler.dispose();
    }

    /// Send `request` and wait for the next response of type `Resp`.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no response arrives within the configured timeout
    /// - `ConnectionClosed` if the session stops first
    pub async fn invoke<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: TypedBody,
        Resp: TypedBody + Clone,
    {
        let body = self.invoke_raw(request, Resp::TYPE_TAG).await?;
        body.downcast_ref::<Resp>().cloned().ok_or_else(|| {
            MtwireError::Decode(format!(
                "response {} was not decoded as the requested type",
                body.type_tag()
            ))
        })
    }

    /// Send `request` and wait for the next response tagged `expected_type`.
    pub async fn invoke_raw<Req: TypedBody>(
        &self,
        request: &Req,
        expected_type: TypeTag,
    ) -> Result<Body> {
        // Register before sending so a fast response always finds its request.
        let pending = self.requests.register(expected_type);
        if self.cancel.is_cancelled() {
            return Err(MtwireError::ConnectionClosed);
        }
        let message_id = self.send(request).await?;

        match tokio::time::timeout(self.request_timeout, pending.response()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(message_id, expected_type = %expected_type, "request timed out");
                Err(MtwireError::Timeout)
            }
        }
    }

    /// Send a message without waiting for a response. Returns its message id.
    ///
    /// Fails with `ConnectionClosed` once the session is shut down.
    pub async fn send<Req: TypedBody>(&self, request: &Req) -> Result<i64> {
        if self.cancel.is_cancelled() {
            return Err(MtwireError::ConnectionClosed);
        }
        let message_id = self.message_ids.next_id();
        let payload = encode_message(PLAIN_AUTH_KEY_ID, message_id, request)?;
        self.writer.send(Bytes::from(payload)).await?;
        Ok(message_id)
    }

    /// Stop the read loop and the writer, closing the stream.
    ///
    /// In-flight requests fail with `ConnectionClosed`, and so does every
    /// later `send` or `invoke`. Dropping the session has the same effect.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.writer.is_closed()
    }

    pub fn requests(&self) -> &RequestManager {
        &self.requests
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    pub fn ocean(&self) -> &Ocean {
        &self.ocean
    }

    /// Get the current count of queued outbound packets.
    pub fn pending_packets(&self) -> usize {
        self.writer.pending_count()
    }

    /// Wait for the read loop to stop.
    ///
    /// This consumes the session. Returns the loop's error if the stream was
    /// torn down by corruption or I/O failure.
    pub async fn wait_for_shutdown(mut self) -> Result<()> {
        (&mut self.shutdown_rx).await.unwrap_or(Ok(()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

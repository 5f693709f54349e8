//! # mtwire-client
//!
//! Transport core of an MTProto-style client.
//!
//! Incoming bytes from a stream socket are reassembled into packets inside
//! buffers leased from a fixed, size-classed arena, decoded into typed
//! messages, and routed to the requests waiting for them. Outgoing requests
//! are framed and written by a dedicated writer task.
//!
//! ## Architecture
//!
//! - **Ocean** ([`ocean`]): one preallocated region carved into size-classed
//!   buckets; callers lease a bucket and it returns on drop
//! - **Framing** ([`protocol`]): `length | packet_number | payload | crc32`
//!   packets reassembled across arbitrary read boundaries
//! - **Codec** ([`codec`]): message envelopes and tag-routed typed bodies
//! - **RPC** ([`rpc`]): pending requests matched first-in-first-out by
//!   expected response type
//! - **Session** ([`Session`]): read, dispatch and writer tasks over one stream
//!
//! ## Example
//!
//! ```ignore
//! use mtwire_client::{SchemaRegistry, Session};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mtwire_client::Result<()> {
//!     let schema = Arc::new(SchemaRegistry::new());
//!     schema.register::<Pong>();
//!
//!     let stream = tokio::net::TcpStream::connect("149.154.167.51:443").await?;
//!     let session = Session::builder().schema(schema).start(stream).await?;
//!
//!     let pong: Pong = session.invoke(&Ping { ping_id: 7 }).await?;
//!     assert_eq!(pong.ping_id, 7);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod ocean;
pub mod protocol;
pub mod rpc;
pub mod writer;

mod session;

pub use codec::{Body, MessageBody, SchemaRegistry, TypeTag, TypedBody};
pub use config::SessionConfig;
pub use error::{MtwireError, Result};
pub use ocean::{ArenaConfig, Bucket, Ocean};
pub use session::{Session, SessionBuilder};

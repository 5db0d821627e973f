//! # ringlink
//!
//! Bidirectional request/response messaging over a pair of shared-memory
//! slot rings.
//!
//! A channel connects exactly two peers — a **master** and a **slave** — in
//! separate processes on the same host. Each peer can invoke the other's
//! handler and optionally receive a byte-array result; arbitrarily-sized
//! messages are multiplexed over fixed-capacity packet slots and reassembled
//! by message id on the far side.
//!
//! ## Architecture
//!
//! - **Write path**: a send lock serializes the fragmentation loop of each
//!   message onto the outbound ring
//! - **Read loop**: one long-running task drains the inbound ring, routing
//!   replies to their pending requests and dispatching fresh requests to the
//!   configured handler on ephemeral tasks
//!
//! ## Example
//!
//! ```ignore
//! use ringlink::RingChannel;
//!
//! #[tokio::main]
//! async fn main() -> ringlink::Result<()> {
//!     let channel = RingChannel::builder("metrics")
//!         .on_request_async(|_id, data| async move { Ok(data) })
//!         .open()
//!         .await?;
//!
//!     let reply = channel.request(Some(b"ping".as_ref().into())).await?;
//!     assert!(reply.success);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod handler;
pub mod protocol;
pub mod stats;
pub mod transport;

mod channel;
mod correlation;
mod reader;
mod writer;

pub use channel::{
    ChannelBuilder, PendingResponse, Response, RingChannel, Role, DEFAULT_BUFFER_CAPACITY,
    DEFAULT_NODE_COUNT, DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{Result, RinglinkError};
pub use handler::{Handler, HandlerError, HandlerResult};
pub use protocol::{MsgType, PacketHeader, ProtocolVersion, HEADER_SIZE};
pub use stats::StatsSnapshot;

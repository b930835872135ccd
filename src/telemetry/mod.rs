//! Traffic telemetry for lantern-chain.
//!
//! Every accepted client connection is wrapped in a [`CountingStream`] that
//! reports the bytes it carries to a [`TrafficObserver`]. The default observer
//! is [`PeerStats`], an in-memory table keyed by peer IP that publishes each
//! change on a broadcast channel.
//!
//! # Architecture
//!
//! - **Traffic counts** (this module): per-peer totals, pushed to subscribers
//! - **Debug logging** (tracing): development logs go to stderr via `tracing`
//!
//! # Update Format
//!
//! Updates serialize as JSON:
//!
//! ```json
//! {"type":"peer","data":{"ip":"127.0.0.1","bytesUp":512,"bytesDn":2048,"lastSeen":"2026-01-07T14:32:01Z"}}
//! ```

mod counting;
mod peers;

pub use counting::CountingStream;
pub use peers::{NoopObserver, PeerSnapshot, PeerStats, PeerUpdate, TrafficObserver};

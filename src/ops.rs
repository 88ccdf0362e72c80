//! Operators. Each one is reached through
//! [`PublisherExt`](crate::publisher::PublisherExt); the types here are what
//! those methods return.
//!
//! Every operator routes its output through a
//! [`DemandBuffer`](crate::demand_buffer::DemandBuffer), either directly or
//! inside a [`Sink`](crate::sink::Sink), so the downstream never receives
//! more than it asked for.

pub mod amb;
pub mod concat_map;
pub mod into_stream;
pub mod map;
pub mod retry;
pub mod share_replay;
pub mod with_latest_from;

pub use amb::amb_all;

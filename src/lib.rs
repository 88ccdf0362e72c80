//! # rxdemand: demand-driven reactive streams
//!
//! Publishers, subscribers and operators with backpressure at every step:
//! a subscriber states how many values it wants through its
//! [`Subscription`], and nothing upstream delivers more.
//!
//! ## Quick Start
//!
//! ```rust
//! use rxdemand::{prelude::*, testing::TestSubscriber};
//!
//! let sub = TestSubscriber::new(Demand::max(2));
//! from_iter::<_, ()>(0..10)
//!   .filter_map(|v| (v % 2 == 0).then_some(v * 10))
//!   .subscribe(sub.clone());
//! assert_eq!(sub.values(), vec![0, 20]);
//!
//! sub.request(Demand::max(1));
//! assert_eq!(sub.values(), vec![0, 20, 40]);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] | Describes a stream; `subscribe` starts it |
//! | [`Subscriber`] | Receives a subscription, values, and one terminal event |
//! | [`Subscription`] | Carries demand upstream and cancels |
//! | [`DemandBuffer`] | FIFO that delivers only against outstanding demand |
//! | [`Sink`] | One upstream bridged into one demand buffer |
//!
//! Delivery is synchronous, in whatever context produced the event. A
//! subscriber may request more from inside `receive`; buffers and operators
//! handle that without recursing and without holding a lock across the
//! call.
//!
//! ## Feature Flags
//!
//! - **`tokio-scheduler`**: [`scheduler::TokioScheduler`], running timers
//!   and delayed retries on a tokio runtime.
//!
//! [`Publisher`]: publisher::Publisher
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`DemandBuffer`]: demand_buffer::DemandBuffer
//! [`Sink`]: sink::Sink

pub mod completion;
pub mod demand;
pub mod demand_buffer;
pub mod error;
pub mod lock;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod scheduler;
pub mod sink;
pub mod subject;
pub mod subscriber;
pub mod subscription;
pub mod testing;

pub use prelude::*;

// Bring README.md into Cargo-driven doctests.
#[cfg(doctest)]
mod __markdown_doctests {
  mod readme {
    #![doc = include_str!("../README.md")]
  }
}

//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

// Operators
pub use crate::ops::{amb_all, into_stream::PublisherStream, retry::RetryConfig};
// Core traits
pub use crate::publisher::{BoxedPublisher, Publisher, PublisherExt};
// Creation
pub use crate::publisher::{empty, fail, from_iter, just, never, TimerPublisher};
// Scheduler
pub use crate::scheduler::{Scheduler, TaskHandle, ThreadScheduler};
// Subject
pub use crate::subject::ReplaySubject;
// Subscriber and subscription
pub use crate::subscriber::{BoxedSubscriber, Subscriber, SubscriberId};
pub use crate::subscription::{Cancellable, Subscription, SubscriptionHandle};
pub use crate::{completion::Completion, demand::Demand};

//! Bridge from a [`Publisher`] to a [`futures::Stream`].
//!
//! The stream asks for one value per poll: nothing is requested until the
//! stream is polled, and a value is only requested again once the previous
//! one was taken. Dropping the stream cancels the subscription.
//!
//! ```rust
//! use futures::{executor::block_on, StreamExt};
//! use rxdemand::prelude::*;
//!
//! let values: Vec<_> = block_on(from_iter::<_, ()>(1..=3).into_stream().collect());
//! assert_eq!(values, vec![Ok(1), Ok(2), Ok(3)]);
//! ```

use std::{
  collections::VecDeque,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll, Waker},
};

use futures::Stream;

use crate::{
  completion::Completion,
  demand::Demand,
  lock::Lock,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::SubscriptionHandle,
};

struct StreamState<Item, Err> {
  queue: VecDeque<Result<Item, Err>>,
  subscription: Option<SubscriptionHandle>,
  waker: Option<Waker>,
  /// One unit of demand is outstanding.
  requested: bool,
  closed: bool,
}

type Shared<Item, Err> = Arc<Lock<StreamState<Item, Err>>>;

/// Created by
/// [`PublisherExt::into_stream`](crate::publisher::PublisherExt::into_stream).
///
/// Yields `Ok` for every value and `Err` for a failure, then ends.
pub struct PublisherStream<Item, Err> {
  shared: Shared<Item, Err>,
}

impl<Item, Err> PublisherStream<Item, Err>
where
  Item: Send + 'static,
  Err: Send + 'static,
{
  /// Subscribes to `publisher` right away.
  pub fn new<P>(publisher: P) -> Self
  where
    P: Publisher<Item = Item, Err = Err>,
  {
    let shared = Arc::new(Lock::new(StreamState {
      queue: VecDeque::new(),
      subscription: None,
      waker: None,
      requested: false,
      closed: false,
    }));
    publisher.subscribe(StreamSubscriber(shared.clone()));
    Self { shared }
  }
}

impl<Item, Err> PublisherStream<Item, Err> {
  fn take_ready(&self) -> Option<Option<Result<Item, Err>>> {
    let mut st = self.shared.lock();
    match st.queue.pop_front() {
      Some(item) => Some(Some(item)),
      None if st.closed => Some(None),
      None => None,
    }
  }
}

impl<Item, Err> Stream for PublisherStream<Item, Err> {
  type Item = Result<Item, Err>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    if let Some(ready) = self.take_ready() {
      return Poll::Ready(ready);
    }
    let request = self.shared.with(|st| {
      st.waker = Some(cx.waker().clone());
      if st.requested {
        return None;
      }
      st.requested = true;
      st.subscription.clone()
    });
    if let Some(subscription) = request {
      subscription.request(Demand::max(1));
    }
    // A synchronous publisher delivers from inside `request`.
    match self.take_ready() {
      Some(ready) => Poll::Ready(ready),
      None => Poll::Pending,
    }
  }
}

impl<Item, Err> Drop for PublisherStream<Item, Err> {
  fn drop(&mut self) {
    let subscription = self.shared.with(|st| {
      st.closed = true;
      st.queue.clear();
      st.subscription.take()
    });
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }
}

struct StreamSubscriber<Item, Err>(Shared<Item, Err>);

impl<Item, Err> StreamSubscriber<Item, Err> {
  fn wake(&self, waker: Option<Waker>) {
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

impl<Item, Err> Subscriber<Item, Err> for StreamSubscriber<Item, Err> {
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    let request = self.0.with(|st| {
      if st.closed || st.subscription.is_some() {
        return None;
      }
      st.subscription = Some(subscription.clone());
      Some(st.requested)
    });
    match request {
      Some(true) => subscription.request(Demand::max(1)),
      Some(false) => {}
      None => subscription.cancel(),
    }
  }

  fn receive(&mut self, value: Item) -> Demand {
    let waker = self.0.with(|st| {
      if st.closed {
        return None;
      }
      st.queue.push_back(Ok(value));
      st.requested = false;
      st.waker.take()
    });
    self.wake(waker);
    Demand::none()
  }

  fn receive_completion(self, completion: Completion<Err>) {
    let (waker, subscription) = self.0.with(|st| {
      if let Completion::Failed(err) = completion {
        if !st.closed {
          st.queue.push_back(Err(err));
        }
      }
      st.closed = true;
      (st.waker.take(), st.subscription.take())
    });
    drop(subscription);
    self.wake(waker);
  }
}

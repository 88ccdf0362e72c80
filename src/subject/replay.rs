//! A multicast publisher that replays recent history to late subscribers.

use std::{collections::VecDeque, fmt, sync::Arc};

use tracing::{debug, trace};

use super::subscribers::{Conduit, Subscribers};
use crate::{
  completion::Completion,
  demand::Demand,
  demand_buffer::BufferConfig,
  lock::Lock,
  publisher::Publisher,
  subscriber::{BoxedSubscriber, Subscriber, SubscriberId},
  subscription::{EmptySubscription, SubscriptionHandle},
};

struct Entry<Item, Err> {
  identity: Option<SubscriberId>,
  conduit: Arc<Conduit<Item, Err>>,
}

struct ReplayState<Item, Err> {
  max_size: usize,
  history: VecDeque<Item>,
  completion: Option<Completion<Err>>,
  subscribers: Subscribers<Entry<Item, Err>>,
  /// Set while the subject itself is subscribed to a source.
  upstream: Option<SubscriptionHandle>,
}

/// Records the last `max_size` values and broadcasts everything it is sent.
///
/// Every subscriber gets its own demand buffer, preloaded with the recorded
/// history and then fed live values, so a slow subscriber never holds back
/// a fast one. A terminal event is recorded too: subscribers arriving after it
/// receive the history followed by the terminal event.
///
/// A subscriber whose [`identity`](Subscriber::identity) is already
/// subscribed is rejected with an empty subscription and an immediate
/// `Finished`; the first subscription carries on untouched.
///
/// ```rust
/// use rxdemand::{prelude::*, testing::TestSubscriber};
///
/// let subject = ReplaySubject::<i32, ()>::new(2);
/// subject.send(1);
/// subject.send(2);
/// subject.send(3);
///
/// let seen = TestSubscriber::new(Demand::unlimited());
/// subject.clone().subscribe(seen.clone());
/// assert_eq!(seen.values(), vec![2, 3]);
/// ```
pub struct ReplaySubject<Item, Err> {
  state: Arc<Lock<ReplayState<Item, Err>>>,
}

impl<Item, Err> Clone for ReplaySubject<Item, Err> {
  fn clone(&self) -> Self { Self { state: self.state.clone() } }
}

impl<Item, Err> ReplaySubject<Item, Err> {
  pub fn new(max_size: usize) -> Self {
    Self {
      state: Arc::new(Lock::new(ReplayState {
        max_size,
        history: VecDeque::with_capacity(max_size.min(64)),
        completion: None,
        subscribers: Subscribers::default(),
        upstream: None,
      })),
    }
  }

  pub fn max_size(&self) -> usize { self.state.lock().max_size }

  /// Number of live subscribers.
  pub fn subscriber_count(&self) -> usize { self.state.lock().subscribers.len() }

  pub fn is_completed(&self) -> bool { self.state.lock().completion.is_some() }
}

impl<Item, Err> ReplaySubject<Item, Err>
where
  Item: Clone + Send + 'static,
  Err: Clone + Send + 'static,
{
  /// The values a new subscriber would be replayed, oldest first.
  pub fn history(&self) -> Vec<Item> { self.state.lock().history.iter().cloned().collect() }

  /// Records `value` and delivers it to every subscriber's buffer.
  pub fn send(&self, value: Item) {
    let conduits = self.state.with(|st| {
      if st.completion.is_some() {
        return None;
      }
      if st.max_size > 0 {
        if st.history.len() == st.max_size {
          st.history.pop_front();
        }
        st.history.push_back(value.clone());
      }
      Some(st.subscribers.snapshot(|e| e.conduit.clone()))
    });
    let Some(conduits) = conduits else {
      debug!("value sent to completed replay subject, ignored");
      return;
    };
    let mut iter = conduits.into_iter().peekable();
    while let Some(conduit) = iter.next() {
      if iter.peek().is_some() {
        conduit.buffer().buffer(value.clone());
      } else {
        conduit.buffer().buffer(value);
        break;
      }
    }
  }

  /// Records the terminal event and forwards it to every subscriber. Only
  /// the first call has any effect.
  pub fn send_completion(&self, completion: Completion<Err>) {
    let finished = self.state.with(|st| {
      if st.completion.is_some() {
        return None;
      }
      st.completion = Some(completion.clone());
      let conduits: Vec<_> = st.subscribers.drain().map(|e| e.conduit).collect();
      Some((conduits, st.upstream.take()))
    });
    let Some((conduits, upstream)) = finished else {
      debug!("duplicate terminal event on replay subject ignored");
      return;
    };
    drop(upstream);
    for conduit in conduits {
      conduit.buffer().complete(completion.clone());
    }
  }

  fn subscribe_boxed(&self, mut subscriber: BoxedSubscriber<Item, Err>) {
    let identity = subscriber.identity();
    let mut st = self.state.lock();
    let duplicate = identity
      .as_ref()
      .is_some_and(|id| st.subscribers.iter().any(|e| e.identity.as_ref() == Some(id)));
    if duplicate {
      drop(st);
      debug!(?identity, "subscriber already subscribed to replay subject, rejected");
      subscriber.receive_subscription(EmptySubscription::handle());
      subscriber.receive_completion(Completion::Finished);
      return;
    }

    let id = st.subscribers.reserve_id();
    let registry = Arc::downgrade(&self.state);
    let conduit = Arc::new(Conduit::new(id, subscriber, BufferConfig::default(), move |id| {
      if let Some(state) = registry.upgrade() {
        let removed = state.with(|st| st.subscribers.remove(id));
        if removed.is_some() {
          trace!(id, "replay subscriber removed");
        }
        drop(removed);
      }
    }));
    // The buffer is not attached yet, so nothing is delivered under the lock.
    for value in st.history.iter() {
      conduit.buffer().buffer(value.clone());
    }
    match st.completion.clone() {
      Some(completion) => conduit.buffer().complete(completion),
      None => st
        .subscribers
        .insert(id, Entry { identity, conduit: conduit.clone() }),
    }
    drop(st);

    let _ = conduit.buffer().attach(conduit.clone());
  }
}

impl<Item, Err> Publisher for ReplaySubject<Item, Err>
where
  Item: Clone + Send + 'static,
  Err: Clone + Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Item, Err> + Send + 'static,
  {
    self.subscribe_boxed(Box::new(subscriber))
  }
}

/// A replay subject can itself subscribe to a source. It asks for
/// everything and records what arrives.
impl<Item, Err> Subscriber<Item, Err> for ReplaySubject<Item, Err>
where
  Item: Clone + Send + 'static,
  Err: Clone + Send + 'static,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    let accepted = self.state.with(|st| {
      if st.completion.is_some() || st.upstream.is_some() {
        return false;
      }
      st.upstream = Some(subscription.clone());
      true
    });
    if accepted {
      subscription.request(Demand::unlimited());
    } else {
      subscription.cancel();
    }
  }

  fn receive(&mut self, value: Item) -> Demand {
    self.send(value);
    Demand::none()
  }

  fn receive_completion(self, completion: Completion<Err>) { self.send_completion(completion) }
}

impl<Item, Err> fmt::Debug for ReplaySubject<Item, Err> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let st = self.state.lock();
    f.debug_struct("ReplaySubject")
      .field("max_size", &st.max_size)
      .field("history", &st.history.len())
      .field("subscribers", &st.subscribers.len())
      .field("completed", &st.completion.is_some())
      .finish()
  }
}

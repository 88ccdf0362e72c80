//! In-order flattening: map each value to a publisher and run the resulting
//! publishers one after another.
//!
//! Inner publishers are queued FIFO. Only the active one is subscribed; its
//! values go through the shared [`DemandBuffer`] to the downstream, and the
//! downstream's demand is passed to whichever inner is active at the time.
//! A new inner is asked for whatever demand the downstream still has open.

use std::{
  collections::VecDeque,
  mem,
  sync::{Arc, Weak},
};

use tracing::trace;

use crate::{
  completion::Completion,
  demand::Demand,
  demand_buffer::DemandBuffer,
  lock::Lock,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionHandle},
};

/// Created by [`PublisherExt::concat_map`](crate::publisher::PublisherExt::concat_map).
#[derive(Clone)]
pub struct ConcatMap<P, F> {
  source: P,
  f: F,
}

impl<P, F> ConcatMap<P, F> {
  pub(crate) fn new(source: P, f: F) -> Self { Self { source, f } }
}

struct ActiveInner {
  generation: u64,
  /// `None` until the inner publisher hands over its subscription.
  subscription: Option<SubscriptionHandle>,
}

struct ConcatState<Inner> {
  outer: Option<SubscriptionHandle>,
  outer_finished: bool,
  queue: VecDeque<Inner>,
  active: Option<ActiveInner>,
  generation: u64,
  /// Set while a loop in `advance` runs; nested calls leave a note instead.
  advancing: bool,
  advance_again: bool,
  terminated: bool,
}

struct Concat<Inner: Publisher, S> {
  me: Weak<Self>,
  buffer: DemandBuffer<Inner::Item, Inner::Err, S>,
  state: Lock<ConcatState<Inner>>,
}

enum Next<Inner> {
  Start(Inner, u64),
  Finish,
  Idle,
}

impl<Inner, S> Concat<Inner, S>
where
  Inner: Publisher + Send + 'static,
  Inner::Item: Send + 'static,
  Inner::Err: Send + 'static,
  S: Subscriber<Inner::Item, Inner::Err> + Send + 'static,
{
  fn is_current(&self, generation: u64) -> bool {
    let st = self.state.lock();
    !st.terminated && st.active.as_ref().is_some_and(|a| a.generation == generation)
  }

  fn enqueue(&self, inner: Inner) {
    let queued = self.state.with(|st| {
      if st.terminated {
        return Some(inner);
      }
      st.queue.push_back(inner);
      None
    });
    drop(queued);
    self.advance();
  }

  /// Starts the next queued inner publisher when none is active, or finishes
  /// once the outer publisher finished and the queue is empty. Inner
  /// publishers that complete synchronously are handled by looping here
  /// rather than by recursion.
  fn advance(&self) {
    let start = self.state.with(|st| {
      if st.advancing {
        st.advance_again = true;
        return false;
      }
      st.advancing = true;
      true
    });
    if !start {
      return;
    }

    loop {
      let next = self.state.with(|st| {
        st.advance_again = false;
        if st.terminated || st.active.is_some() {
          return Next::Idle;
        }
        match st.queue.pop_front() {
          Some(inner) => {
            st.generation += 1;
            st.active = Some(ActiveInner { generation: st.generation, subscription: None });
            Next::Start(inner, st.generation)
          }
          None if st.outer_finished => {
            st.terminated = true;
            Next::Finish
          }
          None => Next::Idle,
        }
      });
      match next {
        Next::Start(inner, generation) => {
          trace!(generation, "starting inner publisher");
          inner.subscribe(InnerSubscriber { concat: self.me.clone(), generation });
        }
        Next::Finish => self.buffer.complete(Completion::Finished),
        Next::Idle => {}
      }
      let again = self.state.with(|st| {
        if st.advance_again {
          return true;
        }
        st.advancing = false;
        false
      });
      if !again {
        break;
      }
    }
  }

  /// Cancels everything still running and fails the downstream once.
  fn fail(&self, err: Inner::Err) {
    let Some((outer, inner, queue)) = self.teardown() else {
      return;
    };
    for subscription in [outer, inner].into_iter().flatten() {
      subscription.cancel();
    }
    drop(queue);
    self.buffer.complete(Completion::Failed(err));
  }

  fn teardown(&self) -> Option<(Option<SubscriptionHandle>, Option<SubscriptionHandle>, VecDeque<Inner>)> {
    self.state.with(|st| {
      if st.terminated {
        return None;
      }
      st.terminated = true;
      let inner = st.active.take().and_then(|a| a.subscription);
      Some((st.outer.take(), inner, mem::take(&mut st.queue)))
    })
  }
}

impl<Inner, S> Subscription for Concat<Inner, S>
where
  Inner: Publisher + Send + 'static,
  Inner::Item: Send + 'static,
  Inner::Err: Send + 'static,
  S: Subscriber<Inner::Item, Inner::Err> + Send + 'static,
{
  fn request(&self, demand: Demand) {
    let owed = self.buffer.demand(demand);
    if owed.is_none() {
      return;
    }
    let inner = self
      .state
      .lock()
      .active
      .as_ref()
      .and_then(|a| a.subscription.clone());
    if let Some(inner) = inner {
      inner.request(owed);
    }
  }

  fn cancel(&self) {
    if let Some((outer, inner, queue)) = self.teardown() {
      for subscription in [outer, inner].into_iter().flatten() {
        subscription.cancel();
      }
      drop(queue);
    }
    self.buffer.cancel();
  }
}

struct OuterSubscriber<Inner: Publisher, S, F> {
  concat: Weak<Concat<Inner, S>>,
  f: F,
}

impl<In, Inner, S, F> Subscriber<In, Inner::Err> for OuterSubscriber<Inner, S, F>
where
  Inner: Publisher + Send + 'static,
  Inner::Item: Send + 'static,
  Inner::Err: Send + 'static,
  S: Subscriber<Inner::Item, Inner::Err> + Send + 'static,
  F: Fn(In) -> Inner,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    let accepted = self.concat.upgrade().is_some_and(|concat| {
      concat.state.with(|st| {
        if st.terminated || st.outer.is_some() {
          return false;
        }
        st.outer = Some(subscription.clone());
        true
      })
    });
    if accepted {
      subscription.request(Demand::unlimited());
    } else {
      subscription.cancel();
    }
  }

  fn receive(&mut self, value: In) -> Demand {
    if let Some(concat) = self.concat.upgrade() {
      concat.enqueue((self.f)(value));
    }
    Demand::none()
  }

  fn receive_completion(self, completion: Completion<Inner::Err>) {
    let Some(concat) = self.concat.upgrade() else {
      return;
    };
    match completion {
      Completion::Finished => {
        concat.state.with(|st| {
          st.outer_finished = true;
          st.outer = None;
        });
        concat.advance();
      }
      Completion::Failed(err) => concat.fail(err),
    }
  }
}

struct InnerSubscriber<Inner: Publisher, S> {
  concat: Weak<Concat<Inner, S>>,
  generation: u64,
}

impl<Inner, S> Subscriber<Inner::Item, Inner::Err> for InnerSubscriber<Inner, S>
where
  Inner: Publisher + Send + 'static,
  Inner::Item: Send + 'static,
  Inner::Err: Send + 'static,
  S: Subscriber<Inner::Item, Inner::Err> + Send + 'static,
{
  fn receive_subscription(&mut self, subscription: SubscriptionHandle) {
    let Some(concat) = self.concat.upgrade() else {
      subscription.cancel();
      return;
    };
    let accepted = concat.state.with(|st| match st.active.as_mut() {
      Some(active) if !st.terminated && active.generation == self.generation && active.subscription.is_none() => {
        active.subscription = Some(subscription.clone());
        true
      }
      _ => false,
    });
    if !accepted {
      subscription.cancel();
      return;
    }
    let demand = concat.buffer.resubscribe_demand();
    if demand.has_demand() {
      subscription.request(demand);
    }
  }

  fn receive(&mut self, value: Inner::Item) -> Demand {
    match self.concat.upgrade() {
      Some(concat) if concat.is_current(self.generation) => concat.buffer.buffer(value),
      _ => Demand::none(),
    }
  }

  fn receive_completion(self, completion: Completion<Inner::Err>) {
    let Some(concat) = self.concat.upgrade() else {
      return;
    };
    if !concat.is_current(self.generation) {
      return;
    }
    match completion {
      Completion::Finished => {
        concat.state.with(|st| st.active = None);
        concat.advance();
      }
      Completion::Failed(err) => concat.fail(err),
    }
  }
}

impl<P, F, Inner> Publisher for ConcatMap<P, F>
where
  P: Publisher<Err = Inner::Err>,
  F: Fn(P::Item) -> Inner + Send + 'static,
  Inner: Publisher + Send + 'static,
  Inner::Item: Send + 'static,
  Inner::Err: Send + 'static,
{
  type Item = Inner::Item;
  type Err = Inner::Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<Inner::Item, Inner::Err> + Send + 'static,
  {
    let concat = Arc::new_cyclic(|me| Concat {
      me: me.clone(),
      buffer: DemandBuffer::new(subscriber),
      state: Lock::new(ConcatState {
        outer: None,
        outer_finished: false,
        queue: VecDeque::new(),
        active: None,
        generation: 0,
        advancing: false,
        advance_again: false,
        terminated: false,
      }),
    });
    // Demand owed now has no inner to go to; the first inner picks it up.
    let _ = concat.buffer.attach(concat.clone());
    self.source.subscribe(OuterSubscriber { concat: Arc::downgrade(&concat), f: self.f });
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    publisher::{fail, from_iter, just, PublisherExt},
    testing::{TestPublisher, TestSubscriber},
  };

  type Source = TestPublisher<i32, &'static str>;

  #[test]
  fn concatenates_in_order() {
    let sub = TestSubscriber::new(Demand::unlimited());
    from_iter::<_, ()>(1..=3)
      .concat_map(|v| from_iter(vec![v * 10, v * 10 + 1]))
      .subscribe(sub.clone());
    assert_eq!(sub.values(), vec![10, 11, 20, 21, 30, 31]);
    assert!(sub.is_finished());
  }

  #[test]
  fn demand_carries_across_inners() {
    let sub = TestSubscriber::new(Demand::max(3));
    from_iter::<_, ()>(1..=3)
      .concat_map(|v| from_iter(vec![v; 2]))
      .subscribe(sub.clone());
    assert_eq!(sub.values(), vec![1, 1, 2]);
    assert_eq!(sub.completion(), None);

    sub.request(Demand::max(2));
    assert_eq!(sub.values(), vec![1, 1, 2, 2, 3]);
    sub.request(Demand::max(10));
    assert_eq!(sub.values(), vec![1, 1, 2, 2, 3, 3]);
    assert!(sub.is_finished());
  }

  #[test]
  fn one_inner_at_a_time() {
    let outer = Source::new();
    let (first, second) = (Source::new(), Source::new());
    let inners = [first.clone(), second.clone()];
    let sub = TestSubscriber::new(Demand::unlimited());
    outer
      .clone()
      .concat_map(move |v: i32| inners[v as usize].clone())
      .subscribe(sub.clone());
    assert_eq!(outer.requested(), Demand::unlimited());

    outer.send(0);
    outer.send(1);
    assert_eq!(first.subscriptions(), 1);
    assert_eq!(second.subscriptions(), 0);

    first.send(1);
    first.send_completion(Completion::Finished);
    assert_eq!(second.subscriptions(), 1);
    assert_eq!(second.requested(), Demand::unlimited());
    second.send(2);
    assert_eq!(sub.values(), vec![1, 2]);
  }

  #[test]
  fn finishes_after_outer_and_last_inner() {
    let outer = Source::new();
    let inner = Source::new();
    let i = inner.clone();
    let sub = TestSubscriber::new(Demand::unlimited());
    outer.clone().concat_map(move |_| i.clone()).subscribe(sub.clone());

    outer.send(0);
    outer.send_completion(Completion::Finished);
    assert_eq!(sub.completion(), None);
    inner.send_completion(Completion::Finished);
    assert!(sub.is_finished());
  }

  #[test]
  fn inner_failure_cancels_outer() {
    let outer = Source::new();
    let sub = TestSubscriber::new(Demand::unlimited());
    outer
      .clone()
      .concat_map(|v| if v == 2 { fail("inner").boxed() } else { just(v).boxed() })
      .subscribe(sub.clone());
    outer.send(1);
    outer.send(2);
    outer.send(3);
    assert_eq!(sub.values(), vec![1]);
    assert_eq!(sub.completion(), Some(Completion::Failed("inner")));
    assert!(outer.is_cancelled());
  }

  #[test]
  fn outer_failure_cancels_inner() {
    let outer = Source::new();
    let inner = Source::new();
    let i = inner.clone();
    let sub = TestSubscriber::new(Demand::unlimited());
    outer.clone().concat_map(move |_| i.clone()).subscribe(sub.clone());
    outer.send(0);
    outer.send_completion(Completion::Failed("outer"));
    assert!(inner.is_cancelled());
    assert_eq!(sub.completion(), Some(Completion::Failed("outer")));
    assert_eq!(sub.completions(), 1);
  }

  #[test]
  fn many_synchronous_inners_do_not_recurse() {
    let sub = TestSubscriber::new(Demand::unlimited());
    from_iter::<_, ()>(0..20_000)
      .concat_map(just)
      .subscribe(sub.clone());
    assert_eq!(sub.values().len(), 20_000);
    assert!(sub.is_finished());
  }

  #[test]
  fn cancel_stops_everything() {
    let outer = Source::new();
    let inner = Source::new();
    let i = inner.clone();
    let sub = TestSubscriber::new(Demand::unlimited());
    outer.clone().concat_map(move |_| i.clone()).subscribe(sub.clone());
    outer.send(0);
    sub.cancel();
    sub.cancel();
    assert_eq!(outer.cancels(), 1);
    assert_eq!(inner.cancels(), 1);
    inner.send(5);
    assert!(sub.values().is_empty());
  }
}

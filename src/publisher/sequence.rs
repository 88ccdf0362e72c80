use std::{
  iter::{Once, Peekable},
  marker::PhantomData,
  sync::Arc,
};

use crate::{
  completion::Completion,
  demand::Demand,
  demand_buffer::DemandBuffer,
  lock::Lock,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::Subscription,
};

/// Creates a publisher that produces the values of an iterator, one per unit
/// of demand, and finishes after the last one.
///
/// The iterator is pulled lazily: a subscriber that requests two values
/// causes exactly two calls to `next` (plus one look-ahead to detect the end).
///
/// ```
/// use rxdemand::{prelude::*, testing::TestSubscriber};
///
/// let sub = TestSubscriber::new(Demand::max(2));
/// from_iter::<_, ()>(1..).subscribe(sub.clone());
/// assert_eq!(sub.values(), vec![1, 2]);
/// ```
pub fn from_iter<I, Err>(iter: I) -> FromIter<I, Err>
where
  I: IntoIterator,
{
  FromIter { iter, _hint: PhantomData }
}

/// Creates a publisher that produces one value, then finishes.
pub fn just<T, Err>(value: T) -> FromIter<Once<T>, Err> { from_iter(std::iter::once(value)) }

pub struct FromIter<I, Err> {
  iter: I,
  _hint: PhantomData<fn() -> Err>,
}

impl<I: Clone, Err> Clone for FromIter<I, Err> {
  fn clone(&self) -> Self { Self { iter: self.iter.clone(), _hint: PhantomData } }
}

impl<I, Err> Publisher for FromIter<I, Err>
where
  I: IntoIterator,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = I::Item;
  type Err = Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<I::Item, Err> + Send + 'static,
  {
    let emitter = Arc::new(IterEmitter {
      state: Lock::new(IterState { iter: Some(self.iter.into_iter().peekable()), pending: Demand::none(), emitting: false }),
      buffer: DemandBuffer::new(subscriber),
    });
    let owed = emitter.buffer.attach(emitter.clone());
    emitter.pull(owed);
  }
}

struct IterState<I: Iterator> {
  /// `None` once exhausted or cancelled.
  iter: Option<Peekable<I>>,
  pending: Demand,
  emitting: bool,
}

enum Step<T> {
  Emit(T),
  Finish,
  Stop,
}

struct IterEmitter<I: Iterator, Err, S> {
  state: Lock<IterState<I>>,
  buffer: DemandBuffer<I::Item, Err, S>,
}

impl<I, Err, S> IterEmitter<I, Err, S>
where
  I: Iterator,
  S: Subscriber<I::Item, Err>,
{
  /// Emits as many values as `owed` plus any demand arriving meanwhile
  /// allows. Re-entrant calls only add to the pending demand.
  fn pull(&self, owed: Demand) {
    let start = self.state.with(|st| {
      st.pending += owed;
      if st.emitting {
        return false;
      }
      st.emitting = true;
      true
    });
    if !start {
      return;
    }

    loop {
      let step = self.state.with(|st| {
        let Some(iter) = st.iter.as_mut() else {
          st.emitting = false;
          return Step::Stop;
        };
        if iter.peek().is_none() {
          st.iter = None;
          st.emitting = false;
          return Step::Finish;
        }
        if !st.pending.has_demand() {
          st.emitting = false;
          return Step::Stop;
        }
        match iter.next() {
          Some(value) => {
            st.pending.take_one();
            Step::Emit(value)
          }
          None => {
            st.iter = None;
            st.emitting = false;
            Step::Finish
          }
        }
      });
      match step {
        Step::Emit(value) => {
          let more = self.buffer.buffer(value);
          self.state.with(|st| st.pending += more);
        }
        Step::Finish => {
          self.buffer.complete(Completion::Finished);
          return;
        }
        Step::Stop => return,
      }
    }
  }
}

impl<I, Err, S> Subscription for IterEmitter<I, Err, S>
where
  I: Iterator + Send,
  I::Item: Send,
  Err: Send,
  S: Subscriber<I::Item, Err> + Send,
{
  fn request(&self, demand: Demand) {
    let owed = self.buffer.demand(demand);
    self.pull(owed);
  }

  fn cancel(&self) {
    self.buffer.cancel();
    let iter = self.state.with(|st| st.iter.take());
    drop(iter);
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use super::*;
  use crate::testing::TestSubscriber;

  #[test]
  fn emits_with_demand_then_finishes() {
    let sub = TestSubscriber::new(Demand::max(2));
    from_iter::<_, ()>(vec![1, 2, 3]).subscribe(sub.clone());
    assert_eq!(sub.values(), vec![1, 2]);
    assert_eq!(sub.completion(), None);

    sub.request(Demand::max(1));
    assert_eq!(sub.values(), vec![1, 2, 3]);
    assert!(sub.is_finished());
  }

  #[test]
  fn finishes_without_demand_when_empty() {
    let sub = TestSubscriber::<i32, ()>::new(Demand::none());
    from_iter(Vec::new()).subscribe(sub.clone());
    assert!(sub.is_finished());
  }

  #[test]
  fn finishes_right_after_last_value() {
    let sub = TestSubscriber::new(Demand::max(1));
    just::<_, ()>(5).subscribe(sub.clone());
    assert_eq!(sub.values(), vec![5]);
    assert!(sub.is_finished());
  }

  #[test]
  fn pulls_lazily() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let p = pulled.clone();
    let iter = (0..).inspect(move |_| {
      p.fetch_add(1, Ordering::SeqCst);
    });
    let sub = TestSubscriber::new(Demand::max(3));
    from_iter::<_, ()>(iter).subscribe(sub.clone());
    assert_eq!(sub.values(), vec![0, 1, 2]);
    // Three values plus one look-ahead.
    assert_eq!(pulled.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn per_value_demand_keeps_flowing() {
    let sub = TestSubscriber::new(Demand::max(1)).with_demand_per_value(Demand::max(1));
    from_iter::<_, ()>(0..1000).subscribe(sub.clone());
    assert_eq!(sub.values().len(), 1000);
    assert!(sub.is_finished());
  }

  #[test]
  fn reentrant_requests_do_not_recurse() {
    let sub = TestSubscriber::new(Demand::max(1)).with_reentrant_request(Demand::max(1));
    from_iter::<_, ()>(0..20_000).subscribe(sub.clone());
    assert_eq!(sub.values().len(), 20_000);
    assert!(sub.is_finished());
  }

  #[test]
  fn cancel_stops_emission() {
    let sub = TestSubscriber::new(Demand::max(2));
    from_iter::<_, ()>(0..10).subscribe(sub.clone());
    sub.cancel();
    sub.request(Demand::max(5));
    assert_eq!(sub.values(), vec![0, 1]);
    assert_eq!(sub.completion(), None);
  }
}

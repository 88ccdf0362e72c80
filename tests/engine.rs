//! Properties of the demand engine, checked through the public API.

use std::sync::Arc;

use proptest::prelude::*;
use rxdemand::{
  demand_buffer::DemandBuffer,
  prelude::*,
  testing::{BufferSubscription, TestPublisher, TestSubscriber},
};

type Buffer = DemandBuffer<u32, (), TestSubscriber<u32, ()>>;

fn attached(sub: &TestSubscriber<u32, ()>) -> Arc<Buffer> {
  let buffer = Arc::new(DemandBuffer::new(sub.clone()));
  let _ = buffer.attach(Arc::new(BufferSubscription(buffer.clone())));
  buffer
}

#[derive(Clone, Debug)]
enum Step {
  Push(u32),
  Request(usize),
}

fn steps() -> impl Strategy<Value = Vec<Step>> {
  prop::collection::vec(
    prop_oneof![any::<u32>().prop_map(Step::Push), (0usize..4).prop_map(Step::Request)],
    0..64,
  )
}

proptest! {
  #[test]
  fn delivers_in_order_within_demand(steps in steps()) {
    let sub = TestSubscriber::new(Demand::none());
    let buffer = attached(&sub);
    let mut pushed = vec![];
    let mut granted = 0usize;

    for step in steps {
      match step {
        Step::Push(v) => {
          pushed.push(v);
          let _ = buffer.buffer(v);
        }
        Step::Request(n) => {
          granted += n;
          sub.request(Demand::max(n));
        }
      }
      let seen = sub.values();
      prop_assert!(seen.len() <= granted);
      prop_assert_eq!(&seen[..], &pushed[..seen.len()]);
      prop_assert_eq!(seen.len(), granted.min(pushed.len()));
    }
  }

  #[test]
  fn terminal_waits_for_queued_values(values in prop::collection::vec(any::<u32>(), 0..32)) {
    let sub = TestSubscriber::new(Demand::none());
    let buffer = attached(&sub);
    for v in &values {
      let _ = buffer.buffer(*v);
    }
    buffer.complete(Completion::Finished);
    buffer.complete(Completion::Failed(()));

    prop_assert_eq!(sub.completion().is_some(), values.is_empty());
    sub.request(Demand::max(values.len()));
    prop_assert_eq!(sub.values(), values);
    prop_assert!(sub.is_finished());
    prop_assert_eq!(sub.completions(), 1);
  }

  #[test]
  fn reentrant_demand_is_safe(count in 0usize..2_000, per_value in 0usize..3) {
    let sub = TestSubscriber::new(Demand::max(1)).with_reentrant_request(Demand::max(per_value));
    from_iter::<_, ()>(0..count).subscribe(sub.clone());

    let expected = if per_value == 0 { count.min(1) } else { count };
    prop_assert_eq!(sub.values(), (0..expected).collect::<Vec<_>>());
  }
}

#[test]
fn test_race_cancels_the_loser() {
  let a = TestPublisher::<i32, ()>::new();
  let b = TestPublisher::<i32, ()>::new();
  let sub = TestSubscriber::new(Demand::unlimited());
  a.clone().amb(b.clone()).subscribe(sub.clone());

  a.send(1);
  b.send(2);
  assert_eq!(sub.values(), vec![1]);
  assert_eq!(b.cancels(), 1);
}

#[test]
fn test_replay_keeps_the_latest_values() {
  let subject = ReplaySubject::<i32, ()>::new(3);
  for v in 1..=4 {
    subject.send(v);
  }
  let sub = TestSubscriber::new(Demand::unlimited());
  subject.clone().subscribe(sub.clone());
  assert_eq!(sub.values(), vec![2, 3, 4]);
}

#[test]
fn test_duplicate_subscriber_gets_empty_completion() {
  let subject = ReplaySubject::<i32, ()>::new(1);
  let first = TestSubscriber::new(Demand::unlimited());
  let duplicate = first.with_same_identity();
  subject.clone().subscribe(first.clone());
  subject.clone().subscribe(duplicate.clone());

  assert_eq!(duplicate.completions(), 1);
  assert!(duplicate.is_finished());
  assert_eq!(first.completions(), 0);
  assert_eq!(subject.subscriber_count(), 1);
  subject.send(7);
  assert_eq!(first.values(), vec![7]);
  assert!(duplicate.values().is_empty());
}

#[test]
fn test_cancel_twice_cancels_upstream_once() {
  let source = TestPublisher::<i32, ()>::new();
  let other = TestPublisher::<i32, ()>::new();
  let sub = TestSubscriber::new(Demand::unlimited());
  source
    .clone()
    .with_latest_from(other.clone())
    .concat_map(|(a, b)| just(a + b))
    .subscribe(sub.clone());

  other.send(10);
  source.send(1);
  assert_eq!(sub.values(), vec![11]);

  sub.cancel();
  sub.cancel();
  assert_eq!(source.cancels(), 1);
  assert_eq!(other.cancels(), 1);
}

#[test]
fn test_operator_chain() {
  let sub = TestSubscriber::new(Demand::max(4));
  from_iter::<_, &str>(1..=5)
    .concat_map(|v| from_iter(vec![v; v as usize]))
    .filter_map(|v| (v % 2 == 1).then_some(v))
    .map(|v| v * 100)
    .subscribe(sub.clone());
  assert_eq!(sub.values(), vec![100, 300, 300, 300]);

  sub.request(Demand::unlimited());
  assert_eq!(sub.values().len(), 9);
  assert!(sub.is_finished());
}

use std::marker::PhantomData;

use crate::{
  completion::Completion,
  publisher::Publisher,
  subscriber::Subscriber,
  subscription::EmptySubscription,
};

/// Creates a publisher that produces no values and finishes immediately.
pub fn empty<Item, Err>() -> Empty<Item, Err> { Empty(PhantomData) }

/// Creates a publisher that produces no values and fails immediately with
/// `err`.
pub fn fail<Item, Err>(err: Err) -> Fail<Item, Err> { Fail(err, PhantomData) }

/// Creates a publisher that never produces anything.
pub fn never<Item, Err>() -> Never<Item, Err> { Never(PhantomData) }

pub struct Empty<Item, Err>(PhantomData<fn() -> (Item, Err)>);

pub struct Fail<Item, Err>(Err, PhantomData<fn() -> Item>);

pub struct Never<Item, Err>(PhantomData<fn() -> (Item, Err)>);

impl<Item, Err> Clone for Empty<Item, Err> {
  fn clone(&self) -> Self { Empty(PhantomData) }
}

impl<Item, Err: Clone> Clone for Fail<Item, Err> {
  fn clone(&self) -> Self { Fail(self.0.clone(), PhantomData) }
}

impl<Item, Err> Clone for Never<Item, Err> {
  fn clone(&self) -> Self { Never(PhantomData) }
}

impl<Item, Err> Publisher for Empty<Item, Err> {
  type Item = Item;
  type Err = Err;

  fn subscribe<S>(self, mut subscriber: S)
  where
    S: Subscriber<Item, Err> + Send + 'static,
  {
    subscriber.receive_subscription(EmptySubscription::handle());
    subscriber.receive_completion(Completion::Finished);
  }
}

impl<Item, Err> Publisher for Fail<Item, Err> {
  type Item = Item;
  type Err = Err;

  fn subscribe<S>(self, mut subscriber: S)
  where
    S: Subscriber<Item, Err> + Send + 'static,
  {
    subscriber.receive_subscription(EmptySubscription::handle());
    subscriber.receive_completion(Completion::Failed(self.0));
  }
}

impl<Item, Err> Publisher for Never<Item, Err> {
  type Item = Item;
  type Err = Err;

  fn subscribe<S>(self, mut subscriber: S)
  where
    S: Subscriber<Item, Err> + Send + 'static,
  {
    subscriber.receive_subscription(EmptySubscription::handle());
  }
}

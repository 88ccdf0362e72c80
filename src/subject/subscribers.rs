use smallvec::SmallVec;

use crate::{
  demand::Demand,
  demand_buffer::{BufferConfig, DemandBuffer},
  subscriber::BoxedSubscriber,
  subscription::Subscription,
};

/// Registry of a multicast source's subscribers, keyed by a local id.
///
/// Uses `SmallVec<[_; 2]>` to avoid heap allocation for the common case of
/// one or two subscribers. Supports `reserve_id()` + `insert()` for entries
/// that need their own id before they exist.
pub(crate) struct Subscribers<T> {
  next_id: usize,
  items: SmallVec<[(usize, T); 2]>,
}

impl<T> Default for Subscribers<T> {
  fn default() -> Self { Self { next_id: 0, items: SmallVec::new() } }
}

impl<T> Subscribers<T> {
  #[inline]
  pub fn reserve_id(&mut self) -> usize {
    let id = self.next_id;
    self.next_id += 1;
    id
  }

  #[inline]
  pub fn insert(&mut self, id: usize, item: T) { self.items.push((id, item)); }

  pub fn remove(&mut self, id: usize) -> Option<T> {
    self
      .items
      .iter()
      .position(|(i, _)| *i == id)
      .map(|pos| self.items.remove(pos).1)
  }

  #[inline]
  pub fn len(&self) -> usize { self.items.len() }

  #[inline]
  pub fn iter(&self) -> impl Iterator<Item = &T> { self.items.iter().map(|(_, item)| item) }

  #[inline]
  pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ { self.items.drain(..).map(|(_, item)| item) }

  /// Copies out the entries so they can be called without holding the lock
  /// that guards the registry.
  pub fn snapshot<U>(&self, f: impl Fn(&T) -> U) -> SmallVec<[U; 2]> { self.items.iter().map(|(_, item)| f(item)).collect() }
}

/// The per-subscriber leg of a multicast source: a [`DemandBuffer`] in front
/// of one boxed subscriber, plus the way back to the registry.
///
/// The conduit is the subscription its subscriber holds. Demand only opens
/// the buffer; the source itself is hot and never asked for values.
pub(crate) struct Conduit<Item, Err> {
  id: usize,
  buffer: DemandBuffer<Item, Err, BoxedSubscriber<Item, Err>>,
  release: Box<dyn Fn(usize) + Send + Sync>,
}

impl<Item, Err> Conduit<Item, Err> {
  pub fn new(
    id: usize, subscriber: BoxedSubscriber<Item, Err>, config: BufferConfig,
    release: impl Fn(usize) + Send + Sync + 'static,
  ) -> Self {
    Self { id, buffer: DemandBuffer::with_config(subscriber, config), release: Box::new(release) }
  }

  #[inline]
  pub fn buffer(&self) -> &DemandBuffer<Item, Err, BoxedSubscriber<Item, Err>> { &self.buffer }
}

impl<Item, Err> Subscription for Conduit<Item, Err>
where
  Item: Send,
  Err: Send,
{
  fn request(&self, demand: Demand) { let _ = self.buffer.demand(demand); }

  fn cancel(&self) {
    self.buffer.cancel();
    (self.release)(self.id);
  }
}

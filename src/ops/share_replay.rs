use std::{fmt, sync::Arc};

use crate::{lock::Lock, publisher::Publisher, subject::ReplaySubject, subscriber::Subscriber};

/// Created by
/// [`PublisherExt::share_replay`](crate::publisher::PublisherExt::share_replay).
///
/// All clones share one [`ReplaySubject`]. The first subscription connects
/// the subject to the source; the connection lives as long as the source
/// keeps producing, even when every subscriber has cancelled.
pub struct ShareReplay<P: Publisher> {
  source: Arc<Lock<Option<P>>>,
  subject: ReplaySubject<P::Item, P::Err>,
}

impl<P: Publisher> ShareReplay<P> {
  pub(crate) fn new(source: P, max_size: usize) -> Self {
    Self { source: Arc::new(Lock::new(Some(source))), subject: ReplaySubject::new(max_size) }
  }

  /// Whether the source was subscribed.
  pub fn is_connected(&self) -> bool { self.source.lock().is_none() }
}

impl<P: Publisher> Clone for ShareReplay<P> {
  fn clone(&self) -> Self { Self { source: self.source.clone(), subject: self.subject.clone() } }
}

impl<P> Publisher for ShareReplay<P>
where
  P: Publisher,
  P::Item: Clone + Send + 'static,
  P::Err: Clone + Send + 'static,
{
  type Item = P::Item;
  type Err = P::Err;

  fn subscribe<S>(self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + Send + 'static,
  {
    self.subject.clone().subscribe(subscriber);
    let source = self.source.lock().take();
    if let Some(source) = source {
      source.subscribe(self.subject);
    }
  }
}

impl<P: Publisher> fmt::Debug for ShareReplay<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShareReplay")
      .field("connected", &self.is_connected())
      .field("subject", &self.subject)
      .finish()
  }
}

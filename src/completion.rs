/// The terminal event of a subscription: it either finished normally or
/// failed with an error. At most one is delivered per subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completion<Err> {
  Finished,
  Failed(Err),
}

impl<Err> Completion<Err> {
  #[inline]
  pub fn is_failure(&self) -> bool { matches!(self, Completion::Failed(_)) }

  /// Maps the error of a failure, leaving `Finished` untouched.
  pub fn map_err<E2>(self, f: impl FnOnce(Err) -> E2) -> Completion<E2> {
    match self {
      Completion::Finished => Completion::Finished,
      Completion::Failed(err) => Completion::Failed(f(err)),
    }
  }

  pub fn into_result(self) -> Result<(), Err> {
    match self {
      Completion::Finished => Ok(()),
      Completion::Failed(err) => Err(err),
    }
  }
}

impl<Err> From<Result<(), Err>> for Completion<Err> {
  fn from(result: Result<(), Err>) -> Self {
    match result {
      Ok(()) => Completion::Finished,
      Err(err) => Completion::Failed(err),
    }
  }
}

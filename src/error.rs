//! Infrastructure errors.
//!
//! Stream failures travel in-band as `Completion::Failed(Err)` with the
//! publisher's own error type. The errors here are about the machinery around
//! a stream, such as failing to start a timer.

use std::io;

use thiserror::Error;

/// Failure to schedule a task.
#[derive(Debug, Error)]
pub enum SchedulerError {
  /// The OS refused to start a timer thread.
  #[error("failed to spawn scheduler thread: {0}")]
  Spawn(#[from] io::Error),

  /// No async runtime is available in the current context.
  #[error("no runtime available to schedule on")]
  NoRuntime,
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn display() {
    let err = SchedulerError::from(io::Error::new(io::ErrorKind::Other, "limit"));
    assert_eq!(err.to_string(), "failed to spawn scheduler thread: limit");
    assert_eq!(SchedulerError::NoRuntime.to_string(), "no runtime available to schedule on");
  }
}

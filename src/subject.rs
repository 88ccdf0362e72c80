//! Subjects: publishers fed by hand that multicast to many subscribers.

mod replay;
pub(crate) mod subscribers;

pub use replay::ReplaySubject;

//! Demand: how many values a subscriber is willing to accept.
//!
//! Arithmetic saturates. Adding to [`Demand::Unlimited`] stays unlimited,
//! a finite sum that overflows becomes unlimited, and subtraction never goes
//! below zero.

use std::{
  cmp::Ordering,
  fmt,
  ops::{Add, AddAssign, Sub, SubAssign},
};

/// A request for more values, either a finite count or unbounded.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Demand {
  /// At most this many more values.
  Finite(usize),
  /// Any number of values.
  Unlimited,
}

impl Demand {
  /// No demand at all.
  #[inline]
  pub const fn none() -> Self { Demand::Finite(0) }

  /// Demand for at most `n` values.
  #[inline]
  pub const fn max(n: usize) -> Self { Demand::Finite(n) }

  #[inline]
  pub const fn unlimited() -> Self { Demand::Unlimited }

  #[inline]
  pub const fn is_none(&self) -> bool { matches!(self, Demand::Finite(0)) }

  #[inline]
  pub const fn is_unlimited(&self) -> bool { matches!(self, Demand::Unlimited) }

  /// `true` when at least one more value may be delivered.
  #[inline]
  pub const fn has_demand(&self) -> bool { !self.is_none() }

  /// The finite count, `None` for unlimited demand.
  #[inline]
  pub const fn as_finite(&self) -> Option<usize> {
    match self {
      Demand::Finite(n) => Some(*n),
      Demand::Unlimited => None,
    }
  }

  /// Consumes one unit of demand. Returns `false` when there was none left.
  pub fn take_one(&mut self) -> bool {
    match self {
      Demand::Unlimited => true,
      Demand::Finite(0) => false,
      Demand::Finite(n) => {
        *n -= 1;
        true
      }
    }
  }
}

impl Default for Demand {
  #[inline]
  fn default() -> Self { Demand::none() }
}

impl fmt::Debug for Demand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Demand::Finite(n) => write!(f, "max({n})"),
      Demand::Unlimited => f.write_str("unlimited"),
    }
  }
}

impl From<usize> for Demand {
  #[inline]
  fn from(n: usize) -> Self { Demand::Finite(n) }
}

impl Add for Demand {
  type Output = Demand;

  fn add(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Finite(a), Demand::Finite(b)) => a.checked_add(b).map_or(Demand::Unlimited, Demand::Finite),
      _ => Demand::Unlimited,
    }
  }
}

impl Add<usize> for Demand {
  type Output = Demand;

  #[inline]
  fn add(self, rhs: usize) -> Demand { self + Demand::Finite(rhs) }
}

impl AddAssign for Demand {
  #[inline]
  fn add_assign(&mut self, rhs: Demand) { *self = *self + rhs; }
}

impl AddAssign<usize> for Demand {
  #[inline]
  fn add_assign(&mut self, rhs: usize) { *self = *self + rhs; }
}

impl Sub for Demand {
  type Output = Demand;

  fn sub(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Finite(a), Demand::Finite(b)) => Demand::Finite(a.saturating_sub(b)),
      (Demand::Unlimited, Demand::Finite(_)) => Demand::Unlimited,
      (_, Demand::Unlimited) => Demand::none(),
    }
  }
}

impl Sub<usize> for Demand {
  type Output = Demand;

  #[inline]
  fn sub(self, rhs: usize) -> Demand { self - Demand::Finite(rhs) }
}

impl SubAssign for Demand {
  #[inline]
  fn sub_assign(&mut self, rhs: Demand) { *self = *self - rhs; }
}

impl SubAssign<usize> for Demand {
  #[inline]
  fn sub_assign(&mut self, rhs: usize) { *self = *self - rhs; }
}

impl PartialOrd for Demand {
  #[inline]
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for Demand {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (Demand::Finite(a), Demand::Finite(b)) => a.cmp(b),
      (Demand::Finite(_), Demand::Unlimited) => Ordering::Less,
      (Demand::Unlimited, Demand::Finite(_)) => Ordering::Greater,
      (Demand::Unlimited, Demand::Unlimited) => Ordering::Equal,
    }
  }
}

impl PartialEq<usize> for Demand {
  #[inline]
  fn eq(&self, other: &usize) -> bool { *self == Demand::Finite(*other) }
}

impl PartialOrd<usize> for Demand {
  #[inline]
  fn partial_cmp(&self, other: &usize) -> Option<Ordering> { Some(self.cmp(&Demand::Finite(*other))) }
}

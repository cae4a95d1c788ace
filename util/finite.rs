use num_traits::Float;
use std::{
	cmp::{Ord, Ordering},
	fmt::Debug,
};
use thiserror::Error;

/// A float that is known to be neither NaN nor infinite, so it can be totally ordered and used as a key in a `BTreeMap`.
#[derive(Clone, Copy, Debug)]
pub struct Finite<T>(T)
where
	T: Float;

#[derive(Debug, Error)]
#[error("not finite")]
pub struct NotFiniteError;

impl<T> Finite<T>
where
	T: Float,
{
	pub fn new(value: T) -> Result<Self, NotFiniteError> {
		if value.is_finite() {
			Ok(Self(value))
		} else {
			Err(NotFiniteError)
		}
	}

	pub fn get(self) -> T {
		self.0
	}
}

impl<T> std::fmt::Display for Finite<T>
where
	T: Float + std::fmt::Display,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl<T> PartialEq for Finite<T>
where
	T: Float,
{
	fn eq(&self, other: &Self) -> bool {
		self.0.eq(&other.0)
	}
}

impl<T> Eq for Finite<T> where T: Float {}

impl<T> PartialOrd for Finite<T>
where
	T: Float,
{
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl<T> Ord for Finite<T>
where
	T: Float,
{
	fn cmp(&self, other: &Self) -> Ordering {
		// Neither value can be NaN, so the comparison is total.
		self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
	}
}

#[test]
fn test_finite_rejects_nan_and_infinity() {
	assert!(Finite::new(f32::NAN).is_err());
	assert!(Finite::new(f32::INFINITY).is_err());
	assert!(Finite::new(f64::NEG_INFINITY).is_err());
	assert_eq!(Finite::new(1.5f32).unwrap().get(), 1.5);
}

#[test]
fn test_finite_ordering() {
	let mut values: Vec<Finite<f32>> = [3.0, -1.0, 2.5, 0.0]
		.iter()
		.map(|value| Finite::new(*value).unwrap())
		.collect();
	values.sort();
	let values: Vec<f32> = values.into_iter().map(Finite::get).collect();
	assert_eq!(values, vec![-1.0, 0.0, 2.5, 3.0]);
}

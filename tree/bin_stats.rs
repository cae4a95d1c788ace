/*!
`BinStats` accumulates the weighted normal equations `XᵀWX` and `XᵀWy` of a least squares problem over a basis of features that grows as the tree gets deeper. The cross product matrix is symmetric, so only its lower triangle is stored, in a flat buffer allocated once for the largest basis the statistic will ever hold. Row `i` of the triangle starts at offset `i * (i + 1) / 2`.

Coordinates below `filled_size` belong to the committed basis. While a candidate feature is being evaluated, its coordinate is written at `filled_size` with `add_new_correlation`, and `max_updated_pos` tracks how many coordinates hold valid data.
*/

use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use std::ops::{AddAssign, SubAssign};

/// Pivots of the Cholesky factorization smaller than this, relative to the largest diagonal entry, mean the system is singular.
const SINGULAR_PIVOT_TOLERANCE: f64 = 1e-12;

#[derive(Clone, Debug, PartialEq)]
pub struct BinStats {
	capacity: usize,
	filled_size: usize,
	max_updated_pos: usize,
	xtx: Vec<f64>,
	xty: Vec<f64>,
	weight: f64,
	trace: f64,
}

fn triangle_offset(row: usize) -> usize {
	row * (row + 1) / 2
}

impl BinStats {
	pub fn new(capacity: usize, filled_size: usize) -> BinStats {
		assert!(filled_size <= capacity);
		BinStats {
			capacity,
			filled_size,
			max_updated_pos: filled_size,
			xtx: vec![0.0; triangle_offset(capacity)],
			xty: vec![0.0; capacity],
			weight: 0.0,
			trace: 0.0,
		}
	}

	pub fn reset(&mut self) {
		self.xtx.iter_mut().for_each(|value| *value = 0.0);
		self.xty.iter_mut().for_each(|value| *value = 0.0);
		self.weight = 0.0;
		self.trace = 0.0;
		self.filled_size = 0;
		self.max_updated_pos = 0;
	}

	pub fn set_filled_size(&mut self, filled_size: usize) {
		assert!(filled_size <= self.capacity);
		self.filled_size = filled_size;
		self.max_updated_pos = self.max_updated_pos.max(filled_size);
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn filled_size(&self) -> usize {
		self.filled_size
	}

	pub fn max_updated_pos(&self) -> usize {
		self.max_updated_pos
	}

	pub fn weight(&self) -> f64 {
		self.weight
	}

	pub fn trace(&self) -> f64 {
		self.trace
	}

	/// Add one row of the lower triangle, up to and including the diagonal, for the coordinate `filled_size + shift`, along with its entry of `XᵀWy`.
	pub fn add_new_correlation(&mut self, xtx_row: &[f64], xty: f64, shift: usize) {
		let position = self.filled_size + shift;
		assert!(xtx_row.len() > position);
		assert!(position < self.capacity);
		let offset = triangle_offset(position);
		for (entry, value) in self.xtx[offset..=offset + position]
			.iter_mut()
			.zip(xtx_row.iter())
		{
			*entry += value;
		}
		self.xty[position] += xty;
		self.trace += xtx_row[position];
		self.max_updated_pos = self.max_updated_pos.max(position + 1);
	}

	/// Add a single example with basis values `x`, target `y` and weight `w` to every committed coordinate.
	pub fn add_full_correlation(&mut self, x: &[f64], y: f64, w: f64) {
		assert!(x.len() >= self.filled_size);
		let mut offset = 0;
		for i in 0..self.filled_size {
			let wx = w * x[i];
			self.xty[i] += wx * y;
			for j in 0..=i {
				self.xtx[offset + j] += wx * x[j];
			}
			self.trace += wx * x[i];
			offset += i + 1;
		}
		self.weight += w;
		self.max_updated_pos = self.max_updated_pos.max(self.filled_size);
	}

	/// The full symmetric cross product matrix over the first `max_updated_pos` coordinates.
	pub fn xtx_matrix(&self) -> DMatrix<f64> {
		DMatrix::from_fn(self.max_updated_pos, self.max_updated_pos, |i, j| {
			let (row, column) = if i >= j { (i, j) } else { (j, i) };
			self.xtx[triangle_offset(row) + column]
		})
	}

	pub fn xty_vector(&self) -> DVector<f64> {
		DVector::from_column_slice(&self.xty[..self.max_updated_pos])
	}

	/// The regularization applied to this statistic: `l2 + trace_regularization * trace`.
	pub fn regularization(&self, l2_regularization: f64, trace_regularization: f64) -> f64 {
		l2_regularization + trace_regularization * self.trace
	}

	/// Solve the ridge system `(XᵀWX + l2 I) w = XᵀWy`. A statistic without any weight has zero weights.
	pub fn solve(&self, l2_regularization: f64) -> Result<DVector<f64>> {
		if self.weight == 0.0 {
			return Ok(DVector::zeros(self.max_updated_pos));
		}
		let (_, weights) = self.solve_regularized(l2_regularization)?;
		Ok(weights)
	}

	/// Compute the ridge objective `-2 bᵀw + wᵀAw + l2 wᵀw` at the solution `w` of `Aw = b`, where `A = XᵀWX + l2 I` and `b = XᵀWy`. Lower is better.
	pub fn fit_score(&self, l2_regularization: f64) -> Result<f64> {
		if self.max_updated_pos == 0 || self.weight == 0.0 {
			return Ok(0.0);
		}
		let (a, w) = self.solve_regularized(l2_regularization)?;
		let b = self.xty_vector();
		let aw = &a * &w;
		Ok(-2.0 * b.dot(&w) + w.dot(&aw) + l2_regularization * w.norm_squared())
	}

	fn solve_regularized(&self, l2_regularization: f64) -> Result<(DMatrix<f64>, DVector<f64>)> {
		let n = self.max_updated_pos;
		let a = self.xtx_matrix() + DMatrix::identity(n, n) * l2_regularization;
		let b = self.xty_vector();
		let max_diagonal = a.diagonal().iter().cloned().fold(1.0, f64::max);
		let cholesky = a.clone().cholesky().ok_or(Error::SingularMatrix)?;
		let tolerance = SINGULAR_PIVOT_TOLERANCE * max_diagonal;
		if cholesky
			.l_dirty()
			.diagonal()
			.iter()
			.any(|pivot| pivot * pivot < tolerance)
		{
			return Err(Error::SingularMatrix);
		}
		let w = cholesky.solve(&b);
		Ok((a, w))
	}

	/// Add the first `size` coordinates of `other` to `self`.
	pub fn add_sized(&mut self, other: &BinStats, size: usize) {
		assert!(size <= self.capacity && size <= other.capacity);
		self.weight += other.weight;
		self.trace += other.trace;
		let end = triangle_offset(size);
		for (entry, value) in self.xtx[..end].iter_mut().zip(other.xtx[..end].iter()) {
			*entry += value;
		}
		for (entry, value) in self.xty[..size].iter_mut().zip(other.xty[..size].iter()) {
			*entry += value;
		}
	}

	/// Subtract the first `size` coordinates of `other` from `self`.
	pub fn subtract_sized(&mut self, other: &BinStats, size: usize) {
		assert!(size <= self.capacity && size <= other.capacity);
		self.weight -= other.weight;
		self.trace -= other.trace;
		let end = triangle_offset(size);
		for (entry, value) in self.xtx[..end].iter_mut().zip(other.xtx[..end].iter()) {
			*entry -= value;
		}
		for (entry, value) in self.xty[..size].iter_mut().zip(other.xty[..size].iter()) {
			*entry -= value;
		}
	}

	/// Add every coordinate `other` has written, including a tentatively evaluated one.
	pub fn add_full(&mut self, other: &BinStats) {
		self.max_updated_pos = self.max_updated_pos.max(other.max_updated_pos);
		self.add_sized(other, other.max_updated_pos);
	}

	/// Subtract every coordinate `other` has written, including a tentatively evaluated one.
	pub fn subtract_full(&mut self, other: &BinStats) {
		self.max_updated_pos = self.max_updated_pos.max(other.max_updated_pos);
		self.subtract_sized(other, other.max_updated_pos);
	}
}

impl AddAssign<&BinStats> for BinStats {
	fn add_assign(&mut self, other: &BinStats) {
		let size = self.filled_size.min(other.filled_size);
		self.add_sized(other, size);
	}
}

impl SubAssign<&BinStats> for BinStats {
	fn sub_assign(&mut self, other: &BinStats) {
		let size = self.filled_size.min(other.filled_size);
		self.subtract_sized(other, size);
	}
}

#[cfg(test)]
fn stats_from_examples(examples: &[(Vec<f64>, f64, f64)], capacity: usize) -> BinStats {
	let filled_size = examples[0].0.len();
	let mut stats = BinStats::new(capacity, filled_size);
	for (x, y, w) in examples {
		stats.add_full_correlation(x, *y, *w);
	}
	stats
}

#[test]
fn test_solve_matches_direct_ridge() {
	use rand::{Rng, SeedableRng};
	use rand_xoshiro::Xoshiro256Plus;
	let mut rng = Xoshiro256Plus::seed_from_u64(0);
	let n_examples = 50;
	let n_features = 3;
	let l2_regularization = 0.5;
	let xs: Vec<Vec<f64>> = (0..n_examples)
		.map(|_| {
			let mut x = vec![1.0];
			x.extend((1..n_features).map(|_| rng.gen_range(-2.0..2.0)));
			x
		})
		.collect();
	let ys: Vec<f64> = xs
		.iter()
		.map(|x| 0.5 + 3.0 * x[1] - x[2] + rng.gen_range(-0.1..0.1))
		.collect();
	let ws: Vec<f64> = (0..n_examples).map(|_| rng.gen_range(0.5..2.0)).collect();
	let mut stats = BinStats::new(n_features, n_features);
	for ((x, y), w) in xs.iter().zip(ys.iter()).zip(ws.iter()) {
		stats.add_full_correlation(x, *y, *w);
	}
	let design = DMatrix::from_fn(n_examples, n_features, |i, j| xs[i][j]);
	let weights = DMatrix::from_diagonal(&DVector::from_column_slice(&ws));
	let targets = DVector::from_column_slice(&ys);
	let a = design.transpose() * &weights * &design
		+ DMatrix::identity(n_features, n_features) * l2_regularization;
	let b = design.transpose() * &weights * targets;
	let expected = a.lu().solve(&b).unwrap();
	let actual = stats.solve(l2_regularization).unwrap();
	for (expected, actual) in expected.iter().zip(actual.iter()) {
		assert!((expected - actual).abs() < 1e-9);
	}
	let expected_trace: f64 = xs
		.iter()
		.zip(ws.iter())
		.map(|(x, w)| w * x.iter().map(|v| v * v).sum::<f64>())
		.sum();
	assert!((stats.trace() - expected_trace).abs() < 1e-9);
}

#[test]
fn test_add_then_subtract_restores() {
	let a = stats_from_examples(
		&[(vec![1.0, 2.0], 3.0, 1.0), (vec![1.0, -1.0], 0.5, 2.0)],
		3,
	);
	let b = stats_from_examples(&[(vec![1.0, 4.0], -1.0, 0.5)], 3);
	let mut merged = a.clone();
	merged += &b;
	assert_eq!(merged.weight(), 3.5);
	merged -= &b;
	assert_eq!(merged, a);
}

#[test]
fn test_new_correlation_extends_the_basis() {
	// The basis holds the bias and the candidate x is evaluated as a new coordinate.
	let mut stats = BinStats::new(2, 1);
	for (x, y) in &[(1.0, 2.0), (3.0, 6.0)] {
		stats.add_full_correlation(&[1.0], *y, 1.0);
		stats.add_new_correlation(&[*x, x * x], x * y, 0);
	}
	assert_eq!(stats.filled_size(), 1);
	assert_eq!(stats.max_updated_pos(), 2);
	assert_eq!(stats.trace(), 12.0);
	insta::assert_debug_snapshot!(stats.xtx_matrix().as_slice(), @r###"
 [
     2.0,
     4.0,
     4.0,
     10.0,
 ]
 "###);
	let w = stats.solve(0.0).unwrap();
	assert!(w[0].abs() < 1e-9);
	assert!((w[1] - 2.0).abs() < 1e-9);
	// y = 2x is fit exactly, so the objective is -yᵀy.
	assert!((stats.fit_score(0.0).unwrap() + 40.0).abs() < 1e-9);
}

#[test]
fn test_full_ops_cover_the_new_coordinate() {
	let mut left = BinStats::new(2, 1);
	left.add_full_correlation(&[1.0], 2.0, 1.0);
	left.add_new_correlation(&[1.0, 1.0], 2.0, 0);
	let mut right = BinStats::new(2, 1);
	right.add_full_correlation(&[1.0], 6.0, 1.0);
	right.add_new_correlation(&[3.0, 9.0], 18.0, 0);
	let mut total = left.clone();
	total.add_full(&right);
	assert_eq!(total.xty_vector().as_slice(), &[8.0, 20.0]);
	total.subtract_full(&left);
	assert_eq!(total, right);
	// The filled size operators leave the new coordinate alone.
	let mut filled = left.clone();
	filled += &right;
	assert_eq!(filled.xty_vector().as_slice(), &[8.0, 2.0]);
}

#[test]
fn test_identical_zero_target_examples_score_zero() {
	let examples: Vec<(Vec<f64>, f64, f64)> = (0..4).map(|_| (vec![1.0, 2.5], 0.0, 1.0)).collect();
	let stats = stats_from_examples(&examples, 2);
	for l2_regularization in &[1e-3, 1.0, 10.0] {
		assert_eq!(stats.fit_score(*l2_regularization).unwrap(), 0.0);
	}
}

#[test]
fn test_singular_system() {
	let examples: Vec<(Vec<f64>, f64, f64)> = (0..4).map(|_| (vec![1.0, 2.5], 1.0, 1.0)).collect();
	let stats = stats_from_examples(&examples, 2);
	assert!(matches!(stats.fit_score(0.0), Err(Error::SingularMatrix)));
	assert!(stats.fit_score(1.0).is_ok());
}

#[test]
fn test_empty_stats_score_zero() {
	let stats = BinStats::new(3, 2);
	assert_eq!(stats.fit_score(0.0).unwrap(), 0.0);
	assert_eq!(stats.solve(0.0).unwrap().len(), 2);
}

#[test]
fn test_reset() {
	let mut stats = stats_from_examples(&[(vec![1.0, 2.0], 3.0, 1.0)], 2);
	stats.reset();
	assert_eq!(stats, BinStats::new(2, 0));
}

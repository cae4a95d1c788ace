use crate::{bin_stats::BinStats, grid::Grid, Result};
use std::ops::{AddAssign, SubAssign};

/// A `Histogram` holds one `BinStats` for each bin of a single feature, for the examples in one leaf.
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
	feature_index: usize,
	bins: Vec<BinStats>,
	is_prefix_summed: bool,
}

impl Histogram {
	/// Create an empty histogram whose statistics can grow up to `capacity` coordinates and currently have `n_used_features` committed.
	pub fn new(
		grid: &Grid,
		feature_index: usize,
		capacity: usize,
		n_used_features: usize,
	) -> Histogram {
		let bins = (0..grid.n_bins(feature_index))
			.map(|_| BinStats::new(capacity, n_used_features))
			.collect();
		Histogram {
			feature_index,
			bins,
			is_prefix_summed: false,
		}
	}

	pub fn feature_index(&self) -> usize {
		self.feature_index
	}

	pub fn n_bins(&self) -> usize {
		self.bins.len()
	}

	pub fn bin_stats(&self, bin: usize) -> &BinStats {
		&self.bins[bin]
	}

	pub fn is_prefix_summed(&self) -> bool {
		self.is_prefix_summed
	}

	#[inline]
	pub fn add_new_correlation(&mut self, bin: usize, xtx_row: &[f64], xty: f64, shift: usize) {
		self.bins[bin].add_new_correlation(xtx_row, xty, shift);
	}

	#[inline]
	pub fn add_full_correlation(&mut self, bin: usize, x: &[f64], y: f64, w: f64) {
		self.bins[bin].add_full_correlation(x, y, w);
	}

	/// Accumulate the bins from left to right, so that afterwards bin `b` holds the statistics of every example whose bin is `<= b`.
	pub fn prefix_sum_bins(&mut self) {
		debug_assert!(
			!self.is_prefix_summed,
			"the bins of a histogram must be prefix summed once"
		);
		for bin in 1..self.bins.len() {
			let (summed, rest) = self.bins.split_at_mut(bin);
			rest[0].add_full(&summed[bin - 1]);
		}
		self.is_prefix_summed = true;
	}

	/// The statistics of every example in the histogram. The bins must be prefix summed.
	pub fn total(&self) -> &BinStats {
		debug_assert!(self.is_prefix_summed);
		&self.bins[self.bins.len() - 1]
	}

	/// The statistics on each side of the split at `condition_index`: examples with bin `<= condition_index` go left, the rest go right.
	pub fn split_stats(&self, condition_index: usize) -> (BinStats, BinStats) {
		let left = self.bins[condition_index].clone();
		let mut right = self.total().clone();
		right.subtract_full(&left);
		(left, right)
	}

	/// Score both sides of the split at `condition_index`. Each side is regularized with `l2 + trace_regularization * trace(side)`.
	pub fn split_score(
		&self,
		condition_index: usize,
		l2_regularization: f64,
		trace_regularization: f64,
	) -> Result<(f64, f64)> {
		let (left, right) = self.split_stats(condition_index);
		let left_score =
			left.fit_score(left.regularization(l2_regularization, trace_regularization))?;
		let right_score =
			right.fit_score(right.regularization(l2_regularization, trace_regularization))?;
		Ok((left_score, right_score))
	}

	fn assert_compatible(&self, other: &Histogram) {
		assert_eq!(self.feature_index, other.feature_index);
		assert_eq!(self.bins.len(), other.bins.len());
		assert_eq!(self.is_prefix_summed, other.is_prefix_summed);
	}
}

impl AddAssign<&Histogram> for Histogram {
	fn add_assign(&mut self, other: &Histogram) {
		self.assert_compatible(other);
		for (bin, other_bin) in self.bins.iter_mut().zip(other.bins.iter()) {
			bin.add_full(other_bin);
		}
	}
}

impl SubAssign<&Histogram> for Histogram {
	fn sub_assign(&mut self, other: &Histogram) {
		self.assert_compatible(other);
		for (bin, other_bin) in self.bins.iter_mut().zip(other.bins.iter()) {
			bin.subtract_full(other_bin);
		}
	}
}

#[cfg(test)]
fn histogram_from_examples(grid: &Grid, examples: &[(f32, f64)]) -> Histogram {
	// The basis holds the bias and feature 0 of the grid is the candidate.
	let mut histogram = Histogram::new(grid, 0, 2, 1);
	for (value, y) in examples {
		let bin = grid.bin(0, *value);
		let x = f64::from(*value);
		histogram.add_full_correlation(bin, &[1.0], *y, 1.0);
		histogram.add_new_correlation(bin, &[x, x * x], x * y, 0);
	}
	histogram
}

#[test]
fn test_prefix_sum_and_split() {
	let grid = Grid::new(vec![vec![1.5, 2.5]]).unwrap();
	let examples = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0), (3.0, 7.0)];
	let mut histogram = histogram_from_examples(&grid, &examples);
	assert_eq!(histogram.n_bins(), 3);
	assert_eq!(histogram.bin_stats(2).weight(), 2.0);
	histogram.prefix_sum_bins();
	assert_eq!(histogram.total().weight(), 4.0);
	assert_eq!(histogram.total().xty_vector().as_slice(), &[19.0, 49.0]);
	let (left, right) = histogram.split_stats(0);
	assert_eq!(left.weight(), 1.0);
	assert_eq!(right.weight(), 3.0);
	assert_eq!(right.xty_vector().as_slice(), &[17.0, 47.0]);
	let mut sum = left.clone();
	sum.add_full(&right);
	assert_eq!(&sum, histogram.total());
}

#[test]
fn test_split_score_separates_lines() {
	// Left of the border y = 2x, right of it y = -x + 10, so splitting at the border fits both exactly.
	let grid = Grid::new(vec![vec![2.5]]).unwrap();
	let examples = [(1.0, 2.0), (2.0, 4.0), (3.0, 7.0), (4.0, 6.0)];
	let mut histogram = histogram_from_examples(&grid, &examples);
	histogram.prefix_sum_bins();
	let (left, right) = histogram.split_score(0, 0.0, 0.0).unwrap();
	assert!((left + 20.0).abs() < 1e-9);
	assert!((right + 85.0).abs() < 1e-9);
	let unsplit = histogram.total().fit_score(0.0).unwrap();
	assert!(left + right < unsplit);
}

#[test]
fn test_split_score_trace_regularization() {
	let grid = Grid::new(vec![vec![2.5]]).unwrap();
	let examples = [(1.0, 2.0), (2.0, 4.0), (3.0, 7.0), (4.0, 6.0)];
	let mut histogram = histogram_from_examples(&grid, &examples);
	histogram.prefix_sum_bins();
	let (left, right) = histogram.split_stats(0);
	// The trace sums the squares of the bias and the feature.
	assert_eq!(left.trace(), 7.0);
	assert_eq!(right.trace(), 27.0);
	let (l2_regularization, trace_regularization) = (0.1, 0.5);
	let (left_score, right_score) = histogram
		.split_score(0, l2_regularization, trace_regularization)
		.unwrap();
	assert_eq!(
		left_score,
		left.fit_score(l2_regularization + trace_regularization * 7.0)
			.unwrap()
	);
	assert_eq!(
		right_score,
		right
			.fit_score(l2_regularization + trace_regularization * 27.0)
			.unwrap()
	);
	let (unregularized_left, _) = histogram.split_score(0, l2_regularization, 0.0).unwrap();
	assert!(left_score > unregularized_left);
}

#[test]
fn test_sibling_subtraction() {
	let grid = Grid::new(vec![vec![1.5, 2.5]]).unwrap();
	let small = [(1.0, 1.0), (3.0, 2.0)];
	let large = [(1.0, 0.5), (2.0, 3.0), (2.0, 1.0), (3.0, 4.0)];
	let mut parent = histogram_from_examples(&grid, &[&small[..], &large[..]].concat());
	let mut small_histogram = histogram_from_examples(&grid, &small);
	let mut large_histogram = histogram_from_examples(&grid, &large);
	parent.prefix_sum_bins();
	small_histogram.prefix_sum_bins();
	large_histogram.prefix_sum_bins();
	let mut derived = parent.clone();
	derived -= &small_histogram;
	assert_eq!(derived, large_histogram);
	derived += &small_histogram;
	assert_eq!(derived, parent);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic]
fn test_prefix_sum_twice_panics() {
	let grid = Grid::new(vec![vec![1.5]]).unwrap();
	let mut histogram = histogram_from_examples(&grid, &[(1.0, 1.0)]);
	histogram.prefix_sum_bins();
	histogram.prefix_sum_bins();
}

#[test]
#[should_panic]
fn test_incompatible_histograms_panic() {
	let grid = Grid::new(vec![vec![1.5], vec![0.5, 1.5]]).unwrap();
	let mut a = Histogram::new(&grid, 0, 2, 1);
	let b = Histogram::new(&grid, 1, 2, 1);
	a += &b;
}

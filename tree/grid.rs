/*!
A `Grid` describes how raw feature values are mapped to bins. Each feature has a sorted list of borders, and a value falls in bin `b` when exactly `b` borders are strictly less than it. For example, given the borders `[0.5, 1.5, 2]`, the bins will be:

0. (-infinity, 0.5] and invalid values
1. (0.5, 1.5]
2. (1.5, 2]
3. (2, infinity)

A split on condition `c` of a feature sends a value left when it is `<= borders[c]`, which is the same as its bin being `<= c`.
*/

use crate::{Error, Result};
use itertools::Itertools;
use linear_tree_util::finite::Finite;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;
use std::{cmp::Ordering, collections::BTreeMap};

#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
	borders: Vec<Vec<f32>>,
}

/// Binned columns store bins as `u16` at most.
pub const MAX_BINS_PER_FEATURE: usize = u16::MAX as usize + 1;

/// These are the options passed to `Grid::compute`.
#[derive(Clone, Debug)]
pub struct GridOptions {
	/// Each feature will have at most this many bins, which must be between 1 and `MAX_BINS_PER_FEATURE`. If a feature has fewer unique values than this, the borders are the midpoints between consecutive unique values.
	pub max_bins_per_feature: usize,
	/// This is the maximum number of examples to consider when computing the borders of a feature.
	pub max_examples_for_computing_borders: usize,
}

impl Default for GridOptions {
	fn default() -> Self {
		Self {
			max_bins_per_feature: 32,
			max_examples_for_computing_borders: 200_000,
		}
	}
}

impl Grid {
	/// Create a grid from explicit borders. The borders for each feature must be finite and strictly increasing, and there can be at most `MAX_BINS_PER_FEATURE - 1` of them.
	pub fn new(borders: Vec<Vec<f32>>) -> Result<Grid> {
		for (feature_index, feature_borders) in borders.iter().enumerate() {
			if feature_borders.len() + 1 > MAX_BINS_PER_FEATURE {
				return Err(Error::InvalidOptions(format!(
					"feature {} has {} bins, but at most {} are supported",
					feature_index,
					feature_borders.len() + 1,
					MAX_BINS_PER_FEATURE
				)));
			}
			if feature_borders.iter().any(|border| !border.is_finite()) {
				return Err(Error::InvalidOptions(format!(
					"the borders for feature {} are not finite",
					feature_index
				)));
			}
			if feature_borders.iter().tuple_windows().any(|(a, b)| a >= b) {
				return Err(Error::InvalidOptions(format!(
					"the borders for feature {} are not strictly increasing",
					feature_index
				)));
			}
		}
		Ok(Grid { borders })
	}

	/// Compute the borders for each column of `features`, which has shape (n_examples, n_features).
	pub fn compute(features: ArrayView2<f32>, options: &GridOptions) -> Result<Grid> {
		if options.max_bins_per_feature == 0 || options.max_bins_per_feature > MAX_BINS_PER_FEATURE
		{
			return Err(Error::InvalidOptions(format!(
				"max_bins_per_feature must be between 1 and {}, got {}",
				MAX_BINS_PER_FEATURE, options.max_bins_per_feature
			)));
		}
		let columns: Vec<ArrayView1<f32>> = features.axis_iter(Axis(1)).collect();
		let borders = columns
			.par_iter()
			.map(|column| compute_borders_for_feature(column.view(), options))
			.collect();
		Ok(Grid { borders })
	}

	pub fn n_features(&self) -> usize {
		self.borders.len()
	}

	pub fn n_bins(&self, feature_index: usize) -> usize {
		self.borders[feature_index].len() + 1
	}

	/// The number of split conditions for a feature, which is one per border.
	pub fn n_conditions(&self, feature_index: usize) -> usize {
		self.borders[feature_index].len()
	}

	pub fn borders(&self, feature_index: usize) -> &[f32] {
		&self.borders[feature_index]
	}

	pub fn border(&self, feature_index: usize, condition_index: usize) -> f32 {
		self.borders[feature_index][condition_index]
	}

	/// Find the bin for `value` with a binary search over the feature's borders.
	pub fn bin(&self, feature_index: usize, value: f32) -> usize {
		if !value.is_finite() {
			// Invalid values go to the first bin.
			return 0;
		}
		self.borders[feature_index]
			.binary_search_by(|border| border.partial_cmp(&value).unwrap_or(Ordering::Less))
			.unwrap_or_else(|bin| bin)
	}
}

/// Compute the borders for a single feature.
fn compute_borders_for_feature(column: ArrayView1<f32>, options: &GridOptions) -> Vec<f32> {
	// Create a histogram of values in the feature.
	let mut histogram: BTreeMap<Finite<f32>, usize> = BTreeMap::new();
	let mut histogram_values_count = 0;
	for value in column
		.iter()
		.take(options.max_examples_for_computing_borders)
	{
		if let Ok(value) = Finite::new(*value) {
			*histogram.entry(value).or_insert(0) += 1;
			histogram_values_count += 1;
		}
	}
	// If the number of unique values is less than `max_bins_per_feature`, then create one bin per unique value. Otherwise, create bins at quantiles.
	if histogram.len() <= options.max_bins_per_feature {
		histogram
			.keys()
			.tuple_windows()
			.map(|(a, b)| (a.get() + b.get()) / 2.0)
			// The midpoints of adjacent floats round onto one of them, so two midpoints can coincide.
			.dedup()
			.collect()
	} else {
		compute_borders_as_quantiles(&histogram, histogram_values_count, options)
	}
}

/// Compute the borders for a feature as quantiles from the histogram of its values.
fn compute_borders_as_quantiles(
	histogram: &BTreeMap<Finite<f32>, usize>,
	histogram_values_count: usize,
	options: &GridOptions,
) -> Vec<f32> {
	let total_values_count = histogram_values_count.to_f32().unwrap();
	let max_bins = options.max_bins_per_feature.to_f32().unwrap();
	let quantiles: Vec<f32> = (1..options.max_bins_per_feature)
		.map(|i| i.to_f32().unwrap() / max_bins)
		.collect();
	let quantile_indexes: Vec<usize> = quantiles
		.iter()
		.map(|q| ((total_values_count - 1.0) * q).trunc().to_usize().unwrap())
		.collect();
	let quantile_fracts: Vec<f32> = quantiles
		.iter()
		.map(|q| ((total_values_count - 1.0) * q).fract())
		.collect();
	let mut borders: Vec<Option<f32>> = vec![None; quantiles.len()];
	let mut current_count: usize = 0;
	let mut iter = histogram.iter().peekable();
	while let Some((value, count)) = iter.next() {
		let value = value.get();
		current_count += count;
		let next_value = iter.peek().map(|(next_value, _)| next_value.get());
		for (border, (index, fract)) in
			unfilled_borders(&mut borders, &quantile_indexes, &quantile_fracts)
		{
			match (current_count - 1).cmp(index) {
				Ordering::Equal => {
					*border = match next_value {
						Some(next_value) if *fract > 0.0 => {
							Some(value * (1.0 - fract) + next_value * fract)
						}
						_ => Some(value),
					};
				}
				Ordering::Greater => *border = Some(value),
				Ordering::Less => {}
			}
		}
	}
	// Quantiles of heavily repeated values coincide, so remove duplicates to keep the borders strictly increasing.
	borders.into_iter().flatten().dedup().collect()
}

fn unfilled_borders<'a>(
	borders: &'a mut [Option<f32>],
	quantile_indexes: &'a [usize],
	quantile_fracts: &'a [f32],
) -> impl Iterator<Item = (&'a mut Option<f32>, (&'a usize, &'a f32))> {
	borders
		.iter_mut()
		.zip(quantile_indexes.iter().zip(quantile_fracts.iter()))
		.filter(|(border, _)| border.is_none())
}

#[test]
fn test_bin_matches_border_comparison() {
	let grid = Grid::new(vec![vec![0.5, 1.5, 2.0]]).unwrap();
	assert_eq!(grid.n_bins(0), 4);
	assert_eq!(grid.bin(0, -3.0), 0);
	assert_eq!(grid.bin(0, 0.5), 0);
	assert_eq!(grid.bin(0, 0.6), 1);
	assert_eq!(grid.bin(0, 1.5), 1);
	assert_eq!(grid.bin(0, 2.0), 2);
	assert_eq!(grid.bin(0, 7.0), 3);
	assert_eq!(grid.bin(0, f32::NAN), 0);
	// A value goes left on condition c exactly when its bin is <= c.
	for value in &[-1.0, 0.5, 1.0, 1.5, 1.7, 2.0, 3.0] {
		for condition_index in 0..grid.n_conditions(0) {
			assert_eq!(
				*value <= grid.border(0, condition_index),
				grid.bin(0, *value) <= condition_index
			);
		}
	}
}

#[test]
fn test_new_rejects_unsorted_borders() {
	assert!(Grid::new(vec![vec![1.0, 1.0]]).is_err());
	assert!(Grid::new(vec![vec![2.0, 1.0]]).is_err());
	assert!(Grid::new(vec![vec![f32::NAN]]).is_err());
	assert!(Grid::new(vec![vec![], vec![1.0, 2.0]]).is_ok());
}

#[test]
fn test_compute_few_unique_values() {
	let features = arr2(&[[1.0, 7.0], [1.0, 1.0], [1.0, 3.0], [1.0, f32::NAN]]);
	let grid = Grid::compute(features.view(), &GridOptions::default()).unwrap();
	assert_eq!(grid.n_features(), 2);
	insta::assert_debug_snapshot!(grid.borders(0), @"[]");
	insta::assert_debug_snapshot!(grid.borders(1), @r###"
 [
     2.0,
     5.0,
 ]
 "###);
}

#[test]
fn test_compute_quantiles() {
	let values: Vec<f32> = (0..1000).map(|i| i as f32).collect();
	let features = Array2::from_shape_vec((1000, 1), values).unwrap();
	let options = GridOptions {
		max_bins_per_feature: 4,
		..Default::default()
	};
	let grid = Grid::compute(features.view(), &options).unwrap();
	assert_eq!(grid.n_bins(0), 4);
	assert_eq!(grid.borders(0), &[249.75, 499.5, 749.25]);
}

#[test]
fn test_compute_adjacent_floats() {
	// The midpoint of each pair of neighbors rounds to the middle value.
	let epsilon = f32::EPSILON;
	let features = arr2(&[[1.0 + epsilon], [1.0 + 2.0 * epsilon], [1.0 + 3.0 * epsilon]]);
	let grid = Grid::compute(features.view(), &GridOptions::default()).unwrap();
	assert_eq!(grid.borders(0), &[1.0 + 2.0 * epsilon]);
	assert!(Grid::new(vec![grid.borders(0).to_vec()]).is_ok());
}

#[test]
fn test_bin_count_limit() {
	let borders: Vec<f32> = (0..MAX_BINS_PER_FEATURE).map(|i| i as f32).collect();
	assert!(matches!(
		Grid::new(vec![borders.clone()]),
		Err(Error::InvalidOptions(_))
	));
	assert!(Grid::new(vec![borders[1..].to_vec()]).is_ok());
	let features = arr2(&[[1.0], [2.0]]);
	for max_bins_per_feature in &[0, MAX_BINS_PER_FEATURE + 1] {
		let options = GridOptions {
			max_bins_per_feature: *max_bins_per_feature,
			..Default::default()
		};
		assert!(Grid::compute(features.view(), &options).is_err());
	}
}

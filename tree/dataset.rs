use crate::{grid::Grid, Error, Result};
use linear_tree_util::pzip;
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rayon::prelude::*;

/// A `DataSet` holds the raw feature values with shape (n_examples, n_features). By convention, feature 0 is a column of ones when the learner is asked to fit a bias.
#[derive(Clone, Debug)]
pub struct DataSet {
	features: Array2<f32>,
}

impl DataSet {
	pub fn new(features: Array2<f32>) -> DataSet {
		DataSet { features }
	}

	/// Create a dataset whose first column is the constant bias column followed by the columns of `features`.
	pub fn with_bias_column(features: ArrayView2<f32>) -> DataSet {
		let n_examples = features.nrows();
		let mut with_bias = Array2::ones((n_examples, features.ncols() + 1));
		with_bias.slice_mut(s![.., 1..]).assign(&features);
		DataSet {
			features: with_bias,
		}
	}

	pub fn features(&self) -> ArrayView2<f32> {
		self.features.view()
	}

	pub fn example(&self, example_index: usize) -> ArrayView1<f32> {
		self.features.row(example_index)
	}

	pub fn n_examples(&self) -> usize {
		self.features.nrows()
	}

	pub fn n_features(&self) -> usize {
		self.features.ncols()
	}
}

/// The `Target` holds a value and a weight for each example.
#[derive(Clone, Debug)]
pub struct Target {
	values: Array1<f32>,
	weights: Array1<f32>,
}

impl Target {
	pub fn new(values: Array1<f32>, weights: Array1<f32>) -> Result<Target> {
		if values.len() != weights.len() {
			return Err(Error::DimensionMismatch {
				expected: values.len(),
				actual: weights.len(),
			});
		}
		Ok(Target { values, weights })
	}

	/// Create a target where every example has weight 1.
	pub fn unweighted(values: Array1<f32>) -> Target {
		let weights = Array1::ones(values.len());
		Target { values, weights }
	}

	pub fn values(&self) -> ArrayView1<f32> {
		self.values.view()
	}

	pub fn weights(&self) -> ArrayView1<f32> {
		self.weights.view()
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

/// A `BinarizedDataSet` holds the bin of every example for every feature of a `Grid`, one contiguous column per feature.
#[derive(Debug)]
pub struct BinarizedDataSet {
	columns: Vec<BinnedFeaturesColumn>,
	n_examples: usize,
}

/// Features with at most 256 bins store their bins as `u8`, the rest as `u16`.
#[derive(Debug)]
pub enum BinnedFeaturesColumn {
	U8(Vec<u8>),
	U16(Vec<u16>),
}

impl BinnedFeaturesColumn {
	pub fn len(&self) -> usize {
		match self {
			BinnedFeaturesColumn::U8(values) => values.len(),
			BinnedFeaturesColumn::U16(values) => values.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	#[inline]
	pub fn get(&self, example_index: usize) -> usize {
		match self {
			BinnedFeaturesColumn::U8(values) => values[example_index].to_usize().unwrap(),
			BinnedFeaturesColumn::U16(values) => values[example_index].to_usize().unwrap(),
		}
	}
}

impl BinarizedDataSet {
	/// Compute the bins of every feature of `dataset` in parallel. The grid must have one entry per column of the dataset.
	pub fn new(dataset: &DataSet, grid: &Grid) -> Result<BinarizedDataSet> {
		if grid.n_features() != dataset.n_features() {
			return Err(Error::DimensionMismatch {
				expected: grid.n_features(),
				actual: dataset.n_features(),
			});
		}
		let features = dataset.features();
		let feature_columns: Vec<ArrayView1<f32>> = features.axis_iter(Axis(1)).collect();
		let feature_indexes: Vec<usize> = (0..grid.n_features()).collect();
		let columns = pzip!(feature_columns, feature_indexes)
			.map(|(feature_column, feature_index)| {
				if grid.n_bins(feature_index) <= 256 {
					BinnedFeaturesColumn::U8(compute_binned_feature_column(
						grid,
						feature_index,
						feature_column,
					))
				} else {
					BinnedFeaturesColumn::U16(compute_binned_feature_column(
						grid,
						feature_index,
						feature_column,
					))
				}
			})
			.collect();
		Ok(BinarizedDataSet {
			columns,
			n_examples: dataset.n_examples(),
		})
	}

	pub fn column(&self, feature_index: usize) -> &BinnedFeaturesColumn {
		&self.columns[feature_index]
	}

	pub fn bin(&self, example_index: usize, feature_index: usize) -> usize {
		self.columns[feature_index].get(example_index)
	}

	pub fn n_examples(&self) -> usize {
		self.n_examples
	}

	pub fn n_features(&self) -> usize {
		self.columns.len()
	}
}

fn compute_binned_feature_column<T>(
	grid: &Grid,
	feature_index: usize,
	feature_column: ArrayView1<f32>,
) -> Vec<T>
where
	T: num_traits::NumCast,
{
	feature_column
		.iter()
		// `Grid` never has more bins per feature than fit in a `u16`.
		.map(|value| T::from(grid.bin(feature_index, *value)).unwrap())
		.collect()
}

#[test]
fn test_binarized_dataset() {
	let grid = Grid::new(vec![vec![], vec![1.5, 4.0]]).unwrap();
	let dataset = DataSet::with_bias_column(arr2(&[[1.0], [2.0], [5.0], [f32::NAN]]).view());
	assert_eq!(dataset.n_features(), 2);
	assert_eq!(dataset.example(2), arr1(&[1.0, 5.0]));
	let bds = BinarizedDataSet::new(&dataset, &grid).unwrap();
	assert_eq!(bds.n_examples(), 4);
	let bins: Vec<usize> = (0..4).map(|example_index| bds.bin(example_index, 1)).collect();
	assert_eq!(bins, vec![0, 1, 2, 0]);
	assert!((0..4).all(|example_index| bds.bin(example_index, 0) == 0));
	assert!(matches!(bds.column(1), BinnedFeaturesColumn::U8(_)));
}

#[test]
fn test_binarized_dataset_wide_feature() {
	let borders: Vec<f32> = (0..300).map(|i| i as f32 + 0.5).collect();
	let grid = Grid::new(vec![borders]).unwrap();
	let dataset = DataSet::new(arr2(&[[0.0], [299.0], [1000.0]]));
	let bds = BinarizedDataSet::new(&dataset, &grid).unwrap();
	assert!(matches!(bds.column(0), BinnedFeaturesColumn::U16(_)));
	assert_eq!(bds.bin(1, 0), 299);
	assert_eq!(bds.bin(2, 0), 300);
}

#[test]
fn test_binarized_dataset_most_bins() {
	use crate::grid::MAX_BINS_PER_FEATURE;
	let borders: Vec<f32> = (1..MAX_BINS_PER_FEATURE).map(|i| i as f32).collect();
	let grid = Grid::new(vec![borders]).unwrap();
	assert_eq!(grid.n_bins(0), MAX_BINS_PER_FEATURE);
	let dataset = DataSet::new(arr2(&[[0.0], [1e6]]));
	let bds = BinarizedDataSet::new(&dataset, &grid).unwrap();
	assert_eq!(bds.bin(0, 0), 0);
	assert_eq!(bds.bin(1, 0), MAX_BINS_PER_FEATURE - 1);
}

#[test]
fn test_binarized_dataset_checks_feature_count() {
	let grid = Grid::new(vec![vec![1.0]]).unwrap();
	let dataset = DataSet::new(arr2(&[[0.0, 1.0]]));
	assert!(BinarizedDataSet::new(&dataset, &grid).is_err());
}

#[test]
fn test_target_checks_lengths() {
	assert!(Target::new(arr1(&[1.0, 2.0]), arr1(&[1.0])).is_err());
	let target = Target::unweighted(arr1(&[1.0, 2.0]));
	assert_eq!(target.weights(), arr1(&[1.0, 1.0]));
}

/*!
This crate implements a learner for linear oblivious trees: decision trees that apply the same split to every node at a given depth and hold a ridge regression model in each leaf instead of a constant.

Training works on binned features. For every leaf and every candidate feature, the learner accumulates the normal equations of the leaf's least squares problem in a histogram with one entry per bin, so every candidate split can be scored in closed form without revisiting the examples. For an example, see `benchmarks/synthetic.rs`.
*/

#![allow(clippy::tabs_in_doc_comments)]

mod bin_stats;
mod config;
mod dataset;
mod error;
mod grid;
mod histogram;
mod model;
mod serialize;
#[cfg(feature = "timing")]
mod timing;
mod train;
mod tree;

pub use self::bin_stats::BinStats;
pub use self::config::Config;
pub use self::dataset::{BinarizedDataSet, BinnedFeaturesColumn, DataSet, Target};
pub use self::error::{Error, Result};
pub use self::grid::{Grid, GridOptions, MAX_BINS_PER_FEATURE};
pub use self::histogram::Histogram;
pub use self::model::{ApplyType, Model};
#[cfg(feature = "timing")]
pub use self::timing::{Timing, TimingDuration};
pub use self::train::LinearObliviousTreeLearner;
pub use self::tree::{LinearObliviousTree, LinearObliviousTreeLeaf, ObliviousSplit};

/// These are the options passed to `LinearObliviousTreeLearner::new`.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainOptions {
	/// The tree will have exactly this many levels of splits, and `2^max_depth` leaves, unless no split improves the objective first.
	pub max_depth: usize,
	/// If true, feature 0 is added to every leaf's model before any split is chosen. The dataset's first column must then be constant one, see `DataSet::with_bias_column`.
	pub use_bias_column: bool,
	/// These features are added to every leaf's model, in order, before any split is chosen.
	pub initial_features: Vec<usize>,
	/// This option sets the L2 regularization value added to the diagonal of the normal equations, which helps avoid overfitting.
	pub l2_regularization: f64,
	/// Each side of a split is additionally regularized by this value times the trace of its cross product matrix.
	pub trace_regularization: f64,
	/// A split is only made if it decreases the objective by more than this value.
	pub min_gain_to_split: f64,
	/// The number of threads to use. If it is `None`, the number of threads in the current rayon thread pool is used.
	pub n_threads: Option<usize>,
}

impl Default for TrainOptions {
	fn default() -> Self {
		Self {
			max_depth: 6,
			use_bias_column: false,
			initial_features: Vec::new(),
			l2_regularization: 0.0,
			trace_regularization: 0.0,
			min_gain_to_split: 0.0,
			n_threads: None,
		}
	}
}

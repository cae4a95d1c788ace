use crate::{
	bin_stats::BinStats,
	dataset::{BinarizedDataSet, DataSet, Target},
	grid::Grid,
	histogram::Histogram,
	tree::{linear_value, LinearObliviousTree, LinearObliviousTreeLeaf, ObliviousSplit},
	Error, Result, TrainOptions,
};
use linear_tree_util::pzip;
use log::{debug, info, trace};
use rayon::prelude::*;
use std::{collections::BTreeSet, ops::Range};

#[cfg(feature = "timing")]
use crate::timing::Timing;

/// The `LinearObliviousTreeLearner` grows a `LinearObliviousTree` one level at a time. At each level it builds a histogram of normal equations for every leaf and every candidate feature, scores every split of every candidate by the ridge objective summed over all leaves, and applies the best split to every leaf.
pub struct LinearObliviousTreeLearner<'g> {
	grid: &'g Grid,
	options: TrainOptions,
	cached: Option<CachedDataSet>,
	/// The leaf of each example in the level being grown.
	leaf_ids: Vec<usize>,
	samples_leaves_count: Vec<usize>,
	used_features: BTreeSet<usize>,
	used_features_ordered: Vec<usize>,
	/// The histograms of the previous level, indexed by leaf and then by candidate. They are only kept while the basis is unchanged, because the coordinate layout of their statistics must match the next level's.
	parent_histograms: Option<Vec<Vec<Histogram>>>,
	#[cfg(feature = "timing")]
	timing: Timing,
}

/// The raw values of each feature, converted for the linear models, and the bins of each feature.
struct CachedDataSet {
	columns: Vec<Vec<f64>>,
	bds: BinarizedDataSet,
	n_examples: usize,
}

impl CachedDataSet {
	fn new(dataset: &DataSet, grid: &Grid) -> Result<CachedDataSet> {
		let bds = BinarizedDataSet::new(dataset, grid)?;
		let features = dataset.features();
		let columns = (0..dataset.n_features())
			.into_par_iter()
			.map(|feature_index| {
				features
					.column(feature_index)
					.iter()
					.map(|value| linear_value(*value))
					.collect()
			})
			.collect();
		Ok(CachedDataSet {
			columns,
			bds,
			n_examples: dataset.n_examples(),
		})
	}
}

/// The best split found at one level.
#[derive(Clone, Copy, Debug)]
struct BestSplit {
	candidate_index: usize,
	condition_index: usize,
	score: f64,
}

impl<'g> LinearObliviousTreeLearner<'g> {
	pub fn new(grid: &'g Grid, options: TrainOptions) -> LinearObliviousTreeLearner<'g> {
		LinearObliviousTreeLearner {
			grid,
			options,
			cached: None,
			leaf_ids: Vec::new(),
			samples_leaves_count: Vec::new(),
			used_features: BTreeSet::new(),
			used_features_ordered: Vec::new(),
			parent_histograms: None,
			#[cfg(feature = "timing")]
			timing: Timing::new(),
		}
	}

	pub fn options(&self) -> &TrainOptions {
		&self.options
	}

	#[cfg(feature = "timing")]
	pub fn timing(&self) -> &Timing {
		&self.timing
	}

	pub fn is_dataset_cached(&self) -> bool {
		self.cached.is_some()
	}

	/// Bin the features of `dataset` and copy its columns for the linear models. Once a dataset is cached, calling this again does nothing, and every later call to `fit` trains on the cached dataset.
	pub fn cache_dataset(&mut self, dataset: &DataSet) -> Result<()> {
		if self.cached.is_none() {
			self.cached = Some(self.load_dataset(dataset)?);
		}
		Ok(())
	}

	fn load_dataset(&self, dataset: &DataSet) -> Result<CachedDataSet> {
		#[cfg(feature = "timing")]
		let start = std::time::Instant::now();
		let cached = CachedDataSet::new(dataset, self.grid)?;
		#[cfg(feature = "timing")]
		self.timing.cache_dataset.inc(start.elapsed());
		Ok(cached)
	}

	/// Clear the state left over from a previous call to `fit`.
	pub fn reset_state(&mut self) {
		let n_examples = self
			.cached
			.as_ref()
			.map(|cached| cached.n_examples)
			.unwrap_or(0);
		self.reset_state_for(n_examples);
	}

	fn reset_state_for(&mut self, n_examples: usize) {
		self.leaf_ids = vec![0; n_examples];
		self.samples_leaves_count = vec![n_examples];
		self.used_features.clear();
		self.used_features_ordered.clear();
		self.parent_histograms = None;
	}

	/// Train a tree on `dataset` and `target`. The dataset is cached on the first call.
	pub fn fit(
		&mut self,
		dataset: &DataSet,
		target: &Target,
	) -> Result<LinearObliviousTree<'g>> {
		self.validate_options(dataset)?;
		// The cached dataset is moved out while training so the rest of the learner's state can be updated alongside it.
		let cached = match self.cached.take() {
			Some(cached) => cached,
			None => self.load_dataset(dataset)?,
		};
		let n_threads = self
			.options
			.n_threads
			.unwrap_or_else(rayon::current_num_threads);
		let result = rayon::ThreadPoolBuilder::new()
			.num_threads(n_threads)
			.build()
			.map_err(|error| Error::ThreadPool(error.to_string()))
			.and_then(|pool| pool.install(|| self.grow(&cached, target)));
		self.cached = Some(cached);
		result
	}

	fn validate_options(&self, dataset: &DataSet) -> Result<()> {
		let TrainOptions {
			l2_regularization,
			trace_regularization,
			min_gain_to_split,
			n_threads,
			initial_features,
			..
		} = &self.options;
		if !(*l2_regularization >= 0.0 && l2_regularization.is_finite()) {
			return Err(Error::InvalidOptions(format!(
				"l2_regularization must be a non-negative number, got {}",
				l2_regularization
			)));
		}
		if !(*trace_regularization >= 0.0 && trace_regularization.is_finite()) {
			return Err(Error::InvalidOptions(format!(
				"trace_regularization must be a non-negative number, got {}",
				trace_regularization
			)));
		}
		if !min_gain_to_split.is_finite() {
			return Err(Error::InvalidOptions(format!(
				"min_gain_to_split must be finite, got {}",
				min_gain_to_split
			)));
		}
		if *n_threads == Some(0) {
			return Err(Error::InvalidOptions(
				"n_threads must be at least 1".to_owned(),
			));
		}
		if self.grid.n_features() != dataset.n_features() {
			return Err(Error::DimensionMismatch {
				expected: self.grid.n_features(),
				actual: dataset.n_features(),
			});
		}
		if let Some(feature_index) = initial_features
			.iter()
			.find(|feature_index| **feature_index >= dataset.n_features())
		{
			return Err(Error::InvalidOptions(format!(
				"initial feature {} is out of range for a dataset with {} features",
				feature_index,
				dataset.n_features()
			)));
		}
		if self.options.use_bias_column && dataset.n_features() == 0 {
			return Err(Error::InvalidOptions(
				"use_bias_column requires a dataset with at least one feature".to_owned(),
			));
		}
		Ok(())
	}

	fn grow(&mut self, cached: &CachedDataSet, target: &Target) -> Result<LinearObliviousTree<'g>> {
		#[cfg(feature = "timing")]
		let start_total = std::time::Instant::now();
		if target.len() != cached.n_examples {
			return Err(Error::DimensionMismatch {
				expected: cached.n_examples,
				actual: target.len(),
			});
		}
		self.reset_state_for(cached.n_examples);
		let targets: Vec<f64> = target.values().iter().map(|y| f64::from(*y)).collect();
		let weights: Vec<f64> = target.weights().iter().map(|w| f64::from(*w)).collect();

		// Seed the basis.
		if self.options.use_bias_column {
			self.add_to_basis(0);
		}
		for feature_index in self.options.initial_features.clone() {
			self.add_to_basis(feature_index);
		}
		let capacity = self.used_features_ordered.len() + self.options.max_depth;
		let candidates: Vec<usize> = (0..self.grid.n_features())
			.filter(|feature_index| self.grid.n_conditions(*feature_index) > 0)
			.collect();
		info!(
			"fitting a linear oblivious tree on {} examples with {} candidate features and max depth {}",
			cached.n_examples,
			candidates.len(),
			self.options.max_depth
		);

		#[cfg(feature = "timing")]
		let start = std::time::Instant::now();
		let root_stats = self.compute_root_stats(cached, &targets, &weights, capacity);
		#[cfg(feature = "timing")]
		self.timing.compute_root_stats.inc(start.elapsed());
		let mut current_score = root_stats.fit_score(root_stats.regularization(
			self.options.l2_regularization,
			self.options.trace_regularization,
		))?;
		let mut leaf_stats = vec![root_stats];
		let mut splits: Vec<ObliviousSplit> = Vec::new();

		for depth in 0..self.options.max_depth {
			#[cfg(feature = "timing")]
			let start = std::time::Instant::now();
			let histograms =
				self.compute_level_histograms(cached, &targets, &weights, &candidates, capacity);
			#[cfg(feature = "timing")]
			self.timing.compute_histograms.inc(start.elapsed());

			#[cfg(feature = "timing")]
			let start = std::time::Instant::now();
			let best_split = self.choose_split(&histograms, &candidates);
			#[cfg(feature = "timing")]
			self.timing.choose_split.inc(start.elapsed());
			let best_split = match best_split {
				Some(best_split) => best_split,
				None => {
					debug!("depth {}: no candidate split has a solvable system", depth);
					break;
				}
			};
			let gain = current_score - best_split.score;
			if gain <= self.options.min_gain_to_split {
				debug!(
					"depth {}: the best split has gain {}, stopping",
					depth, gain
				);
				break;
			}

			#[cfg(feature = "timing")]
			let start = std::time::Instant::now();
			let feature_index = candidates[best_split.candidate_index];
			let condition_index = best_split.condition_index;
			debug!(
				"depth {}: split feature {} at condition {} (border {}), objective {}, gain {}",
				depth,
				feature_index,
				condition_index,
				self.grid.border(feature_index, condition_index),
				best_split.score,
				gain
			);
			splits.push(ObliviousSplit {
				feature_index,
				condition_index,
			});
			let basis_grew = self.add_to_basis(feature_index);
			let n_used_features = self.used_features_ordered.len();
			leaf_stats = histograms
				.iter()
				.flat_map(|leaf_histograms| {
					let (mut left, mut right) =
						leaf_histograms[best_split.candidate_index].split_stats(condition_index);
					left.set_filled_size(n_used_features);
					right.set_filled_size(n_used_features);
					vec![left, right]
				})
				.collect();
			self.partition(cached, feature_index, condition_index);
			current_score = best_split.score;
			self.parent_histograms = if basis_grew { None } else { Some(histograms) };
			#[cfg(feature = "timing")]
			self.timing.partition.inc(start.elapsed());
		}

		#[cfg(feature = "timing")]
		let start = std::time::Instant::now();
		let leaves = self.fit_leaves(&leaf_stats)?;
		#[cfg(feature = "timing")]
		self.timing.fit_leaves.inc(start.elapsed());
		info!(
			"fit a linear oblivious tree with depth {}, {} features in its basis and objective {}",
			splits.len(),
			self.used_features_ordered.len(),
			current_score
		);
		#[cfg(feature = "timing")]
		self.timing.total.inc(start_total.elapsed());
		#[cfg(feature = "timing")]
		debug!("{:?}", self.timing);
		LinearObliviousTree::new(self.grid, splits, leaves)
	}

	/// Add a feature to the end of the basis. Returns false if it was already there.
	fn add_to_basis(&mut self, feature_index: usize) -> bool {
		let is_new = self.used_features.insert(feature_index);
		if is_new {
			self.used_features_ordered.push(feature_index);
		}
		is_new
	}

	fn compute_root_stats(
		&self,
		cached: &CachedDataSet,
		targets: &[f64],
		weights: &[f64],
		capacity: usize,
	) -> BinStats {
		let basis = &self.used_features_ordered;
		let chunk_stats: Vec<BinStats> = chunk_ranges(cached.n_examples)
			.into_par_iter()
			.map(|chunk| {
				let mut stats = BinStats::new(capacity, basis.len());
				let mut x = vec![0.0; basis.len()];
				for example_index in chunk {
					fill_basis_values(&mut x, basis, &cached.columns, example_index);
					stats.add_full_correlation(&x, targets[example_index], weights[example_index]);
				}
				stats
			})
			.collect();
		let mut root_stats = BinStats::new(capacity, basis.len());
		for stats in chunk_stats.iter() {
			root_stats += stats;
		}
		root_stats
	}

	/// Compute the prefix summed histograms of every leaf for every candidate. When the previous level did not change the basis, only the child with fewer examples in each pair of siblings is computed, and the other is its parent's histogram minus its sibling's.
	fn compute_level_histograms(
		&self,
		cached: &CachedDataSet,
		targets: &[f64],
		weights: &[f64],
		candidates: &[usize],
		capacity: usize,
	) -> Vec<Vec<Histogram>> {
		let n_leaves = self.samples_leaves_count.len();
		let parent_histograms = match &self.parent_histograms {
			Some(parent_histograms) => parent_histograms,
			None => {
				let compute_leaf = vec![true; n_leaves];
				return self.compute_histograms(
					cached,
					targets,
					weights,
					candidates,
					&compute_leaf,
					capacity,
				);
			}
		};
		let compute_leaf: Vec<bool> = (0..n_leaves)
			.map(|leaf_index| {
				let n_examples = self.samples_leaves_count[leaf_index];
				let sibling_n_examples = self.samples_leaves_count[leaf_index ^ 1];
				n_examples < sibling_n_examples
					|| (n_examples == sibling_n_examples && leaf_index % 2 == 0)
			})
			.collect();
		let mut histograms = self.compute_histograms(
			cached,
			targets,
			weights,
			candidates,
			&compute_leaf,
			capacity,
		);
		for leaf_index in 0..n_leaves {
			if compute_leaf[leaf_index] {
				continue;
			}
			let mut derived = parent_histograms[leaf_index / 2].clone();
			for (histogram, sibling_histogram) in
				derived.iter_mut().zip(histograms[leaf_index ^ 1].iter())
			{
				*histogram -= sibling_histogram;
			}
			histograms[leaf_index] = derived;
		}
		histograms
	}

	/// Stream the examples of the leaves marked in `compute_leaf` into fresh histograms. Leaves that are not computed get no histograms.
	fn compute_histograms(
		&self,
		cached: &CachedDataSet,
		targets: &[f64],
		weights: &[f64],
		candidates: &[usize],
		compute_leaf: &[bool],
		capacity: usize,
	) -> Vec<Vec<Histogram>> {
		let basis = &self.used_features_ordered;
		let n_used_features = basis.len();
		let candidate_is_new: Vec<bool> = candidates
			.iter()
			.map(|feature_index| !self.used_features.contains(feature_index))
			.collect();
		let empty_histograms = || -> Vec<Vec<Histogram>> {
			compute_leaf
				.iter()
				.map(|compute| {
					if *compute {
						candidates
							.iter()
							.map(|feature_index| {
								Histogram::new(self.grid, *feature_index, capacity, n_used_features)
							})
							.collect()
					} else {
						Vec::new()
					}
				})
				.collect()
		};
		let chunk_histograms: Vec<Vec<Vec<Histogram>>> = chunk_ranges(cached.n_examples)
			.into_par_iter()
			.map(|chunk| {
				let mut histograms = empty_histograms();
				let mut x = vec![0.0; n_used_features];
				let mut xtx_row = vec![0.0; n_used_features + 1];
				for example_index in chunk {
					let leaf_index = self.leaf_ids[example_index];
					if !compute_leaf[leaf_index] {
						continue;
					}
					fill_basis_values(&mut x, basis, &cached.columns, example_index);
					let y = targets[example_index];
					let w = weights[example_index];
					for (histogram, feature_index, is_new) in itertools::izip!(
						histograms[leaf_index].iter_mut(),
						candidates,
						&candidate_is_new
					) {
						let bin = cached.bds.bin(example_index, *feature_index);
						histogram.add_full_correlation(bin, &x, y, w);
						if *is_new {
							// The candidate's coordinate goes right after the basis.
							let value = cached.columns[*feature_index][example_index];
							let wv = w * value;
							for (entry, basis_value) in xtx_row.iter_mut().zip(x.iter()) {
								*entry = wv * basis_value;
							}
							xtx_row[n_used_features] = wv * value;
							histogram.add_new_correlation(bin, &xtx_row, wv * y, 0);
						}
					}
				}
				histograms
			})
			.collect();
		// Merge in chunk order so the result does not depend on scheduling.
		let mut histograms = empty_histograms();
		for chunk in chunk_histograms.iter() {
			for (leaf_histograms, chunk_leaf_histograms) in histograms.iter_mut().zip(chunk.iter()) {
				for (histogram, chunk_histogram) in
					leaf_histograms.iter_mut().zip(chunk_leaf_histograms.iter())
				{
					*histogram += chunk_histogram;
				}
			}
		}
		histograms.par_iter_mut().for_each(|leaf_histograms| {
			for histogram in leaf_histograms.iter_mut() {
				histogram.prefix_sum_bins();
			}
		});
		histograms
	}

	/// Score every condition of every candidate by the objective summed over all leaves and return the lowest. Ties go to the first candidate and condition.
	fn choose_split(
		&self,
		histograms: &[Vec<Histogram>],
		candidates: &[usize],
	) -> Option<BestSplit> {
		let l2_regularization = self.options.l2_regularization;
		let trace_regularization = self.options.trace_regularization;
		let scores: Vec<Vec<Option<f64>>> = candidates
			.par_iter()
			.enumerate()
			.map(|(candidate_index, feature_index)| {
				(0..self.grid.n_conditions(*feature_index))
					.map(|condition_index| {
						let mut score = 0.0;
						for leaf_histograms in histograms.iter() {
							match leaf_histograms[candidate_index].split_score(
								condition_index,
								l2_regularization,
								trace_regularization,
							) {
								Ok((left_score, right_score)) => score += left_score + right_score,
								Err(error) => {
									trace!(
										"rejecting the split of feature {} at condition {}: {}",
										feature_index,
										condition_index,
										error
									);
									return None;
								}
							}
						}
						Some(score)
					})
					.collect()
			})
			.collect();
		let mut best_split: Option<BestSplit> = None;
		for (candidate_index, candidate_scores) in scores.iter().enumerate() {
			for (condition_index, score) in candidate_scores.iter().enumerate() {
				let score = match score {
					Some(score) if score.is_finite() => *score,
					_ => continue,
				};
				let is_better = best_split
					.map(|best_split| score < best_split.score)
					.unwrap_or(true);
				if is_better {
					best_split = Some(BestSplit {
						candidate_index,
						condition_index,
						score,
					});
				}
			}
		}
		best_split
	}

	/// Send every example to the left or right child of its leaf.
	fn partition(&mut self, cached: &CachedDataSet, feature_index: usize, condition_index: usize) {
		let bins = cached.bds.column(feature_index);
		pzip!(&mut self.leaf_ids, 0..cached.n_examples).for_each(|(leaf_index, example_index)| {
			let goes_right = bins.get(example_index) > condition_index;
			*leaf_index = 2 * *leaf_index + goes_right as usize;
		});
		let mut samples_leaves_count = vec![0; 2 * self.samples_leaves_count.len()];
		for leaf_index in self.leaf_ids.iter() {
			samples_leaves_count[*leaf_index] += 1;
		}
		self.samples_leaves_count = samples_leaves_count;
	}

	fn fit_leaves(&self, leaf_stats: &[BinStats]) -> Result<Vec<LinearObliviousTreeLeaf>> {
		let n_used_features = self.used_features_ordered.len();
		leaf_stats
			.iter()
			.map(|stats| {
				let weights = if stats.weight() == 0.0 {
					vec![0.0; n_used_features]
				} else {
					let l2_regularization = stats.regularization(
						self.options.l2_regularization,
						self.options.trace_regularization,
					);
					stats.solve(l2_regularization)?.iter().cloned().collect()
				};
				LinearObliviousTreeLeaf::new(
					self.used_features_ordered.clone(),
					weights,
					stats.weight(),
				)
			})
			.collect()
	}
}

/// Cut the examples into one contiguous chunk per thread in the current thread pool.
fn chunk_ranges(n_examples: usize) -> Vec<Range<usize>> {
	let n_threads = rayon::current_num_threads();
	let chunk_size = ((n_examples + n_threads - 1) / n_threads).max(1);
	(0..n_examples)
		.step_by(chunk_size)
		.map(|start| start..(start + chunk_size).min(n_examples))
		.collect()
}

fn fill_basis_values(x: &mut [f64], basis: &[usize], columns: &[Vec<f64>], example_index: usize) {
	for (value, feature_index) in x.iter_mut().zip(basis.iter()) {
		*value = columns[*feature_index][example_index];
	}
}

#[cfg(test)]
use crate::model::Model;
#[cfg(test)]
use ndarray::prelude::*;

#[cfg(test)]
fn synthetic_dataset(
	n_examples: usize,
	seed: u64,
	target_fn: impl Fn(f32, f32) -> f32,
) -> (DataSet, Target) {
	use rand::{Rng, SeedableRng};
	use rand_xoshiro::Xoshiro256Plus;
	let mut rng = Xoshiro256Plus::seed_from_u64(seed);
	let mut features = Array2::zeros((n_examples, 2));
	let mut values = Array1::zeros(n_examples);
	for example_index in 0..n_examples {
		// Half of the examples have a positive first feature, and no example has it near zero.
		let magnitude: f32 = rng.gen_range(0.1..1.0);
		let a = if example_index % 2 == 0 {
			magnitude
		} else {
			-magnitude
		};
		let b: f32 = rng.gen_range(-1.0..1.0);
		features[[example_index, 0]] = a;
		features[[example_index, 1]] = b;
		values[example_index] = target_fn(a, b);
	}
	(
		DataSet::with_bias_column(features.view()),
		Target::unweighted(values),
	)
}

/// The slope and intercept in feature 2 depend on the sign of feature 1.
#[cfg(test)]
fn piecewise_linear(a: f32, b: f32) -> f32 {
	if a > 0.0 {
		3.0 * b + 1.0
	} else {
		-2.0 * b - 1.0
	}
}

#[test]
fn test_depth_zero_fits_a_line() {
	let dataset = DataSet::with_bias_column(arr2(&[[1.0], [3.0]]).view());
	let target = Target::unweighted(arr1(&[2.0, 6.0]));
	let grid = Grid::new(vec![vec![], vec![2.0]]).unwrap();
	let options = TrainOptions {
		max_depth: 0,
		use_bias_column: true,
		initial_features: vec![1],
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	let tree = learner.fit(&dataset, &target).unwrap();
	assert_eq!(tree.depth(), 0);
	assert_eq!(tree.leaves().len(), 1);
	let leaf = &tree.leaves()[0];
	assert_eq!(leaf.used_features_in_order(), &[0, 1]);
	assert!(leaf.weights()[0].abs() < 1e-9);
	assert!((leaf.weights()[1] - 2.0).abs() < 1e-9);
	assert_eq!(leaf.weight(), 2.0);
	assert!((tree.value(arr1(&[1.0, 5.0]).view()) - 10.0).abs() < 1e-6);
}

#[test]
fn test_fit_finds_the_piecewise_structure() {
	let (dataset, target) = synthetic_dataset(2000, 0, piecewise_linear);
	let grid = Grid::compute(dataset.features(), &Default::default()).unwrap();
	let options = TrainOptions {
		max_depth: 2,
		use_bias_column: true,
		l2_regularization: 1e-6,
		n_threads: Some(2),
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	let tree = learner.fit(&dataset, &target).unwrap();
	// The first split separates the two regimes on the sign of feature 1.
	let first_split = tree.splits()[0];
	assert_eq!(first_split.feature_index, 1);
	assert!(grid.border(1, first_split.condition_index).abs() < 0.1);
	let x = arr1(&[1.0, 0.5, 0.5]);
	assert!((tree.value(x.view()) - 2.5).abs() < 0.05);
	let x = arr1(&[1.0, -0.5, 0.5]);
	assert!((tree.value(x.view()) + 2.0).abs() < 0.05);
}

#[test]
fn test_leaf_weights_match_ridge_on_leaf_examples() {
	// Every feature is in the basis from the start, so every level after the first derives the larger child of each pair from its parent.
	let (dataset, target) = synthetic_dataset(500, 1, |a, b| {
		piecewise_linear(a, b) + if b > 0.3 { 2.0 } else { 0.0 }
	});
	let grid = Grid::compute(dataset.features(), &Default::default()).unwrap();
	let l2_regularization = 0.1;
	let options = TrainOptions {
		max_depth: 3,
		use_bias_column: true,
		initial_features: vec![1, 2],
		l2_regularization,
		n_threads: Some(3),
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	let tree = learner.fit(&dataset, &target).unwrap();
	assert!(tree.depth() >= 2);
	for (leaf_index, leaf) in tree.leaves().iter().enumerate() {
		let basis = leaf.used_features_in_order();
		let mut stats = BinStats::new(basis.len(), basis.len());
		for example_index in 0..dataset.n_examples() {
			let x = dataset.example(example_index);
			if tree.locate_leaf(x) != leaf_index {
				continue;
			}
			let basis_values: Vec<f64> = basis.iter().map(|f| f64::from(x[*f])).collect();
			let y = f64::from(target.values()[example_index]);
			stats.add_full_correlation(&basis_values, y, 1.0);
		}
		assert_eq!(stats.weight(), leaf.weight());
		let expected = stats.solve(l2_regularization).unwrap();
		for (expected, actual) in expected.iter().zip(leaf.weights()) {
			assert!((expected - actual).abs() < 1e-6);
		}
	}
}

#[test]
fn test_fit_is_deterministic() {
	let (dataset, target) = synthetic_dataset(1000, 2, piecewise_linear);
	let grid = Grid::compute(dataset.features(), &Default::default()).unwrap();
	let options = TrainOptions {
		max_depth: 3,
		use_bias_column: true,
		l2_regularization: 0.01,
		n_threads: Some(4),
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options.clone());
	let first = learner.fit(&dataset, &target).unwrap();
	let second = learner.fit(&dataset, &target).unwrap();
	assert_eq!(first, second);
	let mut other_learner = LinearObliviousTreeLearner::new(&grid, options);
	let third = other_learner.fit(&dataset, &target).unwrap();
	assert_eq!(first, third);
}

#[test]
fn test_constant_target_does_not_split() {
	let (dataset, target) = synthetic_dataset(200, 3, |_, _| 0.0);
	let grid = Grid::compute(dataset.features(), &Default::default()).unwrap();
	let options = TrainOptions {
		max_depth: 3,
		use_bias_column: true,
		l2_regularization: 1.0,
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	let tree = learner.fit(&dataset, &target).unwrap();
	assert_eq!(tree.depth(), 0);
	assert_eq!(tree.leaves()[0].weights(), &[0.0]);
}

#[test]
fn test_singular_root() {
	// The bias and feature 1 are identical, so without regularization the root system cannot be solved.
	let dataset = DataSet::new(arr2(&[[1.0, 1.0], [1.0, 1.0]]));
	let target = Target::unweighted(arr1(&[1.0, 2.0]));
	let grid = Grid::new(vec![vec![], vec![]]).unwrap();
	let options = TrainOptions {
		max_depth: 1,
		use_bias_column: true,
		initial_features: vec![1],
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	assert!(matches!(
		learner.fit(&dataset, &target),
		Err(Error::SingularMatrix)
	));
}

#[test]
fn test_invalid_inputs() {
	let dataset = DataSet::with_bias_column(arr2(&[[1.0], [3.0]]).view());
	let grid = Grid::new(vec![vec![], vec![2.0]]).unwrap();
	let target = Target::unweighted(arr1(&[2.0, 6.0]));
	let options = TrainOptions {
		l2_regularization: -1.0,
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	assert!(matches!(
		learner.fit(&dataset, &target),
		Err(Error::InvalidOptions(_))
	));
	let options = TrainOptions {
		initial_features: vec![5],
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	assert!(matches!(
		learner.fit(&dataset, &target),
		Err(Error::InvalidOptions(_))
	));
	let mut learner = LinearObliviousTreeLearner::new(&grid, TrainOptions::default());
	let short_target = Target::unweighted(arr1(&[2.0]));
	assert!(matches!(
		learner.fit(&dataset, &short_target),
		Err(Error::DimensionMismatch {
			expected: 2,
			actual: 1
		})
	));
	// A failed fit keeps the dataset cached for the next one.
	assert!(learner.is_dataset_cached());
	let tree = learner.fit(&dataset, &target).unwrap();
	assert_eq!(tree.depth(), 1);
}

#[test]
fn test_cache_dataset_is_idempotent() {
	let dataset = DataSet::with_bias_column(arr2(&[[1.0], [3.0]]).view());
	let other_dataset = DataSet::with_bias_column(arr2(&[[1.0], [3.0], [5.0]]).view());
	let grid = Grid::new(vec![vec![], vec![2.0]]).unwrap();
	let options = TrainOptions {
		max_depth: 0,
		use_bias_column: true,
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	assert!(!learner.is_dataset_cached());
	learner.cache_dataset(&dataset).unwrap();
	learner.cache_dataset(&other_dataset).unwrap();
	// The first dataset stays cached, so a target for the second one does not fit.
	let target = Target::unweighted(arr1(&[1.0, 2.0, 3.0]));
	assert!(learner.fit(&other_dataset, &target).is_err());
	let target = Target::unweighted(arr1(&[1.0, 3.0]));
	let tree = learner.fit(&dataset, &target).unwrap();
	assert!((tree.leaves()[0].weights()[0] - 2.0).abs() < 1e-9);
}

#[test]
fn test_min_gain_to_split_stops_growth() {
	let (dataset, target) = synthetic_dataset(2000, 4, piecewise_linear);
	let grid = Grid::compute(dataset.features(), &Default::default()).unwrap();
	let options = TrainOptions {
		max_depth: 2,
		use_bias_column: true,
		l2_regularization: 1e-6,
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options.clone());
	assert_eq!(learner.fit(&dataset, &target).unwrap().depth(), 2);
	let options = TrainOptions {
		min_gain_to_split: 1e9,
		..options
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	let tree = learner.fit(&dataset, &target).unwrap();
	assert_eq!(tree.depth(), 0);
	assert_eq!(tree.leaves().len(), 1);
}

#[test]
fn test_weighted_leaf_weights_match_ridge_on_leaf_examples() {
	use rand::{Rng, SeedableRng};
	use rand_xoshiro::Xoshiro256Plus;
	let (dataset, unweighted) = synthetic_dataset(500, 5, |a, b| {
		piecewise_linear(a, b) + if b > 0.3 { 2.0 } else { 0.0 }
	});
	// Multiples of one half keep the sums of weights exact.
	let mut rng = Xoshiro256Plus::seed_from_u64(5);
	let weights: Array1<f32> = (0..dataset.n_examples())
		.map(|_| f32::from(rng.gen_range(1..=4u8)) * 0.5)
		.collect();
	let target = Target::new(unweighted.values().to_owned(), weights).unwrap();
	let grid = Grid::compute(dataset.features(), &Default::default()).unwrap();
	let l2_regularization = 0.1;
	let trace_regularization = 0.001;
	let options = TrainOptions {
		max_depth: 3,
		use_bias_column: true,
		initial_features: vec![1, 2],
		l2_regularization,
		trace_regularization,
		n_threads: Some(3),
		..Default::default()
	};
	let mut learner = LinearObliviousTreeLearner::new(&grid, options);
	let tree = learner.fit(&dataset, &target).unwrap();
	assert!(tree.depth() >= 1);
	for (leaf_index, leaf) in tree.leaves().iter().enumerate() {
		let basis = leaf.used_features_in_order();
		let mut stats = BinStats::new(basis.len(), basis.len());
		for example_index in 0..dataset.n_examples() {
			let x = dataset.example(example_index);
			if tree.locate_leaf(x) != leaf_index {
				continue;
			}
			let basis_values: Vec<f64> = basis.iter().map(|f| f64::from(x[*f])).collect();
			let y = f64::from(target.values()[example_index]);
			let w = f64::from(target.weights()[example_index]);
			stats.add_full_correlation(&basis_values, y, w);
		}
		assert_eq!(stats.weight(), leaf.weight());
		let expected = stats
			.solve(stats.regularization(l2_regularization, trace_regularization))
			.unwrap();
		for (expected, actual) in expected.iter().zip(leaf.weights()) {
			assert!((expected - actual).abs() < 1e-6);
		}
	}
}

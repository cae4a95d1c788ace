use crate::{
	dataset::{BinarizedDataSet, DataSet},
	grid::Grid,
	model::{ApplyType, Model},
	Error, Result,
};
use linear_tree_util::pzip;
use ndarray::prelude::*;
use rayon::prelude::*;
use std::{convert::TryFrom, fmt};

/// A `LinearObliviousTree` applies the same split to every node at a given depth, so a tree of depth `d` has exactly `2^d` leaves. Each leaf holds a linear model over the features that were in the basis when it was fit.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearObliviousTree<'g> {
	grid: &'g Grid,
	scale: f64,
	splits: Vec<ObliviousSplit>,
	leaves: Vec<LinearObliviousTreeLeaf>,
}

/// The split applied at one depth of the tree. An example goes right when its value is greater than the border at `condition_index`, which is the same as its bin being greater than `condition_index`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObliviousSplit {
	pub feature_index: usize,
	pub condition_index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinearObliviousTreeLeaf {
	used_features_in_order: Vec<usize>,
	weights: Vec<f64>,
	weight: f64,
}

impl LinearObliviousTreeLeaf {
	pub fn new(
		used_features_in_order: Vec<usize>,
		weights: Vec<f64>,
		weight: f64,
	) -> Result<LinearObliviousTreeLeaf> {
		if used_features_in_order.len() != weights.len() {
			return Err(Error::DimensionMismatch {
				expected: used_features_in_order.len(),
				actual: weights.len(),
			});
		}
		Ok(LinearObliviousTreeLeaf {
			used_features_in_order,
			weights,
			weight,
		})
	}

	pub fn used_features_in_order(&self) -> &[usize] {
		&self.used_features_in_order
	}

	pub fn weights(&self) -> &[f64] {
		&self.weights
	}

	/// The total weight of the training examples that reached this leaf.
	pub fn weight(&self) -> f64 {
		self.weight
	}

	pub fn value(&self, x: ArrayView1<f32>) -> f64 {
		self.used_features_in_order
			.iter()
			.zip(self.weights.iter())
			.map(|(feature_index, weight)| weight * linear_value(x[*feature_index]))
			.sum()
	}

	/// Add `scale * weights` to `to` at every feature of the basis except feature 0, which is the bias.
	pub fn grad(&self, scale: f64, mut to: ArrayViewMut1<f64>) {
		for (feature_index, weight) in self.used_features_in_order.iter().zip(self.weights.iter()) {
			if *feature_index != 0 {
				to[*feature_index] += scale * weight;
			}
		}
	}
}

/// The value a raw feature contributes to a leaf's linear model. Invalid values contribute nothing, just as they fall in the first bin.
pub(crate) fn linear_value(value: f32) -> f64 {
	if value.is_finite() {
		f64::from(value)
	} else {
		0.0
	}
}

impl<'g> LinearObliviousTree<'g> {
	pub fn new(
		grid: &'g Grid,
		splits: Vec<ObliviousSplit>,
		leaves: Vec<LinearObliviousTreeLeaf>,
	) -> Result<LinearObliviousTree<'g>> {
		for split in splits.iter() {
			if split.feature_index >= grid.n_features()
				|| split.condition_index >= grid.n_conditions(split.feature_index)
			{
				return Err(Error::InvalidModel(format!(
					"the split on feature {} at condition {} is not in the grid",
					split.feature_index, split.condition_index
				)));
			}
		}
		let n_leaves = u32::try_from(splits.len())
			.ok()
			.and_then(|depth| 1usize.checked_shl(depth))
			.ok_or_else(|| {
				Error::InvalidModel(format!(
					"a tree of depth {} has too many leaves",
					splits.len()
				))
			})?;
		if leaves.len() != n_leaves {
			return Err(Error::DimensionMismatch {
				expected: n_leaves,
				actual: leaves.len(),
			});
		}
		Ok(LinearObliviousTree {
			grid,
			scale: 1.0,
			splits,
			leaves,
		})
	}

	/// Return a copy of this tree whose outputs are multiplied by `scale`.
	pub fn scaled(&self, scale: f64) -> LinearObliviousTree<'g> {
		LinearObliviousTree {
			scale,
			..self.clone()
		}
	}

	pub fn grid(&self) -> &'g Grid {
		self.grid
	}

	pub fn scale(&self) -> f64 {
		self.scale
	}

	pub fn splits(&self) -> &[ObliviousSplit] {
		&self.splits
	}

	pub fn leaves(&self) -> &[LinearObliviousTreeLeaf] {
		&self.leaves
	}

	pub fn depth(&self) -> usize {
		self.splits.len()
	}

	/// Find the leaf for an example by comparing its raw values against the borders of each split, most significant bit first.
	pub fn locate_leaf(&self, x: ArrayView1<f32>) -> usize {
		self.splits.iter().fold(0, |leaf_index, split| {
			let border = self.grid.border(split.feature_index, split.condition_index);
			let goes_right = x[split.feature_index] > border;
			2 * leaf_index + goes_right as usize
		})
	}

	/// Find the leaf for an example from its bins.
	pub fn locate_leaf_binned(&self, bins: &[usize]) -> usize {
		self.locate_leaf_by(|feature_index| bins[feature_index])
	}

	fn locate_leaf_by(&self, bin: impl Fn(usize) -> usize) -> usize {
		self.splits.iter().fold(0, |leaf_index, split| {
			let goes_right = bin(split.feature_index) > split.condition_index;
			2 * leaf_index + goes_right as usize
		})
	}
}

impl<'g> Model for LinearObliviousTree<'g> {
	fn value(&self, x: ArrayView1<f32>) -> f64 {
		let leaf = &self.leaves[self.locate_leaf(x)];
		self.scale * leaf.value(x)
	}

	fn grad(&self, x: ArrayView1<f32>, to: ArrayViewMut1<f64>) {
		let leaf = &self.leaves[self.locate_leaf(x)];
		leaf.grad(self.scale, to);
	}

	fn apply_to_bds(
		&self,
		dataset: &DataSet,
		bds: &BinarizedDataSet,
		mut to: ArrayViewMut1<f64>,
		apply_type: ApplyType,
	) -> Result<()> {
		let n_examples = dataset.n_examples();
		for actual in [bds.n_examples(), to.len()].iter() {
			if *actual != n_examples {
				return Err(Error::DimensionMismatch {
					expected: n_examples,
					actual: *actual,
				});
			}
		}
		pzip!(
			to.axis_iter_mut(Axis(0)),
			dataset.features().axis_iter(Axis(0)),
			0..n_examples,
		)
		.for_each(|(output, x, example_index)| {
			let leaf_index =
				self.locate_leaf_by(|feature_index| bds.bin(example_index, feature_index));
			let value = self.scale * self.leaves[leaf_index].value(x);
			let output = output.into_scalar();
			match apply_type {
				ApplyType::Set => *output = value,
				ApplyType::Append => *output += value,
			}
		});
		Ok(())
	}

	fn apply_binarized_row(&self, _bins: &[usize], _to: ArrayViewMut1<f64>) -> Result<()> {
		Err(Error::Unimplemented(
			"a linear tree needs raw feature values to compute its output",
		))
	}
}

impl<'g> fmt::Display for LinearObliviousTree<'g> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for leaf in self.leaves.iter() {
			write!(f, "{{")?;
			for (i, weight) in leaf.weights.iter().enumerate() {
				if i > 0 {
					write!(f, " ")?;
				}
				write!(f, "{}", weight)?;
			}
			writeln!(f, "}}@{}", leaf.weight)?;
		}
		Ok(())
	}
}

#[cfg(test)]
fn two_split_tree(grid: &Grid) -> LinearObliviousTree {
	let splits = vec![
		ObliviousSplit {
			feature_index: 1,
			condition_index: 0,
		},
		ObliviousSplit {
			feature_index: 2,
			condition_index: 1,
		},
	];
	let leaves = (0..4u8)
		.map(|i| {
			let i = f64::from(i);
			LinearObliviousTreeLeaf::new(vec![0, 1], vec![i, 1.0 + i], 10.0 + i).unwrap()
		})
		.collect();
	LinearObliviousTree::new(grid, splits, leaves).unwrap()
}

#[cfg(test)]
fn test_grid() -> Grid {
	Grid::new(vec![vec![], vec![0.0], vec![-1.0, 1.0]]).unwrap()
}

#[test]
fn test_locate_leaf() {
	let grid = test_grid();
	let tree = two_split_tree(&grid);
	assert_eq!(tree.locate_leaf(arr1(&[1.0, -0.5, 0.0]).view()), 0);
	assert_eq!(tree.locate_leaf(arr1(&[1.0, 0.0, 2.0]).view()), 1);
	assert_eq!(tree.locate_leaf(arr1(&[1.0, 0.5, 1.0]).view()), 2);
	assert_eq!(tree.locate_leaf(arr1(&[1.0, 0.5, 1.5]).view()), 3);
	for x in &[[1.0, -0.5, 0.0], [1.0, 0.0, 2.0], [1.0, 0.5, 1.0], [1.0, 0.5, 1.5]] {
		let bins: Vec<usize> = x
			.iter()
			.enumerate()
			.map(|(feature_index, value)| grid.bin(feature_index, *value))
			.collect();
		assert_eq!(
			tree.locate_leaf_binned(&bins),
			tree.locate_leaf(arr1(x).view())
		);
	}
}

#[test]
fn test_value_and_grad() {
	let grid = test_grid();
	let tree = two_split_tree(&grid);
	let x = arr1(&[1.0, 0.5, 1.5]);
	// Leaf 3 has weights [3, 4].
	assert_eq!(tree.value(x.view()), 5.0);
	let scaled = tree.scaled(0.5);
	assert_eq!(scaled.value(x.view()), 2.5);
	let mut grad = Array1::zeros(3);
	scaled.grad(x.view(), grad.view_mut());
	assert_eq!(grad, arr1(&[0.0, 2.0, 0.0]));
	let mut out = arr1(&[1.0]);
	scaled.append_to(x.view(), out.view_mut());
	assert_eq!(out, arr1(&[3.5]));
}

#[test]
fn test_apply_to_bds() {
	let grid = test_grid();
	let tree = two_split_tree(&grid);
	let dataset = DataSet::new(arr2(&[
		[1.0, -0.5, 0.0],
		[1.0, 0.0, 2.0],
		[1.0, 0.5, 1.0],
		[1.0, 0.5, 1.5],
	]));
	let bds = BinarizedDataSet::new(&dataset, &grid).unwrap();
	let mut out = Array1::from_elem(4, 1.0);
	tree.apply_to_bds(&dataset, &bds, out.view_mut(), ApplyType::Set)
		.unwrap();
	let expected: Vec<f64> = (0..4)
		.map(|i| tree.value(dataset.example(i)))
		.collect();
	assert_eq!(out.to_vec(), expected);
	tree.apply_to_bds(&dataset, &bds, out.view_mut(), ApplyType::Append)
		.unwrap();
	let doubled: Vec<f64> = expected.iter().map(|value| 2.0 * value).collect();
	assert_eq!(out.to_vec(), doubled);
	let mut short = Array1::zeros(3);
	assert!(tree
		.apply_to_bds(&dataset, &bds, short.view_mut(), ApplyType::Set)
		.is_err());
}

#[test]
fn test_apply_binarized_row_is_unimplemented() {
	let grid = test_grid();
	let tree = two_split_tree(&grid);
	let mut out = Array1::zeros(1);
	let result = tree.apply_binarized_row(&[0, 1, 2], out.view_mut());
	assert!(matches!(result, Err(Error::Unimplemented(_))));
}

#[test]
fn test_new_validates() {
	let grid = test_grid();
	let leaf = LinearObliviousTreeLeaf::new(vec![0], vec![1.0], 1.0).unwrap();
	assert!(LinearObliviousTree::new(&grid, vec![], vec![leaf.clone(), leaf.clone()]).is_err());
	let split = ObliviousSplit {
		feature_index: 0,
		condition_index: 0,
	};
	assert!(LinearObliviousTree::new(&grid, vec![split], vec![leaf.clone(), leaf]).is_err());
	assert!(LinearObliviousTreeLeaf::new(vec![0, 1], vec![1.0], 1.0).is_err());
	let valid_split = ObliviousSplit {
		feature_index: 1,
		condition_index: 0,
	};
	assert!(matches!(
		LinearObliviousTree::new(&grid, vec![valid_split; 64], vec![]),
		Err(Error::InvalidModel(_))
	));
}

#[test]
fn test_display() {
	let grid = test_grid();
	let tree = two_split_tree(&grid);
	insta::assert_snapshot!(tree.to_string(), @r###"
 {0 1}@10
 {1 2}@11
 {2 3}@12
 {3 4}@13
 "###);
}

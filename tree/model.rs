use crate::{
	dataset::{BinarizedDataSet, DataSet},
	Result,
};
use ndarray::prelude::*;

/// `ApplyType` selects whether batch application overwrites the output or adds to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyType {
	Set,
	Append,
}

/// A `Model` maps one example to a scalar and can be applied to a whole binarized dataset at once.
pub trait Model {
	fn value(&self, x: ArrayView1<f32>) -> f64;

	/// Add the gradient of `value` with respect to `x` to `to`.
	fn grad(&self, x: ArrayView1<f32>, to: ArrayViewMut1<f64>);

	/// Add `value(x)` to `to[0]`.
	fn append_to(&self, x: ArrayView1<f32>, mut to: ArrayViewMut1<f64>) {
		to[0] += self.value(x);
	}

	/// Compute the value of every example of `dataset`, using `bds` to locate leaves, and write it to `to` or add it to `to` depending on `apply_type`.
	fn apply_to_bds(
		&self,
		dataset: &DataSet,
		bds: &BinarizedDataSet,
		to: ArrayViewMut1<f64>,
		apply_type: ApplyType,
	) -> Result<()>;

	/// Apply the model to a row of bins alone.
	fn apply_binarized_row(&self, bins: &[usize], to: ArrayViewMut1<f64>) -> Result<()>;
}

/*!
This module defines the `Config` struct, a JSON document that configures building a grid and training a tree. Every field is optional and missing fields take their values from `GridOptions::default()` and `TrainOptions::default()`.

```json
{
	"grid": { "max_bins_per_feature": 64 },
	"tree": { "max_depth": 4, "use_bias_column": true, "l2_regularization": 0.1 }
}
```
*/

use crate::{GridOptions, Result, TrainOptions};
use std::path::Path;

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
	pub grid: Option<GridConfig>,
	pub tree: Option<TreeConfig>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridConfig {
	pub max_bins_per_feature: Option<usize>,
	pub max_examples_for_computing_borders: Option<usize>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfig {
	pub max_depth: Option<usize>,
	pub use_bias_column: Option<bool>,
	pub initial_features: Option<Vec<usize>>,
	pub l2_regularization: Option<f64>,
	pub trace_regularization: Option<f64>,
	pub min_gain_to_split: Option<f64>,
	pub n_threads: Option<usize>,
}

impl Config {
	pub fn from_path(path: &Path) -> Result<Config> {
		let config = std::fs::read_to_string(path)?;
		Config::from_str(&config)
	}

	#[allow(clippy::should_implement_trait)]
	pub fn from_str(config: &str) -> Result<Config> {
		Ok(serde_json::from_str(config)?)
	}

	pub fn grid_options(&self) -> GridOptions {
		let default = GridOptions::default();
		let grid = match &self.grid {
			Some(grid) => grid,
			None => return default,
		};
		GridOptions {
			max_bins_per_feature: grid
				.max_bins_per_feature
				.unwrap_or(default.max_bins_per_feature),
			max_examples_for_computing_borders: grid
				.max_examples_for_computing_borders
				.unwrap_or(default.max_examples_for_computing_borders),
		}
	}

	pub fn train_options(&self) -> TrainOptions {
		let default = TrainOptions::default();
		let tree = match &self.tree {
			Some(tree) => tree,
			None => return default,
		};
		TrainOptions {
			max_depth: tree.max_depth.unwrap_or(default.max_depth),
			use_bias_column: tree.use_bias_column.unwrap_or(default.use_bias_column),
			initial_features: tree
				.initial_features
				.clone()
				.unwrap_or(default.initial_features),
			l2_regularization: tree.l2_regularization.unwrap_or(default.l2_regularization),
			trace_regularization: tree
				.trace_regularization
				.unwrap_or(default.trace_regularization),
			min_gain_to_split: tree.min_gain_to_split.unwrap_or(default.min_gain_to_split),
			n_threads: tree.n_threads.or(default.n_threads),
		}
	}
}

#[test]
fn test_empty_config_uses_defaults() {
	let config = Config::from_str("{}").unwrap();
	assert_eq!(config.train_options(), TrainOptions::default());
	assert_eq!(config.grid_options().max_bins_per_feature, 32);
}

#[test]
fn test_config_overrides() {
	let config = Config::from_str(
		r#"{
			"grid": { "max_bins_per_feature": 64 },
			"tree": { "max_depth": 4, "use_bias_column": true, "initial_features": [2], "trace_regularization": 0.5 }
		}"#,
	)
	.unwrap();
	let grid_options = config.grid_options();
	assert_eq!(grid_options.max_bins_per_feature, 64);
	assert_eq!(grid_options.max_examples_for_computing_borders, 200_000);
	let train_options = config.train_options();
	assert_eq!(
		train_options,
		TrainOptions {
			max_depth: 4,
			use_bias_column: true,
			initial_features: vec![2],
			trace_regularization: 0.5,
			..Default::default()
		}
	);
}

#[test]
fn test_config_rejects_unknown_fields() {
	assert!(Config::from_str(r#"{ "tree": { "max_leaves": 4 } }"#).is_err());
	assert!(Config::from_str("not json").is_err());
}

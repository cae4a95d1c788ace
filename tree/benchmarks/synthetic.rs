use clap::Parser;
use linear_tree::{
	ApplyType, BinarizedDataSet, Config, DataSet, Grid, LinearObliviousTreeLearner, Model, Target,
};
use ndarray::prelude::*;
use num_traits::ToPrimitive;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(about = "Fit a linear oblivious tree to synthetic piecewise linear data")]
struct Options {
	/// A JSON file with grid and tree options.
	#[clap(long)]
	config: Option<PathBuf>,
	#[clap(long, default_value = "100000")]
	n_examples: usize,
	#[clap(long, default_value = "0")]
	seed: u64,
}

const N_FEATURES: usize = 8;

fn main() -> linear_tree::Result<()> {
	let env = env_logger::Env::default().default_filter_or("info");
	env_logger::Builder::from_env(env)
		.format_module_path(false)
		.format_timestamp(None)
		.init();
	let options = Options::parse();
	let config = match &options.config {
		Some(path) => Config::from_path(path)?,
		None => Config::default(),
	};
	let mut train_options = config.train_options();
	train_options.use_bias_column = true;

	// Generate the data.
	let mut rng = Xoshiro256Plus::seed_from_u64(options.seed);
	let (dataset_train, target_train) = generate(&mut rng, options.n_examples);
	let n_examples_test = (options.n_examples / 5).max(1);
	let (dataset_test, target_test) = generate(&mut rng, n_examples_test);

	// Train the model.
	let start = std::time::Instant::now();
	let grid = Grid::compute(dataset_train.features(), &config.grid_options())?;
	let mut learner = LinearObliviousTreeLearner::new(&grid, train_options);
	let tree = learner.fit(&dataset_train, &target_train)?;
	let duration = start.elapsed();

	// Make predictions on the test data.
	let bds_test = BinarizedDataSet::new(&dataset_test, &grid)?;
	let mut predictions = Array1::zeros(dataset_test.n_examples());
	tree.apply_to_bds(
		&dataset_test,
		&bds_test,
		predictions.view_mut(),
		ApplyType::Set,
	)?;

	// Compute metrics.
	let mse = predictions
		.iter()
		.zip(target_test.values().iter())
		.map(|(prediction, label)| (prediction - f64::from(*label)).powi(2))
		.sum::<f64>()
		/ n_examples_test.to_f64().unwrap();
	let output = json!({
		"duration": duration.as_secs_f64(),
		"depth": tree.depth(),
		"mse": mse,
	});
	println!("{}", output);
	Ok(())
}

/// The target is linear in the features with slopes that change with the signs of the first two features, plus noise.
fn generate(rng: &mut Xoshiro256Plus, n_examples: usize) -> (DataSet, Target) {
	let mut features = Array2::zeros((n_examples, N_FEATURES));
	let mut values = Array1::zeros(n_examples);
	for (mut row, value) in features.axis_iter_mut(Axis(0)).zip(values.iter_mut()) {
		for feature in row.iter_mut() {
			*feature = rng.gen_range(-1.0..1.0);
		}
		let regime = (row[0] > 0.0) as usize * 2 + (row[1] > 0.0) as usize;
		let slope = [1.0, -2.0, 0.5, 3.0][regime];
		let intercept = [0.0, 1.0, -1.0, 2.0][regime];
		*value = intercept + slope * row[2] - 0.5 * row[3] + rng.gen_range(-0.1..0.1);
	}
	(
		DataSet::with_bias_column(features.view()),
		Target::unweighted(values),
	)
}

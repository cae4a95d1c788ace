use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// The regularized normal equation matrix could not be factored.
	#[error("the normal equation matrix is singular")]
	SingularMatrix,
	#[error("unimplemented: {0}")]
	Unimplemented(&'static str),
	#[error("invalid options: {0}")]
	InvalidOptions(String),
	#[error("invalid model: {0}")]
	InvalidModel(String),
	#[error("expected {expected} values but got {actual}")]
	DimensionMismatch { expected: usize, actual: usize },
	#[error("failed to build the thread pool: {0}")]
	ThreadPool(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
